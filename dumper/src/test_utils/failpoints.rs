use fail::FailScenario;

/// A `fail` scenario with failpoints configured for its lifetime.
///
/// Every configured failpoint is switched off again on drop.
pub struct ConfiguredFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> ConfiguredFailScenario<'a> {
    /// Sets up a scenario with `(failpoint, action)` pairs, e.g. `("process.before_source_delete", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> ConfiguredFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(failpoint, _)| failpoint.to_string())
                .collect(),
        }
    }
}

impl Drop for ConfiguredFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}
