use std::collections::HashSet;

use serde::Deserialize;

use crate::load::Config;
use crate::shared::{BatchConfig, JobConfig, PgConnectionConfig, RedisConfig, ValidationError};

/// Top-level configuration of a dumper process.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DumperConfig {
    pub database: PgConnectionConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl DumperConfig {
    /// Validates every nested section and rejects duplicate job names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.redis.validate()?;
        self.batch.validate()?;

        let mut seen = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(ValidationError::DuplicateJob(job.name.clone()));
            }
            job.validate()?;
        }

        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

impl Config for DumperConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
