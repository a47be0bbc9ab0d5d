use serde::Deserialize;

use crate::shared::ValidationError;

/// Controls how many counter rows are pulled and staged per batch.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows read from the counter store and inserted into the staging
    /// buffer with one statement.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
}

impl BatchConfig {
    pub const DEFAULT_MAX_SIZE: usize = 10_000;

    /// Ensures `max_size` is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::invalid(
                "batch.max_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_size_is_rejected() {
        let config = BatchConfig { max_size: 0 };
        assert_eq!(
            config.validate(),
            Err(ValidationError::invalid("batch.max_size", "must be greater than 0"))
        );
    }

    #[test]
    fn default_is_valid() {
        assert!(BatchConfig::default().validate().is_ok());
    }
}
