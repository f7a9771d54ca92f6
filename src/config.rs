use crate::oracle::{BatchMode, OracleSettings};
use crate::scoring::InputMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_NAME: &str = "phrasecore";
const CONFIG_NAME: &str = "config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle_host: String,
    pub oracle_port: u16,
    pub ngram_order: usize,
    pub batch_size: usize,
    pub batch_mode: BatchMode,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub word_penalty_weight: f32,
    pub translation_weights: Vec<f32>,
    pub lm_weight: f32,
    /// Lattice or confusion-network input.
    pub structured_input: bool,
    pub index_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracle_host: "127.0.0.1".to_string(),
            oracle_port: 5000,
            ngram_order: 3,
            batch_size: 100,
            batch_mode: BatchMode::Sequential,
            max_attempts: 5,
            retry_delay_ms: 1000,
            word_penalty_weight: 1.0,
            translation_weights: vec![0.2; 5],
            lm_weight: 0.5,
            structured_input: false,
            index_path: default_index_path(),
        }
    }
}

/// `<local data dir>/phrasecore/phrases.idx`, when the platform has one.
pub fn default_index_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_NAME).join("phrases.idx"))
}

impl Config {
    pub fn load() -> Result<Self, confy::ConfyError> {
        match confy::load(APP_NAME, Some(CONFIG_NAME)) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!(target: "phrasecore::config", error = %err, "failed to load config, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, Some(CONFIG_NAME), self)
    }

    pub fn oracle_settings(&self) -> OracleSettings {
        OracleSettings {
            order: self.ngram_order,
            batch_size: self.batch_size,
            batch_mode: self.batch_mode,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn input_mode(&self) -> InputMode {
        if self.structured_input {
            InputMode::Structured
        } else {
            InputMode::Plain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_oracle_defaults() {
        let config = Config::default();
        assert_eq!(config.oracle_settings(), OracleSettings::default());
        assert_eq!(config.input_mode(), InputMode::Plain);
        assert_eq!(config.translation_weights.len(), 5);
    }

    #[test]
    fn test_overrides() {
        let config = Config {
            batch_mode: BatchMode::Batched,
            retry_delay_ms: 20,
            structured_input: true,
            ..Config::default()
        };
        let settings = config.oracle_settings();
        assert_eq!(settings.batch_mode, BatchMode::Batched);
        assert_eq!(settings.retry_delay, Duration::from_millis(20));
        assert_eq!(config.input_mode(), InputMode::Structured);
    }

    #[test]
    fn test_index_path_under_app_dir() {
        if let Some(path) = default_index_path() {
            assert!(path.ends_with("phrasecore/phrases.idx"));
        }
    }
}
