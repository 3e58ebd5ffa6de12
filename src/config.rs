use anyhow::{Context, Result};
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::ClinicError;

pub const SLOT_MINUTES_ENV: &str = "CLINIC_SLOT_MINUTES";
pub const LOG_LEVEL_ENV: &str = "CLINIC_LOG_LEVEL";

/// Engine settings with tunable scheduling parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one appointment slot; also the minimum gap between two
    /// bookings for the same doctor.
    pub slot_length_minutes: i64,

    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_length_minutes: 30,
            log_level: "info".into(),
        }
    }
}

impl EngineConfig {
    /// Load settings from a JSON file, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            EngineConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(SLOT_MINUTES_ENV).ok(),
            std::env::var(LOG_LEVEL_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, slot_minutes: Option<String>, log_level: Option<String>) {
        if let Some(raw) = slot_minutes {
            match raw.trim().parse::<i64>() {
                Ok(minutes) => self.slot_length_minutes = minutes,
                Err(err) => warn!("Ignoring {SLOT_MINUTES_ENV}='{raw}': {err}"),
            }
        }
        if let Some(level) = log_level.filter(|l| !l.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ClinicError> {
        if self.slot_length_minutes <= 0 {
            return Err(ClinicError::ValidationFailed(format!(
                "Slot length must be positive, got {} minutes",
                self.slot_length_minutes
            )));
        }
        Ok(())
    }

    pub fn slot_length(&self) -> Duration {
        Duration::minutes(self.slot_length_minutes)
    }
}
