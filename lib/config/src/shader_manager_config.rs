use std::path::Path;

use crate::manager::{ConfigError, ConfigManager};

/// Lower bound for the shader manager's self-validation interval:
/// values below this are clamped on load and the file is rewritten with the
/// corrected value.
pub const MIN_SELF_VALIDATION_INTERVAL_MINUTES: u64 = 15;

const KEY_INTERVAL_MINUTES: &str = "self_validation_interval_minutes";

/// Config file for the shader manager: currently just the
/// self-validation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderManagerConfig {
    pub self_validation_interval_minutes: u64,
}

impl Default for ShaderManagerConfig {
    fn default() -> Self {
        Self {
            self_validation_interval_minutes: MIN_SELF_VALIDATION_INTERVAL_MINUTES,
        }
    }
}

impl ShaderManagerConfig {
    /// Loads the config from `path`, clamping `self_validation_interval_minutes`
    /// to [`MIN_SELF_VALIDATION_INTERVAL_MINUTES`] and rewriting the file if a
    /// lower value was found (or the file didn't exist yet).
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let (mut config, mut dirty) = if path.exists() {
            let manager = ConfigManager::load_file(path)?;
            let minutes = manager.get_value(
                "",
                KEY_INTERVAL_MINUTES,
                MIN_SELF_VALIDATION_INTERVAL_MINUTES,
            );
            (Self { self_validation_interval_minutes: minutes }, false)
        } else {
            (Self::default(), true)
        };

        if config.self_validation_interval_minutes < MIN_SELF_VALIDATION_INTERVAL_MINUTES {
            log::warn!(
                "shader manager self-validation interval {} is below the minimum of {}, clamping",
                config.self_validation_interval_minutes,
                MIN_SELF_VALIDATION_INTERVAL_MINUTES
            );
            config.self_validation_interval_minutes = MIN_SELF_VALIDATION_INTERVAL_MINUTES;
            dirty = true;
        }

        if dirty {
            config.save(path)?;
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut manager = ConfigManager::new();
        manager.set_value("", KEY_INTERVAL_MINUTES, self.self_validation_interval_minutes);
        manager.save_file(path)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.self_validation_interval_minutes * 60)
    }
}
