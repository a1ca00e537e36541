// Import necessary libraries and modules for file I/O, and serialization.
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::time::Duration;

use crate::engine::GenerationConfig;

pub const SETTINGS_PATH: &str = "./data/settings.json";

// Lower bounds for the lifecycle timings, in seconds.
pub const MIN_CHARACTER_INIT_DELAY: f64 = 2.0;
pub const MIN_TEMPLATE_TIMEOUT: f64 = 5.0;
pub const MIN_WARMUP_TIMEOUT: f64 = 10.0;
pub const MIN_BASE_BACKOFF_DELAY: f64 = 1.0;
pub const MIN_WARMUP_ATTEMPTS: u32 = 1;
// Upper bound for every lifecycle timing, in seconds.
pub const MAX_LIFECYCLE_SECS: f64 = 3600.0;

// Define a structure to hold application settings with serialization support.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub lifecycle: LifecycleSettings,
    pub generation: GenerationConfig,
    pub debug_mode: bool, // Flag to enable or disable debug logging.
}

// Where the OpenAI-compatible server lives and how to talk to it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub api_base: String,
    pub api_key: Option<String>, // Local servers usually need none.
    pub model: String,
    pub context_size: usize, // Tokens shared by every character on the roster.
    pub save_dir: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            api_base: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            context_size: 8192,
            save_dir: "./data/save".to_string(),
        }
    }
}

// Timings and policies for bringing the roster up. Durations are in seconds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LifecycleSettings {
    pub character_init_delay: f64,
    pub template_timeout: f64,
    pub warmup_timeout: f64,
    pub max_warmup_attempts: u32,
    pub base_backoff_delay: f64,
    pub skip_roles: Vec<String>, // Roles that never get a session, compared case-insensitively.
    pub enable_cache: bool,      // Keep saved conversations around after teardown.
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        LifecycleSettings {
            character_init_delay: MIN_CHARACTER_INIT_DELAY,
            template_timeout: 30.0,
            warmup_timeout: 60.0,
            max_warmup_attempts: 3,
            base_backoff_delay: MIN_BASE_BACKOFF_DELAY,
            skip_roles: vec!["victim".to_string()],
            enable_cache: true,
        }
    }
}

impl LifecycleSettings {
    // Returns a copy with every value brought within its bounds. Each adjustment is logged.
    pub fn validated(&self) -> Self {
        let mut settings = self.clone();
        settings.character_init_delay = clamp_secs(
            "character_init_delay",
            settings.character_init_delay,
            MIN_CHARACTER_INIT_DELAY,
        );
        settings.template_timeout = clamp_secs(
            "template_timeout",
            settings.template_timeout,
            MIN_TEMPLATE_TIMEOUT,
        );
        settings.warmup_timeout =
            clamp_secs("warmup_timeout", settings.warmup_timeout, MIN_WARMUP_TIMEOUT);
        settings.base_backoff_delay = clamp_secs(
            "base_backoff_delay",
            settings.base_backoff_delay,
            MIN_BASE_BACKOFF_DELAY,
        );
        if settings.max_warmup_attempts < MIN_WARMUP_ATTEMPTS {
            warn!(
                "max_warmup_attempts {} is below the minimum, using {}",
                settings.max_warmup_attempts, MIN_WARMUP_ATTEMPTS
            );
            settings.max_warmup_attempts = MIN_WARMUP_ATTEMPTS;
        }
        settings
    }

    pub fn character_init_delay(&self) -> Duration {
        seconds(self.character_init_delay)
    }

    pub fn template_timeout(&self) -> Duration {
        seconds(self.template_timeout)
    }

    pub fn warmup_timeout(&self) -> Duration {
        seconds(self.warmup_timeout)
    }

    // Delay before warm-up attempt `attempt` (1-based). The first attempt never waits.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        seconds(self.base_backoff_delay).saturating_mul(factor)
    }

    pub fn skips_role(&self, role: Option<&str>) -> bool {
        role.is_some_and(|role| {
            self.skip_roles
                .iter()
                .any(|skip| skip.eq_ignore_ascii_case(role))
        })
    }
}

fn clamp_secs(name: &str, value: f64, minimum: f64) -> f64 {
    if value.is_nan() || value < minimum {
        warn!("{} {} is below the minimum, using {}", name, value, minimum);
        minimum
    } else if value > MAX_LIFECYCLE_SECS {
        warn!(
            "{} {} is above the maximum, using {}",
            name, value, MAX_LIFECYCLE_SECS
        );
        MAX_LIFECYCLE_SECS
    } else {
        value
    }
}

// Unvalidated values never panic: NaN reads as zero, anything else is kept within bounds.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_LIFECYCLE_SECS)).unwrap_or(Duration::ZERO)
}

// Additional implementation block for Settings.
impl Settings {
    // Constructor function to create new settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    // Load settings from a default file path.
    pub fn load() -> io::Result<Self> {
        Self::load_settings_from_file(SETTINGS_PATH)
    }

    // Save current settings to a default file path.
    pub fn save(&self) -> io::Result<()> {
        self.save_to_file(SETTINGS_PATH)
    }

    // Load settings from a specified file path.
    pub fn load_settings_from_file(path: &str) -> io::Result<Self> {
        let data = fs::read_to_string(path)?; // Read settings from file.
        let settings = serde_json::from_str(&data)?; // Deserialize JSON data into settings.
        Ok(settings)
    }

    // Save current settings to a specified file path.
    pub fn save_to_file(&self, path: &str) -> io::Result<()> {
        let data = serde_json::to_string_pretty(self)?; // Serialize settings as pretty JSON.
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)?; // Create the directory if it doesn't exist.
        }
        let mut file = fs::File::create(path)?; // Create or overwrite the file.
        file.write_all(data.as_bytes())?; // Write the serialized data to the file.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validated_raises_values_to_minimums() {
        let settings = LifecycleSettings {
            character_init_delay: 0.5,
            template_timeout: 1.0,
            warmup_timeout: f64::NAN,
            max_warmup_attempts: 0,
            base_backoff_delay: 0.0,
            ..Default::default()
        }
        .validated();
        assert_eq!(settings.character_init_delay, MIN_CHARACTER_INIT_DELAY);
        assert_eq!(settings.template_timeout, MIN_TEMPLATE_TIMEOUT);
        assert_eq!(settings.warmup_timeout, MIN_WARMUP_TIMEOUT);
        assert_eq!(settings.max_warmup_attempts, MIN_WARMUP_ATTEMPTS);
        assert_eq!(settings.base_backoff_delay, MIN_BASE_BACKOFF_DELAY);
    }

    #[test]
    fn validated_caps_huge_and_infinite_values() {
        let settings = LifecycleSettings {
            character_init_delay: f64::INFINITY,
            template_timeout: 1e30,
            warmup_timeout: 120.0,
            base_backoff_delay: f64::MAX,
            ..Default::default()
        }
        .validated();
        assert_eq!(settings.character_init_delay, MAX_LIFECYCLE_SECS);
        assert_eq!(settings.template_timeout, MAX_LIFECYCLE_SECS);
        assert_eq!(settings.warmup_timeout, 120.0);
        assert_eq!(settings.base_backoff_delay, MAX_LIFECYCLE_SECS);
        assert_eq!(settings.template_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn durations_of_unvalidated_values_do_not_panic() {
        let settings = LifecycleSettings {
            character_init_delay: f64::NAN,
            template_timeout: 1e30,
            warmup_timeout: -4.0,
            base_backoff_delay: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(settings.character_init_delay(), Duration::ZERO);
        assert_eq!(settings.template_timeout(), Duration::from_secs(3600));
        assert_eq!(settings.warmup_timeout(), Duration::ZERO);
        assert_eq!(settings.backoff_before(2), Duration::from_secs(7200));
    }

    #[test]
    fn backoff_doubles_from_the_second_attempt() {
        let settings = LifecycleSettings {
            base_backoff_delay: 1.5,
            ..Default::default()
        };
        assert_eq!(settings.backoff_before(1), Duration::ZERO);
        assert_eq!(settings.backoff_before(2), Duration::from_secs(3));
        assert_eq!(settings.backoff_before(3), Duration::from_secs(6));
    }

    #[test]
    fn skip_roles_ignore_case() {
        let settings = LifecycleSettings::default();
        assert!(settings.skips_role(Some("Victim")));
        assert!(!settings.skips_role(Some("Suspect")));
        assert!(!settings.skips_role(None));
    }

    #[test]
    fn settings_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let path = path.to_str().unwrap();

        let mut settings = Settings::new();
        settings.debug_mode = true;
        settings.lifecycle.skip_roles = vec!["victim".into(), "narrator".into()];
        settings.save_to_file(path).unwrap();

        let loaded = Settings::load_settings_from_file(path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"lifecycle": {"max_warmup_attempts": 5}}"#).unwrap();

        let loaded = Settings::load_settings_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.lifecycle.max_warmup_attempts, 5);
        assert_eq!(loaded.lifecycle.skip_roles, ["victim"]);
        assert_eq!(loaded.engine, EngineSettings::default());
    }
}
