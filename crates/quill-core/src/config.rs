use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ErrorCode;
use crate::lock::LockSettings;

/// Coordination settings shared by every worker process.
///
/// The renewal interval must stay well below the lease duration so a held
/// lease survives a couple of missed renewals before lapsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// TTL written with every lease acquisition and renewal, in seconds.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    /// Period of the background renewal task, in seconds.
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    /// Hard deadline for a blocking `acquire`, in seconds.
    #[serde(default = "default_acquire_deadline_secs")]
    pub acquire_deadline_secs: u64,
    /// Ceiling on a single blocking wait on the wake channel, in milliseconds.
    #[serde(default = "default_wait_poll_ceiling_ms")]
    pub wait_poll_ceiling_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration_secs(),
            renewal_interval_secs: default_renewal_interval_secs(),
            acquire_deadline_secs: default_acquire_deadline_secs(),
            wait_poll_ceiling_ms: default_wait_poll_ceiling_ms(),
        }
    }
}

impl CoordinationConfig {
    /// Load config from a TOML file, falling back to defaults for missing keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read coordination config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| {
            format!(
                "{}: parse coordination config {}",
                ErrorCode::ConfigParseError,
                path.display()
            )
        })
    }

    #[must_use]
    pub const fn acquire_deadline(&self) -> Duration {
        Duration::from_secs(self.acquire_deadline_secs)
    }

    /// Lock timing settings derived from this config.
    #[must_use]
    pub const fn lock_settings(&self) -> LockSettings {
        LockSettings {
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            renewal_interval: Duration::from_secs(self.renewal_interval_secs),
            wait_poll_ceiling: Duration::from_millis(self.wait_poll_ceiling_ms),
        }
    }
}

const fn default_lease_duration_secs() -> u64 {
    30
}

const fn default_renewal_interval_secs() -> u64 {
    10
}

const fn default_acquire_deadline_secs() -> u64 {
    30
}

const fn default_wait_poll_ceiling_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::CoordinationConfig;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_keep_renewal_well_below_lease() {
        let config = CoordinationConfig::default();
        assert_eq!(config.lease_duration_secs, 30);
        assert_eq!(config.renewal_interval_secs, 10);
        assert!(config.renewal_interval_secs * 2 < config.lease_duration_secs);
    }

    #[test]
    fn lock_settings_convert_to_durations() {
        let settings = CoordinationConfig::default().lock_settings();
        assert_eq!(settings.lease_duration, Duration::from_secs(30));
        assert_eq!(settings.renewal_interval, Duration::from_secs(10));
        assert_eq!(settings.wait_poll_ceiling, Duration::from_secs(1));
    }

    #[test]
    fn load_accepts_partial_files() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        writeln!(file, "lease_duration_secs = 60").expect("write config");

        let config = CoordinationConfig::load(file.path()).expect("load config");
        assert_eq!(config.lease_duration_secs, 60);
        assert_eq!(config.renewal_interval_secs, 10);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        writeln!(file, "lease_duration_secs = [not a number").expect("write config");

        let err = CoordinationConfig::load(file.path()).expect_err("parse should fail");
        assert!(format!("{err:#}").contains("E1001"));
    }
}
