use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::coordinator::{PassSettings, TimeoutPolicy};
use crate::fetcher::FieldMap;
use crate::worker::WorkerPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub main_workers_per_unit: usize,
    pub recovery_workers_per_unit: usize,
    pub min_worker_timeout_secs: u64,
    pub recovery_worker_timeout_secs: u64,
    pub seconds_per_page: f64,
    pub timeout_margin_secs: u64,
    pub hard_deadline_grace_secs: u64,
    pub poll_interval_ms: u64,
    pub consecutive_failure_threshold: u32,
    pub page_timeout_secs: u64,
    pub max_page_attempts: u32,
    pub retry_delay_ms: u64,
    pub page_size: u32,
    pub recovery_enabled: bool,
    pub fetch_base_url: String,
    pub key_field: String,
    pub ordinal_field: String,
    pub group_field: String,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub status_port: u16,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            main_workers_per_unit: 10,
            recovery_workers_per_unit: 5,
            min_worker_timeout_secs: 3600,
            recovery_worker_timeout_secs: 600,
            seconds_per_page: 3.0,
            timeout_margin_secs: 600,
            hard_deadline_grace_secs: 60,
            poll_interval_ms: 1000,
            consecutive_failure_threshold: 5,
            page_timeout_secs: 30,
            max_page_attempts: 3,
            retry_delay_ms: 2000,
            page_size: 10,
            recovery_enabled: true,
            fetch_base_url: "http://localhost:8080".to_string(),
            key_field: "key".to_string(),
            ordinal_field: "ordinal".to_string(),
            group_field: "group".to_string(),
            output_dir: PathBuf::from("output"),
            output_prefix: "records".to_string(),
            status_port: 8000,
        }
    }
}

impl SweepConfig {
    /// Load defaults, then `path` if given, then `PAGESWEEP_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&SweepConfig::default()).context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix("PAGESWEEP").try_parsing(true))
            .build()
            .context("Failed to build configuration")?;

        let config: SweepConfig = config.try_deserialize().context("Failed to deserialize configuration")?;
        config.validated()
    }

    /// Reject settings no run can use and clamp the ones that merely disagree
    pub fn validated(mut self) -> Result<Self> {
        if self.main_workers_per_unit == 0 {
            bail!("main_workers_per_unit must be at least 1");
        }
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if !self.seconds_per_page.is_finite() || self.seconds_per_page < 0.0 {
            bail!("seconds_per_page must be a non-negative number, got {}", self.seconds_per_page);
        }
        if self.recovery_workers_per_unit == 0 {
            warn!("⚠️ recovery_workers_per_unit is 0, using 1");
            self.recovery_workers_per_unit = 1;
        }
        if self.recovery_workers_per_unit > self.main_workers_per_unit {
            warn!(
                "⚠️ recovery_workers_per_unit ({}) exceeds main_workers_per_unit ({}), clamping",
                self.recovery_workers_per_unit, self.main_workers_per_unit
            );
            self.recovery_workers_per_unit = self.main_workers_per_unit;
        }
        Ok(self)
    }

    fn worker_policy(&self) -> WorkerPolicy {
        WorkerPolicy {
            // replaced per unit by the coordinator
            timeout: Duration::from_secs(self.min_worker_timeout_secs),
            page_timeout: Duration::from_secs(self.page_timeout_secs),
            consecutive_failure_threshold: self.consecutive_failure_threshold,
            max_page_attempts: self.max_page_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn main_pass(&self) -> PassSettings {
        PassSettings {
            worker_budget: self.main_workers_per_unit,
            timeout: TimeoutPolicy::Dynamic {
                minimum: Duration::from_secs(self.min_worker_timeout_secs),
                seconds_per_page: self.seconds_per_page,
                margin: Duration::from_secs(self.timeout_margin_secs),
            },
            worker: self.worker_policy(),
            hard_deadline_grace: Duration::from_secs(self.hard_deadline_grace_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn recovery_pass(&self) -> PassSettings {
        PassSettings {
            worker_budget: self.recovery_workers_per_unit,
            timeout: TimeoutPolicy::Fixed(Duration::from_secs(self.recovery_worker_timeout_secs)),
            ..self.main_pass()
        }
    }

    pub fn field_map(&self) -> FieldMap {
        FieldMap { key: self.key_field.clone(), ordinal: self.ordinal_field.clone(), group: self.group_field.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SweepConfig::default();
        assert_eq!(config.main_workers_per_unit, 10);
        assert_eq!(config.recovery_workers_per_unit, 5);
        assert_eq!(config.min_worker_timeout_secs, 3600);
        assert_eq!(config.recovery_worker_timeout_secs, 600);
        assert_eq!(config.consecutive_failure_threshold, 5);
        assert_eq!(config.page_size, 10);
        assert!(config.recovery_enabled);
        assert_eq!(config.status_port, 8000);
    }

    #[test]
    fn test_pass_settings() {
        let config = SweepConfig::default();

        let main = config.main_pass();
        assert_eq!(main.worker_budget, 10);
        assert_eq!(main.timeout.worker_timeout(100), Duration::from_secs(3600));
        assert_eq!(main.hard_deadline_grace, Duration::from_secs(60));
        assert_eq!(main.worker.consecutive_failure_threshold, 5);

        let recovery = config.recovery_pass();
        assert_eq!(recovery.worker_budget, 5);
        assert_eq!(recovery.timeout.worker_timeout(5000), Duration::from_secs(600));
        assert_eq!(recovery.worker.page_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validated_clamps_recovery_workers() {
        let config = SweepConfig { main_workers_per_unit: 3, recovery_workers_per_unit: 8, ..Default::default() }.validated().unwrap();
        assert_eq!(config.recovery_workers_per_unit, 3);

        let config = SweepConfig { recovery_workers_per_unit: 0, ..Default::default() }.validated().unwrap();
        assert_eq!(config.recovery_workers_per_unit, 1);
    }

    #[test]
    fn test_validated_rejects_unusable_settings() {
        assert!(SweepConfig { main_workers_per_unit: 0, ..Default::default() }.validated().is_err());
        assert!(SweepConfig { page_size: 0, ..Default::default() }.validated().is_err());
        assert!(SweepConfig { seconds_per_page: -1.0, ..Default::default() }.validated().is_err());
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        let config = SweepConfig::load(None).unwrap();
        assert_eq!(config.main_workers_per_unit, 10);
        assert_eq!(config.fetch_base_url, "http://localhost:8080");
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        unsafe {
            env::set_var("PAGESWEEP_MAIN_WORKERS_PER_UNIT", "12");
            env::set_var("PAGESWEEP_RECOVERY_ENABLED", "false");
            env::set_var("PAGESWEEP_SECONDS_PER_PAGE", "4.5");
        }

        let config = SweepConfig::load(None).unwrap();
        assert_eq!(config.main_workers_per_unit, 12);
        assert!(!config.recovery_enabled);
        assert_eq!(config.seconds_per_page, 4.5);

        unsafe {
            env::remove_var("PAGESWEEP_MAIN_WORKERS_PER_UNIT");
            env::remove_var("PAGESWEEP_RECOVERY_ENABLED");
            env::remove_var("PAGESWEEP_SECONDS_PER_PAGE");
        }
    }

    #[test]
    #[serial]
    fn test_load_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "main_workers_per_unit = 6\npage_size = 25\noutput_prefix = \"entities\"").unwrap();

        unsafe {
            env::set_var("PAGESWEEP_PAGE_SIZE", "50");
        }

        let config = SweepConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.main_workers_per_unit, 6);
        assert_eq!(config.output_prefix, "entities");
        // environment wins over the file
        assert_eq!(config.page_size, 50);

        unsafe {
            env::remove_var("PAGESWEEP_PAGE_SIZE");
        }
    }

    #[test]
    #[serial]
    fn test_load_missing_file_fails() {
        assert!(SweepConfig::load(Some(Path::new("/nonexistent/pagesweep.toml"))).is_err());
    }
}
