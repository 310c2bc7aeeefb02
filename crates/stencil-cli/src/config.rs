//! TOML run configuration with environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use stencil_compute::DEFAULT_TIMING_LABEL;
use stencil_io::{TextFormat, DEFAULT_MAX_HEADER_BYTES};

/// Worker count for the in-process group.
pub const WORKERS_ENV: &str = "STENCIL_WORKERS";
/// Rayon threads per worker.
pub const THREADS_ENV: &str = "STENCIL_THREADS";

/// Run parameters. Every field is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of workers in the in-process group. Ignored under MPI, where
    /// the world size decides.
    pub workers: usize,
    /// Threads per worker; `None` uses the shared global pool.
    pub threads_per_worker: Option<usize>,
    /// Longest header line accepted by the file reader.
    pub max_header_bytes: usize,
    /// Label of the printed timing line.
    pub timing_label: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            threads_per_worker: None,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            timing_label: DEFAULT_TIMING_LABEL.into(),
        }
    }
}

impl RunConfig {
    /// Resolve the configuration: defaults, then the optional file, then
    /// the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => load_config(path)?,
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides looked up through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(WORKERS_ENV) {
            self.workers = parse_count(WORKERS_ENV, &value)?;
        }
        if let Some(value) = lookup(THREADS_ENV) {
            self.threads_per_worker = Some(parse_count(THREADS_ENV, &value)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn text_format(&self) -> TextFormat {
        TextFormat::with_max_header_bytes(self.max_header_bytes)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.threads_per_worker == Some(0) {
            anyhow::bail!("threads_per_worker must be at least 1");
        }
        if self.max_header_bytes == 0 {
            anyhow::bail!("max_header_bytes must be at least 1");
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got '{}'", key, value))
}

/// Load and parse a TOML run configuration file.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read config {}", path.display()))?;
    let config: RunConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RunConfig = toml::from_str("workers = 4\n").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.threads_per_worker, None);
        assert_eq!(config.max_header_bytes, DEFAULT_MAX_HEADER_BYTES);
        assert_eq!(config.timing_label, "STENCIL_TIME");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<RunConfig>("wokers = 4\n").is_err());
    }

    #[test]
    fn test_environment_wins_over_file() {
        let config: RunConfig = toml::from_str("workers = 4\nthreads_per_worker = 2\n").unwrap();
        let config = config
            .with_overrides(env(&[(WORKERS_ENV, "8"), (THREADS_ENV, " 3 ")]))
            .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.threads_per_worker, Some(3));
    }

    #[test]
    fn test_bad_override_rejected() {
        assert!(RunConfig::default()
            .with_overrides(env(&[(WORKERS_ENV, "many")]))
            .is_err());
        assert!(RunConfig::default()
            .with_overrides(env(&[(WORKERS_ENV, "0")]))
            .is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "max_header_bytes = 64\ntiming_label = \"T\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.max_header_bytes, 64);
        assert_eq!(config.timing_label, "T");
        assert_eq!(config.workers, 1);
    }
}
