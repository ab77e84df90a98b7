//! # Configuration
//!
//! `esgate.toml` loading.
//!
//! ```toml
//! [engine]
//! endpoint = "http://localhost:9200"
//! timeout_secs = 30
//! config_index = "gen3-config"
//!
//! [[index]]
//! index = "subject"
//! type = "subject"
//!
//! [[index]]
//! index = "file"
//! type = "file"
//! tier_gated = false
//!
//! [tier]
//! default_threshold = 50
//! ```
//!
//! `ESGATE_ENDPOINT` overrides `engine.endpoint`.

use esgate_core::{GateError, GateSettings, IndexSettings};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the engine endpoint.
pub const ENDPOINT_ENV: &str = "ESGATE_ENDPOINT";

fn default_endpoint() -> String {
    "http://localhost:9200".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

// =============================================================================
// SECTIONS
// =============================================================================

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub config_index: Option<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            config_index: None,
        }
    }
}

/// `[tier]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct TierSection {
    /// Threshold used when the command line does not give one.
    #[serde(default)]
    pub default_threshold: u64,
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// Parsed `esgate.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default, rename = "index")]
    pub indices: Vec<IndexSettings>,
    #[serde(default)]
    pub tier: TierSection,
}

impl AppConfig {
    /// Read and parse `path`, then apply the endpoint override from the
    /// environment.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GateError::Configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::parse(&text)?;
        config.override_endpoint(std::env::var(ENDPOINT_ENV).ok());
        Ok(config)
    }

    /// Parse TOML text. At least one `[[index]]` is required.
    pub fn parse(text: &str) -> Result<Self, GateError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| GateError::Configuration(format!("Invalid configuration: {e}")))?;
        if config.indices.is_empty() {
            return Err(GateError::Configuration(
                "No [[index]] entries configured".to_string(),
            ));
        }
        if config.engine.timeout_secs == 0 {
            return Err(GateError::Configuration(
                "engine.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    /// Replace the endpoint when `endpoint` is set and non-empty.
    pub fn override_endpoint(&mut self, endpoint: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            tracing::debug!(%endpoint, "engine endpoint overridden from environment");
            self.engine.endpoint = endpoint;
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.engine.timeout_secs)
    }

    /// Settings handed to the gate.
    #[must_use]
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            indices: self.indices.clone(),
            config_index: self.engine.config_index.clone(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use esgate_core::ErrorKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[engine]
endpoint = "http://search:9200"
timeout_secs = 5
config_index = "gen3-config"

[[index]]
index = "subject"
type = "subject"

[[index]]
index = "file"
type = "file"
tier_gated = false

[tier]
default_threshold = 50
"#;

    #[test]
    fn parses_full_file() {
        let config = AppConfig::parse(SAMPLE).expect("parse");
        assert_eq!(config.engine.endpoint, "http://search:9200");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.tier.default_threshold, 50);
        assert_eq!(config.indices.len(), 2);
        assert!(config.indices[0].tier_gated);
        assert!(!config.indices[1].tier_gated);

        let settings = config.gate_settings();
        assert_eq!(settings.config_index.as_deref(), Some("gen3-config"));
        assert_eq!(settings.indices[1].descriptor.doc_type, "file");
    }

    #[test]
    fn engine_and_tier_sections_default() {
        let config = AppConfig::parse(
            r#"
[[index]]
index = "subject"
type = "subject"
"#,
        )
        .expect("parse");
        assert_eq!(config.engine, EngineSection::default());
        assert_eq!(config.tier.default_threshold, 0);
        assert_eq!(config.gate_settings().config_index, None);
    }

    #[test]
    fn empty_index_list_is_a_configuration_error() {
        let err = AppConfig::parse("[engine]\nendpoint = \"http://x\"\n").expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn malformed_and_zero_timeout_are_rejected() {
        assert!(AppConfig::parse("[[index]]\nindex = 3\n").is_err());
        let err = AppConfig::parse(
            "[engine]\ntimeout_secs = 0\n[[index]]\nindex = \"a\"\ntype = \"a\"\n",
        )
        .expect_err("zero timeout");
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn endpoint_override_ignores_blank_values() {
        let mut config = AppConfig::parse(SAMPLE).expect("parse");
        config.override_endpoint(Some("  ".into()));
        assert_eq!(config.engine.endpoint, "http://search:9200");
        config.override_endpoint(None);
        assert_eq!(config.engine.endpoint, "http://search:9200");
        config.override_endpoint(Some("http://other:9200".into()));
        assert_eq!(config.engine.endpoint, "http://other:9200");
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(SAMPLE.as_bytes()).expect("write");
        let config = AppConfig::load(file.path()).expect("load");
        assert_eq!(config.indices.len(), 2);

        let missing = file.path().with_extension("missing");
        let err = AppConfig::load(&missing).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
