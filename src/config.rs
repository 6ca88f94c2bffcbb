//! Runtime configuration.
//!
//! Layering: defaults, then an optional TOML file, then `CIPHERPATH_*`
//! environment variables, then CLI flags (applied by the binary). Values that
//! fail to parse from the environment are ignored; an unreadable or invalid
//! TOML file is an error.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ColumnOrder, UnknownColumnPolicy};
use crate::CipherpathError;

/// Fixed-point parameters of the homomorphic engine, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fractional bits used to encode input values.
    pub value_bits: u32,
    /// Fractional bits used to quantize plaintext scalars.
    pub factor_bits: u32,
    /// Largest scale a ciphertext may reach.
    pub max_scale_bits: u32,
    /// Largest input magnitude accepted for encryption. Overflow checks on
    /// ciphertexts are derived from this bound, never from the values.
    pub max_abs_value: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            value_bits: 12,
            factor_bits: 24,
            max_scale_bits: 40,
            max_abs_value: 1_000_000.0,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `Config` if one scalar product would not fit the scale budget, the
    /// budget does not leave room for a sign and an integer part in 64 bits,
    /// or `max_abs_value` cannot be encoded.
    pub fn validate(&self) -> Result<(), CipherpathError> {
        if self.value_bits == 0 || self.factor_bits == 0 {
            return Err(CipherpathError::Config(
                "value_bits and factor_bits must be positive".into(),
            ));
        }
        if self.value_bits + self.factor_bits > self.max_scale_bits {
            return Err(CipherpathError::Config(format!(
                "value_bits ({}) + factor_bits ({}) exceeds max_scale_bits ({})",
                self.value_bits, self.factor_bits, self.max_scale_bits
            )));
        }
        if self.max_scale_bits > 52 {
            return Err(CipherpathError::Config(format!(
                "max_scale_bits ({}) must be at most 52",
                self.max_scale_bits
            )));
        }
        if !(self.max_abs_value.is_finite() && self.max_abs_value > 0.0) {
            return Err(CipherpathError::Config(
                "max_abs_value must be a positive number".into(),
            ));
        }
        if self.max_abs_value * 2f64.powi(self.value_bits as i32) >= 2f64.powi(62) {
            return Err(CipherpathError::Config(format!(
                "max_abs_value ({}) does not fit {} fractional bits in 62 bits",
                self.max_abs_value, self.value_bits
            )));
        }
        Ok(())
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads per path.
    pub workers: usize,
    pub engine: EngineConfig,
    pub unknown_columns: UnknownColumnPolicy,
    pub column_order: ColumnOrder,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            engine: EngineConfig::default(),
            unknown_columns: UnknownColumnPolicy::default(),
            column_order: ColumnOrder::default(),
        }
    }
}

/// Remote gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub non_sensitive_url: Option<String>,
    pub sensitive_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            non_sensitive_url: None,
            sensitive_url: None,
            timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which compute service a `serve` process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    #[default]
    NonSensitive,
    Sensitive,
}

impl FromStr for ServiceRole {
    type Err = CipherpathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "non-sensitive" | "non_sensitive" => Ok(Self::NonSensitive),
            "sensitive" => Ok(Self::Sensitive),
            other => Err(CipherpathError::Config(format!(
                "unknown role '{other}' (expected sensitive|non-sensitive)"
            ))),
        }
    }
}

/// Compute service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub role: ServiceRole,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            role: ServiceRole::default(),
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Defaults, overlaid by `path` if given, then by the environment.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `Config` if it is not valid TOML for
    /// this schema or the engine parameters are inconsistent.
    pub fn load(path: Option<&Path>) -> Result<Self, CipherpathError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.pipeline.engine.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `Io` or `Config`.
    pub fn from_file(path: &Path) -> Result<Self, CipherpathError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| CipherpathError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Overlay `CIPHERPATH_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CIPHERPATH_WORKERS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    self.pipeline.workers = n;
                }
            }
        }

        if let Some(v) = lookup("CIPHERPATH_VALUE_BITS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                self.pipeline.engine.value_bits = n;
            }
        }

        if let Some(v) = lookup("CIPHERPATH_FACTOR_BITS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                self.pipeline.engine.factor_bits = n;
            }
        }

        if let Some(v) = lookup("CIPHERPATH_MAX_ABS_VALUE") {
            if let Ok(x) = v.trim().parse::<f64>() {
                self.pipeline.engine.max_abs_value = x;
            }
        }

        if let Some(v) = lookup("CIPHERPATH_UNKNOWN_COLUMNS") {
            if let Ok(policy) = v.parse() {
                self.pipeline.unknown_columns = policy;
            }
        }

        if let Some(v) = lookup("CIPHERPATH_COLUMN_ORDER") {
            if let Ok(order) = v.parse() {
                self.pipeline.column_order = order;
            }
        }

        if let Some(v) = lookup("CIPHERPATH_NON_SENSITIVE_URL") {
            if !v.trim().is_empty() {
                self.gateway.non_sensitive_url = Some(v.trim().to_string());
            }
        }

        if let Some(v) = lookup("CIPHERPATH_SENSITIVE_URL") {
            if !v.trim().is_empty() {
                self.gateway.sensitive_url = Some(v.trim().to_string());
            }
        }

        if let Some(v) = lookup("CIPHERPATH_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    self.gateway.timeout_secs = n;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(cfg.pipeline.workers >= 1);
        assert_eq!(cfg.pipeline.unknown_columns, UnknownColumnPolicy::Reject);
        assert_eq!(cfg.pipeline.column_order, ColumnOrder::Grouped);
        assert_eq!(cfg.gateway.timeout(), Duration::from_secs(30));
        cfg.pipeline.engine.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("CIPHERPATH_WORKERS", " 3 "),
            ("CIPHERPATH_UNKNOWN_COLUMNS", "ignore"),
            ("CIPHERPATH_COLUMN_ORDER", "original"),
            ("CIPHERPATH_SENSITIVE_URL", "http://127.0.0.1:9001/sensitive"),
            ("CIPHERPATH_TIMEOUT_SECS", "5"),
        ]));

        assert_eq!(cfg.pipeline.workers, 3);
        assert_eq!(cfg.pipeline.unknown_columns, UnknownColumnPolicy::Ignore);
        assert_eq!(cfg.pipeline.column_order, ColumnOrder::Original);
        assert_eq!(
            cfg.gateway.sensitive_url.as_deref(),
            Some("http://127.0.0.1:9001/sensitive")
        );
        assert_eq!(cfg.gateway.timeout_secs, 5);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut cfg = Config::default();
        let workers = cfg.pipeline.workers;
        cfg.apply_env(env(&[
            ("CIPHERPATH_WORKERS", "0"),
            ("CIPHERPATH_COLUMN_ORDER", "sideways"),
            ("CIPHERPATH_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(cfg.pipeline.workers, workers);
        assert_eq!(cfg.pipeline.column_order, ColumnOrder::Grouped);
        assert_eq!(cfg.gateway.timeout_secs, 30);
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[pipeline]
workers = 6
column_order = "original"

[pipeline.engine]
value_bits = 16

[gateway]
non_sensitive_url = "http://localhost:8081/non_sensitive"

[server]
role = "sensitive"
"#
        )
        .expect("write config");

        let cfg = Config::from_file(file.path()).expect("valid config");
        assert_eq!(cfg.pipeline.workers, 6);
        assert_eq!(cfg.pipeline.column_order, ColumnOrder::Original);
        assert_eq!(cfg.pipeline.engine.value_bits, 16);
        assert_eq!(cfg.pipeline.engine.factor_bits, 24);
        assert_eq!(cfg.server.role, ServiceRole::Sensitive);
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert!(cfg.gateway.sensitive_url.is_none());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[pipeline]\nworkers = \"many\"").expect("write config");
        let err = Config::from_file(file.path()).expect_err("bad type");
        assert!(matches!(err, CipherpathError::Config(_)));
    }

    #[test]
    fn test_engine_budget_validation() {
        let cfg = EngineConfig {
            value_bits: 20,
            factor_bits: 24,
            max_scale_bits: 40,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_max_abs_value_validation() {
        let too_wide = EngineConfig {
            max_abs_value: 2e15,
            ..EngineConfig::default()
        };
        assert!(matches!(too_wide.validate(), Err(CipherpathError::Config(_))));

        let negative = EngineConfig {
            max_abs_value: -1.0,
            ..EngineConfig::default()
        };
        assert!(negative.validate().is_err());

        let mut cfg = Config::default();
        cfg.apply_env(env(&[("CIPHERPATH_MAX_ABS_VALUE", "1e15")]));
        assert_eq!(cfg.pipeline.engine.max_abs_value, 1e15);
        cfg.pipeline.engine.validate().unwrap();
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("sensitive".parse::<ServiceRole>().unwrap(), ServiceRole::Sensitive);
        assert_eq!("non_sensitive".parse::<ServiceRole>().unwrap(), ServiceRole::NonSensitive);
        assert!("both".parse::<ServiceRole>().is_err());
    }
}
