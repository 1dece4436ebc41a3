use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AccelError, Result};

/// Enables or disables accelerator lowering.
pub const ENABLED: &str = "accelerator.enabled";
/// Enables verbose before/after pipeline dumps.
pub const DEBUG_ENABLED: &str = "accelerator.debug_enabled";
/// Device memory resource mode (`cuda`, `pool`, `async`, `arena`, `managed`, `managed_pool`).
pub const MEMORY_RESOURCE: &str = "accelerator.memory_resource";
/// Share of device memory the resource may reserve, in percent.
pub const MEMORY_PERCENT: &str = "accelerator.memory_percent";
/// Prefix applied to every built-in function name.
pub const FUNCTION_NAME_PREFIX: &str = "accelerator.function_name_prefix";
/// Registers the AST evaluator strategy at activation.
pub const AST_EXPRESSION_ENABLED: &str = "accelerator.ast_expression_enabled";
/// Priority of the AST evaluator strategy.
pub const AST_EXPRESSION_PRIORITY: &str = "accelerator.ast_expression_priority";
/// Keeps unsupported stages on the host instead of failing plan compilation.
pub const ALLOW_CPU_FALLBACK: &str = "accelerator.allow_cpu_fallback";
/// Emits a diagnostic whenever an expression falls back to the host.
pub const LOG_FALLBACK: &str = "accelerator.log_fallback";

/// Accelerator subsystem configuration.
///
/// Parsed once at subsystem initialization from a string-keyed map; keys that are not
/// recognized are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    pub enabled: bool,
    pub debug_enabled: bool,
    pub memory_resource: String,
    pub memory_percent: i32,
    pub function_name_prefix: String,
    pub ast_expression_enabled: bool,
    pub ast_expression_priority: i32,
    pub allow_cpu_fallback: bool,
    pub log_fallback: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_enabled: false,
            memory_resource: "async".to_string(),
            memory_percent: 50,
            function_name_prefix: String::new(),
            ast_expression_enabled: false,
            ast_expression_priority: 100,
            allow_cpu_fallback: true,
            log_fallback: true,
        }
    }
}

impl AcceleratorConfig {
    /// Build a config from defaults overridden by `map`.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply(map)?;
        Ok(cfg)
    }

    /// Override fields present in `map`; other fields keep their current values.
    pub fn apply(&mut self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(v) = map.get(ENABLED) {
            self.enabled = parse_value(ENABLED, v)?;
        }
        if let Some(v) = map.get(DEBUG_ENABLED) {
            self.debug_enabled = parse_value(DEBUG_ENABLED, v)?;
        }
        if let Some(v) = map.get(MEMORY_RESOURCE) {
            self.memory_resource = v.trim().to_string();
        }
        if let Some(v) = map.get(MEMORY_PERCENT) {
            let percent: i32 = parse_value(MEMORY_PERCENT, v)?;
            if !(1..=100).contains(&percent) {
                return Err(AccelError::InvalidConfig(format!(
                    "{MEMORY_PERCENT} must be within 1..=100, got {percent}"
                )));
            }
            self.memory_percent = percent;
        }
        if let Some(v) = map.get(FUNCTION_NAME_PREFIX) {
            self.function_name_prefix = v.clone();
        }
        if let Some(v) = map.get(AST_EXPRESSION_ENABLED) {
            self.ast_expression_enabled = parse_value(AST_EXPRESSION_ENABLED, v)?;
        }
        if let Some(v) = map.get(AST_EXPRESSION_PRIORITY) {
            self.ast_expression_priority = parse_value(AST_EXPRESSION_PRIORITY, v)?;
        }
        if let Some(v) = map.get(ALLOW_CPU_FALLBACK) {
            self.allow_cpu_fallback = parse_value(ALLOW_CPU_FALLBACK, v)?;
        }
        if let Some(v) = map.get(LOG_FALLBACK) {
            self.log_fallback = parse_value(LOG_FALLBACK, v)?;
        }
        Ok(())
    }
}

/// Read the per-query `accelerator.enabled` override, falling back to `default`.
pub fn query_enabled(query_config: &HashMap<String, String>, default: bool) -> Result<bool> {
    match query_config.get(ENABLED) {
        Some(v) => parse_value(ENABLED, v),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .to_ascii_lowercase()
        .parse::<T>()
        .map_err(|e| AccelError::InvalidConfig(format!("{key}={raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_survive_empty_map() {
        let cfg = AcceleratorConfig::from_map(&HashMap::new()).expect("config");
        assert_eq!(cfg, AcceleratorConfig::default());
        assert!(cfg.allow_cpu_fallback);
        assert_eq!(cfg.memory_resource, "async");
    }

    #[test]
    fn recognized_keys_override_and_unknown_keys_are_ignored() {
        let cfg = AcceleratorConfig::from_map(&map(&[
            (DEBUG_ENABLED, "true"),
            (MEMORY_RESOURCE, "pool"),
            (MEMORY_PERCENT, "80"),
            (FUNCTION_NAME_PREFIX, "presto.default."),
            (AST_EXPRESSION_ENABLED, "TRUE"),
            (AST_EXPRESSION_PRIORITY, "7"),
            (ALLOW_CPU_FALLBACK, "false"),
            ("accelerator.no_such_key", "whatever"),
        ]))
        .expect("config");
        assert!(cfg.debug_enabled);
        assert_eq!(cfg.memory_resource, "pool");
        assert_eq!(cfg.memory_percent, 80);
        assert_eq!(cfg.function_name_prefix, "presto.default.");
        assert!(cfg.ast_expression_enabled);
        assert_eq!(cfg.ast_expression_priority, 7);
        assert!(!cfg.allow_cpu_fallback);
        assert!(cfg.log_fallback);
    }

    #[test]
    fn malformed_values_are_invalid_config() {
        let err = AcceleratorConfig::from_map(&map(&[(ENABLED, "yes")])).unwrap_err();
        assert!(matches!(err, AccelError::InvalidConfig(_)));
        let err = AcceleratorConfig::from_map(&map(&[(MEMORY_PERCENT, "150")])).unwrap_err();
        assert!(err.to_string().contains("1..=100"));
    }

    #[test]
    fn query_override_reads_enabled_key() {
        assert!(!query_enabled(&map(&[(ENABLED, "false")]), true).expect("parse"));
        assert!(query_enabled(&HashMap::new(), true).expect("parse"));
    }
}
