//! Simulation settings
//!
//! Loaded from JSON; every field has a default so an empty object (or no
//! config at all) gives the stock behavior.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Upper bound on combinational evaluation passes per settle.
    pub max_settle_passes: usize,
    /// Clock edges with `reset` held high during `Simulator::reset`.
    pub reset_cycles: u32,
    /// Treat undriven child input ports as an elaboration error.
    pub strict_undriven: bool,
    /// Emit the line trace at info level before every clock edge.
    pub line_trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_settle_passes: 10,
            reset_cycles: 2,
            strict_undriven: false,
            line_trace: false,
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg = SimConfig::from_json("{}").unwrap();
        assert_eq!(cfg.max_settle_passes, 10);
        assert_eq!(cfg.reset_cycles, 2);
        assert!(!cfg.strict_undriven);
        assert!(!cfg.line_trace);
    }

    #[test]
    fn test_partial_override() {
        let cfg = SimConfig::from_json(r#"{"reset_cycles": 1, "line_trace": true}"#).unwrap();
        assert_eq!(cfg.reset_cycles, 1);
        assert!(cfg.line_trace);
        assert_eq!(cfg.max_settle_passes, 10);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("rtl_interpreter_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"max_settle_passes": 3, "strict_undriven": true}"#).unwrap();
        let cfg = SimConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();
        let cfg = cfg.unwrap();
        assert_eq!(cfg.max_settle_passes, 3);
        assert!(cfg.strict_undriven);
        assert_eq!(cfg.reset_cycles, 2);

        assert!(matches!(SimConfig::from_file(&path), Err(SimError::Io(_))));
    }

    #[test]
    fn test_malformed() {
        assert!(SimConfig::from_json(r#"{"reset_cycles": "two"}"#).is_err());
    }
}
