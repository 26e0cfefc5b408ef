//! Session configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum number of free stack slots Lua guarantees to a C function.
pub const DEFAULT_STACK_RESERVE: i32 = mlua_sys::LUA_MINSTACK;

/// How a [`Vm`](crate::Vm) session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Load the standard libraries (default: true)
    pub std_libs: bool,
    /// Stack slots reserved when the session opens
    pub stack_reserve: i32,
    /// Search template prepended to `package.path`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            std_libs: true,
            stack_reserve: DEFAULT_STACK_RESERVE,
            package_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl SessionConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<toml>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<json>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. `.json` files are read as JSON, everything else
    /// as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str::<SessionConfig>(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str::<SessionConfig>(&content).map_err(|e| e.to_string())
        };
        let config = parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_reserve <= 0 {
            return Err(ConfigError::Invalid(format!(
                "stack_reserve must be positive, got {}",
                self.stack_reserve
            )));
        }
        if self.package_path.is_some() && !self.std_libs {
            return Err(ConfigError::Invalid(
                "package_path requires std_libs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.std_libs);
        assert_eq!(config.stack_reserve, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial() {
        let config = SessionConfig::from_toml_str("std_libs = false\n").unwrap();
        assert!(!config.std_libs);
        assert_eq!(config.stack_reserve, DEFAULT_STACK_RESERVE);
    }

    #[test]
    fn test_json() {
        let config =
            SessionConfig::from_json_str(r#"{"stack_reserve": 64, "package_path": "./?.lua"}"#)
                .unwrap();
        assert_eq!(config.stack_reserve, 64);
        assert_eq!(config.package_path.as_deref(), Some("./?.lua"));
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            SessionConfig::from_toml_str("stack_reserve = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("std_libs = false\npackage_path = \"x\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("unknown = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "stack_reserve = 40\n").unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap().stack_reserve, 40);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            SessionConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
