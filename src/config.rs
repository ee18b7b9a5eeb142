use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "fall-audit";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Files expected inside the AI Brain folder.
pub const LLAMAFILE_EXECUTABLE: &str = "llamafile-0.9.0.exe";
pub const MODEL_WEIGHTS: &str = "Qwen2.5-7B-Instruct-Q4_K_M.gguf";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "fall_audit=info"
}

/// Per-user configuration directory (`~/.config/fall-audit` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default location of the persisted brain configuration.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("AI Brain folder {dir} is missing {file}")]
    MissingBrainFile { dir: String, file: String },

    #[error("AI Brain folder is not configured")]
    NotConfigured,
}

/// Persisted discovery result: where the AI Brain folder lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_brain_path: Option<PathBuf>,
}

/// Load the config file, or an empty config when it does not exist yet.
pub fn load_brain_config(path: &Path) -> Result<BrainConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BrainConfig::default()),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn save_brain_config(path: &Path, config: &BrainConfig) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: std::io::Error::other(e),
    })?;
    std::fs::write(path, json).map_err(write_err)?;

    tracing::debug!(path = %path.display(), "Brain config saved");
    Ok(())
}

/// Absolute paths of the inference executable and model weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencePaths {
    pub executable: PathBuf,
    pub model: PathBuf,
}

impl InferencePaths {
    /// Resolve and validate the fixed file names inside a brain folder.
    pub fn from_brain_dir(dir: &Path) -> Result<Self, ConfigError> {
        let executable = dir.join(LLAMAFILE_EXECUTABLE);
        let model = dir.join(MODEL_WEIGHTS);

        for (path, file) in [(&executable, LLAMAFILE_EXECUTABLE), (&model, MODEL_WEIGHTS)] {
            if !path.is_file() {
                return Err(ConfigError::MissingBrainFile {
                    dir: dir.display().to_string(),
                    file: file.to_string(),
                });
            }
        }

        Ok(Self { executable, model })
    }

    /// Resolve from a persisted config.
    pub fn from_config(config: &BrainConfig) -> Result<Self, ConfigError> {
        let dir = config
            .ai_brain_path
            .as_deref()
            .ok_or(ConfigError::NotConfigured)?;
        Self::from_brain_dir(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brain_dir() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(LLAMAFILE_EXECUTABLE), b"").unwrap();
        std::fs::write(tmp.path().join(MODEL_WEIGHTS), b"").unwrap();
        tmp
    }

    #[test]
    fn config_dir_is_named_after_app() {
        if let Some(dir) = config_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }

    #[test]
    fn missing_config_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_brain_config(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, BrainConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let config = BrainConfig {
            ai_brain_path: Some(PathBuf::from("/opt/ai-brain")),
        };

        save_brain_config(&path, &config).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"ai_brain_path\""));
        assert_eq!(load_brain_config(&path).unwrap(), config);
    }

    #[test]
    fn corrupt_config_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(load_brain_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn brain_dir_resolves_both_files() {
        let dir = brain_dir();
        let paths = InferencePaths::from_brain_dir(dir.path()).unwrap();
        assert!(paths.executable.ends_with(LLAMAFILE_EXECUTABLE));
        assert!(paths.model.ends_with(MODEL_WEIGHTS));
    }

    #[test]
    fn brain_dir_without_model_is_rejected() {
        let dir = brain_dir();
        std::fs::remove_file(dir.path().join(MODEL_WEIGHTS)).unwrap();

        match InferencePaths::from_brain_dir(dir.path()) {
            Err(ConfigError::MissingBrainFile { file, .. }) => assert_eq!(file, MODEL_WEIGHTS),
            other => panic!("expected MissingBrainFile, got {other:?}"),
        }
    }

    #[test]
    fn unconfigured_brain_is_reported() {
        assert!(matches!(
            InferencePaths::from_config(&BrainConfig::default()),
            Err(ConfigError::NotConfigured)
        ));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.6.0");
    }
}
