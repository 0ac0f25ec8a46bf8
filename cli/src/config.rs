//! Settings file loading.
//!
//! The file is TOML with the same keys as [`ServerSettings`]; anything left
//! out keeps its default.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use rgbds_lsp::ServerSettings;

/// Overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "RGBDS_LSP_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// `$RGBDS_LSP_CONFIG`, else `<config dir>/rgbds-lsp/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    match env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::config_dir().map(|dir| dir.join("rgbds-lsp").join("config.toml")),
    }
}

/// `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<ServerSettings>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Settings for this run. Problems with the file are logged and fall back to
/// defaults; they never stop the server.
pub fn load_settings() -> ServerSettings {
    let Some(path) = config_path() else {
        tracing::debug!("No config directory, using default settings");
        return ServerSettings::default();
    };

    match load_from(&path) {
        Ok(Some(settings)) => {
            tracing::info!(path = %path.display(), "Loaded config");
            settings
        }
        Ok(None) => {
            tracing::debug!(path = %path.display(), "No config file, using default settings");
            ServerSettings::default()
        }
        Err(err) => {
            tracing::warn!(path = %err.path().display(), "{err}; using default settings");
            ServerSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbds_lsp::CommandSpec;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let (_dir, path) = write_config("");
        assert_eq!(load_from(&path).unwrap(), Some(ServerSettings::default()));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config(
            r#"
debounce_ms = 250
build_descriptor = "build.mk"

[assembler]
command = "/opt/rgbds/rgbasm"
args = ["-Wall", "-i", "include/"]
"#,
        );
        let settings = load_from(&path).unwrap().unwrap();
        assert_eq!(settings.debounce_ms, 250);
        assert_eq!(settings.build_descriptor, "build.mk");
        assert_eq!(
            settings.assembler,
            CommandSpec::new("/opt/rgbds/rgbasm", ["-Wall", "-i", "include/"])
        );
        assert_eq!(settings.timeout_secs, ServerSettings::default().timeout_secs);
        assert_eq!(settings.project_build, ServerSettings::default().project_build);
    }

    #[test]
    fn test_project_build_steps() {
        let (_dir, path) = write_config(
            r#"
[[project_build]]
command = "make"
args = ["-s", "check"]

[[project_build]]
command = "./tools/verify.sh"
"#,
        );
        let settings = load_from(&path).unwrap().unwrap();
        assert_eq!(
            settings.project_build,
            vec![
                CommandSpec::new("make", ["-s", "check"]),
                CommandSpec::new("./tools/verify.sh", Vec::<String>::new()),
            ]
        );
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let (_dir, path) = write_config("debounce_ms = [");
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path.as_path());
        assert!(err.to_string().starts_with("failed to parse config at"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let (_dir, path) = write_config("debounce_ms = \"soon\"");
        assert!(matches!(
            load_from(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
