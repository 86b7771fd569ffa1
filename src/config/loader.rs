//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{ServerSettings, Tunables};
use crate::config::validation::{apply_overrides, parse_overrides, validate_settings, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate startup settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<ServerSettings, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let settings: ServerSettings = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_settings(&settings).map_err(ConfigError::Validation)?;

    Ok(settings)
}

/// Read the key=value file into pairs without interpreting the keys.
pub fn load_overrides(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    Ok(parse_overrides(&content))
}

/// Re-read the key=value file on top of `current`.
///
/// A missing or unreadable file yields the built-in defaults. Unknown keys
/// and bad values are logged and skipped, line by line.
pub fn reload_tunables(path: &Path, current: &Tunables) -> Tunables {
    let pairs = match load_overrides(path) {
        Ok(pairs) => pairs,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Couldn't read configuration file, using default values");
            return Tunables::default();
        }
    };

    let report = apply_overrides(current, &pairs);
    for issue in &report.rejected {
        tracing::warn!(path = %path.display(), "{}", issue);
    }
    for (key, value) in &report.changed {
        tracing::info!(key = %key, value, "Configuration value updated");
    }

    report.tunables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut current = Tunables::default();
        current.max_clients = 3;

        let reloaded = reload_tunables(&dir.path().join("absent.cfg"), &current);
        assert_eq!(reloaded, Tunables::default());
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut current = Tunables::default();
        current.backlog = 9;

        // A directory cannot be read as text.
        assert_eq!(reload_tunables(dir.path(), &current), Tunables::default());
    }

    #[test]
    fn malformed_lines_keep_other_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backlog=8").unwrap();
        writeln!(file, "name=demo").unwrap();
        writeln!(file, "max_clients=abc").unwrap();
        writeln!(file, "read_timeout_ms = = 4").unwrap();

        let mut current = Tunables::default();
        current.max_clients = 50;
        current.read_timeout_ms = 700;

        let reloaded = reload_tunables(file.path(), &current);
        assert_eq!(reloaded.backlog, 8);
        assert_eq!(reloaded.max_clients, 50);
        assert_eq!(reloaded.read_timeout_ms, 700);
    }

    #[test]
    fn applies_file_on_top_of_current() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# live tuning").unwrap();
        writeln!(file, "max_clients=12").unwrap();
        writeln!(file, "backlog=0").unwrap();

        let mut current = Tunables::default();
        current.backlog = 6;

        let reloaded = reload_tunables(file.path(), &current);
        assert_eq!(reloaded.max_clients, 12);
        assert_eq!(reloaded.backlog, 6);
    }

    #[test]
    fn settings_validation_errors_surface() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nbind_address = \"not-an-address\"").unwrap();

        match load_settings(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
