//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic checks on [`ServerSettings`] before startup
//! - Per-key rules for the reloadable key=value file
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - A bad key never aborts a reload: it is reported and the previous value stays

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ServerSettings, Tunables};

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Bind address does not parse as `ip:port`.
    BindAddress(String),
    /// Kernel object ids must be non-zero.
    ZeroIpcId(&'static str),
    /// Key not known to [`Tunables`].
    UnknownKey(String),
    /// Value is not a positive integer that fits.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BindAddress(addr) => write!(f, "invalid bind address {:?}", addr),
            ValidationError::ZeroIpcId(field) => write!(f, "ipc.{} must be non-zero", field),
            ValidationError::UnknownKey(key) => write!(f, "unknown key {:?}", key),
            ValidationError::InvalidValue { key, value } => {
                write!(f, "invalid value {} for key {:?}, old value kept", value, key)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check startup settings.
pub fn validate_settings(settings: &ServerSettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(settings.listener.bind_address.clone()));
    }
    if settings.ipc.shm_id == 0 {
        errors.push(ValidationError::ZeroIpcId("shm_id"));
    }
    if settings.ipc.sem_id == 0 {
        errors.push(ValidationError::ZeroIpcId("sem_id"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Outcome of applying key=value pairs on top of the current tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub tunables: Tunables,
    /// Keys whose value actually changed, with the new value.
    pub changed: Vec<(String, i32)>,
    pub rejected: Vec<ValidationError>,
}

/// Split key=value text into trimmed pairs, in file order.
///
/// Lines without `=` and lines starting with `#` are skipped. The value is
/// everything after the first `=`.
pub fn parse_overrides(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Apply `pairs` to `current`, one key at a time. A later pair for the same
/// key overrides an earlier one.
pub fn apply_overrides(current: &Tunables, pairs: &[(String, String)]) -> ReloadReport {
    let mut tunables = *current;
    let mut rejected = Vec::new();

    for (key, value) in pairs {
        let Some(old) = tunables.get(key) else {
            rejected.push(ValidationError::UnknownKey(key.clone()));
            continue;
        };

        let new = match value.parse::<i32>() {
            Ok(v) if v > 0 => v,
            _ => {
                rejected.push(ValidationError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                });
                continue;
            }
        };

        if new != old {
            tunables.set(key, new);
        }
    }

    let changed = Tunables::KEYS
        .iter()
        .filter_map(|key| {
            let new = tunables.get(key)?;
            (current.get(key) != Some(new)).then(|| (key.to_string(), new))
        })
        .collect();

    ReloadReport {
        tunables,
        changed,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> Vec<(String, String)> {
        parse_overrides(text)
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(validate_settings(&ServerSettings::default()).is_ok());
    }

    #[test]
    fn collects_every_settings_error() {
        let mut settings = ServerSettings::default();
        settings.listener.bind_address = "nowhere".into();
        settings.ipc.shm_id = 0;
        settings.ipc.sem_id = 0;

        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn changes_only_what_differs() {
        let current = Tunables::default();
        let report = apply_overrides(&current, &table("max_clients = 5\nbacklog = 2\n"));

        assert_eq!(report.tunables.max_clients, 5);
        assert_eq!(report.changed, vec![("max_clients".to_string(), 5)]);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn rejects_non_positive_and_keeps_previous() {
        let mut current = Tunables::default();
        current.backlog = 8;
        let report = apply_overrides(&current, &table("backlog = 0\nmax_clients = -3\nread_timeout_ms = fast\n"));

        assert_eq!(report.tunables, current);
        assert_eq!(report.rejected.len(), 3);
        assert!(report.changed.is_empty());
    }

    #[test]
    fn unknown_keys_reported_and_ignored() {
        let report = apply_overrides(&Tunables::default(), &table("sensor_period = 100\n"));
        assert_eq!(report.tunables, Tunables::default());
        assert_eq!(report.rejected, vec![ValidationError::UnknownKey("sensor_period".into())]);
    }

    #[test]
    fn out_of_range_rejected() {
        let report = apply_overrides(&Tunables::default(), &table("max_clients = 9999999999\n"));
        assert!(matches!(report.rejected[0], ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn parses_lines_loosely() {
        let pairs = parse_overrides("# comment\n  backlog = 4 \nno separator here\n\nname=a=b\n");
        assert_eq!(
            pairs,
            vec![
                ("backlog".to_string(), "4".to_string()),
                ("name".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn bad_line_only_affects_its_own_key() {
        let mut current = Tunables::default();
        current.max_clients = 50;
        let report = apply_overrides(&current, &table("backlog=8\nname=demo\nmax_clients=abc\n"));

        assert_eq!(report.tunables.backlog, 8);
        assert_eq!(report.tunables.max_clients, 50);
        assert_eq!(report.changed, vec![("backlog".to_string(), 8)]);
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn repeated_key_last_wins() {
        let report = apply_overrides(&Tunables::default(), &table("backlog=5\nbacklog=7\n"));
        assert_eq!(report.tunables.backlog, 7);
        assert_eq!(report.changed, vec![("backlog".to_string(), 7)]);
    }
}
