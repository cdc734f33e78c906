//! Settings are built in layers: compiled defaults, then the user's file, then
//! `PARLEY_*` environment variables. The result is validated before use.
//!
//! The file only names the keys it changes. Nested sections fall back to their
//! defaults key by key, arrays and maps replace the default wholesale, and an
//! explicit `null` counts as absent.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ParleySettings, POLL_INTERVAL_RANGE_MS};

/// `$HOME/.parley/settings.json`, or under the temp dir when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".parley")
        .join("settings.json")
}

/// Layer `path` and the process environment over the defaults, then validate.
///
/// A missing file is not an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = match read_user_layer(path)? {
        Some(layer) => serde_json::from_value(layer).map_err(|source| SettingsError::Malformed {
            path: path.to_path_buf(),
            source,
        })?,
        None => ParleySettings::default(),
    };
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// The file's JSON with nulls removed, or `None` if there is nothing to layer.
fn read_user_layer(path: &Path) -> Result<Option<Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(None);
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut layer: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    drop_nulls(&mut layer);
    if layer.is_null() {
        return Ok(None);
    }
    debug!(path = %path.display(), "settings file loaded");
    Ok(Some(layer))
}

/// Strip `null` members at every depth so serde fills them from defaults.
fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

/// Apply `PARLEY_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides<F>(settings: &mut ParleySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("PARLEY_API_URL") {
        settings.backend.api_url = v;
    }
    if let Some(v) = env.string("PARLEY_WS_URL") {
        settings.backend.ws_url = v;
    }
    let (min, max) = POLL_INTERVAL_RANGE_MS;
    if let Some(v) = env.u64_in("PARLEY_POLL_INTERVAL_MS", min, max) {
        settings.roster.poll_interval_ms = v;
    }
    if let Some(v) = env.u64_in("PARLEY_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.backend.request_timeout_ms = v;
    }
    if let Some(v) = env.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_settings(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("settings.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn nested_keys_fall_back_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"backend": {"requestTimeoutMs": 2000}}"#);
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.backend.request_timeout_ms, 2000);
        assert_eq!(settings.backend.connect_timeout_ms, 5_000);
        assert_eq!(settings.backend.api_url, "http://localhost:8000");
    }

    #[test]
    fn null_values_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"logging": {"level": null, "json": true}, "roster": null}"#);
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.logging.level, "info");
        assert!(settings.logging.json);
        assert_eq!(settings.roster.poll_interval_ms, 5_000);
    }

    #[test]
    fn module_levels_replace_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"logging": {"modules": {"parley_net": "debug"}}}"#);
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.logging.modules.len(), 1);
        assert_eq!(settings.logging.modules["parley_net"], "debug");
    }

    #[test]
    fn wrong_type_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"roster": {"pollIntervalMs": "fast"}}"#);
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Malformed { .. }), "got: {err}");
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from_path(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }), "got: {err}");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.backend.ws_url, "ws://localhost:8000/ws");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"backend": {{"apiUrl": "http://chat.internal:9000"}}, "roster": {{"pollIntervalMs": 2500}}}}"#
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.backend.api_url, "http://chat.internal:9000");
        assert_eq!(settings.backend.ws_url, "ws://localhost:8000/ws");
        assert_eq!(settings.roster.poll_interval_ms, 2500);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "{not json");
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Malformed { .. }), "got: {err}");
    }

    #[test]
    fn out_of_range_file_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"roster": {"pollIntervalMs": 1}}"#);
        let err = load_settings_from_path(&path).unwrap_err();
        assert_eq!(err.field(), Some("roster.pollIntervalMs"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = ParleySettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("PARLEY_API_URL", "http://10.0.0.2:8000"),
                ("PARLEY_POLL_INTERVAL_MS", "750"),
                ("PARLEY_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.backend.api_url, "http://10.0.0.2:8000");
        assert_eq!(settings.roster.poll_interval_ms, 750);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = ParleySettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("PARLEY_POLL_INTERVAL_MS", "5"),
                ("PARLEY_LOG_JSON", "maybe"),
                ("PARLEY_WS_URL", ""),
            ]),
        );
        assert_eq!(settings.roster.poll_interval_ms, 5_000);
        assert!(!settings.logging.json);
        assert_eq!(settings.backend.ws_url, "ws://localhost:8000/ws");
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("100", 100, 200), Some(100));
        assert_eq!(parse_u64_range("200", 100, 200), Some(200));
        assert_eq!(parse_u64_range("201", 100, 200), None);
        assert_eq!(parse_u64_range("-1", 100, 200), None);
    }
}
