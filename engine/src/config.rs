use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

pub const DEFAULT_MODEL: &str = "default";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

#[derive(Debug, Default, Deserialize)]
pub struct HearthConfig {
    pub app: Option<AppConfig>,
    pub api: Option<ApiConfig>,
    pub stream: Option<StreamConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Model selected for new sessions until the user picks another one.
    pub model: Option<String>,
    /// Where sessions and logs are kept. Defaults to `~/.hearth`.
    pub data_dir: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    /// Bearer token. `${VAR}` references are expanded.
    pub token: Option<String>,
}

// Manual Debug impl to prevent leaking the token in logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamConfig {
    /// Seconds without a chunk before a stream is failed. Default: 60.
    pub idle_timeout_secs: Option<u64>,
    /// Flush cadence of the terminal driver. Default: 16.
    pub frame_interval_ms: Option<u64>,
}

/// Settings the engine needs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_model: String,
    pub idle_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Expand `${VAR}` references from the environment. Unset variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl HearthConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Model for new sessions: `HEARTH_MODEL`, then `[app] model`.
    #[must_use]
    pub fn model(&self) -> String {
        self.model_with(|key| env::var(key).ok())
    }

    fn model_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        non_empty(lookup("HEARTH_MODEL"))
            .or_else(|| non_empty(self.app.as_ref().and_then(|a| a.model.clone())))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Backend base URL: `HEARTH_API_URL`, then `[api] base_url`.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        self.api_base_url_with(|key| env::var(key).ok())
    }

    fn api_base_url_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        non_empty(lookup("HEARTH_API_URL"))
            .or_else(|| non_empty(self.api.as_ref().and_then(|a| a.base_url.clone())))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Bearer token: `HEARTH_API_TOKEN`, then `[api] token` with `${VAR}` expansion.
    #[must_use]
    pub fn api_token(&self) -> Option<String> {
        self.api_token_with(|key| env::var(key).ok())
    }

    fn api_token_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(lookup("HEARTH_API_TOKEN")).or_else(|| {
            let raw = self.api.as_ref().and_then(|a| a.token.as_deref())?;
            non_empty(Some(expand_env_vars(raw)))
        })
    }

    /// Idle timeout: `HEARTH_STREAM_IDLE_TIMEOUT_SECS`, then `[stream] idle_timeout_secs`.
    /// Zero or unparsable values fall through to the default.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout_with(|key| env::var(key).ok())
    }

    fn idle_timeout_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Duration {
        let from_env = lookup("HEARTH_STREAM_IDLE_TIMEOUT_SECS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(secs) => Some(secs),
                Err(e) => {
                    tracing::warn!("Ignoring HEARTH_STREAM_IDLE_TIMEOUT_SECS={raw:?}: {e}");
                    None
                }
            }
        });
        let secs = from_env
            .or_else(|| self.stream.as_ref().and_then(|s| s.idle_timeout_secs))
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        let ms = self
            .stream
            .as_ref()
            .and_then(|s| s.frame_interval_ms)
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_FRAME_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    /// Data directory: `[app] data_dir` (with `${VAR}` expansion), then `~/.hearth`.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = self.app.as_ref().and_then(|a| a.data_dir.as_deref()) {
            let expanded = expand_env_vars(dir);
            if !expanded.trim().is_empty() {
                return Some(PathBuf::from(expanded));
            }
        }
        default_data_dir()
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_model: self.model(),
            idle_timeout: self.idle_timeout(),
        }
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".hearth"))
}

pub fn config_path() -> Option<PathBuf> {
    default_data_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn parse(toml: &str) -> HearthConfig {
        toml::from_str(toml).unwrap()
    }

    // expand_env_vars tests

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        assert_eq!(
            expand_env_vars("a${HEARTH_TEST_SURELY_UNSET_VAR}b"),
            "ab"
        );
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("token ${OOPS"), "token ${OOPS");
    }

    #[test]
    fn expand_env_vars_empty_var_name_preserved() {
        assert_eq!(expand_env_vars("x${}y"), "x${}y");
    }

    // HearthConfig parsing tests

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("");
        let none = env_of(&[]);
        assert_eq!(config.model_with(&none), DEFAULT_MODEL);
        assert_eq!(config.api_base_url_with(&none), DEFAULT_API_URL);
        assert_eq!(config.api_token_with(&none), None);
        assert_eq!(config.idle_timeout_with(&none), Duration::from_secs(60));
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
    }

    #[test]
    fn sections_are_read() {
        let config = parse(
            r#"
            [app]
            model = "home-llama"
            data_dir = "/var/lib/hearth"

            [api]
            base_url = "http://assistant.lan:8123"
            token = "abc"

            [stream]
            idle_timeout_secs = 90
            frame_interval_ms = 33
            "#,
        );
        let none = env_of(&[]);
        assert_eq!(config.model_with(&none), "home-llama");
        assert_eq!(config.api_base_url_with(&none), "http://assistant.lan:8123");
        assert_eq!(config.api_token_with(&none).as_deref(), Some("abc"));
        assert_eq!(config.idle_timeout_with(&none), Duration::from_secs(90));
        assert_eq!(config.frame_interval(), Duration::from_millis(33));
        assert_eq!(config.data_dir(), Some(PathBuf::from("/var/lib/hearth")));
    }

    #[test]
    fn environment_overrides_file() {
        let config = parse(
            r#"
            [app]
            model = "from-file"
            [api]
            base_url = "http://file"
            token = "file-token"
            [stream]
            idle_timeout_secs = 90
            "#,
        );
        let env = env_of(&[
            ("HEARTH_MODEL", "from-env"),
            ("HEARTH_API_URL", "http://env"),
            ("HEARTH_API_TOKEN", "env-token"),
            ("HEARTH_STREAM_IDLE_TIMEOUT_SECS", "5"),
        ]);
        assert_eq!(config.model_with(&env), "from-env");
        assert_eq!(config.api_base_url_with(&env), "http://env");
        assert_eq!(config.api_token_with(&env).as_deref(), Some("env-token"));
        assert_eq!(config.idle_timeout_with(&env), Duration::from_secs(5));
    }

    #[test]
    fn bad_timeout_override_falls_back() {
        let config = parse("[stream]\nidle_timeout_secs = 0\n");
        let env = env_of(&[("HEARTH_STREAM_IDLE_TIMEOUT_SECS", "soon")]);
        assert_eq!(config.idle_timeout_with(&env), Duration::from_secs(60));
    }

    #[test]
    fn api_debug_redacts_token() {
        let config = parse("[api]\ntoken = \"hunter2\"\n");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[app\nmodel = 1").unwrap();
        let err = HearthConfig::load_from(path.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn load_from_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = HearthConfig::load_from(path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
