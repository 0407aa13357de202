//! Configuration Vault – reads/writes `~/.carewatch/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use carewatch_types::{Backend, LiveBackend, SimulatedBackend};

/// Marker used by unconfigured deployments.
const PLACEHOLDER: &str = "PLACEHOLDER";

/// Persisted user configuration stored in `~/.carewatch/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Web API key of the hosted project.  A placeholder selects simulated
    /// mode.
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Realtime database root URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base URL of the identity REST API.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Interval between simulated readings, in milliseconds.
    #[serde(default = "default_sim_period_ms")]
    pub sim_period_ms: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "api_key",
                if is_placeholder(&self.api_key) { &"<not set>" } else { &"<redacted>" },
            )
            .field("database_url", &self.database_url)
            .field("auth_url", &self.auth_url)
            .field("sim_period_ms", &self.sim_period_ms)
            .finish()
    }
}

fn default_api_key() -> String {
    "PLACEHOLDER_API_KEY".to_string()
}
fn default_database_url() -> String {
    "https://PLACEHOLDER-DATABASE.firebaseio.com".to_string()
}
fn default_auth_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}
fn default_sim_period_ms() -> u64 {
    2_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            database_url: default_database_url(),
            auth_url: default_auth_url(),
            sim_period_ms: default_sim_period_ms(),
        }
    }
}

/// `true` for empty values and unfilled template values.
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.to_ascii_uppercase().contains(PLACEHOLDER)
}

impl Config {
    /// Resolve the data backend.
    ///
    /// Live only when both the API key and the database URL are real values;
    /// anything else runs the simulator.
    pub fn backend(&self) -> Backend {
        if is_placeholder(&self.api_key) || is_placeholder(&self.database_url) {
            let period_ms = if self.sim_period_ms == 0 {
                default_sim_period_ms()
            } else {
                self.sim_period_ms
            };
            return Backend::Simulated(SimulatedBackend {
                period: Duration::from_millis(period_ms),
            });
        }
        Backend::Live(LiveBackend {
            api_key: self.api_key.trim().to_string(),
            database_url: self.database_url.trim().to_string(),
            auth_url: self.auth_url.trim().to_string(),
        })
    }
}

/// Return the path to `~/.carewatch/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".carewatch").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CAREWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CAREWATCH_API_KEY` | `api_key` |
/// | `CAREWATCH_DATABASE_URL` | `database_url` |
/// | `CAREWATCH_AUTH_URL` | `auth_url` |
/// | `CAREWATCH_SIM_PERIOD_MS` | `sim_period_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CAREWATCH_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("CAREWATCH_DATABASE_URL") {
        cfg.database_url = v;
    }
    if let Ok(v) = std::env::var("CAREWATCH_AUTH_URL") {
        cfg.auth_url = v;
    }
    if let Ok(v) = std::env::var("CAREWATCH_SIM_PERIOD_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.sim_period_ms = ms;
    }
}

/// Settle on the configuration to run with, given one [`load`] result.
///
/// `first_run` is asked only when no config file exists.  A file that could
/// not be read falls back to the defaults.  Environment overrides apply on
/// every path.
pub fn resolve(
    loaded: Result<Option<Config>, String>,
    first_run: impl FnOnce() -> Config,
) -> Config {
    let mut cfg = match loaded {
        // Overrides were applied while loading.
        Ok(Some(cfg)) => return cfg,
        Ok(None) => first_run(),
        Err(_) => Config::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Save the config to disk, creating `~/.carewatch/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------); the file holds an API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_types::SourceKind;

    fn live_config() -> Config {
        Config {
            api_key: "AIzaSy-real-key".to_string(),
            database_url: "https://care-home.firebaseio.com".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn default_config_runs_simulated() {
        let backend = Config::default().backend();
        assert_eq!(
            backend,
            Backend::Simulated(SimulatedBackend {
                period: Duration::from_secs(2)
            })
        );
    }

    #[test]
    fn placeholder_in_either_field_selects_simulated() {
        let mut cfg = live_config();
        assert_eq!(cfg.backend().kind(), SourceKind::Live);

        cfg.database_url = "https://PLACEHOLDER-DATABASE.firebaseio.com".to_string();
        assert_eq!(cfg.backend().kind(), SourceKind::Simulated);

        let mut cfg = live_config();
        cfg.api_key = "   ".to_string();
        assert_eq!(cfg.backend().kind(), SourceKind::Simulated);
    }

    #[test]
    fn live_backend_carries_trimmed_settings() {
        let mut cfg = live_config();
        cfg.api_key = " AIzaSy-real-key \n".to_string();
        let Backend::Live(live) = cfg.backend() else {
            panic!("expected live backend");
        };
        assert_eq!(live.api_key, "AIzaSy-real-key");
        assert_eq!(live.auth_url, "https://identitytoolkit.googleapis.com/v1");
    }

    #[test]
    fn zero_sim_period_falls_back_to_default() {
        let cfg = Config {
            sim_period_ms: 0,
            ..Config::default()
        };
        let Backend::Simulated(sim) = cfg.backend() else {
            panic!("expected simulated backend");
        };
        assert_eq!(sim.period, Duration::from_millis(2_000));
    }

    #[test]
    fn config_debug_redacts_api_key() {
        let debug_str = format!("{:?}", live_config());
        assert!(!debug_str.contains("AIzaSy-real-key"), "api key must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            sim_period_ms: 500,
            ..live_config()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.database_url, "https://care-home.firebaseio.com");
        assert_eq!(loaded.sim_period_ms, 500);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("sim_period_ms = 750\n").expect("parse");
        assert_eq!(cfg.sim_period_ms, 750);
        assert!(is_placeholder(&cfg.api_key));
        assert_eq!(cfg.auth_url, default_auth_url());
    }

    #[test]
    fn resolve_uses_the_loaded_file_without_asking() {
        let cfg = resolve(Ok(Some(live_config())), || panic!("wizard must not run"));
        assert_eq!(cfg.database_url, "https://care-home.firebaseio.com");
    }

    #[test]
    fn resolve_asks_once_when_no_file_exists() {
        let mut asked = 0;
        let cfg = resolve(Ok(None), || {
            asked += 1;
            Config {
                sim_period_ms: 900,
                ..Config::default()
            }
        });
        assert_eq!(asked, 1);
        assert_eq!(cfg.sim_period_ms, 900);
    }

    #[test]
    fn resolve_falls_back_to_defaults_on_a_broken_file() {
        let cfg = resolve(Err("Failed to parse config".to_string()), || {
            panic!("wizard must not run")
        });
        assert!(is_placeholder(&cfg.api_key));
    }

    #[test]
    fn config_path_points_to_carewatch_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".carewatch"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: only this test touches these CAREWATCH_* variables, and the
        // period value is invalid so concurrent loads are unaffected by it.
        unsafe {
            std::env::set_var("CAREWATCH_AUTH_URL", "http://localhost:9099/v1");
            std::env::set_var("CAREWATCH_SIM_PERIOD_MS", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.auth_url, "http://localhost:9099/v1");
        assert_eq!(cfg.sim_period_ms, 2_000);

        unsafe {
            std::env::remove_var("CAREWATCH_AUTH_URL");
            std::env::remove_var("CAREWATCH_SIM_PERIOD_MS");
        }
    }
}
