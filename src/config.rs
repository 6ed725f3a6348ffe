use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from `STAYBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
    pub status_refresh: Duration,
    pub metrics_port: Option<u16>,
    /// Fallback recipient for "booking received" notifications.
    pub admin_email: Option<String>,
    /// Shared secret required on admin requests. Unset disables the check.
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7420,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            status_refresh: Duration::from_secs(60),
            metrics_port: None,
            admin_email: None,
            admin_token: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparseable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: non_empty(&lookup, "STAYBOOK_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "STAYBOOK_PORT").unwrap_or(d.port),
            data_dir: non_empty(&lookup, "STAYBOOK_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            max_connections: parsed::<usize>(&lookup, "STAYBOOK_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "STAYBOOK_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            status_refresh: parsed::<u64>(&lookup, "STAYBOOK_STATUS_REFRESH_SECS")
                .filter(|s| *s > 0)
                .map_or(d.status_refresh, Duration::from_secs),
            metrics_port: parsed(&lookup, "STAYBOOK_METRICS_PORT"),
            admin_email: non_empty(&lookup, "STAYBOOK_ADMIN_EMAIL"),
            admin_token: non_empty(&lookup, "STAYBOOK_ADMIN_TOKEN"),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("staybook.journal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
