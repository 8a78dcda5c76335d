use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

/// Process-wide configuration: defaults, then `config.toml`, then `LECTERN_*` env vars.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| match Config::load() {
    Ok(cfg) => cfg,
    Err(e) => {
        eprintln!("invalid configuration, falling back to defaults: {e}");
        Config::default()
    }
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub content_api: ContentApiConfig,
    pub email: EmailConfig,
    pub downloads: DownloadsConfig,
    pub progress: ProgressConfig,
    pub playback: PlaybackConfig,
    pub auth: AuthConfig,
}

impl Config {
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("LECTERN_").split("__"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    pub public_url: Url,
    /// Key material for the private session cookie. Empty means a random key per boot.
    pub cookie_secret: String,
    /// Optional key for automation calls to the admin endpoints.
    pub admin_key: Option<String>,
    pub admin_emails: Vec<String>,
    pub insecure_cookie: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite://lectern.db".to_string(),
            loglevel: "info".to_string(),
            public_url: Url::parse("http://localhost:8000").expect("static url"),
            cookie_secret: String::new(),
            admin_key: None,
            admin_emails: Vec::new(),
            insecure_cookie: false,
        }
    }
}

impl BasicConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|e| e.trim().eq_ignore_ascii_case(email.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentApiConfig {
    pub base_url: Url,
    pub token: String,
    pub timeout_secs: u64,
}

impl Default for ContentApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://content.example.com/api/v1/").expect("static url"),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_url: Url,
    /// Without a key, sign-in links are written to the log instead of mailed.
    pub api_key: Option<String>,
    pub from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("https://api.resend.com/emails").expect("static url"),
            api_key: None,
            from: "Lectern <no-reply@localhost>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub dir: PathBuf,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./downloads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub flush_delay_ms: u64,
    pub max_retries: usize,
    pub min_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 5_000,
            max_retries: 3,
            min_retry_delay_ms: 1_000,
            max_retry_delay_ms: 8_000,
        }
    }
}

impl ProgressConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub pool_capacity: usize,
    pub ready_timeout_ms: u64,
    pub read_along_debounce_ms: u64,
    pub segment_tolerance_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 5,
            ready_timeout_ms: 10_000,
            read_along_debounce_ms: 100,
            segment_tolerance_secs: 0.1,
        }
    }
}

impl PlaybackConfig {
    /// How long a freshly loaded track may take to become playable.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub magic_link_ttl_mins: i64,
    pub session_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            magic_link_ttl_mins: 15,
            session_ttl_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_figment_round_trip() {
        let cfg: Config = Figment::from(Serialized::defaults(Config::default()))
            .extract()
            .expect("defaults extract");
        assert_eq!(cfg.basic.listen_addr, "0.0.0.0:8000");
        assert_eq!(cfg.progress.max_retries, 3);
        assert_eq!(cfg.playback.pool_capacity, 5);
    }

    #[test]
    fn admin_email_match_ignores_case_and_whitespace() {
        let basic = BasicConfig {
            admin_emails: vec!["Admin@Example.com".to_string()],
            ..BasicConfig::default()
        };
        assert!(basic.is_admin_email(" admin@example.com"));
        assert!(!basic.is_admin_email("user@example.com"));
    }
}
