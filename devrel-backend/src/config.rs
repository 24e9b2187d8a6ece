use std::env;
use std::path::PathBuf;

/// Default upload limit (5 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub encryption_key: [u8; 32],
    pub plugins_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_ttl_hours: i64,
    pub public_base_url: String,
    pub shortlink_rate_limit: u32,
    pub shortlink_rate_window_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("encryption_key", &"<redacted>")
            .field("plugins_dir", &self.plugins_dir)
            .field("uploads_dir", &self.uploads_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl Config {
    /// Read and validate configuration from the environment.
    ///
    /// Every problem is collected so a misconfigured deployment reports all of
    /// them at once instead of failing on the first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let port = parse_or(&lookup, "PORT", 8080u16, &mut problems);

        let encryption_key = match lookup("ENCRYPTION_KEY") {
            Some(raw) => match parse_key(&raw) {
                Some(key) => key,
                None => {
                    problems.push("ENCRYPTION_KEY must be 64 hex characters (32 bytes)".to_string());
                    [0u8; 32]
                }
            },
            None => {
                problems.push("ENCRYPTION_KEY must be set".to_string());
                [0u8; 32]
            }
        };

        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES, &mut problems);
        if max_upload_bytes == 0 {
            problems.push("MAX_UPLOAD_BYTES must be greater than zero".to_string());
        }

        let session_ttl_hours = parse_or(&lookup, "SESSION_TTL_HOURS", 168i64, &mut problems);
        if session_ttl_hours <= 0 {
            problems.push("SESSION_TTL_HOURS must be positive".to_string());
        }

        let shortlink_rate_limit = parse_or(&lookup, "SHORTLINK_RATE_LIMIT", 60u32, &mut problems);
        let shortlink_rate_window_secs = parse_or(&lookup, "SHORTLINK_RATE_WINDOW_SECS", 60u64, &mut problems);
        if shortlink_rate_limit == 0 || shortlink_rate_window_secs == 0 {
            problems.push("shortlink rate limit and window must be greater than zero".to_string());
        }

        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        if url::Url::parse(&public_base_url).is_err() {
            problems.push("PUBLIC_BASE_URL must be an absolute URL".to_string());
        }

        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }

        Ok(Self {
            port,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "./.db/devrel.db".to_string()),
            encryption_key,
            plugins_dir: PathBuf::from(lookup("PLUGINS_DIR").unwrap_or_else(|| "./plugins".to_string())),
            uploads_dir: PathBuf::from(lookup("UPLOADS_DIR").unwrap_or_else(|| "./uploads".to_string())),
            max_upload_bytes,
            session_ttl_hours,
            public_base_url,
            shortlink_rate_limit,
            shortlink_rate_window_secs,
        })
    }

    #[cfg(test)]
    pub fn for_tests(plugins_dir: PathBuf, uploads_dir: PathBuf) -> Self {
        Self {
            port: 8080,
            database_url: ":memory:".to_string(),
            encryption_key: [7u8; 32],
            plugins_dir,
            uploads_dir,
            max_upload_bytes: 1024,
            session_ttl_hours: 24,
            public_base_url: "http://localhost:8080".to_string(),
            shortlink_rate_limit: 3,
            shortlink_rate_window_secs: 60,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    problems: &mut Vec<String>,
) -> T {
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            problems.push(format!("{} must be a valid number", name));
            default
        }),
        None => default,
    }
}

fn parse_key(raw: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).ok()?;
    bytes.try_into().ok()
}
