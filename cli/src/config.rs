use std::path::PathBuf;
use std::time::Duration;

pub const SERVICE_NAME: &str = "multidb";

pub const API_URL_ENV: &str = "MULTIDB_API_URL"; // Runtime override
pub const CONFIG_OVERRIDE_ENV: &str = "MULTIDB_CONFIG_DIR";
pub const CREDENTIAL_BACKEND_ENV: &str = "MULTIDB_CREDENTIAL_BACKEND";

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const USER_AGENT: &str = "MultiDbCLI/0.3";

pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the API base URL at runtime, without a trailing slash.
///
/// Read on every call so integration tests can point the binary at a mock server.
pub fn api_url() -> String {
    std::env::var(API_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Where the persistent credential store keeps its token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CredentialBackend {
    File,
    Keyring,
}

impl CredentialBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" => Some(Self::Keyring),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_url: String,
    /// `None` means the platform config directory.
    pub config_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub credential_backend: CredentialBackend,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let credential_backend = match std::env::var(CREDENTIAL_BACKEND_ENV) {
            Ok(raw) => CredentialBackend::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    "unknown {} value {:?}, falling back to file storage",
                    CREDENTIAL_BACKEND_ENV,
                    raw
                );
                CredentialBackend::File
            }),
            Err(_) => CredentialBackend::File,
        };

        Self {
            api_url: api_url(),
            config_dir: std::env::var(CONFIG_OVERRIDE_ENV).ok().map(PathBuf::from),
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            credential_backend,
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            config_dir: None,
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            credential_backend: CredentialBackend::File,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn api_url_env_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        std::env::remove_var(API_URL_ENV);
        assert_eq!(api_url(), DEFAULT_API_URL);

        std::env::set_var(API_URL_ENV, "http://127.0.0.1:9999/api/");
        assert_eq!(api_url(), "http://127.0.0.1:9999/api");

        std::env::set_var(API_URL_ENV, "   ");
        assert_eq!(api_url(), DEFAULT_API_URL);
        std::env::remove_var(API_URL_ENV);
    }

    #[test]
    fn unknown_backend_falls_back_to_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        std::env::set_var(CREDENTIAL_BACKEND_ENV, "vault");
        assert_eq!(ClientConfig::from_env().credential_backend, CredentialBackend::File);

        std::env::set_var(CREDENTIAL_BACKEND_ENV, "keyring");
        assert_eq!(ClientConfig::from_env().credential_backend, CredentialBackend::Keyring);
        std::env::remove_var(CREDENTIAL_BACKEND_ENV);
    }

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!(CredentialBackend::parse("FILE"), Some(CredentialBackend::File));
        assert_eq!(CredentialBackend::parse(" keyring "), Some(CredentialBackend::Keyring));
        assert_eq!(CredentialBackend::parse("vault"), None);
    }

    #[test]
    fn with_api_url_strips_trailing_slash() {
        let cfg = ClientConfig::default().with_api_url("http://example.test/api/");
        assert_eq!(cfg.api_url, "http://example.test/api");
        assert_eq!(cfg.timeout, Duration::from_secs(30));
    }
}
