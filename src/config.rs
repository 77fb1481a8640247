use crate::client::{RetryPolicy, DEFAULT_TIMEOUT_SECS};
use crate::discovery::discover_base_url;
use crate::errors::NpmError;
use crate::models::default_true;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONTAINER_NAME: &str = "nginx-proxy-manager";

/// Model for the npm-cli configuration file
///
/// ```json
/// {
///   "api_url": "http://192.168.1.100:81",
///   "username": "admin@example.com",
///   "password": "secret"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NpmConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub use_docker_discovery: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_container_name() -> String {
    DEFAULT_CONTAINER_NAME.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retries() -> u32 {
    RetryPolicy::default().max_attempts
}

impl Default for NpmConfig {
    fn default() -> Self {
        NpmConfig {
            api_url: None,
            container_name: default_container_name(),
            username: None,
            password: None,
            use_docker_discovery: true,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

/// Values given on the command line or through the environment. They win over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub container_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_docker_discovery: Option<bool>,
}

impl NpmConfig {
    /// `~/.npm-cli/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".npm-cli").join("config.json"))
    }

    /// Reads a configuration from a JSON file. A missing file yields the defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the JSON config file
    pub fn from_file(path: &Path) -> Result<Self, NpmError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(NpmConfig::default());
            }
            Err(e) => {
                return Err(NpmError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| NpmError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(api_url) = overrides.api_url {
            self.api_url = Some(api_url);
        }
        if let Some(container_name) = overrides.container_name {
            self.container_name = container_name;
        }
        if let Some(username) = overrides.username {
            self.username = Some(username);
        }
        if let Some(password) = overrides.password {
            self.password = Some(password);
        }
        if let Some(use_docker_discovery) = overrides.use_docker_discovery {
            self.use_docker_discovery = use_docker_discovery;
        }
    }

    pub fn validate(&self) -> Result<(), NpmError> {
        if let Some(api_url) = &self.api_url {
            validate_api_url(api_url)?;
        }
        if self.timeout_secs == 0 {
            return Err(NpmError::Config("timeout_secs must be at least 1".to_string()));
        }
        if self.retries == 0 {
            return Err(NpmError::Config("retries must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Username and password, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username, password)),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries,
            ..RetryPolicy::default()
        }
    }

    /// A copy that is safe to print.
    pub fn redacted(&self) -> Self {
        NpmConfig {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

/// Checks that `raw` is an absolute http(s) URL and returns it without a trailing slash.
pub fn validate_api_url(raw: &str) -> Result<String, NpmError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| NpmError::Config(format!("api_url {:?} is not a valid URL: {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(NpmError::Config(format!(
            "api_url must use http or https, got {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(NpmError::Config(format!("api_url {:?} has no host", raw)));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Determines the admin API URL: explicit configuration first, then Docker discovery.
pub async fn resolve_base_url(config: &NpmConfig) -> Result<String, NpmError> {
    if let Some(api_url) = &config.api_url {
        return validate_api_url(api_url);
    }
    if config.use_docker_discovery {
        if let Some(url) = discover_base_url(Some(&config.container_name)).await {
            return Ok(url);
        }
        return Err(NpmError::Config(format!(
            "no NPM container found (looked for {}); set api_url or NPM_API_URL",
            config.container_name
        )));
    }
    Err(NpmError::Config(
        "api_url is not set and Docker discovery is disabled".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn valid_config_loads() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "api_url": "http://localhost:81",
                "username": "admin@example.com",
                "password": "secret"
            }"#,
        );
        let config = NpmConfig::from_file(&path).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:81"));
        assert_eq!(config.container_name, "nginx-proxy-manager");
        assert_eq!(config.credentials(), Some(("admin@example.com", "secret")));
        assert!(config.use_docker_discovery);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = NpmConfig::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, NpmConfig::default());
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"api_url": "http://localhost:81", "extra": 1}"#);
        let error = NpmConfig::from_file(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field `extra`"));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn invalid_urls_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"api_url": "not-a-url"}"#);
        assert!(NpmConfig::from_file(&path).is_err());

        assert!(validate_api_url("ftp://npm.example.com").is_err());
        assert_eq!(
            validate_api_url("http://192.168.1.100:81/").unwrap(),
            "http://192.168.1.100:81"
        );
        assert_eq!(
            validate_api_url("https://npm.example.com").unwrap(),
            "https://npm.example.com"
        );
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = NpmConfig {
            api_url: Some("http://localhost:81".to_string()),
            ..Default::default()
        };
        config.apply(Overrides {
            api_url: Some("http://192.168.1.50:81".to_string()),
            container_name: Some("my-npm-container".to_string()),
            username: Some("test@example.com".to_string()),
            password: Some("testpass".to_string()),
            use_docker_discovery: Some(false),
        });
        assert_eq!(config.api_url.as_deref(), Some("http://192.168.1.50:81"));
        assert_eq!(config.container_name, "my-npm-container");
        assert_eq!(config.credentials(), Some(("test@example.com", "testpass")));
        assert!(!config.use_docker_discovery);
    }

    #[test]
    fn redacted_config_hides_password() {
        let config = NpmConfig {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }

    #[tokio::test]
    async fn explicit_url_needs_no_discovery() {
        let config = NpmConfig {
            api_url: Some("http://npm.local:81/".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_base_url(&config).await.unwrap(), "http://npm.local:81");

        let config = NpmConfig {
            use_docker_discovery: false,
            ..Default::default()
        };
        assert!(matches!(
            resolve_base_url(&config).await.unwrap_err(),
            NpmError::Config(_)
        ));
    }
}
