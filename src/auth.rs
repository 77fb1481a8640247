use crate::client::NpmClient;
use crate::errors::{error_detail, NpmError};
use crate::models::auth::{TokenRequest, TokenResponse};
use chrono::{Duration, Utc};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Tokens expiring within this many seconds are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// File-backed cache of the bearer token issued by `POST /api/tokens`
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenCache { path: path.into() }
    }

    /// `~/.npm-cli/token.json`
    pub fn default_location() -> Result<Self, NpmError> {
        let home = dirs::home_dir()
            .ok_or_else(|| NpmError::Config("cannot determine the home directory".to_string()))?;
        Ok(TokenCache::new(home.join(".npm-cli").join("token.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached token if it is still valid.
    ///
    /// A missing, unreadable or malformed file counts as no token.
    pub fn load(&self) -> Option<String> {
        let entry = self.load_entry()?;
        let expires = match entry.expires_at() {
            Some(expires) => expires,
            None => {
                warn!("Cached token has an unparsable expiry {:?}", entry.expires);
                return None;
            }
        };
        if expires - Duration::seconds(EXPIRY_MARGIN_SECS) <= Utc::now() {
            debug!("Cached token expired at {}", expires);
            return None;
        }
        Some(entry.token)
    }

    /// Reads the cache file without looking at the expiry.
    pub fn load_entry(&self) -> Option<TokenResponse> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read token cache {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring malformed token cache {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, token: &TokenResponse) -> Result<(), NpmError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| NpmError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = serde_json::to_string(token)
            .map_err(|e| NpmError::Config(format!("cannot serialize token: {}", e)))?;
        fs::write(&self.path, content).map_err(|e| NpmError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Removes the cache file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), NpmError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NpmError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Exchanges credentials for a bearer token and stores it in the client's cache.
///
/// # Arguments
///
/// * `client` - A reference to an NpmClient instance
/// * `identity` - User email
/// * `secret` - User password
///
/// # Performed API Request
///
/// ```
/// POST https://{npm}/api/tokens
/// ```
pub async fn login(
    client: &NpmClient,
    identity: &str,
    secret: &str,
) -> Result<TokenResponse, NpmError> {
    let url = client.url("/api/tokens");
    let request = TokenRequest { identity, secret };
    debug!("POST {} as {}", url, identity);

    let response = client
        .send_with_retry(&url, || client.http.post(&url).json(&request))
        .await?;
    let status = response.status();
    let body = response.text().await.map_err(|e| NpmError::Transport {
        url: url.clone(),
        source: e,
    })?;
    if !status.is_success() {
        return Err(NpmError::Authentication(format!(
            "login failed with HTTP {}{}",
            status,
            error_detail(&body)
                .map(|d| format!(": {}", d))
                .unwrap_or_default()
        )));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| NpmError::schema_changed(format!("token response: {}", e)))?;
    client.tokens.save(&token)?;
    Ok(token)
}
