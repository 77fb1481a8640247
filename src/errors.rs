use colored::*;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::templates::TemplateError;

/// Remote error bodies are echoed back to the user, but never in full.
const MAX_DETAIL_LEN: usize = 500;

/// Struct that's used to deserialize NPM API errors
///
/// ```json
/// {"error": {"code": 400, "message": "data must NOT have additional properties"}}
/// ```
#[derive(Debug, Deserialize, Serialize)]
pub struct NpmApiError {
    pub error: NpmApiErrorDetail,
}

/// The inner part of an NPM API error body
#[derive(Debug, Deserialize, Serialize)]
pub struct NpmApiErrorDetail {
    #[serde(default)]
    pub code: Option<u16>,
    pub message: String,
}

/// Where a validation failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOrigin {
    /// An outgoing payload failed the local checks and was never sent.
    Request,
    /// The server answered 400 with a schema complaint.
    Rejected,
    /// A successful response did not match the expected shape.
    Response,
}

impl fmt::Display for ValidationOrigin {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ValidationOrigin::Request => "Invalid request",
            ValidationOrigin::Rejected => "NPM rejected the request",
            ValidationOrigin::Response => "NPM API response schema changed",
        };
        write!(formatter, "{}", text)
    }
}

/// Every failure the client can report. The CLI layer maps each kind to its own exit status.
#[derive(Debug, Error)]
pub enum NpmError {
    #[error("Cannot connect to NPM at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{origin}: {message}{}", render_detail(.detail))]
    Validation {
        origin: ValidationOrigin,
        message: String,
        detail: Option<String>,
    },

    #[error(
        "Certificate {certificate_id} is still used by proxy host(s) {}; detach it first or use --force",
        render_ids(.host_ids)
    )]
    Conflict {
        certificate_id: u64,
        host_ids: Vec<u64>,
    },

    #[error("Failed to {context}: HTTP {status}{}", render_detail(.detail))]
    Api {
        context: String,
        status: StatusCode,
        detail: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl NpmError {
    /// Builds a validation error for a response that does not parse into the expected model.
    pub fn schema_changed(message: impl Into<String>) -> Self {
        NpmError::Validation {
            origin: ValidationOrigin::Response,
            message: message.into(),
            detail: None,
        }
    }

    /// Builds a validation error for a payload that is rejected before it is sent.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        NpmError::Validation {
            origin: ValidationOrigin::Request,
            message: message.into(),
            detail: None,
        }
    }

    /// Process exit status for this kind of error.
    pub fn exit_code(&self) -> i32 {
        match self {
            NpmError::Connection { .. } | NpmError::Transport { .. } => 3,
            NpmError::Authentication(_) => 4,
            NpmError::NotFound(_) => 5,
            NpmError::Validation { .. } => 6,
            NpmError::Conflict { .. } => 7,
            NpmError::Api { .. } => 8,
            NpmError::Config(_) | NpmError::Io { .. } | NpmError::Template(_) => 2,
        }
    }
}

fn render_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({})", d),
        None => String::new(),
    }
}

fn render_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extracts a human readable detail from an error response body.
///
/// NPM usually answers with `{"error": {"message": ...}}`; anything else is passed on verbatim.
/// Either way the result is truncated so a large HTML error page does not flood the terminal.
pub fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let message = match serde_json::from_str::<NpmApiError>(body) {
        Ok(api_error) => api_error.error.message,
        Err(_) => body.to_string(),
    };
    Some(truncate(&message, MAX_DETAIL_LEN))
}

/// Whether a 400 response complains about the shape of the payload rather than its content.
pub fn is_schema_rejection(detail: &str) -> bool {
    let lowered = detail.to_lowercase();
    [
        "additional propert",
        "required property",
        "must be ",
        "should be ",
        "must match",
        "must have",
        "should have",
    ]
    .iter()
    .any(|marker| lowered.contains(marker))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

/// Prints an error for the terminal user.
pub fn print_error(error: &anyhow::Error) {
    eprintln!("{} {}", "❌".red().bold(), error.to_string().red());
    for cause in error.chain().skip(1) {
        eprintln!("{:>4} {}", "↳".magenta(), cause.to_string().magenta());
    }
    if let Some(NpmError::Authentication(_)) = error.downcast_ref::<NpmError>() {
        eprintln!(
            "{:>4} {}",
            "⚠".yellow(),
            "Run `npm-cli login` or set NPM_USERNAME/NPM_PASSWORD.".yellow()
        );
    }
}
