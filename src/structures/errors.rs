use std::fmt;

use actix_web::http::StatusCode;
use thiserror::Error;

use super::model::CollectionKind;

/// One sub-fetch that did not make it into a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFailure {
    pub kind: CollectionKind,
    pub message: String,
}

impl fmt::Display for CollectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub(crate) struct FailureList<'a>(pub &'a [CollectionFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("invalid configuration\n{0}")]
    InvalidConfiguration(String),

    #[error("network failure\n{0}")]
    NetworkFailure(String),

    #[error("refresh {epoch} failed, snapshot left unchanged\n{}", FailureList(.failures))]
    PartialRefreshFailure {
        epoch: u64,
        failures: Vec<CollectionFailure>,
    },

    #[error("command rejected\n{0}")]
    CommandFailed(String),

    #[error("could not reach probing engine for website {website_id}\n{message}")]
    CheckDispatchFailed { website_id: String, message: String },

    #[error("probing engine failed to check website {website_id}\n{message}")]
    CheckExecutionFailed { website_id: String, message: String },

    #[error("IO error\n{0}")]
    Read(#[from] std::io::Error),

    #[error("askama templating error\n{0}")]
    Askama(#[from] askama::Error),

    #[error("serde_yaml error\n{0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("refresh task error\n{0}")]
    Task(#[from] tokio::task::JoinError),
}

impl actix_web::error::ResponseError for ConsoleError {
    fn status_code(&self) -> StatusCode {
        match self {
            ConsoleError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            ConsoleError::NetworkFailure(_)
            | ConsoleError::PartialRefreshFailure { .. }
            | ConsoleError::CommandFailed(_)
            | ConsoleError::CheckDispatchFailed { .. }
            | ConsoleError::CheckExecutionFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures of a single call to the monitoring backend.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend answered {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ApiError::Unreachable(e.to_string())
        }
    }
}
