use std::{fmt, path::PathBuf};

use hyper::StatusCode;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures talking to the remote repository host.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not build request for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: hyper::http::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: hyper::Error,
    },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} was not found")]
    NotFound { url: String },

    #[error("{url} requires authentication, set GITHUB_TOKEN or log in with `gh auth login`")]
    Unauthorized { url: String },

    #[error("rate limit exceeded while requesting {url}, set GITHUB_TOKEN to raise the limit")]
    RateLimited { url: String },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("too many redirects while requesting {url}")]
    TooManyRedirects { url: String },

    #[error("invalid url {url}")]
    InvalidUrl { url: String },
}

/// Everything that can go wrong while fetching a directory.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid location '{input}': {reason}")]
    InvalidLocation { input: String, reason: &'static str },

    #[error("invalid output name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("ref '{reference}' does not exist in {repository}")]
    RefNotFound {
        repository: String,
        reference: String,
    },

    #[error("path '{path}' does not exist at ref '{reference}' (no directory named '{segment}')")]
    PathNotFound {
        path: String,
        segment: String,
        reference: String,
    },

    #[error("the listing of '{path}' was truncated by the host, refusing to download an incomplete tree")]
    TruncatedListing { path: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{} file(s) failed to download:\n{}", .failures.len(), FailureList(.failures))]
    PartialDownload { failures: Vec<FileFailure> },

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of '{path}' was aborted: {source}")]
    Task {
        path: String,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("refusing to write '{path}' outside of the target directory")]
    UnsafePath { path: String },
}

impl FetchError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Only host/transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Api(_))
    }
}

/// A single file that could not be downloaded.
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub error: FetchError,
}

struct FailureList<'a>(&'a [FileFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}: {}", failure.path, failure.error)?;
        }
        Ok(())
    }
}
