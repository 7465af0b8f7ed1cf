use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("cannot read sitemap {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed sitemap: {0}")]
    Malformed(String),
}

/// Why a single fetch tier gave up. The chain logs these and moves on.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn helper: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("helper exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}

impl TierError {
    /// Errors worth retrying inside a single tier.
    pub fn is_transient(&self) -> bool {
        match self {
            TierError::Status(code) => *code == 429 || (500..600).contains(code),
            TierError::Transport(e) => e.is_timeout() || e.is_connect(),
            TierError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize run metadata: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("markdown conversion failed: {0}")]
    Convert(#[source] std::io::Error),
}

/// Per-URL failure, contained by the pipeline and written to the failure table.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("All fetch attempts failed")]
    FetchExhausted,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
