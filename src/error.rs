//! Error types for the wiki request pipeline
//!
//! Every failure a request can hit maps to exactly one variant, and every
//! variant maps to exactly one HTTP status.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WikiError {
    /// Request path is not `/(view|edit|save)/<title>`
    #[error("invalid page path: {0}")]
    InvalidPath(String),

    /// No page stored under this title
    #[error("page not found: {0}")]
    NotFound(String),

    #[error("{}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load template {}: {source}", path.display())]
    TemplateLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),

    #[error("invalid form body: {0}")]
    Form(#[from] serde_urlencoded::de::Error),

    /// Save body is not `application/x-www-form-urlencoded`
    #[error("unsupported form encoding: {0}")]
    UnsupportedMediaType(String),

    #[error("invalid path pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl WikiError {
    /// HTTP status code this error is surfaced as
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidPath(_) | Self::NotFound(_) => 404,
            Self::Form(_) => 400,
            Self::UnsupportedMediaType(_) => 415,
            Self::Storage { .. } | Self::TemplateLoad { .. } | Self::Render(_) | Self::Pattern(_) => {
                500
            }
        }
    }
}
