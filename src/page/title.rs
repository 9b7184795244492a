//! Page title extraction and validation
//!
//! The validator is the only way a request path becomes a [`Title`], so
//! anything downstream of the router can use a title as a file name.

use std::fmt;

use regex::Regex;

use crate::error::WikiError;

/// Accepted request paths: an action followed by an alphanumeric title
const PATH_PATTERN: &str = r"^/(view|edit|save)/([a-zA-Z0-9]+)$";

/// Page operation requested by the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Edit,
    Save,
}

impl Action {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "view" => Some(Self::View),
            "edit" => Some(Self::Edit),
            "save" => Some(Self::Save),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Save => "save",
        }
    }
}

/// A validated page title, restricted to `[a-zA-Z0-9]+`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Title(String);

impl Title {
    pub fn new(candidate: &str) -> Result<Self, WikiError> {
        if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(WikiError::InvalidPath(candidate.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Title {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compiled path pattern, built once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct TitleValidator {
    pattern: Regex,
}

impl TitleValidator {
    pub fn new() -> Result<Self, WikiError> {
        Ok(Self {
            pattern: Regex::new(PATH_PATTERN)?,
        })
    }

    /// Split a request path into its action and title
    pub fn parse(&self, path: &str) -> Result<(Action, Title), WikiError> {
        let invalid = || WikiError::InvalidPath(path.to_string());

        let captures = self.pattern.captures(path).ok_or_else(invalid)?;
        let action = captures
            .get(1)
            .and_then(|m| Action::from_segment(m.as_str()))
            .ok_or_else(invalid)?;
        let title = captures.get(2).ok_or_else(invalid)?;

        Ok((action, Title::new(title.as_str())?))
    }
}
