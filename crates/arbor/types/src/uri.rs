//! Resource URIs - `arbor://{resource_type}/{action}/{path...}`
//!
//! The action lives inside the URI rather than as a separate field, so a
//! capability for `arbor://fs/read/...` can never authorize a write.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SCHEME: &str = "arbor";

/// Parsed form of an `arbor://` resource URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUri {
    resource_type: String,
    action: String,
    path: Vec<String>,
}

impl ResourceUri {
    pub fn new(
        resource_type: impl Into<String>,
        action: impl Into<String>,
        path: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            action: action.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `arbor://{type}/{action}/{path...}`. Rejects foreign schemes
    /// and URIs missing the type or action segment.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let rest = uri
            .strip_prefix("arbor://")
            .ok_or_else(|| UriError::InvalidScheme(uri.to_string()))?;

        let mut segments = rest.split('/');
        let resource_type = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| UriError::MissingSegment(uri.to_string()))?;
        let action = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| UriError::MissingSegment(uri.to_string()))?;
        let path: Vec<String> = segments
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            resource_type: resource_type.to_string(),
            action: action.to_string(),
            path,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// True when `other` names the same resource type and action and this
    /// URI's path is a (possibly equal) leading segment sequence of the
    /// other's path.
    pub fn is_path_prefix_of(&self, other: &ResourceUri) -> bool {
        self.resource_type == other.resource_type
            && self.action == other.action
            && self.path.len() <= other.path.len()
            && self.path.iter().zip(other.path.iter()).all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", SCHEME, self.resource_type, self.action)?;
        for segment in &self.path {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Proper path-segment prefix match between raw strings.
///
/// `"/home"` covers `"/home/user/file"` but never `"/home_config"`: a match
/// must end at a `/` boundary or at the end of the candidate. Used by both
/// the capability store and `allowed_paths` so the two layers always agree
/// about what a prefix covers.
pub fn path_segment_prefix(prefix: &str, candidate: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match candidate.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Resource URI parse errors.
#[derive(Debug, Error)]
pub enum UriError {
    #[error("invalid scheme, expected arbor://: {0}")]
    InvalidScheme(String),

    #[error("resource URI is missing its type or action segment: {0}")]
    MissingSegment(String),
}
