//! Service configuration schema.
//!
//! A [`ServiceConfig`] is what a service declares about itself when it is
//! attached: its name, an optional explicit base path, the subprotocols it can
//! negotiate, its limits, and the remote functions it exposes. Every field but
//! `name` is optional; validation and defaulting happen when the dispatch
//! core builds a descriptor from it, not here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Max frame size (bytes) applied when a service does not configure one.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

/// Name of the remote function that marks a service as wanting an upgrade hook.
pub const UPGRADE_HOOK: &str = "onUpgrade";

/// Service names starting with this marker are generated (anonymous) names.
pub const ANONYMOUS_NAME_PREFIX: char = '$';

/// How completed messages reach the handler side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// The frame-delivering path waits for the handler to take each message
    /// and reads nothing else meanwhile.
    Synchronous,
    /// The frame-delivering path keeps servicing control frames while a
    /// message waits in the hand-off.
    #[default]
    Asynchronous,
}

/// An explicit base path, either as one string or as path segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BasePath {
    Path(String),
    Segments(Vec<String>),
}

impl BasePath {
    /// The raw (unsanitized) path string; segments are joined with `/`.
    pub fn joined(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Segments(segments) => segments.join("/"),
        }
    }
}

impl From<&str> for BasePath {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for BasePath {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<String>> for BasePath {
    fn from(segments: Vec<String>) -> Self {
        Self::Segments(segments)
    }
}

/// Declared configuration of one WebSocket service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<BasePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocols: Option<Vec<String>>,
    /// Signed so that a negative value reaches validation instead of failing
    /// deserialization with an unrelated message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<i64>,
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
    #[serde(default)]
    pub remote_functions: Vec<String>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<BasePath>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = Some(subprotocols.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_idle_timeout_secs(mut self, secs: i64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    pub fn with_max_frame_size(mut self, size: i64) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn with_remote_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remote_functions = functions.into_iter().map(Into::into).collect();
        self
    }
}

/// On-disk list of services: `{ "services": [ ... ] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl ServicesFile {
    pub fn from_json(json: &str) -> DispatchResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DispatchError::configuration(format!("malformed services file: {e}")))
    }

    pub fn load(path: &Path) -> DispatchResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}
