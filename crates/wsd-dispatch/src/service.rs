//! ServiceDescriptor — a service's resolved dispatch configuration.

use std::time::Duration;

use tracing::debug;
use wsd_protocol::{
    ANONYMOUS_NAME_PREFIX, DEFAULT_MAX_FRAME_SIZE, DispatchError, DispatchMode, DispatchResult,
    ServiceConfig, UPGRADE_HOOK,
};

use crate::path::sanitize_base_path;

/// Static dispatch configuration of one attached service.
///
/// Built once when the service is attached and then shared, behind an `Arc`,
/// by every connection of that service. Nothing here changes after the
/// descriptor is shared, so connections read it without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    subprotocols: Vec<String>,
    max_frame_size: usize,
    idle_timeout_secs: u64,
    base_path: String,
    has_upgrade_hook: bool,
    dispatch_mode: DispatchMode,
}

impl ServiceDescriptor {
    /// Validate `config` and resolve it into a descriptor.
    ///
    /// Missing fields take their defaults (no subprotocols, no idle timeout,
    /// [`DEFAULT_MAX_FRAME_SIZE`]). Values that are present but invalid are
    /// rejected with [`DispatchError::Configuration`], never clamped.
    pub fn new(config: ServiceConfig) -> DispatchResult<Self> {
        let subprotocols = validate_subprotocols(config.subprotocols.unwrap_or_default())?;

        let idle_timeout_secs = match config.idle_timeout_secs {
            None => 0,
            Some(secs) => u64::try_from(secs).map_err(|_| {
                DispatchError::configuration(format!(
                    "service '{}': idle timeout must not be negative (got {secs})",
                    config.name
                ))
            })?,
        };

        let max_frame_size = match config.max_frame_size {
            None => DEFAULT_MAX_FRAME_SIZE,
            Some(size) if size > 0 => usize::try_from(size).map_err(|_| {
                DispatchError::configuration(format!(
                    "service '{}': max frame size {size} is out of range",
                    config.name
                ))
            })?,
            Some(size) => {
                return Err(DispatchError::configuration(format!(
                    "service '{}': max frame size must be positive (got {size})",
                    config.name
                )));
            }
        };

        let name = if config.name.starts_with(ANONYMOUS_NAME_PREFIX) {
            String::new()
        } else {
            config.name
        };

        let explicit_path = config
            .base_path
            .map(|p| p.joined())
            .filter(|p| !p.trim().is_empty());
        let base_path = match explicit_path {
            Some(path) => sanitize_base_path(&path)?,
            None => sanitize_base_path(&name)?,
        };

        let has_upgrade_hook = config.remote_functions.iter().any(|f| f == UPGRADE_HOOK);

        debug!(
            "Resolved websocket service '{name}' at {base_path} (subprotocols: {subprotocols:?}, \
             idle timeout: {idle_timeout_secs}s, max frame: {max_frame_size}, upgrade hook: {has_upgrade_hook})"
        );

        Ok(Self {
            name,
            subprotocols,
            max_frame_size,
            idle_timeout_secs,
            base_path,
            has_upgrade_hook,
            dispatch_mode: config.dispatch_mode,
        })
    }

    /// Service name; empty for anonymous services.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Negotiable subprotocols in declaration (= priority) order.
    ///
    /// Returns a copy; the descriptor is shared across connections and must
    /// not be altered through this.
    pub fn subprotocols(&self) -> Vec<String> {
        self.subprotocols.clone()
    }

    pub fn has_subprotocols(&self) -> bool {
        !self.subprotocols.is_empty()
    }

    /// Pick the subprotocol for an upgrade: the first declared one the client
    /// offered. Client order does not matter.
    pub fn negotiate_subprotocol<S: AsRef<str>>(&self, requested: &[S]) -> Option<String> {
        self.subprotocols
            .iter()
            .find(|declared| requested.iter().any(|r| r.as_ref() == declared.as_str()))
            .cloned()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn idle_timeout_secs(&self) -> u64 {
        self.idle_timeout_secs
    }

    /// `None` when idle connections are never timed out.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replace the base path with the more specific path supplied at upgrade
    /// registration. Only possible while the descriptor is still exclusively
    /// owned.
    pub fn override_base_path(&mut self, upgrade_path: &str) -> DispatchResult<()> {
        let path = sanitize_base_path(upgrade_path)?;
        debug!("Service '{}' base path overridden: {} -> {path}", self.name, self.base_path);
        self.base_path = path;
        Ok(())
    }

    /// Whether the service declares an `onUpgrade` remote function.
    pub fn has_upgrade_hook(&self) -> bool {
        self.has_upgrade_hook
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }
}

fn validate_subprotocols(subprotocols: Vec<String>) -> DispatchResult<Vec<String>> {
    for (i, protocol) in subprotocols.iter().enumerate() {
        if protocol.is_empty() || !protocol.bytes().all(is_token_char) {
            return Err(DispatchError::configuration(format!(
                "invalid subprotocol name '{protocol}'"
            )));
        }
        if subprotocols[..i].contains(protocol) {
            return Err(DispatchError::configuration(format!(
                "subprotocol '{protocol}' is declared more than once"
            )));
        }
    }
    Ok(subprotocols)
}

// RFC 7230 tchar
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}
