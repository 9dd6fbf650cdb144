//! ServiceRegistry — attached services, looked up by upgrade path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use wsd_protocol::{DispatchError, DispatchResult, ServiceConfig};

use crate::path::normalize_request_path;
use crate::service::ServiceDescriptor;

/// Services keyed by base path.
///
/// Uses parking_lot::RwLock so services can be attached while connections
/// are being resolved. Descriptors are handed out as `Arc`s; a resolved
/// descriptor stays valid even if its service is detached later.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a service. Fails with `Configuration` when the
    /// config is invalid or another service already owns the same path.
    pub fn attach(&self, config: ServiceConfig) -> DispatchResult<Arc<ServiceDescriptor>> {
        let descriptor = ServiceDescriptor::new(config)?;
        self.insert(descriptor)
    }

    /// Like [`attach`](Self::attach), serving the service at `upgrade_path`
    /// instead of the path derived from its config.
    pub fn attach_at(
        &self,
        config: ServiceConfig,
        upgrade_path: &str,
    ) -> DispatchResult<Arc<ServiceDescriptor>> {
        let mut descriptor = ServiceDescriptor::new(config)?;
        descriptor.override_base_path(upgrade_path)?;
        self.insert(descriptor)
    }

    /// Remove the service served at `base_path`. Live connections keep their
    /// descriptor.
    pub fn detach(&self, base_path: &str) -> Option<Arc<ServiceDescriptor>> {
        let path = normalize_request_path(base_path);
        let removed = self.services.write().remove(&path);
        if removed.is_some() {
            info!("Websocket service detached from {path}");
        }
        removed
    }

    /// Find the service for an upgrade request.
    ///
    /// The request path must equal a service's base path after
    /// normalization. If the service declares subprotocols and the client
    /// offered some, at least one must be in common.
    pub fn resolve_service<S: AsRef<str>>(
        &self,
        request_path: &str,
        requested_subprotocols: &[S],
    ) -> DispatchResult<Arc<ServiceDescriptor>> {
        let path = normalize_request_path(request_path);
        let service = self
            .services
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| DispatchError::no_match(&path))?;

        if service.has_subprotocols()
            && !requested_subprotocols.is_empty()
            && service.negotiate_subprotocol(requested_subprotocols).is_none()
        {
            debug!(
                "No common subprotocol for {path}: offered {:?}, supported {:?}",
                requested_subprotocols.iter().map(|s| s.as_ref()).collect::<Vec<&str>>(),
                service.subprotocols()
            );
            return Err(DispatchError::no_match(path));
        }

        Ok(service)
    }

    /// All services, ordered by base path.
    pub fn services(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut services: Vec<_> = self.services.read().values().cloned().collect();
        services.sort_by(|a, b| a.base_path().cmp(b.base_path()));
        services
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    fn insert(&self, descriptor: ServiceDescriptor) -> DispatchResult<Arc<ServiceDescriptor>> {
        let path = descriptor.base_path().to_string();
        let mut services = self.services.write();
        if let Some(existing) = services.get(&path) {
            return Err(DispatchError::configuration(format!(
                "path {path} is already served by '{}'",
                existing.name()
            )));
        }
        let descriptor = Arc::new(descriptor);
        services.insert(path.clone(), descriptor.clone());
        info!("Websocket service '{}' attached at {path}", descriptor.name());
        Ok(descriptor)
    }
}
