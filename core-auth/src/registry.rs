//! Provider Registry
//!
//! Maps [`ProviderKind`] to the adapter implementing [`CloudProvider`].
//! Built once at process start and injected wherever a provider is resolved
//! from persisted data; a kind with no registered adapter is a configuration
//! error, not a fallback.

use crate::error::{AuthError, Result};
use crate::types::ProviderKind;
use bridge_traits::provider::CloudProvider;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for `kind`, replacing any previous registration.
    pub fn register(mut self, kind: ProviderKind, provider: Arc<dyn CloudProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Resolve the adapter for `kind`.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CloudProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AuthError::InvalidProvider(kind.as_str().to_string()))
    }

    /// Kinds with a registered adapter.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}
