// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter registry keyed by provider kind.
//!
//! The registry is the single place where a channel's provider tag is turned
//! into a concrete adapter. It is populated once at startup with the
//! compiled-in adapters and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::error::ConfluxError;
use crate::types::ProviderKind;

/// Registry of provider adapters, keyed by [`ProviderKind`].
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own provider kind. A second adapter
    /// for the same kind replaces the first.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let kind = adapter.provider();
        if self.adapters.insert(kind, adapter).is_some() {
            tracing::warn!(provider = %kind, "replacing previously registered adapter");
        }
    }

    /// Resolves the adapter for a provider kind.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, ConfluxError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConfluxError::AdapterNotFound {
                provider: kind.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Inbound, ProviderCapabilities, RawWebhook};
    use crate::error::{InvalidEvent, SendError};
    use crate::types::{Channel, ProviderSendOk, SubscriptionHandle};
    use async_trait::async_trait;

    struct NullAdapter(ProviderKind);

    #[async_trait]
    impl ProviderAdapter for NullAdapter {
        fn provider(&self) -> ProviderKind {
            self.0
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                supports_url_update: false,
                needs_remote_subscription: true,
            }
        }

        async fn normalize_inbound(
            &self,
            _channel: &Channel,
            _raw: &RawWebhook,
        ) -> Result<Inbound, InvalidEvent> {
            Ok(Inbound::Ignored)
        }

        async fn send_message(
            &self,
            _channel: &Channel,
            _conversation_key: &str,
            _content: &str,
        ) -> Result<ProviderSendOk, SendError> {
            Ok(ProviderSendOk::default())
        }

        async fn register_webhook(
            &self,
            _channel: &Channel,
            callback_url: &str,
        ) -> Result<SubscriptionHandle, SendError> {
            Ok(SubscriptionHandle {
                external_id: None,
                callback_url: callback_url.to_string(),
                title: None,
            })
        }

        async fn unregister_webhook(
            &self,
            _channel: &Channel,
            _handle: &SubscriptionHandle,
        ) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[test]
    fn registry_resolves_registered_adapter() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NullAdapter(ProviderKind::Telegram)));
        assert_eq!(registry.len(), 1);

        let adapter = registry.get(ProviderKind::Telegram).unwrap();
        assert_eq!(adapter.provider(), ProviderKind::Telegram);
    }

    #[test]
    fn registry_errors_on_missing_provider() {
        let registry = AdapterRegistry::new();
        match registry.get(ProviderKind::Vk) {
            Err(ConfluxError::AdapterNotFound { provider }) => assert_eq!(provider, "vk"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("empty registry resolved an adapter"),
        }
    }

    #[test]
    fn registering_same_kind_replaces() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter(ProviderKind::Web)));
        registry.register(Arc::new(NullAdapter(ProviderKind::Web)));
        assert_eq!(registry.len(), 1);
    }
}
