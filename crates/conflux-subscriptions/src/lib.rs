// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook subscription lifecycle.
//!
//! The [`SubscriptionManager`] reconciles the provider-side webhook
//! registration of each channel against the desired callback URL derived
//! from the service's public base URL. Registration, refresh after a base
//! URL change, and teardown all funnel through one reconcile path, and
//! operations on the same channel are serialized by a per-channel lock so
//! two concurrent reconciles cannot interleave their provider calls.
//!
//! A channel owns at most one subscription. The stored handle is only
//! replaced after the provider accepted the new registration, so a failed
//! refresh leaves the previous (still working) registration in place.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use conflux_core::{AdapterRegistry, Channel, ConfluxError, SubscriptionHandle};
use conflux_storage::queries::{channels, subscriptions};
use conflux_storage::Database;

/// What a reconcile pass did for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The stored registration already points at the desired URL.
    AlreadyActive,
    /// No registration existed; one was created.
    Registered { callback_url: String },
    /// The registration pointed at a stale URL and was replaced.
    Refreshed {
        callback_url: String,
        previous_url: String,
    },
}

/// Manages provider-side webhook registrations for all channels.
pub struct SubscriptionManager {
    db: Arc<Database>,
    registry: Arc<AdapterRegistry>,
    public_base_url: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubscriptionManager {
    pub fn new(db: Arc<Database>, registry: Arc<AdapterRegistry>, public_base_url: String) -> Self {
        Self {
            db,
            registry,
            public_base_url,
            locks: DashMap::new(),
        }
    }

    /// The callback URL a channel's webhook must point at.
    pub fn callback_url(&self, channel: &Channel) -> String {
        format!(
            "{}/channels/{}/webhook/{}",
            self.public_base_url, channel.provider, channel.id.0
        )
    }

    fn lock_for(&self, channel_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Bring the channel's registration to the desired state.
    ///
    /// Idempotent: a registration already pointing at the right URL is left
    /// alone. A missing one is created, a stale one is replaced -- in place
    /// when the provider supports URL updates, otherwise by unregistering
    /// the old handle first.
    pub async fn ensure(&self, channel_id: &str) -> Result<EnsureOutcome, ConfluxError> {
        let lock = self.lock_for(channel_id);
        let _guard = lock.lock().await;

        let channel = self.load_channel(channel_id).await?;
        let adapter = self.registry.get(channel.provider)?;
        let desired = self.callback_url(&channel);

        let stored = subscriptions::get_subscription(&self.db, channel_id).await?;

        // Providers without a server-side registration (the web widget) only
        // track the local handle.
        if !adapter.capabilities().needs_remote_subscription {
            let outcome = match &stored {
                Some(s) if s.callback_url == desired => EnsureOutcome::AlreadyActive,
                Some(s) => EnsureOutcome::Refreshed {
                    callback_url: desired.clone(),
                    previous_url: s.callback_url.clone(),
                },
                None => EnsureOutcome::Registered {
                    callback_url: desired.clone(),
                },
            };
            if outcome != EnsureOutcome::AlreadyActive {
                let handle = SubscriptionHandle {
                    external_id: None,
                    callback_url: desired,
                    title: None,
                };
                subscriptions::upsert_subscription(&self.db, channel_id, &handle).await?;
            }
            return Ok(outcome);
        }

        match stored {
            Some(existing) if existing.callback_url == desired => Ok(EnsureOutcome::AlreadyActive),
            Some(existing) => {
                // Stale URL. The old handle must not outlive the refresh:
                // providers that cannot update in place get an explicit
                // unregister before the new registration.
                let old_handle = SubscriptionHandle {
                    external_id: existing.external_id.clone(),
                    callback_url: existing.callback_url.clone(),
                    title: existing.title.clone(),
                };
                if !adapter.capabilities().supports_url_update {
                    adapter
                        .unregister_webhook(&channel, &old_handle)
                        .await
                        .map_err(|e| provider_err(&channel, "unregister stale webhook", e))?;
                }
                let handle = adapter
                    .register_webhook(&channel, &desired)
                    .await
                    .map_err(|e| provider_err(&channel, "register webhook", e))?;
                subscriptions::upsert_subscription(&self.db, channel_id, &handle).await?;
                info!(
                    channel = channel_id,
                    provider = %channel.provider,
                    url = %desired,
                    "webhook subscription refreshed"
                );
                Ok(EnsureOutcome::Refreshed {
                    callback_url: desired,
                    previous_url: existing.callback_url,
                })
            }
            None => {
                let handle = adapter
                    .register_webhook(&channel, &desired)
                    .await
                    .map_err(|e| provider_err(&channel, "register webhook", e))?;
                subscriptions::upsert_subscription(&self.db, channel_id, &handle).await?;
                info!(
                    channel = channel_id,
                    provider = %channel.provider,
                    url = %desired,
                    "webhook subscription registered"
                );
                Ok(EnsureOutcome::Registered {
                    callback_url: desired,
                })
            }
        }
    }

    /// Remove the channel's registration, provider-side and locally.
    ///
    /// Idempotent: no stored subscription is success, and the adapter treats
    /// a provider-side "not found" as success too. Best-effort against the
    /// provider: a failed remote unregister is logged and the local record
    /// still goes away, leaving at worst an orphaned remote subscription
    /// pointing at a channel that no longer accepts events.
    pub async fn teardown(&self, channel_id: &str) -> Result<(), ConfluxError> {
        let lock = self.lock_for(channel_id);
        let _guard = lock.lock().await;

        let channel = self.load_channel(channel_id).await?;
        let Some(existing) = subscriptions::get_subscription(&self.db, channel_id).await? else {
            return Ok(());
        };

        let adapter = self.registry.get(channel.provider)?;
        if adapter.capabilities().needs_remote_subscription {
            let handle = SubscriptionHandle {
                external_id: existing.external_id,
                callback_url: existing.callback_url,
                title: existing.title,
            };
            if let Err(e) = adapter.unregister_webhook(&channel, &handle).await {
                warn!(
                    channel = channel_id,
                    provider = %channel.provider,
                    error = %e,
                    "remote unregister failed, removing local record anyway"
                );
            }
        }
        subscriptions::delete_subscription(&self.db, channel_id).await?;
        info!(channel = channel_id, provider = %channel.provider, "webhook subscription removed");
        Ok(())
    }

    /// Reconcile every active channel, typically at startup or after the
    /// public base URL changed. Per-channel failures are logged and skipped
    /// so one broken provider does not block the rest.
    pub async fn ensure_all_active(&self) -> Result<Vec<(String, EnsureOutcome)>, ConfluxError> {
        let active = channels::list_channels(
            &self.db,
            Some(conflux_core::ChannelStatus::Active),
        )
        .await?;
        let mut outcomes = Vec::with_capacity(active.len());
        for channel in active {
            match self.ensure(&channel.id.0).await {
                Ok(outcome) => outcomes.push((channel.id.0, outcome)),
                Err(e) => {
                    warn!(
                        channel = %channel.id.0,
                        provider = %channel.provider,
                        error = %e,
                        "subscription reconcile failed"
                    );
                }
            }
        }
        Ok(outcomes)
    }

    async fn load_channel(&self, channel_id: &str) -> Result<Channel, ConfluxError> {
        channels::get_channel(&self.db, channel_id)
            .await?
            .ok_or_else(|| ConfluxError::not_found("channel", channel_id))
    }
}

fn provider_err(channel: &Channel, action: &str, e: conflux_core::SendError) -> ConfluxError {
    ConfluxError::Provider {
        message: format!("{action} for channel {}: {e}", channel.id.0),
        source: Some(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use conflux_core::{
        ChannelCredentials, ChannelId, ChannelStatus, Inbound, InvalidEvent, ProviderAdapter,
        ProviderCapabilities, ProviderKind, ProviderSendOk, RawWebhook, SendError,
    };

    struct FakeAdapter {
        kind: ProviderKind,
        capabilities: ProviderCapabilities,
        registered: StdMutex<Vec<String>>,
        unregistered: StdMutex<Vec<String>>,
        next_external_id: AtomicUsize,
        fail_register: std::sync::atomic::AtomicBool,
        fail_unregister: std::sync::atomic::AtomicBool,
    }

    impl FakeAdapter {
        fn new(kind: ProviderKind, supports_url_update: bool) -> Self {
            Self {
                kind,
                capabilities: ProviderCapabilities {
                    supports_url_update,
                    needs_remote_subscription: true,
                },
                registered: StdMutex::new(Vec::new()),
                unregistered: StdMutex::new(Vec::new()),
                next_external_id: AtomicUsize::new(1),
                fail_register: std::sync::atomic::AtomicBool::new(false),
                fail_unregister: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider(&self) -> ProviderKind {
            self.kind
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.capabilities
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
            if self.fail_register.load(Ordering::SeqCst) {
                return Err(SendError::TransientNetwork("provider down".into()));
            }
            self.registered.lock().unwrap().push(callback_url.to_string());
            let id = self.next_external_id.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriptionHandle {
                external_id: Some(id.to_string()),
                callback_url: callback_url.to_string(),
                title: Some("conflux".into()),
            })
        }

        async fn unregister_webhook(
            &self,
            _channel: &Channel,
            handle: &SubscriptionHandle,
        ) -> Result<(), SendError> {
            if self.fail_unregister.load(Ordering::SeqCst) {
                return Err(SendError::TransientNetwork("provider down".into()));
            }
            self.unregistered
                .lock()
                .unwrap()
                .push(handle.callback_url.clone());
            Ok(())
        }
    }

    async fn setup(
        provider: ProviderKind,
        adapter: Arc<FakeAdapter>,
        base_url: &str,
    ) -> (SubscriptionManager, Arc<Database>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(
            Database::open(dir.path().join("t.db").to_str().unwrap())
                .await
                .unwrap(),
        );
        let channel = Channel {
            id: ChannelId("ch-1".into()),
            provider,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials::default(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        };
        channels::create_channel(&db, &channel).await.unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(adapter);
        let manager = SubscriptionManager::new(db.clone(), Arc::new(registry), base_url.into());
        (manager, db, dir)
    }

    #[tokio::test]
    async fn first_ensure_registers_and_stores_handle() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Vk, false));
        let (manager, db, _dir) =
            setup(ProviderKind::Vk, adapter.clone(), "https://chat.example.com").await;

        let outcome = manager.ensure("ch-1").await.unwrap();
        assert_eq!(
            outcome,
            EnsureOutcome::Registered {
                callback_url: "https://chat.example.com/channels/vk/webhook/ch-1".into()
            }
        );

        let stored = subscriptions::get_subscription(&db, "ch-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("1"));

        // Second ensure is a no-op.
        assert_eq!(manager.ensure("ch-1").await.unwrap(), EnsureOutcome::AlreadyActive);
        assert_eq!(adapter.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_url_refresh_unregisters_old_handle_first() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Vk, false));
        let (_, db, dir) =
            setup(ProviderKind::Vk, adapter.clone(), "https://old.example.com").await;
        {
            let mut registry = AdapterRegistry::new();
            registry.register(adapter.clone());
            let manager = SubscriptionManager::new(
                db.clone(),
                Arc::new(registry),
                "https://old.example.com".into(),
            );
            manager.ensure("ch-1").await.unwrap();
        }

        // The service moved to a new public base URL.
        let mut registry = AdapterRegistry::new();
        registry.register(adapter.clone());
        let manager = SubscriptionManager::new(
            db.clone(),
            Arc::new(registry),
            "https://new.example.com".into(),
        );
        let outcome = manager.ensure("ch-1").await.unwrap();
        assert_eq!(
            outcome,
            EnsureOutcome::Refreshed {
                callback_url: "https://new.example.com/channels/vk/webhook/ch-1".into(),
                previous_url: "https://old.example.com/channels/vk/webhook/ch-1".into(),
            }
        );

        let unregistered = adapter.unregistered.lock().unwrap().clone();
        assert_eq!(
            unregistered,
            vec!["https://old.example.com/channels/vk/webhook/ch-1".to_string()]
        );
        let stored = subscriptions::get_subscription(&db, "ch-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.callback_url,
            "https://new.example.com/channels/vk/webhook/ch-1"
        );
        drop(dir);
    }

    #[tokio::test]
    async fn url_update_capable_provider_skips_unregister() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Telegram, true));
        let (manager, db, _dir) = setup(
            ProviderKind::Telegram,
            adapter.clone(),
            "https://a.example.com",
        )
        .await;
        manager.ensure("ch-1").await.unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(adapter.clone());
        let manager = SubscriptionManager::new(
            db.clone(),
            Arc::new(registry),
            "https://b.example.com".into(),
        );
        manager.ensure("ch-1").await.unwrap();

        // setWebhook-style providers overwrite in place.
        assert!(adapter.unregistered.lock().unwrap().is_empty());
        assert_eq!(adapter.registered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_registration() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Telegram, true));
        let (manager, db, _dir) = setup(
            ProviderKind::Telegram,
            adapter.clone(),
            "https://a.example.com",
        )
        .await;
        manager.ensure("ch-1").await.unwrap();

        adapter.fail_register.store(true, Ordering::SeqCst);
        let mut registry = AdapterRegistry::new();
        registry.register(adapter.clone());
        let manager = SubscriptionManager::new(
            db.clone(),
            Arc::new(registry),
            "https://b.example.com".into(),
        );
        assert!(manager.ensure("ch-1").await.is_err());

        let stored = subscriptions::get_subscription(&db, "ch-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.callback_url,
            "https://a.example.com/channels/telegram/webhook/ch-1"
        );
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Vk, false));
        let (manager, db, _dir) =
            setup(ProviderKind::Vk, adapter.clone(), "https://chat.example.com").await;
        manager.ensure("ch-1").await.unwrap();

        manager.teardown("ch-1").await.unwrap();
        assert!(subscriptions::get_subscription(&db, "ch-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(adapter.unregistered.lock().unwrap().len(), 1);

        // Nothing left to tear down; still success, no provider call.
        manager.teardown("ch-1").await.unwrap();
        assert_eq!(adapter.unregistered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn teardown_removes_local_record_when_provider_is_down() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Vk, false));
        let (manager, db, _dir) =
            setup(ProviderKind::Vk, adapter.clone(), "https://chat.example.com").await;
        manager.ensure("ch-1").await.unwrap();

        // Best-effort: the remote failure is logged, the local record still
        // goes away and the channel ends up unregistered.
        adapter.fail_unregister.store(true, Ordering::SeqCst);
        manager.teardown("ch-1").await.unwrap();
        assert!(subscriptions::get_subscription(&db, "ch-1")
            .await
            .unwrap()
            .is_none());
        assert!(adapter.unregistered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let adapter = Arc::new(FakeAdapter::new(ProviderKind::Vk, false));
        let (manager, _db, _dir) =
            setup(ProviderKind::Vk, adapter, "https://chat.example.com").await;
        let err = manager.ensure("missing").await.unwrap_err();
        assert!(matches!(err, ConfluxError::NotFound { kind: "channel", .. }));
    }

    #[tokio::test]
    async fn local_only_provider_never_calls_out() {
        struct LocalAdapter;

        #[async_trait]
        impl ProviderAdapter for LocalAdapter {
            fn provider(&self) -> ProviderKind {
                ProviderKind::Web
            }
            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities {
                    supports_url_update: true,
                    needs_remote_subscription: false,
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
                _callback_url: &str,
            ) -> Result<SubscriptionHandle, SendError> {
                panic!("local-only provider must not register remotely");
            }
            async fn unregister_webhook(
                &self,
                _channel: &Channel,
                _handle: &SubscriptionHandle,
            ) -> Result<(), SendError> {
                panic!("local-only provider must not unregister remotely");
            }
        }

        let dir = tempdir().unwrap();
        let db = Arc::new(
            Database::open(dir.path().join("t.db").to_str().unwrap())
                .await
                .unwrap(),
        );
        let channel = Channel {
            id: ChannelId("ch-web".into()),
            provider: ProviderKind::Web,
            status: ChannelStatus::Active,
            credentials: ChannelCredentials::default(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        };
        channels::create_channel(&db, &channel).await.unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(LocalAdapter));
        let manager =
            SubscriptionManager::new(db.clone(), Arc::new(registry), "https://x.example.com".into());

        assert!(matches!(
            manager.ensure("ch-web").await.unwrap(),
            EnsureOutcome::Registered { .. }
        ));
        assert_eq!(manager.ensure("ch-web").await.unwrap(), EnsureOutcome::AlreadyActive);
        manager.teardown("ch-web").await.unwrap();
    }
}
