//! Background host
//!
//! Supervises the privileged worker. The worker holds no durable state: it
//! is activated lazily by the first message, reloads settings from the store
//! before handling anything, and can be terminated at any moment, which
//! silently drops every reply it still owed.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use geoguard_relay::{
    origin_of, LocationUpdate, MessageSender, PrivacyStateInfo, RuntimeClient, RuntimeEnvelope,
    RuntimeRequest, RuntimeResponse,
};
use geoguard_storage::Database;

use crate::client::ProtectionService;
use crate::resolver::PolicyResolver;
use crate::settings::{PrivacyLevel, PrivacySettings};
use crate::state::PrivacyState;
use crate::Result;

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Settings reload period while the worker is active.
    pub keep_alive_interval: Duration,
    pub update_capacity: usize,
    pub mailbox_capacity: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(60),
            update_capacity: 64,
            mailbox_capacity: 256,
        }
    }
}

struct ActiveWorker {
    tx: mpsc::UnboundedSender<RuntimeEnvelope>,
    task: JoinHandle<()>,
}

struct HostInner {
    db: Database,
    service: Arc<dyn ProtectionService>,
    updates: broadcast::Sender<LocationUpdate>,
    options: HostOptions,
    worker: Mutex<Option<ActiveWorker>>,
    activations: AtomicU64,
}

pub struct BackgroundHost {
    inner: Arc<HostInner>,
    dispatcher: Arc<JoinHandle<()>>,
}

impl BackgroundHost {
    /// Start the host and return the channel pages use to reach it.
    pub fn start(
        db: Database,
        service: Arc<dyn ProtectionService>,
        options: HostOptions,
    ) -> (Self, RuntimeClient) {
        let (updates, _) = broadcast::channel(options.update_capacity.max(1));
        let (client, rx) = RuntimeClient::channel(options.mailbox_capacity.max(1));

        let inner = Arc::new(HostInner {
            db,
            service,
            updates,
            options,
            worker: Mutex::new(None),
            activations: AtomicU64::new(0),
        });

        let dispatcher = tokio::spawn(Arc::clone(&inner).dispatch(rx));

        (
            Self {
                inner,
                dispatcher: Arc::new(dispatcher),
            },
            client,
        )
    }

    /// Receive a `LocationUpdate` for every protected location.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationUpdate> {
        self.inner.updates.subscribe()
    }

    /// Kill the worker without notice, as the platform would.
    pub fn terminate(&self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.task.abort();
            tracing::info!("Privileged worker terminated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Number of times the worker has been (re)activated.
    pub fn activations(&self) -> u64 {
        self.inner.activations.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.terminate();
        self.dispatcher.abort();
    }
}

impl Clone for BackgroundHost {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl HostInner {
    async fn dispatch(self: Arc<Self>, mut rx: mpsc::Receiver<RuntimeEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            let mut worker = self.worker.lock();

            let envelope = match worker.as_ref() {
                Some(active) if !active.task.is_finished() => match active.tx.send(envelope) {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(envelope)) => envelope,
                },
                _ => envelope,
            };

            let active = self.activate();
            if let Err(mpsc::error::SendError(envelope)) = active.tx.send(envelope) {
                tracing::error!(action = envelope.request.action(), "Fresh worker refused message");
            }
            *worker = Some(active);
        }

        tracing::debug!("Runtime channel closed, background host stopping");
    }

    fn activate(&self) -> ActiveWorker {
        let settings = load_settings(&self.db);
        let activation = self.activations.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            activation,
            settings_version = settings.version,
            enabled = settings.enabled,
            privacy_level = %settings.privacy_level,
            site_count = settings.site_settings.len(),
            "Privileged worker activated"
        );

        let state = Arc::new(RwLock::new(PrivacyState::new(settings)));
        let worker = Worker {
            resolver: PolicyResolver::new(
                Arc::clone(&state),
                Arc::clone(&self.service),
                self.updates.clone(),
            ),
            state,
            db: self.db.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(worker.run(rx, self.options.keep_alive_interval));

        ActiveWorker { tx, task }
    }
}

fn load_settings(db: &Database) -> PrivacySettings {
    match PrivacySettings::load(db) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load settings, using defaults");
            PrivacySettings::default()
        }
    }
}

struct Worker {
    resolver: PolicyResolver,
    state: Arc<RwLock<PrivacyState>>,
    db: Database,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<RuntimeEnvelope>, keep_alive: Duration) {
        // Dropping the set on abort cancels every in-flight handler with it.
        let mut handlers = JoinSet::new();
        let mut reload =
            tokio::time::interval_at(tokio::time::Instant::now() + keep_alive, keep_alive);

        loop {
            tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => self.handle(envelope, &mut handlers),
                    None => break,
                },
                _ = reload.tick() => self.reload(),
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Location handler panicked");
                        }
                    }
                }
            }
        }
    }

    fn reload(&self) {
        let settings = load_settings(&self.db);
        tracing::debug!(settings_version = settings.version, "Keep-alive settings reload");
        self.state.write().replace_settings(settings);
    }

    fn handle(&self, envelope: RuntimeEnvelope, handlers: &mut JoinSet<()>) {
        let RuntimeEnvelope {
            sender,
            request,
            reply,
        } = envelope;

        let response = match request {
            RuntimeRequest::ProcessLocation {
                latitude,
                longitude,
            } => {
                let resolver = self.resolver.clone();
                let origin = sender.origin();
                handlers.spawn(async move {
                    let response = resolver.process_location(latitude, longitude, &origin).await;
                    let _ = reply.send(RuntimeResponse::Location(response));
                });
                return;
            }
            RuntimeRequest::UpdatePrivacyState { enabled } => self.update(|s| {
                s.enabled = enabled;
                Ok(())
            }),
            RuntimeRequest::UpdatePrivacyLevel { level } => self.update(|s| {
                s.privacy_level = PrivacyLevel::new(i64::from(level))?;
                Ok(())
            }),
            RuntimeRequest::UpdateSiteSettings { site_settings } => {
                self.update(|s| s.set_site_settings(site_settings))
            }
            RuntimeRequest::RemoveSiteSettings { domain } => self.update(|s| {
                s.site_settings.remove(&domain.to_lowercase());
                Ok(())
            }),
            RuntimeRequest::ClearAllSiteSettings => self.update(|s| {
                s.site_settings.clear();
                Ok(())
            }),
            RuntimeRequest::UpdatePreferences {
                save_history,
                protect_sensitive,
            } => self.update(|s| {
                if let Some(save_history) = save_history {
                    s.save_history = save_history;
                }
                if let Some(protect_sensitive) = protect_sensitive {
                    s.protect_sensitive = protect_sensitive;
                }
                Ok(())
            }),
            RuntimeRequest::GetLocationInfo => RuntimeResponse::LocationInfo {
                data: self.state.read().last_location().cloned(),
            },
            RuntimeRequest::GetPrivacyState { url } => self.privacy_state(&sender, url),
        };

        let _ = reply.send(response);
    }

    fn update<F>(&self, f: F) -> RuntimeResponse
    where
        F: FnOnce(&mut PrivacySettings) -> Result<()>,
    {
        let current = self.state.read().settings();
        let result = current.updated(f).and_then(|next| {
            next.save(&self.db)?;
            Ok(next)
        });

        match result {
            Ok(next) => {
                tracing::info!(settings_version = next.version, "Privacy settings updated");
                self.state.write().replace_settings(next);
                RuntimeResponse::ack()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected settings update");
                RuntimeResponse::rejected(e.to_string())
            }
        }
    }

    fn privacy_state(&self, sender: &MessageSender, url: Option<String>) -> RuntimeResponse {
        let domain = match url {
            Some(url) => origin_of(&url),
            None => sender.origin(),
        };
        let effective = self.state.read().settings().effective_for(&domain);

        RuntimeResponse::PrivacyState(PrivacyStateInfo {
            enabled: effective.enabled,
            privacy_level: effective.privacy_level.get(),
            domain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ProtectionRequest, ProtectionResponse};
    use async_trait::async_trait;
    use geoguard_relay::{LatLng, LocationResponse, SiteSetting};
    use std::collections::HashMap;
    use uuid::Uuid;

    struct ShiftService {
        delay: Duration,
    }

    #[async_trait]
    impl ProtectionService for ShiftService {
        async fn protect(&self, request: &ProtectionRequest) -> Result<ProtectionResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(ProtectionResponse {
                original: LatLng::new(request.latitude, request.longitude),
                private: LatLng::new(request.latitude + 1.0, request.longitude + 1.0),
                is_sensitive: false,
            })
        }
    }

    fn start(db: Database, delay: Duration) -> (BackgroundHost, RuntimeClient) {
        BackgroundHost::start(db, Arc::new(ShiftService { delay }), HostOptions::default())
    }

    fn page(url: &str) -> MessageSender {
        MessageSender::page(Uuid::new_v4(), url)
    }

    async fn process(client: &RuntimeClient, url: &str) -> LocationResponse {
        let response = client
            .send_message(
                page(url),
                RuntimeRequest::ProcessLocation {
                    latitude: 10.0,
                    longitude: 20.0,
                },
            )
            .await
            .unwrap();
        match response {
            RuntimeResponse::Location(location) => location,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lazy_activation_loads_persisted_settings() {
        let db = Database::open_in_memory().unwrap();
        PrivacySettings {
            enabled: false,
            ..PrivacySettings::default()
        }
        .save(&db)
        .unwrap();

        let (host, client) = start(db, Duration::ZERO);
        assert!(!host.is_active());
        assert_eq!(host.activations(), 0);

        let response = process(&client, "https://example.com/").await;
        assert!(response.original);
        assert!(!response.error);
        assert_eq!(host.activations(), 1);
        assert!(host.is_active());
    }

    #[tokio::test]
    async fn test_settings_messages_persist() {
        let db = Database::open_in_memory().unwrap();
        let (host, client) = start(db.clone(), Duration::ZERO);
        let settings_ui = MessageSender::extension();

        let ack = client
            .send_message(settings_ui.clone(), RuntimeRequest::UpdatePrivacyLevel { level: 9 })
            .await
            .unwrap();
        assert_eq!(ack, RuntimeResponse::ack());

        let ack = client
            .send_message(
                settings_ui.clone(),
                RuntimeRequest::UpdateSiteSettings {
                    site_settings: HashMap::from([(
                        "example.com".to_string(),
                        SiteSetting {
                            enabled: true,
                            privacy_level: 2,
                        },
                    )]),
                },
            )
            .await
            .unwrap();
        assert_eq!(ack, RuntimeResponse::ack());

        let rejected = client
            .send_message(settings_ui.clone(), RuntimeRequest::UpdatePrivacyLevel { level: 0 })
            .await
            .unwrap();
        assert!(matches!(rejected, RuntimeResponse::Rejected { .. }));

        let persisted = PrivacySettings::load(&db).unwrap();
        assert_eq!(persisted.privacy_level.get(), 9);
        assert_eq!(persisted.version, 2);
        assert_eq!(persisted.site_settings["example.com"].privacy_level, 2);

        let state = client
            .send_message(
                settings_ui,
                RuntimeRequest::GetPrivacyState {
                    url: Some("https://example.com/page".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            state,
            RuntimeResponse::PrivacyState(PrivacyStateInfo {
                enabled: true,
                privacy_level: 2,
                domain: "example.com".to_string(),
            })
        );

        host.shutdown();
    }

    #[tokio::test]
    async fn test_terminate_drops_in_flight_reply() {
        let db = Database::open_in_memory().unwrap();
        let (host, client) = start(db, Duration::from_secs(30));

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .send_message(
                        page("https://example.com/"),
                        RuntimeRequest::ProcessLocation {
                            latitude: 1.0,
                            longitude: 2.0,
                        },
                    )
                    .await
            }
        });

        while !host.is_active() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        host.terminate();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(geoguard_relay::RelayError::ReplyDropped)));
        assert!(!host.is_active());
    }

    #[tokio::test]
    async fn test_restart_reloads_settings_and_forgets_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let (host, client) = start(db.clone(), Duration::ZERO);

        let response = process(&client, "https://example.com/").await;
        assert!(!response.original);

        let info = client
            .send_message(MessageSender::extension(), RuntimeRequest::GetLocationInfo)
            .await
            .unwrap();
        assert!(matches!(info, RuntimeResponse::LocationInfo { data: Some(_) }));

        host.terminate();

        // Settings written by someone else while the worker was down
        PrivacySettings {
            version: 7,
            enabled: false,
            ..PrivacySettings::default()
        }
        .save(&db)
        .unwrap();

        let response = process(&client, "https://example.com/").await;
        assert!(response.original);
        assert_eq!(host.activations(), 2);

        let info = client
            .send_message(MessageSender::extension(), RuntimeRequest::GetLocationInfo)
            .await
            .unwrap();
        assert_eq!(info, RuntimeResponse::LocationInfo { data: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_reload() {
        let db = Database::open_in_memory().unwrap();
        let (_host, client) = start(db.clone(), Duration::ZERO);

        let response = process(&client, "https://example.com/").await;
        assert!(!response.original);

        PrivacySettings {
            version: 3,
            enabled: false,
            ..PrivacySettings::default()
        }
        .save(&db)
        .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let response = process(&client, "https://example.com/").await;
        assert!(response.original);
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let db = Database::open_in_memory().unwrap();
        let (host, client) = start(db, Duration::ZERO);
        let mut updates = host.subscribe();

        process(&client, "https://maps.example.com/").await;

        let update = updates.recv().await.unwrap();
        assert_eq!(update.domain, "maps.example.com");
        assert_eq!(update.private, LatLng::new(11.0, 21.0));
    }
}
