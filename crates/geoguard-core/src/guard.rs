//! Main GeoGuard container

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use geoguard_geolocation::{GeolocationInterceptor, NativeGeolocation};
use geoguard_privacy::{BackgroundHost, HttpProtectionClient, ProtectionService};
use geoguard_relay::{
    LocationUpdate, MessageSender, PageBus, RelayBridge, RuntimeClient, RuntimeRequest,
    RuntimeResponse,
};
use geoguard_storage::Database;

use crate::config::Config;
use crate::Result;

/// One running instance: a background host and the pages attached to it.
///
/// Must be created from within a tokio runtime.
pub struct GeoGuard {
    config: Config,
    host: BackgroundHost,
    runtime: RuntimeClient,
}

impl GeoGuard {
    /// Open the settings database at the configured path and start.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;

        Self::with_database(config, db)
    }

    /// Start against an already open database, talking to the configured
    /// protection service over HTTP.
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let service = HttpProtectionClient::new(&config.service_url()?, config.service_timeout())?;
        Ok(Self::with_service(config, db, Arc::new(service)))
    }

    pub fn with_service(config: Config, db: Database, service: Arc<dyn ProtectionService>) -> Self {
        let (host, runtime) = BackgroundHost::start(db.clone(), service, config.host_options());

        tracing::info!(
            service_endpoint = %config.service_endpoint,
            relay_timeout_ms = config.relay_timeout_ms,
            "GeoGuard started"
        );

        Self {
            config,
            host,
            runtime,
        }
    }

    /// Attach a page at `url` whose real location comes from `native`.
    pub fn open_page(&self, url: &str, native: Arc<dyn NativeGeolocation>) -> Page {
        let id = Uuid::new_v4();
        let bus = PageBus::new();

        let bridge = RelayBridge::new(
            bus.clone(),
            self.runtime.clone(),
            MessageSender::page(id, url),
        )
        .spawn();
        let geolocation =
            GeolocationInterceptor::new(bus.clone(), native, self.config.interceptor_options());

        tracing::debug!(page_id = %id, url = %url, "Page opened");

        Page {
            id,
            url: url.to_string(),
            bus,
            geolocation,
            bridge,
        }
    }

    /// Send a settings or query message as the extension itself.
    pub async fn request(&self, request: RuntimeRequest) -> Result<RuntimeResponse> {
        Ok(self
            .runtime
            .send_message(MessageSender::extension(), request)
            .await?)
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<LocationUpdate> {
        self.host.subscribe()
    }

    /// Kill the privileged worker. The next message reactivates it.
    pub fn terminate_background(&self) {
        self.host.terminate();
    }

    pub fn host(&self) -> &BackgroundHost {
        &self.host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for GeoGuard {
    fn drop(&mut self) {
        self.host.shutdown();
    }
}

/// A page context: its bus, relay bridge and geolocation API.
pub struct Page {
    id: Uuid,
    url: String,
    bus: PageBus,
    geolocation: GeolocationInterceptor,
    bridge: JoinHandle<()>,
}

impl Page {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The page's message bus, shared with any script on the page.
    pub fn bus(&self) -> &PageBus {
        &self.bus
    }

    pub fn geolocation(&self) -> &GeolocationInterceptor {
        &self.geolocation
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.bridge.abort();
        tracing::debug!(page_id = %self.id, "Page closed");
    }
}
