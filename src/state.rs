use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::clients::plex_tv::PlexTvClient;
use crate::config::Config;
use crate::db::Store;
use crate::domain::events::PanelEvent;
use crate::services::{
    AuthService, InviteService, LinkShortener, LogService, NotifierHandler, NotifierManager,
    PaymentService, PlexConnection, PlexUserManager, Scheduler, SeaOrmAuthService,
    SeaOrmInviteService, SeaOrmPaymentService, SeaOrmSubscriptionService, SeaOrmSystemService,
    StatsService, SubscriptionService, SystemService, TautulliStatsService,
};

/// One pooled client for every outbound integration.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent(concat!("plexpanel/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub http: reqwest::Client,

    pub event_bus: broadcast::Sender<PanelEvent>,

    pub plex: Arc<PlexConnection>,

    pub plex_users: Arc<PlexUserManager>,

    pub notifier_handler: Arc<NotifierHandler>,

    pub notifier: Arc<NotifierManager>,

    pub link_shortener: Arc<LinkShortener>,

    pub scheduler: Arc<Scheduler>,

    pub log_service: Arc<LogService>,

    pub auth_service: Arc<dyn AuthService>,

    pub invite_service: Arc<dyn InviteService>,

    pub subscription_service: Arc<dyn SubscriptionService>,

    pub payment_service: Arc<dyn PaymentService>,

    pub stats_service: Arc<dyn StatsService>,

    pub system_service: Arc<dyn SystemService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size);
        Self::with_event_bus(config, event_bus).await
    }

    #[allow(clippy::too_many_lines)]
    pub async fn with_event_bus(
        config: Config,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let http = build_shared_http_client(config.general.http_timeout_seconds)?;
        let plex_tv = PlexTvClient::new(http.clone(), &config.app.title);
        let config = Arc::new(RwLock::new(config));

        // The scheduler only needs the store; jobs reach the other services
        // through the runner started in `Scheduler::start`.
        let scheduler = Arc::new(Scheduler::new(store.clone()).await?);

        let log_service = Arc::new(LogService::new(store.clone(), event_bus.clone()));
        log_service.clone().start_listener();

        let plex = Arc::new(PlexConnection::new(http.clone(), plex_tv));
        let notifier_handler = Arc::new(NotifierHandler::new(
            config.clone(),
            store.clone(),
            http.clone(),
            event_bus.clone(),
        ));
        let plex_users = Arc::new(PlexUserManager::new(
            plex.clone(),
            config.clone(),
            store.clone(),
            http.clone(),
            notifier_handler.clone(),
            scheduler.clone(),
            event_bus.clone(),
        ));
        let link_shortener = Arc::new(LinkShortener::new(store.clone(), config.clone()));
        let notifier = Arc::new(NotifierManager::new(
            config.clone(),
            store.clone(),
            http.clone(),
            link_shortener.clone(),
        ));

        let auth_service = Arc::new(SeaOrmAuthService::new(store.clone(), config.clone()))
            as Arc<dyn AuthService>;

        let subscription_service = Arc::new(SeaOrmSubscriptionService::new(
            config.clone(),
            store.clone(),
            scheduler.clone(),
            notifier_handler.clone(),
            notifier.clone(),
            plex_users.clone(),
            event_bus.clone(),
        )) as Arc<dyn SubscriptionService>;

        let invite_service = Arc::new(SeaOrmInviteService::new(
            config.clone(),
            store.clone(),
            http.clone(),
            plex.clone(),
            plex_users.clone(),
            notifier_handler.clone(),
            scheduler.clone(),
            event_bus.clone(),
        )) as Arc<dyn InviteService>;

        let payment_service = Arc::new(SeaOrmPaymentService::new(
            config.clone(),
            store.clone(),
            http.clone(),
            plex_users.clone(),
            notifier_handler.clone(),
            notifier.clone(),
            subscription_service.clone(),
            event_bus.clone(),
        )) as Arc<dyn PaymentService>;

        let stats_service = Arc::new(TautulliStatsService::new(
            config.clone(),
            store.clone(),
            http.clone(),
            plex_users.clone(),
        )) as Arc<dyn StatsService>;

        let system_service = Arc::new(SeaOrmSystemService::new(
            config.clone(),
            store.clone(),
            http.clone(),
            plex.clone(),
            plex_users.clone(),
            scheduler.clone(),
            payment_service.clone(),
            event_bus.clone(),
        )) as Arc<dyn SystemService>;

        Ok(Self {
            config,
            store,
            http,
            event_bus,
            plex,
            plex_users,
            notifier_handler,
            notifier,
            link_shortener,
            scheduler,
            log_service,
            auth_service,
            invite_service,
            subscription_service,
            payment_service,
            stats_service,
            system_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
