pub mod link_shortener;
pub use link_shortener::LinkShortener;

pub mod logs;
pub use logs::LogService;

pub mod notifier;
pub use notifier::NotifierManager;

pub mod notifier_handler;
pub use notifier_handler::{NotifierError, NotifierHandler};

pub mod plex_connection;
pub use plex_connection::{PlexConnection, PlexError, ServiceStatus};

pub mod plex_users;
pub use plex_users::{PlexUser, PlexUserManager};

pub mod scheduler;
pub use scheduler::Scheduler;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthService, LoginResult, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;

pub mod invite_service;
pub mod invite_service_impl;
pub use invite_service::{
    ClaimResult, CreateInvitationRequest, CreatedInvitation, InvitationDetails, InviteError,
    InviteService,
};
pub use invite_service_impl::SeaOrmInviteService;

pub mod subscription_service;
pub mod subscription_service_impl;
pub use subscription_service::{
    ExpiringUser, RenewalRequest, SubscriptionError, SubscriptionService,
};
pub use subscription_service_impl::SeaOrmSubscriptionService;

pub mod payment_service;
pub mod payment_service_impl;
pub use payment_service::{
    CreatedCharge, Payer, PaymentError, PaymentLinkOwner, PaymentOptions, PaymentService,
};
pub use payment_service_impl::SeaOrmPaymentService;

pub mod stats_service;
pub mod stats_service_impl;
pub use stats_service::{StatsError, StatsService, Viewer};
pub use stats_service_impl::TautulliStatsService;

pub mod system_service;
pub mod system_service_impl;
pub use system_service::{SettingsUpdate, SetupRequest, SystemError, SystemService};
pub use system_service_impl::SeaOrmSystemService;
