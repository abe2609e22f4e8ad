pub mod prelude;

pub mod blocked_users;
pub mod invitations;
pub mod notifications;
pub mod pix_payments;
pub mod scheduled_jobs;
pub mod short_links;
pub mod system_logs;
pub mod user_profiles;
pub mod users;
