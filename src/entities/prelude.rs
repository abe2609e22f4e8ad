pub use super::blocked_users::Entity as BlockedUsers;
pub use super::invitations::Entity as Invitations;
pub use super::notifications::Entity as Notifications;
pub use super::pix_payments::Entity as PixPayments;
pub use super::scheduled_jobs::Entity as ScheduledJobs;
pub use super::short_links::Entity as ShortLinks;
pub use super::system_logs::Entity as SystemLogs;
pub use super::user_profiles::Entity as UserProfiles;
pub use super::users::Entity as Users;
