pub mod blocked;
pub mod invitation;
pub mod logs;
pub mod notification;
pub mod payment;
pub mod profile;
pub mod scheduled_job;
pub mod short_link;
pub mod user;
