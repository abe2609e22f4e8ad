mod check;
mod init;
mod invite;
mod notifications;

pub use check::cmd_check;
pub use init::cmd_init;
pub use invite::{InviteArgs, cmd_create_invite, cmd_list_invites};
pub use notifications::cmd_notifications;
