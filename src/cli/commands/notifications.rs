use crate::config::Config;
use crate::db::Store;

pub async fn cmd_notifications(
    config: &Config,
    limit: u64,
    include_read: bool,
    mark_read: bool,
) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let notifications = store.get_notifications(limit, include_read).await?;

    if notifications.is_empty() {
        println!("No notifications.");
        return Ok(());
    }

    println!("Notifications (last {}):", notifications.len());
    println!("{:-<70}", "");

    for n in notifications {
        let marker = if n.is_read { " " } else { "●" };
        println!("{marker} [{}] {}", n.category, n.message);
        match &n.link {
            Some(link) => println!("  {} | {}", n.timestamp, link),
            None => println!("  {}", n.timestamp),
        }
    }

    if mark_read {
        let updated = store.mark_all_notifications_read().await?;
        println!();
        println!("{updated} notification(s) marked as read.");
    }

    Ok(())
}
