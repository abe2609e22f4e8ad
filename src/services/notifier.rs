//! User-facing notices over Telegram, a generic webhook and Discord.
//!
//! Templates use `{placeholder}` markers. Webhook and Discord templates are
//! JSON documents once filled in. Delivery failures are logged and never
//! surface to the caller.

use chrono::{DateTime, Local, Timelike};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::link_shortener::LinkShortener;
use super::plex_users::PlexUser;
use crate::clients::messaging::{DiscordClient, TelegramClient, WebhookClient};
use crate::config::{Config, MessageTemplates};
use crate::db::{Store, UserProfile};
use crate::domain::time::{format_date_br, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Expiration,
    Renewal,
    TrialEnd,
}

impl Event {
    const fn name(self) -> &'static str {
        match self {
            Self::Expiration => "expiration",
            Self::Renewal => "renewal",
            Self::TrialEnd => "trial_end",
        }
    }

    fn template(self, templates: &MessageTemplates) -> &str {
        match self {
            Self::Expiration => &templates.expiration_template,
            Self::Renewal => &templates.renewal_template,
            Self::TrialEnd => &templates.trial_end_template,
        }
    }
}

#[must_use]
pub const fn greeting(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Bom dia",
        12..=17 => "Boa tarde",
        _ => "Boa noite",
    }
}

/// Replaces every `{key}` marker with its value.
#[must_use]
pub fn fill_template(template: &str, placeholders: &BTreeMap<&str, String>) -> String {
    placeholders
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{key}}}"), value)
        })
}

/// Fills a JSON template, escaping values so they stay valid inside strings.
pub fn fill_json_template(
    template: &str,
    placeholders: &BTreeMap<&str, String>,
) -> serde_json::Result<Value> {
    let escaped: BTreeMap<&str, String> = placeholders
        .iter()
        .map(|(k, v)| {
            let quoted = Value::String(v.clone()).to_string();
            (*k, quoted[1..quoted.len() - 1].to_string())
        })
        .collect();
    serde_json::from_str(&fill_template(template, &escaped))
}

pub struct NotifierManager {
    config: Arc<RwLock<Config>>,
    store: Store,
    link_shortener: Arc<LinkShortener>,
    telegram: TelegramClient,
    webhook: WebhookClient,
    discord: DiscordClient,
}

impl NotifierManager {
    #[must_use]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        link_shortener: Arc<LinkShortener>,
    ) -> Self {
        Self {
            config,
            store,
            link_shortener,
            telegram: TelegramClient::new(http.clone()),
            webhook: WebhookClient::new(http.clone()),
            discord: DiscordClient::new(http),
        }
    }

    pub async fn send_expiration(&self, user: &PlexUser, profile: &UserProfile, days_left: i64) {
        let date = profile
            .expiration_date
            .as_deref()
            .and_then(parse_timestamp)
            .map(|dt| format_date_br(&dt))
            .unwrap_or_default();
        let context = [("days", days_left.to_string()), ("date", date)];
        self.prepare_and_send(Event::Expiration, user, profile, &context)
            .await;
    }

    pub async fn send_renewal(
        &self,
        user: &PlexUser,
        profile: &UserProfile,
        new_date: &DateTime<Local>,
    ) {
        let date = format_date_br(new_date);
        let context = [("new_date", date.clone()), ("date", date)];
        self.prepare_and_send(Event::Renewal, user, profile, &context)
            .await;
    }

    pub async fn send_trial_end(&self, user: &PlexUser, profile: &UserProfile) {
        self.prepare_and_send(Event::TrialEnd, user, profile, &[])
            .await;
    }

    /// Public payment page for `username`, shortened when enabled.
    pub async fn payment_link(&self, username: &str) -> String {
        let (base_url, shorten) = {
            let config = self.config.read().await;
            (
                config.app.base_url().to_string(),
                config.payments.enable_link_shortener,
            )
        };
        if base_url.is_empty() {
            return String::new();
        }

        let token = match self.store.ensure_payment_token(username).await {
            Ok(token) => token,
            Err(e) => {
                error!(username, error = %e, "Failed to create payment token");
                return String::new();
            }
        };
        let link = format!("{base_url}/pay/{token}");
        if !shorten {
            return link;
        }
        match self.link_shortener.create_short_link(&link).await {
            Ok(short) => short,
            Err(e) => {
                warn!(username, error = %e, "Link shortener failed, using full link");
                link
            }
        }
    }

    async fn prepare_and_send(
        &self,
        event: Event,
        user: &PlexUser,
        profile: &UserProfile,
        context: &[(&'static str, String)],
    ) {
        let config = self.config.read().await.clone();
        let request_id = Uuid::new_v4();

        let mut placeholders: BTreeMap<&str, String> = BTreeMap::new();
        placeholders.insert("username", user.username.clone());
        placeholders.insert(
            "name",
            profile
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| user.username.clone()),
        );
        placeholders.insert("email", user.email.clone());
        placeholders.insert("greeting", greeting(Local::now().hour()).to_string());
        placeholders.insert("telegram_user", profile.telegram_user.clone().unwrap_or_default());
        placeholders.insert("phone_number", profile.phone_number.clone().unwrap_or_default());
        placeholders.insert(
            "discord_user_id",
            profile.discord_user_id.clone().unwrap_or_default(),
        );
        placeholders.insert("payment_link", self.payment_link(&user.username).await);
        for (key, value) in context {
            placeholders.insert(key, value.clone());
        }
        debug!(%request_id, event = event.name(), ?placeholders, "Notification placeholders");

        let notifications = &config.notifications;

        if notifications.telegram.enabled {
            let template = event.template(&notifications.telegram.templates);
            match profile.telegram_user.as_deref().filter(|t| !t.is_empty()) {
                Some(chat_id) if !template.is_empty() => {
                    let text = fill_template(template, &placeholders);
                    info!(%request_id, chat_id, "Sending Telegram notification");
                    let result = self
                        .telegram
                        .send_message(&notifications.telegram.bot_token, chat_id, &text)
                        .await;
                    record("telegram", &request_id, result);
                }
                Some(_) => {}
                None => warn!(
                    %request_id,
                    username = %user.username,
                    "Telegram notice skipped, profile has no Telegram id"
                ),
            }
        }

        if notifications.webhook.enabled {
            let template = event.template(&notifications.webhook.templates);
            let has_phone = profile.phone_number.as_deref().is_some_and(|p| !p.is_empty());
            if !has_phone {
                warn!(
                    %request_id,
                    username = %user.username,
                    "Webhook notice skipped, profile has no phone number"
                );
            } else if !template.is_empty() {
                match fill_json_template(template, &placeholders) {
                    Ok(payload) => {
                        info!(%request_id, url = %notifications.webhook.url, "Sending webhook notification");
                        let result = self
                            .webhook
                            .post_json(
                                &notifications.webhook.url,
                                &payload,
                                &notifications.webhook.authorization_header,
                            )
                            .await;
                        record("webhook", &request_id, result);
                    }
                    Err(e) => error!(
                        %request_id,
                        event = event.name(),
                        error = %e,
                        "Webhook template is not valid JSON"
                    ),
                }
            }
        }

        if notifications.discord.enabled && !notifications.discord.webhook_url.is_empty() {
            let template = event.template(&notifications.discord.templates);
            match fill_json_template(template, &placeholders) {
                Ok(payload) => {
                    info!(%request_id, "Sending Discord notification");
                    let result = self
                        .discord
                        .post_json(&notifications.discord.webhook_url, &payload)
                        .await;
                    record("discord", &request_id, result);
                }
                Err(e) => error!(
                    %request_id,
                    event = event.name(),
                    error = %e,
                    "Discord template is not valid JSON"
                ),
            }
        }
    }
}

fn record(channel: &'static str, request_id: &Uuid, result: anyhow::Result<()>) {
    match result {
        Ok(()) => {
            metrics::counter!("notifications_sent_total", "channel" => channel, "outcome" => "success")
                .increment(1);
            info!(%request_id, channel, "Notification delivered");
        }
        Err(e) => {
            metrics::counter!("notifications_sent_total", "channel" => channel, "outcome" => "failure")
                .increment(1);
            error!(%request_id, channel, error = %e, "Notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders() -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("username", "ana".to_string()),
            ("days", "2".to_string()),
            ("payment_link", "https://p.example/s/abc1234".to_string()),
        ])
    }

    #[test]
    fn greeting_follows_the_local_hour() {
        assert_eq!(greeting(5), "Bom dia");
        assert_eq!(greeting(11), "Bom dia");
        assert_eq!(greeting(12), "Boa tarde");
        assert_eq!(greeting(17), "Boa tarde");
        assert_eq!(greeting(18), "Boa noite");
        assert_eq!(greeting(3), "Boa noite");
    }

    #[test]
    fn text_templates_replace_known_markers_only() {
        let text = fill_template(
            "Olá {username}, faltam {days} dias. {payment_link} {unknown}",
            &placeholders(),
        );
        assert_eq!(
            text,
            "Olá ana, faltam 2 dias. https://p.example/s/abc1234 {unknown}"
        );
    }

    #[test]
    fn json_templates_escape_values() {
        let mut values = placeholders();
        values.insert("username", "a\"na".to_string());
        let payload =
            fill_json_template(r#"{"content": "{username} expira em {days}"}"#, &values).unwrap();
        assert_eq!(payload["content"], "a\"na expira em 2");
    }

    #[test]
    fn broken_json_templates_are_rejected() {
        assert!(fill_json_template("{\"content\": {username}", &placeholders()).is_err());
    }
}
