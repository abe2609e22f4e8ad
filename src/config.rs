use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Placeholder returned instead of secrets by the settings API.
pub const SECRET_MASK: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,

    pub app: AppConfig,

    pub plex: PlexConfig,

    pub tautulli: TautulliConfig,

    pub scheduler: SchedulerConfig,

    pub notifications: NotificationsConfig,

    pub payments: PaymentsConfig,

    pub overseerr: OverseerrConfig,

    pub achievements: AchievementsConfig,

    /// File the config was read from. Configs built in memory are never persisted.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,
    pub log_level: String,
    /// Silence noisy reqwest/hyper connection errors in the log filter.
    pub suppress_connection_errors: bool,
    pub event_bus_buffer_size: usize,
    /// Tokio worker threads, 0 lets tokio decide.
    pub worker_threads: usize,
    pub max_db_connections: u32,
    pub min_db_connections: u32,
    pub http_timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/plexpanel.db".to_string(),
            log_level: "info".to_string(),
            suppress_connection_errors: true,
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
            http_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5000,
            cors_allowed_origins: vec!["*".to_string()],
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB.
    pub argon2_memory_cost_kib: u32,
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub loki_enabled: bool,
    pub loki_url: String,
    pub loki_labels: BTreeMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    /// Public URL used to build invite, payment and short links.
    pub base_url: String,
    /// Plex username that is granted the admin role on Plex login.
    pub admin_user: String,
    pub is_configured: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Painel Plex".to_string(),
            base_url: String::new(),
            admin_user: String::new(),
            is_configured: false,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlexConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TautulliConfig {
    pub url: String,
    pub api_key: String,
    pub blocking_notifier_id: i64,
    pub screen_limit_notifier_id: i64,
    pub trial_block_notifier_id: i64,
}

impl TautulliConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Daily time (HH:MM, local) of the expiration notification sweep.
    pub expiration_notification_time: String,
    pub block_removal_time: String,
    pub cleanup_time: String,
    pub days_to_notify_expiration: i64,
    /// Blocked users are removed from Plex after this many days, 0 disables removal.
    pub days_to_remove_blocked_user: i64,
    pub cleanup_pending_payments_enabled: bool,
    pub cleanup_pending_payments_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiration_notification_time: "09:00".to_string(),
            block_removal_time: "02:00".to_string(),
            cleanup_time: "03:00".to_string(),
            days_to_notify_expiration: 2,
            days_to_remove_blocked_user: 0,
            cleanup_pending_payments_enabled: true,
            cleanup_pending_payments_days: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
    pub webhook: WebhookConfig,
    pub discord: DiscordConfig,
}

/// Message templates for the three notification events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplates {
    pub expiration_template: String,
    pub renewal_template: String,
    pub trial_end_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    pub templates: MessageTemplates,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            templates: MessageTemplates {
                expiration_template: "Atenção: O acesso de {username} expira em {days} dias. Para renovar, acesse: {payment_link}".to_string(),
                renewal_template: "✅ Olá {username}! A sua subscrição foi renovada com sucesso. O seu novo vencimento é em {new_date}.".to_string(),
                trial_end_template: "Seu período de teste para {username} terminou. Para continuar com o acesso, renove sua assinatura em: {payment_link}".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    /// Either `Header-Name: value` or a raw `Authorization` value.
    pub authorization_header: String,
    pub templates: MessageTemplates,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            authorization_header: String::new(),
            templates: MessageTemplates {
                expiration_template: r#"{"content": "Atenção: O acesso de {username} expira em {days} dias. Para renovar, acesse: {payment_link}"}"#.to_string(),
                renewal_template: r#"{"content": "✅ A subscrição de {username} foi renovada. Novo vencimento: {new_date}."}"#.to_string(),
                trial_end_template: r#"{"content": "O período de teste para {username} terminou. Para renovar, acesse: {payment_link}"}"#.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub templates: MessageTemplates,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            templates: MessageTemplates {
                expiration_template: r#"{"content": "<@{discord_user_id}>", "embeds": [{"title": "Aviso de Vencimento", "description": "Olá **{username}**! 👋\n\nO seu acesso ao Plex está prestes a expirar em **{days} dia(s)**, no dia **{date}**.\n\nPara evitar a interrupção do serviço, por favor, [clique aqui para renovar]({payment_link}).", "color": 16776960}]}"#.to_string(),
                renewal_template: r#"{"content": "<@{discord_user_id}>", "embeds": [{"title": "Renovação Confirmada!", "description": "Olá **{username}**! ✅\n\nA sua assinatura foi renovada com sucesso. O seu novo vencimento é em **{new_date}**.\n\nObrigado e aproveite!", "color": 65280}]}"#.to_string(),
                trial_end_template: r#"{"content": "<@{discord_user_id}>", "embeds": [{"title": "Período de Teste Terminou", "description": "Olá **{username}**! ⌛\n\nO seu período de teste gratuito terminou. Para continuar a ter acesso, por favor, [clique aqui para renovar]({payment_link}).", "color": 16711680}]}"#.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Monthly price used when no per-screen price applies.
    pub renewal_price: f64,
    pub enable_link_shortener: bool,
    /// Days after blocking during which the public payment link still works.
    pub payment_link_grace_period_days: i64,
    /// Monthly price keyed by screen count ("1".."4").
    pub screen_prices: BTreeMap<String, f64>,
    pub efi: EfiConfig,
    pub mercadopago: MercadoPagoConfig,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        let screen_prices = [("1", 10.0), ("2", 18.0), ("3", 25.0), ("4", 30.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            renewal_price: 10.0,
            enable_link_shortener: true,
            payment_link_grace_period_days: 7,
            screen_prices,
            efi: EfiConfig::default(),
            mercadopago: MercadoPagoConfig::default(),
        }
    }
}

impl PaymentsConfig {
    /// Monthly price for a user holding `screens` screens.
    #[must_use]
    pub fn monthly_price(&self, screens: i32) -> f64 {
        if screens > 0 {
            if let Some(price) = self.screen_prices.get(&screens.to_string()) {
                return *price;
            }
        }
        self.renewal_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EfiConfig {
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: String,
    /// PEM file holding the client certificate and its private key.
    pub certificate: String,
    pub sandbox: bool,
    pub pix_key: String,
}

impl Default for EfiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: String::new(),
            client_secret: String::new(),
            certificate: "certs/efi.pem".to_string(),
            sandbox: true,
            pix_key: String::new(),
        }
    }
}

impl EfiConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.certificate.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MercadoPagoConfig {
    pub enabled: bool,
    pub access_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerrConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementTiers {
    pub bronze: u32,
    pub silver: u32,
    pub gold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementsConfig {
    pub movie_marathon: AchievementTiers,
    pub series_binger: AchievementTiers,
    pub time_traveler: AchievementTiers,
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self {
            movie_marathon: AchievementTiers {
                bronze: 5,
                silver: 10,
                gold: 20,
            },
            series_binger: AchievementTiers {
                bronze: 20,
                silver: 50,
                gold: 100,
            },
            time_traveler: AchievementTiers {
                bronze: 3,
                silver: 5,
                gold: 7,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
            app: AppConfig::default(),
            plex: PlexConfig::default(),
            tautulli: TautulliConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationsConfig::default(),
            payments: PaymentsConfig::default(),
            overseerr: OverseerrConfig::default(),
            achievements: AchievementsConfig::default(),
            source_path: None,
        }
    }
}

/// Parses a `HH:MM` daily time.
pub fn parse_daily_time(value: &str) -> Result<(u32, u32)> {
    let (hour, minute) = value
        .split_once(':')
        .with_context(|| format!("Invalid time '{value}', expected HH:MM"))?;
    let hour: u32 = hour.trim().parse().with_context(|| format!("Invalid hour in '{value}'"))?;
    let minute: u32 = minute
        .trim()
        .get(..2)
        .unwrap_or(minute)
        .parse()
        .with_context(|| format!("Invalid minute in '{value}'"))?;
    if hour > 23 || minute > 59 {
        anyhow::bail!("Time out of range: '{value}'");
    }
    Ok((hour, minute))
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self {
            source_path: Some(Self::default_config_path()),
            ..Self::default()
        })
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.source_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Writes the config back to the file it came from.
    pub fn save(&self) -> Result<()> {
        match &self.source_path {
            Some(path) => self.save_to_path(path),
            None => {
                info!("Config has no backing file, keeping changes in memory");
                Ok(())
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("plexpanel").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".plexpanel").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.enabled && self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        for time in [
            &self.scheduler.expiration_notification_time,
            &self.scheduler.block_removal_time,
            &self.scheduler.cleanup_time,
        ] {
            parse_daily_time(time)?;
        }

        for (screens, price) in &self.payments.screen_prices {
            match screens.parse::<u8>() {
                Ok(1..=4) => {}
                _ => anyhow::bail!("Screen price key must be between 1 and 4, got '{screens}'"),
            }
            if *price < 0.0 {
                anyhow::bail!("Price for {screens} screen(s) cannot be negative");
            }
        }

        if self.payments.renewal_price < 0.0 {
            anyhow::bail!("Renewal price cannot be negative");
        }

        if self.observability.loki_enabled {
            url::Url::parse(&self.observability.loki_url).context("Invalid Loki URL")?;
        }

        Ok(())
    }

    /// Copy of the config safe to hand to the settings UI.
    #[must_use]
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for secret in masked.secrets_mut() {
            if !secret.is_empty() {
                *secret = SECRET_MASK.to_string();
            }
        }
        masked
    }

    /// Replaces masked secrets in `self` with the values from `current`.
    pub fn restore_masked_secrets(&mut self, current: &Self) {
        let mut current = current.clone();
        for (incoming, existing) in self.secrets_mut().into_iter().zip(current.secrets_mut()) {
            if incoming == SECRET_MASK {
                *incoming = std::mem::take(existing);
            }
        }
    }

    fn secrets_mut(&mut self) -> [&mut String; 6] {
        [
            &mut self.plex.token,
            &mut self.tautulli.api_key,
            &mut self.payments.efi.client_secret,
            &mut self.payments.mercadopago.access_token,
            &mut self.overseerr.api_key,
            &mut self.notifications.telegram.bot_token,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.expiration_notification_time, "09:00");
        assert_eq!(config.scheduler.days_to_notify_expiration, 2);
        assert!((config.payments.renewal_price - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.payments.screen_prices.len(), 4);
        assert_eq!(config.achievements.series_binger.gold, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[tautulli]"));
        assert!(toml_str.contains("[notifications.telegram]"));
        assert!(toml_str.contains("[payments.screen_prices]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [scheduler]
            cleanup_time = "04:30"

            [payments.screen_prices]
            "2" = 20.0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.scheduler.cleanup_time, "04:30");
        assert_eq!(config.scheduler.block_removal_time, "02:00");
        assert_eq!(config.payments.screen_prices.len(), 1);
        assert!((config.payments.monthly_price(2) - 20.0).abs() < f64::EPSILON);
        assert!((config.payments.monthly_price(3) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_time_and_screens() {
        let mut config = Config::default();
        config.scheduler.cleanup_time = "25:00".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.payments.screen_prices.insert("7".to_string(), 5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_daily_time() {
        assert_eq!(parse_daily_time("09:05").unwrap(), (9, 5));
        assert_eq!(parse_daily_time("23:59:00").unwrap(), (23, 59));
        assert!(parse_daily_time("9h").is_err());
    }

    #[test]
    fn test_mask_and_restore_secrets() {
        let mut config = Config::default();
        config.plex.token = "plex-secret".to_string();
        config.tautulli.api_key = "tautulli-secret".to_string();

        let masked = config.masked();
        assert_eq!(masked.plex.token, SECRET_MASK);
        assert_eq!(masked.overseerr.api_key, "");

        let mut incoming = masked;
        incoming.tautulli.api_key = "new-key".to_string();
        incoming.restore_masked_secrets(&config);
        assert_eq!(incoming.plex.token, "plex-secret");
        assert_eq!(incoming.tautulli.api_key, "new-key");
    }
}
