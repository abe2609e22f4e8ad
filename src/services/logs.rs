use crate::db::Store;
use crate::domain::events::PanelEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

/// Persists bus events into the activity log shown on the admin panel.
pub struct LogService {
    store: Store,
    event_bus: broadcast::Sender<PanelEvent>,
}

/// Level and message for the activity log, or `None` for transient events.
#[must_use]
pub fn describe(event: &PanelEvent) -> Option<(&'static str, String)> {
    let entry = match event {
        PanelEvent::InviteClaimed { code, username } => (
            "success",
            format!("O utilizador {username} resgatou o convite {code}."),
        ),
        PanelEvent::SubscriptionRenewed {
            username,
            expires_at,
        } => (
            "success",
            format!("Assinatura de {username} renovada até {expires_at}."),
        ),
        PanelEvent::TrialEnded { username } => {
            ("warn", format!("O teste de {username} terminou."))
        }
        PanelEvent::UserBlocked { username, reason } => (
            "warn",
            format!("O utilizador {username} foi bloqueado ({reason})."),
        ),
        PanelEvent::UserUnblocked { username } => {
            ("info", format!("O utilizador {username} foi desbloqueado."))
        }
        PanelEvent::UserRemoved { username } => {
            ("warn", format!("O utilizador {username} foi removido do servidor."))
        }
        PanelEvent::ScreenLimitChanged { username, screens } => (
            "info",
            format!("Limite de telas de {username} alterado para {screens}."),
        ),
        PanelEvent::PaymentConfirmed {
            txid,
            username,
            value,
        } => (
            "success",
            format!("Pagamento {txid} de {username} (R$ {value:.2}) confirmado."),
        ),
        PanelEvent::SettingsUpdated => ("info", "Configurações atualizadas.".to_string()),
        PanelEvent::JobFailed { job_name, message } => {
            ("error", format!("A tarefa {job_name} falhou: {message}"))
        }
        PanelEvent::Info { message } => ("info", message.clone()),
        PanelEvent::Error { message } => ("error", message.clone()),
        PanelEvent::Dashboard { .. } => return None,
    };
    Some(entry)
}

impl LogService {
    #[must_use]
    pub const fn new(store: Store, event_bus: broadcast::Sender<PanelEvent>) -> Self {
        Self { store, event_bus }
    }

    pub fn start_listener(self: Arc<Self>) {
        let mut rx = self.event_bus.subscribe();
        let service = self;

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        metrics::counter!("panel_events_total", "event" => event.name())
                            .increment(1);
                        if let Err(e) = service.handle_event(&event).await {
                            error!(error = %e, "Failed to save log");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        error!(count, "Log listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Log listener event bus closed");
                        break;
                    }
                }
            }
        });
    }

    async fn handle_event(&self, event: &PanelEvent) -> anyhow::Result<()> {
        let Some((level, message)) = describe(event) else {
            return Ok(());
        };
        let details = match event {
            PanelEvent::Info { .. } | PanelEvent::Error { .. } | PanelEvent::SettingsUpdated => None,
            _ => Some(serde_json::to_string(event)?),
        };

        self.store
            .add_log(event.name(), level, &message, details)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockReason, DashboardSummary};

    #[test]
    fn dashboard_ticks_are_not_logged() {
        let tick = PanelEvent::Dashboard {
            summary: DashboardSummary::default(),
        };
        assert!(describe(&tick).is_none());
    }

    #[test]
    fn block_events_are_warnings() {
        let (level, message) = describe(&PanelEvent::UserBlocked {
            username: "ana".to_string(),
            reason: BlockReason::TrialExpired,
        })
        .unwrap();
        assert_eq!(level, "warn");
        assert!(message.contains("trial_expired"));
    }

    #[tokio::test]
    async fn listener_persists_events() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let (tx, _) = broadcast::channel(8);
        let service = LogService::new(store.clone(), tx.clone());

        service
            .handle_event(&PanelEvent::PaymentConfirmed {
                txid: "tx1".to_string(),
                username: "ana".to_string(),
                value: 18.0,
            })
            .await
            .unwrap();

        let logs = store.get_recent_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, "PaymentConfirmed");
        assert_eq!(logs[0].level, "success");
    }
}
