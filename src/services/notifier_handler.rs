//! Screen limits and blocks enforced through Tautulli notifier conditions.
//!
//! Tautulli has no API to edit a single condition, so every change fetches
//! the whole notifier config, edits `custom_conditions` locally and writes
//! the full config back. One mutex serialises these cycles so two
//! concurrent edits can never overwrite each other.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

use crate::clients::tautulli::{TautulliClient, form_value};
use crate::config::Config;
use crate::db::Store;
use crate::domain::events::PanelEvent;
use crate::domain::{BlockAction, BlockReason, NotifierKind};

/// Placeholder Tautulli needs in an otherwise empty `user_email` list.
const EMPTY_MARKER: &str = "~";

const TRIGGERS: [&str; 15] = [
    "on_play",
    "on_pause",
    "on_resume",
    "on_stop",
    "on_watched",
    "on_created",
    "on_newdevice",
    "on_concurrent",
    "on_buffer",
    "on_intup",
    "on_intdown",
    "on_extup",
    "on_extdown",
    "on_pmsupdate",
    "on_plexpyupdate",
];

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("{0}")]
    NotConfigured(String),

    #[error("{0}")]
    ConditionMissing(String),

    #[error("Tautulli: {0}")]
    Tautulli(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for NotifierError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for NotifierError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().map(form_value).collect(),
        Value::Null => Vec::new(),
        other => vec![form_value(&other)],
    })
}

/// One entry of a notifier's `custom_conditions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub parameter: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default, deserialize_with = "string_list")]
    pub value: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Condition {
    fn new(parameter: &str, operator: &str, value: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            operator: operator.to_string(),
            value: vec![value.to_string()],
            extra: Map::new(),
        }
    }

    fn is_email_list(&self) -> bool {
        self.parameter == "user_email"
    }

    fn set_emails(&mut self, emails: BTreeSet<String>) {
        self.value = if emails.is_empty() {
            vec![EMPTY_MARKER.to_string()]
        } else {
            emails.into_iter().collect()
        };
    }

    fn emails(&self) -> BTreeSet<String> {
        self.value
            .iter()
            .filter(|v| v.as_str() != EMPTY_MARKER)
            .cloned()
            .collect()
    }
}

/// Reads `custom_conditions`, which Tautulli returns either as a list or as JSON text.
pub fn parse_conditions(config: &Map<String, Value>) -> Result<Vec<Condition>, NotifierError> {
    let raw = match config.get("custom_conditions") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(text)) => serde_json::from_str(text)
            .map_err(|e| NotifierError::Tautulli(format!("custom_conditions inválido: {e}")))?,
        Some(other) => other.clone(),
    };
    serde_json::from_value(raw)
        .map_err(|e| NotifierError::Tautulli(format!("custom_conditions inválido: {e}")))
}

/// Flattens a notifier config into the form `set_notifier_config` accepts.
pub fn build_save_body(
    config: &Map<String, Value>,
    conditions: &[Condition],
) -> Result<Vec<(String, String)>, NotifierError> {
    let mut fields: Map<String, Value> = config
        .iter()
        .filter(|(k, _)| k.as_str() != "config" && k.as_str() != "custom_conditions")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(Value::Object(agent)) = config.get("config") {
        for (k, v) in agent {
            fields.insert(k.clone(), v.clone());
        }
    }

    for (from, to) in [
        ("script", "scripts_script"),
        ("script_folder", "scripts_script_folder"),
        ("timeout", "scripts_timeout"),
    ] {
        if let Some(v) = fields.remove(from) {
            fields.insert(to.to_string(), v);
        }
    }

    let conditions = serde_json::to_string(conditions)
        .map_err(|e| NotifierError::Internal(e.to_string()))?;
    fields.insert("custom_conditions".to_string(), Value::String(conditions));

    Ok(fields
        .iter()
        .map(|(k, v)| (k.clone(), form_value(v)))
        .collect())
}

/// Removes `email` from every list, then adds it to the list gated on `screens`.
pub fn assign_screen_limit(
    conditions: &mut [Condition],
    email: &str,
    screens: i32,
) -> Result<(), NotifierError> {
    for condition in conditions.iter_mut().filter(|c| c.is_email_list()) {
        let mut emails = condition.emails();
        emails.remove(email);
        condition.set_emails(emails);
    }

    if screens <= 0 {
        return Ok(());
    }

    let index = screen_slot(conditions, screens).ok_or_else(|| {
        NotifierError::ConditionMissing(format!(
            "Condição para {screens} tela(s) não encontrada na configuração do Tautulli."
        ))
    })?;
    let mut emails = conditions[index].emails();
    emails.insert(email.to_string());
    conditions[index].set_emails(emails);
    Ok(())
}

/// Resets every list, then places all `emails` in the list gated on `screens`.
pub fn assign_all_screen_limits(
    conditions: &mut [Condition],
    emails: &[String],
    screens: i32,
) -> Result<(), NotifierError> {
    for condition in conditions.iter_mut().filter(|c| c.is_email_list()) {
        condition.set_emails(BTreeSet::new());
    }

    if screens <= 0 {
        return Ok(());
    }

    let index = screen_slot(conditions, screens).ok_or_else(|| {
        NotifierError::ConditionMissing(format!(
            "Condição para {screens} tela(s) não encontrada."
        ))
    })?;
    conditions[index].set_emails(emails.iter().cloned().collect());
    Ok(())
}

/// Index of the `user_email` condition that follows `user_streams == [screens]`.
fn screen_slot(conditions: &[Condition], screens: i32) -> Option<usize> {
    let wanted = [screens.to_string()];
    conditions.windows(2).position(|pair| {
        pair[0].parameter == "user_streams" && pair[0].value == wanted && pair[1].is_email_list()
    })
    .map(|i| i + 1)
}

/// Adds or removes `email` in the first `user_email` condition.
pub fn toggle_block(
    conditions: &mut [Condition],
    email: &str,
    action: BlockAction,
) -> Result<(), NotifierError> {
    let condition = conditions
        .iter_mut()
        .find(|c| c.is_email_list())
        .ok_or_else(|| {
            NotifierError::ConditionMissing(
                "Condição 'user_email' não encontrada na configuração do notificador.".to_string(),
            )
        })?;

    let mut emails = condition.emails();
    match action {
        BlockAction::Add => {
            emails.insert(email.to_string());
        }
        BlockAction::Remove => {
            emails.remove(email);
        }
    }
    condition.set_emails(emails);
    Ok(())
}

/// Conditions, logic and trigger text installed by auto-configuration.
#[derive(Debug, Clone)]
pub struct NotifierTemplate {
    pub friendly_name: &'static str,
    pub conditions: Vec<Condition>,
    pub logic: &'static str,
    pub on_play_subject: &'static str,
}

#[must_use]
pub fn notifier_template(kind: NotifierKind) -> NotifierTemplate {
    match kind {
        NotifierKind::ScreenLimit => NotifierTemplate {
            friendly_name: "Limite de Tela (Painel)",
            conditions: (1..=4)
                .flat_map(|n| {
                    [
                        Condition::new("user_streams", "is greater than", &n.to_string()),
                        Condition::new("user_email", "is", EMPTY_MARKER),
                    ]
                })
                .collect(),
            logic: "({1} and {2}) or ({3} and {4}) or ({5} and {6}) or ({7} and {8})",
            on_play_subject: "--jbop stream --username {user} --sessionId {session_id} --limit 'true' --killMessage 'Você atingiu o limite de telas simultâneas.'",
        },
        NotifierKind::Blocking => NotifierTemplate {
            friendly_name: "Bloqueio de Usuario (Painel)",
            conditions: vec![Condition::new("user_email", "is", EMPTY_MARKER)],
            logic: "",
            on_play_subject: "--jbop allStreams --username {user_email} --sessionId {session_id} --killMessage 'Seu acesso expirou. Caso deseje continuar só regularizar'",
        },
        NotifierKind::TrialBlock => NotifierTemplate {
            friendly_name: "Periodo de Teste (Painel)",
            conditions: vec![Condition::new("user_email", "is", EMPTY_MARKER)],
            logic: "",
            on_play_subject: "--jbop allStreams --username {user_email} --sessionId {session_id} --killMessage 'Seu período de teste foi finalizado'",
        },
    }
}

/// Form sent by auto-configuration on top of the notifier's current agent settings.
pub fn auto_configure_body(
    current: &Map<String, Value>,
    kind: NotifierKind,
) -> Result<Vec<(String, String)>, NotifierError> {
    let template = notifier_template(kind);
    let agent = current.get("config").cloned().unwrap_or(Value::Null);

    let mut form = vec![
        ("agent_id".to_string(), form_value(current.get("agent_id").unwrap_or(&Value::Null))),
        ("scripts_script_folder".to_string(), form_value(&agent["script_folder"])),
        ("scripts_script".to_string(), form_value(&agent["script"])),
        ("scripts_timeout".to_string(), form_value(&agent["timeout"])),
        ("friendly_name".to_string(), template.friendly_name.to_string()),
        (
            "custom_conditions".to_string(),
            serde_json::to_string(&template.conditions)
                .map_err(|e| NotifierError::Internal(e.to_string()))?,
        ),
        ("custom_conditions_logic".to_string(), template.logic.to_string()),
    ];
    form.extend(
        TRIGGERS
            .iter()
            .map(|t| ((*t).to_string(), if *t == "on_play" { "1" } else { "0" }.to_string())),
    );
    form.push(("on_play_subject".to_string(), template.on_play_subject.to_string()));
    form.push(("on_play_body".to_string(), String::new()));
    Ok(form)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenLimitTarget {
    pub username: String,
    pub email: String,
}

pub struct NotifierHandler {
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    event_bus: broadcast::Sender<PanelEvent>,
    update_lock: Mutex<()>,
}

impl NotifierHandler {
    #[must_use]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            event_bus,
            update_lock: Mutex::new(()),
        }
    }

    async fn client(&self) -> Result<TautulliClient, NotifierError> {
        let config = self.config.read().await;
        if !config.tautulli.is_configured() {
            return Err(NotifierError::NotConfigured(
                "As configurações do Tautulli (URL, Chave de API) estão incompletas.".to_string(),
            ));
        }
        Ok(TautulliClient::new(
            self.http.clone(),
            &config.tautulli.url,
            &config.tautulli.api_key,
        ))
    }

    /// Runs one fetch, mutate, save cycle while holding the update lock.
    async fn update_safely<F>(&self, notifier_id: i64, mutate: F) -> Result<(), NotifierError>
    where
        F: FnOnce(&mut Vec<Condition>) -> Result<(), NotifierError> + Send,
    {
        let client = self.client().await?;
        let _guard = self.update_lock.lock().await;
        info!(notifier_id, "Notifier update lock acquired");

        let current = client
            .get_notifier_config(notifier_id)
            .await
            .map_err(|e| NotifierError::Tautulli(e.to_string()))?;
        let mut conditions = parse_conditions(&current)?;
        mutate(&mut conditions)?;

        let body = build_save_body(&current, &conditions)?;
        client
            .set_notifier_config(notifier_id, &body)
            .await
            .map_err(|e| NotifierError::Tautulli(e.to_string()))?;

        info!(notifier_id, "Notifier update finished");
        Ok(())
    }

    async fn screen_limit_notifier(&self) -> Result<i64, NotifierError> {
        let id = self.config.read().await.tautulli.screen_limit_notifier_id;
        if id == 0 {
            return Err(NotifierError::NotConfigured(
                "ID do notificador de limite de telas não configurado.".to_string(),
            ));
        }
        Ok(id)
    }

    pub async fn update_screen_limit(
        &self,
        email: &str,
        username: &str,
        screens: i32,
    ) -> Result<String, NotifierError> {
        let notifier_id = self.screen_limit_notifier().await?;
        let email_owned = email.to_string();
        self.update_safely(notifier_id, move |conditions| {
            assign_screen_limit(conditions, &email_owned, screens)
        })
        .await?;

        let mut profile = self.store.get_user_profile(username).await?;
        profile.screen_limit = screens;
        self.store.set_user_profile(profile).await?;

        let _ = self.event_bus.send(PanelEvent::ScreenLimitChanged {
            username: username.to_string(),
            screens,
        });

        Ok(if screens > 0 {
            format!("Limite de {screens} tela(s) aplicado.")
        } else {
            "Limite removido.".to_string()
        })
    }

    pub async fn update_all_users_screen_limit(
        &self,
        users: &[ScreenLimitTarget],
        screens: i32,
    ) -> Result<String, NotifierError> {
        let notifier_id = self.screen_limit_notifier().await?;
        let mut emails: Vec<String> = users.iter().map(|u| u.email.clone()).collect();
        emails.sort();
        self.update_safely(notifier_id, move |conditions| {
            assign_all_screen_limits(conditions, &emails, screens)
        })
        .await?;

        for user in users {
            let mut profile = self.store.get_user_profile(&user.username).await?;
            profile.screen_limit = screens;
            self.store.set_user_profile(profile).await?;
        }

        Ok(if screens > 0 {
            format!("Limite de {screens} tela(s) aplicado para todos.")
        } else {
            "Limites removidos de todos.".to_string()
        })
    }

    /// Adds or removes a user on a blocking notifier and mirrors it in `blocked_users`.
    ///
    /// `notifier_id` defaults to the blocking notifier. A notifier id of 0
    /// means the action is not configured and nothing happens.
    pub async fn manage_block_unblock(
        &self,
        email: &str,
        username: &str,
        action: BlockAction,
        notifier_id: Option<i64>,
        reason: Option<BlockReason>,
    ) -> Result<String, NotifierError> {
        let notifier_id = match notifier_id {
            Some(id) => id,
            None => self.config.read().await.tautulli.blocking_notifier_id,
        };
        let reason = reason.unwrap_or(BlockReason::Manual);

        if notifier_id == 0 {
            warn!(username, ?action, "No notifier configured for block action");
            return Ok("Nenhum notificador configurado para esta ação.".to_string());
        }

        info!(username, notifier_id, ?action, %reason, "Updating block list");
        let email_owned = email.to_string();
        self.update_safely(notifier_id, move |conditions| {
            toggle_block(conditions, &email_owned, action)
        })
        .await?;

        match action {
            BlockAction::Add => {
                self.store.add_blocked_user(username, reason).await?;
                let _ = self.event_bus.send(PanelEvent::UserBlocked {
                    username: username.to_string(),
                    reason,
                });
                Ok(format!("Utilizador {username} bloqueado."))
            }
            BlockAction::Remove => {
                self.store.remove_blocked_user(username).await?;
                let _ = self.event_bus.send(PanelEvent::UserUnblocked {
                    username: username.to_string(),
                });
                Ok(format!("Utilizador {username} desbloqueado."))
            }
        }
    }

    /// Installs the panel's conditions and JBOP action on a Tautulli notifier.
    pub async fn auto_configure(
        &self,
        url: &str,
        api_key: &str,
        notifier_id: i64,
        kind: NotifierKind,
    ) -> Result<String, NotifierError> {
        if url.trim().is_empty() || api_key.trim().is_empty() || notifier_id <= 0 {
            return Err(NotifierError::NotConfigured(
                "URL, Chave da API e ID do notificador são obrigatórios.".to_string(),
            ));
        }

        let client = TautulliClient::new(self.http.clone(), url, api_key);
        let _guard = self.update_lock.lock().await;

        let current = client
            .get_notifier_config(notifier_id)
            .await
            .map_err(|e| NotifierError::Tautulli(e.to_string()))?;
        let form = auto_configure_body(&current, kind)?;
        client
            .set_notifier_config(notifier_id, &form)
            .await
            .map_err(|e| NotifierError::Tautulli(e.to_string()))?;

        let name = notifier_template(kind).friendly_name;
        info!(notifier_id, ?kind, "Tautulli notifier configured");
        Ok(format!("Notificador '{name}' configurado com sucesso!"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn screen_conditions() -> Vec<Condition> {
        notifier_template(NotifierKind::ScreenLimit).conditions
    }

    fn emails_at(conditions: &[Condition], index: usize) -> Vec<&str> {
        conditions[index].value.iter().map(String::as_str).collect()
    }

    #[test]
    fn assigning_a_limit_moves_the_email_between_lists() {
        let mut conditions = screen_conditions();
        assign_screen_limit(&mut conditions, "ana@x.com", 2).unwrap();
        assert_eq!(emails_at(&conditions, 3), ["ana@x.com"]);

        assign_screen_limit(&mut conditions, "ana@x.com", 3).unwrap();
        assert_eq!(emails_at(&conditions, 3), ["~"]);
        assert_eq!(emails_at(&conditions, 5), ["ana@x.com"]);
    }

    #[test]
    fn lists_stay_sorted_and_drop_the_marker() {
        let mut conditions = screen_conditions();
        assign_screen_limit(&mut conditions, "zeca@x.com", 1).unwrap();
        assign_screen_limit(&mut conditions, "bia@x.com", 1).unwrap();
        assert_eq!(emails_at(&conditions, 1), ["bia@x.com", "zeca@x.com"]);
    }

    #[test]
    fn zero_screens_only_removes() {
        let mut conditions = screen_conditions();
        assign_screen_limit(&mut conditions, "ana@x.com", 4).unwrap();
        assign_screen_limit(&mut conditions, "ana@x.com", 0).unwrap();
        assert!(conditions
            .iter()
            .filter(|c| c.is_email_list())
            .all(|c| c.value == ["~"]));
    }

    #[test]
    fn missing_screen_slot_is_an_error() {
        let mut conditions = notifier_template(NotifierKind::Blocking).conditions;
        let err = assign_screen_limit(&mut conditions, "ana@x.com", 2).unwrap_err();
        assert!(err.to_string().contains("2 tela(s)"));
    }

    #[test]
    fn bulk_assignment_resets_other_lists() {
        let mut conditions = screen_conditions();
        assign_screen_limit(&mut conditions, "old@x.com", 4).unwrap();
        let emails = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        assign_all_screen_limits(&mut conditions, &emails, 2).unwrap();
        assert_eq!(emails_at(&conditions, 3), ["a@x.com", "b@x.com"]);
        assert_eq!(emails_at(&conditions, 7), ["~"]);
    }

    #[test]
    fn blocking_toggles_the_first_email_list() {
        let mut conditions = notifier_template(NotifierKind::Blocking).conditions;
        toggle_block(&mut conditions, "ana@x.com", BlockAction::Add).unwrap();
        assert_eq!(emails_at(&conditions, 0), ["ana@x.com"]);
        toggle_block(&mut conditions, "ana@x.com", BlockAction::Remove).unwrap();
        assert_eq!(emails_at(&conditions, 0), ["~"]);

        let mut none: Vec<Condition> = Vec::new();
        assert!(toggle_block(&mut none, "ana@x.com", BlockAction::Add).is_err());
    }

    #[test]
    fn save_body_flattens_agent_config_and_renames_script_fields() {
        let current: Map<String, Value> = serde_json::from_value(json!({
            "id": 3,
            "agent_id": 15,
            "friendly_name": "Bloqueio",
            "config": {"script": "kill_stream.py", "script_folder": "/scripts", "timeout": 30},
            "custom_conditions": [{"parameter": "user_email", "operator": "is", "value": ["~"], "type": "str"}],
            "custom_conditions_logic": ""
        }))
        .unwrap();

        let mut conditions = parse_conditions(&current).unwrap();
        toggle_block(&mut conditions, "ana@x.com", BlockAction::Add).unwrap();
        let body: std::collections::HashMap<_, _> =
            build_save_body(&current, &conditions).unwrap().into_iter().collect();

        assert_eq!(body["scripts_script"], "kill_stream.py");
        assert_eq!(body["scripts_script_folder"], "/scripts");
        assert_eq!(body["scripts_timeout"], "30");
        assert_eq!(body["agent_id"], "15");
        assert!(!body.contains_key("config"));
        assert!(!body.contains_key("script"));

        let saved: Vec<Value> = serde_json::from_str(&body["custom_conditions"]).unwrap();
        assert_eq!(saved[0]["value"], json!(["ana@x.com"]));
        assert_eq!(saved[0]["type"], "str");
    }

    #[test]
    fn conditions_sent_as_text_are_parsed() {
        let current: Map<String, Value> = serde_json::from_value(json!({
            "custom_conditions": "[{\"parameter\":\"user_streams\",\"operator\":\"is\",\"value\":[2]}]"
        }))
        .unwrap();
        let conditions = parse_conditions(&current).unwrap();
        assert_eq!(conditions[0].value, ["2"]);
    }

    #[test]
    fn auto_configuration_enables_only_on_play() {
        let current: Map<String, Value> = serde_json::from_value(json!({
            "agent_id": 15,
            "config": {"script": "kill_stream.py", "script_folder": "/scripts", "timeout": 30}
        }))
        .unwrap();
        let form: std::collections::HashMap<_, _> =
            auto_configure_body(&current, NotifierKind::TrialBlock)
                .unwrap()
                .into_iter()
                .collect();

        assert_eq!(form["on_play"], "1");
        assert_eq!(form["on_stop"], "0");
        assert_eq!(form["friendly_name"], "Periodo de Teste (Painel)");
        assert!(form["on_play_subject"].contains("período de teste"));
        assert_eq!(form["scripts_script"], "kill_stream.py");
    }
}
