//! plex.tv account API: friends, sharing, resources and PIN login.
//!
//! The legacy `/api/*` endpoints only speak XML; the `/api/v2/*` ones answer
//! JSON when asked to.

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::truncate_body;

const PLEX_TV: &str = "https://plex.tv";
const CLIENTS_PLEX_TV: &str = "https://clients.plex.tv";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlexAccount {
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub thumb: String,
    #[serde(default)]
    pub title: String,
}

/// A friend as listed by `/api/users`, with the servers shared with them.
#[derive(Debug, Clone, Serialize)]
pub struct PlexFriend {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub thumb: String,
    pub servers: Vec<FriendServer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendServer {
    /// Shared-server id, used to update or inspect the share.
    pub id: u64,
    pub machine_identifier: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSection {
    /// plex.tv-wide section id, the one sharing calls expect.
    pub id: u64,
    pub key: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnedServer {
    pub name: String,
    pub machine_identifier: String,
    pub uri: String,
    pub local: bool,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteOutcome {
    Sent,
    AlreadyShared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinStatus {
    Pending,
    Authorized(String),
    Expired,
}

// XML payloads of the legacy endpoints.

#[derive(Debug, Deserialize)]
struct UsersXml {
    #[serde(rename = "User", default)]
    users: Vec<UserXml>,
}

#[derive(Debug, Deserialize)]
struct UserXml {
    #[serde(rename = "@id")]
    id: u64,
    #[serde(rename = "@username", default)]
    username: String,
    #[serde(rename = "@title", default)]
    title: String,
    #[serde(rename = "@email", default)]
    email: String,
    #[serde(rename = "@thumb", default)]
    thumb: String,
    #[serde(rename = "Server", default)]
    servers: Vec<UserServerXml>,
}

#[derive(Debug, Deserialize)]
struct UserServerXml {
    #[serde(rename = "@id")]
    id: u64,
    #[serde(rename = "@machineIdentifier")]
    machine_identifier: String,
    #[serde(rename = "@name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServerXmlContainer {
    #[serde(rename = "Server", default)]
    servers: Vec<ServerXml>,
}

#[derive(Debug, Deserialize)]
struct ServerXml {
    #[serde(rename = "Section", default)]
    sections: Vec<SectionXml>,
}

#[derive(Debug, Deserialize)]
struct SectionXml {
    #[serde(rename = "@id")]
    id: u64,
    #[serde(rename = "@key", default)]
    key: String,
    #[serde(rename = "@title")]
    title: String,
    #[serde(rename = "@shared", default)]
    shared: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SharedServerContainer {
    #[serde(rename = "SharedServer", default)]
    shared_servers: Vec<ServerXml>,
}

// JSON payloads of the v2 endpoints.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    name: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    owned: bool,
    client_identifier: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    connections: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize)]
struct Connection {
    #[serde(default)]
    protocol: String,
    uri: String,
    #[serde(default)]
    local: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pin {
    #[serde(default)]
    auth_token: Option<String>,
}

fn parse_users(xml: &str) -> Result<Vec<PlexFriend>> {
    let parsed: UsersXml = quick_xml::de::from_str(xml).context("Invalid plex.tv users XML")?;
    Ok(parsed
        .users
        .into_iter()
        .map(|u| PlexFriend {
            id: u.id,
            username: if u.username.is_empty() { u.title } else { u.username },
            email: u.email,
            thumb: u.thumb,
            servers: u
                .servers
                .into_iter()
                .map(|s| FriendServer {
                    id: s.id,
                    machine_identifier: s.machine_identifier,
                    name: s.name,
                })
                .collect(),
        })
        .collect())
}

fn parse_server_sections(xml: &str) -> Result<Vec<ServerSection>> {
    let parsed: ServerXmlContainer =
        quick_xml::de::from_str(xml).context("Invalid plex.tv server XML")?;
    Ok(parsed
        .servers
        .into_iter()
        .flat_map(|s| s.sections)
        .map(|s| ServerSection {
            id: s.id,
            key: s.key,
            title: s.title,
        })
        .collect())
}

fn parse_shared_titles(xml: &str) -> Result<Vec<String>> {
    let parsed: SharedServerContainer =
        quick_xml::de::from_str(xml).context("Invalid plex.tv shared server XML")?;
    Ok(parsed
        .shared_servers
        .into_iter()
        .flat_map(|s| s.sections)
        .filter(|s| s.shared.as_deref() == Some("1"))
        .map(|s| s.title)
        .collect())
}

/// Remote before local, then https before http.
fn preferred_connection(connections: &[Connection]) -> Option<&Connection> {
    connections
        .iter()
        .min_by_key(|c| (c.local, c.protocol != "https"))
}

fn is_already_shared(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("already sharing") || body.contains("already a friend")
}

#[derive(Debug, Clone)]
pub struct PlexTvClient {
    client: Client,
    product: String,
    client_identifier: String,
}

impl PlexTvClient {
    #[must_use]
    pub fn new(client: Client, product: &str) -> Self {
        Self {
            client,
            product: product.to_string(),
            client_identifier: format!("{}-plexpanel", uuid::Uuid::new_v4().simple()),
        }
    }

    #[must_use]
    pub fn product(&self) -> &str {
        &self.product
    }

    fn with_headers(&self, builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header("X-Plex-Product", &self.product)
            .header("X-Plex-Version", env!("CARGO_PKG_VERSION"))
            .header("X-Plex-Client-Identifier", &self.client_identifier);
        match token {
            Some(token) => builder.header("X-Plex-Token", token),
            None => builder,
        }
    }

    async fn get_text(&self, url: &str, token: &str) -> Result<String> {
        let response = self
            .with_headers(self.client.get(url), Some(token))
            .header("Accept", "application/xml")
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("plex.tv returned {status}: {}", truncate_body(&body));
        }
        Ok(body)
    }

    pub async fn account(&self, token: &str) -> Result<PlexAccount> {
        let response = self
            .with_headers(self.client.get(format!("{PLEX_TV}/api/v2/user")), Some(token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to reach plex.tv")?;

        if response.status() == StatusCode::UNAUTHORIZED {
            bail!("Token Plex inválido");
        }
        if !response.status().is_success() {
            bail!("plex.tv returned {} for account lookup", response.status());
        }

        response.json().await.context("Invalid plex.tv account response")
    }

    pub async fn users(&self, token: &str) -> Result<Vec<PlexFriend>> {
        let xml = self.get_text(&format!("{PLEX_TV}/api/users"), token).await?;
        parse_users(&xml)
    }

    pub async fn server_sections(&self, token: &str, machine_id: &str) -> Result<Vec<ServerSection>> {
        let xml = self
            .get_text(&format!("{PLEX_TV}/api/servers/{machine_id}"), token)
            .await?;
        parse_server_sections(&xml)
    }

    pub async fn shared_sections(
        &self,
        token: &str,
        machine_id: &str,
        shared_server_id: u64,
    ) -> Result<Vec<String>> {
        let xml = self
            .get_text(
                &format!("{PLEX_TV}/api/servers/{machine_id}/shared_servers/{shared_server_id}"),
                token,
            )
            .await?;
        parse_shared_titles(&xml)
    }

    pub async fn invite_friend(
        &self,
        token: &str,
        machine_id: &str,
        email: &str,
        section_ids: &[u64],
        allow_sync: bool,
    ) -> Result<InviteOutcome> {
        let body = json!({
            "machineIdentifier": machine_id,
            "librarySectionIds": section_ids,
            "invitedEmail": email,
            "settings": { "allowSync": if allow_sync { "1" } else { "0" } },
        });

        let response = self
            .with_headers(
                self.client.post(format!("{PLEX_TV}/api/v2/shared_servers")),
                Some(token),
            )
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send Plex invite")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            info!(email, "Plex invite sent");
            return Ok(InviteOutcome::Sent);
        }
        if status == StatusCode::BAD_REQUEST && is_already_shared(&text) {
            return Ok(InviteOutcome::AlreadyShared);
        }
        bail!("Plex recusou o convite ({status}): {}", truncate_body(&text))
    }

    pub async fn update_friend(
        &self,
        token: &str,
        machine_id: &str,
        shared_server_id: u64,
        section_ids: &[u64],
    ) -> Result<()> {
        let body = json!({
            "server_id": machine_id,
            "shared_server": { "library_section_ids": section_ids },
        });

        let response = self
            .with_headers(
                self.client.put(format!(
                    "{PLEX_TV}/api/servers/{machine_id}/shared_servers/{shared_server_id}"
                )),
                Some(token),
            )
            .json(&body)
            .send()
            .await
            .context("Failed to update Plex share")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Plex recusou a atualização ({status}): {}", truncate_body(&text));
        }
        Ok(())
    }

    pub async fn remove_friend(&self, token: &str, user_id: u64) -> Result<()> {
        let response = self
            .with_headers(
                self.client.delete(format!("{PLEX_TV}/api/friends/{user_id}")),
                Some(token),
            )
            .send()
            .await
            .context("Failed to remove Plex friend")?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            bail!("Plex returned {} removing friend {user_id}", response.status());
        }
        Ok(())
    }

    /// Accepts, on the invited user's behalf, the pending share sent by `owner`.
    pub async fn accept_pending_invite(&self, user_token: &str, owner: &str) -> Result<()> {
        let pending: Vec<Value> = self
            .with_headers(
                self.client.get(format!(
                    "{CLIENTS_PLEX_TV}/api/v2/shared_servers/invites/received/pending"
                )),
                Some(user_token),
            )
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to list pending Plex invites")?
            .error_for_status()?
            .json()
            .await
            .context("Invalid pending invites response")?;

        let invite_id = pending
            .iter()
            .find(|invite| {
                let o = &invite["owner"];
                ["username", "email", "title"]
                    .iter()
                    .any(|field| o[field].as_str() == Some(owner))
            })
            .and_then(|invite| invite["sharedServers"].get(0))
            .and_then(|server| server["id"].as_u64())
            .context("Nenhum convite pendente deste servidor foi encontrado.")?;

        debug!(invite_id, "Accepting pending Plex invite");

        self.with_headers(
            self.client.post(format!(
                "{CLIENTS_PLEX_TV}/api/v2/shared_servers/{invite_id}/accept"
            )),
            Some(user_token),
        )
        .header("Accept", "application/json")
        .send()
        .await
        .context("Failed to accept Plex invite")?
        .error_for_status()?;

        Ok(())
    }

    /// Media servers owned by the token's account.
    pub async fn owned_servers(&self, token: &str) -> Result<Vec<OwnedServer>> {
        let resources: Vec<Resource> = self
            .with_headers(
                self.client
                    .get(format!("{PLEX_TV}/api/v2/resources?includeHttps=1")),
                Some(token),
            )
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to list Plex resources")?
            .error_for_status()?
            .json()
            .await
            .context("Invalid Plex resources response")?;

        Ok(resources
            .into_iter()
            .filter(|r| r.owned && r.product == "Plex Media Server")
            .filter_map(|r| {
                let connection = preferred_connection(&r.connections)?.clone();
                Some(OwnedServer {
                    name: r.name,
                    machine_identifier: r.client_identifier,
                    uri: connection.uri,
                    local: connection.local,
                    access_token: r.access_token,
                })
            })
            .collect())
    }

    pub async fn pin_status(&self, client_id: &str, pin_id: &str) -> Result<PinStatus> {
        let response = self
            .client
            .get(format!("{PLEX_TV}/api/v2/pins/{pin_id}"))
            .header("X-Plex-Client-Identifier", client_id)
            .header("X-Plex-Product", &self.product)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to check Plex PIN")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PinStatus::Expired);
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "Unexpected PIN check status");
            bail!("plex.tv returned {} for PIN check", response.status());
        }

        let pin: Pin = response.json().await.context("Invalid PIN response")?;
        Ok(match pin.auth_token.filter(|t| !t.is_empty()) {
            Some(token) => PinStatus::Authorized(token),
            None => PinStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_friends_with_servers() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer friendlyName="myPlex" size="2">
  <User id="11" title="Ana" username="ana" email="ana@example.com" thumb="https://plex.tv/a.png">
    <Server id="901" serverId="5" machineIdentifier="abc" name="Casa" owned="1"/>
  </User>
  <User id="12" title="Home User" username="" email="">
  </User>
</MediaContainer>"#;

        let users = parse_users(xml).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "ana");
        assert_eq!(users[0].servers[0].id, 901);
        assert_eq!(users[0].servers[0].machine_identifier, "abc");
        assert_eq!(users[1].username, "Home User");
        assert!(users[1].servers.is_empty());
    }

    #[test]
    fn parses_sections_and_shared_titles() {
        let server = r#"<MediaContainer><Server name="Casa" machineIdentifier="abc">
            <Section id="1001" key="1" type="movie" title="Filmes"/>
            <Section id="1002" key="2" type="show" title="Séries"/>
        </Server></MediaContainer>"#;
        let sections = parse_server_sections(server).unwrap();
        assert_eq!(sections[1].id, 1002);
        assert_eq!(sections[1].title, "Séries");

        let shared = r#"<MediaContainer><SharedServer id="901" username="ana">
            <Section id="1001" key="1" title="Filmes" shared="1"/>
            <Section id="1002" key="2" title="Séries" shared="0"/>
        </SharedServer></MediaContainer>"#;
        assert_eq!(parse_shared_titles(shared).unwrap(), ["Filmes"]);
    }

    #[test]
    fn prefers_remote_https_connections() {
        let connections = vec![
            Connection { protocol: "http".into(), uri: "http://192.168.0.2:32400".into(), local: true },
            Connection { protocol: "http".into(), uri: "http://1.2.3.4:32400".into(), local: false },
            Connection { protocol: "https".into(), uri: "https://1-2-3-4.plex.direct:32400".into(), local: false },
        ];
        assert_eq!(
            preferred_connection(&connections).unwrap().uri,
            "https://1-2-3-4.plex.direct:32400"
        );
    }

    #[test]
    fn detects_existing_shares() {
        assert!(is_already_shared(r#"{"errors":[{"message":"User is already a friend"}]}"#));
        assert!(is_already_shared("Already sharing this server"));
        assert!(!is_already_shared("invalid email"));
    }
}
