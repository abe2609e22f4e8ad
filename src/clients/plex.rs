use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;

use super::truncate_body;

/// A library section as exposed by the media server.
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct Library {
    pub title: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityContainer {
    machine_identifier: String,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct SessionsContainer {
    #[serde(default)]
    size: u32,
}

/// Client for the local Plex Media Server API.
#[derive(Debug, Clone)]
pub struct PlexServerClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PlexServerClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to reach Plex server at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Plex returned {status} for {path}: {}", truncate_body(&body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Invalid Plex response for {path}"))?;
        Ok(envelope.media_container)
    }

    pub async fn identity(&self) -> Result<String> {
        let identity: IdentityContainer = self.get("/identity").await?;
        Ok(identity.machine_identifier)
    }

    pub async fn libraries(&self) -> Result<Vec<Library>> {
        let sections: SectionsContainer = self.get("/library/sections").await?;
        Ok(sections
            .directories
            .into_iter()
            .map(|d| Library {
                title: d.title,
                key: d.key,
            })
            .collect())
    }

    pub async fn active_session_count(&self) -> Result<u32> {
        let sessions: SessionsContainer = self.get("/status/sessions").await?;
        Ok(sessions.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_library_sections() {
        let json = r#"{"MediaContainer":{"size":2,"Directory":[
            {"key":"1","title":"Filmes","type":"movie"},
            {"key":"2","title":"Séries","type":"show"}]}}"#;
        let envelope: Envelope<SectionsContainer> = serde_json::from_str(json).unwrap();
        let titles: Vec<_> = envelope
            .media_container
            .directories
            .iter()
            .map(|d| d.title.as_str())
            .collect();
        assert_eq!(titles, ["Filmes", "Séries"]);
    }

    #[test]
    fn empty_session_list_has_zero_size() {
        let envelope: Envelope<SessionsContainer> =
            serde_json::from_str(r#"{"MediaContainer":{}}"#).unwrap();
        assert_eq!(envelope.media_container.size, 0);
    }
}
