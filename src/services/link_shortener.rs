use anyhow::{Result, bail};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::db::Store;

const CODE_LENGTH: usize = 7;
const MAX_ATTEMPTS: usize = 16;
const URL_SAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Random token over the URL-safe base64 alphabet.
#[must_use]
pub fn random_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(URL_SAFE[rng.random_range(0..URL_SAFE.len())]))
        .collect()
}

pub struct LinkShortener {
    store: Store,
    config: Arc<RwLock<Config>>,
}

impl LinkShortener {
    #[must_use]
    pub const fn new(store: Store, config: Arc<RwLock<Config>>) -> Self {
        Self { store, config }
    }

    /// Stores `url` under a fresh code and returns the public short URL.
    pub async fn create_short_link(&self, url: &str) -> Result<String> {
        let base_url = self.config.read().await.app.base_url().to_string();

        for _ in 0..MAX_ATTEMPTS {
            let code = random_code(CODE_LENGTH);
            if self.store.get_short_link(&code).await?.is_some() {
                continue;
            }
            self.store.create_short_link(&code, url).await?;
            info!(code, "Short link created");
            return Ok(format!("{base_url}/s/{code}"));
        }
        bail!("Could not find a free short link code")
    }

    pub async fn resolve(&self, code: &str) -> Result<Option<String>> {
        self.store.get_short_link(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_url_safe() {
        let code = random_code(22);
        assert_eq!(code.len(), 22);
        assert!(code.bytes().all(|b| URL_SAFE.contains(&b)));
    }

    #[tokio::test]
    async fn short_links_resolve_to_the_original_url() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let mut config = Config::default();
        config.app.base_url = "https://painel.example.com/".to_string();
        let shortener = LinkShortener::new(store, Arc::new(RwLock::new(config)));

        let short = shortener
            .create_short_link("https://painel.example.com/pay/abc")
            .await
            .unwrap();
        let code = short.strip_prefix("https://painel.example.com/s/").unwrap();
        assert_eq!(code.len(), 7);
        assert_eq!(
            shortener.resolve(code).await.unwrap().as_deref(),
            Some("https://painel.example.com/pay/abc")
        );
        assert!(shortener.resolve("missing").await.unwrap().is_none());
    }
}
