//! Music request side channel
//!
//! Chat messages starting with the music prefix are forwarded to a local music
//! server as a search request. Requests are spawned and never block or fail
//! event handling; failures only reach the debug log.

use crate::error::{QueueError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MUSIC_SERVER: &str = "http://127.0.0.1:99";
pub const SEARCH_PATH: &str = "search";

/// Client for the music server
#[async_trait]
pub trait MusicClient: Send + Sync {
    /// Issue one request; returns the HTTP status code
    async fn request(&self, path: &str, keyword: &str) -> Result<u16>;
}

/// reqwest-backed client issuing `GET {base}/{path}?keyword=..`
pub struct HttpMusicClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMusicClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| QueueError::Upstream(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn local() -> Result<Self> {
        Self::new(DEFAULT_MUSIC_SERVER)
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl MusicClient for HttpMusicClient {
    async fn request(&self, path: &str, keyword: &str) -> Result<u16> {
        let response = self
            .client
            .get(self.url_for(path))
            .query(&[("keyword", keyword)])
            .send()
            .await
            .map_err(|e| QueueError::Upstream(format!("Music request failed: {}", e)))?;
        Ok(response.status().as_u16())
    }
}

/// Send a search request in the background.
///
/// Non-200 responses are retried up to the music request policy; a transport
/// error ends the chain.
pub fn spawn_search(client: Arc<dyn MusicClient>, keyword: String) {
    tokio::spawn(async move {
        search(client.as_ref(), &keyword).await;
    });
}

/// Returns whether the server answered 200
pub async fn search(client: &dyn MusicClient, keyword: &str) -> bool {
    let policy = RetryPolicy::music_request();
    let mut attempt = 0;
    while policy.allows(attempt) {
        attempt += 1;
        match client.request(SEARCH_PATH, keyword).await {
            Ok(200) => {
                debug!(keyword, attempt, "music request accepted");
                return true;
            }
            Ok(status) => debug!(keyword, attempt, status, "music server rejected request"),
            Err(e) => {
                debug!(keyword, error = %e, "music server unreachable");
                return false;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<u16>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedClient {
        fn new(mut responses: Vec<Result<u16>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MusicClient for ScriptedClient {
        async fn request(&self, path: &str, keyword: &str) -> Result<u16> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), keyword.to_string()));
            self.responses.lock().unwrap().pop().unwrap_or(Ok(500))
        }
    }

    #[tokio::test]
    async fn test_search_stops_on_200() {
        let client = ScriptedClient::new(vec![Ok(503), Ok(200), Ok(200)]);
        assert!(search(&client, "晴天").await);
        assert_eq!(client.call_count(), 2);
        assert_eq!(
            client.calls.lock().unwrap()[0],
            ("search".to_string(), "晴天".to_string())
        );
    }

    #[tokio::test]
    async fn test_search_gives_up_after_three_attempts() {
        let client = ScriptedClient::new(vec![Ok(500), Ok(500), Ok(500), Ok(200)]);
        assert!(!search(&client, "song").await);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_ends_chain() {
        let client = ScriptedClient::new(vec![Err(QueueError::Upstream("refused".into()))]);
        assert!(!search(&client, "song").await);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_http_client_url() {
        let client = HttpMusicClient::new("http://localhost:99/").unwrap();
        assert_eq!(client.url_for(SEARCH_PATH), "http://localhost:99/search");
        let local = HttpMusicClient::local().unwrap();
        assert_eq!(local.url_for("search"), "http://127.0.0.1:99/search");
    }
}
