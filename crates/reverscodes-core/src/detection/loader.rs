//! The network boundary for script, fetch and image probes.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

/// What the page would have asked the browser to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Script,
    Fetch,
    Image,
}

/// Why a bait resource did not load. Every variant is a block signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Loads bait resources. Only success or failure matters; bodies are ignored.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, kind: ResourceKind, url: &Url) -> Result<(), LoadError>;
}

/// [`ResourceLoader`] over `reqwest`.
///
/// Mirrors browser semantics: an opaque fetch only fails on a network
/// error, while script and image loads also fail on an error status.
/// DNS sinkholes, filtering proxies and firewall rules all show up here.
pub struct HttpLoader {
    http_client: Client,
}

impl HttpLoader {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .user_agent(concat!("reverscodes/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ResourceLoader for HttpLoader {
    async fn load(&self, kind: ResourceKind, url: &Url) -> Result<(), LoadError> {
        let resp = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LoadError::Transport(e.to_string()))?;

        match kind {
            ResourceKind::Fetch => Ok(()),
            ResourceKind::Script | ResourceKind::Image => {
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(LoadError::Status(status.as_u16()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_accepts_any_response_but_script_needs_success() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/pagead/js/adsbygoogle.js")
            .with_status(404)
            .create_async()
            .await;
        let url = Url::parse(&format!("{}/pagead/js/adsbygoogle.js", server.url())).unwrap();

        let loader = HttpLoader::new().unwrap();
        assert_eq!(loader.load(ResourceKind::Fetch, &url).await, Ok(()));
        assert_eq!(
            loader.load(ResourceKind::Script, &url).await,
            Err(LoadError::Status(404))
        );
    }

    #[tokio::test]
    async fn image_loads_when_served() {
        let mut server = mockito::Server::new_async().await;
        let _pixel = server
            .mock("GET", "/collect")
            .with_status(200)
            .with_header("content-type", "image/gif")
            .with_body([0x47, 0x49, 0x46])
            .create_async()
            .await;
        let url = Url::parse(&format!("{}/collect", server.url())).unwrap();

        let loader = HttpLoader::new().unwrap();
        assert_eq!(loader.load(ResourceKind::Image, &url).await, Ok(()));
    }
}
