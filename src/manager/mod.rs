//! Thin facade over the downstream IPTV manager's REST API.
//!
//! The reconciler and orchestrator only see [`ManagerApi`]; tests substitute
//! a fake. The real client authenticates with username/password for a JWT
//! and transparently re-authenticates once on 401.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::errors::ManagerError;

/// A stream as listed by the manager for one M3U group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStream {
    pub id: String,
    pub name: String,
}

/// A channel as the manager sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerChannel {
    pub id: i64,
    pub name: String,
    pub number: Option<i64>,
    pub group: Option<String>,
    pub epg_channel_id: Option<String>,
}

/// Desired channel state for create/update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub number: Option<i64>,
    pub group: Option<String>,
    pub logo_url: Option<String>,
    /// Stream bound to the channel on creation
    pub stream_id: Option<String>,
}

#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn list_m3u_groups(&self) -> Result<Vec<String>, ManagerError>;

    async fn list_streams(&self, group: &str) -> Result<Vec<ManagerStream>, ManagerError>;

    async fn list_channels(&self) -> Result<Vec<ManagerChannel>, ManagerError>;

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ManagerChannel, ManagerError>;

    async fn update_channel(&self, id: i64, spec: &ChannelSpec) -> Result<(), ManagerError>;

    async fn delete_channel(&self, id: i64) -> Result<(), ManagerError>;

    /// Bind a channel to an XMLTV channel id from our generated guide.
    async fn set_channel_epg(&self, id: i64, epg_channel_id: &str)
        -> Result<(), ManagerError>;

    async fn refresh_m3u(&self, account: &str) -> Result<(), ManagerError>;
}

pub struct ManagerClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
}

impl ManagerClient {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            token: RwLock::new(None),
        }
    }

    async fn authenticate(&self) -> Result<String, ManagerError> {
        info!("Authenticating against IPTV manager");
        let response = self
            .client
            .post(format!("{}/api/token/", self.base_url))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ManagerError::AuthenticationFailed {
                message: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ManagerError::unexpected(format!("token response: {e}")))?;
        *self.token.write().await = Some(token.access.clone());
        Ok(token.access)
    }

    async fn bearer(&self) -> Result<String, ManagerError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// One request with a single re-authentication retry on 401.
    async fn request<T: DeserializeOwned + 'static>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ManagerError> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.bearer().await?;

        for attempt in 0..2 {
            let mut request = self.client.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = &body {
                request = request.json(body);
            }
            let response = request.send().await?;

            match response.status() {
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    debug!("Manager token expired, re-authenticating");
                    token = self.authenticate().await?;
                }
                status if status.is_success() => {
                    if std::any::TypeId::of::<T>() == std::any::TypeId::of::<Empty>() {
                        // DELETE and friends return no body worth parsing
                        let empty = serde_json::from_str("null").map_err(|e| {
                            ManagerError::unexpected(format!("empty response: {e}"))
                        })?;
                        return Ok(empty);
                    }
                    return response
                        .json()
                        .await
                        .map_err(|e| ManagerError::unexpected(format!("{url}: {e}")));
                }
                status => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ManagerError::Http {
                        status: status.as_u16(),
                        message: message.chars().take(200).collect(),
                    });
                }
            }
        }

        Err(ManagerError::AuthenticationFailed {
            message: "still unauthorized after token refresh".to_string(),
        })
    }
}

/// Marker for endpoints whose body we discard.
#[derive(Debug, Deserialize)]
struct Empty;

#[derive(Debug, Deserialize)]
struct WireGroup {
    name: String,
}

#[async_trait]
impl ManagerApi for ManagerClient {
    async fn list_m3u_groups(&self) -> Result<Vec<String>, ManagerError> {
        let groups: Vec<WireGroup> = self
            .request(Method::GET, "/api/m3u/groups/", None)
            .await?;
        Ok(groups.into_iter().map(|g| g.name).collect())
    }

    async fn list_streams(&self, group: &str) -> Result<Vec<ManagerStream>, ManagerError> {
        self.request(
            Method::GET,
            &format!("/api/m3u/groups/{}/streams/", urlencoding::encode(group)),
            None,
        )
        .await
    }

    async fn list_channels(&self) -> Result<Vec<ManagerChannel>, ManagerError> {
        self.request(Method::GET, "/api/channels/", None).await
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ManagerChannel, ManagerError> {
        let body = serde_json::to_value(spec)
            .map_err(|e| ManagerError::unexpected(format!("channel spec: {e}")))?;
        self.request(Method::POST, "/api/channels/", Some(body)).await
    }

    async fn update_channel(&self, id: i64, spec: &ChannelSpec) -> Result<(), ManagerError> {
        let body = serde_json::to_value(spec)
            .map_err(|e| ManagerError::unexpected(format!("channel spec: {e}")))?;
        let _: Empty = self
            .request(Method::PATCH, &format!("/api/channels/{id}/"), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_channel(&self, id: i64) -> Result<(), ManagerError> {
        let _: Empty = self
            .request(Method::DELETE, &format!("/api/channels/{id}/"), None)
            .await?;
        Ok(())
    }

    async fn set_channel_epg(&self, id: i64, epg_channel_id: &str) -> Result<(), ManagerError> {
        let body = serde_json::json!({ "epg_channel_id": epg_channel_id });
        let _: Empty = self
            .request(Method::POST, &format!("/api/channels/{id}/epg/"), Some(body))
            .await?;
        Ok(())
    }

    async fn refresh_m3u(&self, account: &str) -> Result<(), ManagerError> {
        let _: Empty = self
            .request(
                Method::POST,
                &format!("/api/m3u/refresh/{}/", urlencoding::encode(account)),
                None,
            )
            .await?;
        Ok(())
    }
}
