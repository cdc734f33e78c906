use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::instrument;
use url::Url;

use parley_core::api::ChatApi;
use parley_core::errors::{AuthError, FetchError};
use parley_core::ids::UserId;
use parley_core::model::{Identity, Message, RosterEntry};

use crate::error::{parse_base, with_segments, NetError};

/// Data API client over HTTP/JSON.
pub struct HttpChatApi {
    client: Client,
    base: Url,
}

impl HttpChatApi {
    pub fn new(
        api_url: &str,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, NetError> {
        let base = parse_base(api_url)?;
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| NetError::Client(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn users_url(&self) -> Url {
        with_segments(&self.base, &["users", ""])
    }

    fn messages_url(&self, self_id: UserId, other_id: UserId) -> Url {
        with_segments(
            &self.base,
            &["messages", &self_id.to_string(), &other_id.to_string()],
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let response = ensure_success(response)
            .await
            .map_err(|(status, body)| FetchError::Status { status, body })?;
        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Split a non-2xx response into `(status, body)`.
async fn ensure_success(response: Response) -> Result<Response, (u16, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err((status.as_u16(), body))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    #[instrument(skip(self), fields(url = %self.users_url()))]
    async fn create_user(&self, username: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .post(self.users_url())
            .json(&serde_json::json!({ "username": username }))
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;
        let response = ensure_success(response)
            .await
            .map_err(|(status, body)| AuthError::Rejected { status, body })?;
        response
            .json::<Identity>()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<RosterEntry>, FetchError> {
        self.get_json(self.users_url()).await
    }

    #[instrument(skip(self), fields(self_id = %self_id, other_id = %other_id))]
    async fn messages_between(
        &self,
        self_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, FetchError> {
        self.get_json(self.messages_url(self_id, other_id)).await
    }
}
