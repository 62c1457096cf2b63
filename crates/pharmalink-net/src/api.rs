//! REST endpoints of the marketplace service.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use pharmalink_shared::{
    Counterparty, Credential, FetchError, Notification, NotificationId, OutgoingMessage,
    PharmacyId, WireMessage,
};

/// The request/response calls the client makes besides the socket.
pub trait RestApi: Send + Sync + 'static {
    /// `GET /users`
    fn list_pharmacies(&self) -> impl Future<Output = Result<Vec<Counterparty>, FetchError>> + Send;

    /// `GET /chat/history/{id}`, oldest first.
    fn fetch_history(
        &self,
        counterparty: &PharmacyId,
    ) -> impl Future<Output = Result<Vec<WireMessage>, FetchError>> + Send;

    /// `POST /chat/send`, returns the stored message with its server id.
    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<WireMessage, FetchError>> + Send;

    /// `GET /notify/notifications`
    fn fetch_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<Notification>, FetchError>> + Send;

    /// `POST /notify/mark-as-read`
    fn mark_as_read(
        &self,
        id: &NotificationId,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// [`RestApi`] over HTTPS with a bearer token on every request.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl HttpApi {
    pub fn new(
        base_url: &str,
        credential: Credential,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        debug!(path, "GET");
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(map_reqwest)?;
        decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        debug!(path, "POST");
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(self.credential.expose())
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;
        decode(resp).await
    }
}

impl RestApi for HttpApi {
    fn list_pharmacies(&self) -> impl Future<Output = Result<Vec<Counterparty>, FetchError>> + Send {
        async move { self.get("/users").await }
    }

    fn fetch_history(
        &self,
        counterparty: &PharmacyId,
    ) -> impl Future<Output = Result<Vec<WireMessage>, FetchError>> + Send {
        let path = format!("/chat/history/{counterparty}");
        async move { self.get(&path).await }
    }

    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<WireMessage, FetchError>> + Send {
        let message = message.clone();
        async move { self.post("/chat/send", &message).await }
    }

    fn fetch_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<Notification>, FetchError>> + Send {
        async move { self.get("/notify/notifications").await }
    }

    fn mark_as_read(
        &self,
        id: &NotificationId,
    ) -> impl Future<Output = Result<(), FetchError>> + Send {
        let body = serde_json::json!({ "notificationId": id });
        async move {
            let _: serde_json::Value = self.post("/notify/mark-as-read", &body).await?;
            Ok(())
        }
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body);
        warn!(status = status.as_u16(), message = %message, "Request failed");
        return Err(FetchError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let body = resp.bytes().await.map_err(map_reqwest)?;
    // mark-as-read may answer with an empty body
    let raw: &[u8] = if body.is_empty() { b"null" } else { &body };
    serde_json::from_slice(raw).map_err(|e| FetchError::Decode(e.to_string()))
}

/// The server reports failures as `{"message": "..."}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
