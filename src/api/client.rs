//! HTTP client for the remote banking API
//!
//! Handles:
//! - Bearer token auth
//! - Cursor pagination via absolute `next` links
//! - Mapping HTTP failures to `ApiError`

use super::models::{AccountResource, ListResponse, SingleResponse, TransactionResource};
use super::{Page, UpApi};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.up.com.au/api/v1";

/// Records per list request. Fixed on the client side.
const PAGE_SIZE: &str = "100";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// API client for the remote banking API
#[derive(Clone)]
pub struct UpClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl UpClient {
    /// Create a client for `base_url` authenticating with `token`
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        // Trailing slash so Url::join appends instead of replacing the last segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Check that the token is accepted
    pub async fn ping(&self) -> Result<(), ApiError> {
        let url = self.endpoint("util/ping")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Parse a `next` link, refusing links that point at another origin
    /// (the bearer token must never leave the configured host)
    fn cursor_url(&self, cursor: &str) -> Result<Url, ApiError> {
        let url = Url::parse(cursor).map_err(|_| ApiError::InvalidCursor(cursor.to_string()))?;
        if url.origin() != self.base_url.origin() {
            return Err(ApiError::InvalidCursor(cursor.to_string()));
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        paged: bool,
    ) -> Result<T, ApiError> {
        let mut request = self.client.get(url).bearer_auth(&self.token);
        if paged {
            request = request.query(&[("page[size]", PAGE_SIZE)]);
        }

        let response = request.send().await?;
        handle_response(response).await
    }

    async fn list<T: serde::de::DeserializeOwned>(&self, url: Url, paged: bool) -> Result<Page<T>, ApiError> {
        let list: ListResponse<T> = self.get_json(url, paged).await?;
        Ok(Page {
            data: list.data,
            next: list.links.next.filter(|next| !next.is_empty()),
        })
    }
}

#[async_trait]
impl UpApi for UpClient {
    async fn list_accounts(&self) -> Result<Page<AccountResource>, ApiError> {
        let url = self.endpoint("accounts")?;
        self.list(url, true).await
    }

    async fn list_accounts_page(&self, cursor: &str) -> Result<Page<AccountResource>, ApiError> {
        // The link already carries the page size
        let url = self.cursor_url(cursor)?;
        self.list(url, false).await
    }

    async fn get_account(&self, id: &str) -> Result<AccountResource, ApiError> {
        let url = self.endpoint(&format!("accounts/{}", id))?;
        let single: SingleResponse<AccountResource> = self.get_json(url, false).await?;
        Ok(single.data)
    }

    async fn list_transactions(&self) -> Result<Page<TransactionResource>, ApiError> {
        let url = self.endpoint("transactions")?;
        self.list(url, true).await
    }

    async fn list_transactions_page(
        &self,
        cursor: &str,
    ) -> Result<Page<TransactionResource>, ApiError> {
        let url = self.cursor_url(cursor)?;
        self.list(url, false).await
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unauthorized - check the API token")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid pagination link: {0}")]
    InvalidCursor(String),
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();

    if status.is_success() {
        let body = response.bytes().await?;
        serde_json::from_slice::<T>(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to ApiError
async fn handle_error(response: reqwest::Response) -> ApiError {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimitExceeded,
        s if s.is_server_error() => {
            let msg = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            ApiError::ServerError(format!("{}: {}", status, msg))
        }
        _ => {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            ApiError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn account_json(id: &str, name: &str) -> String {
        format!(
            r#"{{
                "type": "accounts",
                "id": "{id}",
                "attributes": {{
                    "displayName": "{name}",
                    "accountType": "SAVER",
                    "ownershipType": "INDIVIDUAL",
                    "balance": {{ "currencyCode": "AUD", "value": "10.00", "valueInBaseUnits": 1000 }},
                    "createdAt": "2024-03-01T10:00:00+11:00"
                }}
            }}"#
        )
    }

    #[test]
    fn test_client_rejects_bad_base_url() {
        assert!(matches!(UpClient::new("not a url", "t"), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = UpClient::new("https://api.example.com/api/v1", "t").unwrap();
        assert_eq!(
            client.endpoint("accounts").unwrap().as_str(),
            "https://api.example.com/api/v1/accounts"
        );
    }

    #[test]
    fn test_cursor_must_share_origin() {
        let client = UpClient::new("https://api.example.com/api/v1", "t").unwrap();
        assert!(client
            .cursor_url("https://api.example.com/api/v1/transactions?page[after]=abc")
            .is_ok());
        assert!(matches!(
            client.cursor_url("https://evil.example.net/transactions"),
            Err(ApiError::InvalidCursor(_))
        ));
        assert!(matches!(client.cursor_url("relative/path"), Err(ApiError::InvalidCursor(_))));
    }

    #[tokio::test]
    async fn test_list_accounts_follows_links() {
        let mut server = Server::new_async().await;
        let next = format!("{}/accounts?page%5Bafter%5D=a1", server.url());

        let first = server
            .mock("GET", "/accounts")
            .match_query(Matcher::UrlEncoded("page[size]".into(), "100".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{ "data": [{}], "links": {{ "prev": null, "next": "{}" }} }}"#,
                account_json("a1", "Spending"),
                next
            ))
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        let page = client.list_accounts().await.unwrap();
        first.assert_async().await;

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id.as_deref(), Some("a1"));
        assert_eq!(page.next.as_deref(), Some(next.as_str()));
    }

    #[tokio::test]
    async fn test_empty_next_link_ends_list() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/transactions")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "data": [], "links": { "prev": null, "next": "" } }"#)
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        let page = client.list_transactions().await.unwrap();
        assert!(page.data.is_empty());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_get_account() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/accounts/a1")
            .with_status(200)
            .with_body(format!(r#"{{ "data": {} }}"#, account_json("a1", "Spending")))
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        let account = client.get_account("a1").await.unwrap();
        mock.assert_async().await;

        let attrs = account.attributes.unwrap();
        assert_eq!(attrs.display_name.as_deref(), Some("Spending"));
        assert_eq!(
            attrs.balance.unwrap().value_in_base_units.unwrap().as_i64(),
            Some(1000)
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = Server::new_async().await;
        let _unauthorized = server
            .mock("GET", "/util/ping")
            .with_status(401)
            .create_async()
            .await;
        let _limited = server
            .mock("GET", "/accounts/a1")
            .with_status(429)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/accounts/a2")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/accounts/a3")
            .with_status(404)
            .with_body("nope")
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        assert!(matches!(client.ping().await, Err(ApiError::Unauthorized)));
        assert!(matches!(client.get_account("a1").await, Err(ApiError::RateLimitExceeded)));
        assert!(matches!(client.get_account("a2").await, Err(ApiError::ServerError(_))));
        match client.get_account("a3").await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "nope");
            }
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/accounts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "data": "not a list" }"#)
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        assert!(matches!(
            client.list_accounts().await,
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_ok() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/util/ping")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{ "meta": { "id": "x", "statusEmoji": "ok" } }"#)
            .create_async()
            .await;

        let client = UpClient::new(&server.url(), "secret").unwrap();
        client.ping().await.unwrap();
        mock.assert_async().await;
    }
}
