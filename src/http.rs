use std::sync::Arc;
use std::time::Duration;

use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::Token;
use crate::error::{CIRelayError, Result};

const USER_AGENT: &str = concat!("CIRelay/", env!("CARGO_PKG_VERSION"));
const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Retry budget for a single logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "crate::config::seconds")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Bearer(Token),
    Basic { user: String, token: Token },
}

/// JSON-over-HTTP client shared by every provider and collaborator.
///
/// Connection errors, timeouts, 429 and 5xx responses are retried; 404 becomes
/// `NotFound` so callers can treat absence as a normal outcome.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    auth: Auth,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Auth, retry: RetryPolicy) -> Result<Self> {
        Self::with_headers(base_url, auth, retry, HeaderMap::new())
    }

    pub fn with_headers(
        base_url: &str,
        auth: Auth,
        retry: RetryPolicy,
        headers: HeaderMap,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CIRelayError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Relative joins only append when the base path ends with a slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| CIRelayError::Config(format!("Invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth,
            retry,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` relative to the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| CIRelayError::Config(format!("Invalid endpoint '{path}': {e}")))
    }

    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token.as_str()),
            Auth::Basic { user, token } => request.basic_auth(user, Some(token.as_str())),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.execute(Method::GET, url, None::<&()>, None).await?;
        Ok(response.json().await?)
    }

    /// Fetches a body as text, negotiating `accept` when given.
    pub async fn get_text(&self, url: Url, accept: Option<&'static str>) -> Result<String> {
        let response = self.execute(Method::GET, url, None::<&()>, accept).await?;
        Ok(response.text().await?)
    }

    pub async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(method, url, Some(body), None).await?;
        Ok(response.json().await?)
    }

    /// Sends a request whose response body is irrelevant.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<()> {
        self.execute(method, url, body, None).await?;
        Ok(())
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        accept: Option<&'static str>,
    ) -> Result<Response> {
        // One permit per logical request, held across retries.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CIRelayError::Config(format!("HTTP client closed: {e}")))?;

        let max_retries = self.retry.max_retries;
        let mut retry_count = 0;
        loop {
            let mut request = self.auth_request(self.client.request(method.clone(), url.clone()));
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(accept) = accept {
                request = request.header(ACCEPT, HeaderValue::from_static(accept));
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if retry_count >= max_retries {
                        return Err(CIRelayError::TransportFault {
                            endpoint: url.to_string(),
                            attempts: retry_count + 1,
                            cause: Box::new(e),
                        });
                    }
                    warn!(
                        "Network error ({e}), retrying in {:?} ({}/{max_retries})...",
                        self.retry.delay,
                        retry_count + 1,
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                if retry_count >= max_retries {
                    let message = response.text().await.unwrap_or_default();
                    return Err(CIRelayError::TransportFault {
                        endpoint: url.to_string(),
                        attempts: retry_count + 1,
                        cause: Box::new(CIRelayError::ApiError {
                            status: status.as_u16(),
                            message,
                        }),
                    });
                }

                warn!(
                    "{method} {url} returned {status}. Waiting {:?} before retry {}/{max_retries}...",
                    self.retry.delay,
                    retry_count + 1,
                );
                tokio::time::sleep(self.retry.delay).await;
                retry_count += 1;
                continue;
            }

            if status.as_u16() == 404 {
                return Err(CIRelayError::not_found("resource", url.path()));
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(CIRelayError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            return Ok(response);
        }
    }
}

/// Azure DevOps and GitHub wrap list responses in a single-field envelope.
#[derive(Debug, Deserialize)]
pub struct ValueList<T> {
    pub value: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::from_millis(1),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client =
            ApiClient::new("https://dev.azure.com/org/project", Auth::None, fast_retry(0)).unwrap();
        let url = client.endpoint("_apis/build/builds").unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/org/project/_apis/build/builds"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = ApiClient::new("not a url", Auth::None, fast_retry(0));
        assert!(matches!(result, Err(CIRelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_get_json_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/things/1")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"one"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(
            &server.url(),
            Auth::Bearer(Token::from("secret")),
            fast_retry(0),
        )
        .unwrap();
        let named: Named = client
            .get_json(client.endpoint("things/1").unwrap())
            .await
            .unwrap();

        assert_eq!(named.name, "one");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Auth::None, fast_retry(2)).unwrap();
        let result: Result<Named> = client.get_json(client.endpoint("missing").unwrap()).await;
        assert!(matches!(result, Err(CIRelayError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_fault() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Auth::None, fast_retry(2)).unwrap();
        let result: Result<Named> = client.get_json(client.endpoint("flaky").unwrap()).await;

        match result {
            Err(CIRelayError::TransportFault { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected transport fault, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/denied")
            .with_status(401)
            .with_body("bad credentials")
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Auth::None, fast_retry(5)).unwrap();
        let result: Result<Named> = client.get_json(client.endpoint("denied").unwrap()).await;

        match result {
            Err(CIRelayError::ApiError { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad credentials");
            }
            other => panic!("expected api error, got {other:?}"),
        }
        mock.assert_async().await;
    }
}
