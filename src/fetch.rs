//! Calls to APIs protected by the signed-in user's access token.

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, Response, StatusCode,
};
use serde_json::Value;
use thiserror::Error;

use crate::auth::OidcSession;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("User does not have an access token")]
    Unauthenticated,

    #[error("Access token is not a valid header value")]
    InvalidToken,

    #[error("Error from fetch: {status}")]
    Upstream { status: StatusCode },

    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Reported by callers when the body of a successful response can't be decoded.
    #[error("Invalid response body: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Applied after the defaults, replacing any header with the same name.
    pub headers: HeaderMap,
}

impl FetchOptions {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Sends one request to `url` with the session's bearer token.
///
/// Fails without any network I/O when the session has no access token. A
/// successful response is returned undecoded, any non 2xx status is an
/// [`FetchError::Upstream`].
pub async fn fetch_protected_resource(
    http: &reqwest::Client,
    session: &OidcSession,
    url: &str,
    options: FetchOptions,
) -> Result<Response, FetchError> {
    let token = session.access_token().ok_or(FetchError::Unauthenticated)?;
    let FetchOptions {
        method,
        body,
        headers: extra,
    } = options;

    let mut authorization =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| FetchError::InvalidToken)?;
    authorization.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(header::AUTHORIZATION, authorization);
    headers.extend(extra);

    let mut request = http.request(method, url).headers(headers);
    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(FetchError::Transport)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Upstream { status });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, TokenSet};
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signed_in(token: &str) -> OidcSession {
        OidcSession {
            user: Some(serde_json::Map::new()),
            tokens: Some(TokenSet {
                access_token: AccessToken {
                    access_token: token.to_string(),
                    token_type: "Bearer".to_string(),
                    expires_at: None,
                },
                id_token: "id-token".to_string(),
                refresh_token: None,
            }),
        }
    }

    #[tokio::test]
    async fn without_token_no_request_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = fetch_protected_resource(
            &reqwest::Client::new(),
            &OidcSession::default(),
            &format!("{}/expenses", server.uri()),
            FetchOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Unauthenticated)));
        let received = server.received_requests().await.unwrap_or_default();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn sends_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expenses"))
            .and(header_is("authorization", "Bearer at-123"))
            .and(header_is("accept", "application/json"))
            .and(header_is("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "value": 10 }])))
            .expect(1)
            .mount(&server)
            .await;

        let response = fetch_protected_resource(
            &reqwest::Client::new(),
            &signed_in("at-123"),
            &format!("{}/expenses", server.uri()),
            FetchOptions::default(),
        )
        .await
        .unwrap();

        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!([{ "value": 10 }]));

        let received = server.received_requests().await.unwrap_or_default();
        assert!(received[0].body.is_empty());
    }

    #[tokio::test]
    async fn caller_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/expenses"))
            .and(header_is("authorization", "Bearer at-123"))
            .and(header_is("accept", "text/plain"))
            .and(body_json(json!({ "value": 42 })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let options = FetchOptions::default()
            .method(Method::POST)
            .body(json!({ "value": 42 }))
            .header(header::ACCEPT, HeaderValue::from_static("text/plain"));
        let response = fetch_protected_resource(
            &reqwest::Client::new(),
            &signed_in("at-123"),
            &format!("{}/expenses", server.uri()),
            options,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expenses"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetch_protected_resource(
            &reqwest::Client::new(),
            &signed_in("at-123"),
            &format!("{}/expenses", server.uri()),
            FetchOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Service Unavailable"));
        match err {
            FetchError::Upstream { status } => assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetch_protected_resource(
            &reqwest::Client::new(),
            &signed_in("at-123"),
            &format!("http://{addr}/expenses"),
            FetchOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn token_with_newline_is_rejected() {
        let err = fetch_protected_resource(
            &reqwest::Client::new(),
            &signed_in("at\n123"),
            "http://127.0.0.1:1/expenses",
            FetchOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::InvalidToken));
    }
}
