//! HTTP binding for the request gate.
//!
//! [`HttpGate`] runs the gate on an `http::Request` and carries the outbound
//! credential headers until the response is built. Framework adapters call
//! [`HttpGate::check`] before routing and either return the short-circuit
//! response or run the handler and pass its response to
//! [`HttpGateResult::apply`].

use std::sync::Arc;

use http::{HeaderMap, HeaderName, Request, Response};

use super::{BearerChannel, CookieChannel, GateOutcome, RequestGate};
use crate::config::CookieConfig;
use crate::session::Session;

const DEFAULT_BEARER_HEADER: &str = "x-session-token";

/// Which transport carries the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialTransport {
    /// Session cookie (browser navigation).
    #[default]
    Cookie,
    /// `Authorization: Bearer` (programmatic clients).
    Bearer,
}

/// Request gate bound to HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpGate {
    gate: Arc<RequestGate>,
    cookie: CookieConfig,
    bearer_header: HeaderName,
    transport: CredentialTransport,
}

impl HttpGate {
    /// Wraps `gate`, reading credentials from the session cookie.
    ///
    /// An unusable `bearer_response_header` falls back to `x-session-token`.
    pub fn new(gate: Arc<RequestGate>, cookie: CookieConfig) -> Self {
        let bearer_header = HeaderName::from_bytes(cookie.bearer_response_header.as_bytes())
            .unwrap_or_else(|e| {
                tracing::warn!(
                    header = %cookie.bearer_response_header,
                    error = %e,
                    "invalid bearer response header, using default"
                );
                HeaderName::from_static(DEFAULT_BEARER_HEADER)
            });
        Self {
            gate,
            cookie,
            bearer_header,
            transport: CredentialTransport::Cookie,
        }
    }

    /// Selects the credential transport.
    pub fn with_transport(mut self, transport: CredentialTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Runs the gate on `request`.
    pub async fn check<B>(&self, request: &Request<B>) -> HttpGateResult {
        let path = request.uri().path();
        let (outcome, headers) = match self.transport {
            CredentialTransport::Cookie => {
                let mut channel = CookieChannel::new(request.headers(), &self.cookie);
                let outcome = self.gate.handle(path, &mut channel).await;
                (outcome, channel.into_response_headers())
            },
            CredentialTransport::Bearer => {
                let mut channel = BearerChannel::new(request.headers(), self.bearer_header.clone());
                let outcome = self.gate.handle(path, &mut channel).await;
                (outcome, channel.into_response_headers())
            },
        };
        HttpGateResult { outcome, headers }
    }
}

/// Outcome of [`HttpGate::check`] plus the headers owed to the client.
#[derive(Debug, Clone)]
pub struct HttpGateResult {
    /// What the gate decided.
    pub outcome: GateOutcome,
    /// Credential headers to send with whatever response is produced.
    pub headers: HeaderMap,
}

impl HttpGateResult {
    /// The session derived for this request, if evaluated.
    pub fn session(&self) -> Option<&Session> {
        self.outcome.session()
    }

    /// Whether the handler should run.
    pub fn is_allowed(&self) -> bool {
        self.outcome.decision().is_allow()
    }

    /// Redirect or denial response; `None` if the request proceeds.
    pub fn into_response(self) -> Option<Response<()>> {
        self.outcome.into_response(self.headers)
    }

    /// Appends the credential headers to a handler response.
    pub fn apply<B>(&self, response: &mut Response<B>) {
        for (name, value) in &self.headers {
            response.headers_mut().append(name, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::gateway::{InMemoryGateway, SessionPolicy};
    use http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE};
    use http::StatusCode;

    fn http_gate(gateway: &InMemoryGateway) -> HttpGate {
        let gate = RequestGate::new(Arc::new(gateway.clone()), &GateConfig::default()).unwrap();
        HttpGate::new(Arc::new(gate), CookieConfig::default())
    }

    fn request(path: &str, cookie: Option<String>) -> Request<()> {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(()).unwrap()
    }

    #[tokio::test]
    async fn anonymous_protected_request_redirects() {
        let gateway = InMemoryGateway::new();
        let result = http_gate(&gateway)
            .check(&request("/dashboard?tab=today", None))
            .await;

        assert!(!result.is_allowed());
        let response = result.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/login");
    }

    #[tokio::test]
    async fn forged_cookie_is_expired_on_redirect() {
        let gateway = InMemoryGateway::new();
        let result = http_gate(&gateway)
            .check(&request("/tasks", Some("tg-session=forged".to_string())))
            .await;

        let response = result.into_response().unwrap();
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn renewed_cookie_rides_on_handler_response() {
        let gateway = InMemoryGateway::new().with_policy(SessionPolicy {
            lifetime: chrono::Duration::seconds(10),
            refresh_threshold: chrono::Duration::minutes(1),
            ..SessionPolicy::default()
        });
        let credential = gateway.issue_session("alice");
        let result = http_gate(&gateway)
            .check(&request(
                "/dashboard",
                Some(format!("tg-session={}", credential.expose())),
            ))
            .await;

        assert!(result.is_allowed());
        assert!(result.session().unwrap().is_authenticated());

        let mut response = Response::new("ok");
        result.apply(&mut response);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("tg-session=tg_"));
        assert!(!cookie.contains(credential.expose()));
    }

    #[tokio::test]
    async fn bearer_transport_denies_api_without_token() {
        let gateway = InMemoryGateway::new();
        let gate = http_gate(&gateway).with_transport(CredentialTransport::Bearer);

        let result = gate.check(&request("/api/tasks", None)).await;
        assert_eq!(
            result.into_response().unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let credential = gateway.issue_session("alice");
        let authorized = Request::builder()
            .uri("/api/tasks")
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .body(())
            .unwrap();
        assert!(gate.check(&authorized).await.is_allowed());
    }

    #[tokio::test]
    async fn renewed_bearer_token_uses_configured_header() {
        let gateway = InMemoryGateway::new().with_policy(SessionPolicy {
            lifetime: chrono::Duration::seconds(10),
            refresh_threshold: chrono::Duration::minutes(1),
            ..SessionPolicy::default()
        });
        let gate = RequestGate::new(Arc::new(gateway.clone()), &GateConfig::default()).unwrap();
        let cookie = CookieConfig {
            bearer_response_header: "x-renewed-token".to_string(),
            ..CookieConfig::default()
        };
        let gate = HttpGate::new(Arc::new(gate), cookie).with_transport(CredentialTransport::Bearer);
        assert_eq!(gate.bearer_header, "x-renewed-token");

        let credential = gateway.issue_session("alice");
        let request = Request::builder()
            .uri("/api/tasks")
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .body(())
            .unwrap();
        let result = gate.check(&request).await;
        assert!(result.is_allowed());
        let renewed = result.headers["x-renewed-token"].to_str().unwrap();
        assert!(renewed.starts_with("tg_"));
        assert_ne!(renewed, credential.expose());
    }

    #[test]
    fn invalid_bearer_header_falls_back_once() {
        let gateway = InMemoryGateway::new();
        let gate = RequestGate::new(Arc::new(gateway), &GateConfig::default()).unwrap();
        let cookie = CookieConfig {
            bearer_response_header: "not a header".to_string(),
            ..CookieConfig::default()
        };
        let gate = HttpGate::new(Arc::new(gate), cookie);
        assert_eq!(gate.bearer_header, DEFAULT_BEARER_HEADER);
    }

    #[tokio::test]
    async fn static_assets_are_exempt() {
        let gateway = InMemoryGateway::new();
        let result = http_gate(&gateway).check(&request("/logo.png", None)).await;
        assert_eq!(result.outcome, GateOutcome::Exempt);
        assert!(result.headers.is_empty());
    }
}
