//! Request gate: session validation and routing decisions.
//!
//! Every inbound request passes through [`RequestGate::handle`]. Exempt paths
//! (static assets, allow-listed files) return immediately. Everything else is
//! evaluated against a freshly validated session:
//!
//! | Session       | Path                  | Decision                      |
//! |---------------|-----------------------|-------------------------------|
//! | anonymous     | protected             | `Redirect(login_path)`        |
//! | anonymous     | API                   | `Deny(Unauthenticated)`       |
//! | anonymous     | anything else         | `Allow`                       |
//! | authenticated | public-only           | `Redirect(home_path)`         |
//! | authenticated | anything else         | `Allow`                       |
//!
//! Validation always goes to the [`AuthGateway`]; a credential that merely
//! looks valid is never trusted. If the gateway cannot be reached the gate
//! fails closed (treats the request as anonymous) and leaves the presented
//! credential alone. A credential the gateway rejects is cleared, and a renewed
//! one is written back through the [`CredentialChannel`].
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use taskgate::config::GateConfig;
//! use taskgate::gate::{Decision, MemoryChannel, RequestGate};
//! use taskgate::gateway::InMemoryGateway;
//!
//! let gateway = Arc::new(InMemoryGateway::new());
//! let gate = RequestGate::new(gateway.clone(), &GateConfig::default()).unwrap();
//!
//! let mut anonymous = MemoryChannel::empty();
//! let decision = gate.authorize("/dashboard", &mut anonymous).await;
//! assert_eq!(decision, Decision::Redirect("/login".to_string()));
//!
//! let mut signed_in = MemoryChannel::with_credential(gateway.issue_session("alice"));
//! assert_eq!(gate.authorize("/dashboard", &mut signed_in).await, Decision::Allow);
//! # }
//! ```

pub mod credential;
pub mod middleware;
pub mod rules;

use std::fmt;
use std::sync::Arc;

use http::header::LOCATION;
use http::{HeaderMap, HeaderValue, Response, StatusCode};

use crate::config::GateConfig;
use crate::error::ConfigError;
use crate::gateway::AuthGateway;
use crate::session::Session;

pub use credential::{BearerChannel, CookieChannel, Credential, CredentialChannel, MemoryChannel};
pub use middleware::{CredentialTransport, HttpGate, HttpGateResult};
pub use rules::PathRules;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No valid session on an endpoint that cannot redirect.
    Unauthenticated,
}

impl DenyReason {
    /// HTTP status for this denial.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("authentication required"),
        }
    }
}

/// What the gate decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Continue to the route handler.
    Allow,
    /// Send the client to another path.
    Redirect(String),
    /// Refuse the request.
    Deny(DenyReason),
}

impl Decision {
    /// Whether the request proceeds.
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Result of running the gate pipeline on one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The path is exempt; no session was derived.
    Exempt,
    /// The path was evaluated.
    Evaluated {
        /// Routing decision.
        decision: Decision,
        /// Session derived for this request.
        session: Session,
    },
}

impl GateOutcome {
    /// The routing decision. Exempt paths are allowed.
    pub fn decision(&self) -> Decision {
        match self {
            Self::Exempt => Decision::Allow,
            Self::Evaluated { decision, .. } => decision.clone(),
        }
    }

    /// The derived session, if the path was evaluated.
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Exempt => None,
            Self::Evaluated { session, .. } => Some(session),
        }
    }

    /// Builds the short-circuit response for redirects and denials.
    ///
    /// Returns `None` when the request should proceed. `outbound` headers
    /// (renewed or cleared credentials) are copied onto the response.
    pub fn into_response(self, outbound: HeaderMap) -> Option<Response<()>> {
        let (status, location) = match self.decision() {
            Decision::Allow => return None,
            Decision::Redirect(location) => (StatusCode::SEE_OTHER, Some(location)),
            Decision::Deny(reason) => (reason.status(), None),
        };

        let mut response = Response::new(());
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in &outbound {
            headers.append(name, value.clone());
        }
        if let Some(location) = location {
            match HeaderValue::from_str(&location) {
                Ok(value) => {
                    headers.insert(LOCATION, value);
                },
                Err(e) => {
                    tracing::warn!(%location, error = %e, "invalid redirect target");
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                },
            }
        }
        Some(response)
    }
}

/// Validates sessions and decides allow/redirect/deny.
pub struct RequestGate {
    auth: Arc<dyn AuthGateway>,
    rules: PathRules,
    login_path: String,
    home_path: String,
}

impl fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGate")
            .field("rules", &self.rules)
            .field("login_path", &self.login_path)
            .field("home_path", &self.home_path)
            .finish_non_exhaustive()
    }
}

impl RequestGate {
    /// Creates a gate.
    ///
    /// Fails if a pattern does not compile, or if the login or home path
    /// would redirect to itself.
    pub fn new(auth: Arc<dyn AuthGateway>, config: &GateConfig) -> Result<Self, ConfigError> {
        let rules = PathRules::from_config(config)?;
        if rules.is_protected(&config.login_path) {
            return Err(ConfigError::InvalidRoute {
                path: config.login_path.clone(),
                reason: "login path must not be protected".to_string(),
            });
        }
        if rules.is_public_only(&config.home_path) {
            return Err(ConfigError::InvalidRoute {
                path: config.home_path.clone(),
                reason: "home path must not be public-only".to_string(),
            });
        }
        Ok(Self {
            auth,
            rules,
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
        })
    }

    /// Compiled routing rules.
    pub fn rules(&self) -> &PathRules {
        &self.rules
    }

    /// Pipeline entry point: skips exempt paths, evaluates everything else.
    pub async fn handle<C>(&self, path: &str, channel: &mut C) -> GateOutcome
    where
        C: CredentialChannel + ?Sized,
    {
        if self.rules.is_exempt(path) {
            return GateOutcome::Exempt;
        }
        let (decision, session) = self.evaluate(path, channel).await;
        GateOutcome::Evaluated { decision, session }
    }

    /// Decides what happens to a request for `path`.
    ///
    /// Does not consult the exempt list; use [`handle`](Self::handle) for
    /// that.
    pub async fn authorize<C>(&self, path: &str, channel: &mut C) -> Decision
    where
        C: CredentialChannel + ?Sized,
    {
        self.evaluate(path, channel).await.0
    }

    /// Validates the session and decides, returning both.
    pub async fn evaluate<C>(&self, path: &str, channel: &mut C) -> (Decision, Session)
    where
        C: CredentialChannel + ?Sized,
    {
        let session = self.resolve_session(path, channel).await;
        let decision = self.decide(path, &session);
        match &decision {
            Decision::Allow => tracing::debug!(
                path,
                authenticated = session.is_authenticated(),
                "request allowed"
            ),
            Decision::Redirect(location) => {
                tracing::info!(path, %location, "request redirected")
            },
            Decision::Deny(reason) => tracing::info!(path, %reason, "request denied"),
        }
        (decision, session)
    }

    async fn resolve_session<C>(&self, path: &str, channel: &mut C) -> Session
    where
        C: CredentialChannel + ?Sized,
    {
        let Some(credential) = channel.read() else {
            return Session::anonymous();
        };

        match self.auth.validate_session(&credential).await {
            Ok(validation) => {
                let renewed = validation.refreshed.is_some();
                if let Some(refreshed) = validation.refreshed {
                    channel.write(refreshed);
                }
                match validation.identity {
                    Some(identity) => {
                        if renewed {
                            tracing::debug!(user = %identity, "session credential renewed");
                        }
                        Session::authenticated(identity)
                    },
                    None => {
                        if !renewed {
                            channel.clear();
                        }
                        tracing::debug!(path, "credential rejected");
                        Session::anonymous()
                    },
                }
            },
            Err(e) => {
                tracing::warn!(path, error = %e, "session validation failed, treating request as anonymous");
                Session::anonymous()
            },
        }
    }

    fn decide(&self, path: &str, session: &Session) -> Decision {
        if session.is_authenticated() {
            if self.rules.is_public_only(path) {
                return Decision::Redirect(self.home_path.clone());
            }
            return Decision::Allow;
        }
        if self.rules.is_protected(path) {
            Decision::Redirect(self.login_path.clone())
        } else if self.rules.is_api(path) {
            Decision::Deny(DenyReason::Unauthenticated)
        } else {
            Decision::Allow
        }
    }
}
