//! Session credentials and the transport seam that carries them.
//!
//! The gate never touches cookies or headers directly. It talks to a
//! [`CredentialChannel`], which reads the inbound credential and records the
//! outbound one for the response. Each transport supplies its own channel:
//!
//! - [`CookieChannel`] - `Cookie` in, `Set-Cookie` out.
//! - [`BearerChannel`] - `Authorization: Bearer` in, a response header out.
//! - [`MemoryChannel`] - no transport; used by tests and non-HTTP callers.

use std::fmt;

use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::CookieConfig;

/// Opaque session credential presented with each request.
///
/// `Debug` output is redacted so credentials never end up in logs.
///
/// # Example
///
/// ```rust
/// use taskgate::gate::Credential;
///
/// let credential = Credential::new("secret-token");
/// assert_eq!(credential.expose(), "secret-token");
/// assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw credential value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value. Only transports and gateways should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Read/write access to the session credential of one request/response pair.
///
/// After [`write`](Self::write) or [`clear`](Self::clear), [`read`](Self::read)
/// observes the new value, so later stages of the same request see the
/// renewed session.
pub trait CredentialChannel: Send {
    /// The credential currently attached to the request, if any.
    fn read(&self) -> Option<Credential>;

    /// Attach a renewed credential to the response.
    fn write(&mut self, credential: Credential);

    /// Remove the credential from the client.
    fn clear(&mut self);
}

/// Channel backed by plain values, for tests and non-HTTP callers.
#[derive(Debug, Default, Clone)]
pub struct MemoryChannel {
    current: Option<Credential>,
    written: Option<Credential>,
    cleared: bool,
}

impl MemoryChannel {
    /// A channel presenting `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: Some(credential),
            ..Default::default()
        }
    }

    /// A channel presenting no credential.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The credential written back, if any.
    pub fn written(&self) -> Option<&Credential> {
        self.written.as_ref()
    }

    /// Whether the credential was cleared.
    pub fn was_cleared(&self) -> bool {
        self.cleared
    }
}

impl CredentialChannel for MemoryChannel {
    fn read(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn write(&mut self, credential: Credential) {
        self.current = Some(credential.clone());
        self.written = Some(credential);
        self.cleared = false;
    }

    fn clear(&mut self) {
        self.current = None;
        self.written = None;
        self.cleared = true;
    }
}

/// Cookie transport: reads the `Cookie` header, emits `Set-Cookie`.
///
/// # Example
///
/// ```rust
/// use http::{HeaderMap, HeaderValue};
/// use taskgate::config::CookieConfig;
/// use taskgate::gate::{CookieChannel, Credential, CredentialChannel};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("cookie", HeaderValue::from_static("theme=dark; tg-session=abc"));
///
/// let config = CookieConfig::default();
/// let mut channel = CookieChannel::new(&headers, &config);
/// assert_eq!(channel.read(), Some(Credential::new("abc")));
///
/// channel.write(Credential::new("renewed"));
/// let out = channel.into_response_headers();
/// let cookie = out.get("set-cookie").unwrap().to_str().unwrap();
/// assert!(cookie.starts_with("tg-session=renewed;"));
/// assert!(cookie.contains("HttpOnly"));
/// ```
#[derive(Debug)]
pub struct CookieChannel<'a> {
    config: &'a CookieConfig,
    current: Option<Credential>,
    outbound: HeaderMap,
}

impl<'a> CookieChannel<'a> {
    /// Creates a channel over the inbound request headers.
    pub fn new(request_headers: &HeaderMap, config: &'a CookieConfig) -> Self {
        Self {
            current: find_cookie(request_headers, &config.name).map(Credential::new),
            config,
            outbound: HeaderMap::new(),
        }
    }

    /// Headers to append to the response.
    pub fn into_response_headers(self) -> HeaderMap {
        self.outbound
    }

    fn set_cookie(&mut self, value: &str, max_age: u64) {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite={}",
            self.config.name,
            urlencoding::encode(value),
            self.config.path,
            max_age,
            self.config.same_site
        );
        if self.config.secure {
            cookie.push_str("; Secure");
        }
        match HeaderValue::from_str(&cookie) {
            Ok(header) => {
                self.outbound.append(SET_COOKIE, header);
            },
            Err(e) => tracing::warn!(error = %e, "dropping unrepresentable session cookie"),
        }
    }
}

impl CredentialChannel for CookieChannel<'_> {
    fn read(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn write(&mut self, credential: Credential) {
        self.set_cookie(credential.expose(), self.config.max_age_secs);
        self.current = Some(credential);
    }

    fn clear(&mut self) {
        self.set_cookie("", 0);
        self.current = None;
    }
}

/// Bearer transport: reads `Authorization: Bearer`, emits a response header.
///
/// A cleared credential is signalled with an empty header value.
#[derive(Debug)]
pub struct BearerChannel {
    header: HeaderName,
    current: Option<Credential>,
    outbound: HeaderMap,
}

impl BearerChannel {
    /// Creates a channel over the inbound request headers.
    ///
    /// Renewed tokens are returned in `response_header`.
    pub fn new(request_headers: &HeaderMap, response_header: HeaderName) -> Self {
        let current = request_headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Credential::new);
        Self {
            header: response_header,
            current,
            outbound: HeaderMap::new(),
        }
    }

    /// Headers to append to the response.
    pub fn into_response_headers(self) -> HeaderMap {
        self.outbound
    }
}

impl CredentialChannel for BearerChannel {
    fn read(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn write(&mut self, credential: Credential) {
        match HeaderValue::from_str(credential.expose()) {
            Ok(value) => {
                self.outbound.insert(self.header.clone(), value);
            },
            Err(e) => tracing::warn!(error = %e, "dropping unrepresentable bearer token"),
        }
        self.current = Some(credential);
    }

    fn clear(&mut self) {
        self.outbound
            .insert(self.header.clone(), HeaderValue::from_static(""));
        self.current = None;
    }
}

fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| {
            urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cookie_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn cookie_channel_reads_named_cookie() {
        let config = CookieConfig::default();
        let headers = cookie_headers("a=1; tg-session=tok%2B1; b=2");
        let channel = CookieChannel::new(&headers, &config);
        assert_eq!(channel.read(), Some(Credential::new("tok+1")));
    }

    #[test]
    fn cookie_channel_ignores_empty_and_missing() {
        let config = CookieConfig::default();
        let headers = cookie_headers("tg-session=");
        assert!(CookieChannel::new(&headers, &config).read().is_none());
        assert!(CookieChannel::new(&HeaderMap::new(), &config)
            .read()
            .is_none());
    }

    #[test]
    fn cookie_write_is_visible_to_later_reads() {
        let config = CookieConfig::default();
        let headers = cookie_headers("tg-session=old");
        let mut channel = CookieChannel::new(&headers, &config);
        channel.write(Credential::new("new"));
        assert_eq!(channel.read(), Some(Credential::new("new")));
    }

    #[test]
    fn cookie_clear_expires_cookie() {
        let config = CookieConfig {
            secure: false,
            ..CookieConfig::default()
        };
        let headers = cookie_headers("tg-session=old");
        let mut channel = CookieChannel::new(&headers, &config);
        channel.clear();
        assert!(channel.read().is_none());

        let out = channel.into_response_headers();
        let cookie = out.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert_eq!(cookie, "tg-session=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn bearer_channel_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let mut channel = BearerChannel::new(&headers, HeaderName::from_static("x-session-token"));
        assert_eq!(channel.read(), Some(Credential::new("abc")));

        channel.write(Credential::new("def"));
        let out = channel.into_response_headers();
        assert_eq!(out.get("x-session-token").unwrap(), "def");
    }

    #[test]
    fn bearer_channel_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        let channel = BearerChannel::new(&headers, HeaderName::from_static("x-session-token"));
        assert!(channel.read().is_none());
    }

    #[test]
    fn memory_channel_tracks_writes() {
        let mut channel = MemoryChannel::with_credential(Credential::new("a"));
        channel.write(Credential::new("b"));
        assert_eq!(channel.written(), Some(&Credential::new("b")));
        channel.clear();
        assert!(channel.was_cleared());
        assert!(channel.read().is_none());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert!(!format!("{credential:?}").contains("super-secret"));
    }
}
