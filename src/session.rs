// Signed-cookie session persistence.
//
// The session travels as a JSON blob sealed in an authenticated cookie.  The
// server never trusts client-decoded content; only a payload whose signature
// verifies is accepted, and anything else (absent, tampered, malformed)
// yields a fresh session.  The cookie is written exactly once, during the
// initial HTTP response.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, header};
use cookie::{Cookie, CookieJar, Key, SameSite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LiveError;

/// Default cookie name, overridable via `ViewConfig::session_name`.
pub const DEFAULT_SESSION_NAME: &str = "live-session";

/// A per-browser session: an unguessable id plus a small application data
/// map populated at mount time.
///
/// The core treats the id as opaque; it only has to stay stable for the same
/// browser between the initial render and the socket upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl Session {
    /// Mint a fresh session with a random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data: BTreeMap::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed-cookie store: `load` after `save` on the same browser returns the
/// same session until cookie expiry.
pub struct CookieStore {
    key: Key,
    name: String,
}

impl CookieStore {
    /// Derive the signing key from `secret`, which must be at least 32 bytes.
    pub fn new(secret: &[u8], name: impl Into<String>) -> Result<Self, LiveError> {
        if secret.len() < 32 {
            return Err(LiveError::SessionKey);
        }
        Ok(Self {
            key: Key::derive_from(secret),
            name: name.into(),
        })
    }

    /// Recover the session from the request's `Cookie` headers.
    ///
    /// Returns `None` when the cookie is missing, its signature does not
    /// verify, or the payload fails to decode.
    pub fn load(&self, headers: &HeaderMap) -> Option<Session> {
        let mut jar = CookieJar::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for cookie in Cookie::split_parse_encoded(raw.to_owned()).flatten() {
                jar.add_original(cookie.into_owned());
            }
        }
        let verified = jar.signed(&self.key).get(&self.name)?;
        serde_json::from_str(verified.value()).ok()
    }

    /// Sign `session` into a `Set-Cookie`-ready cookie.
    pub fn save(&self, session: &Session) -> Result<Cookie<'static>, LiveError> {
        let payload = serde_json::to_string(session)?;
        let mut cookie = Cookie::new(self.name.clone(), payload);
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);

        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key).add(cookie);
        let signed = jar
            .get(&self.name)
            .expect("cookie was just added to the jar");
        Ok(signed.clone().into_owned())
    }
}
