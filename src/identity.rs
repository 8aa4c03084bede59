//! Caller identity extraction.
//!
//! The gateway identifies callers by a `user_id=<value>` cookie, falling back
//! to a plain header. Identity is not authenticated here; a missing or unknown
//! id simply ends up as an unknown-user rejection.

use http::header::COOKIE;
use http::HeaderMap;

/// Resolved caller identity, stored in request extensions for downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pulls a user id out of request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityExtractor {
    cookie_name: String,
    header_name: String,
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new("user_id", "x-user-id")
    }
}

impl IdentityExtractor {
    pub fn new(cookie_name: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self { cookie_name: cookie_name.into(), header_name: header_name.into().to_ascii_lowercase() }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Cookie first, then header. Empty values count as absent.
    pub fn extract(&self, headers: &HeaderMap) -> Option<UserId> {
        self.from_cookie(headers).or_else(|| self.from_header(headers)).map(UserId)
    }

    fn from_cookie(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    fn from_header(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
