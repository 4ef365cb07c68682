//! Signed session cookie.
//!
//! The cookie value is `ID.SIG`, where `SIG` is the base64url HMAC-SHA256 of
//! the id under the deployment secret. A value that fails verification is
//! treated as if no cookie had been sent.

use crate::session::domain::SessionId;
use crate::session::error::{SessionError, SessionResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::header::{COOKIE, HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CookieSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    pub fn new(secret: &[u8]) -> SessionResult<Self> {
        if secret.is_empty() {
            return Err(SessionError::InvalidSecret("secret is empty".into()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| SessionError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    fn signature(&self, id: &SessionId) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(id.as_str().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn sign(&self, id: &SessionId) -> String {
        format!("{}.{}", id, URL_SAFE_NO_PAD.encode(self.signature(id)))
    }

    /// Return the id if `value` carries a valid signature for it.
    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (raw_id, raw_sig) = value.rsplit_once('.')?;
        let id = SessionId::parse(raw_id).ok()?;
        let provided = URL_SAFE_NO_PAD.decode(raw_sig).ok()?;
        let expected = self.signature(&id);
        bool::from(expected.as_slice().ct_eq(provided.as_slice())).then_some(id)
    }
}

/// Name, attributes and signer of the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
    max_age: Option<Duration>,
    signer: CookieSigner,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, signer: CookieSigner) -> Self {
        Self {
            name: name.into(),
            secure: false,
            max_age: None,
            signer,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_max_age(&self) -> bool {
        self.max_age.is_some()
    }

    /// First correctly signed session id among the request's cookies.
    pub fn read(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == self.name)
            .find_map(|(_, value)| self.signer.verify(value.trim_matches('"')))
    }

    /// `Set-Cookie` value binding the client to `id`.
    pub fn issue(&self, id: &SessionId) -> SessionResult<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.name,
            self.signer.sign(id)
        );
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::InvalidCookie(e.to_string()))
    }

    /// `Set-Cookie` value that makes the client drop the cookie.
    pub fn expire(&self) -> SessionResult<HeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::InvalidCookie(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> SessionCookie {
        SessionCookie::new("sid", CookieSigner::new(b"test secret").unwrap())
    }

    fn headers_with(cookie_line: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie_line).unwrap());
        headers
    }

    #[test]
    fn signed_value_verifies() {
        let signer = CookieSigner::new(b"k").unwrap();
        let id = SessionId::generate();
        assert_eq!(signer.verify(&signer.sign(&id)), Some(id));
    }

    #[test]
    fn other_key_does_not_verify() {
        let id = SessionId::generate();
        let value = CookieSigner::new(b"one").unwrap().sign(&id);
        assert_eq!(CookieSigner::new(b"two").unwrap().verify(&value), None);
    }

    #[test]
    fn unsigned_id_is_ignored() {
        let signer = CookieSigner::new(b"k").unwrap();
        let id = SessionId::generate();
        assert_eq!(signer.verify(id.as_str()), None);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(CookieSigner::new(b"").is_err());
    }

    #[test]
    fn reads_own_cookie_among_others() {
        let cookie = cookie();
        let id = SessionId::generate();
        let line = format!("theme=dark; sid={}; lang=en", cookie.signer.sign(&id));
        assert_eq!(cookie.read(&headers_with(&line)), Some(id));
        assert_eq!(cookie.read(&headers_with("theme=dark")), None);
        assert_eq!(cookie.read(&HeaderMap::new()), None);
    }

    #[test]
    fn issued_cookie_carries_attributes() {
        let id = SessionId::generate();
        let value = cookie()
            .secure(true)
            .max_age(Some(Duration::from_secs(3600)))
            .issue(&id)
            .unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with(&format!("sid={}.", id)));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Max-Age=3600"));
        assert!(value.ends_with("; Secure"));
    }

    #[test]
    fn plain_http_cookie_is_not_secure() {
        let value = cookie().issue(&SessionId::generate()).unwrap();
        assert!(!value.to_str().unwrap().contains("Secure"));
        assert!(!value.to_str().unwrap().contains("Max-Age"));
    }

    #[test]
    fn expiring_cookie_clears_value() {
        let value = cookie().expire().unwrap();
        assert!(value.to_str().unwrap().starts_with("sid=;"));
        assert!(value.to_str().unwrap().contains("Max-Age=0"));
    }
}
