//! Synchronizer-token CSRF protection.
//!
//! Each session holds a random secret. Tokens handed to pages are
//! `SALT-HASH` with `HASH = base64url(sha256(SALT "-" SECRET))`, so every
//! page can get a distinct token that still verifies against the one secret.

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::{Flow, Stage};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::Method;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Form field and query parameter carrying the token.
pub const TOKEN_FIELD: &str = "_csrf";

/// Headers checked, in order, when neither field nor parameter is present.
pub const TOKEN_HEADERS: [&str; 4] = ["csrf-token", "xsrf-token", "x-csrf-token", "x-xsrf-token"];

const SECRET_BYTES: usize = 18;
const SALT_BYTES: usize = 6;
// base64url without padding: 6 bytes encode to 8 characters
const SALT_CHARS: usize = SALT_BYTES / 3 * 4;

pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash(salt: &str, secret: &str) -> String {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(b"-")
        .chain_update(secret.as_bytes())
        .finalize();
    URL_SAFE_NO_PAD.encode(digest)
}

pub fn create_token(secret: &str) -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let salt = URL_SAFE_NO_PAD.encode(bytes);
    let digest = hash(&salt, secret);
    format!("{salt}-{digest}")
}

pub fn verify_token(secret: &str, token: &str) -> bool {
    // the salt itself may contain '-'
    let (Some(salt), Some(rest)) = (token.get(..SALT_CHARS), token.get(SALT_CHARS..)) else {
        return false;
    };
    let Some(provided) = rest.strip_prefix('-') else {
        return false;
    };
    let expected = hash(salt, secret);
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Token submitted with the request: form field, then query, then headers.
fn submitted_token(ctx: &RequestContext) -> Option<String> {
    if let Some(token) = ctx.form().get(TOKEN_FIELD) {
        return Some(token.to_string());
    }
    if let Some(token) = ctx.query_param(TOKEN_FIELD) {
        return Some(token);
    }
    TOKEN_HEADERS.iter().find_map(|name| {
        ctx.headers()
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// Rejects state-changing requests whose token does not match the session.
#[derive(Debug, Clone, Default)]
pub struct CsrfStage;

#[async_trait]
impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn before(&self, ctx: &mut RequestContext) -> StageResult<Flow> {
        let secret = match ctx.session_mut() {
            Some(session) if !session.is_ephemeral() => match session.data().csrf_secret.clone() {
                Some(secret) => Some(secret),
                None => {
                    let secret = generate_secret();
                    session.data_mut().csrf_secret = Some(secret.clone());
                    Some(secret)
                }
            },
            _ => None,
        };

        if let Some(secret) = &secret {
            ctx.set_csrf_token(create_token(secret));
        }

        if is_safe(ctx.method()) {
            return Ok(Flow::Continue);
        }

        let valid = match (&secret, submitted_token(ctx)) {
            (Some(secret), Some(token)) => verify_token(secret, &token),
            _ => false,
        };
        if valid {
            Ok(Flow::Continue)
        } else {
            Err(StageError::CsrfMismatch)
        }
    }
}
