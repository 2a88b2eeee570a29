//! Session headers and token rotation.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::api::header;

/// Supplies per-request headers and observes response headers.
pub trait SessionProvider: Send + Sync {
  /// Headers to attach to an outgoing request.
  fn headers(&self) -> Vec<(String, String)>;

  /// Called with the headers of every network response.
  fn on_response(&self, _headers: &[(String, String)]) {}
}

/// No session: requests go out without session headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSession;

impl SessionProvider for NoSession {
  fn headers(&self) -> Vec<(String, String)> {
    Vec::new()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
  value: String,
  expires: Option<String>,
}

/// Token-based API session.
///
/// Sends `X-Token`, plus `X-Signature` (hex SHA-256 of secret followed by
/// token) when an API secret is set. The server may rotate the token on any
/// response; the new token is picked up from `X-Token`/`X-Token-Expires`.
#[derive(Debug)]
pub struct Session {
  token: RwLock<Option<Token>>,
  secret: Option<String>,
}

impl Session {
  pub fn new(secret: Option<String>) -> Self {
    Self {
      token: RwLock::new(None),
      secret,
    }
  }

  pub fn with_token(self, token: impl Into<String>) -> Self {
    *self.token.write() = Some(Token {
      value: token.into(),
      expires: None,
    });
    self
  }

  pub fn token(&self) -> Option<String> {
    self.token.read().as_ref().map(|t| t.value.clone())
  }

  pub fn expires(&self) -> Option<String> {
    self.token.read().as_ref().and_then(|t| t.expires.clone())
  }

  pub fn signature(&self, token: &str) -> Option<String> {
    self.secret.as_ref().map(|secret| sign(secret, token))
  }
}

pub fn sign(secret: &str, token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(secret.as_bytes());
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}

impl SessionProvider for Session {
  fn headers(&self) -> Vec<(String, String)> {
    let Some(token) = self.token() else {
      return Vec::new();
    };
    let mut headers = vec![(header::X_TOKEN.to_string(), token.clone())];
    if let Some(signature) = self.signature(&token) {
      headers.push((header::X_SIGNATURE.to_string(), signature));
    }
    headers
  }

  fn on_response(&self, headers: &[(String, String)]) {
    let find = |name: &str| {
      headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
    };
    let Some(value) = find(header::X_TOKEN) else {
      return;
    };
    let next = Token {
      value,
      expires: find(header::X_TOKEN_EXPIRES),
    };

    let mut token = self.token.write();
    if token.as_ref() != Some(&next) {
      debug!(expires = ?next.expires, "session token updated");
      *token = Some(next);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_signature_is_sha256_of_secret_and_token() {
    assert_eq!(
      sign("secret", "token"),
      "a78dd2126c3ef3a0fafe52ae69a366340edd5046474eab3d03402f95fef8289e"
    );
    assert_eq!(sign("secret", "token").len(), 64);
    assert_ne!(sign("secret", "token"), sign("secret", "other"));
  }

  #[test]
  fn test_headers_without_token_are_empty() {
    let session = Session::new(Some("secret".into()));
    assert!(session.headers().is_empty());
    assert!(NoSession.headers().is_empty());
  }

  #[test]
  fn test_headers_carry_token_and_signature() {
    let session = Session::new(Some("secret".into())).with_token("abc");
    let headers = session.headers();
    assert_eq!(headers[0], ("X-Token".to_string(), "abc".to_string()));
    assert_eq!(headers[1], ("X-Signature".to_string(), sign("secret", "abc")));

    let unsigned = Session::new(None).with_token("abc");
    assert_eq!(unsigned.headers().len(), 1);
  }

  #[test]
  fn test_token_rotates_from_response_headers() {
    let session = Session::new(None).with_token("old");
    session.on_response(&[
      ("x-token".to_string(), "new".to_string()),
      ("x-token-expires".to_string(), "2026-10-17T00:00:00+0000".to_string()),
    ]);
    assert_eq!(session.token().as_deref(), Some("new"));
    assert_eq!(session.expires().as_deref(), Some("2026-10-17T00:00:00+0000"));

    session.on_response(&[("Content-Type".to_string(), "application/json".to_string())]);
    assert_eq!(session.token().as_deref(), Some("new"));
  }
}
