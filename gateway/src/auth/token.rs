//! Opaque bearer tokens: `<id>.<sig>`, both base64url without padding.
//!
//! The id is 32 random bytes and keys the session store; the signature is
//! HMAC-SHA256 over the encoded id, so forged or mangled tokens are turned
//! away before any store lookup.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ID_BYTES: usize = 32;
const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
}

#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
        })
    }

    /// Fresh `(id, token)` pair.
    pub fn mint(&self) -> (String, String) {
        let mut raw = [0u8; ID_BYTES];
        rand::rng().fill_bytes(&mut raw);
        let id = URL_SAFE_NO_PAD.encode(raw);
        let token = format!("{id}.{}", self.sign(&id));
        (id, token)
    }

    /// Check the signature and return the session id.
    pub fn open(&self, token: &str) -> Result<String, TokenError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed);
        }
        let (id, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if id.is_empty() || sig.is_empty() {
            return Err(TokenError::Malformed);
        }
        let expected = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| TokenError::BadSignature)?;
        Ok(id.to_string())
    }

    fn sign(&self, id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
