//! Ed25519 server signing key.
//!
//! Outbound transactions are signed with this server's key so the remote can
//! authenticate the origin.
//!
//! # Key IDs
//! Key IDs follow the Matrix convention: `ed25519:<fingerprint>`, where the
//! fingerprint is the first 6 bytes of the public key, hex-encoded.
//!
//! # Storage
//! The seed comes from `federation.signing_key_seed` (base64url, 32 bytes).
//! Without one, a throwaway key is generated at startup.

use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use tracing::warn;

use crate::error::FederationError;

/// An Ed25519 signing key pair for this server.
pub struct ServerKeyPair {
    /// Key ID in the format `ed25519:<12-char-hex>`.
    pub key_id: String,
    signing_key: SigningKey,
}

impl ServerKeyPair {
    /// Generate a brand-new random Ed25519 key pair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Reconstruct a key pair from its raw 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, FederationError> {
        let bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| FederationError::KeyLoad("seed must be exactly 32 bytes".into()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    /// Reconstruct a key pair from a base64url seed as written in the config.
    pub fn from_seed_base64(seed: &str) -> Result<Self, FederationError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(seed.trim())
            .map_err(|e| FederationError::KeyLoad(format!("seed is not base64url: {e}")))?;
        Self::from_seed(&bytes)
    }

    /// Load the configured key, or generate one if none is configured.
    pub fn load_or_generate(seed: Option<&str>) -> Result<Self, FederationError> {
        match seed {
            Some(seed) => Self::from_seed_base64(seed),
            None => {
                warn!("No federation signing key configured — generating a throwaway Ed25519 key");
                Ok(Self::generate())
            }
        }
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let key_id = derive_key_id(signing_key.verifying_key().as_bytes());
        Self { key_id, signing_key }
    }

    /// Return the public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Return the public key as a base64url-encoded string.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a canonical JSON string and return the base64url-encoded signature.
    pub fn sign_json(&self, canonical_json: &str) -> String {
        let sig = self.signing_key.sign(canonical_json.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sig.to_bytes())
    }
}

/// Derive a stable key ID from raw public key bytes.
fn derive_key_id(pubkey_bytes: &[u8]) -> String {
    format!("ed25519:{}", hex::encode(&pubkey_bytes[..6]))
}

/// Verify an Ed25519 signature.
///
/// * `pubkey_base64` — base64url-encoded 32-byte verifying key
/// * `sig_base64`    — base64url-encoded 64-byte signature
/// * `message`       — original signed bytes
#[cfg(test)]
pub(crate) fn verify_signature(
    pubkey_base64: &str,
    sig_base64: &str,
    message: &[u8],
) -> Result<(), FederationError> {
    use ed25519_dalek::Verifier;

    let invalid = |what: &str| FederationError::KeyLoad(format!("invalid {what}"));
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let pubkey_bytes: [u8; 32] = engine
        .decode(pubkey_base64)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("public key"))?;
    let sig_bytes: [u8; 64] = engine
        .decode(sig_base64)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("signature"))?;

    let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes).map_err(|_| invalid("public key"))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &signature).map_err(|_| invalid("signature"))
}
