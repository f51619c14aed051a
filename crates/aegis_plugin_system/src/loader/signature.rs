//! Ed25519 signature verification for custom plugin binaries, against a
//! revocable registry of trusted publisher keys.

use dashmap::DashMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::PluginError;

struct TrustedKey {
    public_key: VerifyingKey,
    revoked: bool,
}

/// Every known trusted publisher key, keyed by an operator-assigned name.
/// Revocation marks a key unusable without forgetting its identity, so an
/// audit trail of "what this key once signed" stays intact.
pub struct KeyRegistry {
    keys: DashMap<String, TrustedKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self { keys: DashMap::new() }
    }

    pub fn add_key(&self, name: impl Into<String>, public_key: VerifyingKey) {
        self.keys.insert(name.into(), TrustedKey { public_key, revoked: false });
    }

    pub fn revoke(&self, name: &str) {
        if let Some(mut key) = self.keys.get_mut(name) {
            key.revoked = true;
        }
    }

    /// Checks `signature` against `binary` for every non-revoked trusted
    /// key, returning the first key name that verifies.
    pub fn verify(&self, binary: &[u8], signature: &Signature) -> Result<String, PluginError> {
        for entry in self.keys.iter() {
            if entry.value().revoked {
                continue;
            }
            if entry.value().public_key.verify(binary, signature).is_ok() {
                return Ok(entry.key().clone());
            }
        }
        Err(PluginError::SignatureInvalid)
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn test_signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn verifies_against_a_registered_key() {
        let signing_key = test_signing_key(1);
        let registry = KeyRegistry::new();
        registry.add_key("publisher-a", signing_key.verifying_key());

        let binary = b"plugin binary bytes";
        let signature = signing_key.sign(binary);

        assert_eq!(registry.verify(binary, &signature).unwrap(), "publisher-a");
    }

    #[test]
    fn rejects_an_unknown_signer() {
        let signing_key = test_signing_key(2);
        let registry = KeyRegistry::new();

        let binary = b"plugin binary bytes";
        let signature = signing_key.sign(binary);

        assert!(matches!(registry.verify(binary, &signature), Err(PluginError::SignatureInvalid)));
    }

    #[test]
    fn revoked_keys_no_longer_verify() {
        let signing_key = test_signing_key(3);
        let registry = KeyRegistry::new();
        registry.add_key("publisher-a", signing_key.verifying_key());

        let binary = b"plugin binary bytes";
        let signature = signing_key.sign(binary);
        assert!(registry.verify(binary, &signature).is_ok());

        registry.revoke("publisher-a");
        assert!(matches!(registry.verify(binary, &signature), Err(PluginError::SignatureInvalid)));
    }
}
