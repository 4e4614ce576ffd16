use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::anchor::AnchorId;

/// Capability object identifying an archive.
///
/// Derivation and signing are owned by the identity layer; the archive only
/// needs the domain its bricks live in, the anchor id its versions are
/// appended under, and a way to sign those versions.
pub trait KeySsi: Send + Sync + fmt::Debug {
    fn domain(&self) -> &str;

    fn anchor_id(&self) -> AnchorId;

    fn public_key(&self) -> [u8; 32];

    fn sign(&self, payload: &[u8]) -> [u8; 64];
}

/// A [`KeySsi`] backed by an ed25519 key pair. The anchor id is derived from
/// the public key, so anyone holding the id can check who signed a version.
pub struct SeedSsi {
    domain: String,
    key: SigningKey,
}

impl SeedSsi {
    #[must_use]
    pub fn generate(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            key: SigningKey::generate(&mut OsRng),
        }
    }

    #[must_use]
    pub fn from_seed(domain: impl Into<String>, seed: [u8; 32]) -> Self {
        Self {
            domain: domain.into(),
            key: SigningKey::from_bytes(&seed),
        }
    }
}

impl KeySsi for SeedSsi {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn anchor_id(&self) -> AnchorId {
        AnchorId::from_public_key(self.key.verifying_key().as_bytes())
    }

    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.key.sign(payload).to_bytes()
    }
}

impl fmt::Debug for SeedSsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedSsi")
            .field("domain", &self.domain)
            .field("anchor_id", &self.anchor_id())
            .finish_non_exhaustive()
    }
}
