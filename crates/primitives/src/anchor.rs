#[cfg(test)]
#[path = "tests/anchor.rs"]
mod tests;

use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::brick::HashLink;
use crate::hash::Hash;
use crate::ssi::KeySsi;

/// Identifier of one append-only version chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(String);

impl AnchorId {
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(Hash::new(public_key).to_base58())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<String> for AnchorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A signed `{new_hash, prev_pointer}` record appended to the anchoring
/// backend for every new brick map version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AnchorValue {
    pub hash_link: HashLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<HashLink>,
    pub public_key: String,
    pub signature: String,
}

impl AnchorValue {
    #[must_use]
    pub fn signed(ssi: &dyn KeySsi, hash_link: HashLink, previous: Option<HashLink>) -> Self {
        let payload = Self::signing_payload(&hash_link, previous.as_ref());
        let signature = ssi.sign(payload.as_bytes());

        Self {
            hash_link,
            previous,
            public_key: bs58::encode(ssi.public_key()).into_string(),
            signature: bs58::encode(signature).into_string(),
        }
    }

    fn signing_payload(hash_link: &HashLink, previous: Option<&HashLink>) -> Hash {
        let previous = previous.map_or(&[][..], |link| &link[..]);

        Hash::of_parts(&[&hash_link[..], previous])
    }

    /// The anchor id of whoever signed this value.
    #[must_use]
    pub fn signer(&self) -> Option<AnchorId> {
        decode_fixed::<32>(&self.public_key).map(|key| AnchorId::from_public_key(&key))
    }

    /// Checks the signature against the embedded public key.
    #[must_use]
    pub fn verify(&self) -> bool {
        let (Some(public_key), Some(signature)) = (
            decode_fixed::<32>(&self.public_key),
            decode_fixed::<64>(&self.signature),
        ) else {
            return false;
        };

        let Ok(key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };

        let payload = Self::signing_payload(&self.hash_link, self.previous.as_ref());

        key.verify(payload.as_bytes(), &Signature::from_bytes(&signature))
            .is_ok()
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Option<[u8; N]> {
    bs58::decode(encoded).into_vec().ok()?.try_into().ok()
}
