//! Key identity for feeds.
//!
//! The signing scheme itself, and the discovery-key derivation it implies,
//! are external collaborators per the design (crypto is out of scope for
//! this crate). What lives here is the minimal seam needed to stand the rest
//! of the system up without hard-coding a particular scheme: an injected
//! [`KeyPairFactory`] for minting new identities, plus the one piece of
//! "derive a discovery key from a public key" math every feed needs
//! regardless of which signing scheme backs it.

use async_trait::async_trait;

pub const KEY_LEN: usize = 32;

/// A public/secret key pair identifying a feed. `secret` is absent for
/// read-only feeds opened from a public key alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public: Vec<u8>,
    pub secret: Option<Vec<u8>>,
}

/// Derives a feed's discovery key deterministically from its public key.
///
/// This is the one piece of "key-derivation primitive" math kept in-crate
/// rather than behind a trait: it has no meaningful alternative
/// implementation the way signing schemes do, and every feed needs it to be
/// reachable by its public key alone.
pub fn discovery_key(public_key: &[u8]) -> Vec<u8> {
    blake3::hash(public_key).as_bytes().to_vec()
}

pub fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

/// Injected collaborator that mints new key pairs for feeds opened without a
/// caller-supplied key. A production deployment would swap this for a real
/// Ed25519 (or similar) factory; the default below exists only to make the
/// rest of the crate runnable without pulling in a signing dependency this
/// design never asked for.
#[async_trait]
pub trait KeyPairFactory: Send + Sync {
    async fn generate(&self) -> KeyPair;
}

/// Default [`KeyPairFactory`]: fixed-length random bytes, not a real
/// signature scheme. Sufficient for feed identity and discovery-key
/// derivation, which is all this crate's core touches.
pub struct RandomKeyPairFactory;

#[async_trait]
impl KeyPairFactory for RandomKeyPairFactory {
    async fn generate(&self) -> KeyPair {
        use rand::RngCore;
        let mut public = vec![0u8; KEY_LEN];
        let mut secret = vec![0u8; KEY_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut public);
        rng.fill_bytes(&mut secret);
        KeyPair {
            public,
            secret: Some(secret),
        }
    }
}
