//! Event id and Schnorr signature verification.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::event::Event;

/// Decides whether an event may enter the store.
pub trait Verifier: Send + Sync {
    fn verify(&self, ev: &Event) -> bool;
}

/// NIP-01 id check plus BIP-340 signature check.
pub struct SchnorrVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl SchnorrVerifier {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }

    /// Verify an event's ID and Schnorr signature, reporting what failed.
    pub fn check(&self, ev: &Event) -> Result<()> {
        let hash = event_hash(ev)?;
        let calc_id = hex::encode(hash);
        if calc_id != ev.id {
            return Err(anyhow!("id mismatch"));
        }
        let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
        let msg = Message::from_digest_slice(&hash)?;
        self.secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }
}

impl Default for SchnorrVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier for SchnorrVerifier {
    fn verify(&self, ev: &Event) -> bool {
        match self.check(ev) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(id = %ev.id, "verification failed: {e}");
                false
            }
        }
    }
}

/// Accepts everything; selected with `VERIFY_SIG=0`.
pub struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify(&self, _ev: &Event) -> bool {
        true
    }
}

/// Recompute the Nostr event hash from its fields.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}
