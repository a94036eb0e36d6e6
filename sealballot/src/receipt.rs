use crate::*;
use digest::Digest;
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

const RECEIPT_DOMAIN: &[u8] = b"sealballot receipt v1";

/// What a receipt holder may learn about their vote
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub election: Uuid,
    pub submitted_at: u64,
    pub status: VoteStatus,
}

/// Issues and checks submission receipts.
///
/// A receipt code is SHA-256 over the vote id, the unique id and fresh
/// randomness. It exists before any choice is decrypted and so cannot
/// depend on it.
#[derive(Debug, Clone)]
pub struct ReceiptService {
    entropy_bytes: usize,
}

impl ReceiptService {
    pub fn new(config: &Config) -> Self {
        ReceiptService {
            entropy_bytes: config.receipt_entropy_bytes,
        }
    }

    pub fn issue(&self, vote: &Vote) -> Result<VoteReceipt> {
        let nonce = Zeroizing::new(random_bytes(self.entropy_bytes)?);

        let mut hasher = Sha256::new();
        hasher.update(RECEIPT_DOMAIN);
        hasher.update(vote.id.as_bytes());
        hasher.update(&(vote.unique_id.len() as u64).to_be_bytes());
        hasher.update(vote.unique_id.as_bytes());
        hasher.update(nonce.as_slice());

        Ok(VoteReceipt {
            vote: vote.id,
            receipt_code: hex::encode(hasher.finalize()),
            created_at: unix_now(),
        })
    }

    /// Look up a receipt. Only the voter who cast the vote, or a role
    /// allowed to verify any receipt, may see its status.
    pub fn verify(&self, store: &dyn Store, actor: &Actor, code: &str) -> Result<ReceiptStatus> {
        let receipt = store.receipt(code.trim())?;
        let vote = store.vote(receipt.vote)?;

        if vote.voter != actor.id {
            actor.require(Permission::VerifyAnyReceipt)?;
        }
        debug!(vote = %vote.id, "receipt verified");

        Ok(ReceiptStatus {
            election: vote.election,
            submitted_at: vote.submitted_at,
            status: vote.status,
        })
    }
}
