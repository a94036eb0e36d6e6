use crate::*;
use uuid::Uuid;

/// One voter's submission in one election.
///
/// Holds only ciphertext for both envelopes. The candidate choice is never
/// written here; it exists in plaintext only inside a [`DecryptedBallot`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Vote {
    pub id: Uuid,
    pub election: Uuid,
    pub voter: Uuid,

    /// M1, sealed to the Counting Office
    pub m1_identity: String,

    /// M2, sealed to the Decryption Entity
    pub m2_ballot: String,

    pub unique_id: String,

    /// Set from M1 when the CO approves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_id: Option<LinkingId>,

    pub status: VoteStatus,
    pub submitted_at: u64,

    #[serde(default)]
    pub co_decided_by: Option<Uuid>,
    #[serde(default)]
    pub co_decided_at: Option<u64>,
    #[serde(default)]
    pub co_notes: Option<String>,

    #[serde(default)]
    pub de_decided_by: Option<Uuid>,
    #[serde(default)]
    pub de_decided_at: Option<u64>,
}

impl Vote {
    pub fn new(voter: Uuid, submission: Submission) -> Self {
        Vote {
            id: Uuid::new_v4(),
            election: submission.election,
            voter,
            m1_identity: submission.m1_identity,
            m2_ballot: submission.m2_ballot,
            unique_id: submission.unique_id,
            linking_id: None,
            status: VoteStatus::Submitted,
            submitted_at: unix_now(),
            co_decided_by: None,
            co_decided_at: None,
            co_notes: None,
            de_decided_by: None,
            de_decided_at: None,
        }
    }
}

/// A counted, linking-verified ballot.
///
/// Carries no voter reference and no linking id: this is the record that
/// must stay unlinkable to identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecryptedBallot {
    pub id: Uuid,
    pub election: Uuid,
    pub candidate_id: String,
    pub unique_id: String,
    pub decrypted_by: Uuid,
    pub decrypted_at: u64,
}

/// Proof of submission handed to the voter
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub vote: Uuid,
    pub receipt_code: String,
    pub created_at: u64,
}

/// What a voting client sends
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub election: Uuid,
    pub m1_identity: String,
    pub m2_ballot: String,
    pub unique_id: String,
}

/// What a voting client gets back
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub vote_id: Uuid,
    pub receipt_code: String,
    pub unique_id: String,
}

/// Check a client-chosen `unique_id`: non-empty, at most `max_len` bytes,
/// printable ASCII without whitespace.
pub fn validate_unique_id(unique_id: &str, max_len: usize) -> Result<()> {
    if unique_id.is_empty() {
        return Err(Error::InvalidUniqueId("must not be empty"));
    }
    if unique_id.len() > max_len {
        return Err(Error::InvalidUniqueId("too long"));
    }
    if !unique_id.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::InvalidUniqueId(
            "must be printable ASCII without whitespace",
        ));
    }
    Ok(())
}
