use crate::*;
use thiserror::Error;
use uuid::Uuid;

/// Why a decryption attempt failed.
///
/// The detail is for operators only; see [`Error::public_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionFailure {
    /// The armor, frame or sealed bytes could not be parsed
    Malformed,

    /// The envelope names a different recipient key
    WrongRecipient,

    /// The private key material could not be imported
    KeyImport,

    /// The ciphertext failed authentication (wrong key or tampered)
    Authentication,

    /// The backend did not answer within the configured bound
    Timeout,

    /// Any other backend failure
    Backend(String),
}

impl std::fmt::Display for DecryptionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DecryptionFailure::Malformed => write!(f, "malformed envelope"),
            DecryptionFailure::WrongRecipient => write!(f, "envelope not addressed to this key"),
            DecryptionFailure::KeyImport => write!(f, "private key failed to import"),
            DecryptionFailure::Authentication => write!(f, "ciphertext failed authentication"),
            DecryptionFailure::Timeout => write!(f, "backend timed out"),
            DecryptionFailure::Backend(e) => write!(f, "backend failure: {}", e),
        }
    }
}

/// Broad error classes, used to decide what a caller is allowed to see and
/// whether an operator should be alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    State,
    Crypto,
    Integrity,
    Authorization,
    NotFound,
    Storage,
}

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("sealballot: key generation failed: {0}")]
    KeyGeneration(String),

    #[error("sealballot: encryption failed: {0}")]
    Encryption(String),

    #[error("sealballot: decryption failed: {0}")]
    Decryption(DecryptionFailure),

    #[error("sealballot: no {authority} key material for election {election}")]
    KeyMaterialMissing { election: Uuid, authority: Authority },

    #[error("sealballot: key material for election {0} was revoked")]
    KeyMaterialRevoked(Uuid),

    #[error("sealballot: election {0} is still open")]
    ElectionStillOpen(Uuid),

    #[error("sealballot: payload schema error: {0}")]
    Schema(String),

    #[error("sealballot: election {0} is not open for voting")]
    ElectionNotOpen(Uuid),

    #[error("sealballot: voter {voter} is not assigned to election {election}")]
    NotAssigned { election: Uuid, voter: Uuid },

    #[error("sealballot: voter {voter} has already voted in election {election}")]
    AlreadyVoted { election: Uuid, voter: Uuid },

    #[error("sealballot: unique_id is already in use")]
    DuplicateUniqueId,

    #[error("sealballot: invalid unique_id: {0}")]
    InvalidUniqueId(&'static str),

    #[error("sealballot: vote is {current}, cannot move to {attempted}")]
    InvalidState {
        current: VoteStatus,
        attempted: VoteStatus,
    },

    #[error("sealballot: linking id mismatch on vote {0}")]
    LinkingMismatch(Uuid),

    #[error("sealballot: role {role} may not {permission}")]
    Unauthorized { role: Role, permission: Permission },

    #[error("sealballot: vote {0} not found")]
    VoteNotFound(Uuid),

    #[error("sealballot: candidate {0} does not exist in this election")]
    CandidateNotFound(String),

    #[error("sealballot: receipt not found")]
    ReceiptNotFound,

    #[error("sealballot: receipt code collision")]
    ReceiptCollision,

    #[error("sealballot: storage error: {0}")]
    Storage(String),

    #[error("sealballot: configuration error: {0}")]
    Config(String),

    #[error("sealballot: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sealballot: CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidUniqueId(_)
            | Error::Schema(_)
            | Error::ElectionNotOpen(_)
            | Error::NotAssigned { .. }
            | Error::AlreadyVoted { .. }
            | Error::DuplicateUniqueId
            | Error::CandidateNotFound(_)
            | Error::Config(_)
            | Error::Json(_) => ErrorCategory::Validation,
            Error::InvalidState { .. } | Error::ElectionStillOpen(_) => ErrorCategory::State,
            Error::KeyGeneration(_)
            | Error::KeyMaterialMissing { .. }
            | Error::KeyMaterialRevoked(_)
            | Error::Encryption(_)
            | Error::Decryption(_)
            | Error::Cbor(_) => ErrorCategory::Crypto,
            Error::LinkingMismatch(_) => ErrorCategory::Integrity,
            Error::Unauthorized { .. } => ErrorCategory::Authorization,
            Error::VoteNotFound(_) | Error::ReceiptNotFound => ErrorCategory::NotFound,
            Error::ReceiptCollision | Error::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Text that is safe to show to a non-operator.
    ///
    /// Crypto and storage failures are reduced to a generic sentence; the
    /// full `Display` output stays in the logs.
    pub fn public_message(&self) -> String {
        match self.category() {
            ErrorCategory::Crypto => "sealballot: a cryptographic operation failed".to_owned(),
            ErrorCategory::Storage => "sealballot: an internal storage error occurred".to_owned(),
            _ => self.to_string(),
        }
    }

    /// Whether this error should raise an operator-visible alert
    pub fn is_integrity_violation(&self) -> bool {
        self.category() == ErrorCategory::Integrity
    }
}

impl From<DecryptionFailure> for Error {
    fn from(failure: DecryptionFailure) -> Self {
        Error::Decryption(failure)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
