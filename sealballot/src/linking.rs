//! Plaintext schema of the two envelopes and the linking-id check that
//! binds a CO approval to a DE decryption.
//!
//! M1 (identity, sealed to the CO) and M2 (ballot, sealed to the DE) are JSON
//! objects that both carry the same `linking_id`. The CO stores the value it
//! read from M1; the DE compares it to the one it reads from M2.

use crate::*;
use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use subtle::ConstantTimeEq;

/// Shared secret token present in both envelopes.
///
/// `Debug` does not print the value. Deserializing applies the same
/// non-blank check as `new`.
#[derive(Serialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct LinkingId(String);

impl LinkingId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::Schema("linking_id is empty".into()));
        }
        Ok(LinkingId(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for LinkingId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LinkingId::new(s).map_err(de::Error::custom)
    }
}

impl std::fmt::Debug for LinkingId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "LinkingId(..)")
    }
}

/// Candidate references arrive as JSON numbers or strings depending on the
/// client; both normalise to a string id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CandidateRef {
    Number(u64),
    Text(String),
}

impl CandidateRef {
    pub fn to_id(&self) -> String {
        match self {
            CandidateRef::Number(n) => n.to_string(),
            CandidateRef::Text(s) => s.trim().to_owned(),
        }
    }
}

/// Anything that carries a linking id
pub trait LinkedPayload {
    /// Name used in error messages
    const ENVELOPE: &'static str;

    fn raw_linking_id(&self) -> Option<&str>;
}

/// Decrypted M1
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IdentityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_id: Option<String>,

    /// Voter identity fields, as supplied by the client.
    ///
    /// Hashmaps are not used because their unstable ordering leads to non-determinism.
    #[serde(flatten)]
    pub identity: IndexMap<String, serde_json::Value>,
}

impl IdentityPayload {
    pub fn new(linking_id: &str) -> Self {
        IdentityPayload {
            linking_id: Some(linking_id.to_owned()),
            identity: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.identity.insert(key.to_owned(), value.into());
        self
    }

    pub fn parse(plaintext: &[u8]) -> Result<Self> {
        parse_payload(plaintext, Self::ENVELOPE)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl LinkedPayload for IdentityPayload {
    const ENVELOPE: &'static str = "M1";

    fn raw_linking_id(&self) -> Option<&str> {
        self.linking_id.as_deref()
    }
}

/// Decrypted M2
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BallotPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateRef>,

    /// Application specific properties.
    #[serde(flatten)]
    pub properties: IndexMap<String, serde_json::Value>,
}

impl BallotPayload {
    pub fn new(linking_id: &str, candidate: CandidateRef) -> Self {
        BallotPayload {
            linking_id: Some(linking_id.to_owned()),
            candidate_id: Some(candidate),
            properties: IndexMap::new(),
        }
    }

    pub fn parse(plaintext: &[u8]) -> Result<Self> {
        parse_payload(plaintext, Self::ENVELOPE)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The chosen candidate; absent or blank is a schema error
    pub fn candidate_id(&self) -> Result<String> {
        let id = self
            .candidate_id
            .as_ref()
            .map(CandidateRef::to_id)
            .unwrap_or_default();
        if id.is_empty() {
            return Err(Error::Schema("candidate_id missing in M2".into()));
        }
        Ok(id)
    }
}

impl LinkedPayload for BallotPayload {
    const ENVELOPE: &'static str = "M2";

    fn raw_linking_id(&self) -> Option<&str> {
        self.linking_id.as_deref()
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(plaintext: &[u8], envelope: &str) -> Result<T> {
    // Keep serde's message out: it can quote plaintext
    serde_json::from_slice(plaintext)
        .map_err(|_| Error::Schema(format!("{} is not a JSON object of the expected shape", envelope)))
}

/// Pull the linking id out of a decrypted payload.
///
/// A missing or blank value is always a `Schema` error, never a default.
pub fn extract_linking_id<P: LinkedPayload>(payload: &P) -> Result<LinkingId> {
    match payload.raw_linking_id() {
        Some(raw) if !raw.trim().is_empty() => LinkingId::new(raw),
        _ => Err(Error::Schema(format!("linking_id missing in {}", P::ENVELOPE))),
    }
}

/// Exact, constant-time equality of the CO-side and DE-side linking ids
pub fn verify_match(co: &LinkingId, de: &LinkingId) -> bool {
    co.0.as_bytes().ct_eq(de.0.as_bytes()).into()
}
