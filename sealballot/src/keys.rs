use crate::*;
use digest::Digest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::convert::TryInto;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

const FINGERPRINT_LENGTH: usize = 20;

/// The two trust authorities that hold an election key pair
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// Counting Office: decrypts M1, learns identity, never the choice
    CountingOffice,

    /// Decryption Entity: decrypts M2, learns the choice, never the identity
    DecryptionEntity,
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Authority::CountingOffice => "CO",
            Authority::DecryptionEntity => "DE",
        };
        write!(f, "{}", name)
    }
}

/// Stable identifier of a key pair: the first 20 bytes of SHA-256 over the
/// exported public key.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LENGTH]);

impl Fingerprint {
    pub fn of(public_key: &PublicKeyMaterial) -> Self {
        let digest = sha2::Sha256::digest(public_key.as_bytes());
        let mut bytes = [0u8; FINGERPRINT_LENGTH];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LENGTH]);
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LENGTH] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DecryptionFailure::Malformed)?;
        let bytes: [u8; FINGERPRINT_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecryptionFailure::Malformed)?;
        Ok(Fingerprint(bytes))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Exported public key bytes, opaque to everything but the envelope backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyMaterial(Vec<u8>);

impl PublicKeyMaterial {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PublicKeyMaterial(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_armored(&self) -> String {
        armor(ArmorLabel::PublicKey, &self.0)
    }

    pub fn from_armored(text: &str) -> Result<Self> {
        let bytes = dearmor(ArmorLabel::PublicKey, text)
            .map_err(|_| Error::Encryption("recipient public key is not valid armor".into()))?;
        Ok(PublicKeyMaterial(bytes))
    }
}

/// Exported private key bytes.
///
/// Wiped on drop. `Debug` never prints the contents and there is
/// intentionally no `Serialize` impl.
#[derive(Clone)]
pub struct PrivateKeyMaterial(Zeroizing<Vec<u8>>);

impl PrivateKeyMaterial {
    pub fn from_bytes(bytes: Zeroizing<Vec<u8>>) -> Self {
        PrivateKeyMaterial(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Armored export for an operator-side key store
    pub fn to_armored(&self) -> Zeroizing<String> {
        Zeroizing::new(armor(ArmorLabel::PrivateKey, &self.0))
    }

    pub fn from_armored(text: &str) -> Result<Self> {
        let bytes = dearmor(ArmorLabel::PrivateKey, text)
            .map_err(|_| Error::Decryption(DecryptionFailure::KeyImport))?;
        Ok(PrivateKeyMaterial(Zeroizing::new(bytes)))
    }
}

impl std::fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "PrivateKeyMaterial([redacted])")
    }
}

/// A freshly generated pair as handed back by a backend
#[derive(Debug)]
pub struct ExportedKeyPair {
    pub public: PublicKeyMaterial,
    pub private: PrivateKeyMaterial,
}

/// One authority's key pair for one election
#[derive(Debug, Clone)]
pub struct ElectionKeyMaterial {
    pub election: Uuid,
    pub authority: Authority,
    pub public_key: PublicKeyMaterial,
    pub private_key: PrivateKeyMaterial,
    pub fingerprint: Fingerprint,
    pub created_at: u64,
}

impl ElectionKeyMaterial {
    pub fn new(election: Uuid, authority: Authority, pair: ExportedKeyPair) -> Self {
        ElectionKeyMaterial {
            election,
            authority,
            fingerprint: Fingerprint::of(&pair.public),
            public_key: pair.public,
            private_key: pair.private,
            created_at: unix_now(),
        }
    }
}

/// Both public halves for an election, as handed to voting clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKeys {
    pub election: Uuid,
    pub co_public: String,
    pub co_fingerprint: Fingerprint,
    pub de_public: String,
    pub de_fingerprint: Fingerprint,
}

/// Generates, looks up and revokes per-election authority key pairs.
///
/// Generation is serialized per (authority, election) and persisted
/// first-writer-wins, so concurrent callers always observe the same pair.
/// Keys are never rotated: once an election's pairs are revoked they stay
/// gone.
#[derive(Clone)]
pub struct KeyPairService {
    store: Arc<dyn Store>,
    elections: Arc<dyn ElectionDirectory>,
    backend: Arc<dyn EnvelopeBackend>,
    locks: Arc<KeyedLocks<(Authority, Uuid)>>,
}

impl KeyPairService {
    pub fn new(
        store: Arc<dyn Store>,
        elections: Arc<dyn ElectionDirectory>,
        backend: Arc<dyn EnvelopeBackend>,
    ) -> Self {
        KeyPairService {
            store,
            elections,
            backend,
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    /// Return the pair for (authority, election), generating and persisting
    /// it on first use. An existing pair is never replaced.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        authority: Authority,
        election: Uuid,
    ) -> Result<Arc<ElectionKeyMaterial>> {
        if let Some(existing) = self.store.key_material(election, authority)? {
            return Ok(existing);
        }
        if self.store.is_revoked(election)? {
            return Err(Error::KeyMaterialRevoked(election));
        }

        let _guard = self.locks.lock((authority, election)).await;

        // Someone may have finished while we waited on the lock
        if let Some(existing) = self.store.key_material(election, authority)? {
            return Ok(existing);
        }

        let pair = self.backend.generate()?;
        let material = ElectionKeyMaterial::new(election, authority, pair);
        let stored = self.store.insert_key_material(material)?;

        info!(
            %election,
            %authority,
            fingerprint = %stored.fingerprint,
            "generated election key pair"
        );
        Ok(stored)
    }

    /// Public halves of both authorities' keys, generating them if absent
    pub async fn public_keys(&self, election: Uuid) -> Result<PublicKeys> {
        let co = self.generate(Authority::CountingOffice, election).await?;
        let de = self.generate(Authority::DecryptionEntity, election).await?;

        Ok(PublicKeys {
            election,
            co_public: co.public_key.to_armored(),
            co_fingerprint: co.fingerprint,
            de_public: de.public_key.to_armored(),
            de_fingerprint: de.fingerprint,
        })
    }

    /// Existing key material. Decryption never generates keys: a missing
    /// pair means no envelope could have been addressed to it.
    pub fn existing(&self, authority: Authority, election: Uuid) -> Result<Arc<ElectionKeyMaterial>> {
        self.store
            .key_material(election, authority)?
            .ok_or(Error::KeyMaterialMissing {
                election,
                authority,
            })
    }

    /// Destroy both pairs of a closed election.
    ///
    /// Refused while the election is open. Keys cannot be generated again
    /// for a revoked election.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub fn revoke(&self, actor: &Actor, election: Uuid) -> Result<usize> {
        actor.require(Permission::ManageKeys)?;
        if self.elections.is_open(election)? {
            return Err(Error::ElectionStillOpen(election));
        }
        let removed = self.store.remove_key_material(election)?;
        debug!(removed, "revoked election key material");
        Ok(removed)
    }
}
