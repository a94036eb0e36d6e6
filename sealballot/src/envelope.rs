use crate::ecies;
use crate::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const ENVELOPE_VERSION: u8 = 1;

/// The asymmetric primitive behind envelopes.
///
/// Keys cross this boundary only as exported bytes. Every call imports what
/// it needs and holds nothing afterwards, so no keyring is shared between
/// elections.
pub trait EnvelopeBackend: Send + Sync + 'static {
    /// Produce and export a fresh key pair
    fn generate(&self) -> Result<ExportedKeyPair>;

    /// Seal `plaintext` to `recipient`
    fn seal(&self, recipient: &PublicKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open sealed bytes with `secret`
    fn open(&self, secret: &PrivateKeyMaterial, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Default backend: ECIES over Curve25519 with AES-256-GCM
#[derive(Debug, Clone, Copy, Default)]
pub struct EciesBackend;

impl EnvelopeBackend for EciesBackend {
    fn generate(&self) -> Result<ExportedKeyPair> {
        let (secret, public) = ecies::generate_keypair()
            .map_err(|e| Error::KeyGeneration(format!("{:?}", e)))?;

        Ok(ExportedKeyPair {
            public: PublicKeyMaterial::from_bytes(public.to_bytes().to_vec()),
            private: PrivateKeyMaterial::from_bytes(Zeroizing::new(secret.to_bytes().to_vec())),
        })
    }

    fn seal(&self, recipient: &PublicKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
        let public = ecies::EciesPublicKey::from_bytes(recipient.as_bytes())
            .map_err(|_| Error::Encryption("recipient public key is unusable".into()))?;
        ecies::encrypt(&public, plaintext).map_err(|e| Error::Encryption(format!("{:?}", e)))
    }

    fn open(&self, secret: &PrivateKeyMaterial, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let secret = ecies::secret_from_bytes(secret.as_bytes())
            .map_err(|_| DecryptionFailure::KeyImport)?;

        ecies::decrypt(&secret, sealed).map_err(|e| {
            let failure = match e {
                ecies::EciesError::Aead => DecryptionFailure::Authentication,
                ecies::EciesError::Truncated | ecies::EciesError::InvalidPublicKey => {
                    DecryptionFailure::Malformed
                }
                other => DecryptionFailure::Backend(format!("{:?}", other)),
            };
            Error::Decryption(failure)
        })
    }
}

/// What travels inside the armor
#[derive(Serialize, Deserialize)]
struct EnvelopeFrame {
    version: u8,
    recipient: Fingerprint,

    #[serde(with = "hex_serde")]
    sealed: Vec<u8>,
}

/// Everything one decryption needs, owned by that decryption alone.
///
/// Dropping it wipes the imported key and the ciphertext scratch copy, which
/// happens on the worker thread whether the open succeeds, fails, or the
/// caller has already given up waiting.
struct DecryptContext {
    secret: PrivateKeyMaterial,
    sealed: Zeroizing<Vec<u8>>,
}

impl DecryptContext {
    fn open(self, backend: &dyn EnvelopeBackend) -> Result<Zeroizing<Vec<u8>>> {
        backend.open(&self.secret, &self.sealed)
    }
}

/// Encrypts payloads to an authority's public key and decrypts them with its
/// private key, under a hard time bound.
#[derive(Clone)]
pub struct EnvelopeCrypto {
    backend: Arc<dyn EnvelopeBackend>,
    timeout: Duration,
}

impl EnvelopeCrypto {
    pub fn new(backend: Arc<dyn EnvelopeBackend>, config: &Config) -> Self {
        EnvelopeCrypto {
            backend,
            timeout: config.decrypt_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Seal `plaintext` to an armored public key, producing an armored
    /// envelope. This is what a voting client does to build M1 and M2.
    pub fn encrypt(&self, plaintext: &[u8], public_key: &str) -> Result<String> {
        let recipient = PublicKeyMaterial::from_armored(public_key)?;
        self.encrypt_to(plaintext, &recipient)
    }

    pub fn encrypt_to(&self, plaintext: &[u8], recipient: &PublicKeyMaterial) -> Result<String> {
        let frame = EnvelopeFrame {
            version: ENVELOPE_VERSION,
            recipient: Fingerprint::of(recipient),
            sealed: self.backend.seal(recipient, plaintext)?,
        };
        let bytes = serde_cbor::to_vec(&frame).map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(armor(ArmorLabel::Message, &bytes))
    }

    /// Parse an armored envelope and check it is addressed to `key`
    /// without touching the private half.
    pub fn check_recipient(armored: &str, key: &Fingerprint) -> Result<()> {
        let frame = Self::parse(armored)?;
        if frame.recipient != *key {
            return Err(DecryptionFailure::WrongRecipient.into());
        }
        Ok(())
    }

    /// Open an armored envelope with an election key.
    ///
    /// The backend call runs on the blocking pool. If it has not answered
    /// within the configured timeout the call fails with
    /// `DecryptionFailure::Timeout`; it is not retried.
    pub async fn decrypt(
        &self,
        armored: &str,
        key: &ElectionKeyMaterial,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let frame = Self::parse(armored)?;
        if frame.recipient != key.fingerprint {
            debug!(
                expected = %key.fingerprint,
                found = %frame.recipient,
                "envelope addressed to another key"
            );
            return Err(DecryptionFailure::WrongRecipient.into());
        }

        let context = DecryptContext {
            secret: key.private_key.clone(),
            sealed: Zeroizing::new(frame.sealed),
        };
        let backend = self.backend.clone();
        let task = tokio::task::spawn_blocking(move || context.open(backend.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "decryption worker failed");
                Err(DecryptionFailure::Backend("decryption worker failed".into()).into())
            }
            Err(_elapsed) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "decryption timed out");
                Err(DecryptionFailure::Timeout.into())
            }
        }
    }

    fn parse(armored: &str) -> Result<EnvelopeFrame> {
        let bytes = Zeroizing::new(dearmor(ArmorLabel::Message, armored)?);
        let frame: EnvelopeFrame =
            serde_cbor::from_slice(&bytes).map_err(|_| DecryptionFailure::Malformed)?;
        if frame.version != ENVELOPE_VERSION {
            return Err(DecryptionFailure::Malformed.into());
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Instant;
    use uuid::Uuid;

    fn key_material(authority: Authority) -> ElectionKeyMaterial {
        let pair = EciesBackend.generate().unwrap();
        ElectionKeyMaterial::new(Uuid::new_v4(), authority, pair)
    }

    fn crypto() -> EnvelopeCrypto {
        EnvelopeCrypto::new(Arc::new(EciesBackend), &Config::default())
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[quickcheck]
    fn quickcheck_envelope_round_trip(payload: Vec<u8>) -> bool {
        let key = key_material(Authority::DecryptionEntity);
        let crypto = crypto();

        let armored = crypto.encrypt(&payload, &key.public_key.to_armored()).unwrap();
        let opened = block_on(crypto.decrypt(&armored, &key)).unwrap();
        opened.as_slice() == payload.as_slice()
    }

    #[tokio::test]
    async fn wrong_recipient_is_rejected_before_opening() {
        let co = key_material(Authority::CountingOffice);
        let de = key_material(Authority::DecryptionEntity);
        let crypto = crypto();

        let m2 = crypto.encrypt_to(b"{}", &de.public_key).unwrap();
        EnvelopeCrypto::check_recipient(&m2, &de.fingerprint).unwrap();

        let err = crypto.decrypt(&m2, &co).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Decryption(DecryptionFailure::WrongRecipient)
        ));
    }

    #[tokio::test]
    async fn malformed_input_is_a_decryption_error() {
        let key = key_material(Authority::CountingOffice);
        let crypto = crypto();

        let err = crypto.decrypt("garbage", &key).await.unwrap_err();
        assert!(matches!(err, Error::Decryption(DecryptionFailure::Malformed)));

        // Valid armor around bytes that are not a frame
        let bogus = armor(ArmorLabel::Message, b"\x01\x02\x03");
        let err = crypto.decrypt(&bogus, &key).await.unwrap_err();
        assert!(matches!(err, Error::Decryption(DecryptionFailure::Malformed)));
    }

    #[tokio::test]
    async fn substituted_key_fails_authentication() {
        let key = key_material(Authority::CountingOffice);
        let other = key_material(Authority::CountingOffice);
        let crypto = crypto();

        let armored = crypto.encrypt_to(b"{\"linking_id\":\"x\"}", &key.public_key).unwrap();

        // Same fingerprint, different private half: simulates a corrupted key store
        let mut corrupted = key.clone();
        corrupted.private_key = other.private_key.clone();
        let err = crypto.decrypt(&armored, &corrupted).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Decryption(DecryptionFailure::Authentication)
        ));
    }

    #[test]
    fn encrypt_rejects_unusable_keys() {
        let crypto = crypto();
        assert!(matches!(
            crypto.encrypt(b"x", "not a key"),
            Err(Error::Encryption(_))
        ));

        let short = PublicKeyMaterial::from_bytes(vec![1, 2, 3]);
        assert!(matches!(
            crypto.encrypt_to(b"x", &short),
            Err(Error::Encryption(_))
        ));
    }

    /// A backend whose `open` hangs until the test lets it go
    struct StalledBackend {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl EnvelopeBackend for StalledBackend {
        fn generate(&self) -> Result<ExportedKeyPair> {
            EciesBackend.generate()
        }

        fn seal(&self, recipient: &PublicKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
            EciesBackend.seal(recipient, plaintext)
        }

        fn open(&self, _secret: &PrivateKeyMaterial, _sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
            if let Ok(release) = self.release.lock() {
                let _ = release.recv();
            }
            Err(DecryptionFailure::Backend("released".into()).into())
        }
    }

    #[tokio::test]
    async fn stalled_backend_times_out() {
        let (release, wait) = mpsc::channel();
        let backend = Arc::new(StalledBackend {
            release: Mutex::new(wait),
        });
        let config = Config {
            decrypt_timeout: Duration::from_millis(200),
            ..Config::default()
        };
        let crypto = EnvelopeCrypto::new(backend, &config);
        let key = key_material(Authority::CountingOffice);
        let armored = crypto.encrypt_to(b"payload", &key.public_key).unwrap();

        let started = Instant::now();
        let err = crypto.decrypt(&armored, &key).await.unwrap_err();
        assert!(matches!(err, Error::Decryption(DecryptionFailure::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(release);
    }
}
