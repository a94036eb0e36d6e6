use crate::*;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DECRYPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_UNIQUE_ID_LEN: usize = 255;
pub const DEFAULT_RECEIPT_ENTROPY_BYTES: usize = 32;

/// Runtime settings for the ballot pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Hard upper bound on a single envelope decryption
    pub decrypt_timeout: Duration,

    /// Longest accepted `unique_id`
    pub max_unique_id_len: usize,

    /// Fresh random bytes mixed into each receipt code
    pub receipt_entropy_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            decrypt_timeout: DEFAULT_DECRYPT_TIMEOUT,
            max_unique_id_len: DEFAULT_MAX_UNIQUE_ID_LEN,
            receipt_entropy_bytes: DEFAULT_RECEIPT_ENTROPY_BYTES,
        }
    }
}

impl Config {
    /// Build a config from `SEALBALLOT_*` environment variables, using the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let decrypt_timeout = match env_value::<u64>("SEALBALLOT_DECRYPT_TIMEOUT_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.decrypt_timeout,
        };

        let max_unique_id_len = env_value("SEALBALLOT_MAX_UNIQUE_ID_LEN")?
            .unwrap_or(defaults.max_unique_id_len);

        let receipt_entropy_bytes = env_value("SEALBALLOT_RECEIPT_ENTROPY_BYTES")?
            .unwrap_or(defaults.receipt_entropy_bytes);

        let config = Config {
            decrypt_timeout,
            max_unique_id_len,
            receipt_entropy_bytes,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.decrypt_timeout == Duration::from_secs(0) {
            return Err(Error::Config("decrypt timeout must be non-zero".into()));
        }
        if self.max_unique_id_len == 0 {
            return Err(Error::Config("max unique_id length must be non-zero".into()));
        }
        // Below 16 bytes the receipt stops being unguessable
        if self.receipt_entropy_bytes < 16 {
            return Err(Error::Config(
                "receipt entropy must be at least 16 bytes".into(),
            ));
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
    match var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid value: {:?}", name, val))),
        Err(_e) => Ok(None),
    }
}
