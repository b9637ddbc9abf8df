//! Argon2id password hashing.
//!
//! Hashes are stored as one self-describing string so verification needs no
//! outside parameter store:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=1,p=2$<base64 salt>$<base64 key>
//! ```
//!
//! Base64 is the standard alphabet without padding. The format is persisted
//! in user tables, so it must stay byte-compatible.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

const ALGORITHM: &str = "argon2id";
const VERSION: u32 = 0x13;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("argon2id: hash is not in the correct format")]
    Malformed,

    #[error("argon2id: incompatible version of argon2 (found v={found})")]
    IncompatibleVersion { found: u32 },

    #[error("argon2id: invalid parameters: {0}")]
    InvalidParameters(argon2::Error),
}

/// Cost parameters of a hash. Encoded inline in every hash string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordHashParams {
    /// Memory cost in KiB.
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_length: u32,
    pub key_length: u32,
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self {
            memory: 64 * 1024,
            iterations: 1,
            parallelism: 2,
            salt_length: 16,
            key_length: 32,
        }
    }
}

impl PasswordHashParams {
    /// `true` when any cost of `self` is below the one in `target`. Callers
    /// use it after a successful verify to decide whether to re-hash.
    pub fn is_weaker_than(&self, target: &PasswordHashParams) -> bool {
        self.memory < target.memory
            || self.iterations < target.iterations
            || self.parallelism < target.parallelism
            || self.salt_length < target.salt_length
            || self.key_length < target.key_length
    }

    fn hasher(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.memory,
            self.iterations,
            self.parallelism,
            Some(self.key_length as usize),
        )
        .map_err(PasswordError::InvalidParameters)?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hashes `password` with a fresh random salt.
pub fn hash_password(password: &str, params: &PasswordHashParams) -> Result<String, PasswordError> {
    let mut salt = vec![0u8; params.salt_length as usize];
    OsRng.fill_bytes(&mut salt);

    let mut key = vec![0u8; params.key_length as usize];
    params
        .hasher()?
        .hash_password_into(password.as_bytes(), &salt, &mut key)
        .map_err(PasswordError::InvalidParameters)?;

    Ok(format!(
        "${ALGORITHM}$v={VERSION}$m={},t={},p={}${}${}",
        params.memory,
        params.iterations,
        params.parallelism,
        STANDARD_NO_PAD.encode(&salt),
        STANDARD_NO_PAD.encode(&key),
    ))
}

/// Checks `password` against an encoded hash.
///
/// Returns whether it matched together with the parameters decoded from the
/// hash. A wrong password is `Ok((false, _))`; only an unreadable hash is an
/// error.
pub fn verify_password(password: &str, encoded: &str) -> Result<(bool, PasswordHashParams), PasswordError> {
    let (params, salt, key) = decode(encoded)?;

    let mut candidate = vec![0u8; key.len()];
    params
        .hasher()?
        .hash_password_into(password.as_bytes(), &salt, &mut candidate)
        .map_err(PasswordError::InvalidParameters)?;

    if !bool::from((key.len() as u64).ct_eq(&(candidate.len() as u64))) {
        return Ok((false, params));
    }
    Ok((bool::from(key.ct_eq(&candidate)), params))
}

fn decode(encoded: &str) -> Result<(PasswordHashParams, Vec<u8>, Vec<u8>), PasswordError> {
    let fields: Vec<&str> = encoded.split('$').collect();
    let ["", algorithm, version, costs, salt, key] = fields.as_slice() else {
        return Err(PasswordError::Malformed);
    };
    if *algorithm != ALGORITHM {
        return Err(PasswordError::Malformed);
    }

    let found: u32 = version
        .strip_prefix("v=")
        .and_then(|v| v.parse().ok())
        .ok_or(PasswordError::Malformed)?;
    if found != VERSION {
        return Err(PasswordError::IncompatibleVersion { found });
    }

    let (memory, iterations, parallelism) = parse_costs(costs).ok_or(PasswordError::Malformed)?;
    let salt = STANDARD_NO_PAD.decode(salt).map_err(|_| PasswordError::Malformed)?;
    let key = STANDARD_NO_PAD.decode(key).map_err(|_| PasswordError::Malformed)?;

    let params = PasswordHashParams {
        memory,
        iterations,
        parallelism,
        salt_length: salt.len() as u32,
        key_length: key.len() as u32,
    };
    Ok((params, salt, key))
}

/// Parses `m=<memory>,t=<iterations>,p=<parallelism>`.
fn parse_costs(costs: &str) -> Option<(u32, u32, u32)> {
    let mut parts = costs.split(',');
    let mut next = |prefix: &str| parts.next()?.strip_prefix(prefix)?.parse::<u32>().ok();
    let costs = (next("m=")?, next("t=")?, next("p=")?);
    parts.next().is_none().then_some(costs)
}
