//! Memory-hard password hashing.
//!
//! Argon2id with fixed cost parameters: 4 iterations, 32 MiB, 64-byte output,
//! over a 64-byte random salt. The lane count is derived from the host once at
//! hasher construction and persisted next to the hash, so verification always
//! replays the lane count the hash was produced with and never re-reads it
//! from the verifying host.

use anyhow::{anyhow, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};

pub const SALT_LEN: usize = 64;
pub const HASH_LEN: usize = 64;

const T_COST: u32 = 4;
const M_COST_KIB: u32 = 32 * 1024;

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    lanes: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lanes: default_lanes(),
        }
    }

    #[must_use]
    pub fn with_lanes(lanes: u32) -> Self {
        Self {
            lanes: lanes.clamp(1, 4),
        }
    }

    /// Lane count new hashes are produced with. Stored with the hash.
    #[must_use]
    pub fn lanes(&self) -> u32 {
        self.lanes
    }

    /// Fresh random salt. A short read from the entropy source is an error,
    /// not a shorter salt.
    /// # Errors
    /// Returns an error if the entropy source fails; not retryable.
    pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .context("failed to read salt from entropy source")?;
        Ok(salt)
    }

    /// Derive the hash for (password, salt) with this hasher's lane count.
    /// Deterministic for a fixed lane count.
    /// # Errors
    /// Returns an error if key derivation fails.
    pub fn hash(&self, password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN]> {
        derive(password, salt, self.lanes)
    }

    /// Recompute with the stored lane count and compare in constant time.
    /// Any failure to derive counts as a mismatch; this never errors.
    #[must_use]
    pub fn verify(password: &str, stored_hash: &[u8], salt: &[u8], lanes: u32) -> bool {
        match derive(password, salt, lanes) {
            Ok(candidate) => constant_time_eq(stored_hash, &candidate),
            Err(_) => false,
        }
    }
}

fn derive(password: &str, salt: &[u8], lanes: u32) -> Result<[u8; HASH_LEN]> {
    let params = Params::new(M_COST_KIB, T_COST, lanes, Some(HASH_LEN))
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; HASH_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|err| anyhow!("argon2 derivation failed: {err}"))?;
    Ok(out)
}

/// At most half the available cores, never more than four.
fn default_lanes() -> u32 {
    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    u32::try_from(cores / 2).unwrap_or(1).clamp(1, 4)
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
