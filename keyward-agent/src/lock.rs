//! Agent password lock.
//!
//! The password is never stored. Locking derives a PBKDF2-HMAC-SHA-256
//! hash under a fresh random salt and keeps only salt and hash; unlocking
//! re-derives and compares in constant time. Failed unlock attempts earn a
//! growing delay that the dispatcher serves before answering.

use std::time::Duration;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

pub const KDF_ROUNDS_DEFAULT: u32 = 100_000;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const BACKOFF_STEP: Duration = Duration::from_millis(100);
const BACKOFF_CAP_FAILURES: u32 = 50;

struct LockSecret {
    salt: [u8; SALT_LEN],
    hash: [u8; HASH_LEN],
}

impl Drop for LockSecret {
    fn drop(&mut self) {
        self.hash.zeroize();
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Applied,
    /// Empty password: acknowledged and ignored.
    NoopEmptyPassword,
    Refused,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnlockOutcome {
    Applied,
    NoopEmptyPassword,
    /// Wrong password or not locked. `delay` is served before responding.
    Refused { delay: Duration },
}

pub struct AgentLock {
    secret: Option<LockSecret>,
    failures: u32,
    rounds: u32,
}

impl AgentLock {
    pub fn new(rounds: u32) -> Self {
        Self {
            secret: None,
            failures: 0,
            rounds,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.secret.is_some()
    }

    fn derive(&self, password: &[u8], salt: &[u8; SALT_LEN]) -> [u8; HASH_LEN] {
        let mut hash = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password, salt, self.rounds, &mut hash);
        hash
    }

    pub fn lock(&mut self, password: &[u8]) -> LockOutcome {
        if password.is_empty() {
            return LockOutcome::NoopEmptyPassword;
        }
        if self.secret.is_some() {
            return LockOutcome::Refused;
        }
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = self.derive(password, &salt);
        self.secret = Some(LockSecret { salt, hash });
        self.failures = 0;
        LockOutcome::Applied
    }

    pub fn unlock(&mut self, password: &[u8]) -> UnlockOutcome {
        if password.is_empty() {
            return UnlockOutcome::NoopEmptyPassword;
        }
        let Some(secret) = &self.secret else {
            return UnlockOutcome::Refused {
                delay: Duration::ZERO,
            };
        };
        let mut candidate = self.derive(password, &secret.salt);
        let ok: bool = candidate.ct_eq(&secret.hash).into();
        candidate.zeroize();
        if ok {
            self.secret = None;
            self.failures = 0;
            UnlockOutcome::Applied
        } else {
            self.failures = (self.failures + 1).min(BACKOFF_CAP_FAILURES);
            UnlockOutcome::Refused {
                delay: BACKOFF_STEP * self.failures,
            }
        }
    }
}
