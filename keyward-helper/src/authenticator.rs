//! Single-shot authenticator helper client.
//!
//! Authenticator middleware is untrusted, possibly interactive native code,
//! so every operation spawns a fresh helper that answers one request and
//! exits.  Its exit status is checked in addition to the response frame.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use keyward_proto::wire::{WireReader, WireWriter};

use crate::channel::{HelperError, op};
use crate::process::one_shot;

/// Result of a successful enrollment.
#[derive(Debug)]
pub struct EnrolledKey {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub attestation: Vec<u8>,
}

/// One resident key recovered from an authenticator.
#[derive(Debug)]
pub struct ResidentKey {
    /// Private key blob in agent wire format.
    pub key_blob: Zeroizing<Vec<u8>>,
    pub user_id: String,
}

/// Client side of the one-shot authenticator helper.
#[derive(Debug, Clone)]
pub struct AuthenticatorClient {
    program: PathBuf,
}

impl AuthenticatorClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Sign `data` with an authenticator-backed key.
    ///
    /// `key_blob` is the private key blob (handle material included) in
    /// agent wire format; `pin` is empty when no PIN has been collected.
    pub async fn sign(
        &self,
        key_blob: &[u8],
        data: &[u8],
        algorithm_hint: &str,
        pin: &[u8],
    ) -> Result<Vec<u8>, HelperError> {
        let mut w = WireWriter::new();
        w.write_string(key_blob)
            .write_string(data)
            .write_utf8(algorithm_hint)
            .write_string(pin);
        let body = Zeroizing::new(w.into_bytes());
        let resp = one_shot(&self.program, op::SIGN, &body).await?;
        let mut r = WireReader::new(&resp);
        let sig = r
            .read_string()
            .map_err(|_| HelperError::Malformed)?
            .to_vec();
        r.finish().map_err(|_| HelperError::Malformed)?;
        Ok(sig)
    }

    /// Enroll a new credential on the authenticator.
    pub async fn enroll(
        &self,
        algorithm: &str,
        challenge: &[u8],
        application: &str,
        flags: u8,
        pin: &[u8],
    ) -> Result<EnrolledKey, HelperError> {
        let mut w = WireWriter::new();
        w.write_utf8(algorithm)
            .write_string(challenge)
            .write_utf8(application)
            .write_u8(flags)
            .write_string(pin);
        let body = Zeroizing::new(w.into_bytes());
        let resp = one_shot(&self.program, op::ENROLL, &body).await?;
        let mut r = WireReader::new(&resp);
        let enrolled = EnrolledKey {
            public_key: r.read_string().map_err(|_| HelperError::Malformed)?.to_vec(),
            key_handle: r.read_string().map_err(|_| HelperError::Malformed)?.to_vec(),
            attestation: r.read_string().map_err(|_| HelperError::Malformed)?.to_vec(),
        };
        r.finish().map_err(|_| HelperError::Malformed)?;
        Ok(enrolled)
    }

    /// List resident keys stored on the authenticator.
    pub async fn load_resident_keys(&self, pin: &[u8]) -> Result<Vec<ResidentKey>, HelperError> {
        let mut w = WireWriter::new();
        w.write_string(pin);
        let body = Zeroizing::new(w.into_bytes());
        let resp = one_shot(&self.program, op::LOAD_RESIDENT_KEYS, &body).await?;
        let mut r = WireReader::new(&resp);
        let count = r.read_u32().map_err(|_| HelperError::Malformed)?;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            keys.push(ResidentKey {
                key_blob: Zeroizing::new(
                    r.read_string().map_err(|_| HelperError::Malformed)?.to_vec(),
                ),
                user_id: r
                    .read_utf8("resident key user")
                    .map_err(|_| HelperError::Malformed)?,
            });
        }
        r.finish().map_err(|_| HelperError::Malformed)?;
        Ok(keys)
    }
}
