//! Recognized shapes of data-to-be-signed.
//!
//! When an identity carries destination constraints, the agent must
//! reconstruct the authentication context from the bytes it is asked to
//! sign.  Only a fixed allow-list of shapes is accepted; the list is part of
//! the external protocol contract and new shapes are added here
//! deliberately, never inferred.

use ssh_key::public::PublicKey;

use crate::ProtoError;
use crate::wire::WireReader;

/// Transport-level message number of an authentication request.
pub const USERAUTH_REQUEST: u8 = 50;

/// Public-key authentication method names.
pub const METHOD_PUBLICKEY: &str = "publickey";
/// Variant that additionally binds the server hostkey into the signed data.
pub const METHOD_PUBLICKEY_HOSTBOUND: &str = "publickey-hostbound@keyward.dev";

/// Preamble of a detached-signature request.
pub const DETACHED_SIG_MAGIC: &[u8; 6] = b"KWDSIG";

/// A successfully reconstructed signing context.
#[derive(Debug, Clone)]
pub enum SignedData {
    /// A transport authentication request.  Carries the session identifier
    /// the client claims to be authenticating under, and — for the
    /// hostbound method — the server hostkey.
    UserAuth {
        session_id: Vec<u8>,
        username: String,
        service: String,
        hostkey: Option<PublicKey>,
    },
    /// A detached signature over out-of-band data.  Has no session
    /// identifier, so it can never satisfy a destination-constrained key.
    Detached { namespace: String },
}

impl SignedData {
    /// Parse data-to-be-signed against the allow-list.
    pub fn parse(data: &[u8]) -> Result<Self, ProtoError> {
        if data.starts_with(DETACHED_SIG_MAGIC) {
            return Self::parse_detached(&data[DETACHED_SIG_MAGIC.len()..]);
        }
        Self::parse_userauth(data)
    }

    fn parse_userauth(data: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(data);
        let session_id = r.read_string()?.to_vec();
        if r.read_u8()? != USERAUTH_REQUEST {
            return Err(ProtoError::Malformed("unrecognized signed data"));
        }
        let username = r.read_utf8("username")?;
        let service = r.read_utf8("service")?;
        let method = r.read_utf8("method")?;
        let hostbound = match method.as_str() {
            METHOD_PUBLICKEY => false,
            METHOD_PUBLICKEY_HOSTBOUND => true,
            _ => return Err(ProtoError::Malformed("unrecognized authentication method")),
        };
        if !r.read_bool()? {
            // An agent only ever signs requests that declare a signature.
            return Err(ProtoError::Malformed("authentication request without signature flag"));
        }
        let _algorithm = r.read_string()?;
        let _user_key_blob = r.read_string()?;
        let hostkey = if hostbound {
            Some(PublicKey::from_bytes(r.read_string()?)?)
        } else {
            None
        };
        r.finish()?;
        Ok(Self::UserAuth {
            session_id,
            username,
            service,
            hostkey,
        })
    }

    fn parse_detached(rest: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(rest);
        let namespace = r.read_utf8("namespace")?;
        if namespace.is_empty() {
            return Err(ProtoError::Malformed("empty detached-signature namespace"));
        }
        let _reserved = r.read_string()?;
        let _hash_algorithm = r.read_utf8("hash algorithm")?;
        let _hash = r.read_string()?;
        r.finish()?;
        Ok(Self::Detached { namespace })
    }
}
