//! The agent message vocabulary: tagged request/response types.
//!
//! [`Request::decode`] turns a framed `(message_type, payload)` pair into a
//! typed request, with unknown tags surfaced as [`Request::Unknown`] so the
//! dispatcher handles them explicitly rather than through a fallthrough.
//! Both directions are implemented — the CLI client encodes requests and
//! decodes responses over the same vocabulary.

use ssh_encoding::{Decode, Encode};
use ssh_key::private::{KeypairData, PrivateKey};
use ssh_key::public::PublicKey;
use ssh_key::Signature;
use zeroize::Zeroizing;

use crate::ProtoError;
use crate::constraint::DestinationConstraint;
use crate::wire::{WireReader, WireWriter};

/// Per-identity bound on attached destination constraints.
pub const MAX_DEST_CONSTRAINTS: usize = 1024;

/// Message type numbers.
pub mod num {
    pub const FAILURE: u8 = 5;
    pub const SUCCESS: u8 = 6;
    pub const REQUEST_IDENTITIES: u8 = 11;
    pub const IDENTITIES_ANSWER: u8 = 12;
    pub const SIGN_REQUEST: u8 = 13;
    pub const SIGN_RESPONSE: u8 = 14;
    pub const ADD_IDENTITY: u8 = 17;
    pub const REMOVE_IDENTITY: u8 = 18;
    pub const REMOVE_ALL_IDENTITIES: u8 = 19;
    pub const ADD_TOKEN_KEY: u8 = 20;
    pub const REMOVE_TOKEN_KEY: u8 = 21;
    pub const LOCK: u8 = 22;
    pub const UNLOCK: u8 = 23;
    pub const ADD_IDENTITY_CONSTRAINED: u8 = 25;
    pub const ADD_TOKEN_KEY_CONSTRAINED: u8 = 26;
    pub const EXTENSION: u8 = 27;
    pub const EXTENSION_FAILURE: u8 = 28;
}

/// Constraint record tags inside add-identity requests.
pub mod constrain {
    pub const LIFETIME: u8 = 1;
    pub const CONFIRM: u8 = 2;
    pub const MAX_SIGNATURES: u8 = 3;
    pub const EXTENSION: u8 = 255;
}

/// Extension vocabulary.
pub mod ext {
    /// Bind a connection to a verified (hostkey, session id) pair.
    pub const SESSION_BIND: &str = "session-bind@keyward.dev";
    /// Constraint extension carrying a destination-constraint list.
    pub const RESTRICT_DESTINATION: &str = "restrict-destination@keyward.dev";
    /// Constraint extension carrying an authenticator provider path.
    pub const PROVIDER: &str = "provider@keyward.dev";
}

/// Signature-algorithm flag bits on sign requests.
pub mod sigflag {
    /// Legacy SHA-1 compatibility bit.  Always refused.
    pub const LEGACY: u32 = 1;
    pub const RSA_SHA2_256: u32 = 2;
    pub const RSA_SHA2_512: u32 = 4;
}

/// One typed constraint record from an add-identity request.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyConstraint {
    /// Seconds until the identity is silently removed.
    Lifetime(u32),
    /// Every signing use needs interactive confirmation.
    Confirm,
    /// Signing budget for stateful key types.
    MaxSignatures(u32),
    /// Path of the authenticator middleware backing this key.
    Provider(String),
    /// Destination constraints restricting where the key may authenticate.
    Destinations(Vec<DestinationConstraint>),
}

impl KeyConstraint {
    /// Decode the constraint records trailing an add-identity payload.
    pub fn decode_all(r: &mut WireReader<'_>) -> Result<Vec<Self>, ProtoError> {
        let mut out = Vec::new();
        while !r.is_empty() {
            out.push(match r.read_u8()? {
                constrain::LIFETIME => Self::Lifetime(r.read_u32()?),
                constrain::CONFIRM => Self::Confirm,
                constrain::MAX_SIGNATURES => Self::MaxSignatures(r.read_u32()?),
                constrain::EXTENSION => {
                    let name = r.read_utf8("constraint extension name")?;
                    match name.as_str() {
                        ext::PROVIDER => Self::Provider(r.read_utf8("provider path")?),
                        ext::RESTRICT_DESTINATION => Self::Destinations(
                            DestinationConstraint::decode_list(
                                r.read_string()?,
                                MAX_DEST_CONSTRAINTS,
                            )?,
                        ),
                        _ => return Err(ProtoError::Malformed("unknown constraint extension")),
                    }
                }
                _ => return Err(ProtoError::Malformed("unknown constraint tag")),
            });
        }
        Ok(out)
    }

    pub fn encode_all(constraints: &[Self], w: &mut WireWriter) -> Result<(), ProtoError> {
        for c in constraints {
            match c {
                Self::Lifetime(secs) => {
                    w.write_u8(constrain::LIFETIME).write_u32(*secs);
                }
                Self::Confirm => {
                    w.write_u8(constrain::CONFIRM);
                }
                Self::MaxSignatures(n) => {
                    w.write_u8(constrain::MAX_SIGNATURES).write_u32(*n);
                }
                Self::Provider(path) => {
                    w.write_u8(constrain::EXTENSION)
                        .write_utf8(ext::PROVIDER)
                        .write_utf8(path);
                }
                Self::Destinations(list) => {
                    w.write_u8(constrain::EXTENSION)
                        .write_utf8(ext::RESTRICT_DESTINATION)
                        .write_string(&DestinationConstraint::encode_list(list)?);
                }
            }
        }
        Ok(())
    }
}

/// Payload of a `session-bind` extension request.
#[derive(Debug, Clone)]
pub struct SessionBind {
    pub hostkey: PublicKey,
    pub session_id: Vec<u8>,
    pub signature: Signature,
    /// False for the initial authentication, true for forwarding hops.
    pub forwarded: bool,
}

impl SessionBind {
    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let hostkey = PublicKey::from_bytes(r.read_string()?)?;
        let session_id = r.read_string()?.to_vec();
        let mut sig_blob = r.read_string()?;
        let signature = Signature::decode(&mut sig_blob)?;
        if !sig_blob.is_empty() {
            return Err(ProtoError::TrailingBytes);
        }
        let forwarded = r.read_bool()?;
        r.finish()?;
        Ok(Self {
            hostkey,
            session_id,
            signature,
            forwarded,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut sig_blob = Vec::new();
        self.signature.encode(&mut sig_blob)?;
        let mut w = WireWriter::new();
        w.write_string(&self.hostkey.to_bytes()?)
            .write_string(&self.session_id)
            .write_string(&sig_blob)
            .write_bool(self.forwarded);
        Ok(w.into_bytes())
    }
}

/// A decoded client request.
#[derive(Debug)]
pub enum Request {
    RequestIdentities,
    Sign {
        key_blob: Vec<u8>,
        data: Vec<u8>,
        flags: u32,
    },
    AddIdentity {
        key: Box<PrivateKey>,
        constraints: Vec<KeyConstraint>,
    },
    RemoveIdentity {
        key_blob: Vec<u8>,
    },
    RemoveAllIdentities,
    AddTokenKey {
        provider: String,
        pin: Zeroizing<Vec<u8>>,
        constraints: Vec<KeyConstraint>,
    },
    RemoveTokenKey {
        provider: String,
    },
    Lock {
        password: Zeroizing<Vec<u8>>,
    },
    Unlock {
        password: Zeroizing<Vec<u8>>,
    },
    Extension {
        name: String,
        payload: Vec<u8>,
    },
    /// A message type this agent does not know.  Handled explicitly by the
    /// dispatcher (generic failure), never a decode error.
    Unknown {
        msg_type: u8,
    },
}

impl Request {
    /// Decode one request from a frame's `(message_type, payload)`.
    pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let req = match msg_type {
            num::REQUEST_IDENTITIES => Self::RequestIdentities,
            num::SIGN_REQUEST => Self::Sign {
                key_blob: r.read_string()?.to_vec(),
                data: r.read_string()?.to_vec(),
                flags: r.read_u32()?,
            },
            num::ADD_IDENTITY | num::ADD_IDENTITY_CONSTRAINED => {
                let mut slice = payload;
                let keypair = KeypairData::decode(&mut slice)?;
                r = WireReader::new(slice);
                let comment = r.read_utf8("comment")?;
                let key = PrivateKey::new(keypair, comment)?;
                let constraints = if msg_type == num::ADD_IDENTITY_CONSTRAINED {
                    KeyConstraint::decode_all(&mut r)?
                } else {
                    Vec::new()
                };
                Self::AddIdentity {
                    key: Box::new(key),
                    constraints,
                }
            }
            num::REMOVE_IDENTITY => Self::RemoveIdentity {
                key_blob: r.read_string()?.to_vec(),
            },
            num::REMOVE_ALL_IDENTITIES => Self::RemoveAllIdentities,
            num::ADD_TOKEN_KEY | num::ADD_TOKEN_KEY_CONSTRAINED => {
                let provider = r.read_utf8("provider")?;
                let pin = Zeroizing::new(r.read_string()?.to_vec());
                let constraints = if msg_type == num::ADD_TOKEN_KEY_CONSTRAINED {
                    KeyConstraint::decode_all(&mut r)?
                } else {
                    Vec::new()
                };
                Self::AddTokenKey {
                    provider,
                    pin,
                    constraints,
                }
            }
            num::REMOVE_TOKEN_KEY => {
                let provider = r.read_utf8("provider")?;
                // Historical remove requests also carry an (unused) PIN.
                let _pin = Zeroizing::new(r.read_string()?.to_vec());
                Self::RemoveTokenKey { provider }
            }
            num::LOCK => Self::Lock {
                password: Zeroizing::new(r.read_string()?.to_vec()),
            },
            num::UNLOCK => Self::Unlock {
                password: Zeroizing::new(r.read_string()?.to_vec()),
            },
            num::EXTENSION => {
                let name = r.read_utf8("extension name")?;
                let payload = r.rest().to_vec();
                return Ok(Self::Extension { name, payload });
            }
            other => return Ok(Self::Unknown { msg_type: other }),
        };
        r.finish()?;
        Ok(req)
    }

    /// Encode this request to a `(message_type, payload)` pair.
    pub fn encode(&self) -> Result<(u8, Vec<u8>), ProtoError> {
        let mut w = WireWriter::new();
        let msg_type = match self {
            Self::RequestIdentities => num::REQUEST_IDENTITIES,
            Self::Sign {
                key_blob,
                data,
                flags,
            } => {
                w.write_string(key_blob).write_string(data).write_u32(*flags);
                num::SIGN_REQUEST
            }
            Self::AddIdentity { key, constraints } => {
                let mut keypair = Vec::new();
                key.key_data().encode(&mut keypair)?;
                w.write_raw(&keypair).write_utf8(key.comment());
                if constraints.is_empty() {
                    num::ADD_IDENTITY
                } else {
                    KeyConstraint::encode_all(constraints, &mut w)?;
                    num::ADD_IDENTITY_CONSTRAINED
                }
            }
            Self::RemoveIdentity { key_blob } => {
                w.write_string(key_blob);
                num::REMOVE_IDENTITY
            }
            Self::RemoveAllIdentities => num::REMOVE_ALL_IDENTITIES,
            Self::AddTokenKey {
                provider,
                pin,
                constraints,
            } => {
                w.write_utf8(provider).write_string(pin);
                if constraints.is_empty() {
                    num::ADD_TOKEN_KEY
                } else {
                    KeyConstraint::encode_all(constraints, &mut w)?;
                    num::ADD_TOKEN_KEY_CONSTRAINED
                }
            }
            Self::RemoveTokenKey { provider } => {
                w.write_utf8(provider).write_string(b"");
                num::REMOVE_TOKEN_KEY
            }
            Self::Lock { password } => {
                w.write_string(password);
                num::LOCK
            }
            Self::Unlock { password } => {
                w.write_string(password);
                num::UNLOCK
            }
            Self::Extension { name, payload } => {
                w.write_utf8(name).write_raw(payload);
                num::EXTENSION
            }
            Self::Unknown { msg_type } => *msg_type,
        };
        Ok((msg_type, w.into_bytes()))
    }
}

/// One `(key blob, comment)` entry in an identities answer.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEntry {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

/// A response frame.  The agent protocol is strictly one-in-one-out; every
/// request produces exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success,
    Failure,
    ExtensionFailure,
    IdentitiesAnswer(Vec<IdentityEntry>),
    SignResponse(Vec<u8>),
}

impl Response {
    pub fn encode(&self) -> (u8, Vec<u8>) {
        let mut w = WireWriter::new();
        let msg_type = match self {
            Self::Success => num::SUCCESS,
            Self::Failure => num::FAILURE,
            Self::ExtensionFailure => num::EXTENSION_FAILURE,
            Self::IdentitiesAnswer(entries) => {
                w.write_u32(entries.len() as u32);
                for e in entries {
                    w.write_string(&e.key_blob).write_utf8(&e.comment);
                }
                num::IDENTITIES_ANSWER
            }
            Self::SignResponse(sig_blob) => {
                w.write_string(sig_blob);
                num::SIGN_RESPONSE
            }
        };
        (msg_type, w.into_bytes())
    }

    pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let resp = match msg_type {
            num::SUCCESS => Self::Success,
            num::FAILURE => Self::Failure,
            num::EXTENSION_FAILURE => Self::ExtensionFailure,
            num::IDENTITIES_ANSWER => {
                let count = r.read_u32()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(IdentityEntry {
                        key_blob: r.read_string()?.to_vec(),
                        comment: r.read_utf8("comment")?,
                    });
                }
                Self::IdentitiesAnswer(entries)
            }
            num::SIGN_RESPONSE => Self::SignResponse(r.read_string()?.to_vec()),
            _ => return Err(ProtoError::Malformed("unknown response type")),
        };
        r.finish()?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_key::{Algorithm, rand_core::OsRng};

    fn test_private_key(comment: &str) -> PrivateKey {
        let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        key.set_comment(comment);
        key
    }

    #[test]
    fn sign_request_round_trip() {
        let req = Request::Sign {
            key_blob: vec![1, 2, 3],
            data: vec![9; 32],
            flags: sigflag::RSA_SHA2_512,
        };
        let (t, p) = req.encode().unwrap();
        assert_eq!(t, num::SIGN_REQUEST);
        match Request::decode(t, &p).unwrap() {
            Request::Sign {
                key_blob,
                data,
                flags,
            } => {
                assert_eq!(key_blob, vec![1, 2, 3]);
                assert_eq!(data, vec![9; 32]);
                assert_eq!(flags, sigflag::RSA_SHA2_512);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn add_identity_with_constraints_round_trip() {
        let key = test_private_key("work laptop");
        let req = Request::AddIdentity {
            key: Box::new(key.clone()),
            constraints: vec![
                KeyConstraint::Lifetime(600),
                KeyConstraint::Confirm,
                KeyConstraint::MaxSignatures(8),
            ],
        };
        let (t, p) = req.encode().unwrap();
        assert_eq!(t, num::ADD_IDENTITY_CONSTRAINED);
        match Request::decode(t, &p).unwrap() {
            Request::AddIdentity {
                key: decoded,
                constraints,
            } => {
                assert_eq!(decoded.public_key(), key.public_key());
                assert_eq!(decoded.comment(), "work laptop");
                assert_eq!(constraints.len(), 3);
                assert!(constraints.contains(&KeyConstraint::Confirm));
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_a_variant_not_an_error() {
        match Request::decode(200, &[]).unwrap() {
            Request::Unknown { msg_type } => assert_eq!(msg_type, 200),
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut w = WireWriter::new();
        w.write_string(b"blob");
        let mut payload = w.into_bytes();
        payload.push(0xaa);
        assert!(Request::decode(num::REMOVE_IDENTITY, &payload).is_err());
    }

    #[test]
    fn truncated_sign_request_fails_cleanly() {
        let mut w = WireWriter::new();
        w.write_string(b"blob");
        // Missing data and flags.
        assert!(matches!(
            Request::decode(num::SIGN_REQUEST, &w.into_bytes()),
            Err(ProtoError::Truncated)
        ));
    }

    #[test]
    fn unknown_constraint_extension_rejected() {
        let key = test_private_key("k");
        let mut keypair = Vec::new();
        key.key_data().encode(&mut keypair).unwrap();
        let mut w = WireWriter::new();
        w.write_raw(&keypair)
            .write_utf8("k")
            .write_u8(constrain::EXTENSION)
            .write_utf8("no-such-ext@keyward.dev");
        assert!(Request::decode(num::ADD_IDENTITY_CONSTRAINED, &w.into_bytes()).is_err());
    }

    #[test]
    fn identities_answer_round_trip() {
        let resp = Response::IdentitiesAnswer(vec![
            IdentityEntry {
                key_blob: vec![1, 2],
                comment: "a".into(),
            },
            IdentityEntry {
                key_blob: vec![3],
                comment: "b".into(),
            },
        ]);
        let (t, p) = resp.encode();
        assert_eq!(Response::decode(t, &p).unwrap(), resp);
    }

    #[test]
    fn lock_password_is_redacted_from_wire_type_only() {
        // The Zeroizing wrapper wipes the buffer on drop; here we only check
        // the payload layout.
        let req = Request::Lock {
            password: Zeroizing::new(b"hunter2".to_vec()),
        };
        let (t, p) = req.encode().unwrap();
        assert_eq!(t, num::LOCK);
        match Request::decode(t, &p).unwrap() {
            Request::Lock { password } => assert_eq!(password.as_slice(), b"hunter2"),
            other => panic!("decoded {other:?}"),
        }
    }
}
