//! Destination-constraint wire records.
//!
//! A constraint says "this key may be used to authenticate FROM hop A TO
//! hop B".  On the wire a constraint is a sub-message of two length-prefixed
//! hop records; each hop record is `string user-pattern | string hostname |
//! string reserved | (string key-blob, bool is-ca)*` running to the end of
//! the record.  Empty user/hostname strings mean "unset"; a hop with no keys
//! means "the origin" for the `from` side and "any destination" for `to`.

use ssh_key::PublicKey;

use crate::ProtoError;
use crate::wire::{WireReader, WireWriter};

/// One endpoint of a destination constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintHop {
    /// User-name pattern this hop is restricted to, if any.
    pub user: Option<String>,
    /// Host name, used for matching and diagnostics.
    pub hostname: Option<String>,
    /// Host keys that must match the session binding at this hop, each with
    /// a flag marking certificate-authority keys.
    pub keys: Vec<(PublicKey, bool)>,
}

impl ConstraintHop {
    /// A hop with nothing bound: the origin (for `from`) or any destination
    /// (for `to`).
    pub fn anywhere() -> Self {
        Self {
            user: None,
            hostname: None,
            keys: Vec::new(),
        }
    }

    pub fn is_anywhere(&self) -> bool {
        self.hostname.is_none() && self.keys.is_empty()
    }

    fn decode(record: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(record);
        let user = r.read_utf8("constraint user")?;
        let hostname = r.read_utf8("constraint hostname")?;
        let _reserved = r.read_string()?;
        let mut keys = Vec::new();
        while !r.is_empty() {
            let blob = r.read_string()?;
            let is_ca = r.read_bool()?;
            keys.push((PublicKey::from_bytes(blob)?, is_ca));
        }
        Ok(Self {
            user: (!user.is_empty()).then_some(user),
            hostname: (!hostname.is_empty()).then_some(hostname),
            keys,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut w = WireWriter::new();
        w.write_utf8(self.user.as_deref().unwrap_or(""));
        w.write_utf8(self.hostname.as_deref().unwrap_or(""));
        w.write_string(b"");
        for (key, is_ca) in &self.keys {
            w.write_string(&key.to_bytes()?);
            w.write_bool(*is_ca);
        }
        Ok(w.into_bytes())
    }
}

/// A "from hop A to hop B" rule attached to an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConstraint {
    pub from: ConstraintHop,
    pub to: ConstraintHop,
}

impl DestinationConstraint {
    /// Decode one constraint sub-message (the contents, not its own length
    /// prefix).  The sub-message must be fully consumed.
    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(body);
        let from = ConstraintHop::decode(r.read_string()?)?;
        let to = ConstraintHop::decode(r.read_string()?)?;
        r.finish()?;
        Ok(Self { from, to })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut w = WireWriter::new();
        w.write_string(&self.from.encode()?);
        w.write_string(&self.to.encode()?);
        Ok(w.into_bytes())
    }

    /// Decode a sequence of length-prefixed constraints running to the end
    /// of `body`, enforcing `max` as the per-identity bound.
    pub fn decode_list(body: &[u8], max: usize) -> Result<Vec<Self>, ProtoError> {
        let mut r = WireReader::new(body);
        let mut out = Vec::new();
        while !r.is_empty() {
            if out.len() >= max {
                return Err(ProtoError::Malformed("too many destination constraints"));
            }
            out.push(Self::decode(r.read_string()?)?);
        }
        Ok(out)
    }

    pub fn encode_list(list: &[Self]) -> Result<Vec<u8>, ProtoError> {
        let mut w = WireWriter::new();
        for c in list {
            w.write_string(&c.encode()?);
        }
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> PublicKey {
        use ssh_key::private::PrivateKey;
        use ssh_key::{Algorithm, rand_core::OsRng};
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    #[test]
    fn hop_round_trip_with_keys() {
        let c = DestinationConstraint {
            from: ConstraintHop::anywhere(),
            to: ConstraintHop {
                user: Some("alice".into()),
                hostname: Some("bastion".into()),
                keys: vec![(test_key(), false), (test_key(), true)],
            },
        };
        let decoded = DestinationConstraint::decode(&c.encode().unwrap()).unwrap();
        assert_eq!(decoded, c);
        assert!(decoded.from.is_anywhere());
        assert_eq!(decoded.to.user.as_deref(), Some("alice"));
    }

    #[test]
    fn empty_strings_decode_as_unset() {
        let c = DestinationConstraint {
            from: ConstraintHop::anywhere(),
            to: ConstraintHop::anywhere(),
        };
        let decoded = DestinationConstraint::decode(&c.encode().unwrap()).unwrap();
        assert_eq!(decoded.from.user, None);
        assert_eq!(decoded.to.hostname, None);
    }

    #[test]
    fn list_bound_is_enforced() {
        let c = DestinationConstraint {
            from: ConstraintHop::anywhere(),
            to: ConstraintHop::anywhere(),
        };
        let body = DestinationConstraint::encode_list(&[c.clone(), c]).unwrap();
        assert!(DestinationConstraint::decode_list(&body, 2).is_ok());
        assert!(matches!(
            DestinationConstraint::decode_list(&body, 1),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_garbage_rejected() {
        let c = DestinationConstraint {
            from: ConstraintHop::anywhere(),
            to: ConstraintHop::anywhere(),
        };
        let mut body = c.encode().unwrap();
        body.push(0);
        assert!(DestinationConstraint::decode(&body).is_err());
    }
}
