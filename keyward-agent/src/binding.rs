//! Per-connection session-binding state.
//!
//! An SSH client binds its connection to the agent socket by presenting
//! the server hostkey, the session identifier, and the server's signature
//! over that identifier. The recorded chain is what destination
//! constraints are evaluated against. Bindings only accumulate, they are
//! never replaced or removed for the lifetime of the connection.

use keyward_proto::message::SessionBind;
use signature::Verifier;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on recorded bindings per connection. A legitimate chain of
/// forwarded hops is short, anything past this is a broken or hostile
/// client.
pub const MAX_SESSION_BINDINGS: usize = 16;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("session binding limit reached")]
    TooMany,
    #[error("hostkey signature over session id did not verify")]
    BadSignature,
    #[error("session id already bound to a different hostkey")]
    SessionIdReuse,
}

pub struct SessionBinding {
    pub hostkey: ssh_key::PublicKey,
    pub session_id: Vec<u8>,
    pub forwarded: bool,
}

/// State the dispatcher keeps per client connection.
pub struct ConnectionState {
    id: u64,
    bindings: Vec<SessionBinding>,
}

impl ConnectionState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            bindings: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bindings(&self) -> &[SessionBinding] {
        &self.bindings
    }

    /// Record a verified session binding. A repeat of an already recorded
    /// binding is accepted without growing the chain; the same session id
    /// under a different hostkey is refused.
    pub fn record_binding(&mut self, bind: SessionBind) -> Result<(), BindingError> {
        // Fully qualified: `PublicKey` has an inherent three-argument
        // `verify` for SSHSIG envelopes that would otherwise shadow the
        // trait method.
        if Verifier::verify(&bind.hostkey, &bind.session_id, &bind.signature).is_err() {
            warn!(conn = self.id, "session bind rejected: bad hostkey signature");
            return Err(BindingError::BadSignature);
        }

        if let Some(existing) = self
            .bindings
            .iter()
            .find(|b| b.session_id == bind.session_id)
        {
            if existing.hostkey.key_data() != bind.hostkey.key_data() {
                warn!(conn = self.id, "session bind rejected: session id reuse");
                return Err(BindingError::SessionIdReuse);
            }
            debug!(conn = self.id, "session bind repeated, ignoring");
            return Ok(());
        }

        if self.bindings.len() >= MAX_SESSION_BINDINGS {
            warn!(conn = self.id, "session bind rejected: too many bindings");
            return Err(BindingError::TooMany);
        }

        debug!(
            conn = self.id,
            hop = self.bindings.len(),
            forwarded = bind.forwarded,
            hostkey = %bind.hostkey.fingerprint(Default::default()),
            "session binding recorded"
        );
        self.bindings.push(SessionBinding {
            hostkey: bind.hostkey,
            session_id: bind.session_id,
            forwarded: bind.forwarded,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use signature::Signer;
    use ssh_key::{Algorithm, PrivateKey};

    use super::*;

    fn bind_for(hostkey: &PrivateKey, session_id: &[u8], forwarded: bool) -> SessionBind {
        SessionBind {
            hostkey: hostkey.public_key().clone(),
            session_id: session_id.to_vec(),
            signature: Signer::sign(hostkey, session_id),
            forwarded,
        }
    }

    #[test]
    fn records_verified_binding() {
        let host = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut conn = ConnectionState::new(1);
        conn.record_binding(bind_for(&host, b"sid-one", false)).unwrap();
        assert_eq!(conn.bindings().len(), 1);
        assert!(!conn.bindings()[0].forwarded);
    }

    #[test]
    fn rejects_signature_over_wrong_session_id() {
        let host = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut bind = bind_for(&host, b"sid-one", false);
        bind.session_id = b"sid-two".to_vec();
        let mut conn = ConnectionState::new(1);
        assert!(matches!(
            conn.record_binding(bind),
            Err(BindingError::BadSignature)
        ));
        assert!(conn.bindings().is_empty());
    }

    #[test]
    fn same_session_id_different_hostkey_is_refused() {
        let host_a = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let host_b = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut conn = ConnectionState::new(1);
        conn.record_binding(bind_for(&host_a, b"sid", false)).unwrap();
        assert!(matches!(
            conn.record_binding(bind_for(&host_b, b"sid", true)),
            Err(BindingError::SessionIdReuse)
        ));
    }

    #[test]
    fn repeated_binding_does_not_grow_chain() {
        let host = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut conn = ConnectionState::new(1);
        conn.record_binding(bind_for(&host, b"sid", false)).unwrap();
        conn.record_binding(bind_for(&host, b"sid", false)).unwrap();
        assert_eq!(conn.bindings().len(), 1);
    }

    #[test]
    fn binding_limit_enforced() {
        let host = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut conn = ConnectionState::new(1);
        for i in 0..MAX_SESSION_BINDINGS {
            let sid = format!("sid-{i}");
            conn.record_binding(bind_for(&host, sid.as_bytes(), i > 0))
                .unwrap();
        }
        assert!(matches!(
            conn.record_binding(bind_for(&host, b"one-too-many", true)),
            Err(BindingError::TooMany)
        ));
    }
}
