//! In-memory identity records.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use keyward_helper::token::TokenModule;
use keyward_proto::constraint::DestinationConstraint;
use ssh_key::{PrivateKey, PublicKey};

/// Key material backing an identity.
pub enum IdentityKey {
    /// Key held in agent memory. When the owning [`Identity`] carries a
    /// provider path this is an authenticator key handle rather than a
    /// directly usable private key, and signing goes through the helper.
    Local(Box<PrivateKey>),
    /// Key resident on a hardware token, addressed by the slot index the
    /// token module reported at load time.
    Token {
        public: Box<PublicKey>,
        module: Arc<TokenModule>,
        index: u32,
    },
}

impl IdentityKey {
    pub fn public(&self) -> &PublicKey {
        match self {
            IdentityKey::Local(key) => key.public_key(),
            IdentityKey::Token { public, .. } => public,
        }
    }
}

impl Clone for IdentityKey {
    fn clone(&self) -> Self {
        match self {
            IdentityKey::Local(key) => IdentityKey::Local(key.clone()),
            IdentityKey::Token {
                public,
                module,
                index,
            } => IdentityKey::Token {
                public: public.clone(),
                module: Arc::clone(module),
                index: *index,
            },
        }
    }
}

/// One loaded identity together with its usage restrictions.
#[derive(Clone)]
pub struct Identity {
    pub key: IdentityKey,
    pub comment: String,
    /// Canonicalized helper module path, present for token and
    /// authenticator-backed keys.
    pub provider: Option<String>,
    /// Absolute expiry. `None` means the identity never expires.
    pub death: Option<SystemTime>,
    /// Require interactive approval before every signature.
    pub confirm: bool,
    /// Remaining signature budget. `Some(0)` keys stay listed but refuse
    /// to sign.
    pub signatures_left: Option<u32>,
    pub destination_constraints: Vec<DestinationConstraint>,
}

impl Identity {
    pub fn public(&self) -> &PublicKey {
        self.key.public()
    }

    pub fn expired(&self, now: SystemTime) -> bool {
        self.death.is_some_and(|death| now >= death)
    }

    pub fn constrained(&self) -> bool {
        !self.destination_constraints.is_empty()
    }
}

// Never log private material. Fingerprint and policy fields only.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field(
                "fingerprint",
                &self.public().fingerprint(Default::default()).to_string(),
            )
            .field("comment", &self.comment)
            .field("provider", &self.provider)
            .field("death", &self.death)
            .field("confirm", &self.confirm)
            .field("signatures_left", &self.signatures_left)
            .field(
                "destination_constraints",
                &self.destination_constraints.len(),
            )
            .finish()
    }
}
