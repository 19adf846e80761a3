//! Destination-constraint evaluation.
//!
//! The same walk answers two questions: "could this identity ever be used
//! from this connection" (listing, no username known yet) and "may it sign
//! this specific request" (signing, username from the parsed signed data).
//! An identity with no destination constraints is always permitted; the
//! constraint machinery must never restrict unconstrained keys.

use std::fmt;

use keyward_proto::authdata::SignedData;
use keyward_proto::constraint::{ConstraintHop, DestinationConstraint};
use ssh_key::PublicKey;
use wildmatch::WildMatch;

use crate::binding::SessionBinding;
use crate::identity::Identity;

/// Refusal reason. Logged, never sent to the client.
pub struct Denied(pub &'static str);

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

fn hop_matches_key(hop: &ConstraintHop, key: &PublicKey) -> bool {
    // Certificate-authority entries would need the bound hostkey to be a
    // certificate; bindings carry plain keys, so those entries never
    // match and the hop is denied rather than waved through.
    hop.keys
        .iter()
        .any(|(k, is_ca)| !*is_ca && k.key_data() == key.key_data())
}

fn hop_matches_user(hop: &ConstraintHop, user: Option<&str>) -> bool {
    match (&hop.user, user) {
        (None, _) => true,
        // Username not known yet (listing); pattern checked at sign time.
        (Some(_), None) => true,
        (Some(pattern), Some(user)) => WildMatch::new(pattern).matches(user),
    }
}

/// Whether one constraint permits the transition `from -> to`. A `from` of
/// `None` is the origin host, which only an "anywhere" from-hop matches.
fn constraint_permits(
    constraint: &DestinationConstraint,
    from: Option<&PublicKey>,
    to: &PublicKey,
    user: Option<&str>,
) -> bool {
    let from_ok = match from {
        None => constraint.from.is_anywhere(),
        Some(key) => hop_matches_key(&constraint.from, key),
    };
    from_ok && hop_matches_key(&constraint.to, to) && hop_matches_user(&constraint.to, user)
}

/// Walk the binding chain and require every transition to be covered by at
/// least one constraint. `final_user` is matched against the last hop only.
pub fn chain_permitted(
    constraints: &[DestinationConstraint],
    bindings: &[SessionBinding],
    final_user: Option<&str>,
) -> Result<(), Denied> {
    if constraints.is_empty() {
        return Ok(());
    }
    if bindings.is_empty() {
        return Err(Denied("constrained key but no session bindings recorded"));
    }

    let mut from: Option<&PublicKey> = None;
    for (hop, binding) in bindings.iter().enumerate() {
        if hop > 0 && !binding.forwarded {
            return Err(Denied("non-forwarding binding past the first hop"));
        }
        let last = hop + 1 == bindings.len();
        let user = if last { final_user } else { None };
        if !constraints
            .iter()
            .any(|c| constraint_permits(c, from, &binding.hostkey, user))
        {
            return Err(Denied("no constraint permits this hop"));
        }
        from = Some(&binding.hostkey);
    }
    Ok(())
}

/// Listing check: would any future request from this connection be able to
/// use the identity at all.
pub fn listing_permitted(identity: &Identity, bindings: &[SessionBinding]) -> bool {
    chain_permitted(&identity.destination_constraints, bindings, None).is_ok()
}

/// Signing check for a constrained identity: the data must parse as a
/// recognized signed payload, the embedded session id and hostkey must
/// agree with the last recorded binding, and the chain must be permitted
/// for the requested username.
pub fn sign_permitted(
    identity: &Identity,
    bindings: &[SessionBinding],
    data: &[u8],
) -> Result<(), Denied> {
    if !identity.constrained() {
        return Ok(());
    }
    let Some(last) = bindings.last() else {
        return Err(Denied("constrained key but no session bindings recorded"));
    };

    let parsed = SignedData::parse(data)
        .map_err(|_| Denied("constrained key asked to sign unrecognized data"))?;
    match parsed {
        SignedData::UserAuth {
            session_id,
            username,
            hostkey,
            ..
        } => {
            if session_id != last.session_id {
                return Err(Denied("signed session id does not match last binding"));
            }
            if let Some(hostkey) = &hostkey
                && hostkey.key_data() != last.hostkey.key_data()
            {
                return Err(Denied("signed hostkey does not match last binding"));
            }
            chain_permitted(
                &identity.destination_constraints,
                bindings,
                Some(&username),
            )
        }
        // Detached signatures carry no session id, so a destination
        // constraint can never be satisfied by one.
        SignedData::Detached { .. } => {
            Err(Denied("detached signing refused for constrained key"))
        }
    }
}
