//! Long-lived token-module helper client.
//!
//! One helper process per loaded middleware module.  The helper derives an
//! opaque per-process index for every key it finds; the agent signs by
//! index and never sees a reusable middleware handle.  The module handle is
//! shared by every identity backed by it — the last holder dropping the
//! [`TokenModule`] tears the helper down.

use std::path::Path;
use std::sync::Arc;

use ssh_key::public::PublicKey;
use tokio::sync::Mutex;
use tracing::debug;

use keyward_proto::wire::{WireReader, WireWriter};

use crate::channel::{HelperError, op};
use crate::process::HelperProcess;

/// One key the helper found on the token.
#[derive(Debug, Clone)]
pub struct TokenKey {
    /// Opaque per-process index assigned by the helper.
    pub index: u32,
    pub public: PublicKey,
    pub label: String,
}

/// A loaded token-module handle.
pub struct TokenModule {
    provider: String,
    helper: Mutex<HelperProcess>,
}

impl TokenModule {
    /// Spawn a helper, load the module at `provider`, and list its keys.
    pub async fn load(
        program: &Path,
        provider: &str,
        pin: &[u8],
    ) -> Result<(Arc<Self>, Vec<TokenKey>), HelperError> {
        let mut helper = HelperProcess::spawn(program, &[])?;

        let mut w = WireWriter::new();
        w.write_utf8(provider).write_string(pin);
        let (resp_op, body) = helper.call(op::LOAD_MODULE, &w.into_bytes()).await?;
        if resp_op != op::LOAD_MODULE {
            return Err(HelperError::Malformed);
        }

        let mut r = WireReader::new(&body);
        let count = r.read_u32().map_err(|_| HelperError::Malformed)?;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index = r.read_u32().map_err(|_| HelperError::Malformed)?;
            let blob = r.read_string().map_err(|_| HelperError::Malformed)?;
            let public = PublicKey::from_bytes(blob).map_err(|_| HelperError::Malformed)?;
            let label = r
                .read_utf8("token key label")
                .map_err(|_| HelperError::Malformed)?;
            keys.push(TokenKey {
                index,
                public,
                label,
            });
        }
        r.finish().map_err(|_| HelperError::Malformed)?;

        debug!(provider, keys = keys.len(), "token module loaded");
        Ok((
            Arc::new(Self {
                provider: provider.to_owned(),
                helper: Mutex::new(helper),
            }),
            keys,
        ))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Sign `data` with the key the helper indexed at load time.
    pub async fn sign(&self, index: u32, data: &[u8]) -> Result<Vec<u8>, HelperError> {
        let mut w = WireWriter::new();
        w.write_u32(index).write_string(data);
        let mut helper = self.helper.lock().await;
        let (resp_op, body) = helper.call(op::SIGN, &w.into_bytes()).await?;
        drop(helper);
        if resp_op != op::SIGN {
            return Err(HelperError::Malformed);
        }
        let mut r = WireReader::new(&body);
        let sig = r
            .read_string()
            .map_err(|_| HelperError::Malformed)?
            .to_vec();
        r.finish().map_err(|_| HelperError::Malformed)?;
        Ok(sig)
    }

    /// Ask the helper to release the module.  Best-effort: the child is
    /// killed on drop regardless, this just lets the middleware see an
    /// orderly teardown first.
    pub async fn unload(&self) {
        let mut helper = self.helper.lock().await;
        if let Err(e) = helper.call(op::UNLOAD_MODULE, &[]).await {
            debug!(provider = %self.provider, "unload ignored by helper: {e}");
        }
    }
}

impl Drop for TokenModule {
    fn drop(&mut self) {
        // The helper child itself is killed by its own drop.
        debug!(provider = %self.provider, "token module handle released");
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use ssh_key::PrivateKey;

    use super::*;
    use crate::channel::encode_response;
    use crate::testutil::fake_helper;

    fn load_response(keys: &[(u32, &PublicKey, &str)]) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_u32(keys.len() as u32);
        for (index, public, label) in keys {
            w.write_u32(*index)
                .write_string(&public.to_bytes().unwrap())
                .write_utf8(label);
        }
        encode_response(op::LOAD_MODULE, &w.into_bytes())
    }

    #[tokio::test]
    async fn load_lists_module_keys() {
        let key = PrivateKey::random(&mut OsRng, ssh_key::Algorithm::Ed25519).unwrap();
        let public = key.public_key();
        let script = fake_helper("load", &[load_response(&[(7, public, "token-key")])], 0);
        let (module, keys) = TokenModule::load(script.path(), "/lib/mod.so", b"")
            .await
            .unwrap();
        assert_eq!(module.provider(), "/lib/mod.so");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].index, 7);
        assert_eq!(keys[0].label, "token-key");
        assert_eq!(&keys[0].public, public);
    }

    #[tokio::test]
    async fn load_rejects_mismatched_response_op() {
        let script = fake_helper("load-op", &[encode_response(op::SIGN, b"")], 0);
        assert!(matches!(
            TokenModule::load(script.path(), "/lib/mod.so", b"").await,
            Err(HelperError::Malformed)
        ));
    }

    #[tokio::test]
    async fn sign_rejects_mismatched_response_op() {
        let key = PrivateKey::random(&mut OsRng, ssh_key::Algorithm::Ed25519).unwrap();
        let responses = [
            load_response(&[(0, key.public_key(), "k")]),
            encode_response(op::ENROLL, b"not-a-signature"),
        ];
        let script = fake_helper("sign-op", &responses, 0);
        let (module, _keys) = TokenModule::load(script.path(), "/lib/mod.so", b"")
            .await
            .unwrap();
        assert!(matches!(
            module.sign(0, b"data").await,
            Err(HelperError::Malformed)
        ));
    }
}
