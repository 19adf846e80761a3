//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/keyward/config.toml` unless overridden
//! with `--config`. A missing file means defaults; a file readable by
//! group or others earns a warning since it names trusted helper paths.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyward_agent::AgentPolicy;
use keyward_agent::lock::KDF_ROUNDS_DEFAULT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listening socket. Defaults to `$XDG_RUNTIME_DIR/keyward/agent.sock`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// Exit once the last client disconnects.
    #[serde(default)]
    pub exit_on_last_client: bool,
    #[serde(default = "default_kdf_rounds")]
    pub kdf_rounds: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            exit_on_last_client: false,
            kdf_rounds: default_kdf_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wildcard patterns a canonicalized provider path must match.
    #[serde(default = "default_allowed_providers")]
    pub allowed: Vec<String>,
    #[serde(default = "default_token_helper")]
    pub token_helper: PathBuf,
    #[serde(default = "default_authenticator_helper")]
    pub authenticator_helper: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_providers(),
            token_helper: default_token_helper(),
            authenticator_helper: default_authenticator_helper(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmConfig {
    /// Askpass-style program used for confirmation prompts and PINs.
    /// Falls back to `KEYWARD_ASKPASS` when unset.
    #[serde(default)]
    pub askpass: Option<PathBuf>,
}

fn default_kdf_rounds() -> u32 {
    KDF_ROUNDS_DEFAULT
}

fn default_allowed_providers() -> Vec<String> {
    vec!["/usr/lib/*".into(), "/usr/lib64/*".into()]
}

fn default_token_helper() -> PathBuf {
    PathBuf::from("keyward-token-helper")
}

fn default_authenticator_helper() -> PathBuf {
    PathBuf::from("keyward-sk-helper")
}

impl Config {
    pub fn socket_path(&self) -> PathBuf {
        if let Some(path) = &self.daemon.socket_path {
            return path.clone();
        }
        let base = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                // SAFETY: getuid never fails.
                let uid = unsafe { libc::getuid() };
                std::env::temp_dir().join(format!("keyward-{uid}"))
            });
        base.join("keyward").join("agent.sock")
    }

    pub fn policy(&self) -> AgentPolicy {
        AgentPolicy {
            allowed_providers: self.providers.allowed.clone(),
            token_helper: self.providers.token_helper.clone(),
            authenticator_helper: self.providers.authenticator_helper.clone(),
            kdf_rounds: self.daemon.kdf_rounds,
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(
            "config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mode = meta.mode();
                if mode & 0o077 != 0 {
                    tracing::warn!(
                        path = %path.display(),
                        mode = format!("{:o}", mode & 0o777),
                        "config file is readable by group or others, recommend chmod 600"
                    );
                }
            }
            Err(e) => {
                tracing::warn!("could not check config file permissions: {e}");
            }
        }
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.daemon.exit_on_last_client);
        assert_eq!(config.daemon.kdf_rounds, KDF_ROUNDS_DEFAULT);
        assert_eq!(
            config.providers.allowed,
            vec!["/usr/lib/*".to_string(), "/usr/lib64/*".to_string()]
        );
        assert!(config.confirm.askpass.is_none());
    }

    #[test]
    fn partial_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            socket_path = "/run/user/1000/agent.sock"
            exit_on_last_client = true

            [providers]
            allowed = ["/opt/modules/*"]

            [confirm]
            askpass = "/usr/bin/ssh-askpass"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/run/user/1000/agent.sock")
        );
        assert!(config.daemon.exit_on_last_client);
        assert_eq!(config.providers.allowed, vec!["/opt/modules/*".to_string()]);
        let policy = config.policy();
        assert_eq!(policy.allowed_providers, vec!["/opt/modules/*".to_string()]);
    }
}
