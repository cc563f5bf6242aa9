//! Resolve a presented SSH public key to a user or a build agent.
//!
//! Users and agents are separate trust levels: an agent match never yields
//! a user identity.
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use lci_model::AgentId;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::{
    error::{CoreError, CoreResult},
    registry::AgentRegistry,
};

/// Who is behind an authenticated connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// An end user; normal authorization applies.
    User(String),
    /// A live build agent; only agent commands are allowed.
    Agent(AgentId),
    Unknown,
}

/// Lookup of end-user keys by fingerprint.
#[async_trait]
pub trait UserKeyStore: Send + Sync {
    /// Login of the user owning `fingerprint`.
    async fn user_for(&self, fingerprint: &str) -> CoreResult<Option<String>>;
}

/// Fixed fingerprint to login table.
#[derive(Clone, Debug, Default)]
pub struct StaticUserKeys {
    keys: HashMap<String, String>,
}

impl StaticUserKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, fingerprint: impl Into<String>, user: impl Into<String>) -> Self {
        self.keys.insert(fingerprint.into(), user.into());
        self
    }
}

#[async_trait]
impl UserKeyStore for StaticUserKeys {
    async fn user_for(&self, fingerprint: &str) -> CoreResult<Option<String>> {
        Ok(self.keys.get(fingerprint).cloned())
    }
}

/// OpenSSH `SHA256:` fingerprint of a raw public key blob.
pub fn fingerprint_blob(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

/// Fingerprint of an `authorized_keys` style line: `<type> <base64> [comment]`.
pub fn fingerprint_openssh(line: &str) -> CoreResult<String> {
    let mut parts = line.split_whitespace();
    let (Some(_kind), Some(encoded)) = (parts.next(), parts.next()) else {
        return Err(CoreError::InvalidKey("expected '<type> <base64> [comment]'".into()));
    };
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    Ok(fingerprint_blob(&blob))
}

pub struct AgentAdmission {
    users: Arc<dyn UserKeyStore>,
    registry: AgentRegistry,
    liveness_timeout: Duration,
}

impl AgentAdmission {
    pub fn new(users: Arc<dyn UserKeyStore>, registry: AgentRegistry, liveness_timeout: Duration) -> Self {
        Self {
            users,
            registry,
            liveness_timeout,
        }
    }

    /// User keys first, then keys advertised by live registered agents.
    #[instrument(level = "debug", skip(self))]
    pub async fn identify(&self, fingerprint: &str) -> CoreResult<Identity> {
        if let Some(user) = self.users.user_for(fingerprint).await? {
            return Ok(Identity::User(user));
        }

        let now = OffsetDateTime::now_utc();
        let agent = self.registry.list().await?.into_iter().find(|a| {
            a.public_key_fingerprint.as_deref() == Some(fingerprint)
                && !a.is_stale(now, self.liveness_timeout)
        });
        match agent {
            Some(a) => {
                debug!(agent = %a.id, "key belongs to a build agent");
                Ok(Identity::Agent(a.id))
            }
            None => Ok(Identity::Unknown),
        }
    }
}
