//! Collaborators the core talks to but does not implement: object storage,
//! e-mail delivery, secret storage, token signing and password hashing.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Claims;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service}: {message}")]
pub struct PortError {
    pub service: &'static str,
    pub message: String,
}

impl PortError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self { service, message: message.into() }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `bucket`/`key` unless an object is already there.
    /// Returns whether the object was written.
    async fn put_object_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<bool, PortError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<(), PortError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when no secret with that name exists.
    async fn get(&self, name: &str) -> Result<Option<String>, PortError>;

    async fn create(&self, name: &str, value: &str) -> Result<(), PortError>;
}

/// Signs and verifies bearer tokens. The signing secret is passed per call
/// so it can come from [`crate::secrets::SecretCache`].
pub trait TokenAuthority: Send + Sync {
    fn sign(&self, claims: &Claims, secret: &str) -> Result<String, PortError>;

    /// `None` for a malformed, forged or expired token.
    fn verify(&self, token: &str, secret: &str) -> Option<Claims>;
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, PortError>;

    fn verify(&self, password: &str, hash: &str) -> bool;
}
