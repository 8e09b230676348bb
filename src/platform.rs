//! Host platform collaborator
//!
//! The engine never talks to players directly; kicks, messages and the
//! name/UUID directory are provided by the host through [`Platform`].

use crate::{
    error::{BansError, BansResult},
    identity::{IdentityQuery, PlayerProfile},
    punishment::Subject,
};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Operations the engine needs from the host server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Disconnect an online player
    async fn kick(&self, uuid: Uuid, message: String) -> BansResult<()>;

    /// Whether the subject currently has a connection
    async fn is_online(&self, subject: Subject) -> bool;

    /// Deliver a message to an online subject
    async fn send_message(&self, subject: Subject, text: String) -> BansResult<()>;

    /// Ask the external name/UUID directory
    async fn lookup_identity(&self, query: IdentityQuery) -> BansResult<PlayerProfile>;
}

/// Platform for running the engine without a game server attached
///
/// Enforcement is only logged and nobody is ever online.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPlatform;

#[async_trait]
impl Platform for HeadlessPlatform {
    async fn kick(&self, uuid: Uuid, message: String) -> BansResult<()> {
        info!(%uuid, message, "Kick requested without a connected platform");
        Ok(())
    }

    async fn is_online(&self, _subject: Subject) -> bool {
        false
    }

    async fn send_message(&self, subject: Subject, text: String) -> BansResult<()> {
        info!(%subject, text, "Message requested without a connected platform");
        Ok(())
    }

    async fn lookup_identity(&self, query: IdentityQuery) -> BansResult<PlayerProfile> {
        Err(BansError::NotFound(format!(
            "No identity authority available for {}",
            query
        )))
    }
}
