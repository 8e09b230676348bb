/// Background task implementations
use crate::{context::BansContext, db::StorageBackend, error::BansResult};

/// Remove expired punishments from memory and queue their deletion
pub fn sweep_expired(ctx: &BansContext) -> usize {
    ctx.punishments.refresh_active().len()
}

/// Health check - verify the store is reachable
pub async fn health_check(ctx: &BansContext) -> BansResult<()> {
    ctx.backend.ping().await?;

    tracing::debug!(
        active = ctx.punishments.active_count(),
        identities = ctx.identities.len(),
        "Health check passed"
    );
    Ok(())
}
