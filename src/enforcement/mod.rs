/// Enforcement facade - public API of the engine
use crate::{
    error::{BansError, BansResult},
    executor::AsyncExecutor,
    identity::IdentityCache,
    platform::Platform,
    punishment::{Punishment, PunishmentId, PunishmentStore, PunishmentType, Subject},
};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Combines the punishment store, the identity cache and the host platform
#[derive(Clone)]
pub struct EnforcementFacade {
    punishments: Arc<PunishmentStore>,
    identities: Arc<IdentityCache>,
    platform: Arc<dyn Platform>,
    executor: AsyncExecutor,
}

impl EnforcementFacade {
    pub fn new(
        punishments: Arc<PunishmentStore>,
        identities: Arc<IdentityCache>,
        platform: Arc<dyn Platform>,
        executor: AsyncExecutor,
    ) -> Self {
        Self {
            punishments,
            identities,
            platform,
            executor,
        }
    }

    pub fn punishments(&self) -> &Arc<PunishmentStore> {
        &self.punishments
    }

    pub fn identities(&self) -> &Arc<IdentityCache> {
        &self.identities
    }

    pub fn is_banned(&self, subject: &Subject) -> bool {
        self.punishments.has_punishment(subject, PunishmentType::Ban)
    }

    pub fn is_muted(&self, subject: &Subject) -> bool {
        self.punishments.has_punishment(subject, PunishmentType::Mute)
    }

    pub fn ban_list(&self) -> Vec<Punishment> {
        self.punishments.get_all_punishments(PunishmentType::Ban)
    }

    pub fn mute_list(&self) -> Vec<Punishment> {
        self.punishments.get_all_punishments(PunishmentType::Mute)
    }

    pub fn warns(&self, subject: &Subject) -> Vec<Punishment> {
        self.punishments.get_punishments(subject, PunishmentType::Warn)
    }

    pub fn kicks(&self, subject: &Subject) -> Vec<Punishment> {
        self.punishments.get_punishments(subject, PunishmentType::Kick)
    }

    pub fn history(&self, subject: &Subject) -> Vec<Punishment> {
        self.punishments.get_history(subject)
    }

    /// Add one punishment and enforce it on the platform
    pub fn add_punishment(&self, punishment: Punishment) -> BansResult<()> {
        self.punishments.add_punishment(punishment.clone())?;
        self.enforce(punishment);
        Ok(())
    }

    /// Add a batch of punishments; a conflict anywhere rejects the whole batch
    pub fn add_punishments(&self, batch: Vec<Punishment>) -> BansResult<()> {
        self.punishments.add_punishments(batch.clone())?;
        for punishment in batch {
            self.enforce(punishment);
        }
        Ok(())
    }

    pub fn remove_punishment(&self, subject: &Subject, kind: PunishmentType) -> usize {
        self.punishments.remove_punishment(subject, kind)
    }

    pub fn edit_reason(&self, id: PunishmentId, reason: &str) -> BansResult<()> {
        self.punishments.edit_reason(id, reason)
    }

    /// Turn free-form input into a subject
    ///
    /// Accepts an IP literal, a UUID, or the name of a player seen before.
    pub fn parse_subject(&self, input: &str) -> BansResult<Subject> {
        let input = input.trim();
        if let Ok(subject) = input.parse::<Subject>() {
            return Ok(subject);
        }

        self.identities
            .resolve_uuid(input)
            .map(Subject::Player)
            .ok_or_else(|| {
                BansError::InvalidInput(format!(
                    "'{}' is not an IP address, UUID or known player name",
                    input
                ))
            })
    }

    pub fn from_uuid(&self, uuid: Uuid) -> Subject {
        Subject::Player(uuid)
    }

    pub fn from_address(&self, address: IpAddr) -> Subject {
        Subject::Address(address)
    }

    /// Message a subject if it is online
    pub async fn send_message(&self, subject: &Subject, text: &str) -> BansResult<()> {
        if !self.platform.is_online(*subject).await {
            debug!(%subject, "Not delivering message to offline subject");
            return Ok(());
        }
        self.platform.send_message(*subject, text.to_string()).await
    }

    /// Record a connecting player and return the ban that should turn them away
    ///
    /// A ban on the player takes precedence over one on the address.
    pub fn player_connected(&self, uuid: Uuid, name: &str, address: IpAddr) -> Option<Punishment> {
        self.identities.update(uuid, name, &[address]);

        [Subject::Player(uuid), Subject::Address(address)]
            .iter()
            .find_map(|subject| {
                self.punishments
                    .get_punishments(subject, PunishmentType::Ban)
                    .into_iter()
                    .next()
            })
    }

    /// Carry out a newly added punishment in the background
    fn enforce(&self, punishment: Punishment) {
        let targets = match (punishment.kind, punishment.subject) {
            (PunishmentType::Ban | PunishmentType::Kick, Subject::Player(uuid)) => vec![uuid],
            (PunishmentType::Ban | PunishmentType::Kick, Subject::Address(address)) => {
                self.identities.uuids_for_address(address)
            }
            _ => Vec::new(),
        };

        let platform = Arc::clone(&self.platform);
        let subject = punishment.subject;

        self.executor.execute(&subject, async move {
            let message = enforcement_message(&punishment);

            match punishment.kind {
                PunishmentType::Ban | PunishmentType::Kick => {
                    for uuid in targets {
                        if !platform.is_online(Subject::Player(uuid)).await {
                            continue;
                        }
                        match platform.kick(uuid, message.clone()).await {
                            Ok(()) => info!(%uuid, punishment_id = punishment.id.0, "Kicked player"),
                            Err(e) => warn!(%uuid, punishment_id = punishment.id.0, error = %e, "Kick failed"),
                        }
                    }
                }
                PunishmentType::Mute | PunishmentType::Warn => {
                    if !platform.is_online(subject).await {
                        return;
                    }
                    if let Err(e) = platform.send_message(subject, message).await {
                        warn!(%subject, punishment_id = punishment.id.0, error = %e, "Notification failed");
                    }
                }
            }
        });
    }
}

/// Plain text shown to the punished player
fn enforcement_message(punishment: &Punishment) -> String {
    let verb = match punishment.kind {
        PunishmentType::Ban => "banned",
        PunishmentType::Mute => "muted",
        PunishmentType::Warn => "warned",
        PunishmentType::Kick => "kicked",
    };
    if punishment.expiration.is_permanent() || !punishment.kind.is_exclusive() {
        format!("You have been {}: {}", verb, punishment.reason)
    } else {
        format!(
            "You have been {} {}: {}",
            verb, punishment.expiration, punishment.reason
        )
    }
}
