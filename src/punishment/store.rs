//! Punishment store
//!
//! Active and history sets indexed by subject. Memory is authoritative: every
//! accepted mutation is visible immediately and the matching statements are
//! queued on the write queue afterwards, keyed by subject so that writes for
//! one subject land in the order they were made.
//!
//! Lock order is Active, then History, then the id index.

use crate::{
    db::{Query, SqlQuery, SqlRow, SqlValue, WriteQueue},
    error::{BansError, BansResult},
    punishment::{Punishment, PunishmentId, PunishmentType, Subject},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

type PunishmentSet = DashMap<Subject, Vec<Arc<Punishment>>>;

pub struct PunishmentStore {
    /// Exclusive punishments currently in effect
    active: PunishmentSet,
    /// Every punishment ever issued
    history: PunishmentSet,
    ids: DashMap<PunishmentId, Subject>,
    writes: WriteQueue,
    /// Single adds share it; a batch holds it exclusively while it validates and applies
    admission: RwLock<()>,
}

impl PunishmentStore {
    pub fn new(writes: WriteQueue) -> Self {
        Self {
            active: DashMap::new(),
            history: DashMap::new(),
            ids: DashMap::new(),
            writes,
            admission: RwLock::new(()),
        }
    }

    /// Add a single punishment
    ///
    /// Exclusive types fail with [`BansError::ConflictingPunishment`] when the
    /// subject already has one of that type in effect; nothing changes then.
    pub fn add_punishment(&self, punishment: Punishment) -> BansResult<()> {
        reject_expired(&punishment, Utc::now())?;

        let _gate = self.admission.read().unwrap_or_else(PoisonError::into_inner);
        self.admit(punishment)
    }

    /// Add a batch of punishments all-or-nothing
    ///
    /// Every item is checked against the active set and against the earlier
    /// items of the batch before anything is applied.
    pub fn add_punishments(&self, batch: Vec<Punishment>) -> BansResult<()> {
        let now = Utc::now();
        for punishment in &batch {
            reject_expired(punishment, now)?;
        }

        let _gate = self.admission.write().unwrap_or_else(PoisonError::into_inner);

        let mut claimed: HashMap<(Subject, PunishmentType), &Punishment> = HashMap::new();
        for punishment in batch.iter().filter(|p| p.kind.is_exclusive()) {
            if let Some(existing) = self.find_active(&punishment.subject, punishment.kind) {
                return Err(BansError::ConflictingPunishment(Box::new(existing)));
            }
            if let Some(earlier) = claimed.insert((punishment.subject, punishment.kind), punishment) {
                return Err(BansError::ConflictingPunishment(Box::new(earlier.clone())));
            }
        }

        let count = batch.len();
        for punishment in batch {
            self.admit(punishment)?;
        }
        debug!(count, "Applied punishment batch");
        Ok(())
    }

    fn admit(&self, mut punishment: Punishment) -> BansResult<()> {
        punishment.expiration = punishment.expiration.truncated();
        let punishment = Arc::new(punishment);
        let subject = punishment.subject;

        if punishment.kind.is_exclusive() {
            let mut active = self.active.entry(subject).or_default();
            if let Some(existing) = active.iter().find(|p| p.kind == punishment.kind) {
                return Err(BansError::ConflictingPunishment(Box::new((**existing).clone())));
            }
            active.push(Arc::clone(&punishment));
            self.record_history(&punishment);

            self.writes.submit(
                &subject,
                "punishment.add",
                vec![
                    SqlQuery::new(Query::InsertActive, punishment.insert_params()),
                    SqlQuery::new(Query::InsertHistory, punishment.insert_params()),
                ],
            );
        } else {
            self.record_history(&punishment);
            self.writes.submit(
                &subject,
                "punishment.add",
                vec![SqlQuery::new(Query::InsertHistory, punishment.insert_params())],
            );
        }

        info!(
            punishment_id = punishment.id.0,
            kind = %punishment.kind,
            %subject,
            operator = %punishment.operator,
            "Punishment added"
        );
        Ok(())
    }

    fn record_history(&self, punishment: &Arc<Punishment>) {
        self.history
            .entry(punishment.subject)
            .or_default()
            .push(Arc::clone(punishment));
        self.ids.insert(punishment.id, punishment.subject);
    }

    /// Lift every active punishment of `kind` on `subject`; history is kept
    pub fn remove_punishment(&self, subject: &Subject, kind: PunishmentType) -> usize {
        let removed: Vec<Arc<Punishment>> = {
            let Some(mut active) = self.active.get_mut(subject) else {
                return 0;
            };
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *active)
                .into_iter()
                .partition(|p| p.kind == kind);
            *active = kept;

            if !removed.is_empty() {
                let deletes = removed
                    .iter()
                    .map(|p| SqlQuery::new(Query::DeleteActiveByDate, vec![SqlValue::Int(p.id.0)]))
                    .collect();
                self.writes.submit(subject, "punishment.remove", deletes);
            }
            removed
        };
        self.active.remove_if(subject, |_, list| list.is_empty());

        if !removed.is_empty() {
            info!(%subject, %kind, count = removed.len(), "Punishment removed");
        }
        removed.len()
    }

    pub fn has_punishment(&self, subject: &Subject, kind: PunishmentType) -> bool {
        self.set_for(kind)
            .get(subject)
            .is_some_and(|list| list.iter().any(|p| p.kind == kind))
    }

    /// Punishments of `kind` on `subject`; active ones for exclusive types, all issued otherwise
    pub fn get_punishments(&self, subject: &Subject, kind: PunishmentType) -> Vec<Punishment> {
        self.set_for(kind)
            .get(subject)
            .map(|list| {
                list.iter()
                    .filter(|p| p.kind == kind)
                    .map(|p| (**p).clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_all_punishments(&self, kind: PunishmentType) -> Vec<Punishment> {
        self.set_for(kind)
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|p| p.kind == kind)
                    .map(|p| (**p).clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn get_history(&self, subject: &Subject) -> Vec<Punishment> {
        self.history
            .get(subject)
            .map(|list| list.iter().map(|p| (**p).clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: PunishmentId) -> Option<Punishment> {
        let subject = *self.ids.get(&id)?;
        self.history
            .get(&subject)?
            .iter()
            .find(|p| p.id == id)
            .map(|p| (**p).clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().map(|entry| entry.len()).sum()
    }

    pub fn history_count(&self) -> usize {
        self.history.iter().map(|entry| entry.len()).sum()
    }

    fn set_for(&self, kind: PunishmentType) -> &PunishmentSet {
        if kind.is_exclusive() {
            &self.active
        } else {
            &self.history
        }
    }

    fn find_active(&self, subject: &Subject, kind: PunishmentType) -> Option<Punishment> {
        self.active
            .get(subject)?
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| (**p).clone())
    }

    /// Replace the reason of a punishment in Active and History
    pub fn edit_reason(&self, id: PunishmentId, reason: &str) -> BansResult<()> {
        let subject = self
            .ids
            .get(&id)
            .map(|entry| *entry)
            .ok_or_else(|| BansError::NotFound(format!("No punishment {}", id)))?;

        if let Some(mut active) = self.active.get_mut(&subject) {
            replace_reason(&mut active, id, reason);
        }

        let mut history = self
            .history
            .get_mut(&subject)
            .ok_or_else(|| BansError::NotFound(format!("No punishment {}", id)))?;
        if !replace_reason(&mut history, id, reason) {
            return Err(BansError::NotFound(format!("No punishment {}", id)));
        }

        self.writes.submit(
            &subject,
            "punishment.edit_reason",
            vec![
                SqlQuery::new(
                    Query::UpdateActiveReasonByDate,
                    vec![SqlValue::from(reason), SqlValue::Int(id.0)],
                ),
                SqlQuery::new(
                    Query::UpdateHistoryReasonByDate,
                    vec![SqlValue::from(reason), SqlValue::Int(id.0)],
                ),
            ],
        );

        info!(punishment_id = id.0, %subject, "Punishment reason edited");
        Ok(())
    }

    /// Remove every active punishment that has expired
    pub fn refresh_active(&self) -> Vec<Punishment> {
        self.refresh_active_at(Utc::now())
    }

    pub fn refresh_active_at(&self, now: DateTime<Utc>) -> Vec<Punishment> {
        let mut expired = Vec::new();

        self.active.retain(|_, list| {
            list.retain(|p| {
                if p.is_expired_at(now) {
                    expired.push((**p).clone());
                    false
                } else {
                    true
                }
            });
            !list.is_empty()
        });

        let mut deletes: HashMap<Subject, Vec<SqlQuery>> = HashMap::new();
        for punishment in &expired {
            deletes.entry(punishment.subject).or_default().push(SqlQuery::new(
                Query::DeleteActiveByDate,
                vec![SqlValue::Int(punishment.id.0)],
            ));
        }
        for (subject, queries) in deletes {
            self.writes.submit(&subject, "punishment.expire", queries);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired punishments swept");
        }
        expired
    }

    /// Rows already expired in storage have no entry in memory, so they go in one statement
    fn queue_expired_delete(&self, now: DateTime<Utc>) {
        self.writes.submit(
            "active.expired",
            "punishment.load",
            vec![SqlQuery::new(
                Query::DeleteExpiredActive,
                vec![SqlValue::Int(now.timestamp_millis())],
            )],
        );
    }

    /// Bulk-load rows of the `Active` table; returns how many entered memory
    pub fn load_active(&self, rows: &[SqlRow]) -> usize {
        self.load_active_at(rows, Utc::now())
    }

    pub fn load_active_at(&self, rows: &[SqlRow], now: DateTime<Utc>) -> usize {
        let mut loaded = 0;
        let mut expired = 0;

        for row in rows {
            let punishment = match Punishment::from_row(row) {
                Ok(punishment) => punishment,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed active punishment row");
                    continue;
                }
            };

            if punishment.is_expired_at(now) {
                expired += 1;
                continue;
            }
            if !punishment.kind.is_exclusive() {
                debug!(punishment_id = punishment.id.0, kind = %punishment.kind, "Ignoring non-exclusive active row");
                continue;
            }

            let subject = punishment.subject;
            let mut active = self.active.entry(subject).or_default();
            let Some(index) = active.iter().position(|p| p.kind == punishment.kind) else {
                active.push(Arc::new(punishment));
                loaded += 1;
                continue;
            };
            if active[index].id == punishment.id {
                continue;
            }

            // Two rows for one exclusive slot; the older one is dropped from storage too
            let superseded = if active[index].id < punishment.id {
                std::mem::replace(&mut active[index], Arc::new(punishment)).id
            } else {
                punishment.id
            };
            warn!(
                %subject,
                kind = %active[index].kind,
                kept = active[index].id.0,
                dropped = superseded.0,
                "Duplicate active punishment, keeping the newest"
            );
            self.writes.submit(
                &subject,
                "punishment.dedupe",
                vec![SqlQuery::new(Query::DeleteActiveByDate, vec![SqlValue::Int(superseded.0)])],
            );
        }

        if expired > 0 {
            self.queue_expired_delete(now);
        }
        info!(loaded, expired, rows = rows.len(), "Loaded active punishments");
        loaded
    }

    /// Bulk-load rows of the `History` table
    pub fn load_history(&self, rows: &[SqlRow]) -> usize {
        let mut loaded = 0;
        for row in rows {
            match Punishment::from_row(row) {
                Ok(punishment) => {
                    if self.ids.contains_key(&punishment.id) {
                        continue;
                    }
                    self.record_history(&Arc::new(punishment));
                    loaded += 1;
                }
                Err(e) => warn!(error = %e, "Skipping malformed history row"),
            }
        }
        info!(loaded, rows = rows.len(), "Loaded punishment history");
        loaded
    }
}

fn reject_expired(punishment: &Punishment, now: DateTime<Utc>) -> BansResult<()> {
    if punishment.is_expired_at(now) {
        return Err(BansError::InvalidInput(format!(
            "Punishment {} has already expired",
            punishment.id
        )));
    }
    Ok(())
}

fn replace_reason(list: &mut [Arc<Punishment>], id: PunishmentId, reason: &str) -> bool {
    match list.iter_mut().find(|p| p.id == id) {
        Some(slot) => {
            *slot = Arc::new(slot.with_reason(reason));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::{Expiration, Operator};
    use crate::testing::{memory_writes, select_all};
    use chrono::Duration;
    use uuid::Uuid;

    async fn create_test_store() -> (PunishmentStore, WriteQueue) {
        let writes = memory_writes().await;
        (PunishmentStore::new(writes.clone()), writes)
    }

    fn player() -> Subject {
        Subject::Player(Uuid::new_v4())
    }

    fn punishment(kind: PunishmentType, subject: Subject, expiration: Expiration) -> Punishment {
        Punishment::new(kind, subject, Operator::Console, "testing", expiration)
    }

    fn row(p: &Punishment) -> SqlRow {
        SqlRow::new(vec![
            ("type", SqlValue::from(p.kind.as_str())),
            ("subject", SqlValue::Text(p.subject.to_string())),
            ("operator", SqlValue::Text(p.operator.to_string())),
            ("reason", SqlValue::Text(p.reason.clone())),
            ("expiration", SqlValue::Int(p.expiration.to_millis())),
            ("date", SqlValue::Int(p.id.0)),
        ])
    }

    #[tokio::test]
    async fn test_conflicting_ban_is_rejected() {
        let (store, _writes) = create_test_store().await;
        let subject = player();

        let first = punishment(PunishmentType::Ban, subject, Expiration::Permanent);
        store.add_punishment(first.clone()).unwrap();
        assert!(store.has_punishment(&subject, PunishmentType::Ban));

        let err = store
            .add_punishment(punishment(PunishmentType::Ban, subject, Expiration::Permanent))
            .unwrap_err();
        assert_eq!(err.conflicting(), Some(&first));

        assert_eq!(store.get_punishments(&subject, PunishmentType::Ban), vec![first]);
        assert_eq!(store.history_count(), 1);
    }

    #[tokio::test]
    async fn test_warns_are_history_only() {
        let (store, _writes) = create_test_store().await;
        let subject = player();

        store
            .add_punishment(punishment(PunishmentType::Warn, subject, Expiration::Permanent))
            .unwrap();
        store
            .add_punishment(punishment(PunishmentType::Warn, subject, Expiration::Permanent))
            .unwrap();

        assert_eq!(store.active_count(), 0);
        assert_eq!(store.get_punishments(&subject, PunishmentType::Warn).len(), 2);
        assert!(store.has_punishment(&subject, PunishmentType::Warn));
        assert_eq!(store.remove_punishment(&subject, PunishmentType::Warn), 0);
    }

    #[tokio::test]
    async fn test_expired_punishment_is_rejected() {
        let (store, _writes) = create_test_store().await;
        let past = Expiration::At(Utc::now() - Duration::seconds(1));

        let err = store
            .add_punishment(punishment(PunishmentType::Mute, player(), past))
            .unwrap_err();
        assert!(matches!(err, BansError::InvalidInput(_)));
        assert_eq!(store.history_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_keeps_history_and_persists() {
        let (store, writes) = create_test_store().await;
        let subject = player();
        let ban = punishment(PunishmentType::Ban, subject, Expiration::Permanent);

        store.add_punishment(ban.clone()).unwrap();
        store
            .add_punishment(punishment(PunishmentType::Mute, subject, Expiration::Permanent))
            .unwrap();

        assert_eq!(store.remove_punishment(&subject, PunishmentType::Ban), 1);
        assert!(!store.has_punishment(&subject, PunishmentType::Ban));
        assert!(store.has_punishment(&subject, PunishmentType::Mute));
        assert_eq!(store.get_history(&subject).len(), 2);
        assert_eq!(store.get(ban.id), Some(ban));

        writes.executor().drain().await;
        let active = select_all(&writes, Query::SelectAllActive).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].get_text("type").unwrap(), "MUTE");
        assert_eq!(select_all(&writes, Query::SelectAllHistory).await.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (store, writes) = create_test_store().await;
        let subject = player();
        let now = Utc::now();
        let ban = punishment(PunishmentType::Ban, subject, Expiration::At(now + Duration::seconds(10)));

        store.add_punishment(ban.clone()).unwrap();
        store
            .add_punishment(punishment(PunishmentType::Mute, subject, Expiration::Permanent))
            .unwrap();

        assert!(store.refresh_active_at(now).is_empty());

        let later = now + Duration::seconds(11);
        assert_eq!(store.refresh_active_at(later), vec![ban.clone()]);
        assert!(store.refresh_active_at(later).is_empty());

        assert!(!store.has_punishment(&subject, PunishmentType::Ban));
        let history = store.get_history(&subject);
        assert_eq!(history.iter().filter(|p| p.id == ban.id).count(), 1);
        assert_eq!(store.get(ban.id).unwrap().reason, "testing");

        writes.executor().drain().await;
        assert_eq!(select_all(&writes, Query::SelectAllActive).await.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let (store, _writes) = create_test_store().await;
        let subject = player();

        store
            .add_punishments(vec![
                punishment(PunishmentType::Ban, subject, Expiration::Permanent),
                punishment(PunishmentType::Mute, subject, Expiration::Permanent),
            ])
            .unwrap();
        assert_eq!(store.active_count(), 2);

        let other = player();
        let first = punishment(PunishmentType::Ban, other, Expiration::Permanent);
        let err = store
            .add_punishments(vec![
                first.clone(),
                punishment(PunishmentType::Warn, other, Expiration::Permanent),
                punishment(PunishmentType::Ban, other, Expiration::Permanent),
            ])
            .unwrap_err();

        assert_eq!(err.conflicting(), Some(&first));
        assert!(!store.has_punishment(&other, PunishmentType::Ban));
        assert!(store.get_history(&other).is_empty());
        assert_eq!(store.history_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_conflicting_with_active_applies_nothing() {
        let (store, _writes) = create_test_store().await;
        let subject = player();
        let existing = punishment(PunishmentType::Mute, subject, Expiration::Permanent);
        store.add_punishment(existing.clone()).unwrap();

        let err = store
            .add_punishments(vec![
                punishment(PunishmentType::Ban, subject, Expiration::Permanent),
                punishment(PunishmentType::Mute, subject, Expiration::Permanent),
            ])
            .unwrap_err();

        assert_eq!(err.conflicting(), Some(&existing));
        assert!(!store.has_punishment(&subject, PunishmentType::Ban));
    }

    #[tokio::test]
    async fn test_load_active_skips_expired_rows() {
        let (store, writes) = create_test_store().await;
        let now = Utc::now();

        let live = punishment(PunishmentType::Ban, player(), Expiration::Permanent);
        let timed = punishment(PunishmentType::Mute, player(), Expiration::At(now + Duration::hours(1)));
        let dead = punishment(PunishmentType::Ban, player(), Expiration::At(now - Duration::hours(1)));
        let garbage = SqlRow::new(vec![("type", SqlValue::from("JAIL"))]);

        let rows = vec![row(&live), row(&timed), row(&dead), garbage];
        assert_eq!(store.load_active_at(&rows, now), 2);

        let mut loaded = store.get_all_punishments(PunishmentType::Ban);
        loaded.extend(store.get_all_punishments(PunishmentType::Mute));
        loaded.sort_by_key(|p| p.id);
        let mut expected = vec![live, timed];
        expected.sort_by_key(|p| p.id);
        assert_eq!(loaded, expected);

        writes.executor().drain().await;
    }

    #[tokio::test]
    async fn test_load_drops_superseded_active_row() {
        let (store, writes) = create_test_store().await;
        let subject = player();

        // Stored earlier, not yet loaded when a new ban arrives
        let stored = punishment(PunishmentType::Ban, subject, Expiration::Permanent);
        writes
            .backend()
            .execute(&[
                SqlQuery::new(Query::InsertActive, stored.insert_params()),
                SqlQuery::new(Query::InsertHistory, stored.insert_params()),
            ])
            .await
            .unwrap();
        let fresh = punishment(PunishmentType::Ban, subject, Expiration::Permanent);
        store.add_punishment(fresh.clone()).unwrap();
        writes.executor().drain().await;

        let rows = select_all(&writes, Query::SelectAllActive).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(store.load_active(&rows), 0);
        assert_eq!(store.get_punishments(&subject, PunishmentType::Ban), vec![fresh.clone()]);

        // Loading the same rows again changes nothing
        store.load_active(&[row(&fresh)]);

        writes.executor().drain().await;
        let rows = select_all(&writes, Query::SelectAllActive).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("date").unwrap(), fresh.id.0);

        // Lifting the ban now leaves nothing behind to resurrect it
        assert_eq!(store.remove_punishment(&subject, PunishmentType::Ban), 1);
        writes.executor().drain().await;
        assert!(select_all(&writes, Query::SelectAllActive).await.is_empty());
    }

    #[tokio::test]
    async fn test_sub_millisecond_expiration_survives_reload() {
        let (store, writes) = create_test_store().await;
        let subject = player();

        let mut mute = punishment(PunishmentType::Mute, subject, Expiration::Permanent);
        mute.expiration = Expiration::At(Utc::now() + Duration::hours(1) + Duration::nanoseconds(417_003));
        store.add_punishment(mute.clone()).unwrap();

        let held = store.get_punishments(&subject, PunishmentType::Mute).remove(0);
        assert_eq!(held.expiration, mute.expiration.truncated());

        writes.executor().drain().await;
        let rows = select_all(&writes, Query::SelectAllActive).await;
        let reloaded = PunishmentStore::new(writes.clone());
        assert_eq!(reloaded.load_active(&rows), 1);
        assert_eq!(reloaded.get_punishments(&subject, PunishmentType::Mute), vec![held]);
    }

    #[tokio::test]
    async fn test_load_advances_id_sequence() {
        let (store, _writes) = create_test_store().await;
        let mut future = punishment(PunishmentType::Warn, player(), Expiration::Permanent);
        future.id = PunishmentId(Utc::now().timestamp_millis() + 3_600_000);

        assert_eq!(store.load_history(&[row(&future)]), 1);
        assert!(PunishmentId::next() > future.id);
    }

    #[tokio::test]
    async fn test_edit_reason_replaces_both_copies() {
        let (store, writes) = create_test_store().await;
        let subject = player();
        let ban = punishment(PunishmentType::Ban, subject, Expiration::Permanent);
        store.add_punishment(ban.clone()).unwrap();

        let before = store.get_punishments(&subject, PunishmentType::Ban);
        store.edit_reason(ban.id, "appeal denied").unwrap();

        // Values handed out earlier are untouched
        assert_eq!(before[0].reason, "testing");
        assert_eq!(
            store.get_punishments(&subject, PunishmentType::Ban)[0].reason,
            "appeal denied"
        );
        assert_eq!(store.get(ban.id).unwrap().reason, "appeal denied");

        let err = store.edit_reason(PunishmentId(1), "nope").unwrap_err();
        assert!(matches!(err, BansError::NotFound(_)));

        writes.executor().drain().await;
        let history = select_all(&writes, Query::SelectAllHistory).await;
        assert_eq!(history[0].get_text("reason").unwrap(), "appeal denied");
    }

    #[tokio::test]
    async fn test_concurrent_adds_admit_one_ban() {
        let (store, _writes) = create_test_store().await;
        let store = Arc::new(store);
        let subject = player();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .add_punishment(punishment(PunishmentType::Ban, subject, Expiration::Permanent))
                        .is_ok()
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.get_punishments(&subject, PunishmentType::Ban).len(), 1);
    }
}
