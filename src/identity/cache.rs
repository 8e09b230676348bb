//! Identity cache - in-memory resolver of UUIDs, names and addresses
//!
//! Memory is updated first and is what lookups read; every change is then
//! written through to the `Cache` table on the write queue.

use crate::{
    db::{Query, SqlQuery, SqlRow, SqlValue, WriteQueue},
    error::BansResult,
    identity::{IdentityQuery, IdentityRecord, PlayerProfile},
    platform::Platform,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity cache manager
pub struct IdentityCache {
    records: DashMap<Uuid, IdentityRecord>,
    /// Lowercased name -> uuid of the player who last used it
    names: DashMap<String, Uuid>,
    addresses: DashMap<IpAddr, HashSet<Uuid>>,
    writes: WriteQueue,
    platform: Arc<dyn Platform>,
    /// Age after which a cached name is re-checked with the authority
    stale_after: Duration,
}

impl IdentityCache {
    pub fn new(writes: WriteQueue, platform: Arc<dyn Platform>, stale_after: Duration) -> Self {
        Self {
            records: DashMap::new(),
            names: DashMap::new(),
            addresses: DashMap::new(),
            writes,
            platform,
            stale_after,
        }
    }

    /// UUID last seen with `name`, from memory only
    pub fn resolve_uuid(&self, name: &str) -> Option<Uuid> {
        self.names.get(&name.to_lowercase()).map(|uuid| *uuid)
    }

    /// Last known name of `uuid`, from memory only
    pub fn resolve_name(&self, uuid: Uuid) -> Option<String> {
        self.records.get(&uuid).map(|record| record.name.clone())
    }

    pub fn record(&self, uuid: Uuid) -> Option<IdentityRecord> {
        self.records.get(&uuid).map(|record| record.clone())
    }

    /// Players known to have connected from `address`
    pub fn uuids_for_address(&self, address: IpAddr) -> Vec<Uuid> {
        self.addresses
            .get(&address)
            .map(|uuids| uuids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a player connection; returns whether anything changed
    pub fn update(&self, uuid: Uuid, name: &str, ips: &[IpAddr]) -> bool {
        self.update_at(uuid, name, ips, Utc::now())
    }

    pub fn update_at(&self, uuid: Uuid, name: &str, ips: &[IpAddr], now: DateTime<Utc>) -> bool {
        self.merge(uuid, Some(name), ips, now, false)
    }

    /// Resolve a name or UUID, asking the platform authority when the cached
    /// record is missing or older than the staleness threshold
    pub async fn resolve_authoritative(&self, query: &IdentityQuery) -> BansResult<PlayerProfile> {
        let cached = match query {
            IdentityQuery::Name(name) => self.resolve_uuid(name).and_then(|uuid| self.record(uuid)),
            IdentityQuery::Uuid(uuid) => self.record(*uuid),
        };

        if let Some(record) = &cached {
            if Utc::now() - record.name_updated < self.stale_after {
                return Ok(record.profile());
            }
        }

        match self.platform.lookup_identity(query.clone()).await {
            Ok(profile) => {
                debug!(%query, uuid = %profile.uuid, name = %profile.name, "Identity confirmed by authority");
                self.merge(profile.uuid, Some(&profile.name), &[], Utc::now(), true);
                Ok(profile)
            }
            Err(e) => match cached {
                Some(record) => {
                    warn!(%query, error = %e, "Identity authority failed, using stale cache entry");
                    Ok(record.profile())
                }
                None => Err(e),
            },
        }
    }

    pub async fn resolve_uuid_authoritative(&self, name: &str) -> BansResult<Uuid> {
        self.resolve_authoritative(&IdentityQuery::Name(name.to_string()))
            .await
            .map(|profile| profile.uuid)
    }

    pub async fn resolve_name_authoritative(&self, uuid: Uuid) -> BansResult<String> {
        self.resolve_authoritative(&IdentityQuery::Uuid(uuid))
            .await
            .map(|profile| profile.name)
    }

    /// Merge observed values into the record for `uuid`
    ///
    /// Only the changed field's timestamp moves; `confirm_name` also refreshes
    /// the name timestamp when the name is unchanged.
    fn merge(
        &self,
        uuid: Uuid,
        name: Option<&str>,
        ips: &[IpAddr],
        now: DateTime<Utc>,
        confirm_name: bool,
    ) -> bool {
        let mut queries = Vec::new();
        let key = uuid.hyphenated().to_string();

        match self.records.entry(uuid) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();

                if let Some(name) = name {
                    if record.name != name {
                        let previous = std::mem::replace(&mut record.name, name.to_string());
                        record.name_updated = now;
                        self.names
                            .remove_if(&previous.to_lowercase(), |_, owner| *owner == uuid);
                        self.names.insert(name.to_lowercase(), uuid);
                        queries.push(update_name(record, &key));
                    } else if confirm_name {
                        record.name_updated = now;
                        queries.push(update_name(record, &key));
                    }
                }

                let known = record.ips.len();
                record.ips.extend(ips.iter().copied());
                if record.ips.len() != known {
                    record.ips_updated = now;
                    self.index_addresses(uuid, ips);
                    queries.push(update_ips(record, &key));
                }
            }
            Entry::Vacant(entry) => {
                let Some(name) = name else {
                    return false;
                };
                let record = IdentityRecord::new(uuid, name, ips.iter().copied(), now);
                self.names.insert(name.to_lowercase(), uuid);
                self.index_addresses(uuid, ips);
                queries.push(SqlQuery::new(Query::InsertCache, record.insert_params()));
                entry.insert(record);
                debug!(%uuid, name, "Cached new player identity");
            }
        }

        let changed = !queries.is_empty();
        self.writes.submit(&uuid, "identity.update", queries);
        changed
    }

    /// Bulk-populate from a snapshot of the `Cache` table
    ///
    /// Duplicate uuids keep the row with the latest combined timestamp, and a
    /// name shared by several uuids belongs to the most recent claimant. A
    /// record already in memory is only replaced by a fresher row, and keeps
    /// the addresses it had.
    pub fn load_all(&self, rows: &[SqlRow]) -> usize {
        let mut latest: HashMap<Uuid, IdentityRecord> = HashMap::with_capacity(rows.len());

        for row in rows {
            match IdentityRecord::from_row(row) {
                Ok(record) => match latest.get(&record.uuid) {
                    Some(existing) if existing.freshness() >= record.freshness() => {}
                    _ => {
                        latest.insert(record.uuid, record);
                    }
                },
                Err(e) => warn!(error = %e, "Skipping malformed identity row"),
            }
        }

        let mut records: Vec<IdentityRecord> = latest.into_values().collect();
        records.sort_by_key(|record| record.name_updated);

        let mut loaded = 0;
        for mut record in records {
            let uuid = record.uuid;
            let previous = match self.records.entry(uuid) {
                Entry::Occupied(mut entry) => {
                    let current = entry.get();
                    if current.freshness() >= record.freshness() {
                        debug!(%uuid, "Keeping identity updated during load");
                        continue;
                    }

                    let known = record.ips.len();
                    record.ips.extend(current.ips.iter().copied());
                    if record.ips.len() != known {
                        record.ips_updated = record.ips_updated.max(current.ips_updated);
                        let key = uuid.hyphenated().to_string();
                        self.writes
                            .submit(&uuid, "identity.update", vec![update_ips(&record, &key)]);
                    }
                    Some(entry.insert(record.clone()))
                }
                Entry::Vacant(entry) => {
                    entry.insert(record.clone());
                    None
                }
            };

            if let Some(previous) = previous {
                if previous.name.to_lowercase() != record.name.to_lowercase() {
                    self.names
                        .remove_if(&previous.name.to_lowercase(), |_, owner| *owner == uuid);
                }
            }
            self.claim_name(&record);
            self.index_addresses(uuid, record.ips.iter());
            loaded += 1;
        }

        info!(loaded, rows = rows.len(), "Loaded player identities");
        loaded
    }

    /// Point `record.name` at its uuid unless a newer claim already holds it
    fn claim_name(&self, record: &IdentityRecord) {
        let key = record.name.to_lowercase();
        let owner = self.names.get(&key).map(|owner| *owner);

        let newer = match owner {
            Some(owner) if owner != record.uuid => self.records.get(&owner).map_or(true, |other| {
                other.name.to_lowercase() != key || other.name_updated <= record.name_updated
            }),
            _ => true,
        };
        if newer {
            self.names.insert(key, record.uuid);
        }
    }

    fn index_addresses<'a>(&self, uuid: Uuid, ips: impl IntoIterator<Item = &'a IpAddr>) {
        for ip in ips {
            self.addresses.entry(*ip).or_default().insert(uuid);
        }
    }
}

fn update_ips(record: &IdentityRecord, key: &str) -> SqlQuery {
    SqlQuery::new(
        Query::UpdateIpsForUuid,
        vec![
            SqlValue::Text(record.iplist()),
            SqlValue::Int(record.ips_updated.timestamp_millis()),
            SqlValue::Text(key.to_string()),
        ],
    )
}

fn update_name(record: &IdentityRecord, key: &str) -> SqlQuery {
    SqlQuery::new(
        Query::UpdateNameForUuid,
        vec![
            SqlValue::Text(record.name.clone()),
            SqlValue::Int(record.name_updated.timestamp_millis()),
            SqlValue::Text(key.to_string()),
        ],
    )
}
