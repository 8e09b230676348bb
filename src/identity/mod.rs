//! Player Identity System
//!
//! Tracks the mapping of player UUID to last known name and known IP
//! addresses, backed by the `Cache` table.

pub mod cache;

pub use cache::IdentityCache;

use crate::{
    db::{SqlRow, SqlValue},
    error::{BansError, BansResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use tracing::warn;
use uuid::Uuid;

/// Separator of the stored IP list
const IP_SEPARATOR: char = ',';

/// Cached identity of one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub uuid: Uuid,
    pub name: String,
    pub ips: BTreeSet<IpAddr>,
    pub name_updated: DateTime<Utc>,
    pub ips_updated: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(
        uuid: Uuid,
        name: impl Into<String>,
        ips: impl IntoIterator<Item = IpAddr>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            ips: ips.into_iter().collect(),
            name_updated: now,
            ips_updated: now,
        }
    }

    pub fn profile(&self) -> PlayerProfile {
        PlayerProfile {
            uuid: self.uuid,
            name: self.name.clone(),
        }
    }

    /// Ordering key used to pick between duplicate rows: newest update first, then the other
    pub fn freshness(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.name_updated.max(self.ips_updated),
            self.name_updated.min(self.ips_updated),
        )
    }

    pub fn iplist(&self) -> String {
        self.ips
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(&IP_SEPARATOR.to_string())
    }

    /// Parameters of `INSERT INTO Cache`, in column order
    pub(crate) fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.uuid.hyphenated().to_string()),
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.iplist()),
            SqlValue::Int(self.name_updated.timestamp_millis()),
            SqlValue::Int(self.ips_updated.timestamp_millis()),
        ]
    }

    /// Build a record from a row of `Cache`
    pub fn from_row(row: &SqlRow) -> BansResult<Self> {
        let uuid = Uuid::parse_str(row.get_text("uuid")?.trim())
            .map_err(|e| BansError::InvalidInput(format!("Invalid cached uuid: {}", e)))?;

        let ips = row
            .get_text("iplist")?
            .split(IP_SEPARATOR)
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .filter_map(|ip| match ip.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!(%uuid, ip, "Skipping malformed cached IP address");
                    None
                }
            })
            .collect();

        Ok(Self {
            uuid,
            name: row.get_text("name")?.to_string(),
            ips,
            name_updated: parse_millis(row.get_i64("update_name")?)?,
            ips_updated: parse_millis(row.get_i64("update_iplist")?)?,
        })
    }
}

fn parse_millis(millis: i64) -> BansResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| BansError::InvalidInput(format!("Invalid timestamp: {}", millis)))
}

/// Answer of the identity authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub uuid: Uuid,
    pub name: String,
}

/// Lookup key for authoritative resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityQuery {
    Name(String),
    Uuid(Uuid),
}

impl fmt::Display for IdentityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityQuery::Name(name) => f.write_str(name),
            IdentityQuery::Uuid(uuid) => write!(f, "{}", uuid),
        }
    }
}
