//! Punishment model and in-memory punishment store
//!
//! Subjects, operators and punishment values, plus their mapping to and from
//! rows of the `Active` and `History` tables.

pub mod store;

pub use store::PunishmentStore;

use crate::{
    db::{SqlRow, SqlValue},
    error::{BansError, BansResult},
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Stored value of a permanent expiration
pub const PERMANENT: i64 = -1;

/// Stored value of the console operator
const CONSOLE: &str = "console";

/// Target of a punishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Player(Uuid),
    Address(IpAddr),
}

impl Subject {
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            Subject::Player(uuid) => Some(*uuid),
            Subject::Address(_) => None,
        }
    }

    pub fn address(&self) -> Option<IpAddr> {
        match self {
            Subject::Player(_) => None,
            Subject::Address(ip) => Some(*ip),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Player(uuid) => write!(f, "{}", uuid.hyphenated()),
            Subject::Address(ip) => write!(f, "{}", ip),
        }
    }
}

impl FromStr for Subject {
    type Err = BansError;

    /// Parses the stored form: an IP literal or a UUID, never a player name
    fn from_str(s: &str) -> BansResult<Self> {
        let s = s.trim();
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Subject::Address(ip));
        }
        Uuid::parse_str(s)
            .map(Subject::Player)
            .map_err(|_| BansError::InvalidInput(format!("Not a UUID or IP address: {}", s)))
    }
}

/// Issuer of a punishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Console,
    Subject(Subject),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Console => f.write_str(CONSOLE),
            Operator::Subject(subject) => write!(f, "{}", subject),
        }
    }
}

impl FromStr for Operator {
    type Err = BansError;

    fn from_str(s: &str) -> BansResult<Self> {
        if s.eq_ignore_ascii_case(CONSOLE) {
            Ok(Operator::Console)
        } else {
            s.parse().map(Operator::Subject)
        }
    }
}

/// Punishment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PunishmentType {
    Ban,
    Mute,
    Warn,
    Kick,
}

impl PunishmentType {
    pub const ALL: [PunishmentType; 4] = [Self::Ban, Self::Mute, Self::Warn, Self::Kick];

    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentType::Ban => "BAN",
            PunishmentType::Mute => "MUTE",
            PunishmentType::Warn => "WARN",
            PunishmentType::Kick => "KICK",
        }
    }

    /// At most one active punishment of an exclusive type may exist per subject
    pub fn is_exclusive(&self) -> bool {
        matches!(self, PunishmentType::Ban | PunishmentType::Mute)
    }
}

impl fmt::Display for PunishmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunishmentType {
    type Err = BansError;

    fn from_str(s: &str) -> BansResult<Self> {
        match s.to_uppercase().as_str() {
            "BAN" => Ok(PunishmentType::Ban),
            "MUTE" => Ok(PunishmentType::Mute),
            "WARN" => Ok(PunishmentType::Warn),
            "KICK" => Ok(PunishmentType::Kick),
            _ => Err(BansError::InvalidInput(format!("Invalid punishment type: {}", s))),
        }
    }
}

/// When a punishment stops being in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiration {
    Permanent,
    At(DateTime<Utc>),
}

impl Expiration {
    /// Expire at `instant`, truncated to the stored millisecond precision
    pub fn at(instant: DateTime<Utc>) -> Self {
        Expiration::At(instant.trunc_subsecs(3))
    }

    /// Same expiration at the stored millisecond precision
    pub fn truncated(self) -> Self {
        match self {
            Expiration::Permanent => Expiration::Permanent,
            Expiration::At(at) => Expiration::at(at),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Expiration::Permanent)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiration::Permanent => false,
            Expiration::At(at) => *at <= now,
        }
    }

    pub fn to_millis(&self) -> i64 {
        match self {
            Expiration::Permanent => PERMANENT,
            Expiration::At(at) => at.timestamp_millis(),
        }
    }

    pub fn from_millis(millis: i64) -> BansResult<Self> {
        if millis == PERMANENT {
            return Ok(Expiration::Permanent);
        }
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Expiration::At)
            .ok_or_else(|| BansError::InvalidInput(format!("Invalid expiration: {}", millis)))
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiration::Permanent => f.write_str("permanent"),
            Expiration::At(at) => write!(f, "until {}", at.to_rfc3339()),
        }
    }
}

/// Last id handed out; ids are epoch milliseconds bumped past any collision
static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Correlation key of a punishment, persisted as the `date` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PunishmentId(pub i64);

impl PunishmentId {
    /// Assign the next id: the current time in milliseconds, or one past the last id
    pub fn next() -> Self {
        Self::next_after(Utc::now().timestamp_millis())
    }

    fn next_after(now_millis: i64) -> Self {
        let mut last = LAST_ID.load(Ordering::Acquire);
        loop {
            let candidate = now_millis.max(last + 1);
            match LAST_ID.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Self(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Make sure ids issued later never collide with one loaded from storage
    pub fn observe(id: PunishmentId) {
        LAST_ID.fetch_max(id.0, Ordering::AcqRel);
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

impl fmt::Display for PunishmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An issued punishment
///
/// Values are never mutated in place once stored; a reason edit replaces the
/// stored value with a copy from [`Punishment::with_reason`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub id: PunishmentId,
    pub kind: PunishmentType,
    pub subject: Subject,
    pub operator: Operator,
    pub reason: String,
    pub expiration: Expiration,
}

impl Punishment {
    /// Issue a new punishment with a freshly assigned id
    ///
    /// The expiration is truncated to milliseconds, the precision it is stored at.
    pub fn new(
        kind: PunishmentType,
        subject: Subject,
        operator: Operator,
        reason: impl Into<String>,
        expiration: Expiration,
    ) -> Self {
        Self {
            id: PunishmentId::next(),
            kind,
            subject,
            operator,
            reason: reason.into(),
            expiration: expiration.truncated(),
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.id.issued_at()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_expired_at(now)
    }

    /// Copy of this punishment carrying a different reason
    pub fn with_reason(&self, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..self.clone()
        }
    }

    /// Parameters of `INSERT INTO Active/History`, in column order
    pub(crate) fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.kind.as_str()),
            SqlValue::Text(self.subject.to_string()),
            SqlValue::Text(self.operator.to_string()),
            SqlValue::Text(self.reason.clone()),
            SqlValue::Int(self.expiration.to_millis()),
            SqlValue::Int(self.id.0),
        ]
    }

    /// Build a punishment from a row of `Active` or `History`
    pub fn from_row(row: &SqlRow) -> BansResult<Self> {
        let id = PunishmentId(row.get_i64("date")?);
        PunishmentId::observe(id);

        Ok(Self {
            id,
            kind: row.get_text("type")?.parse()?,
            subject: row.get_text("subject")?.parse()?,
            operator: row.get_text("operator")?.parse()?,
            reason: row.get_text("reason")?.to_string(),
            expiration: Expiration::from_millis(row.get_i64("expiration")?)?,
        })
    }
}

impl fmt::Display for Punishment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {} by {} ({}, {})",
            self.kind, self.id, self.subject, self.operator, self.reason, self.expiration
        )
    }
}
