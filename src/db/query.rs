//! Dialect-neutral statements, parameters and rows
use crate::{
    db::Dialect,
    error::{BansError, BansResult},
};
use sqlx::{any::AnyRow, Column, Row};

/// Every statement the engine issues against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    CreateTableActive,
    CreateTableHistory,
    CreateTableCache,
    InsertActive,
    InsertHistory,
    InsertCache,
    DeleteActiveByDate,
    DeleteExpiredActive,
    UpdateActiveReasonByDate,
    UpdateHistoryReasonByDate,
    UpdateNameForUuid,
    UpdateIpsForUuid,
    SelectAllActive,
    SelectAllHistory,
    SelectAllCached,
    Ping,
}

impl Query {
    /// SQL text for a dialect, with `?` placeholders rendered as `$n` for Postgres
    pub fn eval(&self, dialect: Dialect) -> String {
        let sql = match (self, dialect) {
            (Query::CreateTableActive, _) => punishment_table("Active", dialect),
            (Query::CreateTableHistory, _) => punishment_table("History", dialect),
            (Query::CreateTableCache, Dialect::Sqlite) => CACHE_TABLE
                .replace("{id}", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            (Query::CreateTableCache, Dialect::Postgres) => {
                CACHE_TABLE.replace("{id}", "BIGSERIAL PRIMARY KEY")
            }
            (Query::InsertActive, _) => insert_punishment("Active"),
            (Query::InsertHistory, _) => insert_punishment("History"),
            (Query::InsertCache, _) => "INSERT INTO Cache \
                (uuid, name, iplist, update_name, update_iplist) VALUES (?, ?, ?, ?, ?)"
                .to_string(),
            (Query::DeleteActiveByDate, _) => "DELETE FROM Active WHERE date = ?".to_string(),
            (Query::DeleteExpiredActive, _) => {
                "DELETE FROM Active WHERE expiration <= ? AND expiration != -1".to_string()
            }
            (Query::UpdateActiveReasonByDate, _) => {
                "UPDATE Active SET reason = ? WHERE date = ?".to_string()
            }
            (Query::UpdateHistoryReasonByDate, _) => {
                "UPDATE History SET reason = ? WHERE date = ?".to_string()
            }
            (Query::UpdateNameForUuid, _) => {
                "UPDATE Cache SET name = ?, update_name = ? WHERE uuid = ?".to_string()
            }
            (Query::UpdateIpsForUuid, _) => {
                "UPDATE Cache SET iplist = ?, update_iplist = ? WHERE uuid = ?".to_string()
            }
            (Query::SelectAllActive, _) => select_punishments("Active"),
            (Query::SelectAllHistory, _) => select_punishments("History"),
            (Query::SelectAllCached, _) => {
                "SELECT uuid, name, iplist, update_name, update_iplist FROM Cache".to_string()
            }
            (Query::Ping, _) => "SELECT 1".to_string(),
        };

        match dialect {
            Dialect::Sqlite => sql,
            Dialect::Postgres => number_placeholders(&sql),
        }
    }
}

const CACHE_TABLE: &str = "CREATE TABLE IF NOT EXISTS Cache (\
    id {id}, \
    uuid VARCHAR(36) NOT NULL, \
    name VARCHAR(16) NOT NULL, \
    iplist TEXT NOT NULL, \
    update_name BIGINT NOT NULL, \
    update_iplist BIGINT NOT NULL)";

fn punishment_table(table: &str, dialect: Dialect) -> String {
    let id = match dialect {
        Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id {id}, \
         type VARCHAR(31) NOT NULL, \
         subject VARCHAR(49) NOT NULL, \
         operator VARCHAR(49) NOT NULL, \
         reason VARCHAR(255) NOT NULL, \
         expiration BIGINT NOT NULL, \
         date BIGINT NOT NULL)"
    )
}

fn insert_punishment(table: &str) -> String {
    format!(
        "INSERT INTO {table} (type, subject, operator, reason, expiration, date) \
         VALUES (?, ?, ?, ?, ?, ?)"
    )
}

fn select_punishments(table: &str) -> String {
    format!("SELECT id, type, subject, operator, reason, expiration, date FROM {table}")
}

fn number_placeholders(sql: &str) -> String {
    let mut rendered = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    for c in sql.chars() {
        if c == '?' {
            index += 1;
            rendered.push('$');
            rendered.push_str(&index.to_string());
        } else {
            rendered.push(c);
        }
    }
    rendered
}

/// A typed positional parameter or column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// A statement with its bound parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub query: Query,
    pub params: Vec<SqlValue>,
}

impl SqlQuery {
    pub fn new(query: Query, params: Vec<SqlValue>) -> Self {
        Self { query, params }
    }

    /// A statement without parameters
    pub fn plain(query: Query) -> Self {
        Self::new(query, Vec::new())
    }
}

/// One row of a result set, detached from the driver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<(&str, SqlValue)>) -> Self {
        let (columns, values) = columns
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .unzip();
        Self { columns, values }
    }

    pub(crate) fn from_any(row: &AnyRow) -> Result<Self, sqlx::Error> {
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());

        for (index, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_lowercase());
            values.push(decode_value(row, index)?);
        }

        Ok(Self { columns, values })
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .map(|index| &self.values[index])
    }

    pub fn get_i64(&self, column: &str) -> BansResult<i64> {
        match self.get(column) {
            Some(SqlValue::Int(value)) => Ok(*value),
            Some(SqlValue::Text(text)) => text.trim().parse().map_err(|_| {
                BansError::InvalidInput(format!("Column {} is not an integer: {}", column, text))
            }),
            _ => Err(BansError::InvalidInput(format!("Missing integer column {}", column))),
        }
    }

    pub fn get_text(&self, column: &str) -> BansResult<&str> {
        match self.get(column) {
            Some(SqlValue::Text(text)) => Ok(text),
            _ => Err(BansError::InvalidInput(format!("Missing text column {}", column))),
        }
    }
}

fn decode_value(row: &AnyRow, index: usize) -> Result<SqlValue, sqlx::Error> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map_or(SqlValue::Null, SqlValue::Int));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))));
    }
    row.try_get::<Option<String>, _>(index)
        .map(|value| value.map_or(SqlValue::Null, SqlValue::Text))
}
