// SQLite pool setup shared by every store.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::core::errors::{BotError, BotResult};

/// Open the pool for `DATABASE_URL`, creating the file if needed.
pub async fn connect(database_url: &str) -> BotResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            BotError::config("INVALID_DATABASE_URL", "DATABASE_URL was rejected by sqlx")
                .with_context("reason", e)
        })?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(BotError::database)
}

/// Single connection in-memory pool for tests.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort and round-trip.
pub fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_time(raw: &str) -> BotResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BotError::database(format!("bad timestamp '{}': {}", raw, e)))
}

pub fn decode_opt_time(raw: Option<String>) -> BotResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_time).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_encoding_round_trips_and_sorts() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap();
        let b = a + chrono::Duration::nanoseconds(1_500);
        assert_eq!(decode_time(&encode_time(&b)).unwrap(), b);
        assert!(encode_time(&a) < encode_time(&b));
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("shield.db").display());
        let pool = connect(&url).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(dir.path().join("shield.db").exists());
    }
}
