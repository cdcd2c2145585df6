//! Durable alert store + feed HTTP fetch utilities.
//!
//! The store holds one row per alert id for the lifetime of the
//! deployment. Novelty checks and inserts are separate calls under a
//! single sequential writer; the table's primary key is the final
//! arbiter when overlapping processes race on the same id.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use railwatch_core::Alert;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "railwatch-store";

// ---- store contract ----

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("alert `{alert_id}` already recorded")]
    DuplicateKey { alert_id: String },
}

impl StoreError {
    fn from_insert(err: sqlx::Error, alert_id: &str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::DuplicateKey {
                    alert_id: alert_id.to_string(),
                };
            }
        }
        StoreError::Unavailable(err)
    }
}

/// Persistence backend for canonical alerts.
///
/// `is_known` is authoritative on every call; implementations do not
/// cache existence across calls. Errors propagate: an unreachable store
/// must never be read as "alert not known".
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Creates the backing table when absent. Idempotent.
    async fn ensure_table(&self) -> Result<(), StoreError>;

    /// Exact-match existence check on the alert id.
    async fn is_known(&self, alert_id: &str) -> Result<bool, StoreError>;

    /// Writes one row for the alert, stamping the insertion time with the
    /// store's own clock in its configured civil timezone.
    async fn insert(&self, alert: &Alert) -> Result<(), StoreError>;
}

// ---- Postgres implementation ----

#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: PgPool,
    table: String,
    timezone: String,
}

impl PgAlertStore {
    pub fn new(pool: PgPool, table: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            timezone: timezone.into(),
        }
    }

    pub async fn connect(
        database_url: &str,
        table: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(Self::new(pool, table, timezone))
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             alert_id TEXT PRIMARY KEY, \
             url TEXT NOT NULL, \
             title TEXT NOT NULL, \
             description_html TEXT NOT NULL, \
             start_date TEXT NOT NULL, \
             end_date TEXT NOT NULL, \
             l1_line_impacted BOOLEAN NOT NULL, \
             creation_date TIMESTAMP NOT NULL)",
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        debug!(table = %self.table, "alert table ready");
        Ok(())
    }

    async fn is_known(&self, alert_id: &str) -> Result<bool, StoreError> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE alert_id = $1)",
            self.table
        );
        let (exists,): (bool,) = sqlx::query_as(&query)
            .bind(alert_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        if exists {
            debug!(alert_id, "alert already recorded");
        }
        Ok(exists)
    }

    async fn insert(&self, alert: &Alert) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} \
             (alert_id, url, title, description_html, start_date, end_date, \
              l1_line_impacted, creation_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now() AT TIME ZONE $8)",
            self.table
        );
        sqlx::query(&query)
            .bind(&alert.id)
            .bind(&alert.url)
            .bind(&alert.title)
            .bind(&alert.description_html)
            .bind(alert.start_date.column_value())
            .bind(alert.end_date.column_value())
            .bind(alert.line_impacted)
            .bind(&self.timezone)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::from_insert(err, &alert.id))?;
        info!(alert_id = %alert.id, "alert recorded");
        Ok(())
    }
}

// ---- in-memory implementation ----

/// A stored row as the in-memory store keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAlert {
    pub alert: Alert,
    pub creation_date: NaiveDateTime,
}

/// In-memory [`AlertStore`] honoring the same contract as the Postgres
/// one, including the duplicate-key rejection. Backs pipeline tests and
/// offline dry runs; stamps `creation_date` with the process clock.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    rows: Mutex<BTreeMap<String, StoredAlert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn get(&self, alert_id: &str) -> Option<StoredAlert> {
        self.rows.lock().await.get(alert_id).cloned()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn is_known(&self, alert_id: &str) -> Result<bool, StoreError> {
        Ok(self.rows.lock().await.contains_key(alert_id))
    }

    async fn insert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&alert.id) {
            return Err(StoreError::DuplicateKey {
                alert_id: alert.id.clone(),
            });
        }
        rows.insert(
            alert.id.clone(),
            StoredAlert {
                alert: alert.clone(),
                creation_date: Utc::now().naive_utc(),
            },
        );
        Ok(())
    }
}

// ---- feed HTTP fetch utilities ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub api_key: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Authenticated JSON fetcher for the transit authority's endpoints.
///
/// Sends the `Authorization: apikey <key>` header and retries transient
/// failures (5xx, 429, timeouts, connect errors) with capped exponential
/// backoff. Fetches are strictly one at a time; the caller drives them
/// sequentially.
#[derive(Debug)]
pub struct FeedClient {
    client: reqwest::Client,
    api_key: String,
    backoff: BackoffPolicy,
}

impl FeedClient {
    pub fn new(config: FeedClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            api_key: config.api_key,
            backoff: config.backoff,
        })
    }

    /// Fetches `url` with the given query parameters and deserializes the
    /// JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let resp_result = self
                .client
                .get(url)
                .header("Authorization", format!("apikey {}", self.api_key))
                .query(query)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.json::<T>().await?);
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(%status, url = %final_url, attempt, "retrying feed fetch");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying feed fetch");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railwatch_core::PeriodBound;

    fn sample_alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            url: "https://example.test/alerts/1".to_string(),
            title: "Service change".to_string(),
            description_html: "<p>Buses replace trams</p>".to_string(),
            start_date: PeriodBound::from_epoch_secs(1_700_000_000),
            end_date: PeriodBound::Unknown,
            line_impacted: true,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_reports_novelty() {
        let store = MemoryAlertStore::new();
        store.ensure_table().await.expect("ensure");

        assert!(!store.is_known("42").await.expect("check"));
        store.insert(&sample_alert("42")).await.expect("insert");
        assert!(store.is_known("42").await.expect("check"));

        let row = store.get("42").await.expect("row present");
        assert_eq!(row.alert.id, "42");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_ids() {
        let store = MemoryAlertStore::new();
        store.insert(&sample_alert("42")).await.expect("insert");

        let err = store.insert(&sample_alert("42")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { alert_id } if alert_id == "42"));
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn status_classification_retries_server_side_failures() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }
}
