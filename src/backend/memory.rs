//! In-process backend: identities, JSON tables and an insert feed.
//!
//! Mirrors the observable behavior of the hosted service closely enough to
//! drive `AuthGateway` and `NotificationChannel` end to end, and offers
//! fault injection for the degraded paths.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{ChangeFeed, Filter, IdentityProvider, Row, RowStore, Select, Subscription};
use crate::errors::AppError;
use crate::models::notification;
use crate::models::session::{Session, User};

struct StoredUser {
    user: User,
    password: Zeroizing<String>,
}

struct Inner {
    users: DashMap<String, StoredUser>,
    session: Mutex<Option<Session>>,
    tables: DashMap<String, Vec<Row>>,
    defaults: DashMap<String, Map<String, Value>>,
    failing_tables: DashMap<String, String>,
    reject_sign_in: AtomicBool,
    sign_in_latency_ms: AtomicU64,
    sign_in_calls: AtomicUsize,
    last_created: Mutex<DateTime<Utc>>,
    inserts: broadcast::Sender<(String, Row)>,
}

#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(256);
        let backend = Self {
            inner: Arc::new(Inner {
                users: DashMap::new(),
                session: Mutex::new(None),
                tables: DashMap::new(),
                defaults: DashMap::new(),
                failing_tables: DashMap::new(),
                reject_sign_in: AtomicBool::new(false),
                sign_in_latency_ms: AtomicU64::new(0),
                sign_in_calls: AtomicUsize::new(0),
                last_created: Mutex::new(DateTime::<Utc>::MIN_UTC),
                inserts,
            }),
        };

        let mut notification_defaults = Map::new();
        notification_defaults.insert("is_read".into(), Value::Bool(false));
        notification_defaults.insert("read_at".into(), Value::Null);
        notification_defaults.insert("type".into(), Value::String("info".into()));
        backend
            .inner
            .defaults
            .insert(notification::TABLE.to_string(), notification_defaults);

        backend
    }

    /// Create an identity directly, bypassing `sign_up`.
    pub fn register_user(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.users.insert(
            email.to_ascii_lowercase(),
            StoredUser {
                user: User {
                    id,
                    email: Some(email.to_string()),
                    created_at: Some(Utc::now()),
                },
                password: Zeroizing::new(password.to_string()),
            },
        );
        id
    }

    /// Insert a row as if another client had written it.
    pub fn seed(&self, table: &str, row: Row) -> Row {
        self.insert_row(table, row)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .tables
            .get(table)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Every operation on `table` fails until [`MemoryBackend::heal_table`].
    pub fn fail_table(&self, table: &str, message: &str) {
        self.inner
            .failing_tables
            .insert(table.to_string(), message.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.inner.failing_tables.remove(table);
    }

    pub fn reject_sign_in(&self, reject: bool) {
        self.inner.reject_sign_in.store(reject, Ordering::SeqCst);
    }

    pub fn set_sign_in_latency(&self, latency: Duration) {
        self.inner
            .sign_in_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn sign_in_calls(&self) -> usize {
        self.inner.sign_in_calls.load(Ordering::SeqCst)
    }

    /// Live insert subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.inserts.receiver_count()
    }

    fn check_table(&self, table: &str) -> Result<(), AppError> {
        match self.inner.failing_tables.get(table) {
            Some(message) => Err(AppError::store(table, message.value().clone())),
            None => Ok(()),
        }
    }

    /// Strictly increasing creation stamps, so newest-first ordering is total.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self
            .inner
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Utc::now();
        if now <= *last {
            now = *last + chrono::Duration::microseconds(1);
        }
        *last = now;
        now
    }

    fn insert_row(&self, table: &str, row: Row) -> Row {
        let mut object = match row {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };

        if let Some(defaults) = self.inner.defaults.get(table) {
            for (column, value) in defaults.iter() {
                if object.get(column).map_or(true, Value::is_null) {
                    object.insert(column.clone(), value.clone());
                }
            }
        }
        if object.get("id").map_or(true, Value::is_null) {
            object.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        if !object.contains_key("created_at") {
            let stamp = self
                .next_created_at()
                .to_rfc3339_opts(SecondsFormat::Micros, true);
            object.insert("created_at".into(), Value::String(stamp));
        }

        let row = Value::Object(object);
        self.inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        // No receivers is fine.
        let _ = self.inner.inserts.send((table.to_string(), row.clone()));
        row
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_credentials() -> AppError {
    AppError::Identity {
        status: Some(400),
        code: Some("invalid_credentials".into()),
        message: "Invalid login credentials".into(),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, None) | (Some(Value::Null), Some(Value::Null)) => CmpOrdering::Equal,
        // Nulls sort last, as in Postgres ascending order.
        (None, _) | (Some(Value::Null), _) => CmpOrdering::Greater,
        (_, None) | (_, Some(Value::Null)) => CmpOrdering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: &Row, columns: &str) -> Row {
    if columns.trim() == "*" {
        return row.clone();
    }
    let mut out = Map::new();
    for column in columns.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if let Some(value) = row.get(column) {
            out.insert(column.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let key = email.to_ascii_lowercase();
        if self.inner.users.contains_key(&key) {
            return Err(AppError::Identity {
                status: Some(422),
                code: Some("user_already_exists".into()),
                message: "User already registered".into(),
            });
        }
        self.register_user(email, password);
        Ok(self.inner.users.get(&key).map(|u| u.user.clone()))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError> {
        self.inner.sign_in_calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.inner.sign_in_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.inner.reject_sign_in.load(Ordering::SeqCst) {
            return Err(invalid_credentials());
        }

        let user = match self.inner.users.get(&email.to_ascii_lowercase()) {
            Some(stored) if stored.password.as_str() == password => stored.user.clone(),
            _ => return Err(invalid_credentials()),
        };

        let session = Session {
            access_token: format!("memory-{}", Uuid::new_v4()),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_in: Some(3600),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user,
        };
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<Option<Session>, AppError> {
        Ok(self
            .inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn user(&self) -> Result<Option<User>, AppError> {
        Ok(self.session().await?.map(|s| s.user))
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[async_trait]
impl RowStore for MemoryBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, AppError> {
        self.check_table(&query.table)?;

        let mut rows: Vec<Row> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows.iter().map(|row| project(row, &query.columns)).collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, AppError> {
        self.check_table(table)?;
        Ok(self.insert_row(table, row))
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<(), AppError> {
        self.check_table(table)?;

        let Value::Object(patch) = patch else {
            return Err(AppError::store(table, "update patch must be a JSON object"));
        };
        if let Some(mut rows) = self.inner.tables.get_mut(table) {
            for row in rows.iter_mut() {
                if !filters.iter().all(|f| f.matches(&*row)) {
                    continue;
                }
                if let Value::Object(object) = row {
                    for (column, value) in &patch {
                        object.insert(column.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, AppError> {
        self.check_table(table)?;

        let mut inserts = self.inner.inserts.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let table = table.to_string();

        let pump = tokio::spawn(async move {
            loop {
                match inserts.recv().await {
                    Ok((t, row)) if t == table && filter.matches(&row) => {
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(table = %table, skipped, "memory feed lagged, inserts dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, pump))
    }
}
