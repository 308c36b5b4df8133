//! Seams to the hosted backend: identity, row store and change feed.
//!
//! Implementations: `supabase::*` (HTTP + WebSocket against a Supabase
//! project) and [`memory::MemoryBackend`] (in-process, used by tests).

pub mod memory;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::models::session::{Session, User};

/// A row as returned by the store.
pub type Row = Value;

/// Abstraction over the identity/session provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new identity. `Ok(None)` means the provider accepted the
    /// request but returned no user.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<User>, AppError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError>;

    /// The locally held session, if any.
    async fn session(&self) -> Result<Option<Session>, AppError>;

    async fn user(&self) -> Result<Option<User>, AppError>;

    async fn sign_out(&self) -> Result<(), AppError>;
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Literal used on the wire, e.g. `abc` for a string and `false` for a bool.
    pub fn literal(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.literal(),
            Some(v) => *v == self.value || v.to_string() == self.literal(),
            None => self.value.is_null(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A table-scoped read.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Abstraction over the relational store.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, AppError>;

    /// Insert one row and return it as stored (ids and defaults filled in).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, AppError>;

    async fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<(), AppError>;

    /// At most one row: zero rows is `None`, more than one is an error.
    async fn maybe_single(&self, query: &Select) -> Result<Option<Row>, AppError> {
        let query = query.clone().limit(2);
        let mut rows = self.select(&query).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(AppError::Store {
                table: query.table.clone(),
                code: Some(crate::errors::NO_ROWS_CODE.to_string()),
                message: "JSON object requested, multiple rows returned".to_string(),
            }),
        }
    }

    /// Exactly one row; zero rows is the "no rows" error.
    async fn single(&self, query: &Select) -> Result<Row, AppError> {
        self.maybe_single(query)
            .await?
            .ok_or_else(|| AppError::no_rows(&query.table))
    }
}

/// Abstraction over the realtime change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to rows inserted into `table` that match `filter`.
    async fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, AppError>;
}

/// A live feed of inserted rows.
///
/// Owns the task pumping the underlying connection; dropping the
/// subscription aborts that task and releases the connection.
pub struct Subscription {
    rx: mpsc::Receiver<Row>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Row>, pump: JoinHandle<()>) -> Self {
        Self {
            rx,
            pump: Some(pump),
        }
    }

    pub async fn next(&mut self) -> Option<Row> {
        self.rx.recv().await
    }

    /// False once the pump has stopped and every buffered row was consumed.
    pub fn is_active(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.is_finished()) || !self.rx.is_empty()
    }

    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Row;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Row>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
