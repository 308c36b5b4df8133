use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::retry::{send_with_retry, RetryPolicy};
use super::ProjectClient;
use crate::backend::{Filter, Row, RowStore, Select};
use crate::errors::AppError;

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

async fn store_error(table: &str, response: Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: PostgrestError = serde_json::from_str(&body).unwrap_or_default();

    let mut message = parsed.message.unwrap_or_else(|| format!("{} {}", status, body));
    if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
        message = format!("{} ({})", message, details);
    }
    if let Some(hint) = parsed.hint.filter(|h| !h.is_empty()) {
        message = format!("{}; hint: {}", message, hint);
    }

    AppError::Store {
        table: table.to_string(),
        code: parsed.code,
        message,
    }
}

fn apply_filters(url: &mut Url, filters: &[Filter]) {
    let mut pairs = url.query_pairs_mut();
    for f in filters {
        pairs.append_pair(&f.column, &format!("eq.{}", f.literal()));
    }
}

/// `GET /rest/v1/{table}` URL for `query`.
pub fn select_url(project: &ProjectClient, query: &Select) -> Result<Url, AppError> {
    let mut url = project.endpoint(&format!("rest/v1/{}", query.table))?;
    url.query_pairs_mut().append_pair("select", &query.columns);
    apply_filters(&mut url, &query.filters);
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(order) = &query.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            pairs.append_pair("order", &format!("{}.{}", order.column, direction));
        }
        if let Some(limit) = query.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
    }
    Ok(url)
}

/// Row store backed by the project's PostgREST API.
///
/// Reads retry per the project's [`RetryPolicy`]; writes are sent once.
pub struct PostgrestStore {
    project: ProjectClient,
}

impl PostgrestStore {
    pub fn new(project: ProjectClient) -> Self {
        Self { project }
    }
}

#[async_trait]
impl RowStore for PostgrestStore {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, AppError> {
        let url = select_url(&self.project, query)?;
        debug!(table = %query.table, url = %url, "select");

        let response = send_with_retry(
            || self.project.request(Method::GET, url.clone()),
            self.project.retry_policy(),
        )
        .await?;
        if !response.status().is_success() {
            return Err(store_error(&query.table, response).await);
        }

        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            other => Err(AppError::store(
                &query.table,
                format!("expected a JSON array, got {}", other),
            )),
        }
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, AppError> {
        let url = self.project.endpoint(&format!("rest/v1/{}", table))?;
        debug!(table, "insert");

        let response = send_with_retry(
            || {
                self.project
                    .request(Method::POST, url.clone())
                    .header("Prefer", "return=representation")
                    .json(&row)
            },
            &RetryPolicy::none(),
        )
        .await?;
        if !response.status().is_success() {
            return Err(store_error(table, response).await);
        }

        match response.json::<Value>().await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Object(map) => Ok(Value::Object(map)),
            _ => Err(AppError::store(table, "insert returned no row")),
        }
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<(), AppError> {
        if filters.is_empty() {
            return Err(AppError::store(table, "refusing to update without filters"));
        }

        let mut url = self.project.endpoint(&format!("rest/v1/{}", table))?;
        apply_filters(&mut url, filters);
        debug!(table, url = %url, "update");

        let response = send_with_retry(
            || {
                self.project
                    .request(Method::PATCH, url.clone())
                    .header("Prefer", "return=minimal")
                    .json(&patch)
            },
            &RetryPolicy::none(),
        )
        .await?;
        if !response.status().is_success() {
            return Err(store_error(table, response).await);
        }
        Ok(())
    }
}
