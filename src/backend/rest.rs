//! HTTP backend for a hosted PostgREST database and object storage API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{encode_object_path, Backend, BlobBackend};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::records::{Filter, Query, UpsertMode};
use crate::types::Table;

/// PostgREST code for "the result contains 0 rows" on single-row reads.
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// PostgreSQL unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Error body returned by either API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<String>,
}

/// Client for the hosted service.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn rest_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{bucket}/{}",
            self.base_url,
            encode_object_path(path)
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows(&self, request: RequestBuilder) -> Result<Vec<Value>> {
        let response = check(self.authed(request).send().await?).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }
}

/// Render a filter value the way PostgREST expects it after `eq.`.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_param(filter: &Filter) -> (String, String) {
    let op = if filter.value.is_null() {
        "is.null".to_string()
    } else {
        format!("eq.{}", literal(&filter.value))
    };
    (filter.column.to_string(), op)
}

/// Query-string pairs for a select.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(query.filters.iter().map(filter_param));
    if let Some(order) = &query.order {
        params.push(("order".into(), format!("{}.asc", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

fn prefer_upsert(mode: UpsertMode) -> &'static str {
    match mode {
        UpsertMode::Merge => "resolution=merge-duplicates,return=representation",
        UpsertMode::IgnoreDuplicates => "resolution=ignore-duplicates,return=representation",
    }
}

/// Turn a non-success response into a [`StoreError`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &text))
}

fn error_from_body(status: StatusCode, text: &str) -> StoreError {
    let body: ApiErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body
        .message
        .clone()
        .or(body.error.clone())
        .unwrap_or_else(|| text.to_string());

    let duplicate = status == StatusCode::CONFLICT
        || body.code.as_deref() == Some(UNIQUE_VIOLATION)
        || body.status_code.as_deref() == Some("409")
        || body.error.as_deref() == Some("Duplicate");
    if duplicate {
        return StoreError::Conflict(message);
    }

    let code = body
        .code
        .or(body.status_code)
        .unwrap_or_else(|| status.as_u16().to_string());
    StoreError::Rejected { code, message }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        tracing::trace!(%table, "select");
        self.rows(self.client.get(self.rest_url(table)).query(&query_params(query)))
            .await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let request = self
            .client
            .post(self.rest_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        self.rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Rejected {
                code: NOT_FOUND_CODE.into(),
                message: format!("insert into {table} returned no row"),
            })
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        changes: Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let params: Vec<(String, String)> = filters.iter().map(filter_param).collect();
        let request = self
            .client
            .patch(self.rest_url(table))
            .query(&params)
            .header("Prefer", "return=representation")
            .json(&Value::Object(changes));
        self.rows(request).await
    }

    async fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &[&str],
        mode: UpsertMode,
    ) -> Result<Vec<Value>> {
        let request = self
            .client
            .post(self.rest_url(table))
            .query(&[("on_conflict", on_conflict.join(","))])
            .header("Prefer", prefer_upsert(mode))
            .json(&row);
        self.rows(request).await
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

#[async_trait]
impl BlobBackend for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        let request = self
            .client
            .post(self.object_url(bucket, path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes);
        let response = check(self.authed(request).send().await?).await?;
        let body: UploadResponse = response.json().await?;

        // The API answers with "<bucket>/<path>".
        let prefix = format!("{bucket}/");
        Ok(body
            .key
            .map(|k| k.strip_prefix(&prefix).map(str::to_string).unwrap_or(k))
            .unwrap_or_else(|| path.to_string()))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let request = self
            .client
            .delete(format!("{}/storage/v1/object/{bucket}", self.base_url))
            .json(&serde_json::json!({ "prefixes": paths }));
        check(self.authed(request).send().await?).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            self.base_url,
            encode_object_path(path)
        )
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let request = self
            .client
            .get(format!("{}/storage/v1/bucket/{bucket}", self.base_url));
        let response = self.authed(request).send().await?;
        match check(response).await {
            Ok(_) => Ok(true),
            Err(StoreError::Rejected { code, .. }) if code == "404" || code == "400" => Ok(false),
            Err(e) => Err(e),
        }
    }
}
