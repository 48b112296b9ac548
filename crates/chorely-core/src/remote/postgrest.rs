//! Supabase/PostgREST remote store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteStore, TokenSource};
use crate::config::RemoteConfig;
use crate::mapper::RemoteRow;
use crate::models::EntityKind;
use crate::util::compact_text;

const REQUEST_TIMEOUT_SECS: u64 = 20;
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Remote store speaking the PostgREST dialect.
///
/// Row-level security on the server scopes rows to the bearer's user; every
/// query still filters by `owner_id` explicitly.
#[derive(Clone)]
pub struct PostgrestRemote {
    rest_url: String,
    anon_key: String,
    client: Client,
    tokens: Arc<dyn TokenSource>,
}

impl PostgrestRemote {
    pub fn new(config: &RemoteConfig, tokens: Arc<dyn TokenSource>) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            rest_url: config.rest_url.clone(),
            anon_key: config.anon_key.clone(),
            client,
            tokens,
        })
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.rest_url, kind.table_name())
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .tokens
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(token)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorized(request).await.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemote {
    async fn upsert(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        conflict_key: &str,
    ) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.table_url(kind))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row.into_value()]);
        self.send(request).await?;
        Ok(())
    }

    async fn soft_delete(&self, kind: EntityKind, id: &str, owner_id: &str) -> RemoteResult<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let request = self
            .client
            .patch(self.table_url(kind))
            .query(&[
                ("id", format!("eq.{id}")),
                ("owner_id", format!("eq.{owner_id}")),
            ])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({
                "deleted_at": now,
                "updated_at": now,
            }));
        self.send(request).await?;
        Ok(())
    }

    async fn select_all_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        let request = self
            .client
            .get(self.table_url(kind))
            .query(&[("owner_id", format!("eq.{owner_id}")), ("select", "*".to_string())]);
        let rows = self.send(request).await?.json::<Vec<Value>>().await?;
        Ok(parse_rows(kind, rows))
    }

    async fn select_one_owned_by(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> RemoteResult<Option<RemoteRow>> {
        let request = self.client.get(self.table_url(kind)).query(&[
            ("owner_id", format!("eq.{owner_id}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows = self.send(request).await?.json::<Vec<Value>>().await?;
        Ok(parse_rows(kind, rows).into_iter().next())
    }
}

/// Keep the object rows of a response. One malformed element is dropped
/// rather than failing the whole table.
fn parse_rows(kind: EntityKind, rows: Vec<Value>) -> Vec<RemoteRow> {
    rows.into_iter()
        .filter_map(|value| match RemoteRow::from_value(value) {
            Ok(row) => Some(row),
            Err(error) => {
                tracing::warn!(table = kind.table_name(), %error, "Skipping malformed remote row");
                None
            }
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorResponse {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Map a non-success PostgREST response onto a [`RemoteError`]
fn classify_error(status: StatusCode, body: &str) -> RemoteError {
    let payload = serde_json::from_str::<PostgrestErrorResponse>(body).unwrap_or_default();
    let message = payload
        .message
        .map(|message| match payload.details {
            Some(details) => format!("{} ({})", message.trim(), details.trim()),
            None => message.trim().to_string(),
        })
        .unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

    if payload.code.as_deref() == Some(FOREIGN_KEY_VIOLATION) {
        return RemoteError::ForeignKey(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::SERVICE_UNAVAILABLE => RemoteError::Unavailable,
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_code_maps_to_foreign_key_error() {
        let body = r#"{"code":"23503","message":"insert or update on table \"completions\" violates foreign key constraint","details":"Key (task_id)=(t1) is not present in table \"tasks\"."}"#;
        let error = classify_error(StatusCode::CONFLICT, body);
        let RemoteError::ForeignKey(message) = error else {
            panic!("expected foreign key error, got {error:?}");
        };
        assert!(message.contains("task_id"));
    }

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        let body = r#"{"code":"PGRST301","message":"JWT expired"}"#;
        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, body),
            RemoteError::Unauthorized(message) if message == "JWT expired"
        ));
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, ""),
            RemoteError::Unauthorized(_)
        ));
    }

    #[test]
    fn unparseable_bodies_fall_back_to_text() {
        let error = classify_error(StatusCode::BAD_GATEWAY, "upstream exploded");
        assert!(matches!(
            error,
            RemoteError::Api { status: 502, ref message } if message == "upstream exploded"
        ));

        let error = classify_error(StatusCode::INTERNAL_SERVER_ERROR, "   ");
        assert_eq!(error.to_string(), "Remote API error (500): HTTP 500");
    }

    #[test]
    fn parse_rows_skips_non_objects() {
        let rows = parse_rows(
            EntityKind::Task,
            vec![
                serde_json::json!({ "id": "t1", "owner_id": "o" }),
                serde_json::json!([1, 2]),
                serde_json::json!(null),
                serde_json::json!({ "id": "t2", "owner_id": "o" }),
            ],
        );
        let ids = rows.iter().filter_map(RemoteRow::id).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t1", "t2"]);
    }
}
