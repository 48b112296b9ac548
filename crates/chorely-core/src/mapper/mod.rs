//! Bidirectional mapping between local records and remote wire rows.
//!
//! All field renames and timestamp coercion (epoch millis locally, RFC 3339
//! remotely) live here. Nothing in this module performs I/O.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{EntityKind, Record};

/// Local field name -> remote column name, per kind
const RENAMES: &[(EntityKind, &str, &str)] = &[
    (EntityKind::Task, "assignee_id", "profile_id"),
    (EntityKind::Settings, "week_starts_on", "week_start"),
];

/// Columns carried as timestamps on the wire
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "updated_at", "completed_at", "redeemed_at"];

/// A remote row: a JSON object with `owner_id` and optional `deleted_at`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRow(Map<String, Value>);

impl RemoteRow {
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::InvalidInput(format!(
                "remote row must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|value| !value.is_null())
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.get("owner_id").and_then(Value::as_str)
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.get("updated_at").and_then(parse_timestamp)
    }

    pub fn created_at(&self) -> Option<i64> {
        self.get("created_at").and_then(parse_timestamp)
    }

    pub fn deleted_at(&self) -> Option<i64> {
        self.get("deleted_at").and_then(parse_timestamp)
    }

    /// Any non-null `deleted_at` marks a tombstone, parseable or not
    pub fn is_tombstone(&self) -> bool {
        self.get("deleted_at").is_some()
    }

    /// Timestamp used for conflict resolution: `updated_at`, else `created_at`, else 0
    pub fn remote_timestamp(&self) -> i64 {
        self.updated_at().or_else(|| self.created_at()).unwrap_or(0)
    }

    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for RemoteRow {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Column the remote upsert resolves conflicts on.
///
/// Account settings are one row per owner, everything else is keyed by id.
pub const fn conflict_key(kind: EntityKind) -> &'static str {
    if kind.is_singleton() {
        "owner_id"
    } else {
        "id"
    }
}

/// Map a local record to its remote row, owned by `owner_id`.
///
/// Never sets `deleted_at`: an upsert must not clear or forge a tombstone.
pub fn to_remote(record: &Record, owner_id: &str) -> Result<RemoteRow> {
    let kind = record.kind();
    let Value::Object(mut fields) = record.to_payload()? else {
        return Err(mapping_error(kind, "record did not serialize to an object"));
    };

    for &(renamed_kind, local, remote) in RENAMES {
        if renamed_kind == kind {
            if let Some(value) = fields.remove(local) {
                fields.insert(remote.to_string(), value);
            }
        }
    }

    for field in TIMESTAMP_FIELDS {
        if let Some(value) = fields.get_mut(*field) {
            if let Some(millis) = value.as_i64() {
                *value = Value::String(format_timestamp(millis).ok_or_else(|| {
                    mapping_error(kind, &format!("{field} is out of range"))
                })?);
            }
        }
    }

    fields.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    Ok(RemoteRow(fields))
}

/// Map a validated remote row back to a local record
pub fn to_local(kind: EntityKind, row: &RemoteRow) -> Result<Record> {
    validate(kind, row).map_err(|field| mapping_error(kind, &format!("missing {field}")))?;

    let fallback = row.remote_timestamp();
    let mut fields = row.fields().clone();
    fields.remove("owner_id");
    fields.remove("deleted_at");

    for &(renamed_kind, local, remote) in RENAMES {
        if renamed_kind == kind {
            if let Some(value) = fields.remove(remote) {
                fields.insert(local.to_string(), value);
            }
        }
    }

    let created_at = row.created_at().unwrap_or(fallback);
    for field in TIMESTAMP_FIELDS {
        let millis = match fields.get(*field).filter(|value| !value.is_null()) {
            Some(value) => parse_timestamp(value)
                .ok_or_else(|| mapping_error(kind, &format!("{field} is not a timestamp")))?,
            None if *field == "updated_at" => fallback,
            None => created_at,
        };
        if fields.contains_key(*field) || required_timestamp(kind, field) {
            fields.insert((*field).to_string(), Value::from(millis));
        }
    }

    Record::from_payload(kind, Value::Object(fields))
        .map_err(|error| mapping_error(kind, &error.to_string()))
}

/// `true` when the row carries every field required for `kind`
pub fn is_valid(kind: EntityKind, row: &RemoteRow) -> bool {
    validate(kind, row).is_ok()
}

/// Check required fields; returns the first missing one
pub fn validate(kind: EntityKind, row: &RemoteRow) -> std::result::Result<(), &'static str> {
    for field in ["id", "owner_id"]
        .into_iter()
        .chain(required_fields(kind).iter().copied())
    {
        let present = match row.get(field) {
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
            None => false,
        };
        if !present {
            return Err(field);
        }
    }
    Ok(())
}

const fn required_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Task => &["title"],
        EntityKind::Reward => &["title", "cost"],
        EntityKind::Completion => &["task_id"],
        EntityKind::Redemption => &["reward_id"],
        EntityKind::Profile => &["display_name"],
        EntityKind::Settings | EntityKind::AccountSettings => &[],
    }
}

fn required_timestamp(kind: EntityKind, field: &str) -> bool {
    match field {
        "created_at" | "updated_at" => true,
        "completed_at" => kind == EntityKind::Completion,
        "redeemed_at" => kind == EntityKind::Redemption,
        _ => false,
    }
}

fn format_timestamp(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parse an RFC 3339 string or an epoch-millisecond number
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|instant| instant.timestamp_millis()),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

fn mapping_error(kind: EntityKind, reason: &str) -> Error {
    Error::Mapping {
        table: kind.table_name(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Settings, Task};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: Value) -> RemoteRow {
        RemoteRow::from_value(value).unwrap()
    }

    #[test]
    fn to_remote_renames_and_formats_timestamps() {
        let mut task = Task::new("Dishes", 3).assigned_to("p1");
        task.created_at = 0;
        task.updated_at = 1_500;
        let remote = to_remote(&Record::from(task), "owner-1").unwrap();

        assert_eq!(remote.owner_id(), Some("owner-1"));
        assert_eq!(remote.get("profile_id"), Some(&json!("p1")));
        assert!(remote.get("assignee_id").is_none());
        assert_eq!(
            remote.get("updated_at"),
            Some(&json!("1970-01-01T00:00:01.500Z"))
        );
        assert!(remote.get("deleted_at").is_none());
        assert_eq!(remote.updated_at(), Some(1_500));
    }

    #[test]
    fn to_local_reverses_to_remote() {
        let settings = Settings {
            week_starts_on: 0,
            ..Settings::default()
        };
        let record = Record::from(settings);
        let remote = to_remote(&record, "owner-1").unwrap();
        assert_eq!(remote.get("week_start"), Some(&json!(0)));

        let local = to_local(EntityKind::Settings, &remote).unwrap();
        assert_eq!(local, record);
    }

    #[test]
    fn to_local_accepts_numeric_timestamps_and_fills_missing_ones() {
        let remote = row(json!({
            "id": "c1",
            "owner_id": "o",
            "task_id": "t1",
            "points": 4,
            "created_at": 1_000,
        }));

        let Record::Completion(completion) = to_local(EntityKind::Completion, &remote).unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(completion.created_at, 1_000);
        assert_eq!(completion.updated_at, 1_000);
        assert_eq!(completion.completed_at, 1_000);
        assert_eq!(completion.profile_id, None);
    }

    #[test]
    fn validation_reports_first_missing_field() {
        let missing_owner = row(json!({ "id": "t1", "title": "x" }));
        assert_eq!(validate(EntityKind::Task, &missing_owner), Err("owner_id"));

        let blank_title = row(json!({ "id": "t1", "owner_id": "o", "title": "  " }));
        assert_eq!(validate(EntityKind::Task, &blank_title), Err("title"));
        assert!(!is_valid(EntityKind::Task, &blank_title));

        let missing_cost = row(json!({ "id": "r1", "owner_id": "o", "title": "Movie" }));
        assert_eq!(validate(EntityKind::Reward, &missing_cost), Err("cost"));

        let settings = row(json!({ "id": "s1", "owner_id": "o" }));
        assert!(is_valid(EntityKind::AccountSettings, &settings));
    }

    #[test]
    fn invalid_rows_are_rejected_by_to_local() {
        let remote = row(json!({ "id": "c1", "owner_id": "o" }));
        let error = to_local(EntityKind::Completion, &remote).unwrap_err();
        assert!(error.to_string().contains("completions"));
        assert!(error.to_string().contains("task_id"));
    }

    #[test]
    fn tombstone_and_timestamp_fallbacks() {
        let remote = row(json!({
            "id": "t1",
            "owner_id": "o",
            "created_at": "2024-01-01T00:00:00Z",
            "deleted_at": "not a date",
        }));
        assert!(remote.is_tombstone());
        assert_eq!(remote.deleted_at(), None);
        assert_eq!(remote.remote_timestamp(), 1_704_067_200_000);

        let bare = row(json!({ "id": "t1", "deleted_at": null }));
        assert!(!bare.is_tombstone());
        assert_eq!(bare.remote_timestamp(), 0);
    }

    #[test]
    fn conflict_key_uses_owner_for_singletons() {
        assert_eq!(conflict_key(EntityKind::AccountSettings), "owner_id");
        assert_eq!(conflict_key(EntityKind::Task), "id");
    }
}
