use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::conference_models::{
    ConferenceChanges, ConferenceDraft, ConferenceType, NewConference,
};
use crate::utils::time::parse_timestamp;

pub const DEFAULT_API_BASE: &str = "https://cloud-api.yandex.net/v1/telemost-api";

#[derive(Debug, Error)]
pub enum TelemostError {
    #[error("Telemost API returned {status_code}: {detail}")]
    Api { detail: Value, status_code: u16 },
    #[error("Telemost request failed: {message}")]
    Network { message: String },
    #[error("Operation is not supported by the Telemost API")]
    UnsupportedOperation,
}

impl TelemostError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TelemostError::Api { status_code: 401, .. })
    }

    /// Caller-facing body: `{error, status_code}`.
    pub fn to_json(&self) -> Value {
        match self {
            TelemostError::Api { detail, status_code } => json!({
                "error": detail,
                "status_code": status_code,
            }),
            TelemostError::Network { message } => json!({
                "error": message,
                "status_code": Value::Null,
            }),
            other => json!({
                "error": other.to_string(),
                "status_code": Value::Null,
            }),
        }
    }
}

impl From<reqwest::Error> for TelemostError {
    fn from(e: reqwest::Error) -> Self {
        TelemostError::Network { message: e.to_string() }
    }
}

/// Remote conference API as seen by the sync proxy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConferenceApi: Send + Sync {
    async fn create(&self, token: &str, draft: &ConferenceDraft) -> Result<RawConference, TelemostError>;
    async fn list(&self, token: &str) -> Result<Vec<RawConference>, TelemostError>;
    async fn update(&self, token: &str, id: i64, changes: &ConferenceChanges) -> Result<RawConference, TelemostError>;
    /// The remote API has no delete; implementations must not perform I/O.
    async fn delete(&self, token: &str, id: i64) -> Result<(), TelemostError>;
}

/// Fields we read from remote records, each with its accepted spellings in
/// priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteField {
    Id,
    Name,
    Type,
    Description,
    StartDate,
    StartTime,
    Cohosts,
    CreateCalendarEvent,
    InviteUsers,
    LiveStreamTitle,
    LiveStreamDescription,
    Status,
    Link,
    CreatedAt,
}

impl RemoteField {
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            RemoteField::Id => &["id", "ID"],
            RemoteField::Name => &["name", "NAME"],
            RemoteField::Type => &["type", "TYPE"],
            RemoteField::Description => &["description", "DESCRIPTION"],
            RemoteField::StartDate => &["start_date", "startDate", "START_DATE"],
            RemoteField::StartTime => &["start_time", "startTime", "START_TIME"],
            RemoteField::Cohosts => &["cohosts", "participants", "COHOSTS"],
            RemoteField::CreateCalendarEvent => &["create_calendar_event", "createCalendarEvent"],
            RemoteField::InviteUsers => &["invite_users", "inviteUsers"],
            RemoteField::LiveStreamTitle => &["live_stream_title", "liveStreamTitle"],
            RemoteField::LiveStreamDescription => &["live_stream_description", "liveStreamDescription"],
            RemoteField::Status => &["status", "STATUS"],
            RemoteField::Link => &["link", "LINK", "join_url", "JOIN_URL"],
            RemoteField::CreatedAt => &["created_at", "createdAt"],
        }
    }

    pub fn name(self) -> &'static str {
        self.aliases()[0]
    }
}

/// Why a remote record could not be stored locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    InvalidField { field: &'static str, value: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingId => f.write_str("record has no usable id"),
            SkipReason::InvalidField { field, value } => write!(f, "invalid {}: {}", field, value),
        }
    }
}

/// A conference record exactly as the remote API returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConference(pub Value);

impl RawConference {
    /// First alias present with a non-null value.
    pub fn field(&self, field: RemoteField) -> Option<&Value> {
        let object = self.0.as_object()?;
        field
            .aliases()
            .iter()
            .filter_map(|alias| object.get(*alias))
            .find(|value| !value.is_null())
    }

    pub fn id(&self) -> Option<i64> {
        match self.field(RemoteField::Id)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn link(&self) -> Option<String> {
        self.text(RemoteField::Link).filter(|link| !link.is_empty())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.field(RemoteField::CreatedAt).and_then(parse_timestamp)
    }

    fn text(&self, field: RemoteField) -> Option<String> {
        match self.field(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn flag(&self, field: RemoteField) -> Result<Option<bool>, SkipReason> {
        let Some(value) = self.field(field) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "y" | "yes" | "1" => Some(true),
                "false" | "n" | "no" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| SkipReason::InvalidField {
            field: field.name(),
            value: value.to_string(),
        })
    }

    fn cohosts(&self) -> Option<Vec<String>> {
        let items = self.field(RemoteField::Cohosts)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("email").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect(),
        )
    }

    /// Overlays the fields present in this record onto `base`. Absent fields
    /// keep the base value; the record's id always wins.
    pub fn merge_into(&self, mut base: NewConference) -> Result<NewConference, SkipReason> {
        let id = self.id().ok_or(SkipReason::MissingId)?;
        base.id = Some(id);

        if let Some(name) = self.text(RemoteField::Name) {
            base.name = name;
        }
        if let Some(kind) = self.text(RemoteField::Type) {
            base.conference_type = kind.parse::<ConferenceType>().map_err(|_| SkipReason::InvalidField {
                field: RemoteField::Type.name(),
                value: kind.clone(),
            })?;
        }
        if let Some(description) = self.text(RemoteField::Description) {
            base.description = description;
        }
        if let Some(start_date) = self.text(RemoteField::StartDate) {
            base.start_date = start_date;
        }
        if let Some(start_time) = self.text(RemoteField::StartTime) {
            base.start_time = start_time;
        }
        if let Some(cohosts) = self.cohosts() {
            base.cohosts = cohosts;
        }
        if let Some(flag) = self.flag(RemoteField::CreateCalendarEvent)? {
            base.create_calendar_event = flag;
        }
        if let Some(flag) = self.flag(RemoteField::InviteUsers)? {
            base.invite_users = flag;
        }
        if let Some(title) = self.text(RemoteField::LiveStreamTitle) {
            base.live_stream_title = title;
        }
        if let Some(description) = self.text(RemoteField::LiveStreamDescription) {
            base.live_stream_description = description;
        }
        if let Some(status) = self.text(RemoteField::Status).filter(|s| !s.is_empty()) {
            base.status = status;
        }
        if let Some(link) = self.link() {
            base.link = Some(link);
        }
        if let Some(created_at) = self.created_at() {
            base.created_at = Some(created_at);
        }

        Ok(base)
    }
}

/// Body for `POST /conferences`.
pub fn create_payload(draft: &ConferenceDraft) -> Value {
    let mut payload = Map::new();
    payload.insert("waiting_room_level".to_string(), json!("PUBLIC"));

    if draft.conference_type == ConferenceType::Broadcast {
        payload.insert(
            "live_stream".to_string(),
            json!({
                "title": draft.live_stream_title,
                "description": draft.live_stream_description,
            }),
        );
    }

    let cohosts: Vec<Value> = draft
        .cohosts
        .iter()
        .filter(|email| email.contains('@'))
        .map(|email| json!({ "email": email }))
        .collect();
    if !cohosts.is_empty() {
        payload.insert("cohosts".to_string(), Value::Array(cohosts));
    }

    Value::Object(payload)
}

/// Accepts a bare array or an array nested under `result`, `items` or
/// `conferences`. An empty body is an empty list. Any other shape is reported
/// as an API error carrying the body and the status it arrived with.
pub fn extract_list(body: Value, status_code: u16) -> Result<Vec<RawConference>, TelemostError> {
    let items = match &body {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(items.clone()),
        Value::Object(object) => ["result", "items", "conferences"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array).cloned()),
        _ => None,
    };

    match items {
        Some(items) => Ok(items.into_iter().map(RawConference).collect()),
        None => {
            tracing::debug!("Telemost list returned an unexpected shape: {}", body);
            Err(TelemostError::Api { detail: body, status_code })
        }
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "result": text }))
}

pub struct TelemostClient {
    http: Client,
    api_base: String,
}

impl TelemostClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, TelemostError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn conferences_url(&self) -> String {
        format!("{}/conferences", self.api_base)
    }

    /// Returns the success status with the parsed body.
    async fn send(&self, request: RequestBuilder, token: &str) -> Result<(u16, Value), TelemostError> {
        let response = request
            .header("Authorization", format!("OAuth {}", token))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = parse_body(&text);

        if !status.is_success() {
            tracing::debug!("Telemost returned {}: {}", status, body);
            return Err(TelemostError::Api {
                detail: body,
                status_code: status.as_u16(),
            });
        }

        Ok((status.as_u16(), body))
    }
}

#[async_trait]
impl ConferenceApi for TelemostClient {
    async fn create(&self, token: &str, draft: &ConferenceDraft) -> Result<RawConference, TelemostError> {
        let request = self.http.post(self.conferences_url()).json(&create_payload(draft));
        let (_, body) = self.send(request, token).await?;
        Ok(RawConference(body))
    }

    async fn list(&self, token: &str) -> Result<Vec<RawConference>, TelemostError> {
        let request = self.http.get(self.conferences_url());
        let (status_code, body) = self.send(request, token).await?;
        extract_list(body, status_code)
    }

    async fn update(&self, token: &str, id: i64, changes: &ConferenceChanges) -> Result<RawConference, TelemostError> {
        let url = format!("{}/{}", self.conferences_url(), id);
        let request = self.http.patch(url).json(changes);
        let (_, body) = self.send(request, token).await?;
        Ok(RawConference(body))
    }

    async fn delete(&self, _token: &str, _id: i64) -> Result<(), TelemostError> {
        Err(TelemostError::UnsupportedOperation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_pick_first_present_spelling() {
        let raw = RawConference(json!({
            "ID": "15",
            "NAME": "Upper",
            "name": "lower",
            "JOIN_URL": "https://telemost.yandex.ru/j/15",
            "startDate": "2025-05-01",
            "participants": [{ "email": "a@example.com" }, "b@example.com", 3],
            "createdAt": "2025-05-01T09:00:00Z",
        }));

        let merged = raw.merge_into(NewConference::default()).unwrap();
        assert_eq!(merged.id, Some(15));
        assert_eq!(merged.name, "lower");
        assert_eq!(merged.link.as_deref(), Some("https://telemost.yandex.ru/j/15"));
        assert_eq!(merged.start_date, "2025-05-01");
        assert_eq!(merged.cohosts, vec!["a@example.com", "b@example.com"]);
        assert_eq!(merged.created_at, parse_timestamp(&json!("2025-05-01T09:00:00Z")));
    }

    #[test]
    fn merge_keeps_base_for_absent_fields() {
        let base = NewConference {
            description: "kept".to_string(),
            invite_users: true,
            ..Default::default()
        };
        let merged = RawConference(json!({ "id": 3, "TYPE": "Broadcast", "invite_users": "N" }))
            .merge_into(base)
            .unwrap();

        assert_eq!(merged.description, "kept");
        assert_eq!(merged.conference_type, ConferenceType::Broadcast);
        assert!(!merged.invite_users);
        assert_eq!(merged.status, "scheduled");
    }

    #[test]
    fn merge_skips_records_without_id_or_with_bad_type() {
        assert_eq!(
            RawConference(json!({ "name": "no id" })).merge_into(NewConference::default()),
            Err(SkipReason::MissingId)
        );
        assert_eq!(
            RawConference(json!({ "id": "abc" })).merge_into(NewConference::default()),
            Err(SkipReason::MissingId)
        );
        assert!(matches!(
            RawConference(json!({ "id": 1, "type": "webinar" })).merge_into(NewConference::default()),
            Err(SkipReason::InvalidField { field: "type", .. })
        ));
    }

    #[test]
    fn create_payload_shapes_broadcasts_and_cohosts() {
        let draft = ConferenceDraft {
            name: "Town hall".to_string(),
            conference_type: ConferenceType::Broadcast,
            cohosts: vec!["a@example.com".to_string(), "not-an-email".to_string()],
            live_stream_title: "Live".to_string(),
            live_stream_description: "All hands".to_string(),
            ..Default::default()
        };

        assert_eq!(
            create_payload(&draft),
            json!({
                "waiting_room_level": "PUBLIC",
                "live_stream": { "title": "Live", "description": "All hands" },
                "cohosts": [{ "email": "a@example.com" }],
            })
        );

        let plain = ConferenceDraft { name: "Call".to_string(), ..Default::default() };
        assert_eq!(create_payload(&plain), json!({ "waiting_room_level": "PUBLIC" }));
    }

    #[test]
    fn extract_list_accepts_known_shapes() {
        assert_eq!(extract_list(json!([{ "id": 1 }]), 200).unwrap().len(), 1);
        assert_eq!(extract_list(json!({ "result": [{ "id": 1 }, { "id": 2 }] }), 200).unwrap().len(), 2);
        assert_eq!(extract_list(json!({ "items": [] }), 200).unwrap().len(), 0);
        assert_eq!(extract_list(json!({ "conferences": [{ "id": 9 }] }), 200).unwrap()[0].id(), Some(9));
        assert!(extract_list(Value::Null, 204).unwrap().is_empty());
    }

    #[test]
    fn unexpected_list_shapes_are_api_errors() {
        let err = extract_list(json!({ "result": "text" }), 200).unwrap_err();
        assert_eq!(err.to_json(), json!({ "error": { "result": "text" }, "status_code": 200 }));

        assert!(matches!(
            extract_list(json!("plain"), 201),
            Err(TelemostError::Api { status_code: 201, .. })
        ));
    }

    #[test]
    fn non_json_bodies_are_wrapped() {
        assert_eq!(parse_body("<html>oops</html>"), json!({ "result": "<html>oops</html>" }));
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({ "a": 1 }));
    }

    #[test]
    fn error_json_carries_status_code() {
        let err = TelemostError::Api { detail: json!({ "message": "bad" }), status_code: 403 };
        assert_eq!(err.to_json(), json!({ "error": { "message": "bad" }, "status_code": 403 }));
        assert!(!err.is_unauthorized());
        assert!(TelemostError::Api { detail: Value::Null, status_code: 401 }.is_unauthorized());
    }

    #[tokio::test]
    async fn delete_is_rejected_without_network() {
        let client = TelemostClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(matches!(client.delete("t", 1).await, Err(TelemostError::UnsupportedOperation)));
    }
}
