use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::conferences;
use crate::utils::time::millis_to_datetime;

pub const DEFAULT_STATUS: &str = "scheduled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConferenceType {
    #[default]
    Conference,
    Broadcast,
}

impl ConferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferenceType::Conference => "conference",
            ConferenceType::Broadcast => "broadcast",
        }
    }
}

impl std::str::FromStr for ConferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conference" => Ok(ConferenceType::Conference),
            "broadcast" => Ok(ConferenceType::Broadcast),
            other => Err(format!("unknown conference type: {}", other)),
        }
    }
}

impl std::fmt::Display for ConferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller on whose behalf a request runs, as supplied by the embedding
/// Bitrix24 page (`user_id`, `user_name`). Not authenticated by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub name: String,
}

impl Caller {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// Conference as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub conference_type: ConferenceType,
    pub description: String,
    pub start_date: String,
    pub start_time: String,
    pub cohosts: Vec<String>,
    pub create_calendar_event: bool,
    pub invite_users: bool,
    pub live_stream_title: String,
    pub live_stream_description: String,
    pub owner_id: String,
    pub owner_name: String,
    pub status: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = conferences)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConferenceRow {
    pub id: i64,
    pub name: String,
    pub conference_type: String,
    pub description: String,
    pub start_date: String,
    pub start_time: String,
    pub cohosts: String,
    pub create_calendar_event: bool,
    pub invite_users: bool,
    pub live_stream_title: String,
    pub live_stream_description: String,
    pub owner_id: String,
    pub owner_name: String,
    pub link: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ConferenceRow> for Conference {
    fn from(row: ConferenceRow) -> Self {
        Conference {
            id: row.id,
            name: row.name,
            // the table CHECK constraint only admits known types
            conference_type: row.conference_type.parse().unwrap_or_default(),
            description: row.description,
            start_date: row.start_date,
            start_time: row.start_time,
            cohosts: serde_json::from_str(&row.cohosts).unwrap_or_default(),
            create_calendar_event: row.create_calendar_event,
            invite_users: row.invite_users,
            live_stream_title: row.live_stream_title,
            live_stream_description: row.live_stream_description,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
            status: row.status,
            link: row.link,
            created_at: millis_to_datetime(row.created_at),
            updated_at: millis_to_datetime(row.updated_at),
        }
    }
}

/// A conference about to be written. `id` and `link` are optional: the
/// repository assigns whichever is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConference {
    pub id: Option<i64>,
    pub name: String,
    pub conference_type: ConferenceType,
    pub description: String,
    pub start_date: String,
    pub start_time: String,
    pub cohosts: Vec<String>,
    pub create_calendar_event: bool,
    pub invite_users: bool,
    pub live_stream_title: String,
    pub live_stream_description: String,
    pub owner_id: String,
    pub owner_name: String,
    pub link: Option<String>,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for NewConference {
    fn default() -> Self {
        NewConference {
            id: None,
            name: String::new(),
            conference_type: ConferenceType::Conference,
            description: String::new(),
            start_date: String::new(),
            start_time: String::new(),
            cohosts: Vec::new(),
            create_calendar_event: false,
            invite_users: false,
            live_stream_title: String::new(),
            live_stream_description: String::new(),
            owner_id: String::new(),
            owner_name: String::new(),
            link: None,
            status: DEFAULT_STATUS.to_string(),
            created_at: None,
        }
    }
}

impl NewConference {
    pub fn from_draft(draft: &ConferenceDraft, owner: &Caller) -> Self {
        NewConference {
            id: None,
            name: draft.name.trim().to_string(),
            conference_type: draft.conference_type,
            description: draft.description.clone(),
            start_date: draft.start_date.clone(),
            start_time: draft.start_time.clone(),
            cohosts: draft.cohosts.clone(),
            create_calendar_event: draft.create_calendar_event,
            invite_users: draft.invite_users,
            live_stream_title: draft.live_stream_title.clone(),
            live_stream_description: draft.live_stream_description.clone(),
            owner_id: owner.id.clone(),
            owner_name: owner.name.clone(),
            link: None,
            status: DEFAULT_STATUS.to_string(),
            created_at: None,
        }
    }

    /// Materializes the record without going through the store. Used when a
    /// remote create succeeded but the local write did not.
    pub fn into_conference(self, id: i64, link: String) -> Conference {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Conference {
            id,
            name: self.name,
            conference_type: self.conference_type,
            description: self.description,
            start_date: self.start_date,
            start_time: self.start_time,
            cohosts: self.cohosts,
            create_calendar_event: self.create_calendar_event,
            invite_users: self.invite_users,
            live_stream_title: self.live_stream_title,
            live_stream_description: self.live_stream_description,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            status: self.status,
            link,
            created_at,
            updated_at: created_at,
        }
    }
}

impl From<Conference> for NewConference {
    fn from(conference: Conference) -> Self {
        NewConference {
            id: Some(conference.id),
            name: conference.name,
            conference_type: conference.conference_type,
            description: conference.description,
            start_date: conference.start_date,
            start_time: conference.start_time,
            cohosts: conference.cohosts,
            create_calendar_event: conference.create_calendar_event,
            invite_users: conference.invite_users,
            live_stream_title: conference.live_stream_title,
            live_stream_description: conference.live_stream_description,
            owner_id: conference.owner_id,
            owner_name: conference.owner_name,
            link: Some(conference.link),
            status: conference.status,
            created_at: Some(conference.created_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = conferences)]
pub struct ConferenceInsert {
    pub id: Option<i64>,
    pub name: String,
    pub conference_type: String,
    pub description: String,
    pub start_date: String,
    pub start_time: String,
    pub cohosts: String,
    pub create_calendar_event: bool,
    pub invite_users: bool,
    pub live_stream_title: String,
    pub live_stream_description: String,
    pub owner_id: String,
    pub owner_name: String,
    pub link: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of `POST /api/conferences`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConferenceDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub conference_type: ConferenceType,
    pub description: String,
    pub start_date: String,
    pub start_time: String,
    pub cohosts: Vec<String>,
    pub create_calendar_event: bool,
    pub invite_users: bool,
    pub live_stream_title: String,
    pub live_stream_description: String,
}

/// Partial update, body of `PUT /api/conferences/{id}`. Absent fields are
/// left untouched; the same shape is forwarded to the remote API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub conference_type: Option<ConferenceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_calendar_event: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_users: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = conferences)]
pub struct ConferenceChangeset {
    pub name: Option<String>,
    pub conference_type: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub cohosts: Option<String>,
    pub create_calendar_event: Option<bool>,
    pub invite_users: Option<bool>,
    pub live_stream_title: Option<String>,
    pub live_stream_description: Option<String>,
    pub owner_name: Option<String>,
    pub status: Option<String>,
    pub link: Option<String>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conference_serializes_with_camel_case_fields() {
        let conference = NewConference {
            name: "Weekly sync".to_string(),
            conference_type: ConferenceType::Broadcast,
            owner_id: "7".to_string(),
            owner_name: "Anna".to_string(),
            ..Default::default()
        }
        .into_conference(12, "https://telemost.yandex.ru/j/12".to_string());

        let value = serde_json::to_value(&conference).unwrap();
        assert_eq!(value["type"], "broadcast");
        assert_eq!(value["ownerId"], "7");
        assert_eq!(value["liveStreamTitle"], "");
        assert_eq!(value["createCalendarEvent"], false);
        assert_eq!(value["status"], "scheduled");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn draft_fills_defaults_for_missing_fields() {
        let draft: ConferenceDraft = serde_json::from_value(json!({
            "name": "Demo",
            "cohosts": ["a@example.com"],
            "user_id": "ignored",
        }))
        .unwrap();

        assert_eq!(draft.conference_type, ConferenceType::Conference);
        assert_eq!(draft.cohosts, vec!["a@example.com"]);
        assert!(!draft.invite_users);
    }

    #[test]
    fn changes_serialize_only_present_fields() {
        let changes: ConferenceChanges = serde_json::from_value(json!({ "name": "X" })).unwrap();
        assert_eq!(serde_json::to_value(&changes).unwrap(), json!({ "name": "X" }));
    }

    #[test]
    fn conference_type_parses_case_insensitively() {
        assert_eq!("Broadcast".parse::<ConferenceType>(), Ok(ConferenceType::Broadcast));
        assert!("webinar".parse::<ConferenceType>().is_err());
    }
}
