use axum::{
    body::to_bytes,
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::models::conference_models::Caller;

const BODY_LIMIT: usize = 1024 * 1024;

pub const DEFAULT_USER_ID: &str = "unknown";
pub const DEFAULT_USER_NAME: &str = "Unknown User";

#[derive(Debug)]
pub struct ParamsError {
    pub message: String,
}

impl IntoResponse for ParamsError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Query string, form body and JSON body merged into one object, later
/// sources overriding earlier ones. Bitrix24 posts its auth data as
/// `auth[domain]=...` form keys; those are nested into objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedParams(pub Map<String, Value>);

impl MergedParams {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value; numbers are rendered as strings.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The caller as identified by the embedding page.
    pub fn caller(&self) -> Caller {
        Caller::new(
            self.get_str("user_id").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            self.get_str("user_name").unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
        )
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ParamsError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| ParamsError {
            message: format!("Invalid request body: {}", e),
        })
    }

    pub fn merge_form(&mut self, encoded: &[u8]) {
        for (key, value) in url::form_urlencoded::parse(encoded) {
            insert_path(&mut self.0, &bracket_path(&key), Value::String(value.into_owned()));
        }
    }

    pub fn merge_object(&mut self, object: Map<String, Value>) {
        for (key, value) in object {
            self.0.insert(key, value);
        }
    }
}

/// `auth[domain]` -> ["auth", "domain"]. Keys without brackets, or with
/// unbalanced ones, are kept whole.
fn bracket_path(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    if open == 0 || !key.ends_with(']') {
        return vec![key.to_string()];
    }

    let mut path = vec![key[..open].to_string()];
    for segment in key[open + 1..key.len() - 1].split("][") {
        if segment.contains('[') || segment.contains(']') {
            return vec![key.to_string()];
        }
        path.push(segment.to_string());
    }
    path
}

fn insert_path(target: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let slot = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

impl<S> FromRequest<S> for MergedParams
where
    S: Send + Sync,
{
    type Rejection = ParamsError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let mut params = MergedParams::default();

        if let Some(query) = parts.uri.query() {
            params.merge_form(query.as_bytes());
        }

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let bytes = to_bytes(body, BODY_LIMIT).await.map_err(|e| ParamsError {
            message: format!("Failed to read request body: {}", e),
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(params);
        }

        let looks_like_json = bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');
        if content_type.starts_with("application/json") || (content_type.is_empty() && looks_like_json) {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(object)) => params.merge_object(object),
                Ok(_) => {}
                Err(e) => {
                    return Err(ParamsError {
                        message: format!("Invalid JSON body: {}", e),
                    })
                }
            }
        } else if bytes.contains(&b'=') {
            params.merge_form(&bytes);
        }

        Ok(params)
    }
}
