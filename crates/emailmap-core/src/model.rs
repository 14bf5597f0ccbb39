use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, SyncError};
use crate::store::{Document, FieldValue, Fields};

pub const FIELD_UID: &str = "uid";
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Snapshot of a user document. Only `email` matters to the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl UserRecord {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            profile: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParams {
    pub user_id: String,
}

/// Document-written trigger payload. `before` is absent on creation and
/// `after` is absent on deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    #[serde(default)]
    pub before: Option<UserRecord>,
    #[serde(default)]
    pub after: Option<UserRecord>,
    pub params: TriggerParams,
}

impl ChangeEvent {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SyncError> {
        let event: ChangeEvent = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::MalformedEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.params.user_id.trim().is_empty() {
            return Err(SyncError::MalformedEvent("params.userId is empty".into()));
        }
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        &self.params.user_id
    }

    pub fn before_email(&self) -> Option<&str> {
        self.before.as_ref().and_then(|r| r.email.as_deref())
    }

    pub fn after_email(&self) -> Option<&str> {
        self.after.as_ref().and_then(|r| r.email.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Timestamp {
    /// Resolved by the store to its commit time.
    ServerTimestamp,
    At(DateTime<Utc>),
}

/// Value stored under `emailToUid/{digest}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailIndexEntry {
    pub uid: String,
    pub created_at: Timestamp,
}

impl EmailIndexEntry {
    pub fn pending(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            created_at: Timestamp::ServerTimestamp,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_UID.to_string(), FieldValue::String(self.uid.clone()));
        let created = match &self.created_at {
            Timestamp::ServerTimestamp => FieldValue::ServerTimestamp,
            Timestamp::At(at) => FieldValue::Timestamp(*at),
        };
        fields.insert(FIELD_CREATED_AT.to_string(), created);
        fields
    }

    pub fn from_document(name: &str, doc: &Document) -> Result<Self, StoreError> {
        let malformed = |reason: &str| StoreError::MalformedDocument {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let uid = match doc.fields.get(FIELD_UID) {
            Some(FieldValue::String(uid)) => uid.clone(),
            Some(_) => return Err(malformed("uid is not a string")),
            None => return Err(malformed("uid missing")),
        };
        let created_at = match doc.fields.get(FIELD_CREATED_AT) {
            Some(FieldValue::Timestamp(at)) => Timestamp::At(*at),
            Some(FieldValue::ServerTimestamp) => Timestamp::ServerTimestamp,
            Some(_) => return Err(malformed("createdAt is not a timestamp")),
            None => return Err(malformed("createdAt missing")),
        };
        Ok(Self { uid, created_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_update_event() {
        let raw = json!({
            "before": {"email": "a@x.com", "displayName": "Ann"},
            "after": {"email": "b@x.com", "displayName": "Ann"},
            "params": {"userId": "u1"}
        });
        let event = ChangeEvent::from_slice(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.user_id(), "u1");
        assert_eq!(event.before_email(), Some("a@x.com"));
        assert_eq!(event.after_email(), Some("b@x.com"));
        let after = event.after.unwrap();
        assert_eq!(after.profile.get("displayName"), Some(&json!("Ann")));
    }

    #[test]
    fn missing_snapshots_mean_absent_email() {
        let raw = json!({"after": {"email": "c@y.com"}, "params": {"userId": "u2"}});
        let event = ChangeEvent::from_slice(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.before_email(), None);

        let raw = json!({"before": {"name": "no email"}, "after": null, "params": {"userId": "u2"}});
        let event = ChangeEvent::from_slice(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.before_email(), None);
        assert_eq!(event.after_email(), None);
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases = [
            json!({"before": null, "after": {"email": "a@x.com"}}),
            json!({"after": {"email": 42}, "params": {"userId": "u1"}}),
            json!({"after": {"email": "a@x.com"}, "params": {"userId": "  "}}),
        ];
        for raw in cases {
            let err = ChangeEvent::from_slice(raw.to_string().as_bytes()).unwrap_err();
            assert!(matches!(err, SyncError::MalformedEvent(_)), "{raw}");
        }
        assert!(ChangeEvent::from_slice(b"not json").is_err());
    }

    #[test]
    fn entry_fields_round_trip_through_document() {
        let at = Utc::now();
        let entry = EmailIndexEntry {
            uid: "u1".into(),
            created_at: Timestamp::At(at),
        };
        let doc = Document {
            fields: entry.to_fields(),
            update_time: None,
        };
        assert_eq!(EmailIndexEntry::from_document("x", &doc).unwrap(), entry);
    }

    #[test]
    fn entry_without_uid_is_malformed() {
        let mut fields = Fields::new();
        fields.insert(FIELD_CREATED_AT.into(), FieldValue::Timestamp(Utc::now()));
        let doc = Document {
            fields,
            update_time: None,
        };
        let err = EmailIndexEntry::from_document("emailToUid/abc", &doc).unwrap_err();
        assert!(err.to_string().contains("uid missing"));
    }
}
