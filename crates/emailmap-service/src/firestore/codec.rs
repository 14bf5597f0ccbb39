//! Firestore REST (v1) JSON shapes for documents and commit writes.

use chrono::{DateTime, SecondsFormat, Utc};
use emailmap_core::{Document, FieldValue, Fields, StoreError, Write, WriteBatch};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Documents root, e.g. `projects/p/databases/(default)/documents`.
pub fn document_name(root: &str, path: &str) -> String {
    format!("{root}/{path}")
}

pub fn encode_value(value: &FieldValue) -> Option<Value> {
    match value {
        FieldValue::String(s) => Some(json!({ "stringValue": s })),
        FieldValue::Timestamp(at) => Some(json!({
            "timestampValue": at.to_rfc3339_opts(SecondsFormat::Micros, true)
        })),
        FieldValue::ServerTimestamp => None,
    }
}

pub fn encode_write(root: &str, write: &Write) -> Value {
    match write {
        Write::Delete(doc) => json!({ "delete": document_name(root, &doc.path()) }),
        Write::Set { doc, fields } => {
            let mut encoded = Map::new();
            let mut transforms = Vec::new();
            for (name, value) in fields {
                match encode_value(value) {
                    Some(v) => {
                        encoded.insert(name.clone(), v);
                    }
                    None => transforms.push(json!({
                        "fieldPath": name,
                        "setToServerValue": "REQUEST_TIME"
                    })),
                }
            }
            let mut write = json!({
                "update": {
                    "name": document_name(root, &doc.path()),
                    "fields": encoded,
                }
            });
            if !transforms.is_empty() {
                write["updateTransforms"] = Value::Array(transforms);
            }
            write
        }
    }
}

pub fn encode_commit(root: &str, batch: &WriteBatch) -> Value {
    let writes: Vec<Value> = batch.writes().iter().map(|w| encode_write(root, w)).collect();
    json!({ "writes": writes })
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn decode_document(value: &Value) -> Result<Document, StoreError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    let mut fields = Fields::new();
    if let Some(raw_fields) = value.get("fields").and_then(Value::as_object) {
        for (field, raw) in raw_fields {
            if let Some(s) = raw.get("stringValue").and_then(Value::as_str) {
                fields.insert(field.clone(), FieldValue::String(s.to_string()));
            } else if let Some(ts) = raw.get("timestampValue").and_then(Value::as_str) {
                let at = parse_timestamp(ts).ok_or_else(|| StoreError::MalformedDocument {
                    name: name.clone(),
                    reason: format!("bad timestamp in {field}"),
                })?;
                fields.insert(field.clone(), FieldValue::Timestamp(at));
            } else {
                debug!(document = %name, field = %field, "skipping unsupported field type");
            }
        }
    }
    let update_time = value
        .get("updateTime")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);
    Ok(Document {
        fields,
        update_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emailmap_core::DocRef;

    const ROOT: &str = "projects/demo/databases/(default)/documents";

    #[test]
    fn swap_batch_encodes_delete_and_update_with_transform() {
        let mut fields = Fields::new();
        fields.insert("uid".into(), FieldValue::String("u1".into()));
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        let mut batch = WriteBatch::new();
        batch
            .delete(DocRef::new("emailToUid", "old"))
            .set(DocRef::new("emailToUid", "new"), fields);

        let body = encode_commit(ROOT, &batch);
        assert_eq!(
            body,
            json!({
                "writes": [
                    {"delete": "projects/demo/databases/(default)/documents/emailToUid/old"},
                    {
                        "update": {
                            "name": "projects/demo/databases/(default)/documents/emailToUid/new",
                            "fields": {"uid": {"stringValue": "u1"}}
                        },
                        "updateTransforms": [
                            {"fieldPath": "createdAt", "setToServerValue": "REQUEST_TIME"}
                        ]
                    }
                ]
            })
        );
    }

    #[test]
    fn decodes_index_document() {
        let raw = json!({
            "name": format!("{ROOT}/emailToUid/abc"),
            "fields": {
                "uid": {"stringValue": "u1"},
                "createdAt": {"timestampValue": "2024-05-01T10:00:00.123456Z"},
                "legacy": {"integerValue": "3"}
            },
            "createTime": "2024-05-01T10:00:00.123456Z",
            "updateTime": "2024-05-01T10:00:00.123456Z"
        });
        let doc = decode_document(&raw).unwrap();
        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.fields.get("uid"), Some(&FieldValue::String("u1".into())));
        let expected = parse_timestamp("2024-05-01T10:00:00.123456Z").unwrap();
        assert_eq!(
            doc.fields.get("createdAt"),
            Some(&FieldValue::Timestamp(expected))
        );
        assert_eq!(doc.update_time, Some(expected));
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let raw = json!({
            "name": "x",
            "fields": {"createdAt": {"timestampValue": "yesterday"}}
        });
        assert!(matches!(
            decode_document(&raw),
            Err(StoreError::MalformedDocument { .. })
        ));
    }
}
