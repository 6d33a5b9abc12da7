//! Text record codec: YAML front matter followed by a markdown body.
//!
//! # Invariants
//! - `decode(encode(o)) == o` for every valid object; the body is kept
//!   byte-for-byte.
//! - Decoded objects pass `WorkObject::validate()`.

use crate::model::id::ObjectId;
use crate::model::object::{ObjectKind, ObjectStatus, Priority, WorkObject, SCHEMA_VERSION};
use crate::repo::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

const FENCE: &str = "---";

#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    kind: ObjectKind,
    id: ObjectId,
    #[serde(default, deserialize_with = "blank_as_none")]
    parent: Option<ObjectId>,
    status: ObjectStatus,
    title: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    prerequisites: Vec<ObjectId>,
    #[serde(default)]
    worktree: Option<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    schema_version: String,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<ObjectId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => ObjectId::parse(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Serializes one object into record text.
pub fn encode(object: &WorkObject) -> StoreResult<String> {
    let front = FrontMatter {
        kind: object.kind,
        id: object.id.clone(),
        parent: object.parent.clone(),
        status: object.status,
        title: object.title.clone(),
        priority: object.priority,
        prerequisites: object.prerequisites.clone(),
        worktree: object.worktree.clone(),
        created: object.created,
        updated: object.updated,
        schema_version: object.schema_version.clone(),
    };
    let yaml = serde_yaml::to_string(&front).map_err(|err| StoreError::InvalidRecord {
        record: object.id.to_string(),
        message: format!("front matter encode failed: {err}"),
    })?;
    Ok(format!("{FENCE}\n{yaml}{FENCE}\n{}", object.body))
}

/// Parses record text. `record` names the source in error messages.
pub fn decode(text: &str, record: &str) -> StoreResult<WorkObject> {
    let invalid = |message: String| StoreError::InvalidRecord {
        record: record.to_string(),
        message,
    };

    let (yaml, body) = split_front_matter(text)
        .ok_or_else(|| invalid("missing front matter block".to_string()))?;
    let front: FrontMatter =
        serde_yaml::from_str(yaml).map_err(|err| invalid(format!("front matter: {err}")))?;

    let object = WorkObject {
        id: front.id,
        kind: front.kind,
        parent: front.parent,
        status: front.status,
        title: front.title,
        priority: front.priority,
        prerequisites: front.prerequisites,
        worktree: front.worktree,
        created: front.created,
        updated: front.updated,
        schema_version: front.schema_version,
        body: body.to_string(),
    };
    object.validate().map_err(|err| invalid(err.to_string()))?;
    Ok(object)
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FENCE {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, split_front_matter};
    use crate::model::id::ObjectId;
    use crate::model::object::{ObjectStatus, Priority, WorkObject};
    use crate::repo::StoreError;

    fn sample_task() -> WorkObject {
        let mut task = WorkObject::new(
            ObjectId::parse("T-add-login").unwrap(),
            Some(ObjectId::parse("F-auth").unwrap()),
            "Add login",
        );
        task.priority = Priority::High;
        task.prerequisites = vec![ObjectId::parse("ST-schema").unwrap()];
        task.body = "Implement the form.\n\n---\n\nTrailing fence inside body.\n".to_string();
        task
    }

    #[test]
    fn encode_then_decode_preserves_body_and_metadata() {
        let task = sample_task();
        let text = encode(&task).unwrap();
        assert!(text.starts_with("---\nkind: task\n"));

        let decoded = decode(&text, "T-add-login.md").unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn decode_accepts_blank_parent_and_defaults() {
        let text = "---\nkind: task\nid: ST-lone\nparent: ''\nstatus: open\ntitle: Lone\n\
                    created: 2026-01-01T00:00:00Z\nupdated: 2026-01-01T00:00:00Z\n---\nbody";
        let decoded = decode(text, "ST-lone.md").unwrap();
        assert_eq!(decoded.parent, None);
        assert_eq!(decoded.priority, Priority::Normal);
        assert_eq!(decoded.status, ObjectStatus::Open);
        assert_eq!(decoded.body, "body");
    }

    #[test]
    fn decode_rejects_missing_front_matter_and_invalid_objects() {
        let err = decode("no fence here", "x.md").unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));

        let wrong_status = "---\nkind: project\nid: P-a\nstatus: review\ntitle: A\n\
                            created: 2026-01-01T00:00:00Z\nupdated: 2026-01-01T00:00:00Z\n---\n";
        let err = decode(wrong_status, "project.md").unwrap_err();
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn split_handles_crlf_fences() {
        let (yaml, body) = split_front_matter("---\r\na: 1\r\n---\r\nrest").unwrap();
        assert_eq!(yaml, "a: 1\r\n");
        assert_eq!(body, "rest");
    }
}
