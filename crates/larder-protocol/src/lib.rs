pub mod frame;

use serde::{Deserialize, Serialize};

/// Unique identifier for a shared list.
pub type ListId = String;

/// Category of change carried by a [`ChangeEvent`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ListCreated,
    ListRenamed,
    ListDeleted,
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
}

/// A broadcastable notification that some shared-list state changed.
///
/// Fire-and-forget: events are never persisted, and a missed event is
/// harmless because clients can always re-fetch authoritative state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(rename = "listId", default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<ListId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn for_list(kind: ChangeKind, list_id: impl Into<ListId>) -> Self {
        Self {
            kind,
            list_id: Some(list_id.into()),
            data: None,
        }
    }

    pub fn for_item(
        kind: ChangeKind,
        list_id: impl Into<ListId>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            list_id: Some(list_id.into()),
            data: Some(data),
        }
    }

    /// The mutation key referenced by this event, when it targets one item.
    ///
    /// Clients use this to match an incoming notification against their own
    /// just-issued mutations for echo suppression.
    pub fn mutation_key(&self) -> Option<&str> {
        self.data.as_ref()?.get("itemId")?.as_str()
    }
}

/// Messages exchanged between the foreground page path and the background
/// worker path. The two contexts share no memory, so everything they
/// coordinate on travels as one of these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Deliver the current bearer credential. An empty token means signed out.
    SetToken { token: String },
    /// Request immediate activation of a pending worker update.
    SkipWaiting,
    /// Ask the background path to (re)establish its stream if not running.
    #[serde(rename = "refreshSSE")]
    RefreshSse,
    /// Background path forwarding a parsed change event to the foreground.
    Sse { event: ChangeEvent },
    /// Background worker finished activating.
    SwActivated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// A newer worker version is installed and waiting.
    UpdateAvailable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

/// Identity claims carried by an opaque bearer credential.
///
/// Issuance belongs to the external auth service; this core only verifies
/// presence and expiry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub subject: String,
    pub expires_at_epoch_ms: u64,
}

impl Claims {
    pub fn is_expired(&self, now_epoch_ms: u64) -> bool {
        now_epoch_ms >= self.expires_at_epoch_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_wire_shape() {
        let event = ChangeEvent::for_item(
            ChangeKind::ItemUpdated,
            "list-1",
            serde_json::json!({"itemId": "item-42", "state": "checked"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"item_updated""#));
        assert!(json.contains(r#""listId":"list-1""#));
        assert!(json.contains(r#""itemId":"item-42""#));

        let parsed: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn change_event_optional_fields_absent() {
        let json = r#"{"type":"list_deleted"}"#;
        let parsed: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, ChangeKind::ListDeleted);
        assert!(parsed.list_id.is_none());
        assert!(parsed.data.is_none());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn mutation_key_reads_item_id() {
        let event = ChangeEvent::for_item(
            ChangeKind::ItemAdded,
            "list-1",
            serde_json::json!({"itemId": "item-7"}),
        );
        assert_eq!(event.mutation_key(), Some("item-7"));

        let list_event = ChangeEvent::for_list(ChangeKind::ListRenamed, "list-1");
        assert_eq!(list_event.mutation_key(), None);
    }

    #[test]
    fn worker_message_tags() {
        let msg = WorkerMessage::SetToken {
            token: "tok".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"setToken","token":"tok"}"#
        );

        let msg = WorkerMessage::RefreshSse;
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"refreshSSE"}"#
        );

        let msg = WorkerMessage::SkipWaiting;
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"skipWaiting"}"#
        );
    }

    #[test]
    fn worker_message_sse_roundtrip() {
        let msg = WorkerMessage::Sse {
            event: ChangeEvent::for_list(ChangeKind::ListCreated, "list-9"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with(r#"{"type":"sse""#));
        let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn worker_lifecycle_messages_roundtrip() {
        for msg in [
            WorkerMessage::SwActivated {
                version: Some("3".to_string()),
            },
            WorkerMessage::SwActivated { version: None },
            WorkerMessage::UpdateAvailable {
                version: Some("4".to_string()),
            },
        ] {
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, msg);
        }
    }

    #[test]
    fn claims_expiry() {
        let claims = Claims {
            subject: "alice".to_string(),
            expires_at_epoch_ms: 1_000,
        };
        assert!(!claims.is_expired(999));
        assert!(claims.is_expired(1_000));
        assert!(claims.is_expired(1_001));
    }
}
