/// Type definitions for the Microsoft Graph chat resources this tool reads,
/// plus the internal shapes they are mapped into.
///
/// Listing endpoint: `GET /v1.0/chats?$top=N`
/// Messages endpoint: `GET /v1.0/chats/{id}/messages?$top=N`
/// Members endpoint: `GET /v1.0/chats/{id}/members`
///
/// Every response is an OData collection:
/// ```json
/// { "value": [ ... ], "@odata.nextLink": "https://graph.microsoft.com/v1.0/..." }
/// ```
///
/// Only the fields used by the exporter are modelled; everything else in a
/// record is ignored on deserialization.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::parse_loose_date;

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// A chat thread as cached in the state file's `chat_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Display name. Synthesized from member names for chats without a topic.
    pub name: String,
    /// Every member name, kept only when `name` had to be shortened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub created: String,
    pub updated: String,
    #[serde(rename = "type", default)]
    pub chat_type: String,
}

impl Conversation {
    pub fn last_update(&self) -> Option<NaiveDate> {
        parse_loose_date(&self.updated)
    }
}

/// Record of the listing endpoint.
///
/// One-on-one chats have a null `topic`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChat {
    pub id: String,
    pub topic: Option<String>,
    pub created_date_time: String,
    pub last_updated_date_time: String,
    #[serde(default)]
    pub chat_type: String,
}

/// Record of the members endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMember {
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A chat message in the shape the archive stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: String,
    /// Raw body markup (HTML for most Teams messages).
    pub body: String,
    /// Opaque attachment descriptors, rendered verbatim.
    pub attachments: Vec<Value>,
    /// ISO-8601 creation time as sent by the server.
    pub timestamp: String,
}

impl Message {
    pub fn date(&self) -> Option<NaiveDate> {
        parse_loose_date(&self.timestamp)
    }

    /// Empty body and no attachments: system artifacts not worth archiving.
    pub fn is_noise(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Record of the messages endpoint. Every field is optional so that a single
/// incomplete record can be reported instead of failing the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub message_type: Option<String>,
    pub created_date_time: Option<String>,
    pub from: Option<RawFrom>,
    pub body: Option<RawBody>,
    pub attachments: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrom {
    pub user: Option<RawUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBody {
    pub content: Option<String>,
}

/// Why a record could not be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed record: missing or invalid `{field}`")]
pub struct MalformedRecord {
    pub field: &'static str,
    /// Creation date of the record, when it could still be read.
    pub date: Option<NaiveDate>,
}

impl MalformedRecord {
    fn missing(field: &'static str) -> Self {
        Self { field, date: None }
    }

    fn dated(self, date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..self
        }
    }
}

/// Outcome of classifying one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A plain text message, with its calendar date.
    Message { message: Message, date: NaiveDate },
    /// System or control events (`chatEvent`, `systemEventMessage`, ...).
    Event,
}

impl RawMessage {
    pub fn is_plain_message(&self) -> bool {
        self.message_type.as_deref() == Some("message")
    }
}

/// Maps a raw messages-endpoint record into a [`Message`], skipping non-text
/// event types. The date is resolved first and carried by the error, so callers
/// can apply date cutoffs even to records whose sender was deleted.
pub fn classify(record: &Value) -> Result<Classified, MalformedRecord> {
    let raw = RawMessage::deserialize(record).map_err(|_| MalformedRecord::missing("record"))?;
    if raw.message_type.is_none() {
        return Err(MalformedRecord::missing("messageType"));
    }
    if !raw.is_plain_message() {
        return Ok(Classified::Event);
    }

    let timestamp = raw
        .created_date_time
        .ok_or(MalformedRecord::missing("createdDateTime"))?;
    let date = parse_loose_date(&timestamp).ok_or(MalformedRecord::missing("createdDateTime"))?;
    let sender = raw
        .from
        .and_then(|f| f.user)
        .and_then(|u| u.display_name)
        .ok_or(MalformedRecord::missing("from.user.displayName").dated(date))?;
    let body = raw
        .body
        .and_then(|b| b.content)
        .ok_or(MalformedRecord::missing("body.content").dated(date))?;
    let attachments = raw
        .attachments
        .ok_or(MalformedRecord::missing("attachments").dated(date))?;

    Ok(Classified::Message {
        message: Message {
            sender,
            body,
            attachments,
            timestamp,
        },
        date,
    })
}
