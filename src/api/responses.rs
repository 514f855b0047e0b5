//! Conversation message endpoints
//!
//! Persisted messages live under `/requests/{id}/responses`; read receipts
//! under `/responses/mark-read` and `/responses/mark-conversation-read`.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::client::DeskClient;
use crate::models::{normalize_field, Attachment, ChatMessage, DeliveryState};

/// Message record as the backend returns it. Optional string fields arrive
/// in several "absent" spellings and are scrubbed during conversion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: i64,
    pub request_id: i64,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub message: Option<String>,
    pub file_name: Option<String>,
    pub file_mime_type: Option<String>,
    pub file_base64: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// Body for creating a message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResponse {
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mime_type: Option<String>,
}

impl ResponseRecord {
    /// Normalize into the canonical message shape.
    pub fn into_message(self) -> ChatMessage {
        let file_base64 = normalize_field(self.file_base64);
        let attachment = file_base64.map(|data| Attachment {
            file_name: normalize_field(self.file_name).unwrap_or_else(|| "attachment".into()),
            mime_type: normalize_field(self.file_mime_type)
                .unwrap_or_else(|| "application/octet-stream".into()),
            data_base64: data,
        });

        ChatMessage {
            server_id: Some(self.id),
            correlation_id: None,
            ticket_id: self.request_id,
            sender_id: self.sender_id,
            sender_name: normalize_field(self.sender_name).unwrap_or_else(|| "unknown".into()),
            body: normalize_field(self.message),
            attachment,
            created_at: self.created_at,
            read: self.is_read,
            delivery: DeliveryState::Sent,
        }
    }
}

/// Fetch the persisted message history for a ticket, normalized.
pub async fn history_data(client: &DeskClient, ticket_id: i64) -> Result<Vec<ChatMessage>> {
    let resp = client
        .get(&format!("/requests/{}/responses", ticket_id))
        .await?;
    let records: Vec<ResponseRecord> = resp
        .json()
        .await
        .context("Failed to parse message history")?;
    Ok(records.into_iter().map(ResponseRecord::into_message).collect())
}

/// Persist a new message, returning the server-confirmed record.
pub async fn create_response_data(
    client: &DeskClient,
    ticket_id: i64,
    body: &NewResponse,
) -> Result<ChatMessage> {
    let payload = serde_json::to_value(body).context("Failed to serialize message")?;
    let resp = client
        .post(&format!("/requests/{}/responses", ticket_id), &payload)
        .await?;
    let record: ResponseRecord = resp
        .json()
        .await
        .context("Failed to parse created message")?;
    Ok(record.into_message())
}

/// Persist a read receipt for one message.
pub async fn mark_read_data(client: &DeskClient, message_id: i64) -> Result<()> {
    client
        .post_empty(&format!("/responses/mark-read/{}", message_id))
        .await?;
    Ok(())
}

/// Persist a read receipt for an entire conversation.
pub async fn mark_conversation_read_data(client: &DeskClient, ticket_id: i64) -> Result<()> {
    client
        .post_empty(&format!("/responses/mark-conversation-read/{}", ticket_id))
        .await?;
    Ok(())
}

/// Send a message to a ticket's conversation (prints to stdout).
///
/// REST-only: without a live hub session this is the degraded send path,
/// which is exactly the durable one.
pub async fn send_message(ticket_id: i64, message: &str, attach: Option<&Path>) -> Result<()> {
    let client = DeskClient::new()?;

    let attachment = attach.map(attachment_from_path).transpose()?;
    let body = NewResponse {
        message: if message.is_empty() {
            None
        } else {
            Some(message.to_string())
        },
        file_base64: attachment.as_ref().map(|a| a.data_base64.clone()),
        file_name: attachment.as_ref().map(|a| a.file_name.clone()),
        file_mime_type: attachment.as_ref().map(|a| a.mime_type.clone()),
    };
    anyhow::ensure!(
        body.message.is_some() || body.file_base64.is_some(),
        "Nothing to send: provide a message or an attachment"
    );

    let sent = create_response_data(&client, ticket_id, &body).await?;
    match sent.server_id {
        Some(id) => println!("Sent message #{} to ticket {}.", id, ticket_id),
        None => println!("Sent message to ticket {}.", ticket_id),
    }
    Ok(())
}

/// Build an attachment payload from a local file.
pub fn attachment_from_path(path: &Path) -> Result<Attachment> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();

    Ok(Attachment {
        mime_type: guess_mime_type(&file_name).to_string(),
        file_name,
        data_base64: BASE64.encode(bytes),
    })
}

/// Minimal MIME guess from the file extension.
fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("");
    match ext.to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: Option<&str>) -> ResponseRecord {
        ResponseRecord {
            id: 501,
            request_id: 5,
            sender_id: 42,
            sender_name: Some("Dana".into()),
            message: message.map(String::from),
            file_name: None,
            file_mime_type: None,
            file_base64: None,
            created_at: Utc::now(),
            is_read: false,
        }
    }

    #[test]
    fn test_into_message_scrubs_literal_null() {
        let msg = record(Some("null")).into_message();
        assert_eq!(msg.body, None);
        assert_eq!(msg.server_id, Some(501));
        assert_eq!(msg.delivery, DeliveryState::Sent);
    }

    #[test]
    fn test_into_message_attachment_defaults() {
        let mut rec = record(None);
        rec.file_base64 = Some("aGVsbG8=".into());
        rec.file_name = Some("undefined".into());
        let msg = rec.into_message();
        let attachment = msg.attachment.expect("attachment present");
        assert_eq!(attachment.file_name, "attachment");
        assert_eq!(attachment.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_into_message_no_attachment_without_payload() {
        let mut rec = record(Some("hi"));
        // A stray file name with no payload is not an attachment.
        rec.file_name = Some("report.pdf".into());
        assert!(rec.into_message().attachment.is_none());
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("screen.PNG"), "image/png");
        assert_eq!(guess_mime_type("notes.txt"), "text/plain");
        assert_eq!(guess_mime_type("blob"), "application/octet-stream");
    }
}
