//! REST API client for the support-desk backend

pub mod client;
mod me;
pub mod reference;
pub mod requests;
pub mod responses;

use anyhow::Result;
use std::path::Path;

pub use client::DeskClient;
pub use responses::NewResponse;

/// Send a message to a ticket's conversation (REST-only path)
pub async fn send_message(ticket_id: i64, message: &str, attach: Option<&Path>) -> Result<()> {
    responses::send_message(ticket_id, message, attach).await
}

/// List tickets visible to the current user
pub async fn list_tickets(limit: usize) -> Result<()> {
    requests::list_tickets(limit).await
}

/// List reference data (departments, request types, priorities)
pub async fn list_reference() -> Result<()> {
    reference::list_reference().await
}

/// Show current user info
pub async fn whoami() -> Result<()> {
    me::whoami().await
}
