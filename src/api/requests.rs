//! Ticket (support request) endpoints

use anyhow::{Context, Result};

use super::client::DeskClient;
use crate::models::Ticket;

/// Fetch all tickets visible to the current user.
pub async fn list_tickets_data(client: &DeskClient, limit: usize) -> Result<Vec<Ticket>> {
    let resp = client.get("/requests").await?;
    let mut tickets: Vec<Ticket> = resp.json().await.context("Failed to parse ticket list")?;
    tickets.truncate(limit);
    Ok(tickets)
}

/// Fetch a single ticket.
pub async fn get_ticket_data(client: &DeskClient, ticket_id: i64) -> Result<Ticket> {
    let resp = client.get(&format!("/requests/{}", ticket_id)).await?;
    resp.json().await.context("Failed to parse ticket")
}

/// Update a ticket. The backend requires the full representation, not a
/// partial patch.
pub async fn update_ticket_data(client: &DeskClient, ticket: &Ticket) -> Result<Ticket> {
    let body = serde_json::to_value(ticket).context("Failed to serialize ticket")?;
    let resp = client
        .put(&format!("/requests/{}", ticket.id), &body)
        .await?;
    resp.json().await.context("Failed to parse updated ticket")
}

/// List tickets (prints to stdout).
pub async fn list_tickets(limit: usize) -> Result<()> {
    let client = DeskClient::new()?;
    let tickets = list_tickets_data(&client, limit).await?;

    println!("\nTickets:");
    println!("{:-<60}", "");

    if tickets.is_empty() {
        println!("  (no tickets found)");
        return Ok(());
    }

    for ticket in &tickets {
        let status = ticket
            .status()
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        println!("#{} [{}] {}", ticket.id, status, ticket.title);
        if let Some(provider) = ticket.support_provider_id {
            println!("  assigned to: user {}", provider);
        }
        if let Some(ref created) = ticket.created_at {
            println!("  created: {}", created);
        }
        println!();
    }

    Ok(())
}
