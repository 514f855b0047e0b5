//! Kanban board: status columns and card moves
//!
//! A "move" is the CLI analog of dragging a card to another status column.
//! The backend takes the full ticket representation on update and stays the
//! authority on which transitions are legal; this client sends any
//! column-to-column move and lets the server reject the bad ones.

use anyhow::{Context, Result};

use crate::api::{client::DeskClient, requests};
use crate::models::{Ticket, TicketStatus};

/// Tickets grouped into status columns.
pub struct Board {
    tickets: Vec<Ticket>,
}

impl Board {
    pub fn from_tickets(tickets: Vec<Ticket>) -> Self {
        Self { tickets }
    }

    /// Tickets in one status column, in list order.
    pub fn column(&self, status: TicketStatus) -> Vec<&Ticket> {
        self.tickets
            .iter()
            .filter(|t| t.request_status_id == status.id())
            .collect()
    }

    pub fn ticket(&self, ticket_id: i64) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == ticket_id)
    }
}

/// Outcome of a card move.
pub enum MoveOutcome {
    /// Dropped on its current column; nothing was sent.
    NoChange,
    /// Updated on the server; carries the re-fetched ticket list.
    Moved(Vec<Ticket>),
}

/// Plan a status transition.
///
/// Returns `None` for a same-column drop — no spurious write. Otherwise the
/// full updated representation: new status, and the acting support user
/// takes over as the ticket's provider.
pub fn plan_move(ticket: &Ticket, target: TicketStatus, actor_id: i64) -> Option<Ticket> {
    if ticket.request_status_id == target.id() {
        return None;
    }
    let mut updated = ticket.clone();
    updated.request_status_id = target.id();
    updated.support_provider_id = Some(actor_id);
    Some(updated)
}

/// Apply a card move against the backend.
///
/// On success the ticket list is re-fetched — the server stays the source of
/// truth, local state is never patched optimistically.
pub async fn move_card(
    client: &DeskClient,
    board: &Board,
    ticket_id: i64,
    target: TicketStatus,
) -> Result<MoveOutcome> {
    let ticket = board
        .ticket(ticket_id)
        .with_context(|| format!("Ticket {} not found", ticket_id))?;
    let actor_id = client
        .profile()
        .context("No stored profile. Run 'desk-cli login' again.")?
        .id;

    let Some(updated) = plan_move(ticket, target, actor_id) else {
        return Ok(MoveOutcome::NoChange);
    };

    requests::update_ticket_data(client, &updated).await?;
    let fresh = requests::list_tickets_data(client, usize::MAX).await?;
    Ok(MoveOutcome::Moved(fresh))
}

/// Print the board (columns of ticket cards).
pub async fn show_board() -> Result<()> {
    let client = DeskClient::new()?;
    let tickets = requests::list_tickets_data(&client, usize::MAX).await?;
    let board = Board::from_tickets(tickets);

    for status in TicketStatus::ALL {
        let column = board.column(status);
        println!("\n[{}] ({})", status.as_str(), column.len());
        println!("{:-<40}", "");
        for ticket in column {
            println!("  #{} {}", ticket.id, ticket.title);
        }
    }
    println!();

    Ok(())
}

/// Move a ticket to another status column (prints the outcome).
pub async fn move_ticket(ticket_id: i64, status_name: &str) -> Result<()> {
    let target = TicketStatus::parse(status_name).with_context(|| {
        format!(
            "Unknown status '{}'. Use: new, in-progress, pending, resolved, closed",
            status_name
        )
    })?;

    let client = DeskClient::new()?;
    let tickets = requests::list_tickets_data(&client, usize::MAX).await?;
    let board = Board::from_tickets(tickets);

    match move_card(&client, &board, ticket_id, target).await? {
        MoveOutcome::NoChange => {
            println!("Ticket #{} is already {}.", ticket_id, target.as_str());
        }
        MoveOutcome::Moved(_) => {
            println!("Ticket #{} moved to {}.", ticket_id, target.as_str());
        }
    }

    Ok(())
}
