//! Desk CLI - Lightweight client for the internal IT-support desk
//!
//! A terminal client for the desk backend: tickets, conversations, the
//! kanban board, and a live view of the real-time hub.

mod api;
mod auth;
mod board;
mod config;
mod conversation;
mod hub;
mod live;
mod models;
mod presence;
mod relay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "desk-cli")]
#[command(about = "Lightweight CLI client for the internal IT-support desk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate against the desk backend
    Login {
        /// Server base URL (stored for later runs)
        #[arg(short, long)]
        server: Option<String>,

        /// Account email
        #[arg(short, long)]
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user info (verify auth works)
    Whoami,

    /// List tickets
    Tickets {
        /// Maximum number of tickets to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the kanban board (tickets by status column)
    Board,

    /// Move a ticket to another status column
    Move {
        /// Ticket id
        ticket_id: i64,

        /// Target status: new, in-progress, pending, resolved, closed
        status: String,
    },

    /// Read a ticket's conversation
    Read {
        /// Ticket id
        ticket_id: i64,
    },

    /// Send a message to a ticket's conversation
    Send {
        /// Ticket id
        #[arg(short, long)]
        to: i64,

        /// Message content
        #[arg(default_value = "")]
        message: String,

        /// Attach a file (base64-encoded into the message)
        #[arg(short, long)]
        attach: Option<PathBuf>,
    },

    /// Mark messages read
    MarkRead {
        /// Mark a whole ticket conversation read
        #[arg(short, long)]
        ticket: Option<i64>,

        /// Mark a single message read
        #[arg(short, long)]
        message: Option<i64>,
    },

    /// List reference data (departments, request types, priorities)
    Refs,

    /// Show who is online right now
    Online,

    /// Connect to the real-time hub and print live activity
    Watch {
        /// Open a ticket's conversation (join its room, chat from stdin)
        #[arg(short, long)]
        ticket: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            server,
            email,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password()?,
            };
            auth::login(server, &email, &password).await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Tickets { limit } => {
            tracing::info!("Fetching tickets...");
            api::list_tickets(limit).await?;
        }
        Commands::Board => {
            board::show_board().await?;
        }
        Commands::Move { ticket_id, status } => {
            board::move_ticket(ticket_id, &status).await?;
        }
        Commands::Read { ticket_id } => {
            conversation::read_ticket(ticket_id).await?;
        }
        Commands::Send {
            to,
            message,
            attach,
        } => {
            tracing::info!("Sending message...");
            api::send_message(to, &message, attach.as_deref()).await?;
        }
        Commands::MarkRead { ticket, message } => {
            conversation::mark_read(ticket, message).await?;
        }
        Commands::Refs => {
            api::list_reference().await?;
        }
        Commands::Online => {
            live::online().await?;
        }
        Commands::Watch { ticket } => {
            live::watch(ticket).await?;
        }
    }

    Ok(())
}

/// Read a password from stdin without extra dependencies. Echo is not
/// suppressed; pass --password in scripts.
fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
