//! Ticket (support request) models

use serde::{Deserialize, Serialize};

/// Ticket status. Numeric ids match the backend's reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    New,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// All statuses in board-column order.
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::New,
        TicketStatus::InProgress,
        TicketStatus::Pending,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    /// Backend reference-table id for this status.
    pub fn id(&self) -> i64 {
        match self {
            TicketStatus::New => 1,
            TicketStatus::InProgress => 2,
            TicketStatus::Pending => 3,
            TicketStatus::Resolved => 4,
            TicketStatus::Closed => 5,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// Parse a user-supplied status name (CLI input).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().replace(['-', '_'], "").as_str() {
            "new" => Some(TicketStatus::New),
            "inprogress" => Some(TicketStatus::InProgress),
            "pending" => Some(TicketStatus::Pending),
            "resolved" => Some(TicketStatus::Resolved),
            "closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::InProgress => "in-progress",
            TicketStatus::Pending => "pending",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

/// Support request, in the full representation the backend expects on PUT.
///
/// The update endpoint takes the whole object, not a partial patch, so every
/// field we receive must round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub request_status_id: i64,
    pub requester_id: i64,
    pub support_provider_id: Option<i64>,
    pub department_id: Option<i64>,
    pub request_type_id: Option<i64>,
    pub priority_id: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Ticket {
    pub fn status(&self) -> Option<TicketStatus> {
        TicketStatus::from_id(self.request_status_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_id_roundtrip() {
        for status in TicketStatus::ALL {
            assert_eq!(TicketStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(TicketStatus::from_id(0), None);
        assert_eq!(TicketStatus::from_id(6), None);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TicketStatus::parse("in-progress"), Some(TicketStatus::InProgress));
        assert_eq!(TicketStatus::parse("InProgress"), Some(TicketStatus::InProgress));
        assert_eq!(TicketStatus::parse("CLOSED"), Some(TicketStatus::Closed));
        assert_eq!(TicketStatus::parse("reopened"), None);
    }
}
