//! Reporting hooks
//!
//! Routers report through a [`ReportSink`] passed to them explicitly on
//! every call (via [`RouterContext`](crate::router::RouterContext)); there
//! is no global monitor. All hooks default to no-ops so a sink only
//! implements what it aggregates.

use ferry_core::{HostAddress, Message, MessageId};
use ferry_learning::QTable;
use serde::{Deserialize, Serialize};

/// One replication decision taken by an adaptive router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyAction {
    pub message_id: MessageId,
    /// Host that accepted the replica
    pub holder: HostAddress,
    /// Host the replica came from
    pub source: HostAddress,
    /// Holder's TOPP utility at decision time
    pub utility: f64,
    /// Holder's FORWARD value at decision time
    pub q_value: f64,
    pub time: f64,
}

/// Receiver of routing events
pub trait ReportSink {
    fn message_created(&mut self, _message: &Message, _now: f64) {}

    fn message_copied(&mut self, _id: &MessageId, _from: HostAddress, _to: HostAddress, _now: f64) {}

    fn message_delivered(&mut self, _message: &Message, _at: HostAddress, _now: f64) {}

    fn copy_action(&mut self, _action: &CopyAction) {}

    /// Periodic Q-table dump of one host
    fn q_table_snapshot(&mut self, _host: HostAddress, _now: f64, _table: &QTable) {}

    /// Q-table of one host at the end of the run
    fn final_q_table(&mut self, _host: HostAddress, _table: &QTable) {}
}

/// A recorded routing event
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    Created {
        id: MessageId,
        now: f64,
    },
    Copied {
        id: MessageId,
        from: HostAddress,
        to: HostAddress,
        now: f64,
    },
    Delivered {
        id: MessageId,
        at: HostAddress,
        now: f64,
    },
    CopyAction(CopyAction),
    Snapshot {
        host: HostAddress,
        now: f64,
        states: usize,
    },
    FinalTable {
        host: HostAddress,
        states: usize,
    },
}

/// Sink that keeps every event in order
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    pub events: Vec<ReportEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> impl Iterator<Item = &MessageId> {
        self.events.iter().filter_map(|e| match e {
            ReportEvent::Delivered { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn copies(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ReportEvent::Copied { .. }))
            .count()
    }

    pub fn copy_actions(&self) -> impl Iterator<Item = &CopyAction> {
        self.events.iter().filter_map(|e| match e {
            ReportEvent::CopyAction(action) => Some(action),
            _ => None,
        })
    }
}

impl ReportSink for EventLog {
    fn message_created(&mut self, message: &Message, now: f64) {
        self.events.push(ReportEvent::Created {
            id: message.id.clone(),
            now,
        });
    }

    fn message_copied(&mut self, id: &MessageId, from: HostAddress, to: HostAddress, now: f64) {
        self.events.push(ReportEvent::Copied {
            id: id.clone(),
            from,
            to,
            now,
        });
    }

    fn message_delivered(&mut self, message: &Message, at: HostAddress, now: f64) {
        self.events.push(ReportEvent::Delivered {
            id: message.id.clone(),
            at,
            now,
        });
    }

    fn copy_action(&mut self, action: &CopyAction) {
        self.events.push(ReportEvent::CopyAction(action.clone()));
    }

    fn q_table_snapshot(&mut self, host: HostAddress, now: f64, table: &QTable) {
        self.events.push(ReportEvent::Snapshot {
            host,
            now,
            states: table.len(),
        });
    }

    fn final_q_table(&mut self, host: HostAddress, table: &QTable) {
        self.events.push(ReportEvent::FinalTable {
            host,
            states: table.len(),
        });
    }
}
