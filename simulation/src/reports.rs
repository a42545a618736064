//! Run statistics and report files

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ferry_core::{HostAddress, Message, MessageId};
use ferry_dtn::{CopyAction, ReportSink, q_table_csv};
use ferry_learning::{Action, QTable};
use serde::Serialize;
use tracing::debug;

use crate::error::ReportError;

/// Aggregate numbers of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub created: u64,
    pub delivered: u64,
    pub copies: u64,
    pub average_copies_per_message: f64,
    pub delivery_ratio: f64,
    /// Mean creation-to-delivery time, 0 without deliveries
    pub average_latency: f64,
    pub copy_actions: usize,
}

/// In-memory report collecting everything routers emit
#[derive(Debug, Clone, Default)]
pub struct SimReport {
    created: u64,
    copies_by_message: BTreeMap<MessageId, u64>,
    delivered: BTreeSet<MessageId>,
    latency_total: f64,
    copy_actions: Vec<CopyAction>,
    snapshots: BTreeMap<HostAddress, (f64, QTable)>,
    final_tables: BTreeMap<HostAddress, QTable>,
}

impl SimReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.len() as u64
    }

    pub fn is_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    pub fn total_copies(&self) -> u64 {
        self.copies_by_message.values().sum()
    }

    pub fn copies_of(&self, id: &MessageId) -> u64 {
        self.copies_by_message.get(id).copied().unwrap_or(0)
    }

    pub fn average_copies_per_message(&self) -> f64 {
        if self.created == 0 {
            0.0
        } else {
            self.total_copies() as f64 / self.created as f64
        }
    }

    pub fn copy_actions(&self) -> &[CopyAction] {
        &self.copy_actions
    }

    /// Latest periodic Q-table of `host` with its time
    pub fn latest_snapshot(&self, host: HostAddress) -> Option<(f64, &QTable)> {
        self.snapshots.get(&host).map(|(time, table)| (*time, table))
    }

    pub fn final_table(&self, host: HostAddress) -> Option<&QTable> {
        self.final_tables.get(&host)
    }

    pub fn summary(&self) -> RunSummary {
        let delivered = self.delivered();
        RunSummary {
            created: self.created,
            delivered,
            copies: self.total_copies(),
            average_copies_per_message: self.average_copies_per_message(),
            delivery_ratio: if self.created == 0 {
                0.0
            } else {
                delivered as f64 / self.created as f64
            },
            average_latency: if delivered == 0 {
                0.0
            } else {
                self.latency_total / delivered as f64
            },
            copy_actions: self.copy_actions.len(),
        }
    }

    /// Write every report file into `dir`, returning the paths written
    pub fn persist(&self, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut written = Vec::new();
        let mut write = |name: String, contents: String| -> Result<(), ReportError> {
            let path = dir.join(name);
            fs::write(&path, contents).map_err(|source| ReportError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "Report written");
            written.push(path);
            Ok(())
        };

        write("copy_summary.txt".to_string(), self.copy_summary())?;
        write("copy_action_log.tsv".to_string(), self.copy_action_log())?;
        write(
            "run_summary.json".to_string(),
            serde_json::to_string_pretty(&self.summary())?,
        )?;
        for (host, (time, table)) in &self.snapshots {
            write(
                format!("qtable_node_{host}_status.txt"),
                q_table_status(*host, *time, table),
            )?;
        }
        for (host, table) in &self.final_tables {
            write(format!("qtable_node_{host}.csv"), q_table_csv(table))?;
        }
        Ok(written)
    }

    fn copy_summary(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(out, "Total messages created: {}", summary.created);
        let _ = writeln!(out, "Total messages delivered: {}", summary.delivered);
        let _ = writeln!(out, "Total copies: {}", summary.copies);
        let _ = writeln!(
            out,
            "Average copies per message: {:.2}",
            summary.average_copies_per_message
        );
        let _ = writeln!(out, "Delivery ratio: {:.4}", summary.delivery_ratio);
        let _ = writeln!(out, "\nmessageId\tcopies");
        for (id, copies) in &self.copies_by_message {
            let _ = writeln!(out, "{id}\t{copies}");
        }
        out
    }

    fn copy_action_log(&self) -> String {
        let mut out = String::from("messageId\tholder\tsource\tutility\tqValue\ttime\n");
        for action in &self.copy_actions {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{:.4}\t{:.4}\t{:.2}",
                action.message_id,
                action.holder,
                action.source,
                action.utility,
                action.q_value,
                action.time
            );
        }
        out
    }
}

/// Readable dump of one Q-table, one state per line
fn q_table_status(host: HostAddress, time: f64, table: &QTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Node {host} at time {time:.0}");
    let _ = writeln!(out, "States: {}", table.len());
    for (state, row) in table {
        let _ = write!(out, "{state}");
        for action in Action::ALL {
            if let Some(value) = row.get(&action) {
                let _ = write!(out, "\t{action}={value:.4}");
            }
        }
        out.push('\n');
    }
    out
}

impl ReportSink for SimReport {
    fn message_created(&mut self, message: &Message, _now: f64) {
        self.created += 1;
        self.copies_by_message.entry(message.id.clone()).or_insert(0);
    }

    fn message_copied(&mut self, id: &MessageId, _from: HostAddress, _to: HostAddress, _now: f64) {
        *self.copies_by_message.entry(id.clone()).or_insert(0) += 1;
    }

    fn message_delivered(&mut self, message: &Message, _at: HostAddress, now: f64) {
        if self.delivered.insert(message.id.clone()) {
            self.latency_total += message.age(now);
        }
    }

    fn copy_action(&mut self, action: &CopyAction) {
        self.copy_actions.push(action.clone());
    }

    fn q_table_snapshot(&mut self, host: HostAddress, now: f64, table: &QTable) {
        self.snapshots.insert(host, (now, table.clone()));
    }

    fn final_q_table(&mut self, host: HostAddress, table: &QTable) {
        self.final_tables.insert(host, table.clone());
    }
}
