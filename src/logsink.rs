//! # logsink — Persist engine logs through the Store
//!
//! ```text
//! tracing event (sweepline::*, INFO+) ─▶ StoreLogLayer ─▶ mpsc ─▶ run_log_writer ─▶ Store::save_log
//! ```
//!
//! The layer never blocks: when the channel is full the line is dropped.
//! The writer never logs through `tracing` itself.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::models::LogEntry;
use crate::store::Store;

pub const LOG_CHANNEL_CAPACITY: usize = 1024;
const TARGET_PREFIX: &str = "sweepline";

// ─── Layer ────────────────────────────────────────────────────────────────────

pub struct StoreLogLayer {
    tx:        mpsc::Sender<LogEntry>,
    min_level: Level,
}

impl StoreLogLayer {
    /// Layer plus the receiving end for [`run_log_writer`].
    pub fn new(capacity: usize, min_level: Level) -> (Self, mpsc::Receiver<LogEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, min_level }, rx)
    }
}

impl<S: Subscriber> Layer<S> for StoreLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level ordering: ERROR < WARN < INFO < DEBUG
        if *meta.level() > self.min_level || !meta.target().starts_with(TARGET_PREFIX) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level:     meta.level().to_string(),
            target:    meta.target().to_string(),
            message:   visitor.finish(),
        };
        let _ = self.tx.try_send(entry);
    }
}

/// `message key=value key=value`
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields:  String,
}

impl LineVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

/// Drain the channel into the store until `shutdown` flips or every sender
/// is gone. Failed writes are dropped.
pub async fn run_log_writer(
    store:        Arc<dyn Store>,
    mut rx:       mpsc::Receiver<LogEntry>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            entry = rx.recv() => match entry {
                Some(entry) => {
                    let _ = store.save_log(&entry).await;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
