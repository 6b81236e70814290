//! Audit hook.
//!
//! After every successful create, update, delete or deactivate the entity
//! manager hands an [`AuditRecord`] to the injected [`AuditSink`]. Audit
//! is fire-and-forget: a failing sink is logged and never fails the
//! operation that triggered it.
//!
//! # Usage
//!
//! ```rust,ignore
//! let feed = Arc::new(ChannelAuditSink::new());
//! let receiver = feed.subscribe();
//! let env = Environment::open_with(config, schema, feed.clone())?;
//!
//! std::thread::spawn(move || {
//!     while let Ok(record) = receiver.recv() {
//!         ship(record);
//!     }
//! });
//! ```

use crate::types::Operation;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

/// One audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Entity type.
    pub entity_type: String,
    /// Rendered entity key.
    pub key: String,
    /// Principal named by the unit of work.
    pub actor: String,
    /// The operation.
    pub operation: Operation,
    /// When the native operation completed.
    pub timestamp: SystemTime,
}

/// Failure to deliver an audit record.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Every subscriber went away.
    #[error("audit subscribers disconnected")]
    Disconnected,
    /// The sink refused the record.
    #[error("audit sink rejected record: {0}")]
    Rejected(String),
}

/// Receives audit records.
pub trait AuditSink: Send + Sync {
    /// Delivers one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be delivered.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Logs records through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        info!(
            target: "strata::audit",
            entity_type = %record.entity_type,
            key = %record.key,
            actor = %record.actor,
            operation = %record.operation,
            "audit"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far, in delivery order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Number of records received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Fans records out to channel subscribers and keeps a bounded history.
#[derive(Debug)]
pub struct ChannelAuditSink {
    subscribers: RwLock<Vec<Sender<AuditRecord>>>,
    history: RwLock<Vec<AuditRecord>>,
    max_history: usize,
}

impl Default for ChannelAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelAuditSink {
    /// Creates a sink keeping the last 1000 records.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1000)
    }

    /// Creates a sink with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to future records.
    ///
    /// Poll the receiver regularly; undelivered records accumulate in it.
    pub fn subscribe(&self) -> Receiver<AuditRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Up to `limit` most recent records, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let history = self.history.read();
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        {
            let mut history = self.history.write();
            history.push(record.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(record.clone()).is_ok());
        if before > 0 && subscribers.is_empty() {
            return Err(AuditError::Disconnected);
        }
        Ok(())
    }
}

/// Delivers a record, logging instead of failing.
pub(crate) fn emit(sink: &dyn AuditSink, record: &AuditRecord) {
    if let Err(e) = sink.record(record) {
        warn!(
            entity_type = %record.entity_type,
            key = %record.key,
            operation = %record.operation,
            error = %e,
            "audit sink failed"
        );
    }
}
