use super::notification::UploadNotification;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One queue message whose records are processed as separate units.
///
/// The message may only be deleted once every one of its units is done,
/// so the last unit to finish decides whether the receipt is released.
#[derive(Debug)]
pub struct ReceiptGroup {
    receipt: String,
    pending: AtomicUsize,
    failed: AtomicBool,
}

impl ReceiptGroup {
    pub fn new(receipt: impl Into<String>, units: usize) -> Arc<Self> {
        Arc::new(Self {
            receipt: receipt.into(),
            pending: AtomicUsize::new(units),
            failed: AtomicBool::new(false),
        })
    }

    pub fn receipt(&self) -> &str {
        &self.receipt
    }

    /// Withholds deletion regardless of how the remaining units end.
    pub fn poison(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Returns true when the caller finished the last outstanding unit and
    /// no unit of the group failed.
    fn complete(&self) -> bool {
        self.release() == Some(1) && !self.failed.load(Ordering::Acquire)
    }

    fn abandon(&self) {
        self.poison();
        self.release();
    }

    /// Units still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Decrements `pending` without going below zero, returning the
    /// previous count. A unit that panics after completing may release twice.
    fn release(&self) -> Option<usize> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
    }
}

/// How a unit is acknowledged back to its source.
#[derive(Debug, Clone)]
pub enum AckHandle {
    /// Push delivery: a successful return acknowledges the whole batch.
    Implicit,
    /// Poll delivery: the message must be deleted by receipt.
    Receipt(Arc<ReceiptGroup>),
}

impl AckHandle {
    /// Records success. Yields the receipt to delete if this unit released it.
    pub fn complete(&self) -> Option<&str> {
        match self {
            AckHandle::Implicit => None,
            AckHandle::Receipt(group) => group.complete().then(|| group.receipt()),
        }
    }

    /// Records terminal failure; the message stays on the queue.
    pub fn abandon(&self) {
        if let AckHandle::Receipt(group) = self {
            group.abandon();
        }
    }
}

/// One notification plus its acknowledgment handle.
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    /// Position in the dispatched batch, for log correlation.
    pub index: usize,
    pub notification: UploadNotification,
    pub ack: AckHandle,
}

impl ProcessingUnit {
    pub fn new(index: usize, notification: UploadNotification, ack: AckHandle) -> Self {
        Self {
            index,
            notification,
            ack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Received,
    Fetching,
    Decoding,
    Resizing,
    Encoding,
    Storing,
    Acknowledging,
    Done,
    Failed(&'static str),
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Received => write!(f, "received"),
            UnitState::Fetching => write!(f, "fetching"),
            UnitState::Decoding => write!(f, "decoding"),
            UnitState::Resizing => write!(f, "resizing"),
            UnitState::Encoding => write!(f, "encoding"),
            UnitState::Storing => write!(f, "storing"),
            UnitState::Acknowledging => write!(f, "acknowledging"),
            UnitState::Done => write!(f, "done"),
            UnitState::Failed(reason) => write!(f, "failed({})", reason),
        }
    }
}

/// What happened at the acknowledge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Push mode; the batch return value acknowledges.
    Implicit,
    /// The message was deleted.
    Deleted,
    /// Sibling units of the same message are still outstanding or failed.
    Deferred,
    /// Deletion was attempted and failed; the store is kept.
    Failed,
}

/// Successful end of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Stored {
        derived_key: String,
        width: u32,
        height: u32,
        acknowledgement: Acknowledgement,
    },
    /// The key is already a derivative (recursion guard).
    Skipped { acknowledgement: Acknowledgement },
}

impl UnitOutcome {
    pub fn acknowledgement(&self) -> Acknowledgement {
        match self {
            UnitOutcome::Stored {
                acknowledgement, ..
            }
            | UnitOutcome::Skipped { acknowledgement } => *acknowledgement,
        }
    }
}
