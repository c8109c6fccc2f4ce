//! Transfer request API — how callers hand payloads to a link.
//!
//! `request_send` is fire-and-forget: it enqueues and returns a ticket the
//! caller may drop. Holding on to the ticket gives a per-payload
//! [`TransferReport`] and a way to cancel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::report::{TransferId, TransferReport};

/// Cooperative cancellation flag, checked at packet boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A payload waiting for, or in, the transfer driver.
#[derive(Debug)]
pub struct TransferRequest {
    pub id: TransferId,
    pub payload: Bytes,
    pub cancel: CancelToken,
    reply: Option<oneshot::Sender<TransferReport>>,
}

impl TransferRequest {
    /// A request nobody is waiting on.
    pub fn detached(id: TransferId, payload: Bytes) -> Self {
        Self {
            id,
            payload,
            cancel: CancelToken::new(),
            reply: None,
        }
    }

    /// Hand the final report back to the ticket holder, if any.
    pub fn finish(self, report: TransferReport) {
        if let Some(reply) = self.reply {
            let _ = reply.send(report);
        }
    }
}

/// Caller's handle on one requested payload.
#[derive(Debug)]
pub struct TransferTicket {
    id: TransferId,
    cancel: CancelToken,
    report_rx: oneshot::Receiver<TransferReport>,
}

impl TransferTicket {
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Stop the payload at the next packet boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the transfer to end.
    pub async fn outcome(self) -> Result<TransferReport, TransferError> {
        self.report_rx.await.map_err(|_| TransferError::Dropped(self.id))
    }
}

/// Cloneable sending side of a transfer worker.
#[derive(Debug, Clone)]
pub struct TransferLink {
    request_tx: mpsc::Sender<TransferRequest>,
    next_id: Arc<AtomicU64>,
}

/// Create a link and the request stream its worker consumes.
pub fn channel(capacity: usize) -> (TransferLink, mpsc::Receiver<TransferRequest>) {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let link = TransferLink {
        request_tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    (link, request_rx)
}

impl TransferLink {
    /// Queue a payload for transfer.
    pub fn request_send(&self, payload: impl Into<Bytes>) -> Result<TransferTicket, TransferError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, report_rx) = oneshot::channel();
        let cancel = CancelToken::new();
        let request = TransferRequest {
            id,
            payload: payload.into(),
            cancel: cancel.clone(),
            reply: Some(reply),
        };

        self.request_tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransferError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransferError::LinkClosed,
        })?;

        tracing::debug!(transfer_id = id, "transfer requested");
        Ok(TransferTicket {
            id,
            cancel,
            report_rx,
        })
    }

    /// True once the worker has gone away.
    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("transfer request queue is full")]
    QueueFull,
    #[error("transfer worker is not running")]
    LinkClosed,
    #[error("transfer {0} was dropped without a report")]
    Dropped(TransferId),
}
