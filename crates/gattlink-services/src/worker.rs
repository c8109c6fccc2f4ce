//! Transfer worker — owns the driver and serializes payloads through it.
//!
//! Requests that arrive while a payload is in flight are parked in the
//! pending queue, so packets of two payloads never interleave on the link.
//! Once the queue is full the worker stops reading the link channel, which
//! then fills and makes `request_send` refuse with `QueueFull`.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::driver::TransferDriver;
use crate::link::TransferRequest;
use crate::queue::PendingQueue;
use crate::report::TransferReport;

pub struct TransferWorker {
    driver: TransferDriver,
    request_rx: mpsc::Receiver<TransferRequest>,
    shutdown: broadcast::Receiver<()>,
    queue: PendingQueue<TransferRequest>,
    backlog_gap: Duration,
    backlog_due: Option<Instant>,
}

/// What the worker should do after one payload.
enum Flow {
    Continue,
    Shutdown,
}

impl TransferWorker {
    pub fn new(
        driver: TransferDriver,
        request_rx: mpsc::Receiver<TransferRequest>,
        shutdown: broadcast::Receiver<()>,
        backlog_limit: usize,
        backlog_gap: Duration,
    ) -> Self {
        Self {
            driver,
            request_rx,
            shutdown,
            queue: PendingQueue::with_capacity(backlog_limit),
            backlog_gap,
            backlog_due: None,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(queued = self.queue.len(), "transfer worker shutting down");
                    self.cancel_pending();
                    return Ok(());
                }

                _ = tokio::time::sleep_until(self.backlog_due.unwrap_or_else(Instant::now)),
                    if self.backlog_due.is_some() =>
                {
                    self.backlog_due = None;
                    if let Some(next) = self.queue.pop() {
                        tracing::debug!(transfer_id = next.id, queued = self.queue.len(), "backlog timer fired");
                        if let Flow::Shutdown = self.drive(next).await {
                            return Ok(());
                        }
                    }
                }

                msg = self.request_rx.recv() => {
                    let request = match msg {
                        Some(r) => r,
                        None => {
                            tracing::info!(queued = self.queue.len(), "transfer link dropped, draining backlog");
                            return self.drain().await;
                        }
                    };
                    let next = self.queue.admit(request);
                    if let Flow::Shutdown = self.drive(next).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one payload to the end while absorbing new requests into the queue.
    async fn drive(&mut self, request: TransferRequest) -> Flow {
        let Self {
            driver,
            request_rx,
            shutdown,
            queue,
            ..
        } = self;

        let mut shutdown_seen = false;
        let mut link_open = true;

        let report = {
            let transfer = driver.send_payload(request.id, &request.payload, &request.cancel);
            tokio::pin!(transfer);

            loop {
                tokio::select! {
                    report = &mut transfer => break report,

                    _ = shutdown.recv(), if !shutdown_seen => {
                        tracing::info!(transfer_id = request.id, "shutdown during transfer, cancelling");
                        shutdown_seen = true;
                        request.cancel.cancel();
                    }

                    msg = request_rx.recv(), if link_open && !queue.is_full() => match msg {
                        Some(parked) => {
                            tracing::debug!(
                                transfer_id = parked.id,
                                behind = request.id,
                                "transfer in flight, request queued"
                            );
                            queue.push(parked);
                        }
                        None => link_open = false,
                    },
                }
            }
        };
        request.finish(report);

        if shutdown_seen {
            self.cancel_pending();
            return Flow::Shutdown;
        }

        self.backlog_due = if self.queue.is_empty() {
            None
        } else {
            Some(Instant::now() + self.backlog_gap)
        };
        Flow::Continue
    }

    async fn drain(&mut self) -> anyhow::Result<()> {
        while let Some(next) = self.queue.pop() {
            if let Some(due) = self.backlog_due.take() {
                tokio::time::sleep_until(due).await;
            }
            if let Flow::Shutdown = self.drive(next).await {
                break;
            }
        }
        tracing::info!("transfer worker exiting");
        Ok(())
    }

    /// Report everything that never reached the driver as cancelled.
    fn cancel_pending(&mut self) {
        self.backlog_due = None;
        self.request_rx.close();

        let mut cancelled = 0usize;
        let queued: Vec<_> = self.queue.drain().collect();
        let unread = std::iter::from_fn(|| self.request_rx.try_recv().ok());
        for request in queued.into_iter().chain(unread) {
            let report = TransferReport::cancelled(request.id, request.payload.len());
            self.driver.observers().transfer(&report);
            request.finish(report);
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "pending transfers cancelled");
        }
    }
}
