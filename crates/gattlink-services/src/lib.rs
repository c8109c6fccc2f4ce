//! gattlink-services — the transfer engine: driver, queue, worker, and
//! the request API callers hand payloads to.

pub mod driver;
pub mod link;
pub mod loopback;
pub mod observer;
pub mod queue;
pub mod report;
pub mod tracker;
pub mod worker;
pub mod writer;

pub use driver::{DriverSettings, TransferDriver};
pub use link::{channel, CancelToken, TransferError, TransferLink, TransferRequest, TransferTicket};
pub use loopback::LoopbackPeripheral;
pub use observer::{ObserverRegistry, TransferObserver};
pub use queue::PendingQueue;
pub use report::{PacketEvent, TransferId, TransferOutcome, TransferReport};
pub use tracker::{TransferStats, TransferTracker};
pub use worker::TransferWorker;
pub use writer::{CompletionSignal, CompletionWaiter, PacketWriter};
