//! # mtwire-client
//!
//! The runtime half of an MTProto client core.
//!
//! ## Features
//! - [`TaskDispatcher`]: submit crypto [`Operation`]s, get futures back, correlated by id
//! - [`Worker`]: a dedicated OS thread that runs those operations
//! - [`ReferenceDatabase`]: tracks file-reference contexts and refreshes expired references
//! - [`FramedTransport`]: padded-intermediate framing over any tokio stream
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mtwire_client::{Config, Refetcher, Services};
//!
//! struct NoRefetch;
//! impl Refetcher for NoRefetch {}
//!
//! #[tokio::main]
//! async fn main() {
//!     let services = Services::start(Config::default(), NoRefetch);
//!     let digest = services.dispatcher.sha256(b"hello".to_vec()).await.unwrap();
//!     println!("{}", digest.len());
//!     services.shutdown().await;
//! }
//! ```

#![deny(unsafe_code)]

mod errors;
pub mod dispatch;
pub mod file_reference;
pub mod operation;
pub mod reference_db;
pub mod transport;
pub mod worker;

pub use dispatch::{DispatcherState, PendingTask, TaskDispatcher, TaskRequest, TaskResponse};
pub use errors::{DispatchError, OperationError, RefetchError, ReferenceError, TransportError};
pub use file_reference::{ContextKind, ReferenceBytes, ReferenceContext, ReferenceUpdates, Refetcher};
pub use operation::{Operation, OperationKind, Output};
pub use reference_db::{RefreshHandle, RefreshRequest, ReferenceDatabase};
pub use transport::{FramedTransport, PaddedTransport};
pub use worker::{Worker, WorkerEvent};

pub use mtwire_crypto::{DhKeyPair, SrpParams, rsa};

use std::sync::Arc;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Services::start`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Run operations in-process when the worker cannot start (default: true).
    pub local_fallback:    bool,
    /// Name of the worker thread.
    pub worker_name:       String,
    /// Operations the worker answers; others get [`DispatchError::UnknownOperation`].
    pub worker_operations: Vec<OperationKind>,
    /// Largest incoming frame accepted by [`Services::transport`].
    pub max_frame_len:     usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_fallback:    true,
            worker_name:       "mtwire-crypto".into(),
            worker_operations: OperationKind::ALL.to_vec(),
            max_frame_len:     transport::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ─── Services ─────────────────────────────────────────────────────────────────

/// The long-lived objects of a client, built once and shared.
pub struct Services<R> {
    pub dispatcher: Arc<TaskDispatcher>,
    pub references: Arc<ReferenceDatabase<R>>,
    worker:         Option<Worker>,
    config:         Config,
}

impl<R: Refetcher> Services<R> {
    /// Build the dispatcher, start its worker and create the reference
    /// database around `refetcher`.
    ///
    /// Must be called inside a tokio runtime. A worker that fails to start
    /// leaves the dispatcher in [`DispatcherState::Failed`]; operations then
    /// follow [`Config::local_fallback`].
    pub fn start(config: Config, refetcher: R) -> Self {
        let dispatcher = Arc::new(TaskDispatcher::new(config.local_fallback));
        let worker = Worker::start(Arc::clone(&dispatcher), &config).ok();
        let references = Arc::new(ReferenceDatabase::new(refetcher));
        Self { dispatcher, references, worker, config }
    }

    /// Wrap `stream` in padded-intermediate framing with the configured frame limit.
    pub fn transport<S>(&self, stream: S) -> PaddedTransport<S>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        FramedTransport::with_max_frame_len(stream, mtwire_mtproto::PaddedIntermediate, self.config.max_frame_len)
    }

    /// Stop the worker. Outstanding tasks are rejected with
    /// [`DispatchError::BackendLost`].
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
    }
}
