//! Dedicated crypto thread that backs a [`TaskDispatcher`].
//!
//! The thread owns no shared state: it receives [`TaskRequest`]s, runs them,
//! and sends [`WorkerEvent`]s back. A small tokio task pumps those events into
//! the dispatcher.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::Config;
use crate::dispatch::{TaskDispatcher, TaskRequest, TaskResponse};
use crate::errors::DispatchError;
use crate::operation::OperationKind;

/// Message from the worker thread to the dispatcher.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The thread is up; sent once, before any response.
    Ready,
    /// Answer to one request.
    Response(TaskResponse),
}

/// Handle to a running crypto worker.
pub struct Worker {
    stop:   Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    pump:   Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread and attach it to `dispatcher`.
    ///
    /// Must be called inside a tokio runtime. If the thread cannot be spawned
    /// the dispatcher is moved to [`Failed`](crate::DispatcherState::Failed)
    /// and the error is returned.
    pub fn start(dispatcher: Arc<TaskDispatcher>, config: &Config) -> io::Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<TaskRequest>();
        let (event_tx, event_rx)     = mpsc::unbounded_channel::<WorkerEvent>();
        let supported: HashSet<OperationKind> = config.worker_operations.iter().copied().collect();

        let thread = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || worker_loop(request_rx, event_tx, supported));

        let thread = match thread {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("[worker] could not spawn crypto thread: {e}");
                dispatcher.on_backend_failed(e.to_string());
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_events(dispatcher, event_rx, request_tx, stop_rx));
        tracing::info!("[worker] started thread {:?}", config.worker_name);
        Ok(Self { stop: Some(stop_tx), thread: Some(thread), pump: Some(pump) })
    }

    /// Stop the worker: detach it from the dispatcher, let the thread drain,
    /// and wait for both the thread and the pump to finish.
    ///
    /// Tasks still outstanding are rejected with
    /// [`DispatchError::BackendLost`].
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tracing::warn!("[worker] event pump ended abnormally: {e}");
            }
        }
        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("[worker] crypto thread did not exit cleanly");
            }
        }
        tracing::info!("[worker] stopped");
    }
}

/// Forwards worker events to the dispatcher. Holds the only request sender
/// until the thread reports ready, then hands it over.
///
/// A stop signal (or dropping the [`Worker`]) detaches the backend; the
/// thread then drains and exits, which closes the event channel. If the
/// channel closes without a stop, the thread died: the dispatcher is failed
/// so later submissions follow the local fallback instead of queueing.
async fn pump_events(
    dispatcher: Arc<TaskDispatcher>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    request_tx: mpsc::UnboundedSender<TaskRequest>,
    mut stop:   oneshot::Receiver<()>,
) {
    let mut request_tx = Some(request_tx);
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = &mut stop, if !stopping => {
                stopping = true;
                request_tx = None;
                dispatcher.detach();
            }
            event = events.recv() => match event {
                Some(WorkerEvent::Ready) => match request_tx.take() {
                    Some(tx) => dispatcher.on_backend_ready(tx),
                    None if stopping => {}
                    None => tracing::warn!("[worker] duplicate ready event"),
                },
                Some(WorkerEvent::Response(resp)) => dispatcher.on_response(resp),
                None => break,
            },
        }
    }
    if stopping {
        tracing::debug!("[worker] event channel closed");
        dispatcher.on_backend_lost();
    } else {
        tracing::error!("[worker] crypto thread exited unexpectedly");
        dispatcher.on_backend_failed("crypto thread exited unexpectedly");
    }
}

fn worker_loop(
    mut requests: mpsc::UnboundedReceiver<TaskRequest>,
    events:       mpsc::UnboundedSender<WorkerEvent>,
    supported:    HashSet<OperationKind>,
) {
    if events.send(WorkerEvent::Ready).is_err() {
        return;
    }
    while let Some(TaskRequest { task_id, operation }) = requests.blocking_recv() {
        let kind = operation.kind();
        let outcome = if supported.contains(&kind) {
            operation.run_isolated()
        } else {
            Err(DispatchError::UnknownOperation(kind))
        };
        if events.send(WorkerEvent::Response(TaskResponse { task_id, outcome })).is_err() {
            break;
        }
    }
}
