//! Request/response correlation between callers and a crypto backend.
//!
//! Callers [`submit`](TaskDispatcher::submit) an [`Operation`] and get back a
//! [`PendingTask`] future. The dispatcher stamps each task with a fresh id,
//! queues it until a backend is attached, and completes the future when a
//! [`TaskResponse`] with the same id comes back.
//!
//! ```text
//!  Uninitialized ──on_backend_ready──▶ Ready
//!        │  ▲                            │
//!        │  └──────on_backend_lost───────┘
//!        └──on_backend_failed──▶ Failed (local fallback or reject)
//! ```
//!
//! The backend only ever sees [`TaskRequest`]s on a channel and answers with
//! [`TaskResponse`]s; nothing else is shared with it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use mtwire_crypto::{DhKeyPair, SrpParams, rsa};
use tokio::sync::{mpsc, oneshot};

use crate::errors::DispatchError;
use crate::operation::{Operation, OperationKind, Output};

type Outcome = Result<Output, DispatchError>;

// ─── Wire shapes ──────────────────────────────────────────────────────────────

/// A task on its way to the backend.
#[derive(Debug)]
pub struct TaskRequest {
    pub task_id:   u64,
    pub operation: Operation,
}

/// The backend's answer to one [`TaskRequest`].
#[derive(Debug)]
pub struct TaskResponse {
    pub task_id: u64,
    pub outcome: Outcome,
}

/// Observable dispatcher state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    /// No backend; submissions are queued.
    Uninitialized,
    /// Backend attached; submissions are sent right away.
    Ready,
    /// Backend failed to start; submissions run locally or reject.
    Failed,
}

enum Phase {
    Uninitialized,
    Ready(mpsc::UnboundedSender<TaskRequest>),
    Failed(String),
}

struct PendingEntry {
    operation: OperationKind,
    tx:        oneshot::Sender<Outcome>,
}

impl PendingEntry {
    fn complete(self, task_id: u64, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            tracing::trace!("[dispatch] caller of task {task_id} ({}) went away", self.operation);
        }
    }
}

struct Inner {
    phase:   Phase,
    next_id: u64,
    queue:   VecDeque<TaskRequest>,
    pending: HashMap<u64, PendingEntry>,
}

// ─── PendingTask ──────────────────────────────────────────────────────────────

/// Future returned by [`TaskDispatcher::submit`].
///
/// Dropping it does not cancel the task; its result is discarded.
#[must_use = "a PendingTask does nothing unless awaited"]
pub struct PendingTask {
    task_id:   u64,
    operation: OperationKind,
    rx:        oneshot::Receiver<Outcome>,
}

impl PendingTask {
    /// Correlation id assigned at submission.
    pub fn id(&self) -> u64 { self.task_id }

    /// Which operation this task runs.
    pub fn operation(&self) -> OperationKind { self.operation }
}

impl Future for PendingTask {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(DispatchError::BackendLost)))
    }
}

// ─── TaskDispatcher ───────────────────────────────────────────────────────────

/// Correlates submitted operations with backend responses.
///
/// All methods are synchronous and take `&self`; share it behind an `Arc`.
pub struct TaskDispatcher {
    inner:          Mutex<Inner>,
    local_fallback: bool,
}

impl TaskDispatcher {
    /// Create a dispatcher with no backend.
    ///
    /// With `local_fallback`, a dispatcher whose backend failed to start runs
    /// operations on the caller's thread instead of rejecting them.
    pub fn new(local_fallback: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase:   Phase::Uninitialized,
                next_id: 0,
                queue:   VecDeque::new(),
                pending: HashMap::new(),
            }),
            local_fallback,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        match self.lock().phase {
            Phase::Uninitialized => DispatcherState::Uninitialized,
            Phase::Ready(_)      => DispatcherState::Ready,
            Phase::Failed(_)     => DispatcherState::Failed,
        }
    }

    /// Tasks submitted and not yet answered.
    pub fn pending_count(&self) -> usize { self.lock().pending.len() }

    /// Tasks waiting for a backend.
    pub fn queued_count(&self) -> usize { self.lock().queue.len() }

    /// Submit `operation`. The id is assigned before this returns, so
    /// submission order is call order.
    pub fn submit(&self, operation: Operation) -> PendingTask {
        let kind = operation.kind();
        let (tx, rx) = oneshot::channel();

        let mut inner = self.lock();
        let task_id = inner.next_id;
        inner.next_id += 1;
        let task = PendingTask { task_id, operation: kind, rx };
        let entry = PendingEntry { operation: kind, tx };

        if let Phase::Failed(reason) = &inner.phase {
            let reason = reason.clone();
            drop(inner);
            entry.complete(task_id, self.run_locally(operation, &reason));
            return task;
        }

        inner.pending.insert(task_id, entry);
        let request = TaskRequest { task_id, operation };
        let backend = match &inner.phase {
            Phase::Ready(backend) => backend.clone(),
            _ => {
                inner.queue.push_back(request);
                tracing::trace!("[dispatch] queued task {task_id} ({kind})");
                return task;
            }
        };

        if backend.send(request).is_err() {
            tracing::warn!("[dispatch] backend channel closed, task {task_id} ({kind}) rejected");
            if let Some(entry) = inner.pending.remove(&task_id) {
                drop(inner);
                entry.complete(task_id, Err(DispatchError::BackendLost));
            }
            return task;
        }
        tracing::trace!("[dispatch] sent task {task_id} ({kind})");
        task
    }

    fn run_locally(&self, operation: Operation, reason: &str) -> Outcome {
        if self.local_fallback {
            tracing::debug!("[dispatch] running {} in-process", operation.kind());
            operation.run_isolated()
        } else {
            Err(DispatchError::BackendUnavailable(reason.to_string()))
        }
    }

    /// Attach a backend: flush queued tasks to it in submission order.
    ///
    /// Ignored once the dispatcher has [failed](DispatcherState::Failed).
    pub fn on_backend_ready(&self, backend: mpsc::UnboundedSender<TaskRequest>) {
        let mut inner = self.lock();
        if let Phase::Failed(_) = inner.phase {
            tracing::warn!("[dispatch] backend ready after failure, ignoring");
            return;
        }

        let mut flushed = 0usize;
        let mut lost = Vec::new();
        while let Some(request) = inner.queue.pop_front() {
            if let Err(mpsc::error::SendError(request)) = backend.send(request) {
                lost.push(request.task_id);
                lost.extend(inner.queue.drain(..).map(|r| r.task_id));
                break;
            }
            flushed += 1;
        }

        if lost.is_empty() {
            inner.phase = Phase::Ready(backend);
            tracing::info!("[dispatch] backend ready, flushed {flushed} queued task(s)");
            return;
        }

        // The backend hung up while we were flushing.
        inner.phase = Phase::Uninitialized;
        let entries: Vec<_> = lost.into_iter()
            .filter_map(|id| inner.pending.remove(&id).map(|e| (id, e)))
            .collect();
        drop(inner);
        tracing::warn!("[dispatch] backend closed during flush, rejecting {} task(s)", entries.len());
        for (id, entry) in entries {
            entry.complete(id, Err(DispatchError::BackendLost));
        }
    }

    /// Complete the task `response.task_id`. Unknown ids are ignored.
    pub fn on_response(&self, response: TaskResponse) {
        let TaskResponse { task_id, outcome } = response;
        let entry = self.lock().pending.remove(&task_id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    "[dispatch] task {task_id} ({}) done: {}",
                    entry.operation,
                    if outcome.is_ok() { "ok" } else { "error" },
                );
                entry.complete(task_id, outcome);
            }
            None => tracing::warn!("[dispatch] ignoring response for unknown task {task_id}"),
        }
    }

    /// The backend disconnected: reject every outstanding task with
    /// [`DispatchError::BackendLost`] and wait for a new backend.
    pub fn on_backend_lost(&self) {
        let mut inner = self.lock();
        if let Phase::Failed(_) = inner.phase {
            return;
        }
        inner.phase = Phase::Uninitialized;
        inner.queue.clear();
        let entries: Vec<_> = inner.pending.drain().collect();
        drop(inner);

        if !entries.is_empty() {
            tracing::warn!("[dispatch] backend lost with {} task(s) outstanding", entries.len());
        }
        for (id, entry) in entries {
            entry.complete(id, Err(DispatchError::BackendLost));
        }
    }

    /// Drop the current backend without failing outstanding tasks yet; the
    /// backend's own shutdown reports the loss.
    pub fn detach(&self) {
        let mut inner = self.lock();
        if let Phase::Ready(_) = inner.phase {
            inner.phase = Phase::Uninitialized;
        }
    }

    /// The backend could not be started. Enter [`DispatcherState::Failed`]
    /// and settle every task: locally when fallback is enabled, otherwise
    /// with [`DispatchError::BackendUnavailable`].
    pub fn on_backend_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.lock();
        inner.phase = Phase::Failed(reason.clone());

        let queued: Vec<_> = inner.queue.drain(..).collect();
        let mut work = Vec::with_capacity(queued.len());
        for request in queued {
            if let Some(entry) = inner.pending.remove(&request.task_id) {
                work.push((request, entry));
            }
        }
        // Anything still pending was already handed to a backend.
        let orphaned: Vec<_> = inner.pending.drain().collect();
        drop(inner);

        tracing::warn!(
            "[dispatch] backend failed ({reason}); settling {} queued task(s) {}",
            work.len(),
            if self.local_fallback { "in-process" } else { "with errors" },
        );
        for (request, entry) in work {
            let outcome = self.run_locally(request.operation, &reason);
            entry.complete(request.task_id, outcome);
        }
        for (id, entry) in orphaned {
            entry.complete(id, Err(DispatchError::BackendLost));
        }
    }

    // ─── Typed helpers ────────────────────────────────────────────────────────

    /// SHA-1 of `data`.
    pub async fn sha1(&self, data: impl Into<Vec<u8>>) -> Result<[u8; 20], DispatchError> {
        self.submit(Operation::Sha1(data.into())).await?.into_array(OperationKind::Sha1)
    }

    /// SHA-256 of `data`.
    pub async fn sha256(&self, data: impl Into<Vec<u8>>) -> Result<[u8; 32], DispatchError> {
        self.submit(Operation::Sha256(data.into())).await?.into_array(OperationKind::Sha256)
    }

    /// PBKDF2-HMAC-SHA512.
    pub async fn pbkdf2(
        &self,
        password:   impl Into<Vec<u8>>,
        salt:       impl Into<Vec<u8>>,
        iterations: u32,
    ) -> Result<[u8; 64], DispatchError> {
        let op = Operation::Pbkdf2 { password: password.into(), salt: salt.into(), iterations };
        self.submit(op).await?.into_array(OperationKind::Pbkdf2)
    }

    /// AES-256-IGE encrypt.
    pub async fn aes_encrypt(&self, data: Vec<u8>, key: [u8; 32], iv: [u8; 32]) -> Result<Vec<u8>, DispatchError> {
        self.submit(Operation::AesIgeEncrypt { data, key, iv }).await?.into_bytes(OperationKind::AesIgeEncrypt)
    }

    /// AES-256-IGE decrypt.
    pub async fn aes_decrypt(&self, data: Vec<u8>, key: [u8; 32], iv: [u8; 32]) -> Result<Vec<u8>, DispatchError> {
        self.submit(Operation::AesIgeDecrypt { data, key, iv }).await?.into_bytes(OperationKind::AesIgeDecrypt)
    }

    /// RSA-PAD encrypt `data` for `key`.
    pub async fn rsa_encrypt(&self, data: Vec<u8>, key: rsa::Key) -> Result<Vec<u8>, DispatchError> {
        self.submit(Operation::RsaEncrypt { data, key }).await?.into_bytes(OperationKind::RsaEncrypt)
    }

    /// Split `pq` into `(p, q)` with `p ≤ q`.
    pub async fn factorize(&self, pq: u64) -> Result<(u64, u64), DispatchError> {
        self.submit(Operation::Factorize(pq)).await?.into_factors(OperationKind::Factorize)
    }

    /// `base ^ exponent mod modulus`.
    pub async fn mod_pow(&self, base: Vec<u8>, exponent: Vec<u8>, modulus: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        self.submit(Operation::ModPow { base, exponent, modulus }).await?.into_bytes(OperationKind::ModPow)
    }

    /// Inflate a gzip payload.
    pub async fn gzip_uncompress(&self, data: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        self.submit(Operation::GzipUncompress(data)).await?.into_bytes(OperationKind::GzipUncompress)
    }

    /// SRP `(M1, g_a)` for 2FA.
    pub async fn compute_srp(&self, params: SrpParams, password: impl Into<Vec<u8>>) -> Result<([u8; 32], Vec<u8>), DispatchError> {
        let op = Operation::ComputeSrp { params, password: password.into() };
        self.submit(op).await?.into_srp(OperationKind::ComputeSrp)
    }

    /// Fresh DH key pair `(a, g_a, sha256(g_a))` for the group `(g, p)`.
    pub async fn generate_dh(&self, g: u32, p: Vec<u8>) -> Result<DhKeyPair, DispatchError> {
        self.submit(Operation::GenerateDh { g, p }).await?.into_dh(OperationKind::GenerateDh)
    }

    /// Auth key material `g_b ^ a mod p`.
    pub async fn compute_dh_key(&self, g_b: Vec<u8>, a: Vec<u8>, p: Vec<u8>) -> Result<[u8; 256], DispatchError> {
        self.submit(Operation::ComputeDhKey { g_b, a, p }).await?.into_array(OperationKind::ComputeDhKey)
    }

    /// Indices into the call emoji table for `key` and `g_a`.
    pub async fn emojis_fingerprint(&self, key: Vec<u8>, g_a: Vec<u8>) -> Result<[u16; 4], DispatchError> {
        self.submit(Operation::EmojisFingerprint { key, g_a }).await?.into_emojis(OperationKind::EmojisFingerprint)
    }
}
