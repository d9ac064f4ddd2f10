//! Error types for mtwire-client.

use std::io;

use mtwire_crypto::CryptoError;
use mtwire_mtproto::FrameError;

use crate::operation::OperationKind;
use crate::file_reference::ContextKind;

// ─── OperationError ───────────────────────────────────────────────────────────

/// A crypto primitive rejected its input.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{op}: {source}")]
pub struct OperationError {
    /// Which operation failed.
    pub op:     OperationKind,
    /// What the primitive reported.
    pub source: CryptoError,
}

// ─── DispatchError ────────────────────────────────────────────────────────────

/// The error a dispatched task resolves with.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The backend went away while the task was outstanding.
    #[error("crypto backend lost")]
    BackendLost,
    /// The backend failed to start and local fallback is disabled.
    #[error("crypto backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The backend has no implementation of the requested operation.
    #[error("backend does not implement {0}")]
    UnknownOperation(OperationKind),
    /// The operation ran and failed.
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// The operation panicked; only this task was affected.
    #[error("{0} panicked")]
    Panicked(OperationKind),
    /// The backend answered with an output of the wrong shape.
    #[error("unexpected output for {0}")]
    UnexpectedOutput(OperationKind),
}

impl DispatchError {
    /// Returns `true` for [`DispatchError::BackendLost`]; the caller may retry
    /// once a backend is attached again.
    pub fn is_backend_lost(&self) -> bool {
        matches!(self, Self::BackendLost)
    }
}

// ─── RefetchError ─────────────────────────────────────────────────────────────

/// Failure reported by a [`crate::Refetcher`] collaborator.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RefetchError {
    /// The collaborator cannot refetch this kind of context.
    #[error("refetch not implemented")]
    NotImplemented,
    /// The refetch request itself failed (network, RPC error, …).
    #[error("refetch failed: {0}")]
    Failed(String),
}

// ─── ReferenceError ───────────────────────────────────────────────────────────

/// Why a file reference could not be refreshed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ReferenceError {
    /// No context is registered for the reference.
    #[error("NO_CONTEXT")]
    NoContext,
    /// Every registered context was tried and none produced a new reference.
    #[error("NO_NEW_CONTEXT")]
    NoNewContext,
    /// The collaborator has no refetch for this context kind.
    #[error("refetch not implemented for {0} context")]
    NotImplemented(ContextKind),
    /// The refetch failed; the context was kept.
    #[error("{0}")]
    Refetch(String),
    /// A shared refetch was dropped before it finished.
    #[error("shared refetch abandoned")]
    RefetchAbandoned,
    /// The refresh service is not running.
    #[error("refresh service stopped")]
    ServiceStopped,
}

impl ReferenceError {
    /// Returns `true` when the media behind the reference can no longer be
    /// retrieved through this database.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoContext | Self::NoNewContext | Self::NotImplemented(_))
    }

    /// Text suitable for showing to a user.
    pub fn user_message(&self) -> &'static str {
        if self.is_terminal() {
            "This media can no longer be retrieved."
        } else {
            "Could not refresh this media right now."
        }
    }
}

// ─── TransportError ───────────────────────────────────────────────────────────

/// Error from [`crate::transport::FramedTransport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network / I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed frame; the connection should be dropped.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}
