//! Tracks where every live file reference came from and recovers expired ones.
//!
//! Telegram file references expire. When the server rejects one
//! (`FILE_REFERENCE_EXPIRED`), [`ReferenceDatabase::refresh_reference`]
//! re-fetches one of the contexts the reference was seen in and returns the
//! fresh value.
//!
//! Contexts of a reference are kept in registration order and tried oldest
//! first. A context whose refetch returns the reference unchanged cannot
//! produce a new one and is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, watch};

use crate::errors::{RefetchError, ReferenceError};
use crate::file_reference::{ReferenceBytes, ReferenceContext, ReferenceUpdates, Refetcher};

type SharedOutcome = Result<Arc<ReferenceUpdates>, ReferenceError>;
type Flight = watch::Receiver<Option<SharedOutcome>>;

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Store {
    /// Canonical reference → contexts, oldest first.
    records: HashMap<ReferenceBytes, Vec<ReferenceContext>>,
    /// Hex of a reference → its canonical instance.
    links:   HashMap<String, ReferenceBytes>,
}

impl Store {
    fn canonical(&self, reference: &ReferenceBytes) -> Option<&ReferenceBytes> {
        self.links.get(&reference.to_hex())
    }

    fn contexts(&self, reference: &ReferenceBytes) -> Option<(&Vec<ReferenceContext>, &ReferenceBytes)> {
        if let Some((canonical, contexts)) = self.records.get_key_value(reference) {
            return Some((contexts, canonical));
        }
        let canonical = self.canonical(reference)?;
        self.records.get(canonical).map(|c| (c, canonical))
    }

    fn add(&mut self, reference: &ReferenceBytes, context: ReferenceContext) -> (ReferenceBytes, bool) {
        let canonical = self.canonical(reference).cloned().unwrap_or_else(|| reference.clone());
        self.links.entry(canonical.to_hex()).or_insert_with(|| canonical.clone());
        let contexts = self.records.entry(canonical.clone()).or_default();
        let added = !contexts.contains(&context);
        if added {
            contexts.push(context);
        }
        (canonical, added)
    }

    fn remove(&mut self, reference: &ReferenceBytes) -> Option<Vec<ReferenceContext>> {
        self.links.remove(&reference.to_hex());
        self.records.remove(reference)
    }
}

// ─── ReferenceDatabase ────────────────────────────────────────────────────────

/// File-reference contexts plus the refresh protocol.
///
/// Share it behind an `Arc`. All bookkeeping happens under a short lock that
/// is never held across an `.await`.
pub struct ReferenceDatabase<R> {
    refetcher:    R,
    store:        Mutex<Store>,
    emoji_sounds: Mutex<Option<Flight>>,
}

impl<R: Refetcher> ReferenceDatabase<R> {
    pub fn new(refetcher: R) -> Self {
        Self {
            refetcher,
            store:        Mutex::new(Store::default()),
            emoji_sounds: Mutex::new(None),
        }
    }

    /// The collaborator used for refetches.
    pub fn refetcher(&self) -> &R { &self.refetcher }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    // ─── Bookkeeping ──────────────────────────────────────────────────────────

    /// Record that `reference` was obtained through `context`.
    ///
    /// Returns the canonical instance for the reference's content: the first
    /// buffer ever saved with it.
    pub fn save_context(&self, reference: &ReferenceBytes, context: ReferenceContext) -> ReferenceBytes {
        let (canonical, added) = self.store().add(reference, context);
        if added {
            tracing::trace!("[refs] {} gained a context", canonical.to_hex());
        }
        canonical
    }

    /// Every context of `reference`, oldest first, with the canonical instance.
    pub fn get_contexts(&self, reference: &ReferenceBytes) -> Option<(Vec<ReferenceContext>, ReferenceBytes)> {
        self.store()
            .contexts(reference)
            .map(|(contexts, canonical)| (contexts.clone(), canonical.clone()))
    }

    /// The oldest context of `reference`, with the canonical instance.
    pub fn get_context(&self, reference: &ReferenceBytes) -> Option<(ReferenceContext, ReferenceBytes)> {
        let store = self.store();
        let (contexts, canonical) = store.contexts(reference)?;
        contexts.first().map(|c| (c.clone(), canonical.clone()))
    }

    /// Forget one context. Removes the record once its last context is gone.
    pub fn delete_context(&self, reference: &ReferenceBytes, context: &ReferenceContext) -> bool {
        let mut store = self.store();
        let Some(contexts) = store.records.get_mut(reference) else {
            return false;
        };
        let Some(pos) = contexts.iter().position(|c| c == context) else {
            return false;
        };
        contexts.remove(pos);
        if contexts.is_empty() {
            store.remove(reference);
            tracing::trace!("[refs] {} has no contexts left, dropped", reference.to_hex());
        }
        true
    }

    /// Move every context of `old` to `new` and forget `old`.
    ///
    /// Returns `false` when `old` is not tracked.
    pub fn replace_reference(&self, old: &ReferenceBytes, new: ReferenceBytes) -> bool {
        if old == &new {
            return false;
        }
        let mut store = self.store();
        let Some(contexts) = store.remove(old) else {
            return false;
        };
        for context in contexts {
            store.add(&new, context);
        }
        tracing::debug!("[refs] {} replaced by {}", old.to_hex(), new.to_hex());
        true
    }

    /// The canonical instance for `reference`'s content, if tracked.
    pub fn canonical(&self, reference: &ReferenceBytes) -> Option<ReferenceBytes> {
        self.store().canonical(reference).cloned()
    }

    /// Number of tracked references.
    pub fn len(&self) -> usize { self.store().records.len() }

    pub fn is_empty(&self) -> bool { self.store().records.is_empty() }

    fn apply_updates(&self, updates: &ReferenceUpdates) {
        for (old, new) in updates.iter() {
            self.replace_reference(old, new.clone());
        }
    }

    // ─── Refresh ──────────────────────────────────────────────────────────────

    /// Obtain a fresh value for an expired `reference`.
    ///
    /// `context`, when given, is tried first. Registered contexts follow,
    /// oldest first, until one yields a changed reference. Each attempt that
    /// leaves the reference unchanged deletes the context it used, so the loop
    /// runs at most once per context.
    ///
    /// A refetch failure other than [`RefetchError::NotImplemented`] ends the
    /// refresh with [`ReferenceError::Refetch`] and keeps the context.
    pub async fn refresh_reference(
        &self,
        reference: &ReferenceBytes,
        context:   Option<ReferenceContext>,
    ) -> Result<ReferenceBytes, ReferenceError> {
        let registered = self.get_contexts(reference).map(|(c, _)| c).unwrap_or_default();
        let mut budget = registered.len();
        if let Some(ctx) = &context {
            if !registered.contains(ctx) {
                budget += 1;
            }
        }

        let before = reference.to_hex();
        let mut explicit = context;
        let mut attempts = 0usize;

        loop {
            let next = explicit.take().or_else(|| self.get_context(reference).map(|(c, _)| c));
            let context = match next {
                Some(context) if attempts < budget => context,
                _ if attempts == 0 => return Err(ReferenceError::NoContext),
                _ => {
                    tracing::error!("[refs] {before}: no context produced a new reference after {attempts} attempt(s)");
                    return Err(ReferenceError::NoNewContext);
                }
            };
            attempts += 1;

            tracing::debug!("[refs] {before}: refetching {} context", context.kind());
            let updates = self.refetch(&context).await?;
            self.apply_updates(&updates);

            if let Some(fresh) = updates.get(reference) {
                if fresh != reference {
                    tracing::info!("[refs] {before} refreshed to {}", fresh.to_hex());
                    return Ok(self.canonical(fresh).unwrap_or_else(|| fresh.clone()));
                }
            }

            tracing::debug!("[refs] {before}: {} context yielded nothing new, dropping it", context.kind());
            self.delete_context(reference, &context);
        }
    }

    async fn refetch(&self, context: &ReferenceContext) -> Result<Arc<ReferenceUpdates>, ReferenceError> {
        let result = match *context {
            ReferenceContext::Message { peer_id, message_id } => {
                self.refetcher.refetch_message(peer_id, message_id).await
            }
            ReferenceContext::ProfilePhoto { peer_id } => self.refetcher.refetch_profile_photo(peer_id).await,
            ReferenceContext::Reactions => self.refetcher.refetch_reactions().await,
            ReferenceContext::EmojiSounds => return self.refetch_emoji_sounds().await,
        };
        result.map(Arc::new).map_err(|e| refetch_error(context, e))
    }

    /// Single-flight emoji sound refetch: concurrent callers share one
    /// collaborator call.
    async fn refetch_emoji_sounds(&self) -> Result<Arc<ReferenceUpdates>, ReferenceError> {
        enum Role {
            Leader(watch::Sender<Option<SharedOutcome>>),
            Follower(Flight),
        }

        let role = {
            let mut slot = self.emoji_sounds.lock().unwrap();
            match slot.as_ref() {
                Some(flight) => Role::Follower(flight.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut flight) => {
                tracing::trace!("[refs] joining in-flight emoji sounds refetch");
                let shared = match flight.wait_for(Option::is_some).await {
                    Ok(outcome) => outcome.clone(),
                    Err(_) => None,
                };
                shared.unwrap_or(Err(ReferenceError::RefetchAbandoned))
            }
            Role::Leader(tx) => {
                let landing = FlightLanding(&self.emoji_sounds);
                let outcome = self.refetcher
                    .refetch_emoji_sounds()
                    .await
                    .map(Arc::new)
                    .map_err(|e| refetch_error(&ReferenceContext::EmojiSounds, e));
                drop(landing);
                let _ = tx.send(Some(outcome.clone()));
                outcome
            }
        }
    }

    // ─── Service ──────────────────────────────────────────────────────────────

    /// Serve refresh requests from other tasks over a channel.
    ///
    /// Each request runs in its own task, so concurrent emoji sound refreshes
    /// still share one refetch. The service stops when every
    /// [`RefreshHandle`] is dropped.
    pub fn spawn_refresh_service(self: &Arc<Self>) -> RefreshHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<RefreshRequest>();
        let db = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(RefreshRequest { reference, context, reply }) = rx.recv().await {
                let db = Arc::clone(&db);
                tokio::spawn(async move {
                    let result = db.refresh_reference(&reference, context).await;
                    if reply.send(result).is_err() {
                        tracing::trace!("[refs] refresh requester went away");
                    }
                });
            }
            tracing::debug!("[refs] refresh service stopped");
        });
        RefreshHandle { tx }
    }
}

/// Clears the in-flight slot when the leader finishes or is dropped.
struct FlightLanding<'a>(&'a Mutex<Option<Flight>>);

impl Drop for FlightLanding<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }
}

fn refetch_error(context: &ReferenceContext, e: RefetchError) -> ReferenceError {
    match e {
        RefetchError::NotImplemented => {
            tracing::warn!("[refs] no refetch for {} context", context.kind());
            ReferenceError::NotImplemented(context.kind())
        }
        RefetchError::Failed(msg) => {
            tracing::warn!("[refs] {} refetch failed: {msg}", context.kind());
            ReferenceError::Refetch(msg)
        }
    }
}

// ─── Refresh service ──────────────────────────────────────────────────────────

/// A refresh request sent to [`ReferenceDatabase::spawn_refresh_service`].
#[derive(Debug)]
pub struct RefreshRequest {
    pub reference: ReferenceBytes,
    pub context:   Option<ReferenceContext>,
    pub reply:     oneshot::Sender<Result<ReferenceBytes, ReferenceError>>,
}

/// Client side of the refresh service. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl RefreshHandle {
    /// Ask the service to refresh `reference`.
    pub async fn refresh(
        &self,
        reference: ReferenceBytes,
        context:   Option<ReferenceContext>,
    ) -> Result<ReferenceBytes, ReferenceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RefreshRequest { reference, context, reply })
            .map_err(|_| ReferenceError::ServiceStopped)?;
        rx.await.unwrap_or(Err(ReferenceError::ServiceStopped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;
    impl Refetcher for Nothing {}

    fn r(bytes: &[u8]) -> ReferenceBytes { ReferenceBytes::from(bytes) }

    #[test]
    fn first_buffer_is_canonical() {
        let db = ReferenceDatabase::new(Nothing);
        let first = r(&[1, 2, 3]);
        let copy  = r(&[1, 2, 3]);
        db.save_context(&first, ReferenceContext::Reactions);
        let canonical = db.save_context(&copy, ReferenceContext::EmojiSounds);
        assert!(canonical.ptr_eq(&first));
        assert!(db.canonical(&copy).unwrap().ptr_eq(&first));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn replace_merges_into_existing_record() {
        let db = ReferenceDatabase::new(Nothing);
        let (a, b) = (r(&[0xaa]), r(&[0xbb]));
        db.save_context(&a, ReferenceContext::Reactions);
        db.save_context(&a, ReferenceContext::EmojiSounds);
        db.save_context(&b, ReferenceContext::Reactions);

        assert!(db.replace_reference(&a, b.clone()));
        assert!(db.get_contexts(&a).is_none());
        let (contexts, _) = db.get_contexts(&b).unwrap();
        assert_eq!(contexts, vec![ReferenceContext::Reactions, ReferenceContext::EmojiSounds]);
        assert!(!db.replace_reference(&a, b));
    }

    #[test]
    fn delete_missing_context_is_false() {
        let db = ReferenceDatabase::new(Nothing);
        let a = r(&[1]);
        assert!(!db.delete_context(&a, &ReferenceContext::Reactions));
        db.save_context(&a, ReferenceContext::Reactions);
        assert!(!db.delete_context(&a, &ReferenceContext::EmojiSounds));
        assert!(db.delete_context(&a, &ReferenceContext::Reactions));
        assert!(db.is_empty());
    }
}
