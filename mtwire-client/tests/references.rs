use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mtwire_client::{
    ContextKind, ReferenceBytes, ReferenceContext, ReferenceDatabase, ReferenceError,
    ReferenceUpdates, RefetchError, Refetcher,
};

fn r(bytes: &[u8]) -> ReferenceBytes {
    ReferenceBytes::from(bytes)
}

fn msg(peer_id: i64, message_id: i32) -> ReferenceContext {
    ReferenceContext::Message { peer_id, message_id }
}

/// Refetcher driven by a table of canned answers, counting every call.
#[derive(Default)]
struct Scripted {
    messages:     Mutex<HashMap<(i64, i32), Result<ReferenceUpdates, RefetchError>>>,
    emoji_sounds: Mutex<Option<ReferenceUpdates>>,
    emoji_delay:  Duration,
    calls:        AtomicUsize,
    emoji_calls:  AtomicUsize,
}

impl Scripted {
    fn on_message(self, peer_id: i64, message_id: i32, answer: Result<ReferenceUpdates, RefetchError>) -> Self {
        self.messages.lock().unwrap().insert((peer_id, message_id), answer);
        self
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Refetcher for Scripted {
    async fn refetch_message(&self, peer_id: i64, message_id: i32) -> Result<ReferenceUpdates, RefetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .unwrap()
            .get(&(peer_id, message_id))
            .cloned()
            .unwrap_or_else(|| Ok(ReferenceUpdates::new()))
    }

    async fn refetch_emoji_sounds(&self) -> Result<ReferenceUpdates, RefetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.emoji_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.emoji_delay).await;
        let answer = self.emoji_sounds.lock().unwrap().clone();
        Ok(answer.unwrap_or_default())
    }
}

// ── Bookkeeping ───────────────────────────────────────────────────────────────

#[test]
fn duplicate_contexts_are_stored_once() {
    let db = ReferenceDatabase::new(Scripted::default());
    let reference = r(&[0xab, 0x12]);
    db.save_context(&reference, msg(5, 100));
    db.save_context(&r(&[0xab, 0x12]), msg(5, 100));

    let (contexts, _) = db.get_contexts(&reference).unwrap();
    assert_eq!(contexts, vec![msg(5, 100)]);
}

#[test]
fn lookup_by_equal_content_returns_canonical_instance() {
    let db = ReferenceDatabase::new(Scripted::default());
    let original = r(&[1, 2, 3, 4]);
    db.save_context(&original, ReferenceContext::Reactions);

    let (context, canonical) = db.get_context(&r(&[1, 2, 3, 4])).unwrap();
    assert_eq!(context, ReferenceContext::Reactions);
    assert!(canonical.ptr_eq(&original));
    assert!(db.get_context(&r(&[9])).is_none());
}

#[test]
fn deleting_last_context_drops_record_and_link() {
    let db = ReferenceDatabase::new(Scripted::default());
    let reference = r(&[7, 7]);
    db.save_context(&reference, msg(1, 1));
    db.save_context(&reference, ReferenceContext::ProfilePhoto { peer_id: 1 });

    assert!(db.delete_context(&reference, &msg(1, 1)));
    assert_eq!(db.len(), 1);
    assert!(db.delete_context(&reference, &ReferenceContext::ProfilePhoto { peer_id: 1 }));
    assert!(db.get_contexts(&reference).is_none());
    assert!(db.canonical(&reference).is_none());
    assert!(db.is_empty());
}

// ── Refresh ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn message_refresh_moves_contexts_to_new_reference() {
    let old = r(&[0xab, 0x12]);
    let new = r(&[0xcd, 0x34]);
    let refetcher = Scripted::default().on_message(5, 100, Ok(ReferenceUpdates::new().with(old.clone(), new.clone())));
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&old, msg(5, 100));

    let fresh = db.refresh_reference(&old, None).await.unwrap();
    assert_eq!(fresh, new);
    assert!(db.get_contexts(&old).is_none());
    let (contexts, _) = db.get_contexts(&new).unwrap();
    assert_eq!(contexts, vec![msg(5, 100)]);
}

#[tokio::test]
async fn unchanged_context_is_dropped_and_next_one_tried() {
    let old = r(&[0x01]);
    let new = r(&[0x02]);
    let refetcher = Scripted::default()
        .on_message(1, 10, Ok(ReferenceUpdates::new().with(old.clone(), old.clone())))
        .on_message(1, 20, Ok(ReferenceUpdates::new().with(old.clone(), new.clone())));
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&old, msg(1, 10));
    db.save_context(&old, msg(1, 20));

    assert_eq!(db.refresh_reference(&old, None).await.unwrap(), new);
    assert_eq!(db.refetcher().calls(), 2);
    let (contexts, _) = db.get_contexts(&new).unwrap();
    assert_eq!(contexts, vec![msg(1, 20)]);
}

#[tokio::test]
async fn exhausted_contexts_give_no_new_context() {
    let reference = r(&[0x0f]);
    let refetcher = Scripted::default().on_message(2, 3, Ok(ReferenceUpdates::new().with(reference.clone(), reference.clone())));
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&reference, msg(2, 3));

    let err = db.refresh_reference(&reference, None).await.unwrap_err();
    assert_eq!(err, ReferenceError::NoNewContext);
    assert!(err.is_terminal());
    assert!(db.get_contexts(&reference).is_none());
    assert_eq!(db.refetcher().calls(), 1);
}

#[tokio::test]
async fn unknown_reference_has_no_context() {
    let db = ReferenceDatabase::new(Scripted::default());
    assert_eq!(db.refresh_reference(&r(&[1]), None).await, Err(ReferenceError::NoContext));
    assert_eq!(db.refetcher().calls(), 0);
}

#[tokio::test]
async fn unimplemented_refetch_is_reported_and_context_kept() {
    let reference = r(&[0x33]);
    let db = ReferenceDatabase::new(Scripted::default());
    db.save_context(&reference, ReferenceContext::Reactions);

    let err = db.refresh_reference(&reference, None).await.unwrap_err();
    assert_eq!(err, ReferenceError::NotImplemented(ContextKind::Reactions));
    assert_eq!(err.user_message(), "This media can no longer be retrieved.");
    assert!(db.get_context(&reference).is_some());
}

#[tokio::test]
async fn failed_refetch_keeps_context() {
    let reference = r(&[0x44]);
    let refetcher = Scripted::default().on_message(9, 9, Err(RefetchError::Failed("FLOOD_WAIT_3".into())));
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&reference, msg(9, 9));

    let err = db.refresh_reference(&reference, None).await.unwrap_err();
    assert_eq!(err, ReferenceError::Refetch("FLOOD_WAIT_3".into()));
    assert!(!err.is_terminal());
    assert_eq!(db.get_contexts(&reference).unwrap().0, vec![msg(9, 9)]);
}

#[tokio::test]
async fn explicit_unregistered_context_is_tried_first() {
    let old = r(&[0x50]);
    let new = r(&[0x51]);
    let refetcher = Scripted::default().on_message(4, 4, Ok(ReferenceUpdates::new().with(old.clone(), new.clone())));
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&old, msg(4, 5));

    let fresh = db.refresh_reference(&old, Some(msg(4, 4))).await.unwrap();
    assert_eq!(fresh, new);
    assert_eq!(db.refetcher().calls(), 1);
    assert_eq!(db.get_contexts(&new).unwrap().0, vec![msg(4, 5)]);
}

#[tokio::test]
async fn explicit_context_without_record_is_bounded() {
    let reference = r(&[0x60]);
    let db = ReferenceDatabase::new(Scripted::default());

    let err = db.refresh_reference(&reference, Some(msg(6, 6))).await.unwrap_err();
    assert_eq!(err, ReferenceError::NoNewContext);
    assert_eq!(db.refetcher().calls(), 1);
}

#[tokio::test]
async fn refetch_updates_other_references_too() {
    let wanted = r(&[0x70]);
    let sibling = r(&[0x71]);
    let refetcher = Scripted::default().on_message(
        7, 7,
        Ok(ReferenceUpdates::new().with(wanted.clone(), r(&[0x80])).with(sibling.clone(), r(&[0x81]))),
    );
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&wanted, msg(7, 7));
    db.save_context(&sibling, msg(7, 7));

    db.refresh_reference(&wanted, None).await.unwrap();
    assert!(db.get_contexts(&sibling).is_none());
    assert_eq!(db.get_contexts(&r(&[0x81])).unwrap().0, vec![msg(7, 7)]);
}

// ── Single flight ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_emoji_sound_refreshes_share_one_refetch() {
    let a = r(&[0xe1]);
    let b = r(&[0xe2]);
    let refetcher = Scripted {
        emoji_delay: Duration::from_millis(20),
        ..Scripted::default()
    };
    *refetcher.emoji_sounds.lock().unwrap() = Some(
        ReferenceUpdates::new().with(a.clone(), r(&[0xf1])).with(b.clone(), r(&[0xf2])),
    );
    let db = ReferenceDatabase::new(refetcher);
    db.save_context(&a, ReferenceContext::EmojiSounds);
    db.save_context(&b, ReferenceContext::EmojiSounds);

    let (fa, fb) = tokio::join!(db.refresh_reference(&a, None), db.refresh_reference(&b, None));
    assert_eq!(fa.unwrap(), r(&[0xf1]));
    assert_eq!(fb.unwrap(), r(&[0xf2]));
    assert_eq!(db.refetcher().emoji_calls.load(Ordering::SeqCst), 1);

    // A later refresh starts a new flight.
    let c = r(&[0xe3]);
    db.save_context(&c, ReferenceContext::EmojiSounds);
    let _ = db.refresh_reference(&c, None).await;
    assert_eq!(db.refetcher().emoji_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn abandoned_leader_fails_followers() {
    let a = r(&[0xa1]);
    let refetcher = Scripted {
        emoji_delay: Duration::from_secs(60),
        ..Scripted::default()
    };
    let db = Arc::new(ReferenceDatabase::new(refetcher));
    db.save_context(&a, ReferenceContext::EmojiSounds);

    let leader = {
        let (db, a) = (Arc::clone(&db), a.clone());
        tokio::spawn(async move { db.refresh_reference(&a, None).await })
    };
    while db.refetcher().emoji_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    let follower = {
        let (db, a) = (Arc::clone(&db), a.clone());
        tokio::spawn(async move { db.refresh_reference(&a, None).await })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }

    leader.abort();
    assert_eq!(follower.await.unwrap(), Err(ReferenceError::RefetchAbandoned));
    assert!(db.get_context(&a).is_some());
}

// ── Refresh service ───────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_service_answers_over_channels() {
    let old = r(&[0x90]);
    let new = r(&[0x91]);
    let refetcher = Scripted::default().on_message(3, 3, Ok(ReferenceUpdates::new().with(old.clone(), new.clone())));
    let db = Arc::new(ReferenceDatabase::new(refetcher));
    db.save_context(&old, msg(3, 3));

    let handle = db.spawn_refresh_service();
    assert_eq!(handle.refresh(old.clone(), None).await.unwrap(), new);
    assert_eq!(handle.clone().refresh(r(&[0x99]), None).await, Err(ReferenceError::NoContext));
}
