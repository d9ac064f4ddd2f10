//! File-reference values, the contexts they come from, and the collaborator
//! that re-fetches them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::RefetchError;

// ─── ReferenceBytes ───────────────────────────────────────────────────────────

/// An opaque server-issued file reference.
///
/// Cheap to clone. Equality and hashing are by content; [`ptr_eq`](Self::ptr_eq)
/// tells two handles to the same buffer apart from equal copies.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceBytes(Arc<[u8]>);

impl ReferenceBytes {
    /// Wrap a byte buffer.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Lowercase hex of the content; the link-table key.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Returns `true` when both handles share one buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for ReferenceBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceBytes({})", self.to_hex())
    }
}

impl AsRef<[u8]> for ReferenceBytes {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl From<Vec<u8>> for ReferenceBytes {
    fn from(v: Vec<u8>) -> Self { Self(v.into()) }
}

impl From<&[u8]> for ReferenceBytes {
    fn from(v: &[u8]) -> Self { Self(v.into()) }
}

impl<const N: usize> From<[u8; N]> for ReferenceBytes {
    fn from(v: [u8; N]) -> Self { Self(Arc::from(&v[..])) }
}

// ─── ReferenceContext ─────────────────────────────────────────────────────────

/// Where a file reference was obtained, and therefore how to obtain a fresh one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum ReferenceContext {
    /// A peer's profile photo.
    ProfilePhoto { peer_id: i64 },
    /// Media attached to a message.
    Message { peer_id: i64, message_id: i32 },
    /// The animated-emoji sound catalogue.
    EmojiSounds,
    /// The available-reactions catalogue.
    Reactions,
}

impl ReferenceContext {
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::ProfilePhoto { .. } => ContextKind::ProfilePhoto,
            Self::Message { .. }      => ContextKind::Message,
            Self::EmojiSounds         => ContextKind::EmojiSounds,
            Self::Reactions           => ContextKind::Reactions,
        }
    }
}

/// Tag of a [`ReferenceContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ContextKind {
    ProfilePhoto,
    Message,
    EmojiSounds,
    Reactions,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProfilePhoto => "profile photo",
            Self::Message      => "message",
            Self::EmojiSounds  => "emoji sounds",
            Self::Reactions    => "reactions",
        })
    }
}

// ─── ReferenceUpdates ─────────────────────────────────────────────────────────

/// References replaced by a refetch: `old → new`.
///
/// An entry whose new value equals the old one records that the refetch saw
/// the reference and it did not change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceUpdates {
    map: HashMap<ReferenceBytes, ReferenceBytes>,
}

impl ReferenceUpdates {
    pub fn new() -> Self { Self::default() }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, old: impl Into<ReferenceBytes>, new: impl Into<ReferenceBytes>) -> Self {
        self.insert(old, new);
        self
    }

    pub fn insert(&mut self, old: impl Into<ReferenceBytes>, new: impl Into<ReferenceBytes>) {
        self.map.insert(old.into(), new.into());
    }

    /// The value `old` was replaced with, if this refetch saw it.
    pub fn get(&self, old: &ReferenceBytes) -> Option<&ReferenceBytes> {
        self.map.get(old)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReferenceBytes, &ReferenceBytes)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
}

impl FromIterator<(ReferenceBytes, ReferenceBytes)> for ReferenceUpdates {
    fn from_iter<I: IntoIterator<Item = (ReferenceBytes, ReferenceBytes)>>(iter: I) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

// ─── Refetcher ────────────────────────────────────────────────────────────────

/// Re-issues the request a file reference came from.
///
/// Each method re-fetches one kind of context and reports every reference it
/// saw as `old → new`. Implement only the kinds you support; the rest answer
/// [`RefetchError::NotImplemented`].
///
/// ```rust,no_run
/// use mtwire_client::{Refetcher, ReferenceUpdates, RefetchError};
///
/// struct Messages;
///
/// impl Refetcher for Messages {
///     async fn refetch_message(&self, peer_id: i64, message_id: i32)
///         -> Result<ReferenceUpdates, RefetchError>
///     {
///         // call messages.getMessages and diff the file references
///         # let _ = (peer_id, message_id);
///         Ok(ReferenceUpdates::new())
///     }
/// }
/// ```
pub trait Refetcher: Send + Sync + 'static {
    fn refetch_message(
        &self,
        peer_id:    i64,
        message_id: i32,
    ) -> impl Future<Output = Result<ReferenceUpdates, RefetchError>> + Send {
        let _ = (peer_id, message_id);
        async { Err(RefetchError::NotImplemented) }
    }

    fn refetch_profile_photo(
        &self,
        peer_id: i64,
    ) -> impl Future<Output = Result<ReferenceUpdates, RefetchError>> + Send {
        let _ = peer_id;
        async { Err(RefetchError::NotImplemented) }
    }

    fn refetch_reactions(&self) -> impl Future<Output = Result<ReferenceUpdates, RefetchError>> + Send {
        async { Err(RefetchError::NotImplemented) }
    }

    fn refetch_emoji_sounds(&self) -> impl Future<Output = Result<ReferenceUpdates, RefetchError>> + Send {
        async { Err(RefetchError::NotImplemented) }
    }
}
