//! # Frame Stash
//!
//! Hash index from [`FrameId`] to a frame, so frames can be found again by
//! identity without walking the chain.
//!
//! Identity equality has wildcards (absent code or special addresses match
//! anything), so `FrameId` can't implement `Hash`. The stash hashes whichever
//! addresses are present and then compares candidates in the bucket with
//! identity equality. Lookups with a wildcarded identity therefore only hit
//! entries hashed over the same set of addresses; anything else falls back to
//! the linear walk in [`FrameCache::find_by_id`](crate::FrameCache::find_by_id).
//!
//! Inserting an identity that is already present fails without replacing the
//! resident entry. That refusal is how the frame cache detects stack cycles.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::frame_id::FrameId;

/// Identity-keyed frame index.
#[derive(Debug, Clone)]
pub struct FrameStash<T>
{
    buckets: HashMap<u64, SmallVec<[(FrameId, T); 2]>>,
    len: usize,
}

impl<T> Default for FrameStash<T>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> FrameStash<T>
{
    /// Create an empty stash.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Returns `true` if nothing is stashed.
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Stash `value` under `id`.
    ///
    /// Returns `false` and leaves the stash untouched if an identity-equal
    /// entry is already resident.
    ///
    /// ## Panics
    ///
    /// Panics on the null identity, which can never be looked up again.
    pub fn insert(&mut self, id: FrameId, value: T) -> bool
    {
        assert!(id.is_valid(), "cannot stash a frame with the null identity");

        let bucket = self.buckets.entry(id.stash_hash()).or_default();
        if bucket.iter().any(|(resident, _)| *resident == id) {
            return false;
        }
        bucket.push((id, value));
        self.len += 1;
        true
    }

    /// Look up the entry stashed under an identity equal to `id`.
    pub fn find(&self, id: &FrameId) -> Option<&T>
    {
        if !id.is_valid() {
            return None;
        }
        self.buckets
            .get(&id.stash_hash())?
            .iter()
            .find(|(resident, _)| resident == id)
            .map(|(_, value)| value)
    }

    /// Remove the entry stashed under an identity equal to `id`.
    pub fn remove(&mut self, id: &FrameId) -> Option<T>
    {
        if !id.is_valid() {
            return None;
        }
        let bucket = self.buckets.get_mut(&id.stash_hash())?;
        let position = bucket.iter().position(|(resident, _)| resident == id)?;
        let (_, value) = bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&id.stash_hash());
        }
        self.len -= 1;
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&mut self)
    {
        self.buckets.clear();
        self.len = 0;
    }
}
