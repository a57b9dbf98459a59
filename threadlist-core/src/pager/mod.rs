//! Paged conversation lists
//!
//! [`PagedSource`] is the contract list consumers page through: a total
//! `count`, an offset-addressed `fetch`, and a stable `key_of` so that rows
//! can be tracked across pages independent of their position.
//!
//! [`ConversationPager`] implements it for one partition, composing pinned
//! and unpinned windows with synthetic headers and the archived footer.

pub mod composer;
pub mod layout;

pub use composer::{ConversationLists, ConversationPager};
pub use layout::{Segment, SegmentCounts, SegmentKind, SegmentLayout, Slice};

use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// An offset-addressable, stably keyed list.
pub trait PagedSource {
    type Item;
    type Key;

    /// Items in the list, synthetic rows included
    fn count(&self) -> Result<usize>;

    /// Up to `length` items starting at `offset`.
    ///
    /// `length` must be positive. Offsets past the end yield an empty page.
    fn fetch(
        &self,
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Item>>;

    /// Stable identity of an item
    fn key_of(&self, item: &Self::Item) -> Self::Key;
}
