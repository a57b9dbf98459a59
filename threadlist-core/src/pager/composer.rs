//! The segment composer
//!
//! [`ConversationPager`] answers `count` and `fetch` for one partition by
//! measuring the store, laying out segments and routing each part of a
//! request to the matching window query. It keeps no state between calls.
//!
//! A pager narrowed by a [`RecipientFilter`] lists search results: one flat
//! window, most recent first, without section headers or the archived footer.

use super::layout::{SegmentCounts, SegmentKind, SegmentLayout};
use super::PagedSource;
use crate::config::PagerConfig;
use crate::db::{ConversationStore, PinFilter};
use crate::error::{Error, Result};
use crate::partition::{ListQuery, Partition, PartitionPredicate, RecipientFilter};
use crate::recipients::{RecipientCache, RecipientResolver, ResolutionBatcher};
use crate::types::{Conversation, ThreadId, ThreadRow};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Paged view over one partition.
#[derive(Clone)]
pub struct ConversationPager {
    partition: Partition,
    query: ListQuery,
    footer_enabled: bool,
    store: Arc<dyn ConversationStore>,
    batcher: ResolutionBatcher,
}

impl ConversationPager {
    pub fn new(
        partition: Partition,
        footer_enabled: bool,
        store: Arc<dyn ConversationStore>,
        batcher: ResolutionBatcher,
    ) -> Self {
        Self {
            partition,
            query: partition.query(),
            footer_enabled: footer_enabled && partition != Partition::Archived,
            store,
            batcher,
        }
    }

    /// Narrow the list to threads whose recipient matches `filter`.
    pub fn with_filter(mut self, filter: RecipientFilter) -> Self {
        self.query = self.query.filtered(Some(filter));
        self.footer_enabled = false;
        self
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    fn splits_pinned(&self) -> bool {
        self.partition.splits_pinned() && !self.query.is_filtered()
    }

    /// The unfiltered archived partition goes through the dedicated archive
    /// primitives.
    fn is_plain_archive(&self) -> bool {
        self.query.predicate == PartitionPredicate::Archived && !self.query.is_filtered()
    }

    /// Measure the store for this partition.
    pub fn segment_counts(&self) -> Result<SegmentCounts> {
        let total = if self.is_plain_archive() {
            self.store.count_archived()?
        } else {
            self.store.count_total(&self.query)?
        };

        let pinned = if self.splits_pinned() && total > 0 {
            self.store.count_pinned(&self.query)?
        } else {
            0
        };

        let archived = if self.footer_enabled {
            self.store.count_archived()?
        } else {
            0
        };

        Ok(SegmentCounts::from_totals(total, pinned, archived))
    }

    pub fn layout(&self) -> Result<SegmentLayout> {
        Ok(SegmentLayout::new(
            self.segment_counts()?,
            self.splits_pinned(),
        ))
    }

    fn fetch_rows(&self, pin: PinFilter, offset: usize, limit: usize) -> Result<Vec<ThreadRow>> {
        if self.is_plain_archive() {
            self.store.fetch_archived_window(offset, limit)
        } else {
            self.store.fetch_window(&self.query, pin, offset, limit)
        }
    }
}

impl PagedSource for ConversationPager {
    type Item = Conversation;
    type Key = ThreadId;

    fn count(&self) -> Result<usize> {
        Ok(self.layout()?.total())
    }

    /// Fetch `[offset, offset + length)` of the partition's list.
    ///
    /// Returns at most `length` items. A cancelled request returns an empty
    /// page, which carries no guarantee about the list contents.
    fn fetch(
        &self,
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Conversation>> {
        if length == 0 {
            return Err(Error::InvalidWindow { offset, length });
        }

        let started = Instant::now();
        let layout = self.layout()?;
        let counts = layout.counts();
        let mut page = Vec::with_capacity(length.min(layout.total()));

        for slice in layout.slices(offset, length) {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(offset, length));
            }

            match slice.kind {
                SegmentKind::PinnedHeader => page.push(Conversation::PinnedHeader),
                SegmentKind::UnpinnedHeader => page.push(Conversation::UnpinnedHeader),
                SegmentKind::ArchivedFooter => page.push(Conversation::ArchivedFooter {
                    archived_count: counts.archived,
                }),
                SegmentKind::Window(pin) => {
                    let rows = self.fetch_rows(pin, slice.offset, slice.len)?;
                    if rows.len() < slice.len {
                        // Store changed since it was counted
                        tracing::debug!(
                            partition = %self.partition,
                            ?pin,
                            expected = slice.len,
                            returned = rows.len(),
                            "Short window"
                        );
                    }
                    for row in rows.into_iter().take(slice.len) {
                        if cancel.is_cancelled() {
                            return Ok(self.cancelled(offset, length));
                        }
                        page.push(Conversation::thread(row, pin == PinFilter::Pinned));
                    }
                }
            }
        }

        let report = self.batcher.resolve_page(&page);

        tracing::debug!(
            partition = %self.partition,
            filter = self.query.filter.as_ref().map(|f| f.term()),
            offset,
            length,
            returned = page.len(),
            total = layout.total(),
            pinned = counts.pinned,
            unpinned = counts.unpinned,
            archived = counts.archived,
            recipients = report.requested,
            placeholders = report.placeholders,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched page"
        );

        Ok(page)
    }

    fn key_of(&self, item: &Conversation) -> ThreadId {
        item.key()
    }
}

impl ConversationPager {
    fn cancelled(&self, offset: usize, length: usize) -> Vec<Conversation> {
        tracing::debug!(partition = %self.partition, offset, length, "Page fetch cancelled");
        Vec::new()
    }
}

/// Hands out one pager per partition over a shared store and recipient cache.
#[derive(Clone)]
pub struct ConversationLists {
    store: Arc<dyn ConversationStore>,
    batcher: ResolutionBatcher,
    config: PagerConfig,
}

impl ConversationLists {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        resolver: Arc<dyn RecipientResolver>,
        config: &PagerConfig,
    ) -> Self {
        Self {
            store,
            batcher: ResolutionBatcher::new(resolver, Arc::new(RecipientCache::new())),
            config: config.clone(),
        }
    }

    /// A pager for `partition`
    pub fn pager(&self, partition: Partition) -> ConversationPager {
        ConversationPager::new(
            partition,
            self.config.footer_enabled(partition),
            self.store.clone(),
            self.batcher.clone(),
        )
    }

    /// A pager for `partition` narrowed to recipients matching `term`. A
    /// blank term gives the plain pager.
    pub fn filtered_pager(&self, partition: Partition, term: &str) -> ConversationPager {
        let pager = self.pager(partition);
        match RecipientFilter::new(term) {
            Some(filter) => pager.with_filter(filter),
            None => pager,
        }
    }

    /// Recipient cache shared by all pagers from this factory
    pub fn cache(&self) -> &Arc<RecipientCache> {
        self.batcher.cache()
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }
}
