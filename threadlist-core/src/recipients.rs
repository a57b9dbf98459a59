//! Per-page recipient resolution
//!
//! After a page is assembled, every identity it references is resolved in a
//! single batch call and the results are written to a shared
//! [`RecipientCache`]. Presentation code reads names from the cache while
//! rendering, so no per-row lookups happen on the render path.
//!
//! Resolution never fails a page. Identities the resolver does not return,
//! or every identity when the resolver errors, are cached as placeholders.

use crate::db::Database;
use crate::error::Result;
use crate::types::{Conversation, GroupChangePayload, Recipient, RecipientId, SnippetKind};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Batch lookup of recipients by id.
pub trait RecipientResolver: Send + Sync {
    /// Resolve as many of `ids` as exist. Missing ids are simply absent.
    fn resolve(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>>;
}

impl RecipientResolver for Database {
    fn resolve(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>> {
        self.get_recipients(ids)
    }
}

/// A cache entry
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRecipient {
    Resolved(Recipient),
    /// Referenced but not (yet) resolvable
    Placeholder(RecipientId),
}

impl CachedRecipient {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, CachedRecipient::Placeholder(_))
    }

    /// Name to show: display name, then address, then the raw id
    pub fn label(&self) -> String {
        match self {
            CachedRecipient::Resolved(r) => r
                .display_name
                .clone()
                .unwrap_or_else(|| r.address.clone()),
            CachedRecipient::Placeholder(id) => format!("#{}", id),
        }
    }
}

/// Shared recipient cache, warmed once per fetched page.
#[derive(Debug, Default)]
pub struct RecipientCache {
    entries: RwLock<HashMap<RecipientId, CachedRecipient>>,
}

impl RecipientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RecipientId) -> Option<CachedRecipient> {
        self.entries.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn store_resolved(&self, recipients: Vec<Recipient>) {
        let mut entries = self.entries.write();
        for recipient in recipients {
            entries.insert(recipient.id, CachedRecipient::Resolved(recipient));
        }
    }

    /// Placeholders replace missing rows but never a resolved entry
    fn store_placeholders(&self, ids: impl IntoIterator<Item = RecipientId>, overwrite: bool) {
        let mut entries = self.entries.write();
        for id in ids {
            if overwrite {
                entries.insert(id, CachedRecipient::Placeholder(id));
            } else {
                entries.entry(id).or_insert(CachedRecipient::Placeholder(id));
            }
        }
    }
}

/// Outcome of resolving one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Distinct identities referenced by the page
    pub requested: usize,
    pub resolved: usize,
    pub placeholders: usize,
}

/// Collects a page's identities and resolves them in one call.
#[derive(Clone)]
pub struct ResolutionBatcher {
    resolver: Arc<dyn RecipientResolver>,
    cache: Arc<RecipientCache>,
}

impl ResolutionBatcher {
    pub fn new(resolver: Arc<dyn RecipientResolver>, cache: Arc<RecipientCache>) -> Self {
        Self { resolver, cache }
    }

    pub fn cache(&self) -> &Arc<RecipientCache> {
        &self.cache
    }

    /// Distinct identities referenced by a page, in first-seen order.
    ///
    /// Each row contributes its own recipient; rows whose last event is a
    /// group-membership change also contribute every identity named in the
    /// event payload.
    pub fn referenced_ids(page: &[Conversation]) -> Vec<RecipientId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut add = |id: RecipientId| {
            if seen.insert(id) {
                ids.push(id);
            }
        };

        for summary in page.iter().filter_map(Conversation::summary) {
            add(summary.recipient_id);

            if summary.snippet_kind != SnippetKind::GroupUpdate || summary.last_event.is_null() {
                continue;
            }
            match serde_json::from_value::<GroupChangePayload>(summary.last_event.clone()) {
                Ok(payload) => payload.mentioned().for_each(&mut add),
                Err(e) => tracing::warn!(
                    thread_id = %summary.thread_id,
                    error = %e,
                    "Unreadable group change payload"
                ),
            }
        }

        ids
    }

    /// Resolve every identity referenced by `page` and warm the cache.
    pub fn resolve_page(&self, page: &[Conversation]) -> ResolutionReport {
        let ids = Self::referenced_ids(page);
        if ids.is_empty() {
            return ResolutionReport::default();
        }

        match self.resolver.resolve(&ids) {
            Ok(recipients) => {
                let found: HashSet<RecipientId> = recipients.iter().map(|r| r.id).collect();
                let missing: Vec<RecipientId> =
                    ids.iter().copied().filter(|id| !found.contains(id)).collect();

                let report = ResolutionReport {
                    requested: ids.len(),
                    resolved: found.len(),
                    placeholders: missing.len(),
                };
                self.cache.store_resolved(recipients);
                self.cache.store_placeholders(missing, true);
                report
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    count = ids.len(),
                    "Recipient resolution failed, using placeholders"
                );
                let report = ResolutionReport {
                    requested: ids.len(),
                    resolved: 0,
                    placeholders: ids.len(),
                };
                self.cache.store_placeholders(ids, false);
                report
            }
        }
    }
}
