//! Local view state and the rules that reconcile it with server-origin data.
//!
//! Every reconciliation step is a pure function from the current collection and one
//! payload to the next collection. `ViewStore` wraps them for callers that keep state.

use std::collections::HashSet;

use crate::clipboard::ClipboardEntry;
use crate::sync::ChannelEvent;

/// Prepend `entry` unless its id is already present.
pub fn insert_if_absent(mut entries: Vec<ClipboardEntry>, entry: ClipboardEntry) -> Vec<ClipboardEntry> {
    if !entries.iter().any(|e| e.id == entry.id) {
        entries.insert(0, entry);
    }
    entries
}

/// Swap in `entry` at the position of the same id. Unknown ids are ignored.
pub fn replace_by_id(mut entries: Vec<ClipboardEntry>, entry: ClipboardEntry) -> Vec<ClipboardEntry> {
    if let Some(slot) = entries.iter_mut().find(|e| e.id == entry.id) {
        *slot = entry;
    }
    entries
}

pub fn remove_by_id(mut entries: Vec<ClipboardEntry>, id: i64) -> Vec<ClipboardEntry> {
    entries.retain(|e| e.id != id);
    entries
}

/// Drop everything, or everything unpinned.
pub fn clear(mut entries: Vec<ClipboardEntry>, include_pinned: bool) -> Vec<ClipboardEntry> {
    if include_pinned {
        entries.clear();
    } else {
        entries.retain(|e| e.is_pinned);
    }
    entries
}

/// Take a full fetch as the new collection, keeping the first copy of any repeated id.
pub fn reset(fetched: Vec<ClipboardEntry>) -> Vec<ClipboardEntry> {
    let mut seen = HashSet::with_capacity(fetched.len());
    fetched.into_iter().filter(|e| seen.insert(e.id)).collect()
}

/// Pinned first, each group newest first. Stable for equal timestamps.
pub fn display_order<'a, I>(entries: I) -> Vec<&'a ClipboardEntry>
where
    I: IntoIterator<Item = &'a ClipboardEntry>,
{
    let mut out: Vec<&ClipboardEntry> = entries.into_iter().collect();
    out.sort_by(|a, b| b.is_pinned.cmp(&a.is_pinned).then_with(|| a.cmp_newest_first(b)));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    All,
    PinnedOnly,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            DisplayMode::All => DisplayMode::PinnedOnly,
            DisplayMode::PinnedOnly => DisplayMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    pub mode: DisplayMode,
    pub search: String,
    pub page: usize,
    pub page_size: usize,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            mode: DisplayMode::All,
            search: String::new(),
            page: 0,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedPage {
    pub entries: Vec<ClipboardEntry>,
    pub page: usize,
    pub total_pages: usize,
    pub total_matches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewStore {
    entries: Vec<ClipboardEntry>,
}

impl ViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ClipboardEntry>) -> Self {
        Self {
            entries: reset(entries),
        }
    }

    /// Arrival order, most recent arrival first.
    pub fn entries(&self) -> &[ClipboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&ClipboardEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn reset(&mut self, fetched: Vec<ClipboardEntry>) {
        self.entries = reset(fetched);
    }

    /// Apply one server event. Returns whether the collection changed.
    pub fn apply(&mut self, event: &ChannelEvent) -> bool {
        let current = std::mem::take(&mut self.entries);
        let before = current.clone();
        self.entries = match event {
            ChannelEvent::NewEntry(entry) => insert_if_absent(current, entry.clone()),
            ChannelEvent::UpdateEntry(entry) => replace_by_id(current, entry.clone()),
            ChannelEvent::DeleteEntry(id) => remove_by_id(current, *id),
            ChannelEvent::Clear { include_pinned } => clear(current, *include_pinned),
            ChannelEvent::Pong(_) => current,
        };
        self.entries != before
    }

    pub fn pinned(&self) -> Vec<&ClipboardEntry> {
        self.entries.iter().filter(|e| e.is_pinned).collect()
    }

    pub fn search(&self, query: &str) -> Vec<&ClipboardEntry> {
        self.entries.iter().filter(|e| e.matches(query)).collect()
    }

    pub fn display(&self, mode: DisplayMode) -> Vec<&ClipboardEntry> {
        match mode {
            DisplayMode::All => display_order(&self.entries),
            DisplayMode::PinnedOnly => display_order(self.entries.iter().filter(|e| e.is_pinned)),
        }
    }

    /// Filter, order and page the collection.
    pub fn project(&self, query: &ViewQuery) -> ProjectedPage {
        let ordered: Vec<&ClipboardEntry> = self
            .display(query.mode)
            .into_iter()
            .filter(|e| e.matches(&query.search))
            .collect();

        let page_size = query.page_size.max(1);
        let total_matches = ordered.len();
        let total_pages = total_matches.div_ceil(page_size);
        let entries = ordered
            .into_iter()
            .skip(query.page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        ProjectedPage {
            entries,
            page: query.page,
            total_pages,
            total_matches,
        }
    }
}
