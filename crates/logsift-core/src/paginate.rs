//! Page slicing over a matched key sequence.
//!
//! Pages are computed against a key sequence produced by the query engine.
//! Any change to the filter or to the record set invalidates that sequence;
//! callers must re-query and then re-clamp their page number with
//! [`clamp_page`] before asking for a page again.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::traits::RecordStore;
use crate::types::{LineNumber, LogRecord};

/// One page of resolved records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Records in key-sequence order
    pub records: Vec<LogRecord>,
    /// 1-based page number that was requested
    pub page_number: usize,
    /// Total number of pages, never less than 1
    pub total_pages: usize,
    /// Length of the key sequence the page was cut from
    pub total_matches: usize,
}

impl Page {
    /// Returns true if the page holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if a later page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page_number < self.total_pages
    }

    /// Returns true if an earlier page exists.
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page_number > 1
    }
}

/// Number of pages needed for `total_matches` keys; at least 1.
#[must_use]
pub const fn total_pages(total_matches: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    let pages = total_matches.div_ceil(page_size);
    if pages == 0 { 1 } else { pages }
}

/// Clamps a page number into `[1, total_pages]`.
#[must_use]
pub fn clamp_page(page_number: usize, total_pages: usize) -> usize {
    page_number.clamp(1, total_pages.max(1))
}

/// Returns the keys of one page; out-of-range pages yield an empty slice.
#[must_use]
pub fn page_slice(keys: &[LineNumber], page_size: usize, page_number: usize) -> &[LineNumber] {
    if page_size == 0 || page_number == 0 {
        return &[];
    }
    let start = (page_number - 1).saturating_mul(page_size);
    if start >= keys.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(keys.len());
    &keys[start..end]
}

/// Resolves one page of `keys` against `store`.
///
/// # Errors
///
/// Returns [`QueryError::InvalidPageSize`] for a zero page size,
/// [`QueryError::InvalidPageNumber`] for page 0, or an error if the store
/// cannot be read. A page past the end is empty, not an error.
pub fn page(
    keys: &[LineNumber],
    page_size: usize,
    page_number: usize,
    store: &dyn RecordStore,
) -> Result<Page, QueryError> {
    if page_size == 0 {
        return Err(QueryError::InvalidPageSize);
    }
    if page_number == 0 {
        return Err(QueryError::InvalidPageNumber(page_number));
    }

    let slice = page_slice(keys, page_size, page_number);
    let records = if slice.is_empty() {
        Vec::new()
    } else {
        store.get_by_keys(slice)?
    };

    Ok(Page {
        records,
        page_number,
        total_pages: total_pages(keys.len(), page_size),
        total_matches: keys.len(),
    })
}
