//! Page arithmetic for the annotation queue.
//!
//! Pages are 1-based. `total_pages` is never zero so an empty queue still has
//! one (empty) page, and out-of-range page numbers clamp into range.

use serde::Serialize;

use crate::error::CoreError;

/// Default number of thumbnails shown per queue page.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// A resolved page request: size validated, number clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page_size: u32,
    pub page_number: u32,
    pub total_pages: u32,
}

impl PageWindow {
    /// Resolve `page_number` against `total_count` items.
    pub fn resolve(page_size: u32, page_number: u32, total_count: u64) -> Result<Self, CoreError> {
        let total_pages = total_pages(total_count, page_size)?;
        Ok(Self {
            page_size,
            page_number: page_number.clamp(1, total_pages),
            total_pages,
        })
    }

    /// Number of items to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number - 1) * u64::from(self.page_size)
    }
}

/// `max(1, ceil(total_count / page_size))`.
pub fn total_pages(total_count: u64, page_size: u32) -> Result<u32, CoreError> {
    if page_size == 0 {
        return Err(CoreError::Validation(
            "page_size must be at least 1".to_string(),
        ));
    }
    let pages = total_count.div_ceil(u64::from(page_size)).max(1);
    Ok(u32::try_from(pages).unwrap_or(u32::MAX))
}

/// One page of results plus the totals needed to render a pager.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub total_pages: u32,
    pub page_number: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: u64, window: PageWindow) -> Self {
        Self {
            items,
            total_count,
            total_pages: window.total_pages,
            page_number: window.page_number,
            page_size: window.page_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
