//! Query parameter types shared by handler modules.

use serde::Deserialize;

use melon_core::pagination::DEFAULT_PAGE_SIZE;

/// `?page_size=&page=` for the annotation queue. Page numbers are 1-based
/// and clamp into range.
#[derive(Debug, Deserialize)]
pub struct QueueParams {
    pub page_size: Option<u32>,
    pub page: Option<u32>,
}

impl QueueParams {
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }
}

/// `?path=` identifying one dataset image.
#[derive(Debug, Deserialize)]
pub struct ImagePathParams {
    pub path: String,
}

/// `?limit=` for newest-first listings.
#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// `?task=` filter for model listings.
#[derive(Debug, Deserialize)]
pub struct TaskParams {
    pub task: Option<String>,
}
