use async_trait::async_trait;
use futures_util::stream::{self, Stream, TryStreamExt};
use paybridge_core::SearchPage;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Anything that can serve one page of a search at an arbitrary offset.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch(&self, offset: u64, limit: u64) -> OrchestratorResult<SearchPage<T>>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u64,
    pub limit: u64,
    pub total_count: Option<u64>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// `has_more` trusts the source's total count when it gives one, otherwise a full
    /// page is taken to mean there may be more.
    pub fn from_search(page: SearchPage<T>, offset: u64, limit: u64) -> Self {
        let fetched = page.records.len() as u64;
        let has_more = fetched > 0
            && match page.total_count {
                Some(total) => offset.saturating_add(fetched) < total,
                None => fetched == limit,
            };
        Self {
            items: page.records,
            offset,
            limit,
            total_count: page.total_count,
            has_more,
        }
    }
}

/// Forward-only cursor over a paged search. Never holds more than one page, and a
/// fresh cursor over the same source starts the search over.
pub struct PageCursor<T> {
    source: Arc<dyn PageSource<T>>,
    offset: u64,
    limit: u64,
    exhausted: bool,
}

impl<T: Send + 'static> PageCursor<T> {
    pub fn new(source: Arc<dyn PageSource<T>>, offset: u64, limit: u64) -> OrchestratorResult<Self> {
        if limit == 0 {
            return Err(OrchestratorError::Validation("limit must be at least 1".to_string()));
        }
        Ok(Self {
            source,
            offset,
            limit,
            exhausted: false,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fetch a page without moving the cursor.
    pub async fn page_at(&self, offset: u64) -> OrchestratorResult<Page<T>> {
        let page = self.source.fetch(offset, self.limit).await?;
        Ok(Page::from_search(page, offset, self.limit))
    }

    /// Next non-empty page, or `None` once the search is exhausted.
    pub async fn next_page(&mut self) -> OrchestratorResult<Option<Page<T>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.page_at(self.offset).await?;
        if page.items.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.offset += page.items.len() as u64;
        self.exhausted = !page.has_more;
        Ok(Some(page))
    }

    /// Lazily walk every remaining record. Pages are fetched as the stream is polled.
    pub fn into_stream(self) -> impl Stream<Item = OrchestratorResult<T>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            match cursor.next_page().await? {
                Some(page) => {
                    let items = stream::iter(page.items.into_iter().map(Ok::<T, OrchestratorError>));
                    Ok::<_, OrchestratorError>(Some((items, cursor)))
                }
                None => Ok(None),
            }
        })
        .try_flatten()
    }
}
