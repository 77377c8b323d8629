//! Paged, direction-sensitive traversal of a single sequence's items.
//!
//! This is the one place query-count matters: when a caller's `limit` is at
//! most the configured `page_size`, the iterator must satisfy the whole
//! request with a single underlying [`ActiveRecordStrategy::get_items`]
//! call rather than paging to a smaller-than-requested final page to detect
//! end-of-data.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::strategy::{ActiveRecordStrategy, ItemQuery};
use crate::{SequenceId, SequencedItem};

/// Selects which paging strategy a [`PagedIterator`] uses internally.
///
/// Both kinds expose identical external semantics (the same items, in the
/// same order); [`IteratorKind::Prefetching`] only changes when the
/// underlying queries are issued relative to the consumer draining the
/// current page, so its `query_counter` can reach the end-of-data sentinel
/// query one step earlier than [`IteratorKind::Simple`]'s would.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IteratorKind {
    /// Fetch each page only once the previous one is fully drained.
    Simple,
    /// Fetch the next page concurrently with the consumer draining the
    /// current one.
    Prefetching,
}

/// Parameters fixed for the lifetime of a [`PagedIterator`].
pub struct PagedIteratorConfig<Position> {
    /// Sequence being traversed.
    pub sequence_id: SequenceId,
    /// Page size; also the query `limit` whenever no caller `limit` applies.
    pub page_size: usize,
    /// Lower exclusive bound, fixed for the whole traversal.
    pub gt: Option<Position>,
    /// Lower inclusive bound, fixed for the whole traversal.
    pub gte: Option<Position>,
    /// Upper exclusive bound, fixed for the whole traversal.
    pub lt: Option<Position>,
    /// Upper inclusive bound, fixed for the whole traversal.
    pub lte: Option<Position>,
    /// Overall item cap across all pages.
    pub limit: Option<usize>,
    /// Traversal direction; results are always emitted in this order.
    pub is_ascending: bool,
    /// Which paging strategy to use.
    pub kind: IteratorKind,
}

/// Lazily fetches and yields [`SequencedItem`]s page by page.
///
/// Exposes `page_counter`, `query_counter`, and `all_item_counter` because
/// the query-minimization contract is only observable through them.
pub struct PagedIterator<Position> {
    strategy: Arc<dyn ActiveRecordStrategy<Position>>,
    config: PagedIteratorConfig<Position>,
    last_position: Option<Position>,
    /// Number of pages fetched so far.
    pub page_counter: usize,
    /// Number of underlying `get_items` calls issued so far.
    pub query_counter: usize,
    /// Number of items yielded so far.
    pub all_item_counter: usize,
    buffer: VecDeque<SequencedItem<Position>>,
    prefetched: Option<JoinHandle<Result<Vec<SequencedItem<Position>>, StoreError>>>,
    done: bool,
}

impl<Position> PagedIterator<Position>
where
    Position: Clone + PartialOrd + Send + Sync + 'static,
{
    /// Build a new iterator. No query is issued until the first
    /// [`PagedIterator::next`] call.
    pub fn new(strategy: Arc<dyn ActiveRecordStrategy<Position>>, config: PagedIteratorConfig<Position>) -> Self {
        Self {
            strategy,
            config,
            last_position: None,
            page_counter: 0,
            query_counter: 0,
            all_item_counter: 0,
            buffer: VecDeque::new(),
            prefetched: None,
            done: false,
        }
    }

    fn effective_limit(&self) -> usize {
        match self.config.limit {
            Some(limit) => self.config.page_size.min(limit.saturating_sub(self.all_item_counter)),
            None => self.config.page_size,
        }
    }

    fn query_minimized(&self) -> bool {
        matches!(self.config.limit, Some(limit) if limit <= self.config.page_size) && self.page_counter == 0
    }

    fn build_query(&self) -> ItemQuery<Position> {
        let limit = if self.query_minimized() {
            self.config.limit.unwrap()
        } else {
            self.effective_limit()
        };

        if self.config.is_ascending {
            ItemQuery {
                gt: self.last_position.clone().or_else(|| self.config.gt.clone()),
                gte: if self.last_position.is_some() { None } else { self.config.gte.clone() },
                lt: self.config.lt.clone(),
                lte: self.config.lte.clone(),
                limit: Some(limit),
                query_ascending: true,
                results_ascending: true,
            }
        } else {
            ItemQuery {
                gt: self.config.gt.clone(),
                gte: self.config.gte.clone(),
                lt: self.last_position.clone().or_else(|| self.config.lt.clone()),
                lte: if self.last_position.is_some() { None } else { self.config.lte.clone() },
                limit: Some(limit),
                query_ascending: false,
                results_ascending: false,
            }
        }
    }

    async fn fetch_page(&mut self) -> Result<Vec<SequencedItem<Position>>, StoreError> {
        let query = self.build_query();
        self.query_counter += 1;
        self.strategy.get_items(self.config.sequence_id, query).await
    }

    /// Spawn the next page's fetch on a background task so it can run
    /// concurrently with the caller draining the page already buffered.
    fn spawn_next_page(&mut self) {
        let query = self.build_query();
        self.query_counter += 1;
        let strategy = Arc::clone(&self.strategy);
        let sequence_id = self.config.sequence_id;
        self.prefetched = Some(tokio::task::spawn(async move { strategy.get_items(sequence_id, query).await }));
    }

    /// Produce the next item, or `None` once the traversal is exhausted.
    pub async fn next(&mut self) -> Result<Option<SequencedItem<Position>>, StoreError> {
        if self.buffer.is_empty() && !self.done {
            if let Some(limit) = self.config.limit {
                if self.all_item_counter >= limit {
                    self.done = true;
                }
            }

            if !self.done {
                let page = if let Some(handle) = self.prefetched.take() {
                    handle.await.map_err(|e| StoreError::Backend(e.to_string()))??
                } else {
                    self.fetch_page().await?
                };

                let requested = if self.query_minimized() {
                    self.config.limit.unwrap()
                } else {
                    self.effective_limit()
                };

                if page.is_empty() {
                    self.done = true;
                } else {
                    self.last_position = page.last().map(|item| item.position.clone());
                    self.page_counter += 1;
                    self.all_item_counter += page.len();
                    self.buffer.extend(page.clone());

                    if page.len() < requested {
                        self.done = true;
                    } else if let Some(limit) = self.config.limit {
                        if self.all_item_counter >= limit {
                            self.done = true;
                        }
                    }

                    if self.config.kind == IteratorKind::Prefetching && !self.done {
                        self.spawn_next_page();
                    }
                }
            }
        }

        Ok(self.buffer.pop_front())
    }
}
