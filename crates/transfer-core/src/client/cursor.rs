//! Pagination-transparent iteration over `search_*` endpoints.
//!
//! Every cursor shares one state machine: idle -> fetching -> yielding ->
//! exhausted. The filter string is forwarded unchanged; the per-page size
//! is capped by `SearchConfig`.

use super::{MlflowClient, Page};
use crate::config::SearchConfig;
use crate::error::Result;
use crate::models::{
    Experiment, LoggedModel, ModelVersion, Prompt, PromptVersion, RegisteredModel, Run, TraceInfo,
};
use futures::future::BoxFuture;
use std::collections::VecDeque;

/// Cursor lifecycle. `Yielding` means the local buffer still holds items;
/// `Exhausted` means the buffer is empty and no page token remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Fetching,
    Yielding,
    Exhausted,
}

type PageFetch<'a, T> = Box<dyn Fn(Option<String>) -> BoxFuture<'a, Result<Page<T>>> + Send + 'a>;

/// A cursor over one paginated search endpoint, yielding one entity at a
/// time and requesting the next page when the buffer drains.
pub struct SearchCursor<'a, T> {
    fetch: PageFetch<'a, T>,
    buffer: VecDeque<T>,
    token: Option<String>,
    state: CursorState,
}

impl<'a, T> SearchCursor<'a, T> {
    pub fn new(fetch: PageFetch<'a, T>) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            token: None,
            state: CursorState::Idle,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Yield the next entity, fetching a page when needed. Returns
    /// `Ok(None)` once the endpoint is exhausted.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.state = if self.buffer.is_empty() && self.token.is_none() {
                    CursorState::Exhausted
                } else {
                    CursorState::Yielding
                };
                return Ok(Some(item));
            }
            match self.state {
                CursorState::Exhausted => return Ok(None),
                // Buffer drained: fetch the first or next page.
                _ => {
                    if self.state != CursorState::Idle && self.token.is_none() {
                        self.state = CursorState::Exhausted;
                        return Ok(None);
                    }
                    self.state = CursorState::Fetching;
                    let page = (self.fetch)(self.token.take()).await?;
                    self.buffer = page.items.into();
                    self.token = page.next_page_token;
                    if self.buffer.is_empty() && self.token.is_none() {
                        self.state = CursorState::Exhausted;
                        return Ok(None);
                    }
                    self.state = CursorState::Yielding;
                }
            }
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.try_next().await? {
            out.push(item);
        }
        Ok(out)
    }
}

/// Cursor over every experiment matching `filter`.
pub fn experiments<'a>(
    client: &'a dyn MlflowClient,
    filter: Option<String>,
) -> SearchCursor<'a, Experiment> {
    SearchCursor::new(Box::new(move |token| {
        let filter = filter.clone();
        Box::pin(async move {
            client
                .search_experiments(
                    filter.as_deref(),
                    SearchConfig::MAX_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over the runs of a set of experiments.
pub fn runs<'a>(
    client: &'a dyn MlflowClient,
    experiment_ids: Vec<String>,
    filter: Option<String>,
) -> SearchCursor<'a, Run> {
    SearchCursor::new(Box::new(move |token| {
        let experiment_ids = experiment_ids.clone();
        let filter = filter.clone();
        Box::pin(async move {
            client
                .search_runs(
                    &experiment_ids,
                    filter.as_deref(),
                    SearchConfig::MAX_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over registered models matching `filter`.
pub fn registered_models<'a>(
    client: &'a dyn MlflowClient,
    filter: Option<String>,
) -> SearchCursor<'a, RegisteredModel> {
    SearchCursor::new(Box::new(move |token| {
        let filter = filter.clone();
        Box::pin(async move {
            client
                .search_registered_models(
                    filter.as_deref(),
                    SearchConfig::MAX_REGISTRY_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over every version of one registered model.
pub fn model_versions<'a>(
    client: &'a dyn MlflowClient,
    model_name: String,
) -> SearchCursor<'a, ModelVersion> {
    let filter = format!("name='{model_name}'");
    SearchCursor::new(Box::new(move |token| {
        let filter = filter.clone();
        Box::pin(async move {
            client
                .search_model_versions(
                    Some(&filter),
                    SearchConfig::MAX_REGISTRY_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over logged models of a set of experiments.
pub fn logged_models<'a>(
    client: &'a dyn MlflowClient,
    experiment_ids: Vec<String>,
) -> SearchCursor<'a, LoggedModel> {
    SearchCursor::new(Box::new(move |token| {
        let experiment_ids = experiment_ids.clone();
        Box::pin(async move {
            client
                .search_logged_models(
                    &experiment_ids,
                    SearchConfig::MAX_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over trace infos of a set of experiments.
pub fn traces<'a>(
    client: &'a dyn MlflowClient,
    experiment_ids: Vec<String>,
) -> SearchCursor<'a, TraceInfo> {
    SearchCursor::new(Box::new(move |token| {
        let experiment_ids = experiment_ids.clone();
        Box::pin(async move {
            client
                .search_traces(
                    &experiment_ids,
                    SearchConfig::MAX_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over prompts matching `filter`.
pub fn prompts<'a>(
    client: &'a dyn MlflowClient,
    filter: Option<String>,
) -> SearchCursor<'a, Prompt> {
    SearchCursor::new(Box::new(move |token| {
        let filter = filter.clone();
        Box::pin(async move {
            client
                .search_prompts(
                    filter.as_deref(),
                    SearchConfig::MAX_REGISTRY_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

/// Cursor over every version of one prompt.
pub fn prompt_versions<'a>(
    client: &'a dyn MlflowClient,
    name: String,
) -> SearchCursor<'a, PromptVersion> {
    SearchCursor::new(Box::new(move |token| {
        let name = name.clone();
        Box::pin(async move {
            client
                .search_prompt_versions(
                    &name,
                    SearchConfig::MAX_REGISTRY_RESULTS_PER_PAGE,
                    token.as_deref(),
                )
                .await
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn paged_cursor(pages: Vec<Vec<u32>>) -> (SearchCursor<'static, u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = calls.clone();
        let cursor = SearchCursor::new(Box::new(move |token| {
            let pages = pages.clone();
            let calls = calls_inner.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
                let items = pages[index].clone();
                let next = if index + 1 < pages.len() {
                    Some((index + 1).to_string())
                } else {
                    None
                };
                Ok(Page {
                    items,
                    next_page_token: next,
                })
            })
        }));
        (cursor, calls)
    }

    #[tokio::test]
    async fn test_cursor_spans_pages() {
        let (cursor, calls) = paged_cursor(vec![vec![1, 2], vec![3], vec![4, 5]]);
        let items = cursor.collect_all().await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cursor_empty_endpoint() {
        let (mut cursor, _) = paged_cursor(vec![vec![]]);
        assert_eq!(cursor.state(), CursorState::Idle);
        assert!(cursor.try_next().await.unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        // Exhausted cursors stay exhausted.
        assert!(cursor.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_state_transitions() {
        let (mut cursor, _) = paged_cursor(vec![vec![1], vec![2]]);
        assert_eq!(cursor.try_next().await.unwrap(), Some(1));
        assert_eq!(cursor.state(), CursorState::Yielding);
        assert_eq!(cursor.try_next().await.unwrap(), Some(2));
        assert_eq!(cursor.try_next().await.unwrap(), None);
        assert_eq!(cursor.state(), CursorState::Exhausted);
    }
}
