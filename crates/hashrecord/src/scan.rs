//! Prefix enumeration over a namespace
//!
//! Both entry points drive the store's cursor scan with a small batch
//! size and hand back bare ids (namespace prefix stripped):
//! - [`find_all_ids`] runs the scan to completion and returns every id,
//!   or the first error with nothing accumulated
//! - [`scan_all_ids`] exposes the scan as a lazy, single-pass stream of
//!   id batches that ends with `None` or stops after one `Err`

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, instrument};

use crate::error::EntityError;
use crate::keys;
use crate::store::HashStore;

/// Keys requested per scan round-trip.
pub const SCAN_BATCH: usize = 10;

/// Collect every id under `namespace` whose id starts with `prefix`.
#[instrument(skip(store))]
pub async fn find_all_ids(
    store: &dyn HashStore,
    namespace: &str,
    prefix: &str,
) -> Result<Vec<String>, EntityError> {
    let pattern = keys::scan_pattern(namespace, prefix);
    let mut ids = Vec::new();
    let mut cursor = 0;

    loop {
        let page = store.scan(cursor, &pattern, SCAN_BATCH).await?;
        ids.extend(
            page.keys
                .iter()
                .map(|key| keys::strip_namespace(namespace, key)),
        );
        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }

    debug!(count = ids.len(), "scan complete");
    Ok(ids)
}

enum ScanState {
    At(u64),
    Done,
}

/// Lazy stream of id batches. Single pass; cannot be restarted.
pub struct IdScan {
    inner: BoxStream<'static, Result<Vec<String>, EntityError>>,
}

impl IdScan {
    /// Next batch, `None` once the scan is complete.
    pub async fn next_batch(&mut self) -> Option<Result<Vec<String>, EntityError>> {
        self.inner.next().await
    }
}

impl Stream for IdScan {
    type Item = Result<Vec<String>, EntityError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for IdScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdScan").finish_non_exhaustive()
    }
}

/// Stream the ids under `namespace` whose id starts with `prefix`.
///
/// Empty scan pages are skipped, so every yielded batch is non-empty.
pub fn scan_all_ids(store: Arc<dyn HashStore>, namespace: &str, prefix: &str) -> IdScan {
    let namespace = namespace.to_string();
    let pattern = keys::scan_pattern(&namespace, prefix);

    let inner = stream::unfold(ScanState::At(0), move |state| {
        let store = Arc::clone(&store);
        let namespace = namespace.clone();
        let pattern = pattern.clone();
        async move {
            let ScanState::At(mut cursor) = state else {
                return None;
            };
            loop {
                let page = match store.scan(cursor, &pattern, SCAN_BATCH).await {
                    Ok(page) => page,
                    Err(e) => return Some((Err(EntityError::from(e)), ScanState::Done)),
                };
                let ids: Vec<String> = page
                    .keys
                    .iter()
                    .map(|key| keys::strip_namespace(&namespace, key))
                    .collect();
                let next = match page.cursor {
                    0 => ScanState::Done,
                    c => ScanState::At(c),
                };
                if !ids.is_empty() {
                    return Some((Ok(ids), next));
                }
                match next {
                    ScanState::At(c) => cursor = c,
                    ScanState::Done => return None,
                }
            }
        }
    })
    .boxed();

    IdScan { inner }
}
