use anyhow::Result;
use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use crate::metrics;

/// Largest number of token addresses sent to the price API in one request.
pub const TOKEN_PRICES_BATCH_SIZE: usize = 100;

/// Splits `keys` into consecutive batches of at most `batch_size`, keeping order.
///
/// A `batch_size` of zero is treated as one.
pub fn create_batches<K: Clone>(keys: &[K], batch_size: usize) -> Vec<Vec<K>> {
    keys.chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Fetches `keys` in batches and merges the per-batch results.
///
/// Duplicate keys are collapsed first (first occurrence wins the position).
/// One `fetch_one` call is issued per batch, with at most `concurrency`
/// batches in flight. A key missing from every batch result is simply absent
/// from the output. If any batch fails, the whole fetch fails.
pub async fn fetch_batched<K, V, F, Fut>(
    keys: &[K],
    batch_size: usize,
    concurrency: usize,
    fetch_one: F,
) -> Result<HashMap<K, V>>
where
    K: Eq + Hash + Clone,
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = Result<HashMap<K, V>>>,
{
    let unique: IndexSet<K> = keys.iter().cloned().collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }
    let unique: Vec<K> = unique.into_iter().collect();
    let batches = create_batches(&unique, batch_size);
    debug!(
        "Batch fetch: {} keys ({} before dedup) in {} batches of <= {}",
        unique.len(),
        keys.len(),
        batches.len(),
        batch_size.max(1)
    );

    let results: Vec<Result<HashMap<K, V>>> = stream::iter(batches.into_iter().map(|batch| {
        metrics::record_batch_size(batch.len());
        fetch_one(batch)
    }))
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;

    let mut merged = HashMap::with_capacity(unique.len());
    for result in results {
        merged.extend(result?);
    }
    Ok(merged)
}
