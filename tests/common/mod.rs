//! Run one async closure per rank of an in-process group.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;

use shardcollective::ClusterContext;

/// Spawn `f` once per rank and collect the results in rank order.
pub async fn run_group<F, Fut, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(Arc<ClusterContext>) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = ClusterContext::local_group(size)
        .expect("local group")
        .into_iter()
        .map(|ctx| tokio::spawn(f(Arc::new(ctx))))
        .collect();

    let mut results = Vec::with_capacity(size);
    for handle in handles {
        results.push(handle.await.expect("rank task panicked"));
    }
    results
}
