//! Coordinator round trip over a loopback TCP mesh.

use std::sync::Arc;

use shardcollective::{
    ClusterContext, DistributionCoordinator, DistributionMode, ReduceOp, TcpFabric,
    TcpFabricConfig,
};
use tokio::net::TcpListener;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_scatter_gather_all_reduce() {
    const RANKS: usize = 4;

    let mut listeners = Vec::new();
    let mut addrs = Vec::new();
    for _ in 0..RANKS {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(listener.local_addr().unwrap());
        listeners.push(listener);
    }

    let mut handles = Vec::new();
    for (rank, listener) in listeners.into_iter().enumerate() {
        let config = TcpFabricConfig::new(rank, RANKS, addrs.clone());
        handles.push(tokio::spawn(async move {
            let fabric = TcpFabric::with_listener(config, listener).await.unwrap();
            let ctx = Arc::new(ClusterContext::new(fabric));
            let mut coord = DistributionCoordinator::new(ctx.clone());

            let whole: Vec<u64> = if ctx.is_root() { (0..1000).collect() } else { Vec::new() };
            coord.configure(DistributionMode::ControlNodeManages, 1000).await.unwrap();

            let mut local = Vec::new();
            coord.scatter(&whole, &mut local).await.unwrap();
            let local_len = local.len();

            let mut back = Vec::new();
            coord.all_gather(&local, &mut back).await.unwrap();

            let mut total = Vec::new();
            coord
                .all_reduce(&[local.iter().sum::<u64>()], &mut total, ReduceOp::Sum)
                .await
                .unwrap();

            drop(coord);
            ClusterContext::finalize_shared(ctx).await.unwrap();
            (local_len, back, total)
        }));
    }

    let expected: Vec<u64> = (0..1000).collect();
    let mut lens = Vec::new();
    for handle in handles {
        let (len, back, total) = handle.await.unwrap();
        lens.push(len);
        assert_eq!(back, expected);
        assert_eq!(total, vec![expected.iter().sum::<u64>()]);
    }
    // 1000 over 3 workers, remainder on the last rank
    assert_eq!(lens, vec![0, 333, 333, 334]);
}
