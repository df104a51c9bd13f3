use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use shardcollective::logging::{self, LogFormat};
use shardcollective::{
    ClusterContext, DistributionCoordinator, DistributionMode, PartitionPlan, ReduceOp,
    TcpFabricConfig,
};

#[derive(Parser, Debug)]
#[command(name = "shardcollective")]
#[command(about = "Balanced scatter/gather/reduce over a TCP process group")]
struct Args {
    #[arg(long, default_value_t = 0)]
    rank: usize,
    #[arg(long)]
    world_size: usize,
    /// Listen address of every rank, in rank order
    #[arg(long)]
    addr: Vec<SocketAddr>,
    #[arg(long, default_value = "scatter-gather")]
    mode: String,
    #[arg(long, value_enum, default_value_t = Distribution::AllNodesEqual)]
    distribution: Distribution,
    #[arg(long, default_value_t = 11)]
    elements: usize,
    #[arg(long, default_value_t = 100)]
    iters: u32,
    /// Print plans as JSON
    #[arg(long)]
    json: bool,
    #[arg(long, default_value_t = 30)]
    connect_timeout_secs: u64,
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Distribution {
    ControlNodeManages,
    AllNodesEqual,
}

impl From<Distribution> for DistributionMode {
    fn from(d: Distribution) -> Self {
        match d {
            Distribution::ControlNodeManages => DistributionMode::ControlNodeManages,
            Distribution::AllNodesEqual => DistributionMode::AllNodesEqual,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = logging::try_init(&args.log_level, LogFormat::from_env());

    // Plan preview needs no peers
    if args.mode == "plan" {
        let plan = PartitionPlan::compute(args.elements, args.world_size, args.distribution.into())?;
        print_plan(&plan, args.json)?;
        return Ok(());
    }

    let config = TcpFabricConfig::new(args.rank, args.world_size, args.addr.clone())
        .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs));
    let ctx = Arc::new(ClusterContext::connect_tcp(config).await?);

    match args.mode.as_str() {
        "scatter-gather" => run_scatter_gather(&ctx, &args).await?,
        "two-workers" => run_two_workers(&ctx, &args).await?,
        "allreduce" => run_allreduce(&ctx, &args).await?,
        _ => {
            // all ranks see the same args, so all bail before any collective
            bail!(
                "unknown mode: {}. Use 'plan', 'scatter-gather', 'two-workers' or 'allreduce'",
                args.mode
            );
        }
    }

    ClusterContext::finalize_shared(ctx).await?;
    Ok(())
}

fn print_plan(plan: &PartitionPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else {
        println!("{}", plan);
    }
    Ok(())
}

async fn run_scatter_gather(ctx: &Arc<ClusterContext>, args: &Args) -> Result<()> {
    let mut worker = DistributionCoordinator::new(Arc::clone(ctx));
    let rank = worker.rank();

    // Only the root knows the data
    let x: Vec<f32> = if ctx.is_root() {
        (1..=args.elements).map(|v| v as f32).collect()
    } else {
        Vec::new()
    };
    let n = worker.broadcast(x.len() as u64).await? as usize;

    worker.configure(args.distribution.into(), n).await?;
    if let (true, Some(plan)) = (ctx.is_root(), worker.plan()) {
        print_plan(plan, args.json)?;
    }

    let mut local = Vec::new();
    worker.scatter(&x, &mut local).await?;
    for e in local.iter_mut() {
        *e += rank as f32;
    }

    let mut gathered = Vec::new();
    worker.gather(&local, &mut gathered).await?;
    if ctx.is_root() {
        info!(?gathered, "gather on root");
    }

    let mut everywhere = Vec::new();
    worker.all_gather(&local, &mut everywhere).await?;
    println!("rank: {} local: {:?} all_gather: {:?}", rank, local, everywhere);

    Ok(())
}

async fn run_two_workers(ctx: &Arc<ClusterContext>, args: &Args) -> Result<()> {
    let mut w1 = DistributionCoordinator::new(Arc::clone(ctx));
    let mut w2 = DistributionCoordinator::new(Arc::clone(ctx));

    let (x1, x2): (Vec<f32>, Vec<f32>) = if ctx.is_root() {
        let n1 = args.elements;
        (
            (1..=n1).map(|v| v as f32).collect(),
            (n1 + 1..=2 * n1 + 2).map(|v| v as f32).collect(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    let n1 = w1.broadcast(x1.len() as u64).await? as usize;
    let n2 = w1.broadcast(x2.len() as u64).await? as usize;

    w1.configure(args.distribution.into(), n1).await?;
    w2.configure(args.distribution.into(), n2).await?;

    let mut x1_local = Vec::new();
    let mut x2_local = Vec::new();
    w1.scatter(&x1, &mut x1_local).await?;
    w2.scatter(&x2, &mut x2_local).await?;

    if ctx.is_root() {
        for plan in [w1.plan(), w2.plan()].into_iter().flatten() {
            print_plan(plan, args.json)?;
        }
    }
    println!("rank: {} x1: {:?} x2: {:?}", ctx.rank(), x1_local, x2_local);

    Ok(())
}

async fn run_allreduce(ctx: &Arc<ClusterContext>, args: &Args) -> Result<()> {
    let worker = DistributionCoordinator::new(Arc::clone(ctx));
    let buf = vec![ctx.rank() as f32; args.elements];
    let mut out = Vec::new();

    let start = std::time::Instant::now();
    for _ in 0..args.iters {
        worker.all_reduce(&buf, &mut out, ReduceOp::Sum).await?;
    }
    let elapsed = start.elapsed().as_secs_f64();

    let bytes = args.elements * std::mem::size_of::<f32>();
    let gbps = (bytes as f64 * args.iters as f64 * 2.0 / elapsed) / 1e9;
    println!(
        "rank {} allreduce {} bytes x {} iters -> {:.2} GB/s, final[0] = {:?}",
        ctx.rank(),
        bytes,
        args.iters,
        gbps,
        out.first()
    );

    Ok(())
}
