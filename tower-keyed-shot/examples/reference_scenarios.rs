use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use clap::Subcommand;
use hdrhistogram::Histogram;
use keyed_shot::FixedWindowLimiter;
use keyed_shot::MemoryStore;
use keyed_shot::Strategy;
use keyed_shot::TokenBucketLimiter;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_keyed_shot::KeyedRateLimitLayer;
use tower_keyed_shot::ShotError;

/// Fires concurrent callers at a shared limiter and reports who got through.
#[derive(Parser, Debug)]
#[command(name = "reference_scenarios")]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand, Debug)]
enum Scenario {
    /// Many callers race for a fixed window counter
    Counter {
        /// Key every caller is counted against
        #[arg(long, default_value = "counter-limit")]
        key: String,
        #[arg(long, default_value_t = 1)]
        limit: u64,
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        window: Duration,
        #[arg(long, default_value_t = 11)]
        callers: usize,
    },
    /// Drain a token bucket, pause, then drain it again
    Bucket {
        /// Key every caller is counted against
        #[arg(long, default_value = "token-limit")]
        key: String,
        #[arg(long, default_value_t = 10.0)]
        max_permits: f64,
        #[arg(long, default_value_t = 1.0)]
        permits_per_second: f64,
        #[arg(long, default_value_t = 5)]
        first_burst: usize,
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        pause: Duration,
        #[arg(long, default_value_t = 10)]
        second_burst: usize,
    },
}

async fn handle(req: usize) -> Result<usize, BoxError> {
    Ok(req)
}

#[derive(Default)]
struct Tally {
    allowed: usize,
    limited: usize,
    unavailable: usize,
}

async fn run_burst<L>(
    label: &str,
    strategy: Arc<L>,
    key: &str,
    callers: usize,
) -> Result<(), BoxError>
where
    L: Strategy + 'static,
{
    let key = key.to_string();
    let svc = KeyedRateLimitLayer::new(strategy, move |_: &usize| key.clone())
        .layer(service_fn(handle));

    let mut tasks = JoinSet::new();
    let barrier = Arc::new(Barrier::new(callers));
    for index in 0..callers {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(index).await,
                Err(e) => Err(e),
            };
            (index, res, start.elapsed())
        });
    }

    let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3)?;
    let mut tally = Tally::default();

    println!("--- {} ---", label);
    while let Some(task) = tasks.join_next().await {
        let (index, res, elapsed) = task?;
        hist.record(elapsed.as_nanos().max(1) as u64)?;
        match res {
            Ok(_) => {
                tally.allowed += 1;
                println!("request {index:02}: allowed");
            }
            Err(e) => match e.downcast::<ShotError>().map(|shot_err| *shot_err) {
                Ok(ShotError::RateLimited { retry_after }) => {
                    tally.limited += 1;
                    println!("request {index:02}: rejected, retry after {retry_after:.2?}");
                }
                Ok(ShotError::Store(err)) => {
                    tally.unavailable += 1;
                    println!("request {index:02}: store failure: {err}");
                }
                Err(e) => return Err(e),
            },
        }
    }

    println!("Allowed/Total:   {}/{}", tally.allowed, callers);
    println!("Rejected:        {}", tally.limited);
    if tally.unavailable > 0 {
        println!("Unavailable:     {}", tally.unavailable);
    }
    println!("P50 (Decision):  {}ns", hist.value_at_quantile(0.5));
    println!("P99 (Decision):  {}ns", hist.value_at_quantile(0.99));
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    let store = Arc::new(MemoryStore::new());

    match args.scenario {
        Scenario::Counter {
            key,
            limit,
            window,
            callers,
        } => {
            let counter = Arc::new(FixedWindowLimiter::new(store).quota(limit, window)?);
            run_burst("Fixed Window", counter, &key, callers).await?;
        }
        Scenario::Bucket {
            key,
            max_permits,
            permits_per_second,
            first_burst,
            pause,
            second_burst,
        } => {
            let bucket = Arc::new(
                TokenBucketLimiter::new(store).quota(max_permits, permits_per_second)?,
            );
            run_burst("Token Bucket (first burst)", Arc::clone(&bucket), &key, first_burst)
                .await?;
            println!("sleep {}", humantime::format_duration(pause));
            sleep(pause).await;
            run_burst("Token Bucket (second burst)", bucket, &key, second_burst).await?;
        }
    }

    Ok(())
}
