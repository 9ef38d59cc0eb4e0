use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::DefaultKeyedRateLimiter;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::Clock;
use governor::clock::DefaultClock;

use keyed_shot::Decision;
use keyed_shot::FixedWindowLimiter;
use keyed_shot::LimitError;
use keyed_shot::MemoryStore;
use keyed_shot::Reason;
use keyed_shot::Strategy;
use keyed_shot::TokenBucketLimiter;

// Wrapper to bridge a keyed Governor limiter into the keyed-shot Strategy trait
struct GovernorStrategy {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl std::fmt::Debug for GovernorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GovernorStrategy")
    }
}

impl Strategy for GovernorStrategy {
    fn process(&self, key: &str) -> Result<Decision, LimitError> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(_) => Ok(ControlFlow::Continue(())),
            Err(negative) => {
                let retry_after: Duration = negative.wait_time_from(self.clock.now());
                Ok(ControlFlow::Break(Reason::Rejected { retry_after }))
            }
        }
    }
}

fn bench_single_key<S: Strategy>(group_name: &str, c: &mut Criterion, strategy: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).process("hot");
        })
    });

    group.finish();
}

fn bench_parallel<S: Strategy + 'static>(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<S>,
    distinct_keys: bool,
) {
    let mut group = c.benchmark_group(group_name);
    let contention = if distinct_keys { "own-key" } else { "shared-key" };

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads-{}", num_threads, contention)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for id in 0..n {
                        let s = Arc::clone(&strategy);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;
                        let key = if distinct_keys {
                            format!("caller-{id}")
                        } else {
                            "hot".to_string()
                        };

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                let _ = black_box(s.process(&key));
                            }
                        }));
                    }

                    // Synchronize the start across all threads
                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit_val = 1_000_000;
    let period = Duration::from_secs(60);

    let fw = Arc::new(
        FixedWindowLimiter::new(MemoryStore::new())
            .quota(limit_val, period)
            .expect("valid quota"),
    );
    let tb = Arc::new(
        TokenBucketLimiter::new(MemoryStore::new())
            .quota(limit_val as f64, limit_val as f64 / period.as_secs_f64())
            .expect("valid quota"),
    );

    let gov_quota = Quota::per_minute(NonZeroU32::new(limit_val as u32).unwrap());
    let gov = Arc::new(GovernorStrategy {
        limiter: RateLimiter::keyed(gov_quota),
        clock: DefaultClock::default(),
    });

    bench_single_key("FixedWindow", c, Arc::clone(&fw));
    bench_parallel("FixedWindow", c, Arc::clone(&fw), false);
    bench_parallel("FixedWindow", c, fw, true);

    bench_single_key("TokenBucket", c, Arc::clone(&tb));
    bench_parallel("TokenBucket", c, Arc::clone(&tb), false);
    bench_parallel("TokenBucket", c, tb, true);

    bench_single_key("Governor-Keyed", c, Arc::clone(&gov));
    bench_parallel("Governor-Keyed", c, Arc::clone(&gov), false);
    bench_parallel("Governor-Keyed", c, gov, true);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
