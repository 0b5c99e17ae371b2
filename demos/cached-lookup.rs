//! Caller-side caching in front of the lookup bridge.
//!
//! The bridge itself never caches; a poller that hits the same addresses
//! over and over puts a cache in front of it, like this one. The demo
//! fires a batch of lookups for a small address pool, so later rounds are
//! answered from the cache.
//!
//! Run with `cargo run --example cached-lookup`.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use moka::future::Cache;
use rand::Rng;
use tracing_subscriber::EnvFilter;
use unbound_bridge::{ContextConfig, Unbound};

const ROUNDS: usize = 3;
const LOOKUPS_PER_ROUND: usize = 200;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .try_init()
        .ok();

    let unbound = match Unbound::new() {
        Ok(unbound) => unbound,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    let ctx = match unbound.new_context(ContextConfig::default()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let cache: Cache<IpAddr, Option<String>> = Cache::builder()
        .time_to_live(Duration::from_secs(60))
        .build();

    let mut rng = rand::thread_rng();
    for round in 1..=ROUNDS {
        let started = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..LOOKUPS_PER_ROUND {
            // A small pool, so rounds revisit addresses.
            let addr = IpAddr::V4(Ipv4Addr::new(
                1,
                1,
                1,
                rng.gen_range(1..=8),
            ));
            let unbound = unbound.clone();
            let ctx = ctx;
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_with(addr, async move {
                        unbound
                            .reverse_lookup(&ctx, addr)
                            .await
                            .ok()
                            .flatten()
                    })
                    .await
            }));
        }
        let mut answered = 0;
        for task in tasks {
            if task.await.expect("lookup task panicked").is_some() {
                answered += 1;
            }
        }
        println!(
            "Round {}: {} lookups, {} with a PTR name, {}ms \
             (cache holds {} entries)",
            round,
            LOOKUPS_PER_ROUND,
            answered,
            started.elapsed().as_millis(),
            cache.entry_count(),
        );
    }

    unbound.dispose_context(&ctx);
}
