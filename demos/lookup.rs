//! Reverse lookup of the addresses given on the command line.
//!
//! Run with `cargo run --example lookup -- 1.1.1.1 2606:4700:4700::1111`.

use std::net::IpAddr;
use std::process::exit;

use tracing_subscriber::EnvFilter;
use unbound_bridge::{ContextConfig, Unbound};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .try_init()
        .ok();

    let addrs: Vec<IpAddr> = std::env::args()
        .skip(1)
        .map(|arg| match arg.parse() {
            Ok(addr) => addr,
            Err(_) => {
                eprintln!("Not an IP address: {}", arg);
                exit(1);
            }
        })
        .collect();
    if addrs.is_empty() {
        eprintln!("Usage: lookup <addr> [<addr> ...]");
        exit(1);
    }

    let unbound = match Unbound::new() {
        Ok(unbound) => unbound,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };
    println!("Using engine version {}", unbound.engine_version());

    let ctx = match unbound.new_context(ContextConfig::default()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    for addr in addrs {
        match unbound.reverse_lookup(&ctx, addr).await {
            Ok(Some(name)) => {
                println!("Host {} has domain name pointer {}", addr, name)
            }
            Ok(None) => println!("Host {} has no domain name pointer", addr),
            Err(err) => println!("Error for {}: {}", addr, err),
        }
    }

    unbound.dispose_context(&ctx);
}
