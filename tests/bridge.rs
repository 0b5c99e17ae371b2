//! Context lifecycle and lookup bridging against a scripted engine.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use unbound_bridge::{ContextConfig, Error, Unbound};

mod common;

use common::{derived_hostname, MockEngine, Script};

/// Tears a fresh facade and engine pair up.
fn harness() -> (Unbound, std::sync::Arc<MockEngine>) {
    common::init_logging();
    let engine = MockEngine::new();
    (Unbound::with_engine(engine.clone()), engine)
}

#[test]
fn create_and_dispose_without_lookups() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    assert_eq!(engine.created(), 1);
    assert_eq!(engine.destroyed(), 0);

    unbound.dispose_context(&ctx);
    // Nothing was in flight, so teardown is immediate.
    assert_eq!(engine.destroyed(), 1);
}

#[test]
fn invalid_address_lengths_fail_synchronously() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();

    for len in [0usize, 1, 3, 5, 15, 17, 32] {
        let addr = vec![0u8; len];
        let res = tokio_test::block_on(
            unbound.reverse_lookup_bytes(&ctx, &addr),
        );
        assert!(
            matches!(res, Err(Error::InvalidAddress(l)) if l == len),
            "length {} was not rejected",
            len
        );
    }
    // None of these may have reached the engine.
    assert_eq!(engine.dispatched(), 0);
    unbound.dispose_context(&ctx);
}

#[test]
fn lookup_resolves_to_hostname() {
    let (unbound, engine) = harness();
    engine.script(
        &[1, 1, 1, 1],
        Script::Answer(
            Duration::from_millis(10),
            Some(String::from("one.one.one.one.")),
        ),
    );
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    let addr: IpAddr = "1.1.1.1".parse().unwrap();

    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    assert_eq!(res.unwrap().as_deref(), Some("one.one.one.one."));
    unbound.dispose_context(&ctx);
}

#[test]
fn ipv6_lookup_resolves_like_ipv4() {
    let (unbound, engine) = harness();
    let addr: IpAddr = "2606:4700:4700::1111".parse().unwrap();
    let bytes = match addr {
        IpAddr::V6(v6) => v6.octets(),
        _ => unreachable!(),
    };
    engine.script(
        &bytes,
        Script::Answer(
            Duration::from_millis(10),
            Some(String::from("one.one.one.one.")),
        ),
    );
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();

    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    assert_eq!(res.unwrap().as_deref(), Some("one.one.one.one."));
    unbound.dispose_context(&ctx);
}

#[test]
fn absent_record_is_not_an_error() {
    let (unbound, engine) = harness();
    engine.script(
        &[198, 51, 100, 1],
        Script::Answer(Duration::from_millis(5), None),
    );
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    let addr: IpAddr = "198.51.100.1".parse().unwrap();

    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    assert_eq!(res.unwrap(), None);
    unbound.dispose_context(&ctx);
}

#[test]
fn engine_failure_surfaces_through_the_future() {
    let (unbound, engine) = harness();
    engine.script(
        &[192, 0, 2, 1],
        Script::Fail(
            Duration::from_millis(5),
            String::from("resolution failed with SERVFAIL"),
        ),
    );
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    let addr: IpAddr = "192.0.2.1".parse().unwrap();

    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    match res {
        Err(Error::LookupFailed(err)) => {
            assert!(err.reason().contains("SERVFAIL"));
        }
        other => panic!("expected LookupFailed, got {:?}", other),
    }
    unbound.dispose_context(&ctx);
}

#[test]
fn rejected_dispatch_fails_without_a_completion() {
    let (unbound, engine) = harness();
    engine.script(
        &[192, 0, 2, 2],
        Script::Reject(String::from("out of memory")),
    );
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    let addr: IpAddr = "192.0.2.2".parse().unwrap();

    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    assert!(matches!(res, Err(Error::LookupFailed(_))));
    unbound.dispose_context(&ctx);
    assert!(engine.wait_for_destroyed(1, Duration::from_secs(1)));
}

#[test]
fn slow_engine_answer_times_out() {
    let (unbound, engine) = harness();
    engine.script(
        &[10, 0, 0, 1],
        Script::Answer(
            Duration::from_secs(3),
            Some(String::from("too.late.example.net.")),
        ),
    );
    let config = ContextConfig::builder()
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let ctx = unbound.new_context(config).unwrap();
    let addr: IpAddr = "10.0.0.1".parse().unwrap();

    let started = Instant::now();
    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    let elapsed = started.elapsed();

    assert!(matches!(res, Err(Error::LookupTimedOut)));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2), "timeout was not bounded");

    unbound.dispose_context(&ctx);
    // The context is torn down once the late answer releases its checkout.
    assert!(engine.wait_for_destroyed(1, Duration::from_secs(5)));
}

#[test]
fn dispose_with_outstanding_lookups_defers_teardown() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();

    let mut addrs = Vec::new();
    for i in 0..8u8 {
        let addr = [10, 1, 0, i];
        engine.script(
            &addr,
            Script::Answer(
                Duration::from_millis(150),
                Some(derived_hostname(&addr)),
            ),
        );
        addrs.push(addr);
    }

    // Dispatch happens when the call returns, not when the future is
    // awaited.
    let lookups: Vec<_> = addrs
        .iter()
        .map(|addr| unbound.reverse_lookup_bytes(&ctx, addr))
        .collect();
    assert_eq!(engine.dispatched(), 8);

    unbound.dispose_context(&ctx);
    assert_eq!(engine.destroyed(), 0, "teardown ran with lookups in flight");

    let results = tokio_test::block_on(join_all(lookups));
    for (addr, res) in addrs.iter().zip(results) {
        assert_eq!(res.unwrap().unwrap(), derived_hostname(addr));
    }
    assert!(engine.wait_for_destroyed(1, Duration::from_secs(1)));
}

#[test]
fn lookup_after_dispose_fails_fast() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    unbound.dispose_context(&ctx);

    let addr: IpAddr = "1.1.1.1".parse().unwrap();
    let res = tokio_test::block_on(unbound.reverse_lookup(&ctx, addr));
    assert!(matches!(res, Err(Error::InvalidContext)));
    assert_eq!(engine.dispatched(), 0);
}

#[test]
fn double_dispose_is_harmless() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();
    unbound.dispose_context(&ctx);
    unbound.dispose_context(&ctx);
    assert_eq!(engine.destroyed(), 1);
}

#[test]
fn contexts_are_independent() {
    let (unbound, engine) = harness();
    let one = unbound.new_context(ContextConfig::default()).unwrap();
    let two = unbound.new_context(ContextConfig::default()).unwrap();
    assert_ne!(one, two);

    unbound.dispose_context(&one);
    assert_eq!(engine.destroyed(), 1);

    // The other context still answers.
    let addr: IpAddr = "10.2.0.1".parse().unwrap();
    let res = tokio_test::block_on(unbound.reverse_lookup(&two, addr));
    assert_eq!(res.unwrap().unwrap(), derived_hostname(&[10, 2, 0, 1]));
    unbound.dispose_context(&two);
}

#[test]
fn close_disposes_every_context() {
    let (unbound, engine) = harness();
    for _ in 0..4 {
        unbound.new_context(ContextConfig::default()).unwrap();
    }
    unbound.close();
    assert_eq!(engine.destroyed(), 4);
}

#[test]
fn engine_version_passes_through() {
    let (unbound, _engine) = harness();
    assert_eq!(unbound.engine_version(), "mock-1.0.0");
}

#[test]
fn concurrent_lookups_do_not_cross_talk() {
    let (unbound, engine) = harness();
    let ctx = unbound.new_context(ContextConfig::default()).unwrap();

    // 1000 distinct addresses, all in flight at once. The scripted engine
    // answers each with a name derived from the address and shuffles
    // completion order through per-address delays.
    let addrs: Vec<[u8; 4]> = (0..1000u32)
        .map(|i| [10, 3, (i >> 8) as u8, i as u8])
        .collect();

    let lookups: Vec<_> = addrs
        .iter()
        .map(|addr| unbound.reverse_lookup_bytes(&ctx, addr))
        .collect();
    assert_eq!(engine.dispatched(), 1000);

    let results = tokio_test::block_on(join_all(lookups));
    assert_eq!(results.len(), 1000);
    for (addr, res) in addrs.iter().zip(results) {
        assert_eq!(
            res.unwrap().unwrap(),
            derived_hostname(addr),
            "answer for {:?} was not its own",
            addr
        );
    }

    unbound.dispose_context(&ctx);
    assert!(engine.wait_for_destroyed(1, Duration::from_secs(1)));
}
