//! A scripted engine for driving the facade without native code.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use unbound_bridge::conf::ContextConfig;
use unbound_bridge::engine::{
    Completion, Engine, EngineContext, EngineError,
};

/// Setup logging of events reported by the crate and the test suite.
///
/// Use the RUST_LOG environment variable to override the defaults, e.g.
/// RUST_LOG=unbound_bridge=trace.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}

//------------ Script --------------------------------------------------------

/// What the scripted engine does with a lookup for a given address.
#[derive(Clone)]
pub enum Script {
    /// Complete with the given answer after the given delay.
    Answer(Duration, Option<String>),

    /// Fail with the given reason after the given delay.
    Fail(Duration, String),

    /// Refuse the request at dispatch, before any completion exists.
    Reject(String),
}

/// The hostname the engine derives for unscripted addresses.
pub fn derived_hostname(addr: &[u8]) -> String {
    let mut name = String::new();
    for byte in addr {
        name.push_str(&byte.to_string());
        name.push('-');
    }
    name.push_str("ptr.example.net.");
    name
}

//------------ MockEngine ----------------------------------------------------

/// An engine that completes lookups from a script, each on its own thread.
///
/// Addresses without a script entry resolve to [`derived_hostname`] after
/// a short delay, so concurrency tests can check that every future gets
/// the answer that belongs to its own address.
pub struct MockEngine {
    /// Contexts created so far.
    created: Arc<AtomicUsize>,

    /// Contexts torn down so far.
    destroyed: Arc<AtomicUsize>,

    /// Lookups handed to the engine so far.
    dispatched: Arc<AtomicUsize>,

    /// Scripted behaviour by address bytes.
    scripts: Arc<Mutex<HashMap<Vec<u8>, Script>>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(MockEngine {
            created: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(AtomicUsize::new(0)),
            scripts: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scripts the engine's behaviour for one address.
    pub fn script(&self, addr: &[u8], script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(addr.to_vec(), script);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Waits until the given number of contexts has been torn down.
    pub fn wait_for_destroyed(&self, count: usize, deadline: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if self.destroyed() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.destroyed() >= count
    }
}

impl Engine for MockEngine {
    fn create_context(
        &self,
        _config: &ContextConfig,
    ) -> Result<Box<dyn EngineContext>, EngineError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            destroyed: self.destroyed.clone(),
            dispatched: self.dispatched.clone(),
            scripts: self.scripts.clone(),
        }))
    }

    fn version(&self) -> String {
        String::from("mock-1.0.0")
    }
}

//------------ MockContext ---------------------------------------------------

struct MockContext {
    destroyed: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
    scripts: Arc<Mutex<HashMap<Vec<u8>, Script>>>,
}

impl EngineContext for MockContext {
    fn reverse_lookup(
        &self,
        addr: &[u8],
        done: Completion,
    ) -> Result<(), EngineError> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .unwrap_or_else(|| {
                Script::Answer(
                    Duration::from_millis(u64::from(
                        addr.last().copied().unwrap_or(0) % 5,
                    )),
                    Some(derived_hostname(addr)),
                )
            });
        if let Script::Reject(reason) = &script {
            return Err(EngineError::new(reason.clone()));
        }
        // Complete on a thread of the engine's own, like the real engine
        // does.
        thread::spawn(move || match script {
            Script::Answer(delay, answer) => {
                thread::sleep(delay);
                done(Ok(answer));
            }
            Script::Fail(delay, reason) => {
                thread::sleep(delay);
                done(Err(EngineError::new(reason)));
            }
            Script::Reject(_) => unreachable!(),
        });
        Ok(())
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}
