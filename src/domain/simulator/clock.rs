use std::sync::{Arc, RwLock};

/// Supplier of "now" in whole seconds.
///
/// The scheduling core never reads the system clock directly; everything that
/// needs the current time asks this trait. Production code installs
/// [`WallClock`], the replay harness and the tests install a [`MockClock`]
/// and advance it explicitly.
pub trait SystemClock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone)]
pub struct WallClock;

impl SystemClock for WallClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A shared, manually advanced clock for virtual-time runs.
#[derive(Debug, Clone)]
pub struct MockClock {
    time: Arc<RwLock<i64>>,
}

impl MockClock {
    pub fn new(time: i64) -> MockClock {
        MockClock { time: Arc::new(RwLock::new(time)) }
    }

    pub fn set(&self, time: i64) {
        *self.time.write().expect("RwLock poisoned") = time;
    }

    pub fn advance(&self, delta: i64) {
        *self.time.write().expect("RwLock poisoned") += delta;
    }
}

impl SystemClock for MockClock {
    fn now(&self) -> i64 {
        *self.time.read().expect("RwLock poisoned")
    }
}
