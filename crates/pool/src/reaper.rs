//! Background eviction of expired connections
//!
//! One thread per pool wakes on a fixed period and calls
//! [`ConnectionPool::evict_expired`]. The period follows the idle timeout,
//! clamped to one second at the low end and one minute at the high end.
//! The thread holds only a weak reference and exits when the pool is
//! dropped or closed, or when the reaper is stopped.

use crate::pool::ConnectionPool;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};
use xapool_core::Result;

const MIN_PERIOD: Duration = Duration::from_secs(1);
const MAX_PERIOD: Duration = Duration::from_secs(60);

/// Sweep period for a pool with the given idle timeout
pub fn reap_period(idle_timeout: Option<Duration>) -> Duration {
    match idle_timeout {
        Some(t) => t.clamp(MIN_PERIOD, MAX_PERIOD),
        None => MAX_PERIOD,
    }
}

struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a running reaper thread; stops it on drop
pub struct PoolReaper {
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
    period: Duration,
}

impl PoolReaper {
    /// Start sweeping `pool`
    pub fn spawn(pool: &Arc<ConnectionPool>) -> Result<Self> {
        let period = reap_period(pool.config().max_idle_time_bound());
        let shutdown = Arc::new(Shutdown {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let weak = Arc::downgrade(pool);
        let signal = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name(format!("xapool-reaper-{}", pool.name()))
            .spawn(move || loop {
                {
                    let mut stopped = signal.stopped.lock();
                    if !*stopped {
                        signal.wake.wait_for(&mut stopped, period);
                    }
                    if *stopped {
                        break;
                    }
                }

                let Some(pool) = weak.upgrade() else {
                    break;
                };
                if !pool.is_open() {
                    break;
                }
                let evicted = pool.evict_expired();
                trace!(pool = %pool.name(), evicted, "reaper sweep");
            })?;

        debug!(pool = %pool.name(), period_ms = period.as_millis() as u64, "reaper started");
        Ok(PoolReaper {
            shutdown,
            thread: Some(thread),
            period,
        })
    }

    /// Sweep period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        {
            let mut stopped = self.shutdown.stopped.lock();
            *stopped = true;
            self.shutdown.wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("reaper thread panicked");
            }
        }
    }
}

impl Drop for PoolReaper {
    fn drop(&mut self) {
        self.stop();
    }
}
