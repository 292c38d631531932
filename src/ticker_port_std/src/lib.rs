#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use spin::Mutex as SpinMutex;
use ticker::{Caller, Context, PortDispatch, PortTimer, Ticker, TickerCfg, Ticks};

/// Used by the demo binary and tests
#[doc(hidden)]
pub extern crate env_logger;

/// The maximum number of context runs [`Simulate::run_pending`] performs
/// before concluding that the ticker is livelocked.
pub const RUN_PENDING_LIMIT: usize = 10_000;

/// A simulated free-running counter with one compare register, plus a
/// dispatcher for the worker and job contexts.
///
/// Simulated time is a 64-bit count of ticks since the creation of the port.
/// The counter value seen by the ticker is that time masked to the
/// configured counter width. Time only advances through [`Simulate`]
/// drivers (and, optionally, on every counter read; see
/// [`Self::set_read_latency`]).
pub struct SimPort {
    /// This field is only touched briefly by the port methods and the
    /// drivers, so `SpinMutex` is sufficient.
    state: SpinMutex<SimState>,
}

struct SimState {
    now: u64,
    cntr_mask: Ticks,
    /// Disarmed once it fires.
    compare: Option<Ticks>,
    compare_writes: usize,
    counter_running: bool,
    worker_pending: bool,
    job_pending: bool,
    read_latency: u64,
    pends: Vec<(Caller, Context)>,
}

impl SimPort {
    pub fn new(cfg: &TickerCfg) -> Self {
        Self {
            state: SpinMutex::new(SimState {
                now: 0,
                cntr_mask: cfg.cntr_mask(),
                compare: None,
                compare_writes: 0,
                counter_running: false,
                worker_pending: false,
                job_pending: false,
                read_latency: 0,
                pends: Vec::new(),
            }),
        }
    }

    /// Get the current simulated time.
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Get the armed compare value.
    pub fn compare(&self) -> Option<Ticks> {
        self.state.lock().compare
    }

    /// Get the number of times the compare register was written.
    pub fn compare_writes(&self) -> usize {
        self.state.lock().compare_writes
    }

    /// Check if the ticker has the counter started. The simulated counter
    /// keeps counting either way.
    pub fn is_counter_running(&self) -> bool {
        self.state.lock().counter_running
    }

    /// Make every counter read advance the simulated time by `ticks`,
    /// modelling the time spent by a slow CPU between reads.
    pub fn set_read_latency(&self, ticks: u64) {
        self.state.lock().read_latency = ticks;
    }

    /// Take the log of dispatch requests made so far.
    pub fn take_pends(&self) -> Vec<(Caller, Context)> {
        std::mem::take(&mut self.state.lock().pends)
    }

    /// Advance the simulated time to `t` (if it's in the future) without
    /// processing anything.
    pub fn advance_to(&self, t: u64) {
        let mut state = self.state.lock();
        state.now = state.now.max(t);
    }

    /// Get the simulated time at which the armed compare value matches.
    pub fn next_fire(&self) -> Option<u64> {
        let state = self.state.lock();
        let cc = state.compare?;
        let delta = cc.wrapping_sub(state.now as Ticks) & state.cntr_mask;
        Some(state.now + delta as u64)
    }

    /// Take one pending context, the worker first.
    fn take_pending(&self) -> Option<Context> {
        let mut state = self.state.lock();
        if state.worker_pending {
            state.worker_pending = false;
            Some(Context::Worker)
        } else if state.job_pending {
            state.job_pending = false;
            Some(Context::Job)
        } else {
            None
        }
    }

    /// Disarm the compare register if it matches at the current time.
    fn fire(&self) -> bool {
        let mut state = self.state.lock();
        match state.compare {
            Some(cc) if cc == state.now as Ticks & state.cntr_mask => {
                log::trace!("compare match at {}", state.now);
                state.compare = None;
                true
            }
            _ => false,
        }
    }
}

impl PortTimer for SimPort {
    fn tick_count(&self) -> Ticks {
        let mut state = self.state.lock();
        let count = state.now as Ticks & state.cntr_mask;
        state.now += state.read_latency;
        count
    }

    fn set_compare(&self, cc: Ticks) {
        log::trace!("set_compare({})", cc);
        let mut state = self.state.lock();
        debug_assert_eq!(cc & !state.cntr_mask, 0);
        state.compare = Some(cc);
        state.compare_writes += 1;
    }

    fn start_counter(&self) {
        log::trace!("start_counter");
        self.state.lock().counter_running = true;
    }

    fn stop_counter(&self) {
        log::trace!("stop_counter");
        self.state.lock().counter_running = false;
    }
}

impl PortDispatch for SimPort {
    fn pend(&self, caller: Caller, target: Context) {
        log::trace!("pend({:?}, {:?})", caller, target);
        let mut state = self.state.lock();
        match target {
            Context::Worker => state.worker_pending = true,
            Context::Job => state.job_pending = true,
        }
        state.pends.push((caller, target));
    }
}

/// Drives a [`Ticker`] running on a [`SimPort`].
pub trait Simulate {
    /// Run pending contexts until none is left, the worker before the job.
    ///
    /// # Panics
    ///
    /// Panics if more than [`RUN_PENDING_LIMIT`] runs are needed.
    fn run_pending(&self);

    /// Advance the simulated time to `t`, firing every compare match
    /// occurring at or before `t` and running the dispatched contexts.
    fn run_until(&self, t: u64);

    /// Equivalent to `run_until(now + ticks)`.
    fn run_for(&self, ticks: u64);
}

impl<const NODES: usize, const USERS: usize, const OPS: usize> Simulate
    for Ticker<SimPort, NODES, USERS, OPS>
{
    fn run_pending(&self) {
        for _ in 0..RUN_PENDING_LIMIT {
            match self.port().take_pending() {
                Some(Context::Worker) => self.worker(),
                Some(Context::Job) => self.job(),
                None => return,
            }
        }
        panic!("the ticker didn't settle after {RUN_PENDING_LIMIT} context runs");
    }

    fn run_until(&self, t: u64) {
        let port = self.port();
        loop {
            self.run_pending();

            match port.next_fire() {
                Some(at) if at <= t => {
                    port.advance_to(at);
                    if port.fire() {
                        self.trigger();
                    }
                }
                _ if port.now() < t => port.advance_to(t),
                _ => break,
            }
        }
    }

    fn run_for(&self, ticks: u64) {
        self.run_until(self.port().now() + ticks);
    }
}
