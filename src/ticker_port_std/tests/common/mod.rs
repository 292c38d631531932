//! Shared fixtures for the integration tests
#![allow(dead_code)]
use spin::Mutex as SpinMutex;
use std::sync::Arc;
use ticker::{Expiry, SlotCursor, Status, Ticker, TickerCfg, TickerOptions};
use ticker_port_std::SimPort;

pub const NODES: usize = 8;
pub const USERS: usize = 2;
pub const OPS: usize = 6;

pub type SimTicker = Ticker<SimPort, NODES, USERS, OPS>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A 32768 Hz, 24-bit counter whose compare register accepts any future
/// value.
pub fn cfg() -> TickerCfg {
    TickerCfg::new(TickerOptions {
        cmp_offset_min: 0,
        ..TickerOptions::RTC_32K
    })
    .unwrap()
}

pub fn new_ticker() -> SimTicker {
    init_logger();
    new_ticker_with_cfg(cfg())
}

pub fn new_ticker_with_cfg(cfg: TickerCfg) -> SimTicker {
    Ticker::new(cfg, SimPort::new(&cfg))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Expired { tag: u32, expiry: Expiry },
    Done { tag: u32, status: Status },
    Slot { tag: u32, status: Status, cursor: SlotCursor },
}

/// Records the callbacks invoked by a ticker, in order.
#[derive(Default)]
pub struct Log(SpinMutex<Vec<Event>>);

impl Log {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn push(&self, event: Event) {
        log::trace!("{:?}", event);
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Get the expiries recorded for `tag`.
    pub fn expiries(&self, tag: u32) -> Vec<Expiry> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match *e {
                Event::Expired { tag: t, expiry } if t == tag => Some(expiry),
                _ => None,
            })
            .collect()
    }

    /// Get the expiry ticks recorded for `tag`.
    pub fn expiry_ticks(&self, tag: u32) -> Vec<u32> {
        self.expiries(tag)
            .into_iter()
            .map(|e| e.ticks_at_expire)
            .collect()
    }

    /// Get the completion statuses recorded for `tag`.
    pub fn done(&self, tag: u32) -> Vec<Status> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match *e {
                Event::Done { tag: t, status } if t == tag => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Get the slot query results recorded for `tag`.
    pub fn slots(&self, tag: u32) -> Vec<SlotCursor> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match *e {
                Event::Slot { tag: t, cursor, .. } if t == tag => Some(cursor),
                _ => None,
            })
            .collect()
    }
}

/// The context value given to the ticker's callbacks. Must stay in place
/// while the ticker may call back.
pub struct Probe {
    pub tag: u32,
    log: Arc<Log>,
}

impl Probe {
    pub fn new(tag: u32, log: &Arc<Log>) -> Self {
        Self {
            tag,
            log: Arc::clone(log),
        }
    }

    pub fn ctx(&self) -> usize {
        self as *const Self as usize
    }

    /// Recover a `Probe` from a context value.
    ///
    /// # Safety
    ///
    /// `ctx` must have been produced by [`Self::ctx`] on a probe that is
    /// still alive.
    pub unsafe fn from_ctx<'a>(ctx: usize) -> &'a Self {
        // Safety: Upheld by the caller
        unsafe { &*(ctx as *const Self) }
    }
}

pub fn on_expire(expiry: Expiry, ctx: usize) {
    // Safety: Every test passes `Probe::ctx` and keeps the probe alive
    let probe = unsafe { Probe::from_ctx(ctx) };
    probe.log.push(Event::Expired {
        tag: probe.tag,
        expiry,
    });
}

pub fn on_done(status: Status, ctx: usize) {
    // Safety: See `on_expire`
    let probe = unsafe { Probe::from_ctx(ctx) };
    probe.log.push(Event::Done {
        tag: probe.tag,
        status,
    });
}

pub fn on_slot(status: Status, cursor: SlotCursor, ctx: usize) {
    // Safety: See `on_expire`
    let probe = unsafe { Probe::from_ctx(ctx) };
    probe.log.push(Event::Slot {
        tag: probe.tag,
        status,
        cursor,
    });
}
