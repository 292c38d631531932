#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]
use core::sync::atomic::AtomicBool;

mod api;
mod cfg;
mod error;
mod job;
mod list;
mod node;
mod port;
mod request;
mod user;
mod utils;
mod worker;

pub use self::{
    api::*,
    cfg::{CfgError, TickerCfg, TickerOptions},
    error::Status,
    node::Expiry,
    port::{Caller, Context, Port, PortDispatch, PortTimer},
    request::{OpFn, SlotCursor, SlotFn, Start, TimeoutFn, Update},
    utils::Init,
};

/// A counter value or a duration measured in counter ticks.
pub type Ticks = u32;

/// Identifies a node. Nodes are numbered `0..NODES`.
pub type NodeId = u8;

/// Identifies a user (a caller domain owning a request queue). Users are
/// numbered `0..USERS`.
pub type UserId = u8;

/// A timing engine multiplexing `NODES` timed events onto the single compare
/// register provided by `P`.
///
/// Requests are accepted from `USERS` caller domains, each through a request
/// queue of `OPS` slots (holding up to `OPS - 1` outstanding requests).
///
/// See [the crate-level documentation](crate) for an overview.
pub struct Ticker<P, const NODES: usize, const USERS: usize, const OPS: usize> {
    cfg: TickerCfg,
    port: P,
    /// Everything the worker and the job mutate. Only ever acquired with
    /// `try_lock`: a failed acquisition means the other context is running,
    /// and the caller records that fact in `worker_trigger` or
    /// `job_pending` instead of waiting.
    state: spin::Mutex<worker::TickerState<NODES>>,
    users: [user::User<OPS>; USERS],
    /// Set from the start of a worker run until its end. A worker that
    /// couldn't get in leaves it set, and the lock holder re-dispatches the
    /// worker.
    worker_trigger: AtomicBool,
    /// A job pass was requested while the state was locked.
    job_pending: AtomicBool,
}

impl<P, const NODES: usize, const USERS: usize, const OPS: usize> Ticker<P, NODES, USERS, OPS> {
    const CAPACITY_OK: () = {
        assert!(NODES <= NodeId::MAX as usize + 1, "`NODES` must be in range `0..=256`");
        assert!(
            USERS >= 1 && USERS <= UserId::MAX as usize + 1,
            "`USERS` must be in range `1..=256`"
        );
        assert!(OPS >= 2 && OPS <= 256, "`OPS` must be in range `2..=256`");
    };

    /// Construct a `Ticker` with all nodes idle.
    pub const fn new(cfg: TickerCfg, port: P) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;

        Self {
            cfg,
            port,
            state: spin::Mutex::new(worker::TickerState::<NODES>::INIT),
            users: [const { user::User::<OPS>::INIT }; USERS],
            worker_trigger: AtomicBool::new(false),
            job_pending: AtomicBool::new(false),
        }
    }

    /// Get the configuration.
    #[inline]
    pub const fn cfg(&self) -> &TickerCfg {
        &self.cfg
    }

    /// Get the port.
    #[inline]
    pub const fn port(&self) -> &P {
        &self.port
    }
}
