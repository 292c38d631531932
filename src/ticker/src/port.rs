//! The interfaces a [`Ticker`] requires from its environment.
//!
//! [`Ticker`]: crate::Ticker
use crate::{Ticks, UserId};

/// Identifies the execution context a dispatch request originates from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Caller {
    /// The hardware compare event, i.e., [`Ticker::trigger`].
    ///
    /// [`Ticker::trigger`]: crate::Ticker::trigger
    Trigger,
    /// The fast context.
    Worker,
    /// The slow context.
    Job,
    /// A request entry point invoked on behalf of the given user.
    User(UserId),
}

/// The two logical contexts a [`Ticker`] runs in.
///
/// [`Ticker`]: crate::Ticker
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Context {
    /// The fast context running [`Ticker::worker`]. It must not be preempted
    /// by [`Context::Job`].
    ///
    /// [`Ticker::worker`]: crate::Ticker::worker
    Worker,
    /// The slow context running [`Ticker::job`]. It may be preempted by
    /// [`Context::Worker`].
    ///
    /// [`Ticker::job`]: crate::Ticker::job
    Job,
}

/// Provides access to a free-running hardware counter with a single compare
/// register.
pub trait PortTimer {
    /// Read the counter. The returned value must be in range
    /// `0..=`[`TickerCfg::cntr_mask`].
    ///
    /// [`TickerCfg::cntr_mask`]: crate::TickerCfg::cntr_mask
    fn tick_count(&self) -> Ticks;

    /// Program the compare register. The port should call
    /// [`Ticker::trigger`] once the counter reaches `cc`.
    ///
    /// [`Ticker::trigger`]: crate::Ticker::trigger
    fn set_compare(&self, cc: Ticks);

    /// Called when the first node is scheduled.
    fn start_counter(&self) {}

    /// Called when the last node is removed.
    fn stop_counter(&self) {}
}

/// Provides the cross-context scheduling primitive.
pub trait PortDispatch {
    /// Request that `target` run soon.
    ///
    /// The port must eventually call [`Ticker::worker`] or [`Ticker::job`]
    /// in the requested context. Pending [`Context::Worker`] requests must
    /// be serviced before pending [`Context::Job`] requests. Multiple
    /// requests made before the context runs may be coalesced.
    ///
    /// [`Ticker::worker`]: crate::Ticker::worker
    /// [`Ticker::job`]: crate::Ticker::job
    fn pend(&self, caller: Caller, target: Context);
}

/// Everything a [`Ticker`] needs from its environment.
///
/// [`Ticker`]: crate::Ticker
pub trait Port: PortTimer + PortDispatch {}

impl<T: PortTimer + PortDispatch + ?Sized> Port for T {}

impl<T: PortTimer + ?Sized> PortTimer for &T {
    #[inline]
    fn tick_count(&self) -> Ticks {
        (**self).tick_count()
    }

    #[inline]
    fn set_compare(&self, cc: Ticks) {
        (**self).set_compare(cc)
    }

    #[inline]
    fn start_counter(&self) {
        (**self).start_counter()
    }

    #[inline]
    fn stop_counter(&self) {
        (**self).stop_counter()
    }
}

impl<T: PortDispatch + ?Sized> PortDispatch for &T {
    #[inline]
    fn pend(&self, caller: Caller, target: Context) {
        (**self).pend(caller, target)
    }
}
