//! Request parameters and the requests stored in user queues.
use crate::{node::Expiry, utils::Init, NodeId, Status, Ticks};

/// A node's expiry callback. Called in the worker context with the opaque
/// context value given to [`Start::on_expire`].
pub type TimeoutFn = fn(Expiry, usize);

/// A request's completion callback. Called in the job context.
pub type OpFn = fn(Status, usize);

/// A [`Ticker::next_slot_get`] completion callback, receiving the advanced
/// cursor. Called in the job context.
///
/// [`Ticker::next_slot_get`]: crate::Ticker::next_slot_get
pub type SlotFn = fn(Status, SlotCursor, usize);

/// The parameters of [`Ticker::start`].
///
/// [`Ticker::start`]: crate::Ticker::start
#[derive(Debug, Copy, Clone)]
pub struct Start {
    /// The counter value `first` is measured from.
    pub anchor: Ticks,
    /// The delay from `anchor` to the first expiry.
    pub first: Ticks,
    /// The period in whole ticks. `0` makes the node one-shot.
    pub periodic: Ticks,
    /// The fractional part of the period, in units of
    /// [`TickerCfg::remainder_range`].
    ///
    /// [`TickerCfg::remainder_range`]: crate::TickerCfg::remainder_range
    pub remainder_periodic: u32,
    /// The number of periods the node may be skipped between expiries.
    pub lazy: u16,
    /// The length of the exclusive window reserved at each expiry.
    pub slot: Ticks,
    pub timeout: Option<TimeoutFn>,
    pub context: usize,
}

impl Start {
    /// A one-shot node expiring `first` ticks after `anchor`, without a
    /// slot or a callback.
    pub const fn new(anchor: Ticks, first: Ticks) -> Self {
        Self {
            anchor,
            first,
            periodic: 0,
            remainder_periodic: 0,
            lazy: 0,
            slot: 0,
            timeout: None,
            context: 0,
        }
    }

    pub const fn periodic(self, ticks: Ticks, remainder: u32) -> Self {
        Self {
            periodic: ticks,
            remainder_periodic: remainder,
            ..self
        }
    }

    pub const fn lazy(self, lazy: u16) -> Self {
        Self { lazy, ..self }
    }

    pub const fn slot(self, ticks: Ticks) -> Self {
        Self { slot: ticks, ..self }
    }

    pub const fn on_expire(self, timeout: TimeoutFn, context: usize) -> Self {
        Self {
            timeout: Some(timeout),
            context,
            ..self
        }
    }
}

/// The parameters of [`Ticker::update`]. The default value changes nothing
/// and is rejected.
///
/// [`Ticker::update`]: crate::Ticker::update
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Update {
    /// Delay the next expiry by this many ticks.
    pub drift_plus: Ticks,
    /// Advance the next expiry by this many ticks.
    pub drift_minus: Ticks,
    /// Lengthen the slot.
    pub slot_plus: Ticks,
    /// Shorten the slot (saturating at zero).
    pub slot_minus: Ticks,
    /// The new number of periods to skip. For a periodic node, whole
    /// periods are added to or removed from the next expiry to reach it.
    pub lazy: Option<u16>,
    /// The new collision priority.
    pub force: Option<u8>,
}

impl Update {
    /// Check if applying `self` would have any effect.
    pub(crate) fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// The state of an iteration over slot-bearing nodes by
/// [`Ticker::next_slot_get`].
///
/// [`Ticker::next_slot_get`]: crate::Ticker::next_slot_get
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlotCursor {
    /// The node found by the last query, or `None` if the iteration is
    /// fresh or exhausted.
    pub id: Option<NodeId>,
    /// The ticker's time reference the cursor is relative to.
    pub ticks_current: Ticks,
    /// The offset of [`Self::id`]'s expiry from [`Self::ticks_current`].
    pub ticks_to_expire: Ticks,
}

impl SlotCursor {
    /// A cursor starting from the earliest slot-bearing node.
    pub const START: Self = Self {
        id: None,
        ticks_current: 0,
        ticks_to_expire: 0,
    };
}

impl Default for SlotCursor {
    fn default() -> Self {
        Self::START
    }
}

#[derive(Copy, Clone)]
pub(crate) enum OpKind {
    /// Already processed.
    None,
    IdleGet,
    SlotGet(SlotCursor),
    Start(Start),
    Update(Update),
    Stop,
}

#[derive(Copy, Clone)]
pub(crate) enum Callback {
    None,
    Status(OpFn),
    Slot(SlotFn),
}

/// One pending request.
#[derive(Copy, Clone)]
pub(crate) struct UserOp {
    pub(crate) kind: OpKind,
    /// The target node. Unused by inquiries.
    pub(crate) id: NodeId,
    pub(crate) callback: Callback,
    pub(crate) context: usize,
}

impl Init for UserOp {
    const INIT: Self = Self {
        kind: OpKind::None,
        id: 0,
        callback: Callback::None,
        context: 0,
    };
}

impl UserOp {
    /// Invoke the completion callback.
    pub(crate) fn complete(&self, status: Status, cursor: SlotCursor) {
        match self.callback {
            Callback::None => {}
            Callback::Status(f) => f(status, self.context),
            Callback::Slot(f) => f(status, cursor, self.context),
        }
    }
}
