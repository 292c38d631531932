//! Per-user request queues
//!
//! Each user owns a ring of `OPS` request slots indexed by three cursors:
//!
//! ```text
//!          first        middle         last
//!            │             │             │
//!   ─────────▼─────────────▼─────────────▼──────────
//!    (free)  │ managed,    │ submitted,  │ (free)
//!            │ awaiting    │ awaiting    │
//!            │ insertion / │ management  │
//!            │ inquiry     │             │
//! ```
//!
//! The producer (the request entry points) writes the slot at `last` and
//! then advances `last`. The consumer (the job) advances `middle` while
//! processing stops and updates, and `first` once starts and inquiries in
//! `first..middle` are done. A slot in `first..last` belongs to the job; any
//! other slot belongs to the producer. One slot is always left free so that
//! `first == last` unambiguously means "empty".
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use crate::{
    request::{OpKind, UserOp},
    utils::Init,
    Status,
};

pub(crate) struct OpSlot {
    op: UnsafeCell<UserOp>,
    /// The request's [`Status`] as `u8`. Readable by the producer at any
    /// time.
    status: AtomicU8,
}

impl Init for OpSlot {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        op: UnsafeCell::new(UserOp::INIT),
        status: AtomicU8::new(Status::Success as u8),
    };
}

impl OpSlot {
    pub(crate) fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(Status::Failure)
    }
}

pub(crate) struct User<const OPS: usize> {
    ops: [OpSlot; OPS],
    first: AtomicU8,
    middle: AtomicU8,
    last: AtomicU8,
    /// Set while a producer is writing a slot.
    producing: AtomicBool,
}

// Safety: `OpSlot::op` is only accessed by the producer holding `producing`
// (for the slot at `last`) or by the job (for slots in `first..last`). The
// two ranges are disjoint, and ownership is handed over by release-stores of
// `last` and `first`.
unsafe impl<const OPS: usize> Sync for User<OPS> {}

impl<const OPS: usize> Init for User<OPS> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        ops: [OpSlot::INIT; OPS],
        first: AtomicU8::new(0),
        middle: AtomicU8::new(0),
        last: AtomicU8::new(0),
        producing: AtomicBool::new(false),
    };
}

impl<const OPS: usize> User<OPS> {
    #[inline]
    pub(crate) fn next_index(i: u8) -> u8 {
        if i as usize + 1 == OPS {
            0
        } else {
            i + 1
        }
    }

    /// Append a request. Returns the slot the request was written to, or
    /// `None` if the queue is full or another producer of this user is
    /// writing concurrently.
    pub(crate) fn enqueue(&self, op: UserOp) -> Option<&OpSlot> {
        if self.producing.swap(true, Ordering::Acquire) {
            log::debug!("concurrent producers on one user queue");
            return None;
        }

        let last = self.last.load(Ordering::Relaxed);
        let next = Self::next_index(last);
        let result = if next == self.first.load(Ordering::Acquire) {
            None
        } else {
            let slot = &self.ops[last as usize];
            // Safety: The slot at `last` is outside `first..last` and we
            // hold `producing`
            unsafe { *slot.op.get() = op };
            slot.status.store(Status::Busy as u8, Ordering::Relaxed);
            self.last.store(next, Ordering::Release);
            Some(slot)
        };

        self.producing.store(false, Ordering::Release);
        result
    }

    #[inline]
    pub(crate) fn first(&self) -> u8 {
        self.first.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn middle(&self) -> u8 {
        self.middle.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_middle(&self, i: u8) {
        self.middle.store(i, Ordering::Relaxed);
    }

    /// Release the slots before `i` to the producer.
    #[inline]
    pub(crate) fn set_first(&self, i: u8) {
        self.first.store(i, Ordering::Release);
    }

    /// Read the request at index `i`.
    ///
    /// # Safety
    ///
    /// The caller must be the job (i.e., hold the ticker state lock), and `i`
    /// must be in `first..last`.
    #[inline]
    pub(crate) unsafe fn op(&self, i: u8) -> UserOp {
        // Safety: The slot is owned by the job (upheld by the caller)
        unsafe { *self.ops[i as usize].op.get() }
    }

    /// Record the outcome of the request at index `i` and mark it as
    /// processed. The completion callback is not called.
    ///
    /// # Safety
    ///
    /// See [`Self::op`].
    #[inline]
    pub(crate) unsafe fn finish(&self, i: u8, status: Status) {
        let slot = &self.ops[i as usize];
        // Safety: The slot is owned by the job (upheld by the caller)
        unsafe { (*slot.op.get()).kind = OpKind::None };
        slot.status.store(status as u8, Ordering::Release);
    }
}
