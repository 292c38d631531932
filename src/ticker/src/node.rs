//! Ticker nodes
use crate::{
    cfg::TickerCfg,
    request::{Start, TimeoutFn},
    utils::Init,
    NodeId, Ticks,
};

/// The liveness state of a [`Node`].
///
/// ```text
///            start ok            worker
///   Idle ─────────────▶ Scheduled ─────▶ Expired
///    ▲ ▲                 ▲    │            │
///    │ │ stop            │    │ update     │ job (periodic)
///    │ └─────────────────┤    ▼            │
///    │                   └── Staged ◀──────┘
///    │   insert failed /      │
///    └─ job (one-shot) ───────┘
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum NodeState {
    /// Not in the list. `start` is accepted only in this state.
    Idle,
    /// In the list and not yet claimed by the worker.
    Scheduled,
    /// Claimed by the worker; its callback has been invoked. Still in the
    /// list until the job's bottom half takes it out.
    Expired,
    /// Taken out of the list by the current job pass and waiting for
    /// reinsertion. Linked through [`Node::next`] into the pass's insertion
    /// list.
    Staged,
}

/// The information passed to a node's expiry callback.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Expiry {
    /// The counter value at which the node was due, with any pending
    /// negative drift applied.
    pub ticks_at_expire: Ticks,
    /// The accumulated fractional tick offset, in remainder units. In range
    /// `(-range / 2, range / 2]` where `range` is
    /// [`TickerCfg::remainder_range`].
    pub remainder: i32,
    /// The number of periods skipped since the previous expiry.
    pub lazy: u16,
}

/// One timed event.
#[derive(Copy, Clone)]
pub(crate) struct Node {
    /// The following node in the sorted list, or the following node in the
    /// job's insertion list while [`NodeState::Staged`].
    pub(crate) next: Option<NodeId>,
    pub(crate) state: NodeState,
    /// Ticks from the previous node's expiry (or from the instance's
    /// `ticks_current` for the head) to this node's expiry.
    pub(crate) ticks_to_expire: Ticks,
    /// A pending negative adjustment not yet folded into `ticks_to_expire`.
    pub(crate) ticks_to_expire_minus: Ticks,
    pub(crate) ticks_periodic: Ticks,
    /// The fractional part of the period, in remainder units.
    pub(crate) remainder_periodic: u32,
    pub(crate) remainder_current: i32,
    pub(crate) lazy_periodic: u16,
    pub(crate) lazy_current: u16,
    /// The length of the exclusive window starting at the expiry. `0` means
    /// no reservation.
    pub(crate) ticks_slot: Ticks,
    /// The priority used to arbitrate slot collisions.
    pub(crate) force: u8,
    pub(crate) timeout: Option<TimeoutFn>,
    pub(crate) context: usize,
}

impl Init for Node {
    const INIT: Self = Self {
        next: None,
        state: NodeState::Idle,
        ticks_to_expire: 0,
        ticks_to_expire_minus: 0,
        ticks_periodic: 0,
        remainder_periodic: 0,
        remainder_current: 0,
        lazy_periodic: 0,
        lazy_current: 0,
        ticks_slot: 0,
        force: 0,
        timeout: None,
        context: 0,
    };
}

impl Node {
    #[inline]
    pub(crate) fn is_periodic(&self) -> bool {
        self.ticks_periodic != 0
    }

    /// The number of periods skipped beyond what the node permits.
    #[inline]
    pub(crate) fn skip(&self) -> u16 {
        self.lazy_current.saturating_sub(self.lazy_periodic)
    }

    /// Prepare the node for insertion as requested by `start`.
    pub(crate) fn start(&mut self, params: &Start, ticks_current: Ticks, cfg: &TickerCfg) {
        self.ticks_periodic = params.periodic;
        self.remainder_periodic = params.remainder_periodic;
        self.lazy_periodic = params.lazy;
        self.ticks_slot = params.slot;
        self.timeout = params.timeout;
        self.context = params.context;
        self.ticks_to_expire = params.first;
        self.ticks_to_expire_minus = 0;
        self.prep(ticks_current, params.anchor, cfg);
        self.remainder_current = 0;
        self.lazy_current = 0;
        self.force = 1;
    }

    /// Re-express `ticks_to_expire` (currently relative to `ticks_at_start`)
    /// relative to `ticks_current`, and fold in `ticks_to_expire_minus` as
    /// far as possible.
    ///
    /// `ticks_at_start` may be in the past or the future of `ticks_current`;
    /// the half of the counter range that contains it is chosen by the
    /// counter's most significant bit.
    pub(crate) fn prep(&mut self, ticks_current: Ticks, ticks_at_start: Ticks, cfg: &TickerCfg) {
        let mut ticks_to_expire = self.ticks_to_expire;
        let mut ticks_to_expire_minus = self.ticks_to_expire_minus;

        if ticks_at_start.wrapping_sub(ticks_current) & cfg.cntr_msb() == 0 {
            // `ticks_at_start` is in the future
            ticks_to_expire =
                ticks_to_expire.saturating_add(cfg.ticks_diff(ticks_at_start, ticks_current));
        } else {
            let delta_current_start = cfg.ticks_diff(ticks_current, ticks_at_start);
            if ticks_to_expire > delta_current_start {
                ticks_to_expire -= delta_current_start;
            } else {
                ticks_to_expire_minus = ticks_to_expire_minus
                    .saturating_add(delta_current_start - ticks_to_expire);
                ticks_to_expire = 0;
            }
        }

        if ticks_to_expire > ticks_to_expire_minus {
            ticks_to_expire -= ticks_to_expire_minus;
            ticks_to_expire_minus = 0;
        } else {
            ticks_to_expire_minus -= ticks_to_expire;
            ticks_to_expire = 0;
        }

        self.ticks_to_expire = ticks_to_expire;
        self.ticks_to_expire_minus = ticks_to_expire_minus;
    }

    /// Fold `ticks_to_expire_minus` into `ticks_to_expire` as far as
    /// possible.
    pub(crate) fn fold_minus(&mut self) {
        let folded = self.ticks_to_expire.min(self.ticks_to_expire_minus);
        self.ticks_to_expire -= folded;
        self.ticks_to_expire_minus -= folded;
    }

    /// Add one period's fractional part to the accumulator. Returns `1` if
    /// the accumulator crossed `+range / 2` and a whole tick was carried out
    /// of it.
    pub(crate) fn remainder_inc(&mut self, range: u32) -> Ticks {
        let range = range as i64;
        let mut rc = self.remainder_current as i64 + self.remainder_periodic as i64;
        let carry = if rc > range >> 1 {
            rc -= range;
            1
        } else {
            0
        };
        debug_assert!(rc > (range >> 1) - range && rc <= range >> 1);
        self.remainder_current = rc as i32;
        carry
    }

    /// Undo one [`Self::remainder_inc`]. Returns `1` if that step had
    /// carried a whole tick.
    pub(crate) fn remainder_dec(&mut self, range: u32) -> Ticks {
        let range = range as i64;
        let mut rc = self.remainder_current as i64 - self.remainder_periodic as i64;
        let borrow = if rc <= (range >> 1) - range {
            rc += range;
            1
        } else {
            0
        };
        self.remainder_current = rc as i32;
        borrow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::TickerOptions;
    use quickcheck_macros::quickcheck;

    fn cfg() -> TickerCfg {
        TickerCfg::new(TickerOptions::RTC_32K).unwrap()
    }

    #[test]
    fn prep_future_anchor() {
        let cfg = cfg();
        let mut node = Node::INIT;
        node.ticks_to_expire = 10;
        node.prep(100, 105, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (15, 0));
    }

    #[test]
    fn prep_past_anchor() {
        let cfg = cfg();
        let mut node = Node::INIT;
        node.ticks_to_expire = 10;
        node.prep(100, 95, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (5, 0));

        // Overdue by 3 ticks
        node.ticks_to_expire = 10;
        node.prep(100, 87, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (0, 3));
    }

    #[test]
    fn prep_across_wrap() {
        let cfg = cfg();
        let mut node = Node::INIT;
        node.ticks_to_expire = 10;
        node.prep(0xff_fffe, 3, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (15, 0));

        node.ticks_to_expire = 10;
        node.prep(3, 0xff_fffe, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (5, 0));
    }

    #[test]
    fn prep_folds_minus() {
        let cfg = cfg();
        let mut node = Node::INIT;
        node.ticks_to_expire = 10;
        node.ticks_to_expire_minus = 4;
        node.prep(0, 0, &cfg);
        assert_eq!((node.ticks_to_expire, node.ticks_to_expire_minus), (6, 0));
    }

    #[test]
    fn remainder_carry_third() {
        let range = 30;
        let mut node = Node::INIT;
        node.remainder_periodic = 10;
        let carries: Vec<_> = (0..6).map(|_| node.remainder_inc(range)).collect();
        assert_eq!(carries, [0, 1, 0, 0, 1, 0]);
        assert_eq!(node.remainder_current, 0);
    }

    /// `remainder_dec` undoes `remainder_inc` exactly.
    #[quickcheck]
    fn remainder_dec_inverts_inc(range: u32, periodic: u32, steps: u8) {
        let range = range % (1 << 31) + 1;
        let mut node = Node::INIT;
        node.remainder_periodic = periodic % range;

        let mut carries = Vec::new();
        let mut history = vec![node.remainder_current];
        for _ in 0..steps {
            carries.push(node.remainder_inc(range));
            history.push(node.remainder_current);
        }
        history.pop();

        while let Some(carry) = carries.pop() {
            assert_eq!(node.remainder_dec(range), carry);
            assert_eq!(Some(node.remainder_current), history.pop());
        }
    }

    /// The realised length of `n` periods stays within one tick of the exact
    /// length.
    #[quickcheck]
    fn remainder_accuracy(range: u32, periodic: u32, n: u16) {
        let range = range % (1 << 31) + 1;
        let mut node = Node::INIT;
        node.remainder_periodic = periodic % range;

        let carried: u64 = (0..n).map(|_| node.remainder_inc(range) as u64).sum();
        let exact = n as u64 * node.remainder_periodic as u64;
        let realised = carried * range as u64;
        assert!(
            realised.abs_diff(exact) <= range as u64,
            "carried = {carried}, exact = {exact}/{range}"
        );
    }
}
