//! Request entry points and introspection
use crate::{
    port::{Caller, Context, Port},
    request::{Callback, OpFn, OpKind, SlotCursor, SlotFn, Start, Update, UserOp},
    worker::TickerState,
    NodeId, Status, Ticker, Ticks, UserId,
};

impl<P: Port, const NODES: usize, const USERS: usize, const OPS: usize>
    Ticker<P, NODES, USERS, OPS>
{
    /// Schedule node `id`.
    ///
    /// The request is queued on `user`'s request queue and carried out by the
    /// next job pass, which reports the outcome to `done`. Fails there if the
    /// node isn't idle or if a one-shot node's slot can't be placed. A
    /// periodic node whose slot collides moves to a later period instead.
    ///
    /// Returns [`Status::Busy`] if the request was queued, or
    /// [`Status::Failure`] if `user` or `id` is out of range, the queue is
    /// full, or `params` is out of range (`first` and `periodic` must be less
    /// than half the counter range, and `remainder_periodic` less than
    /// [`TickerCfg::remainder_range`]). May return the final status if the
    /// job ran before this method returned.
    ///
    /// [`TickerCfg::remainder_range`]: crate::TickerCfg::remainder_range
    pub fn start(
        &self,
        user: UserId,
        id: NodeId,
        params: Start,
        done: Option<OpFn>,
        context: usize,
    ) -> Status {
        let msb = self.cfg.cntr_msb();
        if params.first >= msb
            || params.periodic >= msb
            || params.remainder_periodic >= self.cfg.remainder_range()
        {
            log::debug!("start: node {} has out-of-range parameters: {:?}", id, params);
            return Status::Failure;
        }

        self.request(user, Some(id), OpKind::Start(params), status_callback(done), context)
    }

    /// Adjust a scheduled node's next expiry, slot, lazy count, or force.
    /// Fails if the node is idle or if `params` has no effect.
    pub fn update(
        &self,
        user: UserId,
        id: NodeId,
        params: Update,
        done: Option<OpFn>,
        context: usize,
    ) -> Status {
        self.request(user, Some(id), OpKind::Update(params), status_callback(done), context)
    }

    /// Unschedule node `id`. Fails if the node is already idle.
    ///
    /// A node whose expiry is already being processed by the worker can't be
    /// stopped before that expiry; the request then takes effect right after
    /// it.
    pub fn stop(&self, user: UserId, id: NodeId, done: Option<OpFn>, context: usize) -> Status {
        self.request(user, Some(id), OpKind::Stop, status_callback(done), context)
    }

    /// Find the slot-bearing node following `cursor`.
    ///
    /// `done` receives the advanced cursor. Pass [`SlotCursor::START`] (or a
    /// cursor from an earlier expiry) to start from the earliest
    /// slot-bearing node.
    pub fn next_slot_get(
        &self,
        user: UserId,
        cursor: SlotCursor,
        done: SlotFn,
        context: usize,
    ) -> Status {
        self.request(user, None, OpKind::SlotGet(cursor), Callback::Slot(done), context)
    }

    /// Request a callback once the job has processed every request `user`
    /// queued before this one.
    pub fn idle_get(&self, user: UserId, done: Option<OpFn>, context: usize) -> Status {
        self.request(user, None, OpKind::IdleGet, status_callback(done), context)
    }

    /// Request a job pass on behalf of `user`.
    pub fn job_sched(&self, user: UserId) {
        self.port.pend(Caller::User(user), Context::Job);
    }

    /// Read the hardware counter.
    #[inline]
    pub fn ticks_now(&self) -> Ticks {
        self.port.tick_count()
    }

    /// Calculate `now - old` modulo the counter width.
    #[inline]
    pub fn ticks_diff(&self, now: Ticks, old: Ticks) -> Ticks {
        self.cfg.ticks_diff(now, old)
    }

    fn request(
        &self,
        user: UserId,
        id: Option<NodeId>,
        kind: OpKind,
        callback: Callback,
        context: usize,
    ) -> Status {
        let Some(queue) = self.users.get(user as usize) else {
            return Status::Failure;
        };
        if id.map_or(false, |id| id as usize >= NODES) {
            return Status::Failure;
        }

        let Some(slot) = queue.enqueue(UserOp {
            kind,
            id: id.unwrap_or(0),
            callback,
            context,
        }) else {
            return Status::Failure;
        };

        self.port.pend(Caller::User(user), Context::Job);

        slot.status()
    }

    /// Inspect the list.
    ///
    /// `f` runs with the worker and the job locked out. Returns `None`
    /// without calling `f` if either of them is running.
    pub fn snapshot<R>(&self, f: impl FnOnce(&Snapshot<'_, NODES>) -> R) -> Option<R> {
        let guard = self.state.try_lock()?;
        let result = f(&Snapshot { state: &guard });
        drop(guard);
        // Anything that ran into the lock meanwhile gets dispatched as if by
        // the job
        self.redispatch(Caller::Job);
        Some(result)
    }
}

#[inline]
fn status_callback(done: Option<OpFn>) -> Callback {
    done.map_or(Callback::None, Callback::Status)
}

/// A view of the list, provided by [`Ticker::snapshot`].
pub struct Snapshot<'a, const NODES: usize> {
    state: &'a TickerState<NODES>,
}

/// A scheduled node as seen by [`Snapshot::iter`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScheduledNode {
    pub id: NodeId,
    /// The offset of the expiry from [`Snapshot::ticks_current`].
    pub ticks_to_expire: Ticks,
    pub ticks_slot: Ticks,
    pub lazy_current: u16,
    pub force: u8,
}

impl<const NODES: usize> Snapshot<'_, NODES> {
    /// The counter value the list is measured from.
    pub fn ticks_current(&self) -> Ticks {
        self.state.ticks_current
    }

    /// Check if no node is scheduled.
    pub fn is_idle(&self) -> bool {
        self.state.list.head.is_none()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.state.list.head
    }

    /// Iterate over the scheduled nodes in expiry order.
    pub fn iter(&self) -> impl Iterator<Item = ScheduledNode> + '_ {
        self.state.list.iter().map(|(id, ticks_to_expire)| {
            let node = self.state.list.node(id);
            ScheduledNode {
                id,
                ticks_to_expire,
                ticks_slot: node.ticks_slot,
                lazy_current: node.lazy_current,
                force: node.force,
            }
        })
    }
}
