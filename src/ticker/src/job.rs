//! The slow context
//!
//! The job is the only context that changes the list topology. A pass runs
//! these steps in order:
//!
//!  1. Apply the elapsed ticks handed over by the worker to the time
//!     reference.
//!  2. **Management**: process stop and update requests in every user's
//!     `middle..last`.
//!  3. **Bottom half**: take the nodes the worker consumed out of the list
//!     and stage the periodic ones for their next expiry.
//!  4. **Insertion**: insert the staged nodes, then process start requests
//!     in every user's `first..middle`, resolving slot collisions.
//!  5. **Inquiry**: answer slot and idle queries in `first..middle` and
//!     release the processed requests.
//!  6. Reprogram the compare register if the head's expiry may have
//!     changed.
use core::sync::atomic::Ordering;

use crate::{
    list::{Enqueue, NodeList},
    node::NodeState,
    port::{Caller, Context, Port},
    request::{OpKind, SlotCursor, Update},
    user::User,
    worker::TickerState,
    NodeId, Status, Ticker, Ticks,
};

/// The maximum number of attempts to program a compare value that the
/// counter hasn't already passed.
const COMPARE_RETRY_LIMIT: usize = 10;

impl<P: Port, const NODES: usize, const USERS: usize, const OPS: usize>
    Ticker<P, NODES, USERS, OPS>
{
    /// The slow context's body. Call this when the port dispatches
    /// [`Context::Job`].
    pub fn job(&self) {
        if self.worker_trigger.load(Ordering::SeqCst) {
            // The worker will dispatch us when it's done
            log::trace!("job: the worker is pending");
            return;
        }

        let Some(mut guard) = self.state.try_lock() else {
            self.job_pending.store(true, Ordering::SeqCst);
            log::trace!("job: deferred");
            return;
        };
        let state = &mut *guard;

        let ticks_previous = state.ticks_current;
        let ticks_elapsed = state.elapsed.pop();
        if let Some(ticks_elapsed) = ticks_elapsed {
            state.ticks_current = self.cfg.ticks_add(state.ticks_current, ticks_elapsed);
        }
        if state.list.head.is_none() {
            // Nothing is measured from the old reference; don't let it go
            // stale
            state.ticks_current = self.port.tick_count();
        }

        log::trace!(
            "job: ticks_current = {}, ticks_elapsed = {:?}",
            state.ticks_current,
            ticks_elapsed
        );

        let head_before = state.list.head;
        let mut staged = None;

        let pending = self.list_manage(state, ticks_elapsed.unwrap_or(0), &mut staged);
        let mut reprogram = state.list.head != head_before;

        if let Some(ticks_elapsed) = ticks_elapsed {
            self.worker_bh(state, ticks_previous, ticks_elapsed, &mut staged);
            reprogram = true;
        }

        let head_before_insert = state.list.head;
        self.list_insert(state, staged);
        reprogram |= state.list.head != head_before_insert;

        if !pending {
            self.list_inquire(state);
        }

        if reprogram {
            self.compare_update(state, head_before);
        }

        drop(guard);
        self.redispatch(Caller::Job);
    }

    /// Process stop and update requests. Returns `true` if a request had to
    /// be deferred to another pass.
    fn list_manage(
        &self,
        state: &mut TickerState<NODES>,
        ticks_elapsed: Ticks,
        staged: &mut Option<NodeId>,
    ) -> bool {
        let mut pending = false;

        for (user_id, user) in self.users.iter().enumerate().rev() {
            let last = user.last();
            loop {
                let middle = user.middle();
                if middle == last {
                    break;
                }

                // Safety: We hold the state lock, and `middle` is in
                // `first..last`
                let op = unsafe { user.op(middle) };
                user.set_middle(User::<OPS>::next_index(middle));

                let update = match op.kind {
                    OpKind::Update(update) => Some(update),
                    OpKind::Stop => None,
                    // Starts and inquiries are handled later
                    _ => continue,
                };

                let node = state.list.node(op.id);
                match node.state {
                    NodeState::Idle => {
                        // Safety: See above
                        unsafe { user.finish(middle, Status::Failure) };
                        op.complete(Status::Failure, SlotCursor::START);
                    }
                    NodeState::Scheduled if update.map_or(false, |u| u.is_noop()) => {
                        // Safety: See above
                        unsafe { user.finish(middle, Status::Failure) };
                        op.complete(Status::Failure, SlotCursor::START);
                    }
                    NodeState::Scheduled => {
                        self.node_manage(state, op.id, update.as_ref(), ticks_elapsed, staged);
                        // Safety: See above
                        unsafe { user.finish(middle, Status::Success) };
                        op.complete(Status::Success, SlotCursor::START);
                    }
                    NodeState::Expired | NodeState::Staged => {
                        // The node is between the worker and the bottom half,
                        // or was already touched by this pass. Retry in the
                        // next pass.
                        log::debug!(
                            "job: deferring a request on node {} (user {}, {:?})",
                            op.id,
                            user_id,
                            node.state
                        );
                        user.set_middle(middle);
                        self.port.pend(Caller::Job, Context::Job);
                        pending = true;
                        break;
                    }
                }
            }
        }

        pending
    }

    /// Take a scheduled node out of the list for a stop or an update.
    fn node_manage(
        &self,
        state: &mut TickerState<NODES>,
        id: NodeId,
        update: Option<&Update>,
        ticks_elapsed: Ticks,
        staged: &mut Option<NodeId>,
    ) {
        let ticks_to_expire = state.list.dequeue(id);
        state.list.node_mut(id).ticks_to_expire = ticks_to_expire;

        if let Some(update) = update {
            self.node_update(state, id, update, ticks_elapsed);
            let node = state.list.node_mut(id);
            node.state = NodeState::Staged;
            node.next = *staged;
            *staged = Some(id);
        } else {
            state.list.node_mut(id).state = NodeState::Idle;
            if state.list.id_slot_previous == Some(id) {
                state.list.clear_slot_previous();
            }
        }
    }

    /// Apply an update to a dequeued node. `ticks_to_expire` is measured from
    /// the time reference before this pass advanced it by `ticks_elapsed`.
    fn node_update(
        &self,
        state: &mut TickerState<NODES>,
        id: NodeId,
        update: &Update,
        ticks_elapsed: Ticks,
    ) {
        let range = self.cfg.remainder_range();
        let ticks_now = self.port.tick_count();
        let ticks_current = state.ticks_current;
        let node = state.list.node_mut(id);

        // Re-measure from `ticks_now`
        let ticks_elapsed =
            ticks_elapsed.saturating_add(self.cfg.ticks_diff(ticks_now, ticks_current));
        let mut ticks_to_expire = node.ticks_to_expire;
        if ticks_to_expire > ticks_elapsed {
            ticks_to_expire -= ticks_elapsed;
        } else {
            node.ticks_to_expire_minus = node
                .ticks_to_expire_minus
                .saturating_add(ticks_elapsed - ticks_to_expire);
            ticks_to_expire = 0;
        }

        if let (true, Some(lazy)) = (node.is_periodic(), update.lazy) {
            // Remove periods, but keep the expiry in the future
            while ticks_to_expire > node.ticks_periodic && node.lazy_current > lazy {
                let carry = node.remainder_dec(range);
                ticks_to_expire -= node.ticks_periodic.saturating_add(carry);
                node.lazy_current -= 1;
            }

            while node.lazy_current < lazy {
                let carry = node.remainder_inc(range);
                ticks_to_expire =
                    ticks_to_expire.saturating_add(node.ticks_periodic.saturating_add(carry));
                node.lazy_current += 1;
            }

            node.lazy_periodic = lazy;
        }

        node.ticks_to_expire = ticks_to_expire.saturating_add(update.drift_plus);
        node.ticks_to_expire_minus = node
            .ticks_to_expire_minus
            .saturating_add(update.drift_minus);
        node.prep(ticks_current, ticks_now, &self.cfg);

        node.ticks_slot = node
            .ticks_slot
            .saturating_add(update.slot_plus)
            .saturating_sub(update.slot_minus);

        if let Some(force) = update.force {
            node.force = force;
        }

        log::trace!(
            "job: node {} updated: ticks_to_expire = {}, lazy = {}/{}",
            id,
            node.ticks_to_expire,
            node.lazy_current,
            node.lazy_periodic
        );
    }

    /// Take the nodes consumed by the worker out of the list. Periodic nodes
    /// are staged for their next expiry; one-shot nodes become idle.
    fn worker_bh(
        &self,
        state: &mut TickerState<NODES>,
        ticks_previous: Ticks,
        mut ticks_elapsed: Ticks,
        staged: &mut Option<NodeId>,
    ) {
        let range = self.cfg.remainder_range();
        let ticks_current = state.ticks_current;
        let mut ticks_expired: Ticks = 0;
        let list = &mut state.list;

        while let Some(id) = list.head {
            let node = *list.node(id);
            if ticks_elapsed < node.ticks_to_expire {
                list.node_mut(id).ticks_to_expire -= ticks_elapsed;
                break;
            }

            ticks_elapsed -= node.ticks_to_expire;
            ticks_expired += node.ticks_to_expire;

            // The remembered reservation is measured from `ticks_current`,
            // so it decays as time passes
            list.ticks_slot_previous = list
                .ticks_slot_previous
                .saturating_sub(node.ticks_to_expire);
            if list.ticks_slot_previous == 0 {
                list.id_slot_previous = None;
            }
            if node.ticks_slot != 0 {
                list.ticks_slot_previous = node.ticks_slot;
                list.id_slot_previous = Some(id);
            }

            list.head = node.next;

            let node = list.node_mut(id);
            if node.is_periodic() {
                let mut ticks_to_expire: Ticks = 0;
                for _ in 0..=node.lazy_periodic {
                    let carry = node.remainder_inc(range);
                    ticks_to_expire =
                        ticks_to_expire.saturating_add(node.ticks_periodic.saturating_add(carry));
                }
                node.ticks_to_expire = ticks_to_expire;
                node.prep(
                    ticks_current,
                    self.cfg.ticks_add(ticks_previous, ticks_expired),
                    &self.cfg,
                );
                node.lazy_current = node.lazy_periodic;
                node.force = 0;
                node.state = NodeState::Staged;
                node.next = *staged;
                *staged = Some(id);
            } else {
                node.state = NodeState::Idle;
                node.next = None;
            }
        }

        // `ticks_slot_previous` is now measured from the new `ticks_current`
        list.ticks_slot_previous = list.ticks_slot_previous.saturating_sub(ticks_elapsed);
        if list.ticks_slot_previous == 0 {
            list.id_slot_previous = None;
        }
    }

    /// Insert the staged nodes and process start requests.
    fn list_insert(&self, state: &mut TickerState<NODES>, mut staged: Option<NodeId>) {
        let ticks_current = state.ticks_current;

        for user in self.users.iter().rev() {
            let middle = user.middle();
            let mut first = user.first();

            while staged.is_some() || first != middle {
                if let Some(id) = staged {
                    staged = state.list.node(id).next;
                    if self.insert(&mut state.list, id, &mut staged) != Status::Success {
                        log::debug!("job: node {} lost its place and is now idle", id);
                        state.list.node_mut(id).state = NodeState::Idle;
                    }
                    continue;
                }

                let index = first;
                first = User::<OPS>::next_index(first);

                // Safety: We hold the state lock, and `index` is in
                // `first..middle`
                let op = unsafe { user.op(index) };
                let OpKind::Start(params) = op.kind else {
                    continue;
                };

                let status = if state.list.node(op.id).state != NodeState::Idle {
                    Status::Failure
                } else {
                    state
                        .list
                        .node_mut(op.id)
                        .start(&params, ticks_current, &self.cfg);
                    let status = self.insert(&mut state.list, op.id, &mut staged);
                    if status != Status::Success {
                        state.list.node_mut(op.id).state = NodeState::Idle;
                    }
                    status
                };

                // Safety: See above
                unsafe { user.finish(index, status) };
                op.complete(status, SlotCursor::START);
            }
        }

        debug_assert!(staged.is_none());
    }

    /// Insert node `id`, resolving slot collisions. Nodes evicted in favour
    /// of it are pushed onto `staged`.
    fn insert(
        &self,
        list: &mut NodeList<NODES>,
        id: NodeId,
        staged: &mut Option<NodeId>,
    ) -> Status {
        let range = self.cfg.remainder_range();
        list.node_mut(id).next = None;

        loop {
            let collide = match list.enqueue(id) {
                Enqueue::Inserted => break,
                Enqueue::Collision(collide) => collide,
            };

            let node = *list.node(id);

            if let Some(other_id) = collide {
                let other = list.node(other_id);
                if other.is_periodic() && other.skip() <= node.skip() && other.force < node.force
                {
                    log::debug!("job: node {} evicts node {}", id, other_id);
                    let ticks_to_expire = list.dequeue(other_id);
                    let other = list.node_mut(other_id);
                    other.ticks_to_expire = ticks_to_expire;
                    other.state = NodeState::Staged;
                    other.next = *staged;
                    *staged = Some(other_id);
                    continue;
                }
            }

            if !node.is_periodic() {
                log::debug!("job: node {} collides with {:?}", id, collide);
                return Status::Failure;
            }

            // Try the next period
            let node = list.node_mut(id);
            let carry = node.remainder_inc(range);
            node.ticks_to_expire = node
                .ticks_to_expire
                .saturating_add(node.ticks_periodic.saturating_add(carry));
            node.lazy_current = node.lazy_current.saturating_add(1);
            node.fold_minus();
        }

        list.node_mut(id).state = NodeState::Scheduled;
        Status::Success
    }

    /// Answer inquiries and release processed requests.
    fn list_inquire(&self, state: &mut TickerState<NODES>) {
        for user in self.users.iter().rev() {
            let middle = user.middle();
            let mut first = user.first();

            while first != middle {
                // Safety: We hold the state lock, and `first` is in
                // `first..middle`
                let op = unsafe { user.op(first) };

                match op.kind {
                    OpKind::SlotGet(mut cursor) => {
                        state.list.next_slot(&mut cursor, state.ticks_current);
                        // Safety: See above
                        unsafe { user.finish(first, Status::Success) };
                        op.complete(Status::Success, cursor);
                    }
                    OpKind::IdleGet => {
                        // Safety: See above
                        unsafe { user.finish(first, Status::Success) };
                        op.complete(Status::Success, SlotCursor::START);
                    }
                    _ => {}
                }

                first = User::<OPS>::next_index(first);
                user.set_first(first);
            }
        }
    }

    /// Program the compare register for the head's expiry.
    fn compare_update(&self, state: &mut TickerState<NODES>, head_before: Option<NodeId>) {
        let Some(head) = state.list.head else {
            log::trace!("job: the list is empty");
            self.port.stop_counter();
            state.list.clear_slot_previous();
            state.ticks_current = self.port.tick_count();
            return;
        };

        if head_before.is_none() {
            self.port.start_counter();
        }

        let ticks_to_expire = state.list.node(head).ticks_to_expire;
        let margin = self.cfg.cmp_offset_min() + self.cfg.set_latency();

        for _ in 0..COMPARE_RETRY_LIMIT {
            let ctr = self.port.tick_count();
            let ticks_min = self
                .cfg
                .ticks_diff(ctr, state.ticks_current)
                .saturating_add(margin);
            let cc = self
                .cfg
                .ticks_add(state.ticks_current, ticks_min.max(ticks_to_expire));
            self.port.set_compare(cc);

            let ctr_post = self.port.tick_count();
            if self
                .cfg
                .ticks_diff(ctr_post, ctr)
                .saturating_add(self.cfg.cmp_offset_min())
                <= self.cfg.ticks_diff(cc, ctr)
            {
                log::trace!("job: compare = {}", cc);
                return;
            }
        }

        log::warn!(
            "job: the counter kept overtaking the compare value after {} attempts",
            COMPARE_RETRY_LIMIT
        );
    }
}
