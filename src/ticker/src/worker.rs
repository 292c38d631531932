//! The fast context
use core::sync::atomic::{fence, Ordering};

use crate::{
    list::NodeList,
    node::{Expiry, NodeState},
    port::{Caller, Context, Port},
    utils::Init,
    Ticker, Ticks,
};

/// The state shared by the worker and the job.
pub(crate) struct TickerState<const NODES: usize> {
    pub(crate) list: NodeList<NODES>,
    /// The counter value the head's `ticks_to_expire` is measured from.
    pub(crate) ticks_current: Ticks,
    /// Ticks consumed by the worker and not yet applied to the list by the
    /// job.
    pub(crate) elapsed: ElapsedQueue,
}

impl<const NODES: usize> Init for TickerState<NODES> {
    const INIT: Self = Self {
        list: NodeList::INIT,
        ticks_current: 0,
        elapsed: ElapsedQueue::INIT,
    };
}

/// The depth-2 hand-off of elapsed ticks from the worker to the job.
///
/// Every value is measured from the same `ticks_current`, so a newer value
/// supersedes an unconsumed older one.
pub(crate) struct ElapsedQueue {
    ticks: [Ticks; 2],
    first: u8,
    last: u8,
}

impl Init for ElapsedQueue {
    const INIT: Self = Self {
        ticks: [0; 2],
        first: 0,
        last: 0,
    };
}

impl ElapsedQueue {
    pub(crate) fn push(&mut self, ticks: Ticks) {
        if self.first == self.last {
            self.last ^= 1;
        }
        self.ticks[self.last as usize] = ticks;
    }

    pub(crate) fn pop(&mut self) -> Option<Ticks> {
        if self.first == self.last {
            None
        } else {
            self.first = self.last;
            Some(self.ticks[self.first as usize])
        }
    }
}

impl<P: Port, const NODES: usize, const USERS: usize, const OPS: usize>
    Ticker<P, NODES, USERS, OPS>
{
    /// The hardware compare event handler. Dispatches the worker.
    pub fn trigger(&self) {
        self.port.pend(Caller::Trigger, Context::Worker);
    }

    /// The fast context's body. Call this when the port dispatches
    /// [`Context::Worker`].
    ///
    /// Fires the callbacks of the nodes that became due since the job last
    /// advanced the time reference and hands the elapsed ticks over to the
    /// job. The list is left untouched except for the liveness state of the
    /// fired nodes.
    pub fn worker(&self) {
        self.worker_trigger.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let Some(mut guard) = self.state.try_lock() else {
            // The job will re-dispatch us when it's done
            log::trace!("worker: the job is running");
            return;
        };
        let state = &mut *guard;

        if state.list.head.is_none() {
            self.worker_trigger.store(false, Ordering::SeqCst);
            drop(guard);
            self.redispatch(Caller::Worker);
            return;
        }

        let ticks_now = self.port.tick_count();
        let ticks_current = state.ticks_current;
        let mut ticks_elapsed = self.cfg.ticks_diff(ticks_now, ticks_current);
        let mut ticks_expired: Ticks = 0;

        log::trace!(
            "worker: ticks_current = {}, ticks_elapsed = {}",
            ticks_current,
            ticks_elapsed
        );

        let mut current = state.list.head;
        while let Some(id) = current {
            let node = state.list.node_mut(id);
            if ticks_elapsed < node.ticks_to_expire {
                break;
            }

            ticks_elapsed -= node.ticks_to_expire;
            ticks_expired += node.ticks_to_expire;
            current = node.next;

            if node.state != NodeState::Scheduled {
                continue;
            }
            node.state = NodeState::Expired;

            if let Some(timeout) = node.timeout {
                let expiry = Expiry {
                    ticks_at_expire: self.cfg.ticks_add(
                        ticks_current,
                        ticks_expired.wrapping_sub(node.ticks_to_expire_minus),
                    ),
                    remainder: node.remainder_current,
                    lazy: node.lazy_current,
                };
                log::trace!("worker: node {} expired ({:?})", id, expiry);
                timeout(expiry, node.context);
            }
        }

        state.elapsed.push(ticks_expired);

        self.worker_trigger.store(false, Ordering::SeqCst);
        drop(guard);

        // The pass we're about to request subsumes any deferred one
        self.job_pending.store(false, Ordering::SeqCst);
        self.port.pend(Caller::Worker, Context::Job);
        self.redispatch(Caller::Worker);
    }

    /// Re-dispatch the contexts that tried to run while the state was
    /// locked by `caller`. Must be called after unlocking the state.
    pub(crate) fn redispatch(&self, caller: Caller) {
        fence(Ordering::SeqCst);
        if self.worker_trigger.load(Ordering::SeqCst) {
            self.port.pend(caller, Context::Worker);
        }
        if self.job_pending.swap(false, Ordering::SeqCst) {
            self.port.pend(caller, Context::Job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_queue_keeps_newest() {
        let mut q = ElapsedQueue::INIT;
        assert_eq!(q.pop(), None);
        q.push(5);
        q.push(8);
        assert_eq!(q.pop(), Some(8));
        assert_eq!(q.pop(), None);
        q.push(3);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }
}
