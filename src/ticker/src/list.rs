//! The delta-encoded sorted list of scheduled nodes.
//!
//! Each node's position is stored as the number of ticks from the previous
//! node's expiry, so advancing the list's time reference only touches the
//! head:
//!
#![doc = svgbobdoc::transform!(
//! ```svgbob
//!  ticks_current
//!       |
//!       |<--- 5 --->|<-- 3 -->|<------ 7 ------>|
//!       |           |         |                 |
//!       o-----------*---------*-----------------*------> time
//!                  head       B                 C
//!                 (slot 4)                   (slot 2)
//!                   |####|                      |##|
//! ```
)]
//!
//! Slot-bearing nodes own an exclusive window `[expiry, expiry + ticks_slot)`
//! and the list never holds two overlapping windows. The window of the node
//! that expired most recently is remembered in
//! [`NodeList::ticks_slot_previous`] after it leaves the list so that new
//! nodes can't be placed inside it either.
//!
//! Nothing here reads the hardware or calls back into user code; every
//! operation terminates after at most one traversal.
use crate::{node::Node, request::SlotCursor, utils::Init, NodeId, Ticks};

/// The result of [`NodeList::enqueue`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Enqueue {
    /// The node was linked into the list.
    Inserted,
    /// The node's slot would overlap another reservation and the list was
    /// left unchanged. Holds the listed node owning that reservation, or
    /// `None` if the reservation belongs to a node that already left the
    /// list.
    Collision(Option<NodeId>),
}

pub(crate) struct NodeList<const NODES: usize> {
    pub(crate) nodes: [Node; NODES],
    pub(crate) head: Option<NodeId>,
    /// What's left of the slot of the most recently expired slot-bearing
    /// node, measured from the instance's `ticks_current`.
    pub(crate) ticks_slot_previous: Ticks,
    pub(crate) id_slot_previous: Option<NodeId>,
}

impl<const NODES: usize> Init for NodeList<NODES> {
    const INIT: Self = Self {
        nodes: [Node::INIT; NODES],
        head: None,
        ticks_slot_previous: 0,
        id_slot_previous: None,
    };
}

impl<const NODES: usize> NodeList<NODES> {
    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    /// Forget the reservation of the most recently expired node.
    pub(crate) fn clear_slot_previous(&mut self) {
        self.ticks_slot_previous = 0;
        self.id_slot_previous = None;
    }

    /// Link node `id` into the list at the position given by its
    /// `ticks_to_expire` (relative to the list's time reference).
    ///
    /// A node with `ticks_slot == 0` is always inserted. Otherwise it's
    /// refused if its window would start inside the window of the nearest
    /// earlier slot-bearing node, or if a later slot-bearing node would
    /// start inside its own window.
    pub(crate) fn enqueue(&mut self, id: NodeId) -> Enqueue {
        let new = self.nodes[id as usize];
        let mut ticks_to_expire = new.ticks_to_expire;
        let mut ticks_slot_previous = self.ticks_slot_previous;
        let mut id_slot_previous = None;
        let mut previous = None;
        let mut current = self.head;

        while let Some(cur) = current {
            let node = &self.nodes[cur as usize];
            if ticks_to_expire <= node.ticks_to_expire {
                break;
            }

            ticks_to_expire -= node.ticks_to_expire;

            if node.ticks_slot != 0 {
                ticks_slot_previous = node.ticks_slot;
                id_slot_previous = Some(cur);
            } else {
                ticks_slot_previous = ticks_slot_previous.saturating_sub(node.ticks_to_expire);
            }

            previous = Some(cur);
            current = node.next;
        }

        let collide =
            self.slot_collision_scan(current, ticks_to_expire.saturating_add(new.ticks_slot));

        if new.ticks_slot == 0 || (ticks_slot_previous <= ticks_to_expire && collide.is_none()) {
            let node = &mut self.nodes[id as usize];
            node.ticks_to_expire = ticks_to_expire;
            node.next = current;

            match previous {
                None => self.head = Some(id),
                Some(prev) => self.nodes[prev as usize].next = Some(id),
            }

            if let Some(cur) = current {
                self.nodes[cur as usize].ticks_to_expire -= ticks_to_expire;
            }

            Enqueue::Inserted
        } else if ticks_slot_previous > ticks_to_expire {
            Enqueue::Collision(id_slot_previous)
        } else {
            Enqueue::Collision(collide)
        }
    }

    /// Unlink node `id` and return its absolute offset from the list's time
    /// reference. Returns `0` if the node isn't in the list.
    pub(crate) fn dequeue(&mut self, id: NodeId) -> Ticks {
        let mut total: Ticks = 0;
        let mut previous = None;
        let mut current = self.head;

        while let Some(cur) = current {
            if cur == id {
                break;
            }
            let node = &self.nodes[cur as usize];
            total = total.saturating_add(node.ticks_to_expire);
            previous = Some(cur);
            current = node.next;
        }

        let Some(cur) = current else {
            return 0;
        };

        let Node {
            next,
            ticks_to_expire,
            ..
        } = self.nodes[cur as usize];

        match previous {
            None => self.head = next,
            Some(prev) => self.nodes[prev as usize].next = next,
        }

        if let Some(next) = next {
            let next = &mut self.nodes[next as usize];
            next.ticks_to_expire = next.ticks_to_expire.saturating_add(ticks_to_expire);
        }

        total.saturating_add(ticks_to_expire)
    }

    /// Walk forward from `start` (whose delta is measured from the same
    /// point as `window`) and find the first slot-bearing node that begins
    /// strictly before `window` ticks have elapsed.
    pub(crate) fn slot_collision_scan(
        &self,
        start: Option<NodeId>,
        mut window: Ticks,
    ) -> Option<NodeId> {
        let mut current = start;
        while let Some(cur) = current {
            let node = &self.nodes[cur as usize];
            if window <= node.ticks_to_expire {
                return None;
            }
            if node.ticks_slot != 0 {
                return Some(cur);
            }
            window -= node.ticks_to_expire;
            current = node.next;
        }
        None
    }

    /// Advance `cursor` to the next slot-bearing node. The cursor restarts
    /// from the head if it's fresh, if `ticks_current` moved since it was
    /// issued, or if its node has left the list. On return, `cursor.id` is
    /// `None` if there are no more slot-bearing nodes.
    pub(crate) fn next_slot(&self, cursor: &mut SlotCursor, ticks_current: Ticks) {
        let resume = match cursor.id {
            Some(id) if cursor.ticks_current == ticks_current => self.offset_of(id),
            _ => None,
        };

        // Measured from the list; the cursor's own offset may be stale
        let (mut current, mut ticks_to_expire) = match resume {
            Some((id, ticks_to_expire)) => (self.nodes[id as usize].next, ticks_to_expire),
            None => (self.head, 0),
        };
        cursor.ticks_current = ticks_current;

        while let Some(cur) = current {
            let node = &self.nodes[cur as usize];
            ticks_to_expire = ticks_to_expire.saturating_add(node.ticks_to_expire);
            if node.ticks_slot != 0 {
                break;
            }
            current = node.next;
        }

        cursor.id = current;
        cursor.ticks_to_expire = ticks_to_expire;
    }

    /// Find node `id` in the list and return it with its absolute offset
    /// from the list's time reference.
    fn offset_of(&self, id: NodeId) -> Option<(NodeId, Ticks)> {
        self.iter().find(|&(i, _)| i == id)
    }

    /// Iterate over the listed nodes in expiry order, yielding each node's
    /// id and absolute offset from the list's time reference.
    pub(crate) fn iter(&self) -> Iter<'_, NODES> {
        Iter {
            list: self,
            current: self.head,
            ticks_to_expire: 0,
        }
    }
}

pub(crate) struct Iter<'a, const NODES: usize> {
    list: &'a NodeList<NODES>,
    current: Option<NodeId>,
    ticks_to_expire: Ticks,
}

impl<const NODES: usize> Iterator for Iter<'_, NODES> {
    type Item = (NodeId, Ticks);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.list.node(id);
        self.ticks_to_expire = self.ticks_to_expire.saturating_add(node.ticks_to_expire);
        self.current = node.next;
        Some((id, self.ticks_to_expire))
    }
}
