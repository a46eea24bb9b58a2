//! In-order release of responses.
//!
//! A slot is reserved for every request when it is received. Completed
//! responses wait in their slot until every earlier slot has been
//! released, so a fast call never overtakes a slow one issued before it.

use std::collections::VecDeque;

use crate::frame::{Frame, RequestId};

#[derive(Debug, Default)]
pub struct Sequencer {
    slots: VecDeque<Slot>,
}

#[derive(Debug)]
struct Slot {
    id: RequestId,
    frame: Option<Frame>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next position for `id`.
    pub fn reserve(&mut self, id: RequestId) {
        self.slots.push_back(Slot { id, frame: None });
    }

    /// Store the reply for `id` and return every frame that may now be
    /// emitted, in request order.
    ///
    /// A reply whose id has no slot (streaming tools skip reservation) is
    /// returned immediately. Completing an already completed slot keeps the
    /// first reply.
    pub fn complete(&mut self, id: &RequestId, frame: Frame) -> Vec<Frame> {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| &s.id == id && s.frame.is_none())
        {
            slot.frame = Some(frame);
        } else if self.slots.iter().any(|s| &s.id == id) {
            return Vec::new();
        } else {
            return vec![frame];
        }
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<Frame> {
        let mut ready = Vec::new();
        while self.slots.front().is_some_and(|s| s.frame.is_some()) {
            if let Some(frame) = self.slots.pop_front().and_then(|s| s.frame) {
                ready.push(frame);
            }
        }
        ready
    }

    /// Number of reserved slots not yet released.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn n(i: i64) -> RequestId {
        RequestId::Number(i)
    }

    fn reply(i: i64) -> Frame {
        Frame::response(n(i), json!({ "n": i }))
    }

    fn ids(frames: &[Frame]) -> Vec<RequestId> {
        frames.iter().filter_map(|f| f.id().cloned()).collect()
    }

    #[test]
    fn later_reply_waits_for_earlier() {
        let mut seq = Sequencer::new();
        seq.reserve(n(1));
        seq.reserve(n(2));
        seq.reserve(n(3));

        assert!(seq.complete(&n(2), reply(2)).is_empty());
        assert!(seq.complete(&n(3), reply(3)).is_empty());

        let released = seq.complete(&n(1), reply(1));
        assert_eq!(ids(&released), vec![n(1), n(2), n(3)]);
        assert_eq!(seq.pending(), 0);
    }

    #[test]
    fn in_order_completion_releases_immediately() {
        let mut seq = Sequencer::new();
        seq.reserve("a".into());
        seq.reserve("b".into());
        assert_eq!(ids(&seq.complete(&"a".into(), reply(0))).len(), 1);
        assert_eq!(seq.pending(), 1);
    }

    #[test]
    fn unreserved_reply_passes_through() {
        let mut seq = Sequencer::new();
        seq.reserve(n(1));
        let out = seq.complete(&n(99), reply(99));
        assert_eq!(ids(&out), vec![n(99)]);
        assert_eq!(seq.pending(), 1);
    }

    #[test]
    fn double_completion_is_dropped() {
        let mut seq = Sequencer::new();
        seq.reserve(n(1));
        seq.reserve(n(2));
        assert!(seq.complete(&n(2), reply(2)).is_empty());
        assert!(seq.complete(&n(2), reply(2)).is_empty());
        let out = seq.complete(&n(1), reply(1));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn second_reply_for_released_slot_passes_through() {
        let mut seq = Sequencer::new();
        seq.reserve(n(1));
        seq.reserve(n(2));
        assert_eq!(ids(&seq.complete(&n(1), reply(1))), vec![n(1)]);
        // Slot 1 is gone, so a late duplicate is treated as unreserved.
        assert_eq!(ids(&seq.complete(&n(1), reply(1))), vec![n(1)]);
        assert_eq!(seq.pending(), 1);
        assert_eq!(ids(&seq.complete(&n(2), reply(2))), vec![n(2)]);
    }
}
