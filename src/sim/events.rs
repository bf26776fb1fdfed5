use std::collections::VecDeque;
use std::sync::Mutex;

use crate::net::messages::{CharacterStateUpdate, ExperienceUpdate, WorldStateSnapshot};
use crate::net::session::SessionId;

/// A server-authored update waiting to be pushed to every connection
/// bound to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Experience {
        session_id: SessionId,
        update: ExperienceUpdate,
    },
    CharacterState {
        session_id: SessionId,
        update: CharacterStateUpdate,
    },
    World {
        session_id: SessionId,
        snapshot: WorldStateSnapshot,
    },
}

impl PushEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            PushEvent::Experience { session_id, .. }
            | PushEvent::CharacterState { session_id, .. }
            | PushEvent::World { session_id, .. } => *session_id,
        }
    }
}

/// A connection's read position in the event queue. Each connection
/// loop owns one, so two connections bound to the same session both
/// see every event for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCursor {
    next: u64,
}

/// Outbound event log. The tick simulation and the relay path append;
/// each connection loop polls the entries for its own session with its
/// own cursor. Entries are retained (events carry absolute state, so a
/// late reader replaying the backlog is harmless) and fall off only
/// past the retention bound.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<Inner>,
    max_retained: usize,
}

#[derive(Debug)]
struct Inner {
    events: VecDeque<(u64, PushEvent)>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new(max_retained: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                next_seq: 0,
            }),
            max_retained: max_retained.max(1),
        }
    }

    pub fn push(&self, event: PushEvent) {
        if let Ok(mut inner) = self.inner.lock() {
            while inner.events.len() >= self.max_retained {
                inner.events.pop_front();
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.events.push_back((seq, event));
        }
    }

    /// Returns the events for one session the cursor has not yet seen,
    /// oldest first, and advances the cursor past the queue tail.
    /// Events stay queued for other cursors.
    pub fn poll_session(
        &self,
        session_id: SessionId,
        cursor: &mut EventCursor,
    ) -> Vec<PushEvent> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let polled = inner
            .events
            .iter()
            .filter(|(seq, event)| *seq >= cursor.next && event.session_id() == session_id)
            .map(|(_, event)| event.clone())
            .collect();
        cursor.next = inner.next_seq;
        polled
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_event(session: u64, players: u32) -> PushEvent {
        PushEvent::World {
            session_id: SessionId(session),
            snapshot: WorldStateSnapshot {
                active_players: players,
                ..WorldStateSnapshot::default()
            },
        }
    }

    fn player_counts(events: &[PushEvent]) -> Vec<u32> {
        events
            .iter()
            .map(|event| match event {
                PushEvent::World { snapshot, .. } => snapshot.active_players,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn poll_returns_only_matching_session_in_order() {
        let queue = EventQueue::default();
        queue.push(world_event(1, 10));
        queue.push(world_event(2, 20));
        queue.push(world_event(1, 11));

        let mut cursor = EventCursor::default();
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(1), &mut cursor)),
            vec![10, 11]
        );
        // The cursor moved past everything it inspected.
        assert!(queue.poll_session(SessionId(1), &mut cursor).is_empty());

        let mut other = EventCursor::default();
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(2), &mut other)),
            vec![20]
        );
    }

    #[test]
    fn independent_cursors_both_see_every_event() {
        let queue = EventQueue::default();
        queue.push(world_event(7, 12));

        let mut first = EventCursor::default();
        let mut second = EventCursor::default();
        assert_eq!(queue.poll_session(SessionId(7), &mut first).len(), 1);
        assert_eq!(queue.poll_session(SessionId(7), &mut second).len(), 1);

        // New events reach both again.
        queue.push(world_event(7, 13));
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(7), &mut first)),
            vec![13]
        );
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(7), &mut second)),
            vec![13]
        );
    }

    #[test]
    fn cursor_advances_past_other_sessions_events() {
        let queue = EventQueue::default();
        let mut cursor = EventCursor::default();
        queue.push(world_event(2, 20));
        assert!(queue.poll_session(SessionId(1), &mut cursor).is_empty());
        // The session-2 event was inspected and skipped for good.
        queue.push(world_event(1, 10));
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(1), &mut cursor)),
            vec![10]
        );
    }

    #[test]
    fn queue_drops_oldest_past_retention() {
        let queue = EventQueue::new(2);
        queue.push(world_event(1, 1));
        queue.push(world_event(1, 2));
        queue.push(world_event(1, 3));
        assert_eq!(queue.len(), 2);

        let mut cursor = EventCursor::default();
        assert_eq!(
            player_counts(&queue.poll_session(SessionId(1), &mut cursor)),
            vec![2, 3]
        );
    }
}
