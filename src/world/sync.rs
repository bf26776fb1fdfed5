use std::sync::{Arc, Mutex};

use crate::net::messages::{CharacterStateUpdate, ExperienceUpdate, WorldStateSnapshot};
use crate::net::server::DeltaHandler;
use crate::net::session::SessionHandle;
use crate::sim::events::{EventQueue, PushEvent};
use crate::world::state::WorldState;

/// Applies decoded deltas to the authoritative store. World-state
/// reports are additionally re-enqueued so every connection bound to
/// the same session receives the relay.
pub struct StoreDeltaHandler {
    world: Arc<Mutex<WorldState>>,
    events: Arc<EventQueue>,
}

impl StoreDeltaHandler {
    pub fn new(world: Arc<Mutex<WorldState>>, events: Arc<EventQueue>) -> Self {
        Self { world, events }
    }

    fn lock_world(&self) -> Result<std::sync::MutexGuard<'_, WorldState>, String> {
        self.world
            .lock()
            .map_err(|_| "world state lock poisoned".to_string())
    }
}

impl DeltaHandler for StoreDeltaHandler {
    /// Sessions appear lazily: the first connection binding a token
    /// registers the session under the token's user as channel name.
    fn on_session_bound(&self, session: &SessionHandle) -> Result<(), String> {
        let mut world = self.lock_world()?;
        world.ensure_session(session.session_id, &session.user);
        Ok(())
    }

    fn on_experience_update(
        &self,
        session: &SessionHandle,
        updates: Vec<ExperienceUpdate>,
    ) -> Result<(), String> {
        let mut world = self.lock_world()?;
        for update in &updates {
            world.apply_experience_update(session.session_id, update);
        }
        Ok(())
    }

    fn on_character_state(
        &self,
        session: &SessionHandle,
        updates: Vec<CharacterStateUpdate>,
    ) -> Result<(), String> {
        let mut world = self.lock_world()?;
        for update in &updates {
            world.apply_state_update(session.session_id, update);
        }
        Ok(())
    }

    fn on_world_state(
        &self,
        session: &SessionHandle,
        snapshots: Vec<WorldStateSnapshot>,
    ) -> Result<(), String> {
        {
            let mut world = self.lock_world()?;
            for snapshot in &snapshots {
                world.apply_world_report(session.session_id, snapshot);
            }
        }
        for snapshot in snapshots {
            self.events.push(PushEvent::World {
                session_id: session.session_id,
                snapshot,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::SkillDelta;
    use crate::net::session::SessionId;
    use crate::sim::events::EventCursor;
    use crate::world::state::CharacterId;

    fn handler() -> (StoreDeltaHandler, Arc<Mutex<WorldState>>, Arc<EventQueue>) {
        let world = Arc::new(Mutex::new(WorldState::new()));
        let events = Arc::new(EventQueue::default());
        (
            StoreDeltaHandler::new(Arc::clone(&world), Arc::clone(&events)),
            world,
            events,
        )
    }

    fn bind(handler: &StoreDeltaHandler) -> SessionHandle {
        let session = SessionHandle {
            session_id: SessionId(7),
            user: "alice".to_string(),
        };
        handler.on_session_bound(&session).expect("bind");
        session
    }

    #[test]
    fn binding_registers_the_session_lazily() {
        let (handler, world, _) = handler();
        bind(&handler);
        let world = world.lock().expect("lock");
        assert_eq!(
            world.sessions.get(&SessionId(7)).map(|s| s.channel.as_str()),
            Some("alice")
        );
    }

    #[test]
    fn experience_updates_land_in_the_store() {
        let (handler, world, _) = handler();
        let session = bind(&handler);
        handler
            .on_experience_update(
                &session,
                vec![ExperienceUpdate {
                    character_id: 42,
                    skills: Some(vec![SkillDelta {
                        skill: 3,
                        experience: 1500,
                        level: 12,
                    }]),
                    ..ExperienceUpdate::default()
                }],
            )
            .expect("apply");
        let world = world.lock().expect("lock");
        let character = &world.sessions[&SessionId(7)].characters[&CharacterId(42)];
        assert_eq!(character.skills[3].experience, 1500);
        assert_eq!(character.skills[3].level, 12);
    }

    #[test]
    fn world_reports_are_stored_and_relayed() {
        let (handler, world, events) = handler();
        let session = bind(&handler);
        handler
            .on_world_state(
                &session,
                vec![WorldStateSnapshot {
                    active_players: 55,
                    ..WorldStateSnapshot::default()
                }],
            )
            .expect("apply");

        assert_eq!(
            world.lock().expect("lock").sessions[&SessionId(7)].active_players,
            55
        );
        let mut cursor = EventCursor::default();
        let relayed = events.poll_session(SessionId(7), &mut cursor);
        assert_eq!(relayed.len(), 1);
        match &relayed[0] {
            PushEvent::World { snapshot, .. } => assert_eq!(snapshot.active_players, 55),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
