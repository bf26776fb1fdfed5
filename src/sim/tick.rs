use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;

use crate::net::messages::{ClanExperience, ExperienceUpdate, SkillDelta, VillageExperience};
use crate::net::server::ServerControl;
use crate::net::session::SessionId;
use crate::sim::events::{EventQueue, PushEvent};
use crate::sim::tasks::{accrue_units, evaluate_drops, DropRng, TaskCatalog};
use crate::telemetry::logging;
use crate::world::experience::{
    clan_rate_per_second, experience_for_level, roll_levels, village_rate_per_second,
    CLAN_EXP_BASE, SKILL_EXP_BASE, VILLAGE_EXP_BASE,
};
use crate::world::state::{CharacterId, GameSession, WorldState, CLAN_SKILL_COUNT};

/// Village growth never consumes more than this much elapsed time in a
/// single invocation, however long the session went unobserved.
const MAX_BUILD_WINDOW_MS: u64 = 10 * 60 * 1000;

const ANNOUNCE_CACHE_CAPACITY: usize = 4096;

pub const TASK_TRAIN: &str = "train";
pub const TASK_BUILD: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AnnounceKey {
    CharacterSkill { character: CharacterId, skill: u8 },
    ClanSkill(u8),
    Village,
}

#[derive(Debug, Clone, Copy)]
struct AnnounceRecord {
    level: u16,
    at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct TrainTimer {
    skill: u8,
    last_ms: u64,
}

/// One synchronous pass over every session and character. Holds the
/// tick-local state that is not part of the authoritative store: the
/// drop RNG, clan-training timers and the announcement throttle.
pub struct TickSimulator {
    catalog: Arc<TaskCatalog>,
    rng: DropRng,
    train_timers: HashMap<(SessionId, CharacterId), TrainTimer>,
    announcements: LruCache<(SessionId, AnnounceKey), AnnounceRecord>,
    announce_interval_ms: u64,
}

impl TickSimulator {
    pub fn new(catalog: Arc<TaskCatalog>, announce_interval: Duration) -> Self {
        Self::with_rng(catalog, announce_interval, DropRng::from_time())
    }

    pub fn with_rng(
        catalog: Arc<TaskCatalog>,
        announce_interval: Duration,
        rng: DropRng,
    ) -> Self {
        let capacity = NonZeroUsize::new(ANNOUNCE_CACHE_CAPACITY)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            catalog,
            rng,
            train_timers: HashMap::new(),
            announcements: LruCache::new(capacity),
            announce_interval_ms: announce_interval.as_millis() as u64,
        }
    }

    /// Advances every session. No network I/O happens here; changes that
    /// should reach clients are appended to the event queue.
    pub fn run_tick(&mut self, world: &mut WorldState, events: &EventQueue, now_ms: u64) {
        for session in world.sessions.values_mut() {
            self.run_session(session, events, now_ms);
        }
    }

    fn run_session(&mut self, session: &mut GameSession, events: &EventQueue, now_ms: u64) {
        let session_id = session.id;
        let active_players = session.active_players;
        let GameSession {
            characters,
            clan,
            village,
            ..
        } = session;

        for character in characters.values_mut() {
            // Raid/arena/special-area/duel suppress tasks outright.
            if character.flags.suppresses_tasks() {
                continue;
            }
            let Some(task) = &mut character.task else {
                continue;
            };
            let task_name = task.name.clone();

            if let Some(def) = self.catalog.get(&task_name) {
                let (units, stamp) =
                    accrue_units(task.last_processed, now_ms, def.interval_ms());
                task.last_processed = Some(stamp);
                if units == 0 {
                    continue;
                }
                task.gathered += units;
                let skill_index = usize::from(def.skill);
                let Some(skill) = character.skills.get_mut(skill_index) else {
                    continue;
                };
                skill.experience += def.exp_per_unit * units as i64;
                let before = skill.level;
                while let Some(cost) =
                    experience_for_level(skill.level.saturating_add(1), SKILL_EXP_BASE)
                {
                    if skill.experience < cost {
                        break;
                    }
                    skill.experience -= cost;
                    skill.level += 1;
                }
                for _ in 0..units {
                    for (entry, count) in evaluate_drops(def, skill.level, &mut self.rng) {
                        *character.resources.entry(entry.item.clone()).or_insert(0) +=
                            u64::from(count);
                    }
                }
                let level = skill.level;
                let delta = SkillDelta {
                    skill: def.skill,
                    experience: skill.experience,
                    level,
                };
                if before != level {
                    logging::tick(&format!(
                        "session {} character {} {} level {} -> {}",
                        session_id.0, character.id.0, task_name, before, level
                    ));
                }
                let key = AnnounceKey::CharacterSkill {
                    character: character.id,
                    skill: def.skill,
                };
                if self.should_announce(session_id, key, level, now_ms) {
                    events.push(PushEvent::Experience {
                        session_id,
                        update: ExperienceUpdate {
                            character_id: character.id.0,
                            skills: Some(vec![delta]),
                            ..ExperienceUpdate::default()
                        },
                    });
                }
                continue;
            }

            match task_name.as_str() {
                TASK_TRAIN => {
                    let Some(target) = character.training_skill else {
                        continue;
                    };
                    if usize::from(target) >= CLAN_SKILL_COUNT {
                        continue;
                    }
                    let Some(clan) = clan.as_mut() else {
                        continue;
                    };
                    let timer_key = (session_id, character.id);
                    let timer = self.train_timers.entry(timer_key).or_insert(TrainTimer {
                        skill: target,
                        last_ms: now_ms,
                    });
                    // Switching targets restarts the timer; no credit for
                    // time spent on the previous skill.
                    if timer.skill != target {
                        *timer = TrainTimer {
                            skill: target,
                            last_ms: now_ms,
                        };
                        continue;
                    }
                    let elapsed_secs = now_ms.saturating_sub(timer.last_ms) as f64 / 1000.0;
                    timer.last_ms = now_ms;
                    if elapsed_secs <= 0.0 {
                        continue;
                    }
                    let skill = &mut clan.skills[usize::from(target)];
                    let gain = elapsed_secs * clan_rate_per_second(skill.level);
                    let (level, remainder) =
                        roll_levels(skill.level, skill.experience + gain, CLAN_EXP_BASE);
                    skill.level = level;
                    skill.experience = remainder;
                    if self.should_announce(
                        session_id,
                        AnnounceKey::ClanSkill(target),
                        level,
                        now_ms,
                    ) {
                        events.push(PushEvent::Experience {
                            session_id,
                            update: ExperienceUpdate {
                                character_id: character.id.0,
                                clan: Some(ClanExperience {
                                    skill: target,
                                    experience: remainder as i64,
                                    level,
                                }),
                                ..ExperienceUpdate::default()
                            },
                        });
                    }
                }
                TASK_BUILD => {
                    let Some(last) = task.last_processed else {
                        task.last_processed = Some(now_ms);
                        continue;
                    };
                    let elapsed_ms = now_ms.saturating_sub(last).min(MAX_BUILD_WINDOW_MS);
                    task.last_processed = Some(now_ms);
                    if elapsed_ms == 0 {
                        continue;
                    }
                    let rate = village_rate_per_second(village.level, active_players);
                    let gain = elapsed_ms as f64 / 1000.0 * rate;
                    let next_cost =
                        experience_for_level(village.level.saturating_add(1), VILLAGE_EXP_BASE)
                            .map(|cost| cost as f64);
                    // Runaway accumulation guard: skip the whole gain for
                    // this invocation instead of applying a wild jump.
                    if let Some(cost) = next_cost {
                        if gain > cost * 2.0 {
                            logging::tick(&format!(
                                "session {} village gain {gain:.1} exceeds sanity cap, skipped",
                                session_id.0
                            ));
                            continue;
                        }
                    }
                    let (level, remainder) =
                        roll_levels(village.level, village.experience + gain, VILLAGE_EXP_BASE);
                    village.level = level;
                    village.experience = remainder;
                    if self.should_announce(session_id, AnnounceKey::Village, level, now_ms) {
                        events.push(PushEvent::Experience {
                            session_id,
                            update: ExperienceUpdate {
                                character_id: character.id.0,
                                village: Some(VillageExperience {
                                    experience: remainder as i64,
                                    level,
                                }),
                                ..ExperienceUpdate::default()
                            },
                        });
                    }
                }
                // Unknown task names are client-side only; leave them be.
                _ => {}
            }
        }
    }

    /// First observation of a key announces immediately. Afterwards only
    /// a level change or the minimum interval re-opens the key.
    fn should_announce(
        &mut self,
        session_id: SessionId,
        key: AnnounceKey,
        level: u16,
        now_ms: u64,
    ) -> bool {
        let cache_key = (session_id, key);
        match self.announcements.get(&cache_key) {
            None => {
                self.announcements.put(cache_key, AnnounceRecord { level, at_ms: now_ms });
                true
            }
            Some(record) => {
                let interval_elapsed =
                    now_ms.saturating_sub(record.at_ms) >= self.announce_interval_ms;
                if record.level != level || interval_elapsed {
                    self.announcements.put(cache_key, AnnounceRecord { level, at_ms: now_ms });
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Monotonic tick claim shared with nothing else; `swap` means an
/// overdue tick is skipped instead of running twice concurrently.
#[derive(Debug, Default)]
pub struct TickClaim {
    last: AtomicU64,
}

impl TickClaim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, tick: u64) -> bool {
        self.last.swap(tick, Ordering::AcqRel) != tick
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

pub fn spawn_tick_loop(
    world: Arc<Mutex<WorldState>>,
    events: Arc<EventQueue>,
    catalog: Arc<TaskCatalog>,
    control: Arc<ServerControl>,
    tick_length: Duration,
    announce_interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let tick_length_ms = tick_length.as_millis().max(1) as u64;
        let mut simulator = TickSimulator::new(catalog, announce_interval);
        let claim = TickClaim::new();
        while control.is_running() {
            let now_ms = unix_millis();
            let tick = now_ms / tick_length_ms;
            if claim.claim(tick) {
                if let Ok(mut world_guard) = world.lock() {
                    simulator.run_tick(&mut world_guard, &events, now_ms);
                }
            }
            thread::sleep(tick_length / 2);
        }
    })
}
