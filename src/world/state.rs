use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::net::messages::{
    CharacterStateUpdate, CombatStyle, DungeonStatus, ExperienceUpdate, Health, JoinCounters,
    PlatformIdentity, Position, RaidStatus, RestSetting, SkillDelta, WorldStateSnapshot,
};
use crate::net::session::SessionId;

pub const SKILL_COUNT: usize = 16;
pub const CLAN_SKILL_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacterId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkillState {
    pub experience: i64,
    pub level: u16,
}

/// Background activity state for one character. Created lazily the first
/// time the tick observes a character without one; never deleted, only
/// its timestamp advances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskState {
    pub name: String,
    pub argument: String,
    /// Milliseconds since the unix epoch; `None` until first processed.
    pub last_processed: Option<u64>,
    pub gathered: u64,
}

/// Flags that suppress task processing entirely while set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityFlags {
    pub in_raid: bool,
    pub in_arena: bool,
    pub in_special_area: bool,
    pub in_duel: bool,
}

impl ActivityFlags {
    pub fn suppresses_tasks(&self) -> bool {
        self.in_raid || self.in_arena || self.in_special_area || self.in_duel
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterState {
    pub id: CharacterId,
    pub name: String,
    pub combat_level: u16,
    pub skills: [SkillState; SKILL_COUNT],
    pub task: Option<TaskState>,
    pub training_skill: Option<u8>,
    pub flags: ActivityFlags,
    // Last-known wire-visible fields, updated from client state deltas.
    pub health: Option<Health>,
    pub location: Option<String>,
    pub destination: Option<String>,
    pub experience_rate: Option<f64>,
    pub level_up_time: Option<u64>,
    pub position: Option<Position>,
    pub raid_join: Option<JoinCounters>,
    pub dungeon_join: Option<JoinCounters>,
    pub auto_rest: Option<RestSetting>,
    pub combat_style: Option<CombatStyle>,
    pub platform: Option<PlatformIdentity>,
    /// Lifetime gathered-resource totals keyed by item name.
    pub resources: HashMap<String, u64>,
}

impl CharacterState {
    pub fn new(id: CharacterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            combat_level: 1,
            ..Self::default()
        }
    }

    /// Sets a skill to the delta's absolute values. Applying the same
    /// delta twice lands on the same state.
    pub fn apply_skill_delta(&mut self, delta: &SkillDelta) {
        let index = usize::from(delta.skill);
        if index >= SKILL_COUNT {
            return;
        }
        self.skills[index] = SkillState {
            experience: delta.experience,
            level: delta.level,
        };
    }

    pub fn apply_state_update(&mut self, update: &CharacterStateUpdate) {
        if let Some(health) = update.health {
            self.health = Some(health);
        }
        if let Some(location) = &update.location {
            self.location = Some(location.clone());
        }
        if let Some(destination) = &update.destination {
            self.destination = Some(destination.clone());
        }
        if let Some(skill) = update.training_skill {
            self.training_skill = Some(skill);
        }
        if let Some(argument) = &update.task_argument {
            // The argument can arrive before any task is assigned; keep
            // it on a placeholder task so it applies once one is.
            let task = self.task.get_or_insert_with(TaskState::default);
            task.argument = argument.clone();
        }
        if let Some(rate) = update.experience_rate {
            self.experience_rate = Some(rate);
        }
        if let Some(when) = update.level_up_time {
            self.level_up_time = Some(when);
        }
        if let Some(position) = update.position {
            self.position = Some(position);
        }
        if let Some(counters) = update.raid_join {
            self.raid_join = Some(counters);
        }
        if let Some(counters) = update.dungeon_join {
            self.dungeon_join = Some(counters);
        }
        if let Some(rest) = update.auto_rest {
            self.auto_rest = Some(rest);
        }
        if let Some(style) = update.combat_style {
            self.combat_style = Some(style);
        }
        if let Some(platform) = &update.platform {
            self.platform = Some(platform.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClanSkill {
    pub experience: f64,
    pub level: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClanState {
    pub name: String,
    pub skills: [ClanSkill; CLAN_SKILL_COUNT],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VillageState {
    pub experience: f64,
    pub level: u16,
}

/// One broadcaster's running game, with all its viewer characters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameSession {
    pub id: SessionId,
    pub channel: String,
    pub active_players: u32,
    pub characters: HashMap<CharacterId, CharacterState>,
    pub clan: Option<ClanState>,
    pub village: VillageState,
    pub raid: Option<RaidStatus>,
    pub dungeon: Option<DungeonStatus>,
}

impl GameSession {
    pub fn new(id: SessionId, channel: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
            village: VillageState {
                experience: 0.0,
                level: 1,
            },
            ..Self::default()
        }
    }

    pub fn ensure_character(&mut self, id: CharacterId) -> &mut CharacterState {
        self.characters
            .entry(id)
            .or_insert_with(|| CharacterState::new(id, format!("character-{}", id.0)))
    }
}

/// Authoritative in-memory store for all active sessions. Guarded by a
/// single mutex at the call sites; single writer per character assumed.
#[derive(Debug, Default)]
pub struct WorldState {
    pub sessions: HashMap<SessionId, GameSession>,
}

#[derive(Debug, Deserialize)]
struct CharacterSeed {
    id: u64,
    name: String,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    task_argument: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionSeed {
    id: u64,
    channel: String,
    #[serde(default)]
    clan: Option<String>,
    #[serde(default)]
    characters: Vec<CharacterSeed>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the optional `sessions.yaml` seed under the data root.
    /// A missing file yields an empty world; sessions normally appear
    /// lazily when a token binds.
    pub fn load(root: &Path) -> Result<Self, String> {
        let path = root.join("sessions.yaml");
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|err| format!("read {} failed: {err}", path.display()))?;
        let seeds: Vec<SessionSeed> = serde_yaml::from_str(&contents)
            .map_err(|err| format!("parse {} failed: {err}", path.display()))?;
        let mut world = Self::new();
        for seed in seeds {
            let mut session = GameSession::new(SessionId(seed.id), seed.channel);
            if let Some(clan) = seed.clan {
                session.clan = Some(ClanState {
                    name: clan,
                    ..ClanState::default()
                });
            }
            for character_seed in seed.characters {
                let character = session.ensure_character(CharacterId(character_seed.id));
                character.name = character_seed.name;
                if let Some(task) = character_seed.task {
                    character.task = Some(TaskState {
                        name: task,
                        argument: character_seed.task_argument.clone().unwrap_or_default(),
                        ..TaskState::default()
                    });
                }
            }
            world.sessions.insert(session.id, session);
        }
        Ok(world)
    }

    pub fn ensure_session(&mut self, id: SessionId, channel: &str) -> &mut GameSession {
        self.sessions
            .entry(id)
            .or_insert_with(|| GameSession::new(id, channel))
    }

    pub fn apply_experience_update(&mut self, session_id: SessionId, update: &ExperienceUpdate) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let character = session.ensure_character(CharacterId(update.character_id));
        if let Some(skills) = &update.skills {
            for delta in skills {
                character.apply_skill_delta(delta);
            }
        }
        if let Some(level) = update.combat_level {
            character.combat_level = level;
        }
        if let Some(clan_exp) = update.clan {
            if let Some(clan) = &mut session.clan {
                let index = usize::from(clan_exp.skill);
                if index < CLAN_SKILL_COUNT {
                    clan.skills[index] = ClanSkill {
                        experience: clan_exp.experience as f64,
                        level: clan_exp.level,
                    };
                }
            }
        }
        if let Some(village_exp) = update.village {
            session.village = VillageState {
                experience: village_exp.experience as f64,
                level: village_exp.level,
            };
        }
    }

    pub fn apply_state_update(&mut self, session_id: SessionId, update: &CharacterStateUpdate) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session
            .ensure_character(CharacterId(update.character_id))
            .apply_state_update(update);
    }

    pub fn apply_world_report(&mut self, session_id: SessionId, snapshot: &WorldStateSnapshot) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.active_players = snapshot.active_players;
        session.raid = snapshot.raid;
        session.dungeon = snapshot.dungeon.clone();
    }
}
