use crate::net::packet::{PacketReader, PacketWriter};

/// Dirty-mask bits for character-state updates. Wire order of the
/// conditional field groups is ascending bit order and is part of the
/// protocol contract.
pub mod state_mask {
    pub const HEALTH: u32 = 1 << 0;
    pub const LOCATION: u32 = 1 << 1;
    pub const DESTINATION: u32 = 1 << 2;
    pub const TRAINING_SKILL: u32 = 1 << 3;
    pub const TASK_ARGUMENT: u32 = 1 << 4;
    pub const EXPERIENCE_RATE: u32 = 1 << 5;
    pub const LEVEL_UP_TIME: u32 = 1 << 6;
    pub const POSITION: u32 = 1 << 7;
    pub const RAID_JOIN: u32 = 1 << 8;
    pub const DUNGEON_JOIN: u32 = 1 << 9;
    pub const AUTO_REST: u32 = 1 << 10;
    pub const COMBAT_STYLE: u32 = 1 << 11;
    pub const PLATFORM: u32 = 1 << 12;
    /// Every defined bit. A full update is simply all bits set; there is
    /// no separate resync sentinel.
    pub const ALL: u32 = (1 << 13) - 1;
}

/// Dirty-mask bits for experience updates.
pub mod exp_mask {
    pub const SKILLS: u32 = 1 << 0;
    pub const CLAN: u32 = 1 << 1;
    pub const VILLAGE: u32 = 1 << 2;
    pub const COMBAT_LEVEL: u32 = 1 << 3;
    pub const ALL: u32 = (1 << 4) - 1;
}

/// One skill's new absolute experience and level. Not an increment, so
/// re-applying the same delta is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillDelta {
    pub skill: u8,
    pub experience: i64,
    pub level: u16,
}

impl SkillDelta {
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.skill);
        writer.write_i64_be(self.experience);
        writer.write_u16_be(self.level);
    }

    pub fn decode(reader: &mut PacketReader) -> Option<Self> {
        Some(Self {
            skill: reader.read_u8()?,
            experience: reader.read_i64_be()?,
            level: reader.read_u16_be()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClanExperience {
    pub skill: u8,
    pub experience: i64,
    pub level: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VillageExperience {
    pub experience: i64,
    pub level: u16,
}

/// Experience changes for one character, batched per skill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperienceUpdate {
    pub character_id: u64,
    pub skills: Option<Vec<SkillDelta>>,
    pub clan: Option<ClanExperience>,
    pub village: Option<VillageExperience>,
    pub combat_level: Option<u16>,
}

impl ExperienceUpdate {
    pub fn mask(&self) -> u32 {
        let mut mask = 0;
        if self.skills.is_some() {
            mask |= exp_mask::SKILLS;
        }
        if self.clan.is_some() {
            mask |= exp_mask::CLAN;
        }
        if self.village.is_some() {
            mask |= exp_mask::VILLAGE;
        }
        if self.combat_level.is_some() {
            mask |= exp_mask::COMBAT_LEVEL;
        }
        mask
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_varint(self.character_id);
        writer.write_varint(u64::from(self.mask()));
        if let Some(skills) = &self.skills {
            writer.write_varint(skills.len() as u64);
            for delta in skills {
                delta.encode(writer);
            }
        }
        if let Some(clan) = &self.clan {
            writer.write_u8(clan.skill);
            writer.write_i64_be(clan.experience);
            writer.write_u16_be(clan.level);
        }
        if let Some(village) = &self.village {
            writer.write_i64_be(village.experience);
            writer.write_u16_be(village.level);
        }
        if let Some(level) = self.combat_level {
            writer.write_u16_be(level);
        }
    }

    pub fn decode(reader: &mut PacketReader) -> Option<Self> {
        let character_id = reader.read_varint()?;
        let mask = reader.read_varint()? as u32;
        let mut update = Self {
            character_id,
            ..Self::default()
        };
        if mask & exp_mask::SKILLS != 0 {
            let count = reader.read_varint()? as usize;
            let mut skills = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                skills.push(SkillDelta::decode(reader)?);
            }
            update.skills = Some(skills);
        }
        if mask & exp_mask::CLAN != 0 {
            update.clan = Some(ClanExperience {
                skill: reader.read_u8()?,
                experience: reader.read_i64_be()?,
                level: reader.read_u16_be()?,
            });
        }
        if mask & exp_mask::VILLAGE != 0 {
            update.village = Some(VillageExperience {
                experience: reader.read_i64_be()?,
                level: reader.read_u16_be()?,
            });
        }
        if mask & exp_mask::COMBAT_LEVEL != 0 {
            update.combat_level = Some(reader.read_u16_be()?);
        }
        Some(update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCounters {
    pub joins: u16,
    pub lifetime_joins: u32,
}

/// Auto-rest is the one group where presence is meaningful on its own:
/// a transmitted `Off` clears the plan, which a plain record could not
/// distinguish from "not sent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestSetting {
    Off,
    Target {
        health_percent: u8,
        window_minutes: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatStyle {
    pub attack: u8,
    pub defense: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub platform: u8,
    pub user_id: String,
}

/// New absolute values for the subset of character fields whose mask bit
/// is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterStateUpdate {
    pub character_id: u64,
    pub health: Option<Health>,
    pub location: Option<String>,
    pub destination: Option<String>,
    pub training_skill: Option<u8>,
    pub task_argument: Option<String>,
    pub experience_rate: Option<f64>,
    pub level_up_time: Option<u64>,
    pub position: Option<Position>,
    pub raid_join: Option<JoinCounters>,
    pub dungeon_join: Option<JoinCounters>,
    pub auto_rest: Option<RestSetting>,
    pub combat_style: Option<CombatStyle>,
    pub platform: Option<PlatformIdentity>,
}

impl CharacterStateUpdate {
    pub fn mask(&self) -> u32 {
        let mut mask = 0;
        if self.health.is_some() {
            mask |= state_mask::HEALTH;
        }
        if self.location.is_some() {
            mask |= state_mask::LOCATION;
        }
        if self.destination.is_some() {
            mask |= state_mask::DESTINATION;
        }
        if self.training_skill.is_some() {
            mask |= state_mask::TRAINING_SKILL;
        }
        if self.task_argument.is_some() {
            mask |= state_mask::TASK_ARGUMENT;
        }
        if self.experience_rate.is_some() {
            mask |= state_mask::EXPERIENCE_RATE;
        }
        if self.level_up_time.is_some() {
            mask |= state_mask::LEVEL_UP_TIME;
        }
        if self.position.is_some() {
            mask |= state_mask::POSITION;
        }
        if self.raid_join.is_some() {
            mask |= state_mask::RAID_JOIN;
        }
        if self.dungeon_join.is_some() {
            mask |= state_mask::DUNGEON_JOIN;
        }
        if self.auto_rest.is_some() {
            mask |= state_mask::AUTO_REST;
        }
        if self.combat_style.is_some() {
            mask |= state_mask::COMBAT_STYLE;
        }
        if self.platform.is_some() {
            mask |= state_mask::PLATFORM;
        }
        mask
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_varint(self.character_id);
        writer.write_varint(u64::from(self.mask()));
        if let Some(health) = self.health {
            writer.write_i32_be(health.current);
            writer.write_i32_be(health.max);
        }
        if let Some(location) = &self.location {
            writer.write_string(location);
        }
        if let Some(destination) = &self.destination {
            writer.write_string(destination);
        }
        if let Some(skill) = self.training_skill {
            writer.write_u8(skill);
        }
        if let Some(argument) = &self.task_argument {
            writer.write_string(argument);
        }
        if let Some(rate) = self.experience_rate {
            writer.write_f64_be(rate);
        }
        if let Some(when) = self.level_up_time {
            writer.write_timestamp(when);
        }
        if let Some(position) = self.position {
            writer.write_f32_be(position.x);
            writer.write_f32_be(position.y);
            writer.write_f32_be(position.z);
        }
        if let Some(counters) = self.raid_join {
            writer.write_u16_be(counters.joins);
            writer.write_u32_be(counters.lifetime_joins);
        }
        if let Some(counters) = self.dungeon_join {
            writer.write_u16_be(counters.joins);
            writer.write_u32_be(counters.lifetime_joins);
        }
        if let Some(rest) = self.auto_rest {
            match rest {
                RestSetting::Off => writer.write_bool(false),
                RestSetting::Target {
                    health_percent,
                    window_minutes,
                } => {
                    writer.write_bool(true);
                    writer.write_u8(health_percent);
                    writer.write_u16_be(window_minutes);
                }
            }
        }
        if let Some(style) = self.combat_style {
            writer.write_u8(style.attack);
            writer.write_u8(style.defense);
        }
        if let Some(platform) = &self.platform {
            writer.write_u8(platform.platform);
            writer.write_string(&platform.user_id);
        }
    }

    pub fn decode(reader: &mut PacketReader) -> Option<Self> {
        let character_id = reader.read_varint()?;
        let mask = reader.read_varint()? as u32;
        let mut update = Self {
            character_id,
            ..Self::default()
        };
        if mask & state_mask::HEALTH != 0 {
            update.health = Some(Health {
                current: reader.read_i32_be()?,
                max: reader.read_i32_be()?,
            });
        }
        if mask & state_mask::LOCATION != 0 {
            update.location = Some(reader.read_string()?);
        }
        if mask & state_mask::DESTINATION != 0 {
            update.destination = Some(reader.read_string()?);
        }
        if mask & state_mask::TRAINING_SKILL != 0 {
            update.training_skill = Some(reader.read_u8()?);
        }
        if mask & state_mask::TASK_ARGUMENT != 0 {
            update.task_argument = Some(reader.read_string()?);
        }
        if mask & state_mask::EXPERIENCE_RATE != 0 {
            update.experience_rate = Some(reader.read_f64_be()?);
        }
        if mask & state_mask::LEVEL_UP_TIME != 0 {
            update.level_up_time = Some(reader.read_timestamp()?);
        }
        if mask & state_mask::POSITION != 0 {
            update.position = Some(Position {
                x: reader.read_f32_be()?,
                y: reader.read_f32_be()?,
                z: reader.read_f32_be()?,
            });
        }
        if mask & state_mask::RAID_JOIN != 0 {
            update.raid_join = Some(JoinCounters {
                joins: reader.read_u16_be()?,
                lifetime_joins: reader.read_u32_be()?,
            });
        }
        if mask & state_mask::DUNGEON_JOIN != 0 {
            update.dungeon_join = Some(JoinCounters {
                joins: reader.read_u16_be()?,
                lifetime_joins: reader.read_u32_be()?,
            });
        }
        if mask & state_mask::AUTO_REST != 0 {
            update.auto_rest = Some(if reader.read_bool()? {
                RestSetting::Target {
                    health_percent: reader.read_u8()?,
                    window_minutes: reader.read_u16_be()?,
                }
            } else {
                RestSetting::Off
            });
        }
        if mask & state_mask::COMBAT_STYLE != 0 {
            update.combat_style = Some(CombatStyle {
                attack: reader.read_u8()?,
                defense: reader.read_u8()?,
            });
        }
        if mask & state_mask::PLATFORM != 0 {
            update.platform = Some(PlatformIdentity {
                platform: reader.read_u8()?,
                user_id: reader.read_string()?,
            });
        }
        Some(update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidRun {
    pub boss_health: i64,
    pub boss_level: u16,
    pub joined: u32,
    pub started_at: u64,
}

/// Raid status always carries the next-occurrence timestamp, active or
/// not, because clients show a countdown between raids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidStatus {
    pub run: Option<RaidRun>,
    pub next_at: u64,
}

impl RaidStatus {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_bool(self.run.is_some());
        if let Some(run) = self.run {
            writer.write_i64_be(run.boss_health);
            writer.write_u16_be(run.boss_level);
            writer.write_varint(u64::from(run.joined));
            writer.write_timestamp(run.started_at);
        }
        writer.write_timestamp(self.next_at);
    }

    fn decode(reader: &mut PacketReader) -> Option<Self> {
        let active = reader.read_bool()?;
        let run = if active {
            Some(RaidRun {
                boss_health: reader.read_i64_be()?,
                boss_level: reader.read_u16_be()?,
                joined: reader.read_varint()? as u32,
                started_at: reader.read_timestamp()?,
            })
        } else {
            None
        };
        Some(Self {
            run,
            next_at: reader.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DungeonRun {
    pub name: String,
    pub boss_health: i64,
    pub boss_level: u16,
    pub joined: u32,
    pub enemies_left: u32,
    pub started_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DungeonStatus {
    pub run: Option<DungeonRun>,
    pub next_at: u64,
}

impl DungeonStatus {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_bool(self.run.is_some());
        if let Some(run) = &self.run {
            writer.write_string(&run.name);
            writer.write_i64_be(run.boss_health);
            writer.write_u16_be(run.boss_level);
            writer.write_varint(u64::from(run.joined));
            writer.write_varint(u64::from(run.enemies_left));
            writer.write_timestamp(run.started_at);
        }
        writer.write_timestamp(self.next_at);
    }

    fn decode(reader: &mut PacketReader) -> Option<Self> {
        let active = reader.read_bool()?;
        let run = if active {
            Some(DungeonRun {
                name: reader.read_string()?,
                boss_health: reader.read_i64_be()?,
                boss_level: reader.read_u16_be()?,
                joined: reader.read_varint()? as u32,
                enemies_left: reader.read_varint()? as u32,
                started_at: reader.read_timestamp()?,
            })
        } else {
            None
        };
        Some(Self {
            run,
            next_at: reader.read_timestamp()?,
        })
    }
}

/// Aggregate world state for one game session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldStateSnapshot {
    pub active_players: u32,
    pub raid: Option<RaidStatus>,
    pub dungeon: Option<DungeonStatus>,
}

impl WorldStateSnapshot {
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_varint(u64::from(self.active_players));
        writer.write_bool(self.raid.is_some());
        if let Some(raid) = &self.raid {
            raid.encode(writer);
        }
        writer.write_bool(self.dungeon.is_some());
        if let Some(dungeon) = &self.dungeon {
            dungeon.encode(writer);
        }
    }

    pub fn decode(reader: &mut PacketReader) -> Option<Self> {
        let active_players = reader.read_varint()? as u32;
        let raid = if reader.read_bool()? {
            Some(RaidStatus::decode(reader)?)
        } else {
            None
        };
        let dungeon = if reader.read_bool()? {
            Some(DungeonStatus::decode(reader)?)
        } else {
            None
        };
        Some(Self {
            active_players,
            raid,
            dungeon,
        })
    }
}

pub fn encode_experience_batch(updates: &[ExperienceUpdate]) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.write_varint(updates.len() as u64);
    for update in updates {
        update.encode(&mut writer);
    }
    writer.into_vec()
}

pub fn decode_experience_batch(payload: &[u8]) -> Option<Vec<ExperienceUpdate>> {
    let mut reader = PacketReader::new(payload);
    let count = reader.read_varint()? as usize;
    let mut updates = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        updates.push(ExperienceUpdate::decode(&mut reader)?);
    }
    Some(updates)
}

pub fn encode_state_batch(updates: &[CharacterStateUpdate]) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.write_varint(updates.len() as u64);
    for update in updates {
        update.encode(&mut writer);
    }
    writer.into_vec()
}

pub fn decode_state_batch(payload: &[u8]) -> Option<Vec<CharacterStateUpdate>> {
    let mut reader = PacketReader::new(payload);
    let count = reader.read_varint()? as usize;
    let mut updates = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        updates.push(CharacterStateUpdate::decode(&mut reader)?);
    }
    Some(updates)
}

pub fn encode_world_batch(snapshots: &[WorldStateSnapshot]) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.write_varint(snapshots.len() as u64);
    for snapshot in snapshots {
        snapshot.encode(&mut writer);
    }
    writer.into_vec()
}

pub fn decode_world_batch(payload: &[u8]) -> Option<Vec<WorldStateSnapshot>> {
    let mut reader = PacketReader::new(payload);
    let count = reader.read_varint()? as usize;
    let mut snapshots = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        snapshots.push(WorldStateSnapshot::decode(&mut reader)?);
    }
    Some(snapshots)
}
