use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::world::state::SKILL_COUNT;

/// One item definition inside a gather task's drop table. Higher tiers
/// are rarer and are always evaluated first. A hit yields between one
/// and `max_count` items.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DropEntry {
    pub item: String,
    pub tier: u8,
    #[serde(default)]
    pub min_level: u16,
    pub chance_per_mille: u16,
    #[serde(default = "default_drop_count")]
    pub max_count: u16,
}

fn default_drop_count() -> u16 {
    1
}

/// A resource-gathering task the simulation knows how to advance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatherTaskDef {
    pub name: String,
    pub skill: u8,
    pub interval_secs: u64,
    pub exp_per_unit: i64,
    pub drop_gate_per_mille: u16,
    #[serde(default)]
    pub multi_drop_per_mille: u16,
    #[serde(default)]
    pub drops: Vec<DropEntry>,
}

impl GatherTaskDef {
    pub fn interval_ms(&self) -> u64 {
        self.interval_secs.max(1) * 1000
    }
}

/// Gather-task definitions keyed by task name. Built-in defaults can be
/// replaced wholesale by a `tasks.yaml` under the data root.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: HashMap<String, GatherTaskDef>,
}

impl TaskCatalog {
    pub fn builtin() -> Self {
        let defs = vec![
            GatherTaskDef {
                name: "chop".to_string(),
                skill: 0,
                interval_secs: 30,
                exp_per_unit: 25,
                drop_gate_per_mille: 700,
                multi_drop_per_mille: 50,
                drops: vec![
                    DropEntry {
                        item: "ancient log".to_string(),
                        tier: 3,
                        min_level: 40,
                        chance_per_mille: 20,
                        max_count: 1,
                    },
                    DropEntry {
                        item: "oak log".to_string(),
                        tier: 2,
                        min_level: 15,
                        chance_per_mille: 150,
                        max_count: 2,
                    },
                    DropEntry {
                        item: "log".to_string(),
                        tier: 1,
                        min_level: 0,
                        chance_per_mille: 900,
                        max_count: 3,
                    },
                ],
            },
            GatherTaskDef {
                name: "mine".to_string(),
                skill: 1,
                interval_secs: 45,
                exp_per_unit: 35,
                drop_gate_per_mille: 650,
                multi_drop_per_mille: 40,
                drops: vec![
                    DropEntry {
                        item: "gold ore".to_string(),
                        tier: 3,
                        min_level: 50,
                        chance_per_mille: 15,
                        max_count: 1,
                    },
                    DropEntry {
                        item: "iron ore".to_string(),
                        tier: 2,
                        min_level: 20,
                        chance_per_mille: 200,
                        max_count: 1,
                    },
                    DropEntry {
                        item: "copper ore".to_string(),
                        tier: 1,
                        min_level: 0,
                        chance_per_mille: 900,
                        max_count: 2,
                    },
                ],
            },
            GatherTaskDef {
                name: "fish".to_string(),
                skill: 2,
                interval_secs: 20,
                exp_per_unit: 18,
                drop_gate_per_mille: 750,
                multi_drop_per_mille: 60,
                drops: vec![
                    DropEntry {
                        item: "swordfish".to_string(),
                        tier: 2,
                        min_level: 25,
                        chance_per_mille: 120,
                        max_count: 1,
                    },
                    DropEntry {
                        item: "herring".to_string(),
                        tier: 1,
                        min_level: 0,
                        chance_per_mille: 900,
                        max_count: 3,
                    },
                ],
            },
        ];
        Self::from_defs(defs)
    }

    /// Loads the catalog from `<root>/tasks.yaml` when present, falling
    /// back to the built-in defaults when it is not. A file that exists
    /// but fails to parse is an error.
    pub fn load(root: &Path) -> Result<Self, String> {
        let path = root.join("tasks.yaml");
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|err| format!("read {}: {err}", path.display()))?;
        let defs: Vec<GatherTaskDef> = serde_yaml::from_str(&contents)
            .map_err(|err| format!("parse {}: {err}", path.display()))?;
        for def in &defs {
            if usize::from(def.skill) >= SKILL_COUNT {
                return Err(format!(
                    "task {} references skill {} out of range",
                    def.name, def.skill
                ));
            }
        }
        Ok(Self::from_defs(defs))
    }

    fn from_defs(defs: Vec<GatherTaskDef>) -> Self {
        let mut tasks = HashMap::new();
        for mut def in defs {
            def.drops.sort_by(|a, b| b.tier.cmp(&a.tier));
            tasks.insert(def.name.clone(), def);
        }
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&GatherTaskDef> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DropRng {
    state: u64,
}

impl DropRng {
    pub fn from_seed(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state: seed }
    }

    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self::from_seed(seed)
    }

    pub fn roll_per_mille(&mut self, chance: u16) -> bool {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let bucket = (self.state >> 32) as u32 % 1000;
        bucket <= u32::from(chance.min(1000))
    }

    pub fn roll_range(&mut self, min: u16, max: u16) -> u16 {
        let (min, max) = if min >= max { (min, min) } else { (min, max) };
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let span = u64::from(max - min) + 1;
        let value = ((self.state >> 32) as u64) % span;
        min + value as u16
    }
}

impl Default for DropRng {
    fn default() -> Self {
        Self::from_seed(0x9e3779b97f4a7c15)
    }
}

/// Whole-interval accrual. First observation grants one unit and stamps
/// "now"; afterwards only full intervals are consumed, so the fractional
/// remainder of the elapsed time carries into the next invocation.
pub fn accrue_units(last_processed: Option<u64>, now_ms: u64, interval_ms: u64) -> (u64, u64) {
    let interval_ms = interval_ms.max(1);
    let Some(last) = last_processed else {
        return (1, now_ms);
    };
    let elapsed = now_ms.saturating_sub(last);
    let units = elapsed / interval_ms;
    (units, last + units * interval_ms)
}

/// Evaluates the drop table for one produced unit, yielding entries
/// paired with a rolled item count. A gate roll decides whether
/// anything drops at all; entries then run in descending tier order,
/// level-gated, first hit wins. A multi-drop roll may add one more,
/// different entry. Never more than two.
pub fn evaluate_drops<'a>(
    def: &'a GatherTaskDef,
    level: u16,
    rng: &mut DropRng,
) -> Vec<(&'a DropEntry, u16)> {
    let mut drops = Vec::new();
    if def.drops.is_empty() || !rng.roll_per_mille(def.drop_gate_per_mille) {
        return drops;
    }
    let first = def
        .drops
        .iter()
        .position(|entry| entry.min_level <= level && rng.roll_per_mille(entry.chance_per_mille));
    let Some(first) = first else {
        return drops;
    };
    let entry = &def.drops[first];
    drops.push((entry, rng.roll_range(1, entry.max_count)));

    if def.multi_drop_per_mille > 0 && rng.roll_per_mille(def.multi_drop_per_mille) {
        let second = def.drops.iter().enumerate().find(|(index, entry)| {
            *index != first
                && entry.min_level <= level
                && rng.roll_per_mille(entry.chance_per_mille)
        });
        if let Some((_, entry)) = second {
            drops.push((entry, rng.roll_range(1, entry.max_count)));
        }
    }
    drops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_def(entries: Vec<DropEntry>) -> GatherTaskDef {
        let mut def = GatherTaskDef {
            name: "test".to_string(),
            skill: 0,
            interval_secs: 30,
            exp_per_unit: 10,
            drop_gate_per_mille: 1000,
            multi_drop_per_mille: 0,
            drops: entries,
        };
        def.drops.sort_by(|a, b| b.tier.cmp(&a.tier));
        def
    }

    #[test]
    fn first_observation_grants_one_unit_and_stamps_now() {
        let (units, stamp) = accrue_units(None, 120_000, 30_000);
        assert_eq!(units, 1);
        assert_eq!(stamp, 120_000);
    }

    #[test]
    fn accrual_consumes_whole_intervals_and_carries_remainder() {
        // 3.5 intervals elapsed: three units, half an interval carried.
        let (units, stamp) = accrue_units(Some(10_000), 10_000 + 105_000, 30_000);
        assert_eq!(units, 3);
        assert_eq!(stamp, 10_000 + 90_000);

        // The carried half interval plus another half completes a unit.
        let (units, stamp) = accrue_units(Some(stamp), 10_000 + 120_000, 30_000);
        assert_eq!(units, 1);
        assert_eq!(stamp, 10_000 + 120_000);
    }

    #[test]
    fn accrual_below_one_interval_produces_nothing() {
        let (units, stamp) = accrue_units(Some(50_000), 79_999, 30_000);
        assert_eq!(units, 0);
        assert_eq!(stamp, 50_000);
    }

    #[test]
    fn drop_gate_closed_yields_nothing() {
        let mut def = test_def(vec![DropEntry {
            item: "log".to_string(),
            tier: 1,
            min_level: 0,
            chance_per_mille: 1000,
            max_count: 1,
        }]);
        def.drop_gate_per_mille = 0;
        // The gate bucket is inclusive, so chance 0 still hits about one
        // roll in a thousand; over 200 rolls misses must dominate.
        let mut rng = DropRng::from_seed(7);
        let hits = (0..200)
            .filter(|_| !evaluate_drops(&def, 10, &mut rng).is_empty())
            .count();
        assert!(hits <= 2, "gate chance 0 produced {hits} hits");
    }

    #[test]
    fn higher_tier_wins_when_its_roll_hits() {
        let def = test_def(vec![
            DropEntry {
                item: "common".to_string(),
                tier: 1,
                min_level: 0,
                chance_per_mille: 1000,
                max_count: 1,
            },
            DropEntry {
                item: "rare".to_string(),
                tier: 3,
                min_level: 0,
                chance_per_mille: 1000,
                max_count: 1,
            },
        ]);
        let mut rng = DropRng::from_seed(99);
        let drops = evaluate_drops(&def, 10, &mut rng);
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].0.item, "rare");
    }

    #[test]
    fn level_gate_skips_ineligible_tiers() {
        let def = test_def(vec![
            DropEntry {
                item: "rare".to_string(),
                tier: 3,
                min_level: 50,
                chance_per_mille: 1000,
                max_count: 1,
            },
            DropEntry {
                item: "common".to_string(),
                tier: 1,
                min_level: 0,
                chance_per_mille: 1000,
                max_count: 1,
            },
        ]);
        let mut rng = DropRng::from_seed(5);
        let drops = evaluate_drops(&def, 10, &mut rng);
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].0.item, "common");
    }

    #[test]
    fn multi_drop_adds_a_different_entry_and_caps_at_two() {
        let mut def = test_def(vec![
            DropEntry {
                item: "a".to_string(),
                tier: 2,
                min_level: 0,
                chance_per_mille: 1000,
                max_count: 1,
            },
            DropEntry {
                item: "b".to_string(),
                tier: 1,
                min_level: 0,
                chance_per_mille: 1000,
                max_count: 1,
            },
        ]);
        def.multi_drop_per_mille = 1000;
        let mut rng = DropRng::from_seed(11);
        for _ in 0..50 {
            let drops = evaluate_drops(&def, 10, &mut rng);
            assert!(drops.len() <= 2);
            if drops.len() == 2 {
                assert_ne!(drops[0].0.item, drops[1].0.item);
            }
        }
    }

    #[test]
    fn drop_counts_stay_within_the_entry_range() {
        let def = test_def(vec![DropEntry {
            item: "herring".to_string(),
            tier: 1,
            min_level: 0,
            chance_per_mille: 1000,
            max_count: 3,
        }]);
        let mut rng = DropRng::from_seed(13);
        let mut seen_multiple = false;
        for _ in 0..100 {
            for (_, count) in evaluate_drops(&def, 10, &mut rng) {
                assert!((1..=3).contains(&count));
                seen_multiple |= count > 1;
            }
        }
        assert!(seen_multiple, "a max_count of 3 never rolled above one");
    }

    #[test]
    fn builtin_catalog_sorts_drops_descending_by_tier() {
        let catalog = TaskCatalog::builtin();
        let def = catalog.get("chop").expect("chop task");
        let tiers: Vec<u8> = def.drops.iter().map(|entry| entry.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(tiers, sorted);
        assert!(catalog.get("unknown-task").is_none());
    }

    #[test]
    fn catalog_yaml_parses_and_validates_skill_range() {
        let yaml = r#"
- name: forage
  skill: 3
  interval_secs: 15
  exp_per_unit: 12
  drop_gate_per_mille: 800
  drops:
    - item: berries
      tier: 1
      chance_per_mille: 900
"#;
        let defs: Vec<GatherTaskDef> = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "forage");
        assert_eq!(defs[0].drops[0].min_level, 0);
        assert_eq!(defs[0].drops[0].max_count, 1);
        assert_eq!(defs[0].multi_drop_per_mille, 0);
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut a = DropRng::from_seed(42);
        let mut b = DropRng::from_seed(42);
        for _ in 0..32 {
            assert_eq!(a.roll_per_mille(500), b.roll_per_mille(500));
            assert_eq!(a.roll_range(1, 10), b.roll_range(1, 10));
        }
    }
}
