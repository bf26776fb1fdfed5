/// Experience bases per accrual domain. The curve shape is shared; the
/// base scales how steep each domain's ladder is.
pub const SKILL_EXP_BASE: i64 = 75;
pub const CLAN_EXP_BASE: i64 = 100;
pub const VILLAGE_EXP_BASE: i64 = 50;

pub const MAX_LEVEL: u16 = 500;

/// Cost of reaching `level` from the level below. Returns `None` outside
/// the supported range so callers stop rolling over at the cap.
pub fn experience_for_level(level: u16, base: i64) -> Option<i64> {
    if level == 0 || level > MAX_LEVEL || base <= 0 {
        return None;
    }
    let level = i64::from(level);
    let numerator = (level * (level - 6) + 17) * level - 12;
    Some(numerator / 3 * base)
}

/// Rolls accumulated experience over as many level thresholds as it
/// covers. The threshold cost depends on the level being entered, so it
/// is recomputed every iteration. Returns the new level and remainder.
pub fn roll_levels(mut level: u16, mut experience: f64, base: i64) -> (u16, f64) {
    loop {
        let Some(cost) = experience_for_level(level.saturating_add(1), base) else {
            return (level, experience);
        };
        let cost = cost as f64;
        if experience < cost {
            return (level, experience);
        }
        experience -= cost;
        level += 1;
    }
}

/// Clan skill training accrues continuously; higher levels train slower.
pub fn clan_rate_per_second(level: u16) -> f64 {
    10.0 / (1.0 + f64::from(level) * 0.25)
}

/// Village growth scales with the channel's active player count and the
/// village's own level.
pub fn village_rate_per_second(level: u16, active_players: u32) -> f64 {
    let audience = 1.0 + f64::from(active_players) * 0.2;
    audience * (1.0 + f64::from(level) * 0.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_is_monotonic_and_bounded() {
        let mut previous = 0;
        for level in 3..200u16 {
            let cost = experience_for_level(level, SKILL_EXP_BASE).expect("cost");
            assert!(cost > previous, "level {level}");
            previous = cost;
        }
        assert_eq!(experience_for_level(0, SKILL_EXP_BASE), None);
        assert_eq!(experience_for_level(MAX_LEVEL + 1, SKILL_EXP_BASE), None);
        assert_eq!(experience_for_level(10, 0), None);
    }

    #[test]
    fn rollover_crosses_two_thresholds_with_remainder() {
        let level = 10u16;
        let first = experience_for_level(11, CLAN_EXP_BASE).expect("cost") as f64;
        let second = experience_for_level(12, CLAN_EXP_BASE).expect("cost") as f64;
        // Just under one threshold, then enough to cross two in one shot.
        let experience = first - 1.0 + (second + 1.0) + 5.0;
        let (new_level, remainder) = roll_levels(level, experience, CLAN_EXP_BASE);
        assert_eq!(new_level, 12);
        assert!((remainder - 5.0).abs() < 1e-9, "remainder {remainder}");
    }

    #[test]
    fn rollover_stops_below_threshold() {
        let cost = experience_for_level(6, VILLAGE_EXP_BASE).expect("cost") as f64;
        let (level, remainder) = roll_levels(5, cost - 0.5, VILLAGE_EXP_BASE);
        assert_eq!(level, 5);
        assert!((remainder - (cost - 0.5)).abs() < 1e-9);
    }

    #[test]
    fn rollover_stops_at_level_cap() {
        let (level, _) = roll_levels(MAX_LEVEL, 1e15, VILLAGE_EXP_BASE);
        assert_eq!(level, MAX_LEVEL);
    }

    #[test]
    fn village_rate_matches_scenario_inputs() {
        // Level 5 village with 10 active players.
        let rate = village_rate_per_second(5, 10);
        assert!((rate - 4.5).abs() < 1e-9);
    }
}
