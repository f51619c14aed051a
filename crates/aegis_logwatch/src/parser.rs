//! Line-oriented Squad log parser.
//!
//! Patterns are compiled once (`once_cell::sync::Lazy`) and looked up by
//! category token instead of scanned linearly, per the spec's
//! "regex-heavy parsing" design note — mirroring `aegis_rcon::events`'s
//! approach to the same problem on the RCON side.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::events::{self, *};

const CHAIN_CACHE_CAPACITY: usize = 10_000;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(?P<ts>[\d.]+-[\d.]+:\d+)\]\[\s*(?P<frame>\d+)\]Log(?P<category>\w+): (?P<message>.*)$")
        .expect("valid log line regex")
});

// LogSquad
static PLAYER_CONNECTED_SQUAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Client connected: ID: (?P<steam>\d+)$").expect("valid regex")
});
static PLAYER_DISCONNECTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Player (?P<steam>\d+) disconnected$").expect("valid regex")
});
static PLAYER_SQUAD_CHANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Player (?P<name>.+?) has been added to Squad (?P<squad>\d+) on (?:Team )?(?P<team>\d+)$")
        .expect("valid regex")
});
static PLAYER_TEAM_CHANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Player (?P<name>.+?) changed team from (?P<old>\d+) to (?P<new>\d+)$")
        .expect("valid regex")
});
static ADMIN_BROADCAST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ADMIN COMMAND: Message broadcasted <(?P<message>.*)>$").expect("valid regex")
});
static ROUND_ENDED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Round over, winner is: (?P<winner>.+)$").expect("valid regex")
});

// LogOnline
static PLAYER_CONNECTED_ONLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*using RPC .*EOSID:(?P<eos>[\w-]+).*RemoteAddr:(?P<ip>[\d.]+)")
        .expect("valid regex")
});
static JOIN_SUCCEEDED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Join succeeded: (?P<name>.+?)\s*\(Steam: (?P<steam>\d+)\)?$")
        .expect("valid regex")
});

// LogGameMode
static PLAYER_POSSESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*Player (?P<name>.+?) \(Steam: (?P<steam>\d+)\) has possessed (?P<class>\S+)")
        .expect("valid regex")
});
static PLAYER_REVIVED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<reviver>.+?) revived (?P<victim>.+)$").expect("valid regex")
});
static NEW_GAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^New Game: (?P<layer>\S+) on (?P<map>\S+)$").expect("valid regex"));

// LogSquadTrace (damage / wound / die)
static DAMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ASQSoldier::TakeDamage\(\): Player:(?P<victim>.+?) Damage=(?P<damage>[\d.]+) from (?P<attacker>.+?) caused by (?P<weapon>\S+) ChainID=(?P<chain>\d+)$",
    )
    .expect("valid regex")
});
static WOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ASQSoldier::Wound\(\): Player:(?P<victim>.+?)\(Team:(?P<vteam>\d+)\) Damage=(?P<damage>[\d.]+) from (?P<attacker>.+?)\(Team:(?P<ateam>\d+)\) caused by (?P<weapon>\S+) ChainID=(?P<chain>\d+)$",
    )
    .expect("valid regex")
});
static DIE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ASQSoldier::Die\(\): Player:(?P<victim>.+?)\(Team:(?P<vteam>\d+)\) from (?P<attacker>.+?)\(Team:(?P<ateam>\d+)\) caused by (?P<weapon>\S+) ChainID=(?P<chain>\d+)$",
    )
    .expect("valid regex")
});
static DEPLOYABLE_DAMAGED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ASQDeployable::TakeDamage\(\): (?P<deployable>\S+) took (?P<damage>[\d.]+) damage from (?P<attacker>.+?) caused by (?P<weapon>\S+)$",
    )
    .expect("valid regex")
});
static TICK_RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Tick rate: (?P<rate>[\d.]+)$").expect("valid regex"));

#[derive(Debug, Clone)]
struct PendingWound {
    victim_name: String,
    victim_team_id: Option<u32>,
    attacker_name: Option<String>,
    attacker_team_id: Option<u32>,
    weapon: String,
    wound_time: u64,
}

/// Bounded, LRU-evicted cache joining multi-line sequences that share a
/// Squad `chainID` (e.g. a wound line followed, seconds later, by a die
/// line for the same hit).
pub struct ChainCorrelator {
    pending_wounds: Mutex<LruCache<String, PendingWound>>,
    connect_rpc: Mutex<LruCache<String, (Option<String>, Option<String>)>>,
}

impl ChainCorrelator {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CHAIN_CACHE_CAPACITY).unwrap();
        Self {
            pending_wounds: Mutex::new(LruCache::new(capacity)),
            connect_rpc: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for ChainCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of parsing one line: a ready-to-publish event, or nothing if the
/// line didn't match any pattern or only updated correlator state.
pub struct ParsedEvent {
    pub type_tag: &'static str,
    pub payload: serde_json::Value,
    pub chain_id: Option<String>,
}

/// Parses a single non-empty Squad log line, using `correlator` to join
/// multi-line event sequences (wound/die, the two connect line variants).
/// `now_ms` is the caller's monotonic clock, used to stamp the wound time
/// that a later `PLAYER_DIED` event carries forward.
pub fn parse_line(line: &str, correlator: &ChainCorrelator, now_ms: u64) -> Option<ParsedEvent> {
    let caps = LINE_RE.captures(line)?;
    let category = &caps["category"];
    let message = &caps["message"];

    match category {
        "Squad" => parse_log_squad(message, correlator),
        "Online" => parse_log_online(message, correlator),
        "GameMode" => parse_log_gamemode(message),
        "SquadTrace" => parse_log_squad_trace(message, correlator, now_ms),
        "GameState" => parse_log_gamestate(message),
        _ => None,
    }
}

fn parse_log_squad(message: &str, correlator: &ChainCorrelator) -> Option<ParsedEvent> {
    if let Some(caps) = PLAYER_CONNECTED_SQUAD_RE.captures(message) {
        let steam = caps["steam"].to_string();
        let mut cache = correlator.connect_rpc.lock().unwrap();
        let eos = cache.pop(&steam).and_then(|(eos, _)| eos);
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_CONNECTED,
            payload: serde_json::to_value(PlayerConnected {
                eos_id: eos,
                steam_id: Some(steam),
                ip: None,
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = PLAYER_DISCONNECTED_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_DISCONNECTED,
            payload: serde_json::to_value(PlayerDisconnected {
                steam_id: Some(caps["steam"].to_string()),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = PLAYER_SQUAD_CHANGE_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_SQUAD_CHANGE,
            payload: serde_json::to_value(PlayerSquadChange {
                player_name: caps["name"].to_string(),
                team_id: caps["team"].parse().ok(),
                squad_id: caps["squad"].parse().ok(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = PLAYER_TEAM_CHANGE_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_TEAM_CHANGE,
            payload: serde_json::to_value(PlayerTeamChange {
                player_name: caps["name"].to_string(),
                old_team_id: caps["old"].parse().ok(),
                new_team_id: caps["new"].parse().ok(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = ADMIN_BROADCAST_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_ADMIN_BROADCAST,
            payload: serde_json::to_value(AdminBroadcast {
                message: caps["message"].to_string(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = ROUND_ENDED_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_ROUND_ENDED,
            payload: serde_json::to_value(events::RoundEnded {
                winner: Some(caps["winner"].to_string()),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    None
}

fn parse_log_online(message: &str, correlator: &ChainCorrelator) -> Option<ParsedEvent> {
    if let Some(caps) = PLAYER_CONNECTED_ONLINE_RE.captures(message) {
        let eos = caps["eos"].to_string();
        let ip = caps["ip"].to_string();
        // Cache by a synthetic key until the matching LogSquad "Client
        // connected" line supplies the SteamID to reconcile against.
        correlator
            .connect_rpc
            .lock()
            .unwrap()
            .put(eos.clone(), (Some(eos.clone()), Some(ip)));
        return None;
    }
    if let Some(caps) = JOIN_SUCCEEDED_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_JOIN_SUCCEEDED,
            payload: serde_json::to_value(JoinSucceeded {
                player_name: caps["name"].to_string(),
                steam_id: Some(caps["steam"].to_string()),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    None
}

fn parse_log_gamemode(message: &str) -> Option<ParsedEvent> {
    if let Some(caps) = PLAYER_POSSESS_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_POSSESS,
            payload: serde_json::to_value(PlayerPossess {
                player_name: caps["name"].to_string(),
                steam_id: Some(caps["steam"].to_string()),
                possess_class: caps["class"].to_string(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = PLAYER_REVIVED_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_REVIVED,
            payload: serde_json::to_value(PlayerRevived {
                reviver_name: caps["reviver"].to_string(),
                victim_name: caps["victim"].to_string(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    if let Some(caps) = NEW_GAME_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_NEW_GAME,
            payload: serde_json::to_value(NewGame {
                map: caps["map"].to_string(),
                layer: caps["layer"].to_string(),
            })
            .unwrap(),
            chain_id: None,
        });
    }
    None
}

fn parse_log_gamestate(message: &str) -> Option<ParsedEvent> {
    let caps = TICK_RATE_RE.captures(message)?;
    Some(ParsedEvent {
        type_tag: TYPE_TICK_RATE,
        payload: serde_json::to_value(TickRate {
            rate: caps["rate"].parse().unwrap_or_default(),
        })
        .unwrap(),
        chain_id: None,
    })
}

fn parse_log_squad_trace(
    message: &str,
    correlator: &ChainCorrelator,
    now_ms: u64,
) -> Option<ParsedEvent> {
    if let Some(caps) = DAMAGE_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_DAMAGED,
            payload: serde_json::to_value(PlayerDamaged {
                victim_name: caps["victim"].to_string(),
                attacker_name: Some(caps["attacker"].to_string()),
                damage: caps["damage"].parse().unwrap_or_default(),
                weapon: caps["weapon"].to_string(),
                chain_id: caps["chain"].to_string(),
            })
            .unwrap(),
            chain_id: Some(caps["chain"].to_string()),
        });
    }

    if let Some(caps) = WOUND_RE.captures(message) {
        let chain_id = caps["chain"].to_string();
        let victim_team_id = caps["vteam"].parse().ok();
        let attacker_team_id = caps["ateam"].parse().ok();
        let pending = PendingWound {
            victim_name: caps["victim"].to_string(),
            victim_team_id,
            attacker_name: Some(caps["attacker"].to_string()),
            attacker_team_id,
            weapon: caps["weapon"].to_string(),
            wound_time: now_ms,
        };
        let payload = PlayerWounded {
            victim_name: pending.victim_name.clone(),
            victim_team_id,
            attacker_name: pending.attacker_name.clone(),
            attacker_team_id,
            damage: caps["damage"].parse().unwrap_or_default(),
            weapon: pending.weapon.clone(),
            chain_id: chain_id.clone(),
        };
        correlator
            .pending_wounds
            .lock()
            .unwrap()
            .put(chain_id.clone(), pending);
        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_WOUNDED,
            payload: serde_json::to_value(payload).unwrap(),
            chain_id: Some(chain_id),
        });
    }

    if let Some(caps) = DIE_RE.captures(message) {
        let chain_id = caps["chain"].to_string();
        let victim_team_id: Option<u32> = caps["vteam"].parse().ok();
        let attacker_team_id: Option<u32> = caps["ateam"].parse().ok();

        let wound = correlator.pending_wounds.lock().unwrap().pop(&chain_id);
        let (weapon, wound_time) = match &wound {
            Some(w) => (w.weapon.clone(), w.wound_time),
            None => (caps["weapon"].to_string(), now_ms),
        };
        let teamkill = match (victim_team_id, attacker_team_id) {
            (Some(v), Some(a)) => v == a,
            _ => false,
        };

        return Some(ParsedEvent {
            type_tag: TYPE_PLAYER_DIED,
            payload: serde_json::to_value(PlayerDied {
                victim_name: caps["victim"].to_string(),
                victim_team_id,
                attacker_name: Some(caps["attacker"].to_string()),
                attacker_team_id,
                weapon,
                wound_time,
                teamkill,
                chain_id: chain_id.clone(),
            })
            .unwrap(),
            chain_id: Some(chain_id),
        });
    }

    if let Some(caps) = DEPLOYABLE_DAMAGED_RE.captures(message) {
        return Some(ParsedEvent {
            type_tag: TYPE_DEPLOYABLE_DAMAGED,
            payload: serde_json::to_value(DeployableDamaged {
                deployable: caps["deployable"].to_string(),
                damage: caps["damage"].parse().unwrap_or_default(),
                weapon: caps["weapon"].to_string(),
                attacker_name: Some(caps["attacker"].to_string()),
            })
            .unwrap(),
            chain_id: None,
        });
    }

    None
}

/// `PLAYER_DIED` and `TEAMKILL` are not mutually exclusive categories: a
/// teamkill is still a death, and downstream subscribers interested only
/// in "did anyone commit a teamkill" shouldn't have to deserialize every
/// death to check. So a death with `teamkill=true` is published twice:
/// once as `PLAYER_DIED`, and again, unchanged, tagged `TYPE_TEAMKILL`.
/// Callers that publish a `ParsedEvent` should call this afterwards and
/// publish the result too, if present.
pub fn derive_teamkill_event(parsed: &ParsedEvent) -> Option<ParsedEvent> {
    if parsed.type_tag != TYPE_PLAYER_DIED {
        return None;
    }
    let died: PlayerDied = serde_json::from_value(parsed.payload.clone()).ok()?;
    if !died.teamkill {
        return None;
    }
    Some(ParsedEvent {
        type_tag: TYPE_TEAMKILL,
        payload: parsed.payload.clone(),
        chain_id: parsed.chain_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_line_is_dropped() {
        let correlator = ChainCorrelator::new();
        assert!(parse_line("not a log line at all", &correlator, 0).is_none());
    }

    #[test]
    fn join_succeeded_parses() {
        let correlator = ChainCorrelator::new();
        let line = "[2026.07.26-12.00.00:000][ 12]LogOnline: Join succeeded: SomePlayer (Steam: 76561198000000001)?";
        let parsed = parse_line(line, &correlator, 0).unwrap();
        assert_eq!(parsed.type_tag, TYPE_JOIN_SUCCEEDED);
    }

    /// Boundary scenario: a wound and a die sharing a chainID, same team,
    /// must correlate into one PLAYER_DIED carrying teamkill=true, the
    /// wound's weapon, and its wound_time.
    #[test]
    fn teamkill_correlation_across_wound_and_die() {
        let correlator = ChainCorrelator::new();
        let wound_line = "[2026.07.26-12.00.00:000][ 10]LogSquadTrace: ASQSoldier::Wound(): Player:Victim(Team:1) Damage=45.0 from Attacker(Team:1) caused by BP_M4A1_C ChainID=555";
        let die_line = "[2026.07.26-12.00.02:000][ 15]LogSquadTrace: ASQSoldier::Die(): Player:Victim(Team:1) from Attacker(Team:1) caused by BP_M4A1_C ChainID=555";

        let wound = parse_line(wound_line, &correlator, 1_000).unwrap();
        assert_eq!(wound.type_tag, TYPE_PLAYER_WOUNDED);

        let died = parse_line(die_line, &correlator, 3_000).unwrap();
        assert_eq!(died.type_tag, TYPE_PLAYER_DIED);
        let payload: PlayerDied = serde_json::from_value(died.payload).unwrap();
        assert!(payload.teamkill);
        assert_eq!(payload.weapon, "BP_M4A1_C");
        assert_eq!(payload.wound_time, 1_000);
    }

    #[test]
    fn teamkill_death_is_also_emitted_as_teamkill_event() {
        let correlator = ChainCorrelator::new();
        let wound_line = "[2026.07.26-12.00.00:000][ 10]LogSquadTrace: ASQSoldier::Wound(): Player:Victim(Team:1) Damage=45.0 from Attacker(Team:1) caused by BP_M4A1_C ChainID=557";
        let die_line = "[2026.07.26-12.00.02:000][ 15]LogSquadTrace: ASQSoldier::Die(): Player:Victim(Team:1) from Attacker(Team:1) caused by BP_M4A1_C ChainID=557";
        parse_line(wound_line, &correlator, 1_000).unwrap();
        let died = parse_line(die_line, &correlator, 3_000).unwrap();
        let teamkill_event = derive_teamkill_event(&died).expect("teamkill should be derived");
        assert_eq!(teamkill_event.type_tag, TYPE_TEAMKILL);
    }

    #[test]
    fn different_teams_are_not_a_teamkill() {
        let correlator = ChainCorrelator::new();
        let wound_line = "[2026.07.26-12.00.00:000][ 10]LogSquadTrace: ASQSoldier::Wound(): Player:Victim(Team:2) Damage=45.0 from Attacker(Team:1) caused by BP_M4A1_C ChainID=556";
        let die_line = "[2026.07.26-12.00.02:000][ 15]LogSquadTrace: ASQSoldier::Die(): Player:Victim(Team:2) from Attacker(Team:1) caused by BP_M4A1_C ChainID=556";

        parse_line(wound_line, &correlator, 1_000).unwrap();
        let died = parse_line(die_line, &correlator, 3_000).unwrap();
        let payload: PlayerDied = serde_json::from_value(died.payload).unwrap();
        assert!(!payload.teamkill);
    }
}
