//! Structured payloads produced by the log parser.

use serde::{Deserialize, Serialize};

pub const TYPE_PLAYER_CONNECTED: &str = "log.player_connected";
pub const TYPE_PLAYER_DISCONNECTED: &str = "log.player_disconnected";
pub const TYPE_JOIN_SUCCEEDED: &str = "log.join_succeeded";
pub const TYPE_PLAYER_POSSESS: &str = "log.player_possess";
pub const TYPE_PLAYER_DAMAGED: &str = "log.player_damaged";
pub const TYPE_PLAYER_WOUNDED: &str = "log.player_wounded";
pub const TYPE_PLAYER_DIED: &str = "log.player_died";
pub const TYPE_PLAYER_REVIVED: &str = "log.player_revived";
pub const TYPE_PLAYER_SQUAD_CHANGE: &str = "log.player_squad_change";
pub const TYPE_PLAYER_TEAM_CHANGE: &str = "log.player_team_change";
pub const TYPE_DEPLOYABLE_DAMAGED: &str = "log.deployable_damaged";
pub const TYPE_ADMIN_BROADCAST: &str = "log.admin_broadcast";
pub const TYPE_TICK_RATE: &str = "log.tick_rate";
pub const TYPE_NEW_GAME: &str = "log.new_game";
pub const TYPE_ROUND_ENDED: &str = "log.round_ended";
pub const TYPE_TEAMKILL: &str = "log.teamkill";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConnected {
    pub eos_id: Option<String>,
    pub steam_id: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDisconnected {
    pub steam_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSucceeded {
    pub player_name: String,
    pub steam_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPossess {
    pub player_name: String,
    pub steam_id: Option<String>,
    pub possess_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDamaged {
    pub victim_name: String,
    pub attacker_name: Option<String>,
    pub damage: f64,
    pub weapon: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerWounded {
    pub victim_name: String,
    pub victim_team_id: Option<u32>,
    pub attacker_name: Option<String>,
    pub attacker_team_id: Option<u32>,
    pub damage: f64,
    pub weapon: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDied {
    pub victim_name: String,
    pub victim_team_id: Option<u32>,
    pub attacker_name: Option<String>,
    pub attacker_team_id: Option<u32>,
    pub weapon: String,
    pub wound_time: u64,
    pub teamkill: bool,
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRevived {
    pub reviver_name: String,
    pub victim_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSquadChange {
    pub player_name: String,
    pub team_id: Option<u32>,
    pub squad_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTeamChange {
    pub player_name: String,
    pub old_team_id: Option<u32>,
    pub new_team_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployableDamaged {
    pub deployable: String,
    pub damage: f64,
    pub weapon: String,
    pub attacker_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminBroadcast {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRate {
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGame {
    pub map: String,
    pub layer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEnded {
    pub winner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! round_trip_test {
        ($name:ident, $ty:ty, $value:expr) => {
            #[test]
            fn $name() {
                let value: $ty = $value;
                let json = serde_json::to_value(&value).unwrap();
                let parsed: $ty = serde_json::from_value(json).unwrap();
                assert_eq!(value, parsed);
            }
        };
    }

    round_trip_test!(
        player_died_round_trips,
        PlayerDied,
        PlayerDied {
            victim_name: "Victim".into(),
            victim_team_id: Some(1),
            attacker_name: Some("Attacker".into()),
            attacker_team_id: Some(1),
            weapon: "M4A1".into(),
            wound_time: 1_000,
            teamkill: true,
            chain_id: "abc123".into(),
        }
    );

    round_trip_test!(
        player_connected_round_trips,
        PlayerConnected,
        PlayerConnected {
            eos_id: Some("eos-1".into()),
            steam_id: Some("76561198000000000".into()),
            ip: Some("203.0.113.5".into()),
        }
    );
}
