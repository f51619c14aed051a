//! Extraction of server-pushed RCON events from unsolicited response lines,
//! and the structured snapshot types produced by periodic listing commands.
//!
//! Patterns are compiled once and keyed by category, per the spec's
//! "regex-heavy parsing" design note — the same approach
//! `aegis_logwatch`'s parser uses for log lines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TYPE_CHAT_MESSAGE: &str = "rcon.chat_message";
pub const TYPE_ADMIN_BROADCAST: &str = "rcon.admin_broadcast";
pub const TYPE_PLAYER_WARNED: &str = "rcon.player_warned";
pub const TYPE_PLAYER_KICKED: &str = "rcon.player_kicked";
pub const TYPE_PLAYER_BANNED: &str = "rcon.player_banned";
pub const TYPE_SQUAD_CREATED: &str = "rcon.squad_created";
pub const TYPE_PLAYER_LIST_SNAPSHOT: &str = "rcon.player_list_snapshot";
pub const TYPE_SQUAD_LIST_SNAPSHOT: &str = "rcon.squad_list_snapshot";
pub const TYPE_SERVER_INFO_SNAPSHOT: &str = "rcon.server_info_snapshot";

/// `ListSquads`/`ShowServerInfo` commands used by the periodic snapshot
/// ticker, alongside `ListPlayers`.
pub const CMD_LIST_SQUADS: &str = "ListSquads";
pub const CMD_SHOW_SERVER_INFO: &str = "ShowServerInfo";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_type: String,
    pub player_name: String,
    pub steam_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminBroadcast {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerWarned {
    pub player_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerKicked {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBanned {
    pub player_name: String,
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadCreated {
    pub player_name: String,
    pub squad_name: String,
    pub team_name: String,
}

/// A single row from `ListPlayers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRow {
    pub player_id: u32,
    pub steam_id: Option<String>,
    pub eos_id: Option<String>,
    pub name: String,
    pub team_id: Option<u32>,
    pub squad_id: Option<u32>,
    pub is_leader: bool,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerListSnapshot {
    pub players: Vec<PlayerRow>,
}

/// A single row from `ListSquads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadRow {
    pub team_id: u32,
    pub squad_id: u32,
    pub name: String,
    pub size: u32,
    pub locked: bool,
    pub creator_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SquadListSnapshot {
    pub squads: Vec<SquadRow>,
}

/// `ShowServerInfo` replies with a JSON body on the wire; the few fields
/// plugins commonly need are pulled out, with the raw document kept
/// alongside for anything else a plugin's `ServerAPI::get_server_info`
/// caller wants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerInfoSnapshot {
    pub server_name: Option<String>,
    pub map_name: Option<String>,
    pub game_mode: Option<String>,
    pub player_count: Option<u32>,
    pub max_player_count: Option<u32>,
    pub raw: serde_json::Value,
}

static CHAT_MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(?P<chat>ChatAll|ChatTeam|ChatSquad|ChatAdmin)\] \[SteamID:(?P<steam>\d+)\] (?P<name>.+?) : (?P<message>.*)$")
        .expect("valid chat message regex")
});

static ADMIN_BROADCAST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Remote admin has broadcast server message: (?P<message>.*)$")
        .expect("valid admin broadcast regex")
});

static PLAYER_WARNED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Remote admin has warned player (?P<name>.+?)\. Message was \"(?P<reason>.*)\"$")
        .expect("valid player warned regex")
});

static PLAYER_KICKED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Kicked player .*?\. \[(?P<name>.+)\]$").expect("valid player kicked regex")
});

static PLAYER_BANNED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Banned player .*?\. \[(?P<name>.+?)\] for interval (?P<interval>.+)$")
        .expect("valid player banned regex")
});

static SQUAD_CREATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.+?) \(Steam ID: \d+\) has created Squad (?P<squad>.+?) \(Squad ID: \d+\) on (?P<team>.+)$")
        .expect("valid squad created regex")
});

/// Attempts to classify a single unsolicited RCON response line. Returns
/// `(type_tag, payload)` on the first matching pattern; unmatched lines are
/// the caller's responsibility to drop.
pub fn extract_event(line: &str) -> Option<(&'static str, serde_json::Value)> {
    if let Some(caps) = CHAT_MESSAGE_RE.captures(line) {
        let chat_type = match &caps["chat"] {
            "ChatAll" => "all",
            "ChatTeam" => "team",
            "ChatSquad" => "squad",
            _ => "admin",
        };
        let payload = ChatMessage {
            chat_type: chat_type.to_string(),
            player_name: caps["name"].to_string(),
            steam_id: Some(caps["steam"].to_string()),
            message: caps["message"].to_string(),
        };
        return Some((TYPE_CHAT_MESSAGE, serde_json::to_value(payload).unwrap()));
    }

    if let Some(caps) = ADMIN_BROADCAST_RE.captures(line) {
        let payload = AdminBroadcast {
            message: caps["message"].to_string(),
        };
        return Some((
            TYPE_ADMIN_BROADCAST,
            serde_json::to_value(payload).unwrap(),
        ));
    }

    if let Some(caps) = PLAYER_WARNED_RE.captures(line) {
        let payload = PlayerWarned {
            player_name: caps["name"].to_string(),
            reason: caps["reason"].to_string(),
        };
        return Some((TYPE_PLAYER_WARNED, serde_json::to_value(payload).unwrap()));
    }

    if let Some(caps) = PLAYER_KICKED_RE.captures(line) {
        let payload = PlayerKicked {
            player_name: caps["name"].to_string(),
        };
        return Some((TYPE_PLAYER_KICKED, serde_json::to_value(payload).unwrap()));
    }

    if let Some(caps) = PLAYER_BANNED_RE.captures(line) {
        let payload = PlayerBanned {
            player_name: caps["name"].to_string(),
            interval: caps["interval"].to_string(),
        };
        return Some((TYPE_PLAYER_BANNED, serde_json::to_value(payload).unwrap()));
    }

    if let Some(caps) = SQUAD_CREATED_RE.captures(line) {
        let payload = SquadCreated {
            player_name: caps["name"].to_string(),
            squad_name: caps["squad"].to_string(),
            team_name: caps["team"].to_string(),
        };
        return Some((TYPE_SQUAD_CREATED, serde_json::to_value(payload).unwrap()));
    }

    None
}

static PLAYER_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ID: (?P<id>\d+) \| SteamID: (?P<steam>\d+|N/A) \| EOS ID: (?P<eos>[\w-]+|N/A) \| Name: (?P<name>.+?) \| Team ID: (?P<team>\d+|N/A) \| Squad ID: (?P<squad>\d+|N/A) \| Is Leader: (?P<leader>True|False) \| Role: (?P<role>.*)$",
    )
    .expect("valid player row regex")
});

/// Parses the body of a `ListPlayers` response into structured rows.
pub fn parse_player_list(body: &str) -> PlayerListSnapshot {
    let mut players = Vec::new();
    for line in body.lines() {
        let Some(caps) = PLAYER_ROW_RE.captures(line.trim()) else {
            continue;
        };
        players.push(PlayerRow {
            player_id: caps["id"].parse().unwrap_or_default(),
            steam_id: (&caps["steam"] != "N/A").then(|| caps["steam"].to_string()),
            eos_id: (&caps["eos"] != "N/A").then(|| caps["eos"].to_string()),
            name: caps["name"].to_string(),
            team_id: caps["team"].parse().ok(),
            squad_id: caps["squad"].parse().ok(),
            is_leader: &caps["leader"] == "True",
            role: (!caps["role"].is_empty()).then(|| caps["role"].to_string()),
        });
    }
    PlayerListSnapshot { players }
}

static SQUAD_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Team ID: (?P<team>\d+)").expect("valid squad team header regex")
});

static SQUAD_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ID: (?P<id>\d+) \| Name: (?P<name>.+?) \| Size: (?P<size>\d+) \| Locked: (?P<locked>True|False)(?: \| Creator Name: (?P<creator>.+?))? \|",
    )
    .expect("valid squad row regex")
});

/// Parses the body of a `ListSquads` response. `Team ID:` header lines
/// set the team context for the squad rows that follow until the next
/// header.
pub fn parse_squad_list(body: &str) -> SquadListSnapshot {
    let mut squads = Vec::new();
    let mut current_team: Option<u32> = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(caps) = SQUAD_HEADER_RE.captures(line) {
            current_team = caps["team"].parse().ok();
            continue;
        }
        let Some(caps) = SQUAD_ROW_RE.captures(line) else {
            continue;
        };
        let Some(team_id) = current_team else {
            continue;
        };
        squads.push(SquadRow {
            team_id,
            squad_id: caps["id"].parse().unwrap_or_default(),
            name: caps["name"].to_string(),
            size: caps["size"].parse().unwrap_or_default(),
            locked: &caps["locked"] == "True",
            creator_name: caps.name("creator").map(|m| m.as_str().to_string()),
        });
    }
    SquadListSnapshot { squads }
}

/// Parses the JSON body of a `ShowServerInfo` response.
pub fn parse_server_info(body: &str) -> ServerInfoSnapshot {
    let raw: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    ServerInfoSnapshot {
        server_name: raw.get("ServerName_s").and_then(|v| v.as_str()).map(String::from),
        map_name: raw.get("MapName_s").and_then(|v| v.as_str()).map(String::from),
        game_mode: raw.get("GameMode_s").and_then(|v| v.as_str()).map(String::from),
        player_count: raw
            .get("PlayerCount_I")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64().map(|n| n as u32))),
        max_player_count: raw
            .get("MaxPlayers")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64().map(|n| n as u32))),
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_chat_message() {
        let (tag, payload) = extract_event(
            "[ChatAll] [SteamID:76561198000000000] SomePlayer : gg",
        )
        .unwrap();
        assert_eq!(tag, TYPE_CHAT_MESSAGE);
        let msg: ChatMessage = serde_json::from_value(payload).unwrap();
        assert_eq!(msg.chat_type, "all");
        assert_eq!(msg.message, "gg");
    }

    #[test]
    fn extracts_admin_broadcast() {
        let (tag, payload) =
            extract_event("Remote admin has broadcast server message: Be nice").unwrap();
        assert_eq!(tag, TYPE_ADMIN_BROADCAST);
        let msg: AdminBroadcast = serde_json::from_value(payload).unwrap();
        assert_eq!(msg.message, "Be nice");
    }

    #[test]
    fn unmatched_line_returns_none() {
        assert!(extract_event("some unrelated server noise").is_none());
    }

    #[test]
    fn parses_player_list_rows() {
        let body = "ID: 1 | SteamID: 76561198000000001 | EOS ID: abc123 | Name: Alice | Team ID: 1 | Squad ID: 2 | Is Leader: True | Role: Rifleman\n";
        let snapshot = parse_player_list(body);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].name, "Alice");
        assert!(snapshot.players[0].is_leader);
    }

    #[test]
    fn parses_squad_list_rows_under_team_header() {
        let body = "Team ID: 1 (Northern Coalition)\n\
                     ID: 1 | Name: Squad 1 | Size: 4 | Locked: False | Creator Name: Alice | Creator Online IDs: EOS: x\n\
                     Team ID: 2 (Middle Eastern Alliance)\n\
                     ID: 2 | Name: Squad 2 | Size: 2 | Locked: True | Creator Name: Bob | Creator Online IDs: EOS: y\n";
        let snapshot = parse_squad_list(body);
        assert_eq!(snapshot.squads.len(), 2);
        assert_eq!(snapshot.squads[0].team_id, 1);
        assert_eq!(snapshot.squads[0].name, "Squad 1");
        assert!(!snapshot.squads[0].locked);
        assert_eq!(snapshot.squads[1].team_id, 2);
        assert!(snapshot.squads[1].locked);
    }

    #[test]
    fn parses_server_info_json_body() {
        let body = r#"{"ServerName_s":"My Server","MapName_s":"Narva","GameMode_s":"RAAS","PlayerCount_I":42,"MaxPlayers":80}"#;
        let snapshot = parse_server_info(body);
        assert_eq!(snapshot.server_name.as_deref(), Some("My Server"));
        assert_eq!(snapshot.map_name.as_deref(), Some("Narva"));
        assert_eq!(snapshot.player_count, Some(42));
        assert_eq!(snapshot.max_player_count, Some(80));
    }
}
