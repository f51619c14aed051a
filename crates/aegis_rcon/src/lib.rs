//! Persistent, reconnecting, request-multiplexed Source-RCON clients, one
//! per configured game server.

mod connection;
mod error;
mod events;
mod manager;
mod packet;

pub use connection::{ConnectionState, RconConnection, RconServerConfig};
pub use error::RconError;
pub use events::{
    parse_player_list, parse_server_info, parse_squad_list, AdminBroadcast, ChatMessage,
    PlayerBanned, PlayerKicked, PlayerListSnapshot, PlayerRow, PlayerWarned, ServerInfoSnapshot,
    SquadCreated, SquadListSnapshot, SquadRow, TYPE_ADMIN_BROADCAST, TYPE_CHAT_MESSAGE,
    TYPE_PLAYER_BANNED, TYPE_PLAYER_KICKED, TYPE_PLAYER_LIST_SNAPSHOT, TYPE_PLAYER_WARNED,
    TYPE_SERVER_INFO_SNAPSHOT, TYPE_SQUAD_CREATED, TYPE_SQUAD_LIST_SNAPSHOT,
};
pub use manager::RconManager;
pub use packet::{RconPacket, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE};
