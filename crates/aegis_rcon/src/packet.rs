//! Source RCON wire codec: little-endian framed packets.
//!
//! Grounded directly on the pack's Source-RCON client
//! (`other_examples/.../factorio-bridge-src-rcon.rs.rs`): the same
//! length/id/type/body layout and the same null-terminator convention,
//! generalized into an async read path instead of that file's
//! `std::net::TcpStream` blocking read.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RconError;

pub const SERVERDATA_AUTH: i32 = 3;
/// Also used for AUTH_RESPONSE on the wire; Source RCON reuses the value.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const MAX_BODY_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    pub fn new(id: i32, packet_type: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body_bytes = self.body.as_bytes();
        // id(4) + type(4) + body + null terminator(1) + trailing pad(1)
        let length = 4 + 4 + body_bytes.len() as i32 + 2;
        let mut buf = Vec::with_capacity(4 + length as usize);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.to_le_bytes());
        buf.extend_from_slice(body_bytes);
        buf.push(0);
        buf.push(0);
        buf
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), RconError> {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, RconError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let length = i32::from_le_bytes(len_buf);
        if length < 10 || length as usize > MAX_BODY_LEN {
            return Err(RconError::Protocol(format!(
                "implausible packet length {length}"
            )));
        }

        let mut rest = vec![0u8; length as usize];
        reader.read_exact(&mut rest).await?;

        let id = i32::from_le_bytes(rest[0..4].try_into().unwrap());
        let packet_type = i32::from_le_bytes(rest[4..8].try_into().unwrap());
        let body_bytes = &rest[8..rest.len() - 2];
        let body = String::from_utf8_lossy(body_bytes).into_owned();

        Ok(Self {
            id,
            packet_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_the_wire_format() {
        let packet = RconPacket::new(17, SERVERDATA_EXECCOMMAND, "ListPlayers");
        let bytes = packet.to_bytes();

        let mut cursor = std::io::Cursor::new(bytes);
        let decoded = RconPacket::read_from(&mut cursor).await.unwrap();

        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn empty_body_packet_round_trips() {
        let packet = RconPacket::new(18, SERVERDATA_RESPONSE_VALUE, "");
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 14);

        let mut cursor = std::io::Cursor::new(bytes);
        let decoded = RconPacket::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded.body, "");
        assert_eq!(decoded.id, 18);
    }

    #[tokio::test]
    async fn rejects_implausible_length() {
        let mut cursor = std::io::Cursor::new(5i32.to_le_bytes().to_vec());
        let result = RconPacket::read_from(&mut cursor).await;
        assert!(matches!(result, Err(RconError::Protocol(_))));
    }
}
