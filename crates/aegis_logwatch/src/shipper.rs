//! Remote log-shipper transport: an alternate way pre-parsed events reach
//! the bus, for deployments where a sidecar parses logs closer to the
//! game server and streams the result over the network instead of this
//! process tailing the file itself. The in-process watcher's parser
//! remains authoritative; this module only decodes and republishes
//! events that already carry the same shape `parser` produces.

use std::sync::Arc;

use aegis_event_bus::{Event, EventBus, Producer, ServerId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LogWatchError;

const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct AuthFrame {
    auth: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthReply {
    ok: bool,
}

/// A single shipped event, in the wire shape documented for the
/// log-shipper stream: `{event, data, time, chain_id}`. `time` is an
/// RFC3339 timestamp string, per the wire contract.
#[derive(Debug, Deserialize)]
struct ShippedEvent {
    event: String,
    data: serde_json::Value,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    chain_id: Option<String>,
}

/// Parses a shipped event's `time` field into the millisecond-resolution
/// timestamp `Event` carries. Logged and dropped (falling back to the
/// receiving process's own clock) rather than failing the whole frame —
/// one shipper clock hiccup shouldn't drop an otherwise well-formed event.
fn parse_shipped_time(time: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(time)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
}

pub struct ShipperHandle {
    cancel: CancellationToken,
    pub local_addr: std::net::SocketAddr,
}

impl ShipperHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Binds `bind_addr` and accepts shipper connections, one per configured
/// `server_id`, until cancelled. Each connection's first frame must be an
/// auth frame matching `auth_token`; everything after that is a stream of
/// `ShippedEvent` frames republished onto `bus` tagged with `server_id`.
pub async fn spawn(
    bind_addr: &str,
    server_id: ServerId,
    auth_token: Arc<str>,
    bus: EventBus,
) -> Result<ShipperHandle, LogWatchError> {
    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let accept_cancel = cancel.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_cancel.cancelled() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(%peer, "log shipper connection accepted");
                            let bus = bus.clone();
                            let auth_token = auth_token.clone();
                            let conn_cancel = accept_cancel.clone();
                            tokio::spawn(async move {
                                if let Err(err) =
                                    handle_connection(stream, server_id, auth_token, bus, conn_cancel).await
                                {
                                    warn!(error = %err, "log shipper connection ended with error");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "log shipper accept failed"),
                    }
                }
            }
        }
    });

    Ok(ShipperHandle { cancel, local_addr })
}

async fn handle_connection(
    mut stream: TcpStream,
    server_id: ServerId,
    auth_token: Arc<str>,
    bus: EventBus,
    cancel: CancellationToken,
) -> Result<(), LogWatchError> {
    let auth_frame: AuthFrame = read_frame(&mut stream).await?;
    if auth_frame.auth != *auth_token {
        let reply = serde_json::to_vec(&AuthReply { ok: false }).unwrap_or_default();
        write_frame(&mut stream, &reply).await?;
        return Err(LogWatchError::ShipperAuth);
    }
    let reply = serde_json::to_vec(&AuthReply { ok: true }).unwrap_or_default();
    write_frame(&mut stream, &reply).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame::<ShippedEvent>(&mut stream) => {
                let shipped = frame?;
                let mut event = Event::new(
                    server_id,
                    Producer::LogShipper,
                    shipped.event,
                    shipped.data,
                );
                if let Some(time) = shipped.time.as_deref().and_then(parse_shipped_time) {
                    event.timestamp = time;
                } else if let Some(raw) = &shipped.time {
                    warn!(time = %raw, "log shipper event has an unparseable time field, using local clock");
                }
                if let Some(chain_id) = shipped.chain_id {
                    event = event.with_chain_id(chain_id);
                }
                bus.publish(event);
            }
        }
    }
}

async fn read_frame<T: for<'de> Deserialize<'de>>(
    stream: &mut TcpStream,
) -> Result<T, LogWatchError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(LogWatchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "log shipper frame length out of range",
        )));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| {
        LogWatchError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    })
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<(), LogWatchError> {
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_event_bus::EventFilter;
    use tokio::io::AsyncWriteExt;

    async fn send_frame(stream: &mut TcpStream, value: &impl Serialize) {
        let body = serde_json::to_vec(value).unwrap();
        write_frame(stream, &body).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_auth_token_closes_without_publishing() {
        let server_id = ServerId::new();
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all());
        let handle = spawn("127.0.0.1:0", server_id, Arc::from("expected-token"), bus)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr).await.unwrap();
        send_frame(&mut stream, &AuthFrame { auth: "wrong".into() }).await;

        let reply: AuthReply = read_frame(&mut stream).await.unwrap();
        assert!(!reply.ok);

        assert!(tokio::time::timeout(std::time::Duration::from_millis(200), sub.recv())
            .await
            .is_err());
        handle.shutdown();
    }

    #[tokio::test]
    async fn authenticated_event_is_published() {
        let server_id = ServerId::new();
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all());
        let handle = spawn("127.0.0.1:0", server_id, Arc::from("expected-token"), bus)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr).await.unwrap();
        send_frame(
            &mut stream,
            &AuthFrame {
                auth: "expected-token".into(),
            },
        )
        .await;
        let reply: AuthReply = read_frame(&mut stream).await.unwrap();
        assert!(reply.ok);

        send_frame(
            &mut stream,
            &serde_json::json!({
                "event": "log.player_connected",
                "data": {},
                "time": "2026-07-26T12:00:00Z",
            }),
        )
        .await;

        let event = sub.recv().await.expect("event should be delivered");
        assert_eq!(event.type_tag, "log.player_connected");
        assert_eq!(
            event.timestamp,
            chrono::DateTime::parse_from_rfc3339("2026-07-26T12:00:00Z")
                .unwrap()
                .timestamp_millis() as u64
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn unparseable_time_falls_back_to_local_clock() {
        let server_id = ServerId::new();
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all());
        let handle = spawn("127.0.0.1:0", server_id, Arc::from("expected-token"), bus)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr).await.unwrap();
        send_frame(
            &mut stream,
            &AuthFrame {
                auth: "expected-token".into(),
            },
        )
        .await;
        let _reply: AuthReply = read_frame(&mut stream).await.unwrap();

        send_frame(
            &mut stream,
            &serde_json::json!({"event": "log.player_connected", "data": {}, "time": "not-a-timestamp"}),
        )
        .await;

        let event = sub.recv().await.expect("event should be delivered");
        assert_eq!(event.type_tag, "log.player_connected");
        assert!(event.timestamp > 0);
        handle.shutdown();
    }
}
