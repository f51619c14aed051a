//! Per-server RCON connection: state machine, request multiplexing, and
//! server-pushed event extraction.
//!
//! The connection registry idiom (`Arc<RwLock<...>>` plus a background
//! driver task) follows `game_server::connection::manager::ConnectionManager`;
//! the wire handling follows `packet.rs`, itself grounded in the pack's
//! `factorio-bridge` RCON client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_event_bus::{Event, EventBus, Producer, ServerId};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RconError;
use crate::events::{self, parse_player_list};
use crate::packet::{RconPacket, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE};

const DEFAULT_EXECUTE_DEADLINE: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_AUTH_FAILURES: u32 = 3;
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RconServerConfig {
    pub address: String,
    pub password: String,
}

struct PendingRequest {
    buffer: String,
    completion: oneshot::Sender<Result<String, RconError>>,
}

struct Shared {
    server_id: ServerId,
    config: RconServerConfig,
    bus: EventBus,
    state: RwLock<ConnectionState>,
    next_id: AtomicI32,
    auth_failures: AtomicU32,
    pending: AsyncMutex<HashMap<i32, PendingRequest>>,
    writer: AsyncMutex<Option<WriteHalf<TcpStream>>>,
    cancel: CancellationToken,
}

/// A single configured game server's RCON session, including its
/// reconnect-loop driver task.
pub struct RconConnection {
    shared: Arc<Shared>,
    driver: tokio::task::JoinHandle<()>,
}

impl RconConnection {
    pub fn spawn(server_id: ServerId, config: RconServerConfig, bus: EventBus) -> Arc<Self> {
        let shared = Arc::new(Shared {
            server_id,
            config,
            bus,
            state: RwLock::new(ConnectionState::Disconnected),
            next_id: AtomicI32::new(1),
            auth_failures: AtomicU32::new(0),
            pending: AsyncMutex::new(HashMap::new()),
            writer: AsyncMutex::new(None),
            cancel: CancellationToken::new(),
        });

        let driver_shared = shared.clone();
        let driver = tokio::spawn(async move { drive(driver_shared).await });

        Arc::new(Self { shared, driver })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Serializes concurrent callers behind the connection's pending-request
    /// table: each call gets its own sequence id, so no explicit queue lock
    /// is needed beyond the table itself.
    pub async fn execute(&self, command: &str, deadline: Duration) -> Result<String, RconError> {
        if *self.shared.state.read().await != ConnectionState::Connected {
            return Err(RconError::Retryable("connection not established".into()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed).max(1);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                id,
                PendingRequest {
                    buffer: String::new(),
                    completion: tx,
                },
            );
        }

        let real = RconPacket::new(id, SERVERDATA_EXECCOMMAND, command);
        let terminator = RconPacket::new(id, SERVERDATA_EXECCOMMAND, "");

        if let Err(e) = self.send_packets(&[real, terminator]).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RconError::Closed),
            Err(_) => {
                // Timeout cancels only this pending slot; the connection
                // itself is left alone.
                self.shared.pending.lock().await.remove(&id);
                Err(RconError::Timeout)
            }
        }
    }

    pub async fn execute_default(&self, command: &str) -> Result<String, RconError> {
        self.execute(command, DEFAULT_EXECUTE_DEADLINE).await
    }

    async fn send_packets(&self, packets: &[RconPacket]) -> Result<(), RconError> {
        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(RconError::Retryable("socket not connected".into()));
        };
        for packet in packets {
            if let Err(e) = packet.write_to(writer).await {
                *guard = None;
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

impl Drop for RconConnection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.driver.abort();
    }
}

async fn drive(shared: Arc<Shared>) {
    let mut backoff = BACKOFF_MIN;

    loop {
        if shared.cancel.is_cancelled() {
            return;
        }

        *shared.state.write().await = ConnectionState::Connecting;
        match connect_and_authenticate(&shared).await {
            Ok((read_half, write_half)) => {
                *shared.writer.lock().await = Some(write_half);
                *shared.state.write().await = ConnectionState::Connected;
                shared.auth_failures.store(0, Ordering::Relaxed);
                backoff = BACKOFF_MIN;
                info!(server_id = %shared.server_id, "rcon connected");

                run_session(&shared, read_half).await;

                if shared.cancel.is_cancelled() {
                    return;
                }
                fail_all_pending(&shared, "connection lost, reconnecting").await;
                *shared.state.write().await = ConnectionState::Reconnecting;
            }
            Err(RconError::AuthRejected) => {
                let failures = shared.auth_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(server_id = %shared.server_id, failures, "rcon auth rejected");
                if failures >= MAX_AUTH_FAILURES {
                    *shared.state.write().await = ConnectionState::Failed;
                    warn!(server_id = %shared.server_id, "rcon connection failed permanently, no further retries");
                    return;
                }
                *shared.state.write().await = ConnectionState::Reconnecting;
            }
            Err(e) => {
                debug!(server_id = %shared.server_id, error = %e, "rcon connect failed");
                *shared.state.write().await = ConnectionState::Reconnecting;
            }
        }

        let jitter = 1.0 + rand::thread_rng().gen_range(-0.2..=0.2);
        let wait = Duration::from_secs_f64((backoff.as_secs_f64() * jitter).max(0.1));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.cancel.cancelled() => return,
        }
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

async fn connect_and_authenticate(
    shared: &Shared,
) -> Result<(ReadHalf<TcpStream>, WriteHalf<TcpStream>), RconError> {
    let stream = TcpStream::connect(&shared.config.address).await?;
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let auth_id = 1;
    let auth_packet = RconPacket::new(auth_id, SERVERDATA_AUTH, shared.config.password.clone());
    auth_packet.write_to(&mut write_half).await?;

    loop {
        let packet = RconPacket::read_from(&mut read_half).await?;
        if packet.packet_type == SERVERDATA_RESPONSE_VALUE {
            // Some servers send an empty acknowledgement before the real
            // AUTH_RESPONSE packet; skip it.
            continue;
        }
        if packet.id == -1 {
            return Err(RconError::AuthRejected);
        }
        if packet.id == auth_id {
            return Ok((read_half, write_half));
        }
        return Err(RconError::Protocol(format!(
            "unexpected auth response id {}",
            packet.id
        )));
    }
}

async fn run_session(shared: &Arc<Shared>, mut reader: ReadHalf<TcpStream>) {
    let snapshot_shared = shared.clone();
    let snapshot_task = tokio::spawn(async move { run_snapshot_ticker(snapshot_shared).await });

    loop {
        let read = timeout(KEEPALIVE_TIMEOUT, RconPacket::read_from(&mut reader));
        tokio::select! {
            result = read => {
                match result {
                    Ok(Ok(packet)) => handle_packet(shared, packet).await,
                    Ok(Err(e)) => {
                        debug!(server_id = %shared.server_id, error = %e, "rcon read error");
                        break;
                    }
                    Err(_) => {
                        warn!(server_id = %shared.server_id, "rcon keepalive timeout, no bytes in 30s");
                        break;
                    }
                }
            }
            _ = shared.cancel.cancelled() => break,
        }
    }

    snapshot_task.abort();
}

async fn handle_packet(shared: &Arc<Shared>, packet: RconPacket) {
    if packet.packet_type != SERVERDATA_RESPONSE_VALUE {
        warn!(server_id = %shared.server_id, packet_type = packet.packet_type, "skipping packet of unknown type");
        return;
    }

    let mut pending = shared.pending.lock().await;
    if let Some(entry) = pending.get_mut(&packet.id) {
        if packet.body.is_empty() {
            // Terminator echo: the real command's response is complete.
            let entry = pending.remove(&packet.id).unwrap();
            let _ = entry.completion.send(Ok(entry.buffer));
        } else {
            entry.buffer.push_str(&packet.body);
        }
        return;
    }
    drop(pending);

    for line in packet.body.lines() {
        if let Some((type_tag, payload)) = events::extract_event(line) {
            let event = Event::new(shared.server_id, Producer::Rcon, type_tag, payload);
            shared.bus.publish(event);
        }
    }
}

async fn fail_all_pending(shared: &Shared, reason: &str) {
    let mut pending = shared.pending.lock().await;
    for (_, entry) in pending.drain() {
        let _ = entry
            .completion
            .send(Err(RconError::Retryable(reason.to_string())));
    }
}

async fn run_snapshot_ticker(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
    loop {
        interval.tick().await;
        if *shared.state.read().await != ConnectionState::Connected {
            continue;
        }

        if let Ok(body) = execute_direct(&shared, "ListPlayers").await {
            let snapshot = parse_player_list(&body);
            shared.bus.publish(Event::new(
                shared.server_id,
                Producer::Rcon,
                events::TYPE_PLAYER_LIST_SNAPSHOT,
                serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
            ));
        }

        if let Ok(body) = execute_direct(&shared, events::CMD_LIST_SQUADS).await {
            let snapshot = events::parse_squad_list(&body);
            shared.bus.publish(Event::new(
                shared.server_id,
                Producer::Rcon,
                events::TYPE_SQUAD_LIST_SNAPSHOT,
                serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
            ));
        }

        if let Ok(body) = execute_direct(&shared, events::CMD_SHOW_SERVER_INFO).await {
            let snapshot = events::parse_server_info(&body);
            shared.bus.publish(Event::new(
                shared.server_id,
                Producer::Rcon,
                events::TYPE_SERVER_INFO_SNAPSHOT,
                serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
            ));
        }
    }
}

/// Used internally by the snapshot ticker, which only has a `Shared`
/// reference rather than a full `RconConnection` handle.
async fn execute_direct(shared: &Arc<Shared>, command: &str) -> Result<String, RconError> {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed).max(1);
    let (tx, rx) = oneshot::channel();
    shared.pending.lock().await.insert(
        id,
        PendingRequest {
            buffer: String::new(),
            completion: tx,
        },
    );

    let real = RconPacket::new(id, SERVERDATA_EXECCOMMAND, command);
    let terminator = RconPacket::new(id, SERVERDATA_EXECCOMMAND, "");
    {
        let mut guard = shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            shared.pending.lock().await.remove(&id);
            return Err(RconError::Retryable("socket not connected".into()));
        };
        for packet in [real, terminator] {
            if let Err(e) = packet.write_to(writer).await {
                *guard = None;
                shared.pending.lock().await.remove(&id);
                return Err(e);
            }
        }
    }

    match timeout(DEFAULT_EXECUTE_DEADLINE, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RconError::Closed),
        Err(_) => {
            shared.pending.lock().await.remove(&id);
            Err(RconError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared() -> Arc<Shared> {
        Arc::new(Shared {
            server_id: ServerId::new(),
            config: RconServerConfig {
                address: "127.0.0.1:1".to_string(),
                password: "unused".to_string(),
            },
            bus: EventBus::new(),
            state: RwLock::new(ConnectionState::Connected),
            next_id: AtomicI32::new(1),
            auth_failures: AtomicU32::new(0),
            pending: AsyncMutex::new(HashMap::new()),
            writer: AsyncMutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Boundary scenario: a `ListPlayers` response arrives split across a
    /// real packet and an empty terminator probe that echoes the same id.
    /// `Execute` must see the concatenated body with no leftover buffer.
    #[tokio::test]
    async fn multi_packet_reply_is_concatenated_until_terminator() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(
            17,
            PendingRequest {
                buffer: String::new(),
                completion: tx,
            },
        );

        handle_packet(
            &shared,
            RconPacket::new(17, SERVERDATA_RESPONSE_VALUE, "ID: 1 | body chunk one"),
        )
        .await;
        handle_packet(
            &shared,
            RconPacket::new(17, SERVERDATA_RESPONSE_VALUE, ""),
        )
        .await;

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, "ID: 1 | body chunk one");
        assert!(shared.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unsolicited_line_is_published_as_event() {
        let shared = test_shared();
        let sub = shared
            .bus
            .subscribe(aegis_event_bus::EventFilter::all());

        handle_packet(
            &shared,
            RconPacket::new(
                999,
                SERVERDATA_RESPONSE_VALUE,
                "Remote admin has broadcast server message: hello",
            ),
        )
        .await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.type_tag, crate::events::TYPE_ADMIN_BROADCAST);
    }

    #[tokio::test]
    async fn reconnect_fails_pending_requests_as_retryable() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(
            5,
            PendingRequest {
                buffer: String::new(),
                completion: tx,
            },
        );

        fail_all_pending(&shared, "connection lost, reconnecting").await;

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(RconError::Retryable(_))));
    }
}
