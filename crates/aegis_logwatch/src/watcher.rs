//! Source tailing: local file follow-and-reopen, plus polling SFTP/FTP
//! readers bridged onto blocking threads.

use std::io::{Read, Seek, SeekFrom};
use std::net::TcpStream;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::time::Duration;

use aegis_event_bus::{Event, EventBus, Producer, ServerId};
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LogWatchError;
use crate::parser::{self, ChainCorrelator};
use crate::source::{CursorStore, FileIdentity, LogSourceConfig, LogSourceKind};

const LOCAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Starts tailing `config` for `server_id`, publishing parsed events onto
/// `bus` and persisting offsets into `cursor_store` as it goes.
pub fn spawn(
    server_id: ServerId,
    config: LogSourceConfig,
    bus: EventBus,
    cursor_store: Arc<CursorStore>,
) -> WatcherHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run(server_id, config, bus, cursor_store, task_cancel).await;
    });
    WatcherHandle { cancel, task }
}

async fn run(
    server_id: ServerId,
    config: LogSourceConfig,
    bus: EventBus,
    cursor_store: Arc<CursorStore>,
    cancel: CancellationToken,
) {
    let correlator = ChainCorrelator::new();
    let poll_interval = match config.kind {
        LogSourceKind::Local => LOCAL_POLL_INTERVAL,
        _ => Duration::from_secs(config.poll_interval_secs.max(1)),
    };

    let mut identity = FileIdentity::default();
    let mut initialized = false;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let result = match config.kind {
            LogSourceKind::Local => {
                poll_local(&server_id, &config, &bus, &cursor_store, &correlator, &mut identity, &mut initialized).await
            }
            LogSourceKind::Sftp | LogSourceKind::Ftp => {
                poll_remote(&server_id, &config, &bus, &cursor_store, &correlator, &mut identity, &mut initialized).await
            }
        };

        if let Err(err) = result {
            warn!(server_id = %server_id, error = %err, "log source poll failed, retrying");
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(poll_interval) => {}
        }
    }
}

async fn poll_local(
    server_id: &ServerId,
    config: &LogSourceConfig,
    bus: &EventBus,
    cursor_store: &CursorStore,
    correlator: &ChainCorrelator,
    identity: &mut FileIdentity,
    initialized: &mut bool,
) -> Result<(), LogWatchError> {
    let metadata = tokio::fs::metadata(&config.path).await?;
    let new_identity = FileIdentity {
        inode: Some(metadata.ino()),
        len_at_last_check: metadata.len(),
    };

    if !*initialized {
        *initialized = true;
        *identity = new_identity;
        if !config.read_from_start {
            cursor_store.set(*server_id, metadata.len());
        }
    } else if identity.indicates_rotation(&new_identity) {
        info!(server_id = %server_id, path = %config.path, "log source rotated, resetting offset");
        cursor_store.reset(*server_id);
        *identity = new_identity;
    } else {
        *identity = new_identity;
    }

    let offset = cursor_store.get(*server_id);
    if new_identity.len_at_last_check <= offset {
        return Ok(());
    }

    let mut file = TokioFile::open(&config.path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity((new_identity.len_at_last_check - offset) as usize);
    file.read_to_end(&mut buf).await?;

    let consumed = process_chunk(server_id, &buf, bus, correlator);
    cursor_store.set(*server_id, offset + consumed as u64);
    Ok(())
}

/// Blocking SFTP/FTP stat-and-read, bridged onto a blocking thread since
/// both `ssh2` and `suppaftp` are synchronous APIs.
async fn poll_remote(
    server_id: &ServerId,
    config: &LogSourceConfig,
    bus: &EventBus,
    cursor_store: &CursorStore,
    correlator: &ChainCorrelator,
    identity: &mut FileIdentity,
    initialized: &mut bool,
) -> Result<(), LogWatchError> {
    let offset = cursor_store.get(*server_id);
    let config = config.clone();
    let (len, chunk) = tokio::task::spawn_blocking(move || fetch_remote_chunk(&config, offset))
        .await
        .map_err(|e| LogWatchError::Io(std::io::Error::other(e.to_string())))??;

    let new_identity = FileIdentity {
        inode: None,
        len_at_last_check: len,
    };

    if !*initialized {
        *initialized = true;
        *identity = new_identity;
        return Ok(());
    }

    if identity.indicates_rotation(&new_identity) {
        info!(server_id = %server_id, "remote log source rotated, resetting offset");
        cursor_store.reset(*server_id);
        *identity = new_identity;
        return Ok(());
    }
    *identity = new_identity;

    if chunk.is_empty() {
        return Ok(());
    }
    let consumed = process_chunk(server_id, &chunk, bus, correlator);
    cursor_store.set(*server_id, offset + consumed as u64);
    Ok(())
}

fn fetch_remote_chunk(config: &LogSourceConfig, offset: u64) -> Result<(u64, Vec<u8>), LogWatchError> {
    match config.kind {
        LogSourceKind::Sftp => fetch_sftp_chunk(config, offset),
        LogSourceKind::Ftp => fetch_ftp_chunk(config, offset),
        LogSourceKind::Local => unreachable!("local sources use poll_local"),
    }
}

fn fetch_sftp_chunk(config: &LogSourceConfig, offset: u64) -> Result<(u64, Vec<u8>), LogWatchError> {
    let creds = config
        .credentials
        .as_ref()
        .ok_or_else(|| LogWatchError::Sftp("missing credentials".into()))?;

    let tcp = TcpStream::connect((creds.host.as_str(), creds.port))
        .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    let mut session = ssh2::Session::new().map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| LogWatchError::Sftp(e.to_string()))?;

    if let Some(password) = &creds.password {
        session
            .userauth_password(&creds.username, password)
            .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    } else if let Some(key_path) = &creds.private_key_path {
        session
            .userauth_pubkey_file(&creds.username, None, std::path::Path::new(key_path), None)
            .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    }

    let sftp = session.sftp().map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    let stat = sftp
        .stat(std::path::Path::new(&config.path))
        .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    let len = stat.size.unwrap_or(0);
    if len <= offset {
        return Ok((len, Vec::new()));
    }

    let mut remote_file = sftp
        .open(std::path::Path::new(&config.path))
        .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    remote_file
        .seek(SeekFrom::Start(offset))
        .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    remote_file
        .read_to_end(&mut buf)
        .map_err(|e| LogWatchError::Sftp(e.to_string()))?;
    Ok((len, buf))
}

fn fetch_ftp_chunk(config: &LogSourceConfig, offset: u64) -> Result<(u64, Vec<u8>), LogWatchError> {
    let creds = config
        .credentials
        .as_ref()
        .ok_or_else(|| LogWatchError::Ftp("missing credentials".into()))?;

    let mut ftp = suppaftp::FtpStream::connect((creds.host.as_str(), creds.port))
        .map_err(|e| LogWatchError::Ftp(e.to_string()))?;
    ftp.login(&creds.username, creds.password.as_deref().unwrap_or(""))
        .map_err(|e| LogWatchError::Ftp(e.to_string()))?;

    let len = ftp
        .size(&config.path)
        .map_err(|e| LogWatchError::Ftp(e.to_string()))? as u64;
    if len <= offset {
        let _ = ftp.quit();
        return Ok((len, Vec::new()));
    }

    ftp.resume_transfer(offset as usize)
        .map_err(|e| LogWatchError::Ftp(e.to_string()))?;
    let mut stream = ftp
        .retr_as_stream(&config.path)
        .map_err(|e| LogWatchError::Ftp(e.to_string()))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    stream
        .read_to_end(&mut buf)
        .map_err(|e| LogWatchError::Io(e))?;
    let _ = ftp.finalize_retr_stream(stream);
    let _ = ftp.quit();
    Ok((len, buf))
}

/// Splits a freshly read chunk into complete lines, parses and publishes
/// each, and returns the number of bytes consumed (always a multiple of
/// complete lines: a trailing partial line is left unconsumed so the next
/// poll picks it up whole).
fn process_chunk(
    server_id: &ServerId,
    chunk: &[u8],
    bus: &EventBus,
    correlator: &ChainCorrelator,
) -> usize {
    let text = String::from_utf8_lossy(chunk);
    let mut consumed = 0usize;
    let now_ms = aegis_event_bus::monotonic_millis();

    for line in text.split_inclusive('\n') {
        if !line.ends_with('\n') {
            // Partial trailing line; don't advance the offset past it.
            break;
        }
        consumed += line.len();
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        let Some(parsed) = parser::parse_line(trimmed, correlator, now_ms) else {
            debug!(server_id = %server_id, "unmatched log line");
            continue;
        };

        let teamkill = parser::derive_teamkill_event(&parsed);

        let mut event = Event::new(*server_id, Producer::LogWatcher, parsed.type_tag, parsed.payload);
        if let Some(chain_id) = &parsed.chain_id {
            event = event.with_chain_id(chain_id.clone());
        }
        bus.publish(event);

        if let Some(teamkill_event) = teamkill {
            let mut event = Event::new(
                *server_id,
                Producer::LogWatcher,
                teamkill_event.type_tag,
                teamkill_event.payload,
            );
            if let Some(chain_id) = &teamkill_event.chain_id {
                event = event.with_chain_id(chain_id.clone());
            }
            bus.publish(event);
        }
    }

    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_event_bus::EventFilter;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn local_source_parses_appended_lines() {
        let mut file = NamedTempFile::new().unwrap();
        let server_id = ServerId::new();
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::for_server(server_id));
        let cursor_store = Arc::new(CursorStore::new());

        let config = LogSourceConfig {
            read_from_start: true,
            ..LogSourceConfig::local(file.path().to_str().unwrap().to_string())
        };

        writeln!(
            file,
            "[2026.07.26-12.00.00:000][ 1]LogSquad: Client connected: ID: 76561198000000001"
        )
        .unwrap();
        file.flush().unwrap();

        let mut identity = FileIdentity::default();
        let mut initialized = false;
        let correlator = ChainCorrelator::new();
        poll_local(
            &server_id,
            &config,
            &bus,
            &cursor_store,
            &correlator,
            &mut identity,
            &mut initialized,
        )
        .await
        .unwrap();

        let event = sub.recv().await.expect("event should be delivered");
        assert_eq!(event.type_tag, crate::events::TYPE_PLAYER_CONNECTED);
        assert!(cursor_store.get(server_id) > 0);
    }
}
