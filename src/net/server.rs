use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::net::frame::{
    FrameTransport, ReadFrameOutcome, TcpFrameTransport, MAX_FRAME_LEN, TAG_AUTHENTICATE,
    TAG_CHARACTER_STATE_DELTA, TAG_EXPERIENCE_DELTA, TAG_WORLD_STATE_REPORT,
};
use crate::net::messages::{
    decode_experience_batch, decode_state_batch, decode_world_batch, encode_experience_batch,
    encode_state_batch, encode_world_batch, CharacterStateUpdate, ExperienceUpdate,
    WorldStateSnapshot,
};
use crate::net::session::{ConnectionId, ConnectionRegistry, SessionHandle, TokenValidator};
use crate::sim::events::{EventCursor, EventQueue, PushEvent};
use crate::telemetry::logging;

/// Shared run/stop flag. Shutdown is cooperative: the accept loop, the
/// tick loop and every connection loop poll it between iterations.
#[derive(Debug, Default)]
pub struct ServerControl {
    stopped: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

/// Receives decoded, session-attributed deltas. The production handler
/// applies them to the authoritative store; tests record the calls.
pub trait DeltaHandler: Send + Sync {
    fn on_session_bound(&self, session: &SessionHandle) -> Result<(), String>;
    fn on_experience_update(
        &self,
        session: &SessionHandle,
        updates: Vec<ExperienceUpdate>,
    ) -> Result<(), String>;
    fn on_character_state(
        &self,
        session: &SessionHandle,
        updates: Vec<CharacterStateUpdate>,
    ) -> Result<(), String>;
    fn on_world_state(
        &self,
        session: &SessionHandle,
        snapshots: Vec<WorldStateSnapshot>,
    ) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct DeltaServerConfig {
    pub bind_addr: String,
    /// Socket read timeout; the gap doubles as the push cadence.
    pub read_timeout: Duration,
    /// A connection with no inbound frame for this long is closed.
    pub max_idle: Duration,
    pub max_frame_len: usize,
}

impl Default for DeltaServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7172".to_string(),
            read_timeout: Duration::from_millis(200),
            max_idle: Duration::from_secs(300),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

pub fn run_delta_server(
    config: DeltaServerConfig,
    validator: Arc<dyn TokenValidator>,
    handler: Arc<dyn DeltaHandler>,
    events: Arc<EventQueue>,
    registry: Arc<ConnectionRegistry>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {err}", config.bind_addr))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("delta listener nonblocking failed: {err}"))?;

    logging::game(&format!("delta server listening on {}", config.bind_addr));
    println!("idleforge: delta server listening on {}", config.bind_addr);

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                logging::net(&format!("delta connection from {addr}"));
                if let Err(err) = stream.set_nonblocking(false) {
                    logging::error(&format!("delta stream blocking failed: {err}"));
                    continue;
                }
                let config = config.clone();
                let validator = Arc::clone(&validator);
                let handler = Arc::clone(&handler);
                let events = Arc::clone(&events);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut transport = TcpFrameTransport::new(stream);
                    if let Err(err) = handle_delta_session(
                        &mut transport,
                        &config,
                        validator.as_ref(),
                        handler.as_ref(),
                        &events,
                        &registry,
                    ) {
                        logging::error(&format!("delta connection {addr}: {err}"));
                    }
                    logging::net(&format!("delta connection {addr} closed"));
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                logging::error(&format!("delta accept error: {err}"));
            }
        }
    }
    logging::game("delta server stopped");
    Ok(())
}

/// Removes the registry binding when the connection loop exits, however
/// it exits.
struct RegistryGuard<'a> {
    registry: &'a ConnectionRegistry,
    connection: ConnectionId,
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.connection);
    }
}

pub fn handle_delta_session<T: FrameTransport>(
    transport: &mut T,
    config: &DeltaServerConfig,
    validator: &dyn TokenValidator,
    handler: &dyn DeltaHandler,
    events: &EventQueue,
    registry: &ConnectionRegistry,
) -> Result<(), String> {
    let connection = registry.allocate();
    let _guard = RegistryGuard {
        registry,
        connection,
    };
    transport.set_read_timeout(Some(config.read_timeout))?;

    let mut bound: Option<SessionHandle> = None;
    // Each connection reads the event queue through its own cursor, so
    // several connections bound to one session all receive its events.
    let mut cursor = EventCursor::default();
    let mut last_frame_at = Instant::now();

    loop {
        match transport.read_frame(config.max_frame_len)? {
            ReadFrameOutcome::Closed => return Ok(()),
            ReadFrameOutcome::Timeout => {
                if let Some(handle) = &bound {
                    push_pending(transport, events, handle, &mut cursor)?;
                }
                if last_frame_at.elapsed() >= config.max_idle {
                    return Err("connection idle limit reached".to_string());
                }
            }
            ReadFrameOutcome::Frame(frame) => {
                last_frame_at = Instant::now();
                match &bound {
                    None => {
                        // The handshake invariant: nothing but an
                        // authenticate frame is legal before binding.
                        if frame.tag != TAG_AUTHENTICATE {
                            return Err(format!(
                                "tag {} received before authenticate",
                                frame.tag
                            ));
                        }
                        let token = String::from_utf8(frame.payload)
                            .map_err(|_| "token is not utf-8".to_string())?;
                        let handle = validator.resolve(&token)?;
                        registry.bind(connection, handle.clone());
                        handler.on_session_bound(&handle)?;
                        logging::net(&format!(
                            "connection bound to session {} user {}",
                            handle.session_id.0, handle.user
                        ));
                        bound = Some(handle);
                    }
                    Some(handle) => match frame.tag {
                        // A second authenticate on a bound connection is
                        // ignored; the binding is immutable.
                        TAG_AUTHENTICATE => {}
                        TAG_EXPERIENCE_DELTA => {
                            let updates = decode_experience_batch(&frame.payload)
                                .ok_or_else(|| "malformed experience batch".to_string())?;
                            handler.on_experience_update(handle, updates)?;
                        }
                        TAG_CHARACTER_STATE_DELTA => {
                            let updates = decode_state_batch(&frame.payload)
                                .ok_or_else(|| "malformed character state batch".to_string())?;
                            handler.on_character_state(handle, updates)?;
                        }
                        TAG_WORLD_STATE_REPORT => {
                            let snapshots = decode_world_batch(&frame.payload)
                                .ok_or_else(|| "malformed world state batch".to_string())?;
                            handler.on_world_state(handle, snapshots)?;
                        }
                        // Unknown tags after binding are tolerated for
                        // forward compatibility.
                        tag => {
                            logging::net(&format!("ignoring unknown tag {tag}"));
                        }
                    },
                }
            }
        }
    }
}

fn push_pending<T: FrameTransport>(
    transport: &mut T,
    events: &EventQueue,
    handle: &SessionHandle,
    cursor: &mut EventCursor,
) -> Result<(), String> {
    for event in events.poll_session(handle.session_id, cursor) {
        match event {
            PushEvent::Experience { update, .. } => {
                transport.write_frame(TAG_EXPERIENCE_DELTA, &encode_experience_batch(&[update]))?;
            }
            PushEvent::CharacterState { update, .. } => {
                transport.write_frame(TAG_CHARACTER_STATE_DELTA, &encode_state_batch(&[update]))?;
            }
            PushEvent::World { snapshot, .. } => {
                transport.write_frame(TAG_WORLD_STATE_REPORT, &encode_world_batch(&[snapshot]))?;
            }
        }
    }
    Ok(())
}
