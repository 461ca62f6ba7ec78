use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use postnet_codec::{decode, Schema};
use postnet_proto::{read_frame, write_frame, BrokerMessage, ClientMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::error::TransportError;
use crate::name;
use crate::post::PostRecord;

const SYNC_INTERVAL: Duration = Duration::from_secs(2);

type PostCallback = Box<dyn FnMut(PostRecord) + Send>;
type SyncCallback = Box<dyn FnOnce() + Send>;
type LatestIndexCallback = Box<dyn FnMut(String, i64, u64) + Send>;

struct RoomWatch {
    schema: Schema,
    on_post: PostCallback,
}

enum Command {
    OnSync(SyncCallback),
    Watch {
        room: String,
        schema: Schema,
        on_post: PostCallback,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Load {
        room: String,
        from: u64,
        schema: Schema,
        on_post: PostCallback,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Unwatch {
        room: String,
    },
    Post {
        room: String,
        data: Vec<u8>,
        reply: oneshot::Sender<String>,
    },
    ServerTime(oneshot::Sender<Option<u64>>),
    Ping(oneshot::Sender<Option<f32>>),
    GetLatestPostIndex {
        room: String,
    },
    OnLatestPostIndex(LatestIndexCallback),
    Close,
}

/// One logical, reconnecting connection to the broker (spec §4.5). Cloning
/// is cheap; every handle shares the same background connection task.
#[derive(Clone)]
pub struct Transport {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Transport {
    /// Spawns the background connection task and returns a handle to it.
    pub fn spawn(addr: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let addr = addr.into();
        tokio::spawn(run(addr, cmd_rx));
        Self { cmd_tx }
    }

    /// Registers a one-shot callback fired the moment the clock first syncs.
    pub fn on_sync(&self, cb: impl FnOnce() + Send + 'static) {
        let _ = self.cmd_tx.send(Command::OnSync(Box::new(cb)));
    }

    pub async fn watch(
        &self,
        room: impl Into<String>,
        schema: Schema,
        on_post: impl FnMut(PostRecord) + Send + 'static,
    ) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Watch {
                room: room.into(),
                schema,
                on_post: Box::new(on_post),
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    pub async fn load(
        &self,
        room: impl Into<String>,
        from: u64,
        schema: Schema,
        on_post: impl FnMut(PostRecord) + Send + 'static,
    ) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Load {
                room: room.into(),
                from,
                schema,
                on_post: Box::new(on_post),
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    pub fn unwatch(&self, room: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Unwatch { room: room.into() });
    }

    /// Queues `data` for posting to `room` and returns the generated name
    /// immediately; the post itself may still be buffered if disconnected.
    pub async fn post(
        &self,
        room: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<String, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Post {
                room: room.into(),
                data,
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    pub async fn server_time(&self) -> Result<u64, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ServerTime(reply))
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?.ok_or(TransportError::NotSynced)
    }

    /// Last measured round-trip time in milliseconds, if synced.
    pub async fn ping(&self) -> Result<f32, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Ping(reply))
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?.ok_or(TransportError::NotSynced)
    }

    pub fn get_latest_post_index(&self, room: impl Into<String>) {
        let _ = self
            .cmd_tx
            .send(Command::GetLatestPostIndex { room: room.into() });
    }

    pub fn on_latest_post_index(
        &self,
        cb: impl FnMut(String, i64, u64) + Send + 'static,
    ) {
        let _ = self
            .cmd_tx
            .send(Command::OnLatestPostIndex(Box::new(cb)));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

struct SyncState {
    synced: bool,
    lowest_ping: Duration,
    last_ping: Duration,
    clock_offset: i64,
    pending_t0: Option<Instant>,
    on_sync: Vec<SyncCallback>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            synced: false,
            lowest_ping: Duration::MAX,
            last_ping: Duration::ZERO,
            clock_offset: 0,
            pending_t0: None,
            on_sync: Vec::new(),
        }
    }

    fn server_time(&self) -> Option<u64> {
        if !self.synced {
            return None;
        }
        let now_ms = now_millis();
        Some((now_ms as i64 + self.clock_offset).max(0) as u64)
    }

    fn on_info_time(&mut self, server_time: u64) {
        let Some(t0) = self.pending_t0.take() else {
            return;
        };
        let t1 = Instant::now();
        let rtt = t1.saturating_duration_since(t0);
        self.last_ping = rtt;
        if rtt < self.lowest_ping {
            let round_trip_ms = rtt.as_millis() as i64;
            let midpoint_ms = now_millis() as i64 - round_trip_ms / 2;
            self.clock_offset = server_time as i64 - midpoint_ms;
            self.lowest_ping = rtt;
        }
        if !self.synced {
            self.synced = true;
            for cb in self.on_sync.drain(..) {
                cb();
            }
        }
    }
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

async fn run(addr: String, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let mut rooms: HashMap<String, RoomWatch> = HashMap::new();
    let mut post_queue: VecDeque<(String, String, Vec<u8>)> = VecDeque::new();
    let mut latest_index_listeners: Vec<LatestIndexCallback> = Vec::new();
    let mut sync = SyncState::new();
    let mut backoff = Backoff::default();
    let mut closed = false;

    'reconnect: while !closed {
        let stream = loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    log::warn!("postnet-transport: connect to {addr} failed: {e}");
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(cmd) => {
                                    if handle_disconnected_command(
                                        cmd,
                                        &mut rooms,
                                        &mut post_queue,
                                        &mut sync,
                                        &mut latest_index_listeners,
                                        &mut closed,
                                    ) {
                                        continue 'reconnect;
                                    }
                                }
                                None => {
                                    closed = true;
                                }
                            }
                        }
                    }
                    if closed {
                        return;
                    }
                    continue;
                }
            }
        };
        backoff.reset();
        log::info!("postnet-transport: connected to {addr}");

        let (mut read_half, mut write_half) = stream.into_split();

        // Re-subscribe to every watched room on (re)connect.
        for room in rooms.keys() {
            let msg = ClientMessage::Watch { room: room.clone() };
            if let Ok(bytes) = msg.encode() {
                let _ = write_frame(&mut write_half, &bytes).await;
            }
        }
        // Flush anything queued while disconnected, in FIFO order.
        while let Some((room, name, data)) = post_queue.pop_front() {
            let server_time = sync.server_time().unwrap_or(0);
            let msg = ClientMessage::Post {
                room,
                time: server_time,
                name,
                payload: data,
            };
            if let Ok(bytes) = msg.encode() {
                let _ = write_frame(&mut write_half, &bytes).await;
            }
        }

        let mut sync_timer = interval(SYNC_INTERVAL);
        sync.pending_t0 = Some(Instant::now());
        if send_or_disconnect(&mut write_half, &ClientMessage::GetTime).await {
            continue 'reconnect;
        }

        loop {
            tokio::select! {
                _ = sync_timer.tick() => {
                    sync.pending_t0 = Some(Instant::now());
                    if send_or_disconnect(&mut write_half, &ClientMessage::GetTime).await {
                        log::warn!("postnet-transport: lost connection to {addr} while sending heartbeat");
                        continue 'reconnect;
                    }
                }
                frame = read_frame(&mut read_half) => {
                    match frame {
                        Ok(Some(bytes)) => {
                            match BrokerMessage::decode(&bytes) {
                                Ok(msg) => handle_broker_message(
                                    msg,
                                    &mut rooms,
                                    &mut sync,
                                    &mut latest_index_listeners,
                                ),
                                Err(e) => log::warn!("postnet-transport: malformed broker message: {e}"),
                            }
                        }
                        Ok(None) | Err(_) => {
                            log::warn!("postnet-transport: connection to {addr} closed");
                            continue 'reconnect;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if handle_connected_command(
                                cmd,
                                &mut rooms,
                                &mut post_queue,
                                &mut sync,
                                &mut latest_index_listeners,
                                &mut write_half,
                                &mut closed,
                            ).await {
                                continue 'reconnect;
                            }
                            if closed {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

/// Returns `true` if the caller should loop back and attempt a reconnect
/// (used only for the `Close` case while connected is handled via `closed`).
fn handle_disconnected_command(
    cmd: Command,
    rooms: &mut HashMap<String, RoomWatch>,
    post_queue: &mut VecDeque<(String, String, Vec<u8>)>,
    sync: &mut SyncState,
    latest_index_listeners: &mut Vec<LatestIndexCallback>,
    closed: &mut bool,
) -> bool {
    match cmd {
        Command::OnSync(cb) => {
            if sync.synced {
                cb();
            } else {
                sync.on_sync.push(cb);
            }
        }
        Command::Watch {
            room,
            schema,
            on_post,
            reply,
        } => {
            let result = register_room(rooms, room, schema, on_post);
            let _ = reply.send(result);
        }
        Command::Load {
            room,
            schema,
            on_post,
            reply,
            ..
        } => {
            let result = register_room(rooms, room, schema, on_post);
            let _ = reply.send(result);
        }
        Command::Unwatch { room } => {
            rooms.remove(&room);
        }
        Command::Post { room, data, reply } => {
            let name = name::generate();
            post_queue.push_back((room, name.clone(), data));
            let _ = reply.send(name);
        }
        Command::ServerTime(reply) => {
            let _ = reply.send(sync.server_time());
        }
        Command::Ping(reply) => {
            let _ = reply.send(if sync.synced {
                Some(sync.last_ping.as_secs_f32() * 1000.0)
            } else {
                None
            });
        }
        Command::GetLatestPostIndex { .. } => {}
        Command::OnLatestPostIndex(cb) => latest_index_listeners.push(cb),
        Command::Close => {
            *closed = true;
            return true;
        }
    }
    false
}

fn register_room(
    rooms: &mut HashMap<String, RoomWatch>,
    room: String,
    schema: Schema,
    on_post: PostCallback,
) -> Result<(), TransportError> {
    if let Some(existing) = rooms.get(&room) {
        if existing.schema != schema {
            return Err(TransportError::SchemaMismatch { room });
        }
    }
    rooms.insert(room, RoomWatch { schema, on_post });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_connected_command(
    cmd: Command,
    rooms: &mut HashMap<String, RoomWatch>,
    post_queue: &mut VecDeque<(String, String, Vec<u8>)>,
    sync: &mut SyncState,
    latest_index_listeners: &mut Vec<LatestIndexCallback>,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    closed: &mut bool,
) -> bool {
    match cmd {
        Command::OnSync(cb) => {
            if sync.synced {
                cb();
            } else {
                sync.on_sync.push(cb);
            }
            false
        }
        Command::Watch {
            room,
            schema,
            on_post,
            reply,
        } => {
            let result = register_room(rooms, room.clone(), schema, on_post);
            let ok = result.is_ok();
            let _ = reply.send(result);
            if ok {
                let msg = ClientMessage::Watch { room };
                return send_or_disconnect(write_half, &msg).await;
            }
            false
        }
        Command::Load {
            room,
            from,
            schema,
            on_post,
            reply,
        } => {
            let result = register_room(rooms, room.clone(), schema, on_post);
            let ok = result.is_ok();
            let _ = reply.send(result);
            if ok {
                let msg = ClientMessage::Load { room, from };
                return send_or_disconnect(write_half, &msg).await;
            }
            false
        }
        Command::Unwatch { room } => {
            rooms.remove(&room);
            send_or_disconnect(write_half, &ClientMessage::Unwatch { room }).await
        }
        Command::Post { room, data, reply } => {
            let name = name::generate();
            let _ = reply.send(name.clone());
            let server_time = sync.server_time().unwrap_or(0);
            let msg = ClientMessage::Post {
                room: room.clone(),
                time: server_time,
                name: name.clone(),
                payload: data.clone(),
            };
            let failed = send_or_disconnect(write_half, &msg).await;
            if failed {
                // The write failed because the connection just died; requeue
                // so it gets flushed once a new connection is established.
                post_queue.push_back((room, name, data));
            }
            failed
        }
        Command::ServerTime(reply) => {
            let _ = reply.send(sync.server_time());
            false
        }
        Command::Ping(reply) => {
            let _ = reply.send(if sync.synced {
                Some(sync.last_ping.as_secs_f32() * 1000.0)
            } else {
                None
            });
            false
        }
        Command::GetLatestPostIndex { room } => {
            send_or_disconnect(write_half, &ClientMessage::GetLatestPostIndex { room }).await
        }
        Command::OnLatestPostIndex(cb) => {
            latest_index_listeners.push(cb);
            false
        }
        Command::Close => {
            *closed = true;
            true
        }
    }
}

async fn send_or_disconnect(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    msg: &ClientMessage,
) -> bool {
    match msg.encode() {
        Ok(bytes) => write_frame(write_half, &bytes).await.is_err(),
        Err(e) => {
            log::warn!("postnet-transport: failed to encode {msg:?}: {e}");
            false
        }
    }
}

fn handle_broker_message(
    msg: BrokerMessage,
    rooms: &mut HashMap<String, RoomWatch>,
    sync: &mut SyncState,
    latest_index_listeners: &mut [LatestIndexCallback],
) {
    match msg {
        BrokerMessage::InfoTime { time } => sync.on_info_time(time),
        BrokerMessage::InfoPost {
            room,
            index,
            server_time,
            client_time,
            name,
            payload,
        } => {
            let Some(watch) = rooms.get_mut(&room) else {
                return;
            };
            let data = match decode(&watch.schema, &payload) {
                Ok(value) => value,
                Err(e) => {
                    log::warn!("postnet-transport: bad payload for room {room}: {e}");
                    return;
                }
            };
            (watch.on_post)(PostRecord {
                room,
                index,
                server_time,
                client_time,
                name,
                data,
            });
        }
        BrokerMessage::InfoLatestPostIndex {
            room,
            latest_index,
            server_time,
        } => {
            for cb in latest_index_listeners.iter_mut() {
                cb(room.clone(), latest_index, server_time);
            }
        }
    }
}
