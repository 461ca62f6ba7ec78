use std::time::Duration;

use postnet_codec::{Schema, Value};
use postnet_transport::{PostRecord, Transport};
use tokio::sync::{mpsc, oneshot};

use crate::engine::{Diagnostics, ReplayEngine};
use crate::error::EngineError;
use crate::post::Post;

enum EngineEvent {
    Post(PostRecord),
    LatestIndex { latest: i64, server_time: u64 },
}

enum Command<S> {
    PredictLocal {
        name: String,
        client_time: u64,
        data: Value,
    },
    WithStateAt(u64, Box<dyn FnOnce(&S) + Send>),
    WithRenderState(u64, Option<f32>, Box<dyn FnOnce(&S) + Send>),
    PostCount(oneshot::Sender<u64>),
    InitialTime(oneshot::Sender<Option<u64>>),
    InitialTick(oneshot::Sender<Option<u64>>),
    Dump(oneshot::Sender<Diagnostics>),
    Close,
}

/// Wires a [`ReplayEngine`] to a [`Transport`]: drives the startup sequence
/// (sync, load, watch, then a 2s `get_latest_post_index` poll) and exposes
/// the client-facing operations built on top of it (spec §6).
///
/// The engine itself is confined to a dedicated worker thread running a
/// single-threaded runtime, since its state is held behind `Rc` rather than
/// `Arc` (spec §9: no locks are required when ticks and posts are processed
/// through one cooperative message loop). Every public method here talks to
/// that thread over channels instead of touching engine state directly.
pub struct LiveEngine<S: 'static> {
    cmd_tx: mpsc::UnboundedSender<Command<S>>,
    transport: Transport,
    room: String,
    schema: Schema,
    tick_rate: u32,
}

impl<S: 'static> LiveEngine<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<T, P>(
        transport: Transport,
        room: impl Into<String>,
        initial: S,
        on_tick: T,
        on_post: P,
        schema: Schema,
        tick_rate: u32,
        tolerance_ms: u64,
    ) -> Self
    where
        S: Send,
        T: Fn(&S) -> S + Send + 'static,
        P: Fn(&Value, &S) -> S + Send + 'static,
    {
        let room = room.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let worker_transport = transport.clone();
        let worker_room = room.clone();
        let worker_schema = schema.clone();
        std::thread::Builder::new()
            .name(format!("postnet-engine-{worker_room}"))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("postnet-engine: failed to start worker runtime: {e}");
                        return;
                    }
                };
                rt.block_on(run(
                    worker_transport,
                    worker_room,
                    initial,
                    on_tick,
                    on_post,
                    worker_schema,
                    tick_rate,
                    tolerance_ms,
                    cmd_rx,
                ));
            })
            .expect("failed to spawn postnet-engine worker thread");

        Self {
            cmd_tx,
            transport,
            room,
            schema,
            tick_rate,
        }
    }

    pub fn on_sync(&self, cb: impl FnOnce() + Send + 'static) {
        self.transport.on_sync(cb);
    }

    /// Encodes and posts `data`, predicting it locally before the broker's
    /// echo arrives (spec §4.6 local prediction).
    pub async fn post(&self, data: Value) -> Result<String, EngineError> {
        let bytes = postnet_codec::encode(&self.schema, &data).map_err(|_| EngineError::Closed)?;
        let name = self.transport.post(&self.room, bytes).await?;
        // Stamp the prediction with the same synced clock estimate the
        // transport uses for the wire message (spec §4.6: server_time =
        // client_time = server_time()), so the echoed post lands at the
        // tick the prediction already occupies instead of rolling back.
        let client_time = self.server_time().await?;
        let _ = self.cmd_tx.send(Command::PredictLocal {
            name: name.clone(),
            client_time,
            data,
        });
        Ok(name)
    }

    pub async fn server_time(&self) -> Result<u64, EngineError> {
        Ok(self.transport.server_time().await?)
    }

    pub async fn server_tick(&self) -> Result<u64, EngineError> {
        let time = self.server_time().await?;
        Ok(time * self.tick_rate as u64 / 1000)
    }

    pub async fn ping(&self) -> Result<f32, EngineError> {
        Ok(self.transport.ping().await?)
    }

    /// Invokes `cb` with the replayed state at `tick` on the engine's
    /// worker thread. Fire-and-forget: use [`LiveEngine::post_count`] or
    /// similar when you need a reply.
    pub fn with_state_at(&self, tick: u64, cb: impl FnOnce(&S) + Send + 'static) {
        let _ = self.cmd_tx.send(Command::WithStateAt(tick, Box::new(cb)));
    }

    /// Invokes `cb` with the current blended render state (spec §4.6
    /// `compute_render_state`), using the live server tick and ping.
    pub async fn with_render_state(&self, cb: impl FnOnce(&S) + Send + 'static) -> Result<(), EngineError> {
        let tick = self.server_tick().await?;
        let ping = self.transport.ping().await.ok();
        let _ = self.cmd_tx.send(Command::WithRenderState(tick, ping, Box::new(cb)));
        Ok(())
    }

    pub async fn post_count(&self) -> Result<u64, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::PostCount(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn initial_time(&self) -> Result<Option<u64>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::InitialTime(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn initial_tick(&self) -> Result<Option<u64>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::InitialTick(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn dump(&self) -> Result<Diagnostics, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Dump(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
        self.transport.close();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run<S, T, P>(
    transport: Transport,
    room: String,
    initial: S,
    on_tick: T,
    on_post: P,
    schema: Schema,
    tick_rate: u32,
    tolerance_ms: u64,
    mut cmd_rx: mpsc::UnboundedReceiver<Command<S>>,
) where
    T: Fn(&S) -> S + 'static,
    P: Fn(&Value, &S) -> S + 'static,
    S: 'static,
{
    let mut engine = ReplayEngine::new(room.clone(), initial, on_tick, on_post, schema.clone(), tick_rate, tolerance_ms);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EngineEvent>();

    let (sync_tx, sync_rx) = oneshot::channel::<()>();
    let mut sync_tx = Some(sync_tx);
    transport.on_sync(move || {
        if let Some(tx) = sync_tx.take() {
            let _ = tx.send(());
        }
    });
    if sync_rx.await.is_err() {
        log::warn!("postnet-engine: transport closed before room {room} ever synced");
        return;
    }

    let load_tx = event_tx.clone();
    let load_result = transport
        .load(room.clone(), 0, schema.clone(), move |post| {
            let _ = load_tx.send(EngineEvent::Post(post));
        })
        .await;
    if let Err(e) = load_result {
        log::warn!("postnet-engine: failed to load room {room}: {e}");
        return;
    }

    let watch_tx = event_tx.clone();
    let watch_result = transport
        .watch(room.clone(), schema.clone(), move |post| {
            let _ = watch_tx.send(EngineEvent::Post(post));
        })
        .await;
    if let Err(e) = watch_result {
        log::warn!("postnet-engine: failed to watch room {room}: {e}");
        return;
    }

    let latest_tx = event_tx.clone();
    transport.on_latest_post_index(move |_room, latest, server_time| {
        let _ = latest_tx.send(EngineEvent::LatestIndex { latest, server_time });
    });

    let mut poll_timer = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = poll_timer.tick() => {
                transport.get_latest_post_index(room.clone());
            }
            event = event_rx.recv() => {
                match event {
                    Some(EngineEvent::Post(record)) => {
                        if engine.is_locally_predicted(&record.name) {
                            let name = record.name.clone();
                            engine.receive_echo(&name, Post::from(record));
                        } else {
                            engine.admit_remote_post(Post::from(record));
                        }
                    }
                    Some(EngineEvent::LatestIndex { latest, server_time }) => {
                        engine.on_latest_post_index(latest, server_time);
                    }
                    None => break,
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::PredictLocal { name, client_time, data }) => {
                        engine.predict_local_post(Post::local(room.clone(), name, client_time, data));
                    }
                    Some(Command::WithStateAt(tick, cb)) => {
                        let state = engine.compute_state_at(tick);
                        cb(&state);
                    }
                    Some(Command::WithRenderState(tick, ping, cb)) => {
                        let state = engine.compute_render_state(tick, ping);
                        cb(&state);
                    }
                    Some(Command::PostCount(reply)) => {
                        let _ = reply.send(engine.post_count());
                    }
                    Some(Command::InitialTime(reply)) => {
                        let _ = reply.send(engine.initial_time());
                    }
                    Some(Command::InitialTick(reply)) => {
                        let _ = reply.send(engine.initial_tick());
                    }
                    Some(Command::Dump(reply)) => {
                        let _ = reply.send(engine.dump());
                    }
                    Some(Command::Close) | None => break,
                }
            }
        }
    }
}
