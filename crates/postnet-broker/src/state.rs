use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use postnet_log::RoomLog;
use postnet_proto::{BrokerMessage, ClientMessage};
use tokio::sync::mpsc;

pub type Shared = Arc<Mutex<BrokerState>>;

/// Per-(connection, room) bookkeeping: where this connection's drain of a
/// room has gotten to, and whether it's a live watcher (spec §4.4).
#[derive(Default)]
pub struct RoomSub {
    pub next_to_send: u64,
    pub watching: bool,
    pub drain_active: bool,
}

/// A connected client's outbox and per-room subscriptions.
pub struct ConnHandle {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub rooms: HashMap<String, RoomSub>,
}

/// Shared broker state: the append-only room log plus every connection's
/// fan-out bookkeeping (spec §4.4). One `BrokerState` serves every room;
/// nothing here is room-specific beyond the `HashMap` keys.
pub struct BrokerState {
    pub log: RoomLog,
    pub next_conn_id: u64,
    pub conns: HashMap<u64, ConnHandle>,
    pub watchers: HashMap<String, HashSet<u64>>,
}

impl BrokerState {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            log: RoomLog::open(data_dir),
            next_conn_id: 0,
            conns: HashMap::new(),
            watchers: HashMap::new(),
        }
    }

    pub fn register(&mut self, tx: mpsc::Sender<Vec<u8>>) -> u64 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        self.conns.insert(id, ConnHandle { tx, rooms: HashMap::new() });
        id
    }

    /// Drops a connection's state and unsubscribes it from every room it
    /// was watching.
    pub fn remove(&mut self, conn_id: u64) {
        self.conns.remove(&conn_id);
        for watchers in self.watchers.values_mut() {
            watchers.remove(&conn_id);
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn send(state: &Shared, conn_id: u64, msg: &BrokerMessage) {
    let Ok(bytes) = msg.encode() else {
        log::error!("postnet-broker: failed to encode {msg:?}");
        return;
    };
    let tx = {
        let guard = state.lock().unwrap();
        let Some(conn) = guard.conns.get(&conn_id) else {
            return;
        };
        conn.tx.clone()
    };
    // The outbox is bounded; a slow/gone reader shouldn't stall the broker,
    // so a full or closed channel just drops the message.
    let _ = tx.try_send(bytes);
}

/// Re-entrant drain of one connection's view of one room, following the
/// spec §4.4 algorithm verbatim: walk forward from `next_to_send` sending
/// every post up to `limit`, guarded so overlapping triggers (post, load,
/// watch) never run the loop twice at once.
///
/// `cap` freezes the drain to the room's size *at the moment it was
/// requested* (used by a one-shot `load` from a non-watching connection);
/// `None` drains live, picking up whatever `post` appends next (used by
/// `watch` and by fan-out from `post` itself).
async fn drain(state: &Shared, conn_id: u64, room: &str, cap: Option<u64>) {
    {
        let mut guard = state.lock().unwrap();
        let Some(conn) = guard.conns.get_mut(&conn_id) else {
            return;
        };
        let sub = conn.rooms.entry(room.to_string()).or_default();
        if sub.drain_active {
            return;
        }
        sub.drain_active = true;
    }

    loop {
        let next_record = {
            let mut guard = state.lock().unwrap();
            let count = guard.log.count(room).unwrap_or(0);
            let limit = match cap {
                Some(c) => c.min(count),
                None => count,
            };
            let Some(conn) = guard.conns.get_mut(&conn_id) else {
                return;
            };
            let sub = conn.rooms.entry(room.to_string()).or_default();
            if sub.next_to_send >= limit {
                sub.drain_active = false;
                None
            } else {
                let next = sub.next_to_send;
                let record = guard.log.get(room, next).unwrap_or(None);
                record.map(|record| (next, record))
            }
        };

        let Some((index, record)) = next_record else {
            break;
        };

        let msg = BrokerMessage::InfoPost {
            room: room.to_string(),
            index,
            server_time: record.server_time,
            client_time: record.client_time,
            name: record.name,
            payload: record.payload,
        };
        let Ok(bytes) = msg.encode() else {
            log::error!("postnet-broker: failed to encode {msg:?}");
            continue;
        };
        let tx = {
            let guard = state.lock().unwrap();
            let Some(conn) = guard.conns.get(&conn_id) else {
                return;
            };
            conn.tx.clone()
        };

        // A bounded, awaited send: the cursor only advances past `index`
        // once the message is actually enqueued, so a momentarily full
        // outbox applies backpressure instead of silently skipping an
        // index in this connection's post stream (spec §8 gap-free
        // delivery). A closed receiver means the connection is gone;
        // stop draining it.
        if tx.send(bytes).await.is_err() {
            let mut guard = state.lock().unwrap();
            if let Some(conn) = guard.conns.get_mut(&conn_id) {
                if let Some(sub) = conn.rooms.get_mut(room) {
                    sub.drain_active = false;
                }
            }
            return;
        }

        let mut guard = state.lock().unwrap();
        let Some(conn) = guard.conns.get_mut(&conn_id) else {
            return;
        };
        let sub = conn.rooms.entry(room.to_string()).or_default();
        sub.next_to_send = sub.next_to_send.max(index + 1);
    }
}

/// Dispatches one decoded client message for `conn_id` (spec §4.4's
/// message-handling contract).
pub async fn handle_message(state: Shared, conn_id: u64, msg: ClientMessage) {
    match msg {
        ClientMessage::GetTime => {
            send(&state, conn_id, &BrokerMessage::InfoTime { time: now_millis() });
        }
        ClientMessage::Post { room, time, name, payload } => {
            let server_time = now_millis();
            let client_time = time;
            let record = postnet_log::Record { server_time, client_time, name, payload };
            let append_result = {
                let mut guard = state.lock().unwrap();
                guard.log.append(&room, &record)
            };
            if let Err(e) = append_result {
                log::error!("postnet-broker: failed to append to room {room}: {e}");
                return;
            }
            let watcher_ids: Vec<u64> = {
                let guard = state.lock().unwrap();
                guard
                    .watchers
                    .get(&room)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            };
            for watcher in watcher_ids {
                drain(&state, watcher, &room, None).await;
            }
        }
        ClientMessage::Load { room, from } => {
            let (watching, cap) = {
                let mut guard = state.lock().unwrap();
                let count = guard.log.count(&room).unwrap_or(0);
                let Some(conn) = guard.conns.get_mut(&conn_id) else {
                    return;
                };
                let sub = conn.rooms.entry(room.clone()).or_default();
                sub.next_to_send = sub.next_to_send.max(from);
                (sub.watching, count)
            };
            drain(&state, conn_id, &room, if watching { None } else { Some(cap) }).await;
        }
        ClientMessage::Watch { room } => {
            {
                let mut guard = state.lock().unwrap();
                if let Some(conn) = guard.conns.get_mut(&conn_id) {
                    conn.rooms.entry(room.clone()).or_default().watching = true;
                }
                guard.watchers.entry(room.clone()).or_default().insert(conn_id);
            }
            drain(&state, conn_id, &room, None).await;
        }
        ClientMessage::Unwatch { room } => {
            let mut guard = state.lock().unwrap();
            if let Some(conn) = guard.conns.get_mut(&conn_id) {
                if let Some(sub) = conn.rooms.get_mut(&room) {
                    sub.watching = false;
                }
            }
            if let Some(set) = guard.watchers.get_mut(&room) {
                set.remove(&conn_id);
            }
        }
        ClientMessage::GetLatestPostIndex { room } => {
            let count = {
                let mut guard = state.lock().unwrap();
                guard.log.count(&room).unwrap_or(0)
            };
            send(
                &state,
                conn_id,
                &BrokerMessage::InfoLatestPostIndex {
                    room,
                    latest_index: count as i64 - 1,
                    server_time: now_millis(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(room: &str, time: u64, name: &str, payload: Vec<u8>) -> ClientMessage {
        ClientMessage::Post {
            room: room.to_string(),
            time,
            name: name.to_string(),
            payload,
        }
    }

    async fn drain_channel(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<BrokerMessage> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(BrokerMessage::decode(&bytes).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn watching_connection_receives_posts_as_they_arrive() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));

        let (tx, mut rx) = mpsc::channel(32);
        let conn_id = state.lock().unwrap().register(tx);

        handle_message(state.clone(), conn_id, ClientMessage::Watch { room: "lobby".into() }).await;
        assert!(drain_channel(&mut rx).await.is_empty());

        handle_message(state.clone(), 999, post("lobby", 10, "n0", vec![1])).await;
        let received = drain_channel(&mut rx).await;
        assert_eq!(received.len(), 1);
        match &received[0] {
            BrokerMessage::InfoPost { index, name, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(name, "n0");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_without_watch_is_capped_to_the_count_at_call_time() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));

        // A separate poster connection, never read from.
        let (poster_tx, _poster_rx) = mpsc::channel(32);
        let poster = state.lock().unwrap().register(poster_tx);
        for i in 0..3 {
            handle_message(state.clone(), poster, post("lobby", i, &format!("n{i}"), vec![])).await;
        }

        let (tx, mut rx) = mpsc::channel(32);
        let conn_id = state.lock().unwrap().register(tx);
        handle_message(state.clone(), conn_id, ClientMessage::Load { room: "lobby".into(), from: 0 }).await;
        let received = drain_channel(&mut rx).await;
        assert_eq!(received.len(), 3);

        // A post that lands after the one-shot load must not be delivered:
        // this connection never called watch.
        handle_message(state.clone(), poster, post("lobby", 99, "n3", vec![])).await;
        assert!(drain_channel(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn load_never_rewinds_next_to_send() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));
        let (poster_tx, _poster_rx) = mpsc::channel(32);
        let poster = state.lock().unwrap().register(poster_tx);
        for i in 0..5 {
            handle_message(state.clone(), poster, post("lobby", i, &format!("n{i}"), vec![])).await;
        }

        let (tx, mut rx) = mpsc::channel(32);
        let conn_id = state.lock().unwrap().register(tx);
        handle_message(state.clone(), conn_id, ClientMessage::Load { room: "lobby".into(), from: 3 }).await;
        assert_eq!(drain_channel(&mut rx).await.len(), 2);

        // Asking to load from an earlier index than already delivered must
        // not re-deliver anything already sent.
        handle_message(state.clone(), conn_id, ClientMessage::Load { room: "lobby".into(), from: 0 }).await;
        assert!(drain_channel(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn get_latest_post_index_reports_minus_one_for_an_empty_room() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));
        let (tx, mut rx) = mpsc::channel(32);
        let conn_id = state.lock().unwrap().register(tx);

        handle_message(state.clone(), conn_id, ClientMessage::GetLatestPostIndex { room: "empty".into() }).await;
        let received = drain_channel(&mut rx).await;
        assert_eq!(received.len(), 1);
        match &received[0] {
            BrokerMessage::InfoLatestPostIndex { room, latest_index, .. } => {
                assert_eq!(room, "empty");
                assert_eq!(*latest_index, -1);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn unwatch_stops_further_live_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));
        let (tx, mut rx) = mpsc::channel(32);
        let conn_id = state.lock().unwrap().register(tx);

        handle_message(state.clone(), conn_id, ClientMessage::Watch { room: "lobby".into() }).await;
        handle_message(state.clone(), conn_id, ClientMessage::Unwatch { room: "lobby".into() }).await;
        handle_message(state.clone(), 999, post("lobby", 1, "n0", vec![])).await;
        assert!(drain_channel(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn multiple_watchers_all_receive_the_same_post() {
        let dir = tempfile::tempdir().unwrap();
        let state: Shared = Arc::new(Mutex::new(BrokerState::new(dir.path())));

        let (tx_a, mut rx_a) = mpsc::channel(32);
        let a = state.lock().unwrap().register(tx_a);
        let (tx_b, mut rx_b) = mpsc::channel(32);
        let b = state.lock().unwrap().register(tx_b);

        handle_message(state.clone(), a, ClientMessage::Watch { room: "lobby".into() }).await;
        handle_message(state.clone(), b, ClientMessage::Watch { room: "lobby".into() }).await;
        handle_message(state.clone(), 999, post("lobby", 1, "n0", vec![7])).await;

        assert_eq!(drain_channel(&mut rx_a).await.len(), 1);
        assert_eq!(drain_channel(&mut rx_b).await.len(), 1);
    }
}
