use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use parley_types::events::ClientCommand;
use parley_types::models::Identity;

use crate::engine::{Engine, EngineError};

/// Pings a client may leave unanswered before the session is dropped.
const MAX_MISSED_PONGS: u8 = 2;

/// Pong bookkeeping shared by the writer (which pings) and the reader (which
/// sees the pongs).
#[derive(Debug)]
struct Liveness {
    answered: AtomicBool,
    missed: AtomicU8,
}

impl Liveness {
    fn new() -> Self {
        Self {
            answered: AtomicBool::new(true),
            missed: AtomicU8::new(0),
        }
    }

    fn pong(&self) {
        self.answered.store(true, Ordering::Release);
    }

    /// Called on every heartbeat tick. Returns false once the peer has missed
    /// too many pings in a row.
    fn tick(&self) -> bool {
        if self.answered.swap(false, Ordering::Acquire) {
            self.missed.store(0, Ordering::Relaxed);
            return true;
        }
        self.missed.fetch_add(1, Ordering::Relaxed) + 1 < MAX_MISSED_PONGS
    }
}

/// Handle one room connection that already passed the authorization gate.
///
/// Joins the room, pumps room events to the client and client frames into the
/// engine until either side goes away, then leaves the room.
pub async fn handle_session(
    socket: WebSocket,
    engine: Engine,
    room: String,
    identity: Identity,
    heartbeat_interval: Duration,
) {
    let (mut sender, receiver) = socket.split();
    let name = identity.display_name().to_string();

    let membership = engine.join(&room, &identity).await;
    let conn_id = membership.conn_id;
    let mut events = membership.events;
    info!("{} connected to room {} ({})", name, room, conn_id);

    let liveness = Arc::new(Liveness::new());

    // Writer: room events and pings. Ends when the registry drops our queue,
    // the socket write fails or the peer stops answering pings.
    let writer_liveness = liveness.clone();
    let writer_room = room.clone();
    let mut writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("{} queue closed in {}", conn_id, writer_room);
                        break;
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize {:?}: {}", event, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if !writer_liveness.tick() {
                        warn!("{} missed {} pongs, dropping", conn_id, MAX_MISSED_PONGS);
                        break;
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut reader = tokio::spawn(read_frames(
        receiver,
        stop_rx,
        engine.clone(),
        room.clone(),
        identity.clone(),
        liveness,
    ));

    tokio::select! {
        _ = &mut writer => {
            let _ = stop_tx.send(());
            let _ = reader.await;
        }
        _ = &mut reader => writer.abort(),
    }

    engine.leave(&room, conn_id, &identity).await;
    info!("{} disconnected from room {} ({})", name, room, conn_id);
}

/// Feed client frames into the engine until the client goes away or `stop`
/// fires. Frames are handled one at a time so a client's actions reach the
/// room in the order it sent them. `stop` is only observed between frames; a
/// frame already in the engine always runs to completion.
async fn read_frames<S>(
    mut frames: S,
    mut stop: oneshot::Receiver<()>,
    engine: Engine,
    room: String,
    identity: Identity,
    liveness: Arc<Liveness>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            frame = frames.next() => frame,
        };
        let Some(Ok(msg)) = frame else { break };

        match msg {
            Message::Text(text) => {
                let Some(cmd) = ClientCommand::decode(text.as_str()) else {
                    warn!(
                        "{} bad frame in {} -- raw: {}",
                        identity.display_name(),
                        room,
                        truncate(text.as_str(), 200)
                    );
                    continue;
                };
                trace!("{} -> {:?}", identity.display_name(), cmd);
                if let Err(e) = engine.handle(&room, &identity, cmd).await {
                    log_rejection(&identity, &room, &e);
                }
            }
            Message::Pong(_) => liveness.pong(),
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn log_rejection(identity: &Identity, room: &str, err: &EngineError) {
    match err {
        EngineError::Persistence(_) | EngineError::StoreTask(_) => {
            error!("{} in {}: {}", identity.display_name(), room, err);
        }
        EngineError::EmptyMessage | EngineError::Anonymous(_) => {
            debug!("{} in {}: {}", identity.display_name(), room, err);
        }
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::stream;
    use parley_db::Database;
    use parley_types::events::RoomEvent;
    use uuid::Uuid;

    use crate::engine::EngineConfig;
    use crate::registry::RoomRegistry;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 200), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // 'é' is two bytes; never cut inside it
        assert_eq!(truncate("aé", 2), "a");
    }

    #[test]
    fn test_liveness_drops_after_missed_pongs() {
        let live = Liveness::new();
        // first tick consumes the initial credit
        assert!(live.tick());
        assert!(live.tick());
        assert!(!live.tick());
    }

    #[test]
    fn test_liveness_pong_resets() {
        let live = Liveness::new();
        assert!(live.tick());
        assert!(live.tick());
        live.pong();
        assert!(live.tick());
        assert!(live.tick());
        assert!(!live.tick());
    }

    #[tokio::test]
    async fn test_stop_lets_inflight_frame_finish() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "alice", "hash").unwrap();
        let alice = Identity::user(id, "alice");
        let engine = Engine::new(db.clone(), RoomRegistry::new(), EngineConfig::default());
        let mut watcher = engine.join("lobby", &Identity::Anonymous).await;
        while watcher.events.try_recv().is_ok() {}

        // stop fires the moment the frame is read, before the engine sees it
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut stop_tx = Some(stop_tx);
        let frames = stream::iter(vec![Ok::<_, axum::Error>(Message::Text(
            r#"{"type":"message","message":"last words"}"#.into(),
        ))])
        .chain(stream::pending())
        .inspect(move |_| {
            if let Some(tx) = stop_tx.take() {
                let _ = tx.send(());
            }
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            read_frames(
                frames,
                stop_rx,
                engine.clone(),
                "lobby".to_string(),
                alice,
                Arc::new(Liveness::new()),
            ),
        )
        .await
        .expect("reader did not stop");

        match watcher.events.try_recv() {
            Ok(RoomEvent::Message { content, .. }) => assert_eq!(content, "last words"),
            other => panic!("expected broadcast message, got {:?}", other),
        }
        let room = db.get_room("lobby").unwrap().unwrap();
        assert_eq!(db.list_messages(room.id, 1, 50).unwrap().messages.len(), 1);
    }
}
