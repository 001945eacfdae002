/// WebSocket host for dice tables - one broadcast channel per room
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::core::protocol::{decode, encode, ClientAction, PlayerId, ServerEvent, TableStatus};
use crate::core::session::RoomCode;
use crate::host::table::{SeatOutcome, Table};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

struct RoomState {
    table: Table,
    rng: StdRng,
}

/// One table plus everyone listening to it
struct Room {
    code: RoomCode,
    state: Mutex<RoomState>,
    updates: broadcast::Sender<String>,
}

impl Room {
    fn new(code: RoomCode, config: &HostConfig) -> Self {
        let (updates, _) = broadcast::channel(100);
        Self {
            code,
            state: Mutex::new(RoomState {
                table: Table::new(config.stake, config.lives),
                rng: StdRng::from_os_rng(),
            }),
            updates,
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        match encode(event) {
            Ok(text) => {
                debug!(room = %self.code, kind = event.kind(), "broadcast");
                let _ = self.updates.send(text);
            }
            Err(e) => error!(error = %e, "failed to encode event"),
        }
    }
}

type Rooms = Arc<RwLock<HashMap<RoomCode, Arc<Room>>>>;

pub struct TableHost {
    listener: TcpListener,
    config: Arc<HostConfig>,
    rooms: Rooms,
}

impl TableHost {
    pub async fn bind(config: HostConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.addr).await?;
        let rooms = Arc::new(RwLock::new(HashMap::new()));
        Ok(Self { listener, config: Arc::new(config), rooms })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "dice host listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "new connection");
            let rooms = Arc::clone(&self.rooms);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, rooms, config).await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

/// Room code and identity from `/ws/dice/game/{ROOM}/?user_id=..&username=..`
pub fn parse_target(target: &str) -> Option<(RoomCode, PlayerId, String)> {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let code = path.strip_prefix("/ws/dice/game/")?.trim_end_matches('/');
    let room = RoomCode::parse(code).ok()?;

    let mut user_id = None;
    let mut username = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "user_id" => user_id = value.trim().parse::<PlayerId>().ok(),
            "username" => username = Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            _ => {}
        }
    }
    Some((room, user_id?, username?))
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    rooms: Rooms,
    config: Arc<HostConfig>,
) -> Result<()> {
    let mut target = String::new();
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        target = request.uri().to_string();
        Ok(response)
    };
    let ws = accept_hdr_async(stream, capture).await?;
    let (mut sink, mut source) = ws.split();

    let Some((code, user_id, username)) = parse_target(&target) else {
        info!(%peer, %target, "rejecting connection without identity");
        return reject(&mut sink, "You must be authenticated to play").await;
    };

    let room = {
        let mut rooms = rooms.write().await;
        Arc::clone(
            rooms
                .entry(code.clone())
                .or_insert_with(|| Arc::new(Room::new(code.clone(), &config))),
        )
    };

    let (snapshot, mut updates) = {
        let mut state = room.state.lock().await;
        let outcome = match state.table.seat(user_id, &username) {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(state);
                info!(room = %code, user_id, error = %e, "seat refused");
                return reject(&mut sink, &e.to_string()).await;
            }
        };
        let updates = room.updates.subscribe();

        if let SeatOutcome::Seated(seat) = outcome {
            info!(room = %code, user_id, %username, %seat, "player seated");
            if let Some(joined) = state.table.joined_event(user_id) {
                room.broadcast(&joined);
            }
            let RoomState { table, rng } = &mut *state;
            if let Some((multiplier, final_prize)) = table.begin_spin(rng, Utc::now()) {
                info!(room = %code, %multiplier, %final_prize, "table full, spinning");
                room.broadcast(&ServerEvent::GameStatusChanged {
                    status: TableStatus::Spinning,
                    multiplier: Some(multiplier.clone()),
                    final_prize: Some(final_prize),
                });
                room.broadcast(&ServerEvent::PrizeSpun {
                    multiplier,
                    final_prize,
                    started_at: table.started_at(),
                });
                schedule_play(Arc::clone(&room), config.spin_duration);
            }
        }
        (state.table.snapshot(), updates)
    };

    sink.send(Message::Text(encode(&ServerEvent::GameState(snapshot))?)).await?;

    let (direct, mut direct_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = direct_rx.recv() => text,
                update = updates.recv() => match update {
                    Ok(text) => text,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagging");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode::<ClientAction>(&text) {
                Ok(ClientAction::RollDice) => {
                    if let Err(message) = roll(&room, user_id).await {
                        let _ = direct.send(encode(&ServerEvent::Error { message })?);
                    }
                }
                Err(e) => {
                    debug!(user_id, error = %e, "unparseable frame");
                    let message = "Unrecognised message".to_string();
                    let _ = direct.send(encode(&ServerEvent::Error { message })?);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(user_id, error = %e, "socket error");
                break;
            }
        }
    }

    info!(room = %code, user_id, "player disconnected");
    writer.abort();
    // the subscriber goes away with the writer task
    let _ = writer.await;
    evict_if_done(&rooms, &room).await;
    Ok(())
}

/// Drops a finished room once nobody is listening to it. Returns whether it was removed.
async fn evict_if_done(rooms: &Rooms, room: &Room) -> bool {
    if room.state.lock().await.table.status() != TableStatus::Finished {
        return false;
    }
    let mut rooms = rooms.write().await;
    if room.updates.receiver_count() > 0 {
        return false;
    }
    let removed = rooms.remove(&room.code).is_some();
    if removed {
        info!(room = %room.code, open = rooms.len(), "finished room closed");
    }
    removed
}

async fn roll(room: &Room, user_id: PlayerId) -> Result<(), String> {
    let mut state = room.state.lock().await;
    let RoomState { table, rng } = &mut *state;
    let outcome = table.roll(user_id, rng).map_err(|e| e.to_string())?;

    room.broadcast(&ServerEvent::DiceRolled {
        user_id,
        username: outcome.name.clone(),
        die1: outcome.roll.die1,
        die2: outcome.roll.die2,
        total: outcome.roll.total(),
    });
    if let Some(summary) = &outcome.round {
        info!(
            room = %room.code,
            round = summary.number,
            tie = ?summary.tie,
            eliminated = ?summary.eliminated,
            "round complete"
        );
        room.broadcast(&table.round_event(summary));
        if let Some(finished) = table.finished_event() {
            info!(room = %room.code, winner = ?summary.winner, "game finished");
            room.broadcast(&finished);
        }
    }
    Ok(())
}

fn schedule_play(room: Arc<Room>, after: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let mut state = room.state.lock().await;
        if state.table.start_play() {
            info!(room = %room.code, "spin over, playing");
            room.broadcast(&ServerEvent::GameStatusChanged {
                status: TableStatus::Playing,
                multiplier: None,
                final_prize: None,
            });
        }
    });
}

async fn reject(sink: &mut WsSink, message: &str) -> Result<()> {
    let error = encode(&ServerEvent::Error { message: message.to_string() })?;
    sink.send(Message::Text(error)).await?;
    sink.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: message.to_string().into(),
    })))
    .await?;
    sink.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::Roll;

    async fn finished_room(rooms: &Rooms) -> Arc<Room> {
        let config = HostConfig { lives: 1, ..HostConfig::default() };
        let code = RoomCode::parse("DONE1").unwrap();
        let room = Arc::new(Room::new(code.clone(), &config));
        {
            let mut state = room.state.lock().await;
            let RoomState { table, rng } = &mut *state;
            for (id, name) in [(1, "ana"), (2, "bea"), (3, "cruz")] {
                table.seat(id, name).unwrap();
            }
            table.begin_spin(rng, Utc::now()).unwrap();
            assert!(table.start_play());
            let rolls = [(1, 6, 6), (2, 5, 5), (3, 1, 1), (1, 6, 6), (2, 1, 1)];
            for (id, die1, die2) in rolls {
                table.roll_with(id, Roll { die1, die2 }).unwrap();
            }
            assert_eq!(table.status(), TableStatus::Finished);
        }
        rooms.write().await.insert(code, Arc::clone(&room));
        room
    }

    #[tokio::test]
    async fn finished_rooms_close_after_the_last_listener_leaves() {
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let room = finished_room(&rooms).await;

        let listener = room.updates.subscribe();
        assert!(!evict_if_done(&rooms, &room).await);
        assert_eq!(rooms.read().await.len(), 1);

        drop(listener);
        assert!(evict_if_done(&rooms, &room).await);
        assert!(rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn rooms_in_play_are_kept_when_empty() {
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let code = RoomCode::parse("OPEN1").unwrap();
        let room = Arc::new(Room::new(code.clone(), &HostConfig::default()));
        rooms.write().await.insert(code, Arc::clone(&room));

        assert!(!evict_if_done(&rooms, &room).await);
        assert_eq!(rooms.read().await.len(), 1);
    }

    #[test]
    fn targets_carry_room_and_identity() {
        let (room, id, name) =
            parse_target("/ws/dice/game/abc12/?user_id=7&username=ana+maria").unwrap();
        assert_eq!(room.as_str(), "ABC12");
        assert_eq!(id, 7);
        assert_eq!(name, "ana maria");
    }

    #[test]
    fn missing_identity_or_bad_path_is_refused() {
        assert!(parse_target("/ws/dice/game/ABC/").is_none());
        assert!(parse_target("/ws/dice/game/ABC/?user_id=x&username=ana").is_none());
        assert!(parse_target("/ws/dice/game/ABC/?user_id=1&username=").is_none());
        assert!(parse_target("/ws/chat/ABC/?user_id=1&username=ana").is_none());
        assert!(parse_target("/ws/dice/game/A-B/?user_id=1&username=ana").is_none());
    }
}
