use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::RoomError;
use crate::registry::RoomTable;
use crate::types::{ChessServerMsg, Color, ConnId, MoveReq, Position, RoomEvent, SeatView};

pub type ChessEvent = RoomEvent<ChessServerMsg>;

/// Judges move requests. The room itself only enforces seating and turn
/// order; everything about piece movement lives behind this seam so a real
/// engine can be dropped in without touching the room.
pub trait Rules: Send + Sync {
    /// Judge `mv` against `position`. `Some` carries the resulting position,
    /// `None` rejects the move outright.
    fn try_move(&self, position: &Position, mv: &MoveReq) -> Option<Position>;
}

/// Shape-only rules: any move between two distinct well-formed squares is
/// accepted and piece legality is left to the clients, the way a bare relay
/// behaves.
pub struct RelayRules;

impl Rules for RelayRules {
    fn try_move(&self, position: &Position, mv: &MoveReq) -> Option<Position> {
        if !valid_square(&mv.from) || !valid_square(&mv.to) || mv.from == mv.to {
            return None;
        }
        if let Some(promotion) = &mv.promotion {
            if !matches!(promotion.as_str(), "q" | "r" | "b" | "n") {
                return None;
            }
        }
        let mut next = position.clone();
        next.moves.push(mv.clone());
        next.turn = position.turn.opposite();
        Some(next)
    }
}

fn valid_square(square: &str) -> bool {
    let bytes = square.as_bytes();
    bytes.len() == 2 && (b'a'..=b'h').contains(&bytes[0]) && (b'1'..=b'8').contains(&bytes[1])
}

/// Commands a socket task sends into a chess room task.
#[derive(Debug)]
pub enum ChessCommand {
    Join {
        conn_id: ConnId,
        username: String,
        reply: oneshot::Sender<Result<Color, RoomError>>,
    },
    Move {
        conn_id: ConnId,
        mv: MoveReq,
    },
    Leave {
        conn_id: ConnId,
    },
}

/// Cheap handle to a live chess room, stored in the mode's room table.
#[derive(Clone)]
pub struct ChessHandle {
    pub room_id: String,
    pub cmd_tx: mpsc::Sender<ChessCommand>,
    pub event_tx: broadcast::Sender<ChessEvent>,
}

#[derive(Debug, Clone)]
struct Seat {
    conn_id: ConnId,
    username: String,
    color: Color,
    connected: bool,
}

impl Seat {
    fn view(&self) -> SeatView {
        SeatView {
            id: self.conn_id.clone(),
            username: self.username.clone(),
            color: self.color,
            connected: self.connected,
        }
    }
}

/// State owned by one chess room task. A disconnect marks the seat vacant
/// instead of tearing it down, so the game survives for a rejoining
/// opponent; the room only dies once no seat is connected.
struct ChessRoom {
    room_id: String,
    created_at: Instant,
    seats: Vec<Seat>,
    position: Position,
    rules: Arc<dyn Rules>,
}

impl ChessRoom {
    fn broadcast(&self, tx: &broadcast::Sender<ChessEvent>, msg: ChessServerMsg) {
        let _ = tx.send(RoomEvent::Broadcast { msg });
    }

    fn send_to(&self, tx: &broadcast::Sender<ChessEvent>, conn_id: &str, msg: ChessServerMsg) {
        let _ = tx.send(RoomEvent::SendTo {
            conn_id: conn_id.to_string(),
            msg,
        });
    }

    fn snapshot(&self) -> ChessServerMsg {
        ChessServerMsg::RoomState {
            id: self.room_id.clone(),
            players: self.seats.iter().map(Seat::view).collect(),
            turn: self.position.turn,
        }
    }

    fn broadcast_state(&self, tx: &broadcast::Sender<ChessEvent>) {
        self.broadcast(tx, self.snapshot());
    }
}

/// Create a chess room with `conn_id` seated as white and spawn its task.
/// The returned receiver was subscribed before the task started, so the
/// creator sees the room's first snapshot.
pub fn create_room(
    table: Arc<RoomTable<ChessHandle>>,
    conn_id: ConnId,
    username: String,
    rules: Arc<dyn Rules>,
) -> (ChessHandle, broadcast::Receiver<ChessEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, _) = broadcast::channel(64);
    let event_rx = event_tx.subscribe();

    let (room_id, handle) = table.create(|code| ChessHandle {
        room_id: code.to_string(),
        cmd_tx: cmd_tx.clone(),
        event_tx: event_tx.clone(),
    });

    tracing::info!("Chess room {} created by {}", room_id, username);

    let room = ChessRoom {
        room_id,
        created_at: Instant::now(),
        seats: vec![Seat {
            conn_id,
            username,
            color: Color::White,
            connected: true,
        }],
        position: Position::initial(),
        rules,
    };

    tokio::spawn(room_task(room, cmd_rx, event_tx, table));

    (handle, event_rx)
}

async fn room_task(
    mut room: ChessRoom,
    mut cmd_rx: mpsc::Receiver<ChessCommand>,
    event_tx: broadcast::Sender<ChessEvent>,
    table: Arc<RoomTable<ChessHandle>>,
) {
    room.broadcast_state(&event_tx);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ChessCommand::Join {
                conn_id,
                username,
                reply,
            } => {
                let result = handle_join(&mut room, &event_tx, conn_id, username);
                let _ = reply.send(result);
            }
            ChessCommand::Move { conn_id, mv } => {
                handle_move(&mut room, &event_tx, &conn_id, mv);
            }
            ChessCommand::Leave { conn_id } => {
                handle_leave(&mut room, &event_tx, &conn_id);
                if room.seats.iter().all(|s| !s.connected) {
                    break;
                }
            }
        }
    }

    table.remove(&room.room_id);
    tracing::info!(
        "Chess room {} closed after {:?}",
        room.room_id,
        room.created_at.elapsed()
    );
}

fn handle_join(
    room: &mut ChessRoom,
    tx: &broadcast::Sender<ChessEvent>,
    conn_id: ConnId,
    username: String,
) -> Result<Color, RoomError> {
    if room.seats.iter().any(|s| s.conn_id == conn_id) {
        return Err(RoomError::InvalidInput);
    }

    // A vacated seat is reclaimed first, which is how a dropped player gets
    // back into a running game.
    let reclaimed = room
        .seats
        .iter_mut()
        .find(|s| !s.connected)
        .map(|seat| {
            seat.conn_id = conn_id.clone();
            seat.username = username.clone();
            seat.connected = true;
            seat.color
        });
    if let Some(color) = reclaimed {
        room.broadcast(tx, ChessServerMsg::OpponentJoined { username });
        room.broadcast_state(tx);
        // Only the rejoiner needs to be caught up with the game so far.
        room.send_to(
            tx,
            &conn_id,
            ChessServerMsg::Position {
                position: room.position.clone(),
            },
        );
        return Ok(color);
    }

    if room.seats.len() >= 2 {
        return Err(RoomError::RoomFull);
    }

    let color = room
        .seats
        .first()
        .map(|s| s.color.opposite())
        .unwrap_or(Color::White);
    room.seats.push(Seat {
        conn_id,
        username: username.clone(),
        color,
        connected: true,
    });
    room.broadcast(tx, ChessServerMsg::OpponentJoined { username });
    room.broadcast_state(tx);
    Ok(color)
}

fn handle_move(
    room: &mut ChessRoom,
    tx: &broadcast::Sender<ChessEvent>,
    conn_id: &str,
    mv: MoveReq,
) {
    let Some(color) = room
        .seats
        .iter()
        .find(|s| s.conn_id == conn_id && s.connected)
        .map(|s| s.color)
    else {
        return;
    };
    if room.seats.len() < 2 {
        // No opponent yet.
        return;
    }
    if color != room.position.turn {
        return;
    }
    let Some(next) = room.rules.try_move(&room.position, &mv) else {
        tracing::debug!(
            "Rejected move {} -> {} in chess room {}",
            mv.from,
            mv.to,
            room.room_id
        );
        return;
    };
    room.position = next;
    room.broadcast(
        tx,
        ChessServerMsg::Position {
            position: room.position.clone(),
        },
    );
}

fn handle_leave(room: &mut ChessRoom, tx: &broadcast::Sender<ChessEvent>, conn_id: &str) {
    let Some(seat) = room
        .seats
        .iter_mut()
        .find(|s| s.conn_id == conn_id && s.connected)
    else {
        return;
    };
    seat.connected = false;
    let username = seat.username.clone();
    room.broadcast(tx, ChessServerMsg::OpponentLeft { username });
    room.broadcast_state(tx);
}
