use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::RoomError;
use crate::registry::RoomTable;
use crate::types::{ConnId, CursorServerMsg, CursorView, MoveInput, RoomEvent};

pub type CursorEvent = RoomEvent<CursorServerMsg>;

/// Canvas coordinates are percentages of the viewport.
const COORD_MAX: f32 = 100.0;

/// Colors dealt to joiners in turn.
const PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

/// Commands a socket task sends into a cursor room task.
#[derive(Debug)]
pub enum CursorCommand {
    Join {
        conn_id: ConnId,
        username: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    SetName {
        conn_id: ConnId,
        name: String,
    },
    SetColor {
        conn_id: ConnId,
        color: String,
    },
    Move {
        conn_id: ConnId,
        input: MoveInput,
    },
    Leave {
        conn_id: ConnId,
    },
}

/// Cheap handle to a live cursor room, stored in the mode's room table.
#[derive(Clone)]
pub struct CursorHandle {
    pub room_id: String,
    pub cmd_tx: mpsc::Sender<CursorCommand>,
    pub event_tx: broadcast::Sender<CursorEvent>,
}

#[derive(Debug, Clone)]
struct CursorMember {
    conn_id: ConnId,
    username: String,
    color: String,
    x: f32,
    y: f32,
}

impl CursorMember {
    fn view(&self) -> CursorView {
        CursorView {
            id: self.conn_id.clone(),
            username: self.username.clone(),
            color: self.color.clone(),
            x: self.x,
            y: self.y,
        }
    }
}

/// State owned by one cursor room task.
struct CursorRoom {
    room_id: String,
    created_at: Instant,
    members: Vec<CursorMember>,
}

impl CursorRoom {
    fn broadcast(&self, tx: &broadcast::Sender<CursorEvent>, msg: CursorServerMsg) {
        let _ = tx.send(RoomEvent::Broadcast { msg });
    }

    fn snapshot(&self) -> CursorServerMsg {
        CursorServerMsg::Cursors {
            cursors: self.members.iter().map(CursorMember::view).collect(),
        }
    }

    fn broadcast_state(&self, tx: &broadcast::Sender<CursorEvent>) {
        self.broadcast(tx, self.snapshot());
    }

    fn next_color(&self) -> String {
        PALETTE[self.members.len() % PALETTE.len()].to_string()
    }
}

/// Create a cursor room with `conn_id` as its first member and spawn its
/// task. The returned receiver was subscribed before the task started, so
/// the creator sees the room's first snapshot.
pub fn create_room(
    table: Arc<RoomTable<CursorHandle>>,
    conn_id: ConnId,
    username: String,
) -> (CursorHandle, broadcast::Receiver<CursorEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, _) = broadcast::channel(64);
    let event_rx = event_tx.subscribe();

    let (room_id, handle) = table.create(|code| CursorHandle {
        room_id: code.to_string(),
        cmd_tx: cmd_tx.clone(),
        event_tx: event_tx.clone(),
    });

    tracing::info!("Cursor room {} created by {}", room_id, username);

    let mut room = CursorRoom {
        room_id,
        created_at: Instant::now(),
        members: Vec::new(),
    };
    let color = room.next_color();
    room.members.push(CursorMember {
        conn_id,
        username,
        color,
        x: COORD_MAX / 2.0,
        y: COORD_MAX / 2.0,
    });

    tokio::spawn(room_task(room, cmd_rx, event_tx, table));

    (handle, event_rx)
}

async fn room_task(
    mut room: CursorRoom,
    mut cmd_rx: mpsc::Receiver<CursorCommand>,
    event_tx: broadcast::Sender<CursorEvent>,
    table: Arc<RoomTable<CursorHandle>>,
) {
    room.broadcast_state(&event_tx);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            CursorCommand::Join {
                conn_id,
                username,
                reply,
            } => {
                let result = handle_join(&mut room, &event_tx, conn_id, username);
                let _ = reply.send(result);
            }
            CursorCommand::SetName { conn_id, name } => {
                handle_set_name(&mut room, &event_tx, &conn_id, name);
            }
            CursorCommand::SetColor { conn_id, color } => {
                handle_set_color(&mut room, &event_tx, &conn_id, color);
            }
            CursorCommand::Move { conn_id, input } => {
                handle_move(&mut room, &event_tx, &conn_id, input);
            }
            CursorCommand::Leave { conn_id } => {
                handle_leave(&mut room, &event_tx, &conn_id);
                if room.members.is_empty() {
                    break;
                }
            }
        }
    }

    table.remove(&room.room_id);
    tracing::info!(
        "Cursor room {} closed after {:?}",
        room.room_id,
        room.created_at.elapsed()
    );
}

fn handle_join(
    room: &mut CursorRoom,
    tx: &broadcast::Sender<CursorEvent>,
    conn_id: ConnId,
    username: String,
) -> Result<(), RoomError> {
    if room.members.iter().any(|m| m.conn_id == conn_id) {
        return Err(RoomError::InvalidInput);
    }
    let member = CursorMember {
        conn_id: conn_id.clone(),
        username: username.clone(),
        color: room.next_color(),
        x: COORD_MAX / 2.0,
        y: COORD_MAX / 2.0,
    };
    room.members.push(member);
    room.broadcast(tx, CursorServerMsg::PeerJoined { id: conn_id, username });
    room.broadcast_state(tx);
    Ok(())
}

fn handle_set_name(
    room: &mut CursorRoom,
    tx: &broadcast::Sender<CursorEvent>,
    conn_id: &str,
    name: String,
) {
    let Some(member) = room.members.iter_mut().find(|m| m.conn_id == conn_id) else {
        return;
    };
    member.username = name;
    room.broadcast_state(tx);
}

fn handle_set_color(
    room: &mut CursorRoom,
    tx: &broadcast::Sender<CursorEvent>,
    conn_id: &str,
    color: String,
) {
    if !valid_color(&color) {
        return;
    }
    let Some(member) = room.members.iter_mut().find(|m| m.conn_id == conn_id) else {
        return;
    };
    member.color = color;
    room.broadcast_state(tx);
}

fn handle_move(
    room: &mut CursorRoom,
    tx: &broadcast::Sender<CursorEvent>,
    conn_id: &str,
    input: MoveInput,
) {
    let Some(member) = room.members.iter_mut().find(|m| m.conn_id == conn_id) else {
        return;
    };
    let (nx, ny) = match input {
        MoveInput::By { dx, dy } => (member.x + dx, member.y + dy),
        MoveInput::To { x, y } => (x, y),
    };
    if !nx.is_finite() || !ny.is_finite() {
        return;
    }
    member.x = nx.clamp(0.0, COORD_MAX);
    member.y = ny.clamp(0.0, COORD_MAX);
    let moved = CursorServerMsg::CursorMoved {
        id: member.conn_id.clone(),
        x: member.x,
        y: member.y,
    };
    room.broadcast(tx, moved);
}

fn handle_leave(room: &mut CursorRoom, tx: &broadcast::Sender<CursorEvent>, conn_id: &str) {
    let Some(idx) = room.members.iter().position(|m| m.conn_id == conn_id) else {
        return;
    };
    let member = room.members.remove(idx);
    if room.members.is_empty() {
        return;
    }
    room.broadcast(
        tx,
        CursorServerMsg::PeerLeft {
            id: member.conn_id,
            username: member.username,
        },
    );
    room.broadcast_state(tx);
}

/// Accepts `#rrggbb` only.
fn valid_color(color: &str) -> bool {
    let bytes = color.as_bytes();
    bytes.len() == 7 && bytes[0] == b'#' && bytes[1..].iter().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestRoom = (
        CursorRoom,
        broadcast::Sender<CursorEvent>,
        broadcast::Receiver<CursorEvent>,
    );

    fn make_room(n: usize) -> TestRoom {
        let (event_tx, event_rx) = broadcast::channel(64);
        let mut room = CursorRoom {
            room_id: "TEST1".into(),
            created_at: Instant::now(),
            members: Vec::new(),
        };
        for i in 0..n {
            let color = room.next_color();
            room.members.push(CursorMember {
                conn_id: format!("c{i}"),
                username: format!("p{i}"),
                color,
                x: 50.0,
                y: 50.0,
            });
        }
        (room, event_tx, event_rx)
    }

    fn drain(rx: &mut broadcast::Receiver<CursorEvent>) -> Vec<CursorEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn joiners_get_distinct_palette_colors() {
        let (mut room, event_tx, _rx) = make_room(1);
        handle_join(&mut room, &event_tx, "c1".into(), "p1".into()).unwrap();
        handle_join(&mut room, &event_tx, "c2".into(), "p2".into()).unwrap();
        assert_eq!(room.members[0].color, PALETTE[0]);
        assert_eq!(room.members[1].color, PALETTE[1]);
        assert_eq!(room.members[2].color, PALETTE[2]);
    }

    #[test]
    fn joining_twice_with_one_connection_is_rejected() {
        let (mut room, event_tx, _rx) = make_room(1);
        let result = handle_join(&mut room, &event_tx, "c0".into(), "again".into());
        assert_eq!(result, Err(RoomError::InvalidInput));
        assert_eq!(room.members.len(), 1);
    }

    #[test]
    fn relative_moves_accumulate_and_clamp() {
        let (mut room, event_tx, mut rx) = make_room(1);
        handle_move(
            &mut room,
            &event_tx,
            "c0",
            MoveInput::By { dx: 30.0, dy: -10.0 },
        );
        assert_eq!(room.members[0].x, 80.0);
        assert_eq!(room.members[0].y, 40.0);

        handle_move(
            &mut room,
            &event_tx,
            "c0",
            MoveInput::By { dx: 500.0, dy: -500.0 },
        );
        assert_eq!(room.members[0].x, 100.0);
        assert_eq!(room.members[0].y, 0.0);

        let events = drain(&mut rx);
        assert!(events.iter().all(|ev| matches!(
            ev,
            RoomEvent::Broadcast {
                msg: CursorServerMsg::CursorMoved { .. }
            }
        )));
    }

    #[test]
    fn absolute_moves_jump_and_clamp() {
        let (mut room, event_tx, _rx) = make_room(1);
        handle_move(&mut room, &event_tx, "c0", MoveInput::To { x: 20.0, y: 90.0 });
        assert_eq!(room.members[0].x, 20.0);
        assert_eq!(room.members[0].y, 90.0);

        handle_move(
            &mut room,
            &event_tx,
            "c0",
            MoveInput::To { x: 250.0, y: -5.0 },
        );
        assert_eq!(room.members[0].x, 100.0);
        assert_eq!(room.members[0].y, 0.0);
    }

    #[test]
    fn non_finite_moves_are_dropped() {
        let (mut room, event_tx, mut rx) = make_room(1);
        handle_move(
            &mut room,
            &event_tx,
            "c0",
            MoveInput::To {
                x: f32::NAN,
                y: 10.0,
            },
        );
        handle_move(
            &mut room,
            &event_tx,
            "c0",
            MoveInput::By {
                dx: f32::INFINITY,
                dy: 0.0,
            },
        );
        assert_eq!(room.members[0].x, 50.0);
        assert_eq!(room.members[0].y, 50.0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn color_changes_are_validated() {
        let (mut room, event_tx, _rx) = make_room(1);
        handle_set_color(&mut room, &event_tx, "c0", "#a1b2c3".into());
        assert_eq!(room.members[0].color, "#a1b2c3");

        handle_set_color(&mut room, &event_tx, "c0", "red".into());
        assert_eq!(room.members[0].color, "#a1b2c3");
        handle_set_color(&mut room, &event_tx, "c0", "#12345".into());
        assert_eq!(room.members[0].color, "#a1b2c3");
        handle_set_color(&mut room, &event_tx, "c0", "#zzzzzz".into());
        assert_eq!(room.members[0].color, "#a1b2c3");
    }

    #[test]
    fn renames_reach_the_snapshot() {
        let (mut room, event_tx, mut rx) = make_room(2);
        handle_set_name(&mut room, &event_tx, "c1", "fresh".into());
        assert_eq!(room.members[1].username, "fresh");
        let events = drain(&mut rx);
        assert!(events.iter().any(|ev| matches!(
            ev,
            RoomEvent::Broadcast {
                msg: CursorServerMsg::Cursors { cursors }
            } if cursors.iter().any(|c| c.username == "fresh")
        )));
    }

    #[test]
    fn leaving_broadcasts_presence() {
        let (mut room, event_tx, mut rx) = make_room(2);
        handle_leave(&mut room, &event_tx, "c0");
        assert_eq!(room.members.len(), 1);
        let events = drain(&mut rx);
        assert!(events.iter().any(|ev| matches!(
            ev,
            RoomEvent::Broadcast {
                msg: CursorServerMsg::PeerLeft { id, .. }
            } if id == "c0"
        )));
    }

    #[tokio::test]
    async fn room_dies_when_the_last_member_leaves() {
        let table = RoomTable::new();
        let (handle, _rx) = create_room(Arc::clone(&table), "c0".into(), "alice".into());
        assert!(table.contains(&handle.room_id));

        handle
            .cmd_tx
            .send(CursorCommand::Leave {
                conn_id: "c0".into(),
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if !table.contains(&handle.room_id) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("room was not removed after the last leave");
    }
}
