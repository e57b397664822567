use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::AppState;
use crate::chess::{self, ChessCommand};
use crate::cursor::{self, CursorCommand};
use crate::error::RoomError;
use crate::spy::{self, SpyCommand};
use crate::types::{
    ChessClientMsg, ChessServerMsg, ConnId, CursorClientMsg, CursorServerMsg, MoveInput, MoveReq,
    RoomEvent, SpyClientMsg, SpyServerMsg, sanitize_name,
};

/// The write half of a socket, shared between the read loop's direct
/// replies and the attached room's event forwarder.
type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// One live connection and the single room it may be attached to. The
/// attachment is the only route by which this socket can reach a room, so
/// dropping the session on disconnect severs everything at once.
struct Session<C> {
    conn_id: ConnId,
    room: Option<Attachment<C>>,
}

/// Holds the command lane into the room and the forwarder task carrying
/// events back out. The forwarder lives exactly as long as the attachment.
struct Attachment<C> {
    room_id: String,
    cmd_tx: mpsc::Sender<C>,
    forwarder: JoinHandle<()>,
}

impl<C> Drop for Attachment<C> {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl<C> Session<C> {
    fn new() -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            room: None,
        }
    }
}

async fn send_json<S, M>(sender: &Mutex<S>, msg: &M) -> bool
where
    S: Sink<Message> + Unpin,
    M: Serialize,
{
    match serde_json::to_string(msg) {
        Ok(json) => {
            let mut sink = sender.lock().await;
            sink.send(Message::Text(json.into())).await.is_ok()
        }
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            true
        }
    }
}

/// Forward events from an attached room to the socket. This runs as its
/// own task so that an event, once received, is always written out even
/// while the read loop is busy with inbound frames. Events addressed to
/// another connection are dropped here, which is what keeps private
/// payloads private.
fn spawn_forwarder<S, M>(
    conn_id: ConnId,
    mut event_rx: broadcast::Receiver<RoomEvent<M>>,
    sender: Arc<Mutex<S>>,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    M: Serialize + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(RoomEvent::Broadcast { msg }) => {
                    if !send_json(&sender, &msg).await {
                        return;
                    }
                }
                Ok(RoomEvent::SendTo {
                    conn_id: target,
                    msg,
                }) if target == conn_id => {
                    if !send_json(&sender, &msg).await {
                        return;
                    }
                }
                Ok(RoomEvent::SendTo { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Socket {} lagged {} room events", conn_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Spy mode
// ---------------------------------------------------------------------------

pub async fn spy_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| spy_socket(socket, state))
}

async fn spy_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));
    let mut session: Session<SpyCommand> = Session::new();
    tracing::info!("Spy socket connected: {}", session.conn_id);

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let parsed: SpyClientMsg = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Invalid spy message from {}: {}", session.conn_id, e);
                continue;
            }
        };
        if !handle_spy_msg(&state, &mut session, &sender, parsed).await {
            break;
        }
    }

    if let Some(attachment) = session.room.take() {
        let _ = attachment
            .cmd_tx
            .send(SpyCommand::Leave {
                conn_id: session.conn_id.clone(),
            })
            .await;
        tracing::info!(
            "Spy socket {} disconnected from room {}",
            session.conn_id,
            attachment.room_id
        );
    } else {
        tracing::info!("Spy socket disconnected: {}", session.conn_id);
    }
}

async fn handle_spy_msg(
    state: &AppState,
    session: &mut Session<SpyCommand>,
    sender: &SocketSink,
    msg: SpyClientMsg,
) -> bool {
    match msg {
        SpyClientMsg::CreateLobby { username } => {
            if session.room.is_some() {
                return send_json(sender, &SpyServerMsg::error(RoomError::InvalidInput)).await;
            }
            let username = sanitize_name(&username);
            let (handle, event_rx) = spy::create_room(
                Arc::clone(&state.spy_rooms),
                session.conn_id.clone(),
                username,
                state.config.spy,
                Arc::clone(&state.words),
            );
            // Confirm before the forwarder starts so the ack precedes the
            // room's first snapshot on the wire.
            let ok = send_json(
                sender,
                &SpyServerMsg::Created {
                    room_id: handle.room_id.clone(),
                },
            )
            .await;
            session.room = Some(Attachment {
                room_id: handle.room_id.clone(),
                cmd_tx: handle.cmd_tx.clone(),
                forwarder: spawn_forwarder(session.conn_id.clone(), event_rx, Arc::clone(sender)),
            });
            ok
        }
        SpyClientMsg::JoinLobby { room_id, username } => {
            if session.room.is_some() {
                return send_json(sender, &SpyServerMsg::error(RoomError::InvalidInput)).await;
            }
            let Some(handle) = state.spy_rooms.get(&room_id) else {
                return send_json(sender, &SpyServerMsg::error(RoomError::NotFound)).await;
            };
            let username = sanitize_name(&username);
            // Subscribe before joining so the join's own snapshot is seen.
            let event_rx = handle.event_tx.subscribe();
            let (reply_tx, reply_rx) = oneshot::channel();
            let sent = handle
                .cmd_tx
                .send(SpyCommand::Join {
                    conn_id: session.conn_id.clone(),
                    username,
                    reply: reply_tx,
                })
                .await;
            if sent.is_err() {
                return send_json(sender, &SpyServerMsg::error(RoomError::NotFound)).await;
            }
            match reply_rx.await {
                Ok(Ok(())) => {
                    tracing::info!("Socket {} joined spy room {}", session.conn_id, handle.room_id);
                    let ok = send_json(
                        sender,
                        &SpyServerMsg::Joined {
                            room_id: handle.room_id.clone(),
                        },
                    )
                    .await;
                    session.room = Some(Attachment {
                        room_id: handle.room_id.clone(),
                        cmd_tx: handle.cmd_tx.clone(),
                        forwarder: spawn_forwarder(
                            session.conn_id.clone(),
                            event_rx,
                            Arc::clone(sender),
                        ),
                    });
                    ok
                }
                Ok(Err(code)) => send_json(sender, &SpyServerMsg::error(code)).await,
                Err(_) => send_json(sender, &SpyServerMsg::error(RoomError::NotFound)).await,
            }
        }
        SpyClientMsg::StartGame => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(SpyCommand::Start {
                        conn_id: session.conn_id.clone(),
                    })
                    .await;
            }
            true
        }
        SpyClientMsg::CastVote { target_id } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(SpyCommand::CastVote {
                        conn_id: session.conn_id.clone(),
                        target_id,
                    })
                    .await;
            }
            true
        }
        SpyClientMsg::ResetGame => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(SpyCommand::Reset {
                        conn_id: session.conn_id.clone(),
                    })
                    .await;
            }
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Chess mode
// ---------------------------------------------------------------------------

pub async fn chess_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| chess_socket(socket, state))
}

async fn chess_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));
    let mut session: Session<ChessCommand> = Session::new();
    tracing::info!("Chess socket connected: {}", session.conn_id);

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let parsed: ChessClientMsg = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Invalid chess message from {}: {}", session.conn_id, e);
                continue;
            }
        };
        if !handle_chess_msg(&state, &mut session, &sender, parsed).await {
            break;
        }
    }

    if let Some(attachment) = session.room.take() {
        let _ = attachment
            .cmd_tx
            .send(ChessCommand::Leave {
                conn_id: session.conn_id.clone(),
            })
            .await;
        tracing::info!(
            "Chess socket {} disconnected from room {}",
            session.conn_id,
            attachment.room_id
        );
    } else {
        tracing::info!("Chess socket disconnected: {}", session.conn_id);
    }
}

async fn handle_chess_msg(
    state: &AppState,
    session: &mut Session<ChessCommand>,
    sender: &SocketSink,
    msg: ChessClientMsg,
) -> bool {
    match msg {
        ChessClientMsg::CreateRoom { username } => {
            if session.room.is_some() {
                return send_json(sender, &ChessServerMsg::error(RoomError::InvalidInput)).await;
            }
            let username = sanitize_name(&username);
            let (handle, event_rx) = chess::create_room(
                Arc::clone(&state.chess_rooms),
                session.conn_id.clone(),
                username,
                Arc::clone(&state.chess_rules),
            );
            let ok = send_json(
                sender,
                &ChessServerMsg::Created {
                    room_id: handle.room_id.clone(),
                    color: crate::types::Color::White,
                },
            )
            .await;
            session.room = Some(Attachment {
                room_id: handle.room_id.clone(),
                cmd_tx: handle.cmd_tx.clone(),
                forwarder: spawn_forwarder(session.conn_id.clone(), event_rx, Arc::clone(sender)),
            });
            ok
        }
        ChessClientMsg::JoinRoom { room_id, username } => {
            if session.room.is_some() {
                return send_json(sender, &ChessServerMsg::error(RoomError::InvalidInput)).await;
            }
            let Some(handle) = state.chess_rooms.get(&room_id) else {
                return send_json(sender, &ChessServerMsg::error(RoomError::NotFound)).await;
            };
            let username = sanitize_name(&username);
            let event_rx = handle.event_tx.subscribe();
            let (reply_tx, reply_rx) = oneshot::channel();
            let sent = handle
                .cmd_tx
                .send(ChessCommand::Join {
                    conn_id: session.conn_id.clone(),
                    username,
                    reply: reply_tx,
                })
                .await;
            if sent.is_err() {
                return send_json(sender, &ChessServerMsg::error(RoomError::NotFound)).await;
            }
            match reply_rx.await {
                Ok(Ok(color)) => {
                    tracing::info!(
                        "Socket {} joined chess room {} as {:?}",
                        session.conn_id,
                        handle.room_id,
                        color
                    );
                    let ok = send_json(
                        sender,
                        &ChessServerMsg::Joined {
                            room_id: handle.room_id.clone(),
                            color,
                        },
                    )
                    .await;
                    session.room = Some(Attachment {
                        room_id: handle.room_id.clone(),
                        cmd_tx: handle.cmd_tx.clone(),
                        forwarder: spawn_forwarder(
                            session.conn_id.clone(),
                            event_rx,
                            Arc::clone(sender),
                        ),
                    });
                    ok
                }
                Ok(Err(code)) => send_json(sender, &ChessServerMsg::error(code)).await,
                Err(_) => send_json(sender, &ChessServerMsg::error(RoomError::NotFound)).await,
            }
        }
        ChessClientMsg::MakeMove {
            from,
            to,
            promotion,
        } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(ChessCommand::Move {
                        conn_id: session.conn_id.clone(),
                        mv: MoveReq {
                            from,
                            to,
                            promotion,
                        },
                    })
                    .await;
            }
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor mode
// ---------------------------------------------------------------------------

pub async fn cursor_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| cursor_socket(socket, state))
}

async fn cursor_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));
    let mut session: Session<CursorCommand> = Session::new();
    tracing::info!("Cursor socket connected: {}", session.conn_id);

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let parsed: CursorClientMsg = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Invalid cursor message from {}: {}", session.conn_id, e);
                continue;
            }
        };
        if !handle_cursor_msg(&state, &mut session, &sender, parsed).await {
            break;
        }
    }

    if let Some(attachment) = session.room.take() {
        let _ = attachment
            .cmd_tx
            .send(CursorCommand::Leave {
                conn_id: session.conn_id.clone(),
            })
            .await;
        tracing::info!(
            "Cursor socket {} disconnected from room {}",
            session.conn_id,
            attachment.room_id
        );
    } else {
        tracing::info!("Cursor socket disconnected: {}", session.conn_id);
    }
}

async fn handle_cursor_msg(
    state: &AppState,
    session: &mut Session<CursorCommand>,
    sender: &SocketSink,
    msg: CursorClientMsg,
) -> bool {
    match msg {
        CursorClientMsg::CreateRoom { username } => {
            if session.room.is_some() {
                return send_json(sender, &CursorServerMsg::error(RoomError::InvalidInput)).await;
            }
            let username = sanitize_name(&username);
            let (handle, event_rx) = cursor::create_room(
                Arc::clone(&state.cursor_rooms),
                session.conn_id.clone(),
                username,
            );
            let ok = send_json(
                sender,
                &CursorServerMsg::Created {
                    room_id: handle.room_id.clone(),
                },
            )
            .await;
            session.room = Some(Attachment {
                room_id: handle.room_id.clone(),
                cmd_tx: handle.cmd_tx.clone(),
                forwarder: spawn_forwarder(session.conn_id.clone(), event_rx, Arc::clone(sender)),
            });
            ok
        }
        CursorClientMsg::JoinRoom { room_id, username } => {
            if session.room.is_some() {
                return send_json(sender, &CursorServerMsg::error(RoomError::InvalidInput)).await;
            }
            let Some(handle) = state.cursor_rooms.get(&room_id) else {
                return send_json(sender, &CursorServerMsg::error(RoomError::NotFound)).await;
            };
            let username = sanitize_name(&username);
            let event_rx = handle.event_tx.subscribe();
            let (reply_tx, reply_rx) = oneshot::channel();
            let sent = handle
                .cmd_tx
                .send(CursorCommand::Join {
                    conn_id: session.conn_id.clone(),
                    username,
                    reply: reply_tx,
                })
                .await;
            if sent.is_err() {
                return send_json(sender, &CursorServerMsg::error(RoomError::NotFound)).await;
            }
            match reply_rx.await {
                Ok(Ok(())) => {
                    let ok = send_json(
                        sender,
                        &CursorServerMsg::Joined {
                            room_id: handle.room_id.clone(),
                        },
                    )
                    .await;
                    session.room = Some(Attachment {
                        room_id: handle.room_id.clone(),
                        cmd_tx: handle.cmd_tx.clone(),
                        forwarder: spawn_forwarder(
                            session.conn_id.clone(),
                            event_rx,
                            Arc::clone(sender),
                        ),
                    });
                    ok
                }
                Ok(Err(code)) => send_json(sender, &CursorServerMsg::error(code)).await,
                Err(_) => send_json(sender, &CursorServerMsg::error(RoomError::NotFound)).await,
            }
        }
        CursorClientMsg::SetName { name } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(CursorCommand::SetName {
                        conn_id: session.conn_id.clone(),
                        name: sanitize_name(&name),
                    })
                    .await;
            }
            true
        }
        CursorClientMsg::SetColor { color } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(CursorCommand::SetColor {
                        conn_id: session.conn_id.clone(),
                        color,
                    })
                    .await;
            }
            true
        }
        CursorClientMsg::MoveBy { dx, dy } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(CursorCommand::Move {
                        conn_id: session.conn_id.clone(),
                        input: MoveInput::By { dx, dy },
                    })
                    .await;
            }
            true
        }
        CursorClientMsg::MoveTo { x, y } => {
            if let Some(attachment) = &session.room {
                let _ = attachment
                    .cmd_tx
                    .send(CursorCommand::Move {
                        conn_id: session.conn_id.clone(),
                        input: MoveInput::To { x, y },
                    })
                    .await;
            }
            true
        }
    }
}
