use serde::{Deserialize, Serialize};

use crate::error::RoomError;

/// Identifies one WebSocket connection for its whole lifetime.
pub type ConnId = String;

/// Display names are trimmed and capped before they are stored anywhere.
pub const MAX_NAME_LEN: usize = 20;

/// Normalize a client-supplied display name: trim whitespace, strip control
/// characters, cap the length. An empty result falls back to a placeholder.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// Events fanned out from a room task to the sockets attached to the room.
///
/// `SendTo` is the only path a private payload ever takes; every socket task
/// drops `SendTo` events addressed to someone else before serializing them.
#[derive(Debug, Clone)]
pub enum RoomEvent<M> {
    Broadcast { msg: M },
    SendTo { conn_id: ConnId, msg: M },
}

/// A room member as shown in public snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: ConnId,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Spy mode
// ---------------------------------------------------------------------------

/// Lifecycle of a spy room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Assigning,
    Discussion,
    Voting,
    Ended,
}

/// Which card a participant was dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Real,
    Spy,
}

/// Who won a finished spy round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Spy,
    Players,
}

/// Spy-mode messages sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SpyClientMsg {
    CreateLobby {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinLobby {
        room_id: String,
        username: String,
    },
    StartGame,
    #[serde(rename_all = "camelCase")]
    CastVote {
        target_id: ConnId,
    },
    ResetGame,
}

/// Spy-mode messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SpyServerMsg {
    #[serde(rename_all = "camelCase")]
    Created {
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        room_id: String,
    },
    Error {
        code: RoomError,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    RoomState {
        id: String,
        host_id: ConnId,
        players: Vec<PlayerView>,
        spectators: Vec<PlayerView>,
        phase: Phase,
        round: u32,
        phase_ends_at: Option<u64>,
    },
    /// Dealt to each participant individually, never broadcast.
    YourCard {
        kind: CardKind,
        word: String,
    },
    PlayerKicked {
        username: String,
    },
    GameResult {
        winner: Winner,
        spy: String,
        kicked: Option<String>,
    },
}

impl SpyServerMsg {
    pub fn error(code: RoomError) -> Self {
        Self::Error {
            message: code.to_string(),
            code,
        }
    }
}

// ---------------------------------------------------------------------------
// Chess mode
// ---------------------------------------------------------------------------

/// Seat color. White is dealt to the room creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

/// A move as submitted by a client, relayed verbatim once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveReq {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

/// Board position as reported by the legality engine after an accepted move.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub moves: Vec<MoveReq>,
    pub turn: Color,
    /// Engine-specific position description, relayed verbatim when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
}

impl Position {
    pub fn initial() -> Self {
        Self {
            moves: Vec::new(),
            turn: Color::White,
            fen: None,
        }
    }
}

/// One chess seat as shown in public snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatView {
    pub id: ConnId,
    pub username: String,
    pub color: Color,
    pub connected: bool,
}

/// Chess-mode messages sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChessClientMsg {
    CreateRoom {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        username: String,
    },
    MakeMove {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
}

/// Chess-mode messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChessServerMsg {
    #[serde(rename_all = "camelCase")]
    Created {
        room_id: String,
        color: Color,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        room_id: String,
        color: Color,
    },
    Error {
        code: RoomError,
        message: String,
    },
    RoomState {
        id: String,
        players: Vec<SeatView>,
        turn: Color,
    },
    Position {
        position: Position,
    },
    OpponentJoined {
        username: String,
    },
    OpponentLeft {
        username: String,
    },
}

impl ChessServerMsg {
    pub fn error(code: RoomError) -> Self {
        Self::Error {
            message: code.to_string(),
            code,
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor mode
// ---------------------------------------------------------------------------

/// Validated cursor movement: a relative nudge or an absolute jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveInput {
    By { dx: f32, dy: f32 },
    To { x: f32, y: f32 },
}

/// One live cursor as shown in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorView {
    pub id: ConnId,
    pub username: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
}

/// Cursor-mode messages sent by clients. Movement arrives as one of two
/// explicitly tagged forms so relative and absolute input never have to be
/// told apart by field sniffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CursorClientMsg {
    CreateRoom {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        username: String,
    },
    SetName {
        name: String,
    },
    SetColor {
        color: String,
    },
    MoveBy {
        dx: f32,
        dy: f32,
    },
    MoveTo {
        x: f32,
        y: f32,
    },
}

/// Cursor-mode messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CursorServerMsg {
    #[serde(rename_all = "camelCase")]
    Created {
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        room_id: String,
    },
    Error {
        code: RoomError,
        message: String,
    },
    PeerJoined {
        id: ConnId,
        username: String,
    },
    PeerLeft {
        id: ConnId,
        username: String,
    },
    Cursors {
        cursors: Vec<CursorView>,
    },
    CursorMoved {
        id: ConnId,
        x: f32,
        y: f32,
    },
}

impl CursorServerMsg {
    pub fn error(code: RoomError) -> Self {
        Self::Error {
            message: code.to_string(),
            code,
        }
    }
}
