pub mod chess;
pub mod config;
pub mod cursor;
pub mod error;
pub mod registry;
pub mod spy;
pub mod timer;
pub mod types;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::chess::{ChessHandle, Rules};
use crate::config::{ServerConfig, WordPair};
use crate::cursor::CursorHandle;
use crate::registry::RoomTable;
use crate::spy::SpyHandle;

/// Shared handles every WebSocket handler works against. Each game mode
/// owns its own room table, so nothing here is global state and tests can
/// stand up as many independent instances as they like.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub words: Arc<Vec<WordPair>>,
    pub spy_rooms: Arc<RoomTable<SpyHandle>>,
    pub chess_rooms: Arc<RoomTable<ChessHandle>>,
    pub cursor_rooms: Arc<RoomTable<CursorHandle>>,
    pub chess_rules: Arc<dyn Rules>,
}

/// Build the router and its state. The binary serves this on the configured
/// port; tests bind it to an ephemeral one.
pub fn build_app(
    config: ServerConfig,
    words: Vec<WordPair>,
    rules: Arc<dyn Rules>,
) -> (Router, AppState) {
    let static_dir = config.static_dir.clone();
    let state = AppState {
        config,
        words: Arc::new(words),
        spy_rooms: RoomTable::new(),
        chess_rooms: RoomTable::new(),
        cursor_rooms: RoomTable::new(),
        chess_rules: rules,
    };

    let app = Router::new()
        .route("/ws/spy", get(ws::spy_ws))
        .route("/ws/chess", get(ws::chess_ws))
        .route("/ws/cursor", get(ws::cursor_ws))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
