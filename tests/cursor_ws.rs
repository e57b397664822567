mod common;

use common::{TestServer, WsStream, read, read_until, send, silent_for};
use serde_json::{Value, json};

async fn create_room(server: &TestServer, username: &str) -> (WsStream, String) {
    let mut socket = server.connect("cursor").await;
    send(
        &mut socket,
        json!({"type": "createRoom", "username": username}),
    )
    .await;
    let created = read_until(&mut socket, "created").await;
    let room_id = created["roomId"].as_str().unwrap().to_string();
    (socket, room_id)
}

async fn join_room(server: &TestServer, room_id: &str, username: &str) -> WsStream {
    let mut socket = server.connect("cursor").await;
    send(
        &mut socket,
        json!({"type": "joinRoom", "roomId": room_id, "username": username}),
    )
    .await;
    read_until(&mut socket, "joined").await;
    socket
}

/// Reads until a cursors snapshot listing exactly `n` members arrives.
async fn read_until_cursors(stream: &mut WsStream, n: usize) -> Value {
    for _ in 0..50 {
        let msg = read(stream).await;
        if msg["type"] == "cursors" && msg["cursors"].as_array().map(Vec::len) == Some(n) {
            return msg;
        }
    }
    panic!("no cursors snapshot with {n} members arrived");
}

#[tokio::test]
async fn the_creator_starts_centered_with_the_first_color() {
    let server = TestServer::start_slow().await;
    let (mut socket, _room_id) = create_room(&server, "alice").await;

    let snapshot = read_until_cursors(&mut socket, 1).await;
    let cursor = &snapshot["cursors"][0];
    assert_eq!(cursor["username"], "alice");
    assert_eq!(cursor["color"], "#e6194b");
    assert_eq!(cursor["x"], 50.0);
    assert_eq!(cursor["y"], 50.0);
}

#[tokio::test]
async fn joiners_are_announced_and_everyone_shares_one_snapshot() {
    let server = TestServer::start_slow().await;
    let (mut alice, room_id) = create_room(&server, "alice").await;
    let mut bob = join_room(&server, &room_id, "bob").await;

    let joined = read_until(&mut alice, "peerJoined").await;
    assert_eq!(joined["username"], "bob");

    let seen_by_alice = read_until_cursors(&mut alice, 2).await;
    let seen_by_bob = read_until_cursors(&mut bob, 2).await;
    assert_eq!(seen_by_alice["cursors"], seen_by_bob["cursors"]);
    assert_eq!(seen_by_bob["cursors"][1]["color"], "#3cb44b");
}

#[tokio::test]
async fn joining_an_unknown_room_fails() {
    let server = TestServer::start_slow().await;
    let mut socket = server.connect("cursor").await;
    send(
        &mut socket,
        json!({"type": "joinRoom", "roomId": "ZZZZZ", "username": "bob"}),
    )
    .await;
    let err = read_until(&mut socket, "error").await;
    assert_eq!(err["code"], "notFound");
}

#[tokio::test]
async fn moves_are_broadcast_with_clamped_coordinates() {
    let server = TestServer::start_slow().await;
    let (mut alice, room_id) = create_room(&server, "alice").await;
    let mut bob = join_room(&server, &room_id, "bob").await;
    read_until_cursors(&mut alice, 2).await;
    read_until_cursors(&mut bob, 2).await;

    // Relative from the center.
    send(&mut alice, json!({"type": "moveBy", "dx": 30.0, "dy": -10.0})).await;
    let moved = read_until(&mut bob, "cursorMoved").await;
    assert_eq!(moved["x"], 80.0);
    assert_eq!(moved["y"], 40.0);

    // Absolute, past the edges.
    send(&mut alice, json!({"type": "moveTo", "x": 250.0, "y": -5.0})).await;
    let moved = read_until(&mut bob, "cursorMoved").await;
    assert_eq!(moved["x"], 100.0);
    assert_eq!(moved["y"], 0.0);
}

#[tokio::test]
async fn color_changes_must_be_hex_triples() {
    let server = TestServer::start_slow().await;
    let (mut socket, _room_id) = create_room(&server, "alice").await;
    read_until_cursors(&mut socket, 1).await;

    send(&mut socket, json!({"type": "setColor", "color": "#123abc"})).await;
    let snapshot = read_until_cursors(&mut socket, 1).await;
    assert_eq!(snapshot["cursors"][0]["color"], "#123abc");

    send(&mut socket, json!({"type": "setColor", "color": "red"})).await;
    assert!(silent_for(&mut socket, 200).await);
}

#[tokio::test]
async fn renames_flow_through_the_snapshot() {
    let server = TestServer::start_slow().await;
    let (mut alice, room_id) = create_room(&server, "alice").await;
    let mut bob = join_room(&server, &room_id, "bob").await;
    read_until_cursors(&mut bob, 2).await;

    send(&mut alice, json!({"type": "setName", "name": "   "})).await;
    let snapshot = read_until_cursors(&mut bob, 2).await;
    assert_eq!(snapshot["cursors"][0]["username"], "anonymous");
}

#[tokio::test]
async fn departures_are_announced_to_the_rest() {
    let server = TestServer::start_slow().await;
    let (mut alice, room_id) = create_room(&server, "alice").await;
    let bob = join_room(&server, &room_id, "bob").await;

    drop(bob);

    let left = read_until(&mut alice, "peerLeft").await;
    assert_eq!(left["username"], "bob");
    read_until_cursors(&mut alice, 1).await;
}

#[tokio::test]
async fn moving_without_a_room_does_nothing() {
    let server = TestServer::start_slow().await;
    let mut socket = server.connect("cursor").await;
    send(&mut socket, json!({"type": "moveBy", "dx": 5.0, "dy": 5.0})).await;
    assert!(silent_for(&mut socket, 200).await);
}
