use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{SpyTimings, WordPair};
use crate::error::RoomError;
use crate::registry::RoomTable;
use crate::timer::TimerHandle;
use crate::types::{CardKind, ConnId, Phase, PlayerView, RoomEvent, SpyServerMsg, Winner};

/// Fewest roster members a round can start with.
pub const MIN_PLAYERS: usize = 3;

pub type SpyEvent = RoomEvent<SpyServerMsg>;

/// Commands a socket task (or a fired timer) sends into a spy room task.
#[derive(Debug)]
pub enum SpyCommand {
    Join {
        conn_id: ConnId,
        username: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Start {
        conn_id: ConnId,
    },
    CastVote {
        conn_id: ConnId,
        target_id: ConnId,
    },
    Reset {
        conn_id: ConnId,
    },
    Leave {
        conn_id: ConnId,
    },
    /// A phase deadline elapsed. Carries the phase and round it was armed
    /// in; a mismatch means the room moved on and the firing is stale.
    PhaseElapsed {
        phase: Phase,
        round: u32,
    },
}

/// Cheap handle to a live spy room, stored in the mode's room table.
#[derive(Clone)]
pub struct SpyHandle {
    pub room_id: String,
    pub cmd_tx: mpsc::Sender<SpyCommand>,
    pub event_tx: broadcast::Sender<SpyEvent>,
}

#[derive(Debug, Clone)]
struct Member {
    conn_id: ConnId,
    username: String,
}

impl Member {
    fn view(&self) -> PlayerView {
        PlayerView {
            id: self.conn_id.clone(),
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Vote {
    voter: ConnId,
    target: ConnId,
}

/// State owned by one spy room task. All mutation happens on that task.
struct SpyRoom {
    room_id: String,
    created_at: Instant,
    host_id: ConnId,
    phase: Phase,
    round: u32,
    roster: Vec<Member>,
    spectators: Vec<Member>,
    votes: Vec<Vote>,
    spy_id: Option<ConnId>,
    pair: Option<WordPair>,
    phase_ends_at: Option<u64>,
    timer: Option<TimerHandle>,
    timings: SpyTimings,
    words: Arc<Vec<WordPair>>,
}

impl SpyRoom {
    fn broadcast(&self, tx: &broadcast::Sender<SpyEvent>, msg: SpyServerMsg) {
        let _ = tx.send(RoomEvent::Broadcast { msg });
    }

    fn send_to(&self, tx: &broadcast::Sender<SpyEvent>, conn_id: &str, msg: SpyServerMsg) {
        let _ = tx.send(RoomEvent::SendTo {
            conn_id: conn_id.to_string(),
            msg,
        });
    }

    fn is_roster(&self, conn_id: &str) -> bool {
        self.roster.iter().any(|m| m.conn_id == conn_id)
    }

    fn username_of(&self, conn_id: &str) -> Option<String> {
        self.roster
            .iter()
            .chain(self.spectators.iter())
            .find(|m| m.conn_id == conn_id)
            .map(|m| m.username.clone())
    }

    fn snapshot(&self) -> SpyServerMsg {
        SpyServerMsg::RoomState {
            id: self.room_id.clone(),
            host_id: self.host_id.clone(),
            players: self.roster.iter().map(Member::view).collect(),
            spectators: self.spectators.iter().map(Member::view).collect(),
            phase: self.phase,
            round: self.round,
            phase_ends_at: self.phase_ends_at,
        }
    }

    fn broadcast_state(&self, tx: &broadcast::Sender<SpyEvent>) {
        self.broadcast(tx, self.snapshot());
    }

    /// Arm the deadline for the current phase. Replacing the slot drops any
    /// previously armed timer, which cancels it.
    fn set_phase_timer(&mut self, cmd_tx: &mpsc::Sender<SpyCommand>, delay: Duration) {
        self.phase_ends_at = Some(now_millis() + delay.as_millis() as u64);
        self.timer = Some(TimerHandle::spawn(
            delay,
            cmd_tx.clone(),
            SpyCommand::PhaseElapsed {
                phase: self.phase,
                round: self.round,
            },
        ));
    }

    fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.phase_ends_at = None;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn draw_pair(words: &[WordPair]) -> Option<WordPair> {
    if words.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..words.len());
    Some(words[idx].clone())
}

/// Create a spy room with `conn_id` as host and spawn its task. The returned
/// receiver was subscribed before the task started, so the creator sees the
/// room's first snapshot.
pub fn create_room(
    table: Arc<RoomTable<SpyHandle>>,
    conn_id: ConnId,
    username: String,
    timings: SpyTimings,
    words: Arc<Vec<WordPair>>,
) -> (SpyHandle, broadcast::Receiver<SpyEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, _) = broadcast::channel(64);
    let event_rx = event_tx.subscribe();

    let (room_id, handle) = table.create(|code| SpyHandle {
        room_id: code.to_string(),
        cmd_tx: cmd_tx.clone(),
        event_tx: event_tx.clone(),
    });

    tracing::info!("Spy room {} created by {}", room_id, username);

    let room = SpyRoom {
        room_id,
        created_at: Instant::now(),
        host_id: conn_id.clone(),
        phase: Phase::Lobby,
        round: 0,
        roster: vec![Member { conn_id, username }],
        spectators: Vec::new(),
        votes: Vec::new(),
        spy_id: None,
        pair: None,
        phase_ends_at: None,
        timer: None,
        timings,
        words,
    };

    tokio::spawn(room_task(room, cmd_tx, cmd_rx, event_tx, table));

    (handle, event_rx)
}

/// Per-room task: the only place this room's state is touched. Timer
/// firings re-enter through `cmd_rx` like any client action.
async fn room_task(
    mut room: SpyRoom,
    cmd_tx: mpsc::Sender<SpyCommand>,
    mut cmd_rx: mpsc::Receiver<SpyCommand>,
    event_tx: broadcast::Sender<SpyEvent>,
    table: Arc<RoomTable<SpyHandle>>,
) {
    room.broadcast_state(&event_tx);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            SpyCommand::Join {
                conn_id,
                username,
                reply,
            } => {
                let result = handle_join(&mut room, &event_tx, conn_id, username);
                let _ = reply.send(result);
            }
            SpyCommand::Start { conn_id } => {
                // Start carries no reply channel, so a refusal is logged
                // here and goes no further.
                if let Err(err) = handle_start(&mut room, &cmd_tx, &event_tx, &conn_id) {
                    tracing::debug!("Start refused in {}: {}", room.room_id, err);
                }
            }
            SpyCommand::CastVote { conn_id, target_id } => {
                handle_vote(&mut room, &event_tx, conn_id, target_id);
            }
            SpyCommand::Reset { conn_id } => {
                if let Err(err) = handle_reset(&mut room, &event_tx, &conn_id) {
                    tracing::debug!("Reset refused in {}: {}", room.room_id, err);
                }
            }
            SpyCommand::Leave { conn_id } => {
                handle_leave(&mut room, &event_tx, &conn_id);
                if room.roster.is_empty() && room.spectators.is_empty() {
                    break;
                }
            }
            SpyCommand::PhaseElapsed { phase, round } => {
                handle_phase_elapsed(&mut room, &cmd_tx, &event_tx, phase, round);
            }
        }
    }

    room.clear_timer();
    table.remove(&room.room_id);
    tracing::info!(
        "Spy room {} closed after {:?}",
        room.room_id,
        room.created_at.elapsed()
    );
}

fn handle_join(
    room: &mut SpyRoom,
    tx: &broadcast::Sender<SpyEvent>,
    conn_id: ConnId,
    username: String,
) -> Result<(), RoomError> {
    if room.phase != Phase::Lobby {
        return Err(RoomError::WrongPhase);
    }
    if room.is_roster(&conn_id) {
        return Err(RoomError::InvalidInput);
    }
    room.roster.push(Member { conn_id, username });
    room.broadcast_state(tx);
    Ok(())
}

fn handle_start(
    room: &mut SpyRoom,
    cmd_tx: &mpsc::Sender<SpyCommand>,
    tx: &broadcast::Sender<SpyEvent>,
    conn_id: &str,
) -> Result<(), RoomError> {
    if conn_id != room.host_id {
        return Err(RoomError::Forbidden);
    }
    if room.phase != Phase::Lobby {
        return Err(RoomError::WrongPhase);
    }
    if room.roster.len() < MIN_PLAYERS {
        return Err(RoomError::BelowMinimum);
    }
    let Some(pair) = draw_pair(&room.words) else {
        tracing::warn!("Spy room {} has no word pairs to deal", room.room_id);
        return Err(RoomError::InvalidInput);
    };

    let spy_idx = rand::rng().random_range(0..room.roster.len());
    room.spy_id = Some(room.roster[spy_idx].conn_id.clone());
    room.pair = Some(pair.clone());
    room.round = 1;
    room.votes.clear();
    room.phase = Phase::Assigning;

    // Cards are dealt one socket at a time; the spy's identity never rides
    // on a broadcast.
    for member in &room.roster {
        let msg = if Some(&member.conn_id) == room.spy_id.as_ref() {
            SpyServerMsg::YourCard {
                kind: CardKind::Spy,
                word: pair.decoy.clone(),
            }
        } else {
            SpyServerMsg::YourCard {
                kind: CardKind::Real,
                word: pair.real.clone(),
            }
        };
        room.send_to(tx, &member.conn_id, msg);
    }

    room.set_phase_timer(cmd_tx, room.timings.assigning);
    room.broadcast_state(tx);
    tracing::info!(
        "Spy game started in {} with {} players",
        room.room_id,
        room.roster.len()
    );
    Ok(())
}

fn handle_vote(
    room: &mut SpyRoom,
    tx: &broadcast::Sender<SpyEvent>,
    conn_id: ConnId,
    target_id: ConnId,
) {
    if room.phase != Phase::Voting {
        return;
    }
    if !room.is_roster(&conn_id) || !room.is_roster(&target_id) {
        return;
    }
    if room.votes.iter().any(|v| v.voter == conn_id) {
        return;
    }
    room.votes.push(Vote {
        voter: conn_id,
        target: target_id,
    });
    room.broadcast_state(tx);
}

fn handle_reset(
    room: &mut SpyRoom,
    tx: &broadcast::Sender<SpyEvent>,
    conn_id: &str,
) -> Result<(), RoomError> {
    if conn_id != room.host_id {
        return Err(RoomError::Forbidden);
    }
    if room.phase != Phase::Ended {
        return Err(RoomError::WrongPhase);
    }
    room.clear_timer();
    let mut returning = std::mem::take(&mut room.spectators);
    room.roster.append(&mut returning);
    room.spy_id = None;
    room.round = 0;
    room.votes.clear();
    room.pair = draw_pair(&room.words);
    room.phase = Phase::Lobby;
    room.broadcast_state(tx);
    Ok(())
}

fn handle_leave(room: &mut SpyRoom, tx: &broadcast::Sender<SpyEvent>, conn_id: &str) {
    if let Some(idx) = room.spectators.iter().position(|m| m.conn_id == conn_id) {
        room.spectators.remove(idx);
        if !room.roster.is_empty() || !room.spectators.is_empty() {
            room.broadcast_state(tx);
        }
        return;
    }

    let Some(idx) = room.roster.iter().position(|m| m.conn_id == conn_id) else {
        return;
    };
    let member = room.roster.remove(idx);

    if room.roster.is_empty() && room.spectators.is_empty() {
        // The task loop deletes the room.
        return;
    }

    if room.host_id == member.conn_id {
        if let Some(next) = room.roster.first().or_else(|| room.spectators.first()) {
            room.host_id = next.conn_id.clone();
            tracing::info!("Host of spy room {} left, {} takes over", room.room_id, next.username);
        }
    }

    let in_game = matches!(
        room.phase,
        Phase::Assigning | Phase::Discussion | Phase::Voting
    );
    if in_game && Some(&member.conn_id) == room.spy_id.as_ref() {
        // The spy walking out forfeits the game.
        finish(room, tx, Winner::Players, member.username, None);
        return;
    }

    room.broadcast_state(tx);
}

fn handle_phase_elapsed(
    room: &mut SpyRoom,
    cmd_tx: &mpsc::Sender<SpyCommand>,
    tx: &broadcast::Sender<SpyEvent>,
    fired_phase: Phase,
    fired_round: u32,
) {
    if fired_phase != room.phase || fired_round != room.round {
        // Stale firing from a phase the room already left.
        return;
    }
    match room.phase {
        Phase::Assigning => {
            room.phase = Phase::Discussion;
            room.set_phase_timer(cmd_tx, room.timings.discussion);
            room.broadcast_state(tx);
        }
        Phase::Discussion => {
            room.votes.clear();
            room.phase = Phase::Voting;
            room.set_phase_timer(cmd_tx, room.timings.voting);
            room.broadcast_state(tx);
        }
        Phase::Voting => {
            resolve_votes(room, cmd_tx, tx);
        }
        Phase::Lobby | Phase::Ended => {}
    }
}

fn resolve_votes(
    room: &mut SpyRoom,
    cmd_tx: &mpsc::Sender<SpyCommand>,
    tx: &broadcast::Sender<SpyEvent>,
) {
    let chosen = leading_target(&room.votes, |id| room.is_roster(id));

    let Some(target_id) = chosen else {
        // Nobody was voted out, so the spy slips through.
        let spy_name = room
            .spy_id
            .as_deref()
            .and_then(|id| room.username_of(id))
            .unwrap_or_default();
        finish(room, tx, Winner::Spy, spy_name, None);
        return;
    };

    if Some(&target_id) == room.spy_id.as_ref() {
        let spy_name = room.username_of(&target_id).unwrap_or_default();
        finish(room, tx, Winner::Players, spy_name.clone(), Some(spy_name));
        return;
    }

    let Some(idx) = room.roster.iter().position(|m| m.conn_id == target_id) else {
        return;
    };
    let eliminated = room.roster.remove(idx);
    room.spectators.push(eliminated.clone());
    room.broadcast(
        tx,
        SpyServerMsg::PlayerKicked {
            username: eliminated.username.clone(),
        },
    );

    if room.roster.len() <= 2 {
        // Too few left to corner the spy.
        let spy_name = room
            .spy_id
            .as_deref()
            .and_then(|id| room.username_of(id))
            .unwrap_or_default();
        finish(room, tx, Winner::Spy, spy_name, Some(eliminated.username));
        return;
    }

    room.votes.clear();
    room.round += 1;
    room.phase = Phase::Discussion;
    room.set_phase_timer(cmd_tx, room.timings.discussion);
    room.broadcast_state(tx);
}

fn finish(
    room: &mut SpyRoom,
    tx: &broadcast::Sender<SpyEvent>,
    winner: Winner,
    spy: String,
    kicked: Option<String>,
) {
    room.clear_timer();
    room.votes.clear();
    room.phase = Phase::Ended;
    room.broadcast(tx, SpyServerMsg::GameResult { winner, spy, kicked });
    room.broadcast_state(tx);
    let word = room.pair.as_ref().map(|p| p.real.as_str()).unwrap_or("?");
    tracing::info!(
        "Spy game in {} ended, {:?} win, the word was {}",
        room.room_id,
        winner,
        word
    );
}

/// Pick the elimination target. Votes are walked in cast order and a later
/// target never displaces a leader it merely ties, so the first target to
/// reach the top count wins the tally. Targets that already left the roster
/// are skipped.
fn leading_target(votes: &[Vote], still_in: impl Fn(&str) -> bool) -> Option<ConnId> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut leader: Option<(&str, usize)> = None;
    for vote in votes {
        if !still_in(&vote.target) {
            continue;
        }
        let count = counts
            .entry(vote.target.as_str())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let count = *count;
        match leader {
            Some((_, best)) if count <= best => {}
            _ => leader = Some((vote.target.as_str(), count)),
        }
    }
    leader.map(|(id, _)| id.to_string())
}
