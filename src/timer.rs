use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One armed deadline belonging to a room.
///
/// The timer is a spawned task that sleeps and then re-injects a command
/// into the room's own channel, so a firing is handled like any other
/// command with no lock held across the sleep. Dropping the handle aborts
/// the task, which makes replacing the handle in a room's timer slot a
/// cancel of whatever was armed before.
///
/// Abort races the sleep: a timer may complete its send just before the
/// handle is dropped. Commands carried by timers therefore embed enough
/// state (phase, round) for the room task to recognize and discard a stale
/// firing.
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Arm a timer that sends `cmd` into `tx` after `delay`. If the room is
    /// gone by then the send fails and the firing vanishes.
    pub fn spawn<C: Send + 'static>(delay: Duration, tx: mpsc::Sender<C>, cmd: C) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd).await;
        });
        Self { task }
    }

    /// Cancel without waiting. Safe to call repeatedly and after the timer
    /// has already fired.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
