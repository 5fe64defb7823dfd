use tokio::sync::mpsc;

use super::task::{TaskId, TaskUpdate};

/// Receives every task transition, in order per task.
///
/// Called outside the session lock, so implementations may read the session
/// back. Updates for different tasks of one batch interleave in completion
/// order.
pub trait TaskListener: Send + Sync {
    fn on_task_update(&self, task_id: TaskId, update: &TaskUpdate);
}

impl<F> TaskListener for F
where
    F: Fn(TaskId, &TaskUpdate) + Send + Sync,
{
    fn on_task_update(&self, task_id: TaskId, update: &TaskUpdate) {
        self(task_id, update)
    }
}

/// Drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl TaskListener for NoopListener {
    fn on_task_update(&self, _task_id: TaskId, _update: &TaskUpdate) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub update: TaskUpdate,
}

/// Forwards updates over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskListener for ChannelListener {
    fn on_task_update(&self, task_id: TaskId, update: &TaskUpdate) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.tx.send(TaskEvent {
            task_id,
            update: update.clone(),
        });
    }
}
