//! # Transaction Recorder
//!
//! The per-write-scope op buffer. Store facades append here instead of
//! writing to the log; the outermost scope drains the buffer into a single
//! transaction record.

use crate::codec::Op;

/// Ordered buffer of the ops produced inside one outermost write scope.
#[derive(Debug, Default)]
pub struct TransactionRecorder {
    ops: Vec<Op>,
}

impl TransactionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an op, coalescing runs of task saves and removes.
    ///
    /// A `SaveTasks` immediately after another `SaveTasks` folds into it:
    /// same-id tasks are replaced, new ids appended. A save followed by a
    /// mutation of the same tasks therefore replays as one write.
    /// Consecutive `RemoveTasks` union their id sets.
    pub fn add(&mut self, op: Op) {
        match (self.ops.last_mut(), op) {
            (Some(Op::SaveTasks { tasks: prior }), Op::SaveTasks { tasks }) => {
                for task in tasks {
                    match prior
                        .iter_mut()
                        .find(|t| t.assigned_task.task_id == task.assigned_task.task_id)
                    {
                        Some(slot) => *slot = task,
                        None => prior.push(task),
                    }
                }
            }
            (Some(Op::RemoveTasks { task_ids: prior }), Op::RemoveTasks { task_ids }) => {
                prior.extend(task_ids);
            }
            (_, op) => self.ops.push(op),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}
