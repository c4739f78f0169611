//! Tasks and the run queue that drives async continuations.
//!
//! An async method returns a task its state machine completes through the
//! builder intrinsics. When an awaited task is still pending the machine
//! registers itself as a continuation and returns; completing the task
//! schedules every registered machine to resume. Jobs run in FIFO order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::value::Value;

pub type TaskId = u64;

pub type TaskRef = Rc<RefCell<TaskState>>;

#[derive(Debug, Clone)]
pub enum TaskStatus {
    Pending,
    Completed(Value),
    /// Holds the exception object
    Faulted(Value),
}

#[derive(Debug)]
pub struct TaskState {
    pub id: TaskId,
    pub status: TaskStatus,
    /// State machines to resume on completion
    continuations: Vec<Value>,
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }
}

/// Work waiting in the run queue.
#[derive(Debug)]
pub enum Job {
    /// Complete a `Task.Yield` task
    Complete(TaskRef),
    /// Call `MoveNext` on a suspended state machine
    Resume(Value),
}

#[derive(Debug, Default)]
pub struct Executor {
    ready_queue: VecDeque<Job>,
    next_task_id: TaskId,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    fn task(&mut self, status: TaskStatus) -> TaskRef {
        let id = self.next_task_id;
        self.next_task_id += 1;
        Rc::new(RefCell::new(TaskState {
            id,
            status,
            continuations: Vec::new(),
        }))
    }

    pub fn pending(&mut self) -> TaskRef {
        self.task(TaskStatus::Pending)
    }

    pub fn completed(&mut self, value: Value) -> TaskRef {
        self.task(TaskStatus::Completed(value))
    }

    /// A task that completes when the run queue reaches it.
    pub fn yielded(&mut self) -> TaskRef {
        let task = self.pending();
        self.ready_queue.push_back(Job::Complete(task.clone()));
        task
    }

    /// Resume `machine` once `task` has completed.
    pub fn on_completed(&mut self, task: &TaskRef, machine: Value) {
        let mut state = task.borrow_mut();
        if state.is_pending() {
            state.continuations.push(machine);
        } else {
            self.ready_queue.push_back(Job::Resume(machine));
        }
    }

    /// Settle a pending task and schedule its continuations. Returns false
    /// when the task had already completed.
    pub fn settle(&mut self, task: &TaskRef, status: TaskStatus) -> bool {
        let mut state = task.borrow_mut();
        if !state.is_pending() {
            return false;
        }
        trace!(task = state.id, "settle");
        state.status = status;
        for machine in state.continuations.drain(..) {
            self.ready_queue.push_back(Job::Resume(machine));
        }
        true
    }

    pub fn next_job(&mut self) -> Option<Job> {
        self.ready_queue.pop_front()
    }

    pub fn pending_jobs(&self) -> usize {
        self.ready_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuations_run_after_settle() {
        let mut executor = Executor::new();
        let task = executor.pending();
        executor.on_completed(&task, Value::I32(1));
        executor.on_completed(&task, Value::I32(2));
        assert_eq!(executor.pending_jobs(), 0);

        assert!(executor.settle(&task, TaskStatus::Completed(Value::Null)));
        assert!(!executor.settle(&task, TaskStatus::Completed(Value::Null)));
        let resumed: Vec<_> = std::iter::from_fn(|| executor.next_job())
            .map(|job| match job {
                Job::Resume(Value::I32(n)) => n,
                other => panic!("unexpected job {:?}", other),
            })
            .collect();
        assert_eq!(resumed, vec![1, 2]);
    }

    #[test]
    fn test_completed_task_resumes_immediately() {
        let mut executor = Executor::new();
        let task = executor.completed(Value::I32(7));
        executor.on_completed(&task, Value::Null);
        assert!(matches!(executor.next_job(), Some(Job::Resume(Value::Null))));
    }

    #[test]
    fn test_yield_queues_completion() {
        let mut executor = Executor::new();
        let task = executor.yielded();
        assert!(task.borrow().is_pending());
        assert!(matches!(executor.next_job(), Some(Job::Complete(_))));
        assert_ne!(executor.pending().borrow().id, task.borrow().id);
    }
}
