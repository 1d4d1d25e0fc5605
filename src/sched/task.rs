//! The task model for the scheduler.
//!
//! This module consists of:
//! - [`TaskId`]: A unique, monotonically allocated task identifier.
//! - [`TaskState`]: The task lifecycle state machine.
//! - [`Task`]: A task record, including its saved CPU context and accounting.

use crate::sim::reg::Context;

use super::stack::StackRegion;

/// The lowest (numerically) task priority. Lower value = higher priority.
pub const MIN_PRIORITY: u8 = 1;
/// The highest (numerically) task priority.
pub const MAX_PRIORITY: u8 = 32;
/// Default stack size for new tasks, in bytes.
pub const DEFAULT_STACK_SIZE: u32 = 1024;

/// A task identifier.
///
/// Ids are allocated by the scheduler starting from 1 and are never reused
/// within a run, even after the task terminates.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    /// The raw numeric id.
    pub fn get(self) -> u32 {
        self.0
    }
}
impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The lifecycle state of a task.
///
/// ```text
///             dispatch                  block
///   READY ──────────────► RUNNING ──────────────► BLOCKED
///     ▲  ◄────────────────  │  │                     │
///     │      preempt        │  │ sleep(n)            │ unblock
///     │                     │  ▼                     │
///     ├─────────────────── SLEEPING ◄────────────────┘ (to READY)
///     │    deadline hit
///     ▼
///  TERMINATED (terminal, from any state)
/// ```
///
/// The sleep deadline lives only in the [`Sleeping`] variant, so it cannot
/// exist for a task in any other state.
///
/// [`Sleeping`]: TaskState::Sleeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Ready to run, waiting to be dispatched.
    Ready,
    /// Currently executing on the hart.
    Running,
    /// Blocked, waiting for an external `unblock`.
    Blocked,
    /// Sleeping until the scheduler's tick count reaches `until`.
    Sleeping {
        /// Absolute tick count at which this task becomes ready again.
        until: u64,
    },
    /// Finished. Never scheduled again; the id is never reused.
    Terminated,
}

impl TaskState {
    /// The payload-free kind of this state, used for metrics keys and display.
    pub fn kind(self) -> StateKind {
        match self {
            TaskState::Ready        => StateKind::Ready,
            TaskState::Running      => StateKind::Running,
            TaskState::Blocked      => StateKind::Blocked,
            TaskState::Sleeping { .. } => StateKind::Sleeping,
            TaskState::Terminated   => StateKind::Terminated,
        }
    }
}

/// A [`TaskState`] stripped of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKind {
    /// See [`TaskState::Ready`].
    Ready,
    /// See [`TaskState::Running`].
    Running,
    /// See [`TaskState::Blocked`].
    Blocked,
    /// See [`TaskState::Sleeping`].
    Sleeping,
    /// See [`TaskState::Terminated`].
    Terminated,
}
impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateKind::Ready      => "READY",
            StateKind::Running    => "RUNNING",
            StateKind::Blocked    => "BLOCKED",
            StateKind::Sleeping   => "SLEEPING",
            StateKind::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// A task record.
///
/// The scheduler exclusively owns these. The CPU context (`context`) is only
/// meaningful while the task is switched out; while the task is running, its
/// context lives in the simulator's register file.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique id, allocated at creation.
    pub id: TaskId,
    /// Short human label. Not necessarily unique.
    pub name: String,
    /// Current priority, in `[MIN_PRIORITY, MAX_PRIORITY]`.
    /// Lower value = higher priority. Aging may lower this below
    /// `original_priority`; dispatch restores it back toward it.
    pub priority: u8,
    /// The priority the task was created with (or last `set_priority` value).
    pub original_priority: u8,
    /// Lifecycle state.
    pub state: TaskState,
    /// The PC this task starts at on its first dispatch.
    pub entry_point: u32,
    /// The stack region reserved for this task.
    pub stack: StackRegion,
    /// Saved register state. `None` until the task has been dispatched once.
    pub context: Option<Context>,
    /// Ticks spent continuously READY since the task last ran. Drives aging.
    pub wait_ticks: u64,
    /// Number of times this task has been dispatched.
    pub run_count: u64,
    /// Ticks of CPU time this task has executed.
    pub cpu_ticks: u64,
    /// Tick at which this task was last dispatched
    /// (equals `created_tick` if it has never run).
    pub last_run_tick: u64,
    /// Tick at which this task was created.
    pub created_tick: u64,
}

impl Task {
    pub(super) fn new(
        id: TaskId,
        name: &str,
        priority: u8,
        entry_point: u32,
        stack: StackRegion,
        created_tick: u64,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            priority,
            original_priority: priority,
            state: TaskState::Ready,
            entry_point,
            stack,
            context: None,
            wait_ticks: 0,
            run_count: 0,
            cpu_ticks: 0,
            last_run_tick: created_tick,
            created_tick,
        }
    }

    /// The stack pointer this task starts with: one past the top of its region.
    pub fn initial_sp(&self) -> u32 {
        self.stack.base + self.stack.size
    }

    /// Whether this task is in the given state kind.
    pub fn is(&self, kind: StateKind) -> bool {
        self.state.kind() == kind
    }
}
impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Task {} ({:?}, priority {}, {})",
            self.id, self.name, self.priority, self.state.kind()
        )
    }
}
