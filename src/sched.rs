//! Task scheduling on top of the simulated hart.
//!
//! This module is focused on the task lifecycle and the scheduling decisions
//! made each tick. It consists of:
//! - [`Scheduler`]: The task table, lifecycle operations, and per-tick pass.
//! - [`Core`]: The state shared by every scheduling policy.
//! - [`task`]: The module defining tasks and their lifecycle states.
//! - [`policy`]: The module defining the pluggable scheduling policies.
//! - [`stack`]: The module reserving per-task stack regions.
//!
//! The scheduler owns every [`Task`] record; the simulator owns the CPU state.
//! The two meet in [`Scheduler::tick`], which receives the register file for
//! the duration of the tick so that context switches can save and restore it.
//!
//! # Usage
//!
//! A scheduler is usually driven through [`Simulator`], but it can be used on
//! its own against a bare register file:
//!
//! ```
//! use rv32_multitask::sched::{create_scheduler, SchedConfig};
//! use rv32_multitask::sim::reg::RegFile;
//!
//! let mut sched = create_scheduler("priority", SchedConfig::default(), 0).unwrap();
//! let mut regs = RegFile::new();
//!
//! let worker = sched.create_task("worker", 5, 0x1000, 1024).unwrap();
//! sched.tick(&mut regs);
//! assert_eq!(sched.current().unwrap().id, worker);
//! assert_eq!(regs.pc(), 0x1000);
//! ```
//!
//! [`Simulator`]: crate::sim::Simulator
//! [`Task`]: task::Task

pub mod policy;
pub mod stack;
pub mod task;

use std::collections::BTreeMap;

use crate::sim::reg::{reg_consts, RegFile};
use crate::sim::SimErr;

use self::policy::{FcfsPolicy, Policy, PriorityPolicy, RoundRobinPolicy, Verdict};
use self::stack::StackAllocator;
use self::task::{StateKind, Task, TaskId, TaskState, MAX_PRIORITY, MIN_PRIORITY};

/// Priority aging parameters.
///
/// Aging prevents starvation: a task that sits READY long enough has its
/// priority value stepped down (toward [`MIN_PRIORITY`]) until it gets a turn,
/// and is stepped back up toward its original priority as it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aging {
    /// Whether aging is applied at all.
    pub enabled: bool,
    /// Aging is evaluated every `interval` ticks.
    pub interval: u64,
    /// A READY task must have waited at least this many ticks to be boosted.
    pub threshold: u64,
}
impl Default for Aging {
    /// Aging enabled, evaluated every 10 ticks, boosting tasks that
    /// waited 20 ticks or more.
    fn default() -> Self {
        Self { enabled: true, interval: 10, threshold: 20 }
    }
}

/// Configuration for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Priority aging parameters.
    pub aging: Aging,
    /// Lowest address usable for task stacks.
    pub stack_floor: u32,
    /// One past the highest address usable for task stacks.
    pub stack_ceiling: u32,
}
impl SchedConfig {
    /// Configuration reserving the upper half of a memory of `mem_size` bytes
    /// for task stacks.
    pub fn for_memory(mem_size: usize) -> Self {
        let ceiling = mem_size as u32;
        Self {
            aging: Aging::default(),
            stack_floor: ceiling / 2,
            stack_ceiling: ceiling,
        }
    }
}
impl Default for SchedConfig {
    /// Configuration for the default 1 MiB memory.
    fn default() -> Self {
        Self::for_memory(crate::sim::mem::DEFAULT_MEM_SIZE)
    }
}

/// Scheduler counters, exposed by value snapshot via [`Scheduler::metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Number of context switches to a task (switches to idle are not counted).
    pub context_switches: u64,
    /// Number of context switches that preempted a still-runnable task.
    pub preemptions: u64,
    /// Histogram of task state transitions, keyed by `(from, to)`.
    pub transitions: BTreeMap<(StateKind, StateKind), u64>,
}

/// The state shared by the scheduler and its policy.
///
/// Policies receive `&Core` in [`Policy::decide`] and use the read accessors
/// here ([`Core::running`], [`Core::ready`], [`Core::ready_after`], ...) to
/// make their pick. All mutation goes through the [`Scheduler`] around it.
#[derive(Debug)]
pub struct Core {
    tasks: BTreeMap<TaskId, Task>,
    /// The task whose context currently occupies the register file.
    /// Its saved snapshot is stale until the next context switch writes it.
    cpu_task: Option<TaskId>,
    next_id: u32,
    tick_count: u64,
    metrics: Metrics,
    stacks: StackAllocator,
    config: SchedConfig,
}

impl Core {
    fn new(config: SchedConfig) -> Self {
        Self {
            tasks: BTreeMap::new(),
            cpu_task: None,
            next_id: 1,
            tick_count: 0,
            metrics: Metrics::default(),
            stacks: StackAllocator::new(config.stack_floor, config.stack_ceiling),
            config,
        }
    }

    /// The current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Looks up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All tasks, in ascending id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// The RUNNING task, if there is one.
    pub fn running(&self) -> Option<&Task> {
        let t = self.tasks.get(&self.cpu_task?)?;
        match t.state {
            TaskState::Running => Some(t),
            _ => None,
        }
    }

    /// The READY tasks, in ascending id order.
    pub fn ready(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(|t| t.state == TaskState::Ready)
    }

    /// The READY task with the lowest id.
    pub fn first_ready(&self) -> Option<TaskId> {
        self.ready().next().map(|t| t.id)
    }

    /// The READY task whose id follows `id` in ascending order,
    /// wrapping around to the lowest READY id.
    pub fn ready_after(&self, id: TaskId) -> Option<TaskId> {
        use std::ops::Bound::{Excluded, Unbounded};

        self.tasks
            .range((Excluded(id), Unbounded))
            .find(|(_, t)| t.state == TaskState::Ready)
            .map(|(&id, _)| id)
            .or_else(|| self.first_ready())
    }

    /// Moves a task to a new state, recording the transition in the metrics
    /// histogram. Every state change in the scheduler goes through here.
    fn set_state(&mut self, id: TaskId, new: TaskState) {
        let Some(task) = self.tasks.get_mut(&id) else { return };

        let from = task.state.kind();
        let to = new.kind();
        task.state = new;

        if from != to {
            *self.metrics.transitions.entry((from, to)).or_insert(0) += 1;
            tracing::trace!(task = %id, %from, %to, "state transition");
        }
    }

    /// Wakes every sleeping task whose deadline has arrived.
    fn wake_sleepers(&mut self) {
        let now = self.tick_count;
        let due: Vec<TaskId> = self.tasks.values()
            .filter_map(|t| match t.state {
                TaskState::Sleeping { until } if until <= now => Some(t.id),
                _ => None,
            })
            .collect();

        for id in due {
            self.set_state(id, TaskState::Ready);
            if let Some(t) = self.tasks.get_mut(&id) {
                t.wait_ticks = 0;
            }
            tracing::debug!(task = %id, tick = now, "sleep expired");
        }
    }

    /// Bumps wait counters and applies the periodic aging boost.
    fn apply_aging(&mut self) {
        for t in self.tasks.values_mut() {
            if t.state == TaskState::Ready {
                t.wait_ticks += 1;
            }
        }

        let Aging { enabled, interval, threshold } = self.config.aging;
        if !enabled || interval == 0 || self.tick_count % interval != 0 {
            return;
        }

        for t in self.tasks.values_mut() {
            if t.state != TaskState::Ready || t.wait_ticks < threshold {
                continue;
            }
            if t.priority > MIN_PRIORITY {
                t.priority -= 1;
                tracing::trace!(task = %t.id, priority = t.priority, "aged");
            }
            t.wait_ticks = 0;
        }
    }

    /// Performs a context switch against the register file.
    ///
    /// The outgoing task (if any) gets the current register snapshot saved
    /// into it; if it was still RUNNING it becomes READY. The incoming task
    /// (if any) gets its snapshot restored, or its CPU state initialized from
    /// its entry point and a fresh stack pointer on first dispatch.
    fn context_switch(&mut self, next: Option<TaskId>, preempt: bool, regs: &mut RegFile) {
        if next.is_none() && self.cpu_task.is_none() {
            return;
        }

        if let Some(prev_id) = self.cpu_task.take() {
            let prev_running = match self.tasks.get_mut(&prev_id) {
                Some(prev) if prev.state != TaskState::Terminated => {
                    prev.context = Some(regs.snapshot());
                    prev.state == TaskState::Running
                },
                _ => false,
            };
            if prev_running {
                self.set_state(prev_id, TaskState::Ready);
            }
        }

        let Some(next_id) = next else {
            tracing::debug!("cpu idle");
            return;
        };

        let now = self.tick_count;
        let Some(incoming) = self.tasks.get_mut(&next_id) else { return };

        match &incoming.context {
            Some(ctx) => regs.restore(ctx),
            None => {
                // first dispatch
                regs.reset();
                regs.write(reg_consts::SP, incoming.initial_sp());
                regs.set_pc(incoming.entry_point);
            },
        }

        incoming.run_count += 1;
        incoming.last_run_tick = now;
        incoming.wait_ticks = 0;
        if incoming.priority < incoming.original_priority {
            incoming.priority += 1;
        }

        self.set_state(next_id, TaskState::Running);
        self.cpu_task = Some(next_id);
        self.metrics.context_switches += 1;
        if preempt {
            self.metrics.preemptions += 1;
        }
        tracing::debug!(task = %next_id, preempt, pc = regs.pc(), "context switch");
    }
}

/// A task scheduler: the shared [`Core`] plus a pluggable [`Policy`].
#[derive(Debug)]
pub struct Scheduler {
    core: Core,
    policy: Box<dyn Policy>,
}

impl Scheduler {
    /// Creates a scheduler with the given policy and configuration.
    pub fn new(policy: impl Policy + 'static, config: SchedConfig) -> Self {
        Self {
            core: Core::new(config),
            policy: Box::new(policy),
        }
    }

    /// Creates a task.
    ///
    /// The task starts READY with a freshly reserved stack region; it gets the
    /// next id (ids start at 1 and are never reused within a run).
    ///
    /// # Errors
    /// - [`SimErr::InvalidPriority`] if `priority` is outside
    ///   `[MIN_PRIORITY, MAX_PRIORITY]`.
    /// - [`SimErr::OutOfMemory`] if no stack region of `stack_size` bytes fits.
    pub fn create_task(
        &mut self,
        name: &str,
        priority: u8,
        entry_point: u32,
        stack_size: u32,
    ) -> Result<TaskId, SimErr> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SimErr::InvalidPriority(priority));
        }

        let stack = self.core.stacks.alloc(stack_size)?;
        let id = TaskId(self.core.next_id);
        self.core.next_id += 1;

        let task = Task::new(id, name, priority, entry_point, stack, self.core.tick_count);
        tracing::debug!(task = %id, name, priority, entry = entry_point, "task created");
        self.core.tasks.insert(id, task);
        Ok(id)
    }

    fn state_of(&self, id: TaskId) -> Result<TaskState, SimErr> {
        self.core.tasks.get(&id)
            .map(|t| t.state)
            .ok_or(SimErr::UnknownTask(id))
    }

    /// Terminates a task, freeing its stack region for reuse.
    ///
    /// Idempotent: terminating an already-terminated task is a no-op.
    /// If the task was current, the CPU context it left behind is discarded.
    pub fn terminate(&mut self, id: TaskId) -> Result<(), SimErr> {
        if self.state_of(id)? == TaskState::Terminated {
            return Ok(());
        }

        let stack = self.core.tasks[&id].stack;
        self.core.set_state(id, TaskState::Terminated);
        self.core.stacks.free(stack);
        if self.core.cpu_task == Some(id) {
            self.core.cpu_task = None;
        }
        tracing::debug!(task = %id, "task terminated");
        Ok(())
    }

    /// Blocks a task until [`Scheduler::unblock`] is called on it.
    ///
    /// Blocking a BLOCKED task is a no-op; blocking a sleeping task drops its
    /// wake deadline. Fails with [`SimErr::BadState`] on a terminated task.
    pub fn block(&mut self, id: TaskId) -> Result<(), SimErr> {
        match self.state_of(id)? {
            TaskState::Blocked => Ok(()),
            TaskState::Terminated => Err(SimErr::BadState {
                task: id,
                state: StateKind::Terminated,
                op: "block",
            }),
            _ => {
                self.core.set_state(id, TaskState::Blocked);
                Ok(())
            },
        }
    }

    /// Unblocks a BLOCKED task, making it READY with a fresh wait counter.
    ///
    /// Unblocking a READY task is a no-op. Any other state fails with
    /// [`SimErr::BadState`].
    pub fn unblock(&mut self, id: TaskId) -> Result<(), SimErr> {
        match self.state_of(id)? {
            TaskState::Ready => Ok(()),
            TaskState::Blocked => {
                self.core.set_state(id, TaskState::Ready);
                if let Some(t) = self.core.tasks.get_mut(&id) {
                    t.wait_ticks = 0;
                }
                Ok(())
            },
            other => Err(SimErr::BadState { task: id, state: other.kind(), op: "unblock" }),
        }
    }

    /// Puts a task to sleep for `ticks` ticks.
    ///
    /// A non-positive `ticks` is equivalent to making the task immediately
    /// READY. Sleeping an already-sleeping task re-arms its deadline.
    /// Fails with [`SimErr::BadState`] on a blocked or terminated task.
    pub fn sleep(&mut self, id: TaskId, ticks: i64) -> Result<(), SimErr> {
        match self.state_of(id)? {
            TaskState::Ready | TaskState::Running | TaskState::Sleeping { .. } => {
                if ticks <= 0 {
                    self.core.set_state(id, TaskState::Ready);
                    if let Some(t) = self.core.tasks.get_mut(&id) {
                        t.wait_ticks = 0;
                    }
                } else {
                    let until = self.core.tick_count + ticks as u64;
                    self.core.set_state(id, TaskState::Sleeping { until });
                    tracing::debug!(task = %id, until, "task sleeping");
                }
                Ok(())
            },
            other => Err(SimErr::BadState { task: id, state: other.kind(), op: "sleep" }),
        }
    }

    /// Sets a task's priority (both current and original).
    /// Never changes the task's state.
    pub fn set_priority(&mut self, id: TaskId, priority: u8) -> Result<(), SimErr> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SimErr::InvalidPriority(priority));
        }
        let task = self.core.tasks.get_mut(&id).ok_or(SimErr::UnknownTask(id))?;
        task.priority = priority;
        task.original_priority = priority;
        Ok(())
    }

    /// Advances the scheduler by one tick.
    ///
    /// In order: the tick counter advances, expired sleepers wake, aging is
    /// applied, and the policy's verdict is carried out (possibly context
    /// switching against `regs`).
    pub fn tick(&mut self, regs: &mut RegFile) {
        self.core.tick_count += 1;
        self.core.wake_sleepers();
        self.core.apply_aging();

        match self.policy.decide(&self.core) {
            Verdict::Keep => {},
            Verdict::Dispatch(next) => self.switch_to(Some(next), false, regs),
            Verdict::Preempt(next)  => self.switch_to(Some(next), true, regs),
            Verdict::Idle           => self.switch_to(None, false, regs),
        }
    }

    fn switch_to(&mut self, next: Option<TaskId>, preempt: bool, regs: &mut RegFile) {
        self.core.context_switch(next, preempt, regs);
        self.policy.on_switch(next);
    }

    /// Charges one executed tick to the running task.
    pub(crate) fn note_cpu_tick(&mut self) {
        let Some(id) = self.core.cpu_task else { return };
        if let Some(t) = self.core.tasks.get_mut(&id) {
            if t.state == TaskState::Running {
                t.cpu_ticks += 1;
            }
        }
    }

    /// The currently RUNNING task, if any.
    pub fn current(&self) -> Option<&Task> {
        self.core.running()
    }

    /// Looks up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.core.task(id)
    }

    /// A snapshot list of all tasks, in ascending id order.
    pub fn tasks(&self) -> Vec<&Task> {
        self.core.tasks().collect()
    }

    /// The current tick count.
    pub fn tick_count(&self) -> u64 {
        self.core.tick_count
    }

    /// A by-value snapshot of the scheduler counters.
    pub fn metrics(&self) -> Metrics {
        self.core.metrics.clone()
    }

    /// A human-readable description of the active policy.
    pub fn scheduler_type(&self) -> String {
        self.policy.label()
    }

    /// Shared read access to the scheduler core (task queries for display
    /// front-ends and custom policies).
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// The aging configuration.
    pub fn aging(&self) -> Aging {
        self.core.config.aging
    }

    /// Replaces the aging configuration.
    pub fn set_aging(&mut self, aging: Aging) {
        self.core.config.aging = aging;
    }

    /// Drops every task and zeroes all counters and metrics.
    /// The policy and configuration are kept.
    pub fn reset(&mut self) {
        self.core = Core::new(self.core.config);
        self.policy.on_reset();
    }
}

/// Creates a scheduler from a policy tag.
///
/// Recognized tags are `"priority"`, `"round-robin"` and `"fcfs"`;
/// `time_slice` applies to round-robin only (0 selects the default slice).
///
/// # Errors
/// [`SimErr::UnknownScheduler`] for any other tag.
pub fn create_scheduler(
    kind: &str,
    config: SchedConfig,
    time_slice: u64,
) -> Result<Scheduler, SimErr> {
    match kind {
        "priority"    => Ok(Scheduler::new(PriorityPolicy, config)),
        "round-robin" => Ok(Scheduler::new(RoundRobinPolicy::new(time_slice), config)),
        "fcfs"        => Ok(Scheduler::new(FcfsPolicy, config)),
        _ => Err(SimErr::UnknownScheduler(kind.to_string())),
    }
}

/// The policy tags recognized by [`create_scheduler`].
pub const SCHEDULER_KINDS: [&str; 3] = ["priority", "round-robin", "fcfs"];
