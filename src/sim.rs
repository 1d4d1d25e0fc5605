//! The simulated RISC-V hart and its per-tick pipeline.
//!
//! This module is focused on the CPU substrate the scheduler runs on.
//! It consists of:
//! - [`Simulator`]: The struct owning the CPU state and advancing logical time.
//! - [`mem`]: The module handling byte-addressable memory.
//! - [`reg`]: The module handling the register file.
//! - [`intr`]: The module handling the interrupt controller.

pub mod intr;
pub mod mem;
pub mod reg;

use crate::sched::task::{StateKind, TaskId};
use crate::sched::{SchedConfig, Scheduler};

use self::intr::InterruptController;
use self::mem::Mem;
use self::reg::RegFile;

/// Errors that can occur during simulation and scheduling.
///
/// Every error is returned to the caller at the API boundary; the core never
/// panics or exits on them. A handful of operations are deliberately
/// idempotent instead of failing (re-terminating a task, blocking a blocked
/// task); see the individual scheduler operations for details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimErr {
    /// A task priority outside the valid `[1, 32]` range was supplied.
    InvalidPriority(u8),
    /// The task id is not in the task table.
    UnknownTask(TaskId),
    /// The requested lifecycle transition is not valid from the task's
    /// current state (e.g., unblocking a sleeping task).
    BadState {
        /// The task the operation was applied to.
        task: TaskId,
        /// The state the task was found in.
        state: StateKind,
        /// The operation that was attempted.
        op: &'static str,
    },
    /// No stack region large enough is available.
    OutOfMemory {
        /// The requested stack size in bytes.
        requested: u32,
    },
    /// A memory access poked outside `[0, size)`.
    Bounds {
        /// First address of the access.
        addr: u32,
        /// Length of the access in bytes.
        len: u32,
    },
    /// An operation referenced an interrupt id that was never registered.
    UnknownInterrupt(u32),
    /// The scheduler factory did not recognize the tag.
    UnknownScheduler(String),
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::InvalidPriority(p)      => write!(f, "priority {p} is outside the valid range [1, 32]"),
            SimErr::UnknownTask(id)         => write!(f, "task {id} not found"),
            SimErr::BadState { task, state, op } => write!(f, "cannot {op} task {task} while {state}"),
            SimErr::OutOfMemory { requested }    => write!(f, "no free stack region of {requested} bytes"),
            SimErr::Bounds { addr, len }    => write!(f, "memory access out of bounds: 0x{addr:08x} (+{len} bytes)"),
            SimErr::UnknownInterrupt(id)    => write!(f, "interrupt id {id} not registered"),
            SimErr::UnknownScheduler(tag)   => write!(f, "unknown scheduler type: {tag:?}"),
        }
    }
}
impl std::error::Error for SimErr {}

/// Configuration flags for [`Simulator`].
///
/// `mem_size` only takes effect at [`Simulator::new`]; `timer_period` can be
/// changed at any time and applies from the next tick.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// Size of the simulated memory in bytes.
    pub mem_size: usize,

    /// Every `timer_period` ticks, the TIMER interrupt line goes pending.
    /// 0 disables the timer.
    pub timer_period: u64,
}
impl Default for SimFlags {
    /// The default flags: 1 MiB of memory, timer firing every tick.
    fn default() -> Self {
        Self {
            mem_size: mem::DEFAULT_MEM_SIZE,
            timer_period: 1,
        }
    }
}

/// Simulates a single RISC-V hart running a task scheduler.
///
/// The simulator owns the CPU state (memory, registers, interrupt controller)
/// and the scheduler owns the tasks; they meet once per [`Simulator::tick`].
/// Each tick runs, strictly in order:
///
/// 1. timer bookkeeping (raise TIMER every [`SimFlags::timer_period`] ticks);
/// 2. dispatch of the highest-priority pending interrupt, if any and enabled —
///    dispatch only redirects the PC to the handler address, it does not
///    switch tasks;
/// 3. the scheduler pass: wake expired sleepers, apply aging, carry out the
///    policy decision (possibly a context switch);
/// 4. one opaque execution step of the running task: fetch the word at PC
///    (a fetch from an out-of-bounds PC is silently a no-op), advance PC by 4,
///    and charge the task one tick of CPU time. Skipped while idle.
///
/// # Usage
///
/// ```
/// use rv32_multitask::sim::{SimFlags, Simulator};
///
/// let mut sim = Simulator::new(SimFlags { mem_size: 1 << 16, ..Default::default() });
/// sim.load_program(&[0x13, 0x13, 0x13], 0x1000).unwrap(); // three opaque words
///
/// let worker = sim.scheduler_mut().create_task("worker", 5, 0x1000, 1024).unwrap();
/// sim.tick();
/// assert_eq!(sim.scheduler().current().unwrap().id, worker);
/// ```
#[derive(Debug)]
pub struct Simulator {
    /// The simulator's memory.
    pub mem: Mem,

    /// The simulator's register file.
    pub regs: RegFile,

    /// The interrupt controller.
    pub intr: InterruptController,

    /// The task scheduler. Swappable via [`Simulator::set_scheduler`].
    sched: Scheduler,

    /// Configuration settings for the simulator.
    pub flags: SimFlags,

    /// Ticks advanced since construction or the last [`Simulator::reset`].
    ticks: u64,

    /// Ticks since the TIMER line last went pending.
    timer: u64,
}

impl Simulator {
    /// Creates a simulator with the provided flags and a default
    /// priority scheduler.
    pub fn new(flags: SimFlags) -> Self {
        Self {
            mem: Mem::new(flags.mem_size),
            regs: RegFile::new(),
            intr: InterruptController::new(),
            sched: Scheduler::new(
                crate::sched::policy::PriorityPolicy,
                SchedConfig::for_memory(flags.mem_size),
            ),
            flags,
            ticks: 0,
            timer: 0,
        }
    }

    /// Resets the simulation state: memory and registers are zeroed, pending
    /// interrupt bits are cleared (registrations survive), the scheduler
    /// drops its tasks, and the tick counters restart.
    ///
    /// Flags and the scheduler policy are preserved.
    pub fn reset(&mut self) {
        self.mem.reset();
        self.regs.reset();
        self.intr.reset();
        self.sched.reset();
        self.ticks = 0;
        self.timer = 0;
    }

    /// Writes a sequence of 32-bit words into memory starting at `base`
    /// and points the PC at `base`.
    pub fn load_program(&mut self, words: &[u32], base: u32) -> Result<(), SimErr> {
        for (i, &word) in words.iter().enumerate() {
            let addr = base
                .checked_add(i as u32 * 4)
                .ok_or(SimErr::Bounds { addr: base, len: u32::MAX })?;
            self.mem.write_word(addr, word)?;
        }
        self.regs.set_pc(base);
        Ok(())
    }

    /// Replaces the scheduler. Any tasks in the old scheduler are dropped
    /// with it.
    pub fn set_scheduler(&mut self, sched: Scheduler) {
        self.sched = sched;
    }

    /// The task scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    /// The task scheduler, mutably (task lifecycle operations live here).
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.sched
    }

    /// Ticks advanced since construction or the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances logical time by one tick, running the full pipeline
    /// described on [`Simulator`].
    pub fn tick(&mut self) {
        self.ticks += 1;

        // timer bookkeeping
        if self.flags.timer_period > 0 {
            self.timer += 1;
            if self.timer >= self.flags.timer_period {
                self.timer = 0;
                // the TIMER line is registered at construction and survives resets
                let _ = self.intr.trigger(intr::TIMER);
            }
        }

        // interrupt dispatch redirects the PC; it does not switch tasks
        if let Some(line) = self.intr.acknowledge() {
            tracing::debug!(id = line.id, handler = line.handler, "interrupt dispatched");
            self.regs.set_pc(line.handler);
        }

        // scheduler pass: wakeups, aging, policy decision, context switch
        self.sched.tick(&mut self.regs);

        // one opaque step of the running task. Instruction semantics are not
        // modeled; a fetch from a corrupted PC is a no-op rather than an error.
        if self.sched.current().is_some() {
            let pc = self.regs.pc();
            let _ = self.mem.read_word(pc);
            self.regs.set_pc(pc.wrapping_add(4));
            self.sched.note_cpu_tick();
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
