//! An educational RISC-V-flavored multitasking kernel simulator.
//!
//! This crate simulates a single RV32 hart (register file, byte-addressable
//! memory, interrupt controller) and runs a pluggable task scheduler on top of
//! it. Time advances in discrete logical *ticks*: each tick fires pending
//! interrupts, lets the scheduler wake sleepers, age priorities and possibly
//! context-switch, then executes one opaque step of the running task.
//! Instruction semantics are deliberately not modeled — only register, memory,
//! and PC state is preserved across switches.
//!
//! # Usage
//!
//! Create a simulator, give its scheduler some tasks, and tick:
//!
//! ```
//! use rv32_multitask::sim::{SimFlags, Simulator};
//!
//! let mut sim = Simulator::new(SimFlags { mem_size: 1 << 16, ..Default::default() });
//!
//! let steady = sim.scheduler_mut().create_task("steady", 10, 0x1000, 1024).unwrap();
//! let urgent = sim.scheduler_mut().create_task("urgent", 2, 0x2000, 1024).unwrap();
//!
//! sim.tick();
//! // lower priority value wins: "urgent" is dispatched first
//! assert_eq!(sim.scheduler().current().unwrap().id, urgent);
//!
//! sim.scheduler_mut().sleep(urgent, 5).unwrap();
//! sim.tick();
//! assert_eq!(sim.scheduler().current().unwrap().id, steady);
//! ```
//!
//! Scheduling policy is selected by tag through the factory (or by handing
//! [`sim::Simulator::set_scheduler`] any [`sched::policy::Policy`] impl):
//!
//! ```
//! use rv32_multitask::sched::{create_scheduler, SchedConfig};
//! use rv32_multitask::sim::{SimFlags, Simulator};
//!
//! let flags = SimFlags { mem_size: 1 << 16, ..Default::default() };
//! let mut sim = Simulator::new(flags);
//! let rr = create_scheduler("round-robin", SchedConfig::for_memory(flags.mem_size), 4).unwrap();
//! sim.set_scheduler(rr);
//! assert!(sim.scheduler().scheduler_type().starts_with("Round-Robin"));
//! ```
//!
//! For driving the loop — single-stepping, fixed-rate continuous runs, or a
//! background thread with a command queue — see the [`clock`] module.
#![warn(missing_docs)]

pub mod clock;
pub mod sched;
pub mod sim;
