//! The interrupt controller for the simulated hart.
//!
//! This module consists of:
//! - [`Interrupt`]: One registered interrupt line and its pending bit.
//! - [`InterruptController`]: Registration, triggering, masking, and priority selection.
//!
//! The controller pre-registers the three standard RISC-V interrupt lines
//! ([`SOFTWARE`], [`TIMER`], [`EXTERNAL`]) at construction. By convention the
//! priority *value* of a standard line equals its id, and a lower value wins.

use super::SimErr;

/// Standard id of the machine software interrupt.
pub const SOFTWARE: u32 = 3;
/// Standard id of the machine timer interrupt.
pub const TIMER: u32 = 7;
/// Standard id of the machine external interrupt.
pub const EXTERNAL: u32 = 11;

/// One interrupt line known to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    /// Interrupt id.
    pub id: u32,
    /// Priority value. Lower value = higher priority.
    pub priority: u32,
    /// The PC value the hart jumps to when this interrupt is dispatched.
    pub handler: u32,
    /// Human-readable description, for display front-ends.
    pub description: String,
    /// Whether this line is currently pending.
    pub pending: bool,
}

/// The interrupt controller.
///
/// The controller keeps a small registration table and a pending bit per line.
/// Triggering always records the pending bit, even while the controller is
/// disabled; disabling only suppresses *dispatch* (i.e., [`has_pending`] and
/// [`highest_pending`] act as if nothing is pending).
///
/// [`has_pending`]: InterruptController::has_pending
/// [`highest_pending`]: InterruptController::highest_pending
#[derive(Debug, Clone)]
pub struct InterruptController {
    lines: Vec<Interrupt>,
    enabled: bool,
}
impl InterruptController {
    /// Creates a controller with the standard RISC-V lines registered and
    /// dispatch enabled.
    ///
    /// The standard lines are software (id 3, handler `0x300`), timer
    /// (id 7, handler `0x100`), and external (id 11, handler `0x200`),
    /// each with priority equal to its id.
    pub fn new() -> Self {
        let mut ctl = Self { lines: Vec::new(), enabled: true };
        ctl.register(SOFTWARE, SOFTWARE, 0x300, "Software Interrupt");
        ctl.register(TIMER,    TIMER,    0x100, "Timer Interrupt");
        ctl.register(EXTERNAL, EXTERNAL, 0x200, "External Interrupt");
        ctl
    }

    /// Registers an interrupt line (not pending).
    ///
    /// Registering an id that already exists replaces that line,
    /// clearing its pending bit.
    pub fn register(&mut self, id: u32, priority: u32, handler: u32, description: &str) {
        let line = Interrupt {
            id,
            priority,
            handler,
            description: description.to_string(),
            pending: false,
        };
        match self.lines.iter_mut().find(|l| l.id == id) {
            Some(slot) => *slot = line,
            None       => self.lines.push(line),
        }
    }

    fn line_mut(&mut self, id: u32) -> Result<&mut Interrupt, SimErr> {
        self.lines.iter_mut()
            .find(|l| l.id == id)
            .ok_or(SimErr::UnknownInterrupt(id))
    }

    /// Marks the line with the given id pending.
    ///
    /// The pending bit is recorded even while the controller is disabled.
    pub fn trigger(&mut self, id: u32) -> Result<(), SimErr> {
        self.line_mut(id)?.pending = true;
        Ok(())
    }

    /// Clears the pending bit of the line with the given id.
    pub fn clear(&mut self, id: u32) -> Result<(), SimErr> {
        self.line_mut(id)?.pending = false;
        Ok(())
    }

    /// Whether any line is pending. Always false while disabled.
    pub fn has_pending(&self) -> bool {
        self.enabled && self.lines.iter().any(|l| l.pending)
    }

    /// The pending line with the minimum priority value, ties broken by
    /// lowest id. `None` if nothing is pending or the controller is disabled.
    pub fn highest_pending(&self) -> Option<&Interrupt> {
        if !self.enabled {
            return None;
        }
        self.lines.iter()
            .filter(|l| l.pending)
            .min_by_key(|l| (l.priority, l.id))
    }

    /// Takes the highest-priority pending interrupt, clearing its pending bit.
    ///
    /// This is the dispatch half of the tick pipeline: the simulator
    /// acknowledges a line and jumps to its handler.
    pub fn acknowledge(&mut self) -> Option<Interrupt> {
        if !self.enabled {
            return None;
        }
        let taken = self.lines.iter_mut()
            .filter(|l| l.pending)
            .min_by_key(|l| (l.priority, l.id))?;

        taken.pending = false;
        Some(taken.clone())
    }

    /// Enables dispatch.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disables dispatch. Pending bits keep accumulating.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether dispatch is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Clears every pending bit and re-enables dispatch.
    /// Registrations are kept.
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.pending = false;
        }
        self.enabled = true;
    }

    /// The registered lines, in registration order.
    pub fn lines(&self) -> &[Interrupt] {
        &self.lines
    }
}
impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}
