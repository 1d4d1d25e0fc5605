//! Driving the simulator's tick loop.
//!
//! The simulator itself only exposes [`Simulator::tick`]; this module supplies
//! the drivers front-ends build on:
//! - [`Clock`]: step and continuous driving on the caller's thread, with an
//!   optional per-tick pacing period and an externally shared stop flag.
//! - [`RunningClock`]: continuous driving on a background thread, fed
//!   between-tick commands over a channel.
//!
//! All timing lives out here: the core's notion of time is the tick counter,
//! and only the clock ever touches wall-clock time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cbc;

use crate::sim::Simulator;

/// A queued mutation applied to the simulator between ticks.
pub type Command = Box<dyn FnOnce(&mut Simulator) + Send + 'static>;

/// Drives a [`Simulator`] tick by tick.
///
/// The clock holds a shared run flag: cloning it out via [`Clock::run_flag`]
/// lets another thread stop a continuous run by storing `false`.
///
/// # Usage
///
/// ```
/// use rv32_multitask::clock::Clock;
/// use rv32_multitask::sim::{SimFlags, Simulator};
///
/// let mut sim = Simulator::new(SimFlags { mem_size: 1 << 16, ..Default::default() });
/// sim.scheduler_mut().create_task("worker", 5, 0x1000, 1024).unwrap();
///
/// let mut clock = Clock::new();
/// clock.step(&mut sim);
/// clock.run_ticks(&mut sim, 9);
/// assert_eq!(sim.ticks(), 10);
/// ```
#[derive(Debug)]
pub struct Clock {
    period: Option<Duration>,
    running: Arc<AtomicBool>,
}

impl Clock {
    /// Creates an unpaced clock (continuous runs tick as fast as they can).
    pub fn new() -> Self {
        Self { period: None, running: Arc::default() }
    }

    /// Creates a clock that sleeps `period` between ticks in continuous runs.
    pub fn with_period(period: Duration) -> Self {
        Self { period: Some(period), running: Arc::default() }
    }

    /// Changes the pacing period (`None` removes pacing).
    pub fn set_period(&mut self, period: Option<Duration>) {
        self.period = period;
    }

    /// The shared run flag. Storing `false` into it stops a continuous run
    /// after the current tick.
    pub fn run_flag(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    /// Advances the simulator by exactly one tick, without pacing.
    pub fn step(&self, sim: &mut Simulator) {
        sim.tick();
    }

    /// Runs until the run flag drops or the tripwire returns false.
    ///
    /// The tripwire is checked before every tick, so a tripwire that is
    /// immediately false runs nothing.
    pub fn run_while(&self, sim: &mut Simulator, mut tripwire: impl FnMut(&mut Simulator) -> bool) {
        self.running.store(true, Ordering::Relaxed);

        while self.running.load(Ordering::Relaxed) && tripwire(sim) {
            sim.tick();
            if let Some(period) = self.period {
                std::thread::sleep(period);
            }
        }

        self.running.store(false, Ordering::Release);
    }

    /// Runs exactly `n` ticks (or fewer, if the run flag is dropped).
    pub fn run_ticks(&self, sim: &mut Simulator, n: u64) {
        let mut left = n;
        self.run_while(sim, |_| {
            match left {
                0 => false,
                _ => {
                    left -= 1;
                    true
                },
            }
        });
    }

    /// Moves the simulator onto a background thread and runs it continuously,
    /// returning a [`RunningClock`] to talk to it.
    pub fn spawn(self, mut sim: Simulator) -> RunningClock {
        let running = self.running;
        running.store(true, Ordering::Relaxed);

        let (tx, rx) = cbc::unbounded::<Command>();
        let period = self.period;
        let flag = Arc::clone(&running);

        let handle = std::thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                // external mutations are serialized between ticks
                while let Ok(cmd) = rx.try_recv() {
                    cmd(&mut sim);
                }
                sim.tick();
                if let Some(period) = period {
                    std::thread::sleep(period);
                }
            }
            // drain once more so nothing queued before the stop is lost
            while let Ok(cmd) = rx.try_recv() {
                cmd(&mut sim);
            }
            sim
        });

        RunningClock { tx, running, handle }
    }
}
impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A continuously running simulation on a background thread.
///
/// Produced by [`Clock::spawn`]. Commands sent with [`RunningClock::send`]
/// are applied between ticks, so each one observes a consistent snapshot;
/// [`RunningClock::stop`] shuts the loop down and hands the simulator back.
#[derive(Debug)]
pub struct RunningClock {
    tx: cbc::Sender<Command>,
    running: Arc<AtomicBool>,
    handle: JoinHandle<Simulator>,
}

impl RunningClock {
    /// Queues a mutation to run between ticks.
    ///
    /// Returns false if the loop is no longer accepting commands.
    pub fn send(&self, cmd: impl FnOnce(&mut Simulator) + Send + 'static) -> bool {
        self.tx.send(Box::new(cmd)).is_ok()
    }

    /// The shared run flag (storing `false` stops the loop, as does
    /// [`RunningClock::stop`]).
    pub fn run_flag(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    /// Stops the loop and returns the simulator.
    ///
    /// Any command queued before the stop is still applied.
    pub fn stop(self) -> Simulator {
        self.running.store(false, Ordering::Relaxed);
        match self.handle.join() {
            Ok(sim) => sim,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::sim::{SimFlags, Simulator};

    use super::Clock;

    fn small_sim() -> Simulator {
        Simulator::new(SimFlags { mem_size: 1 << 16, timer_period: 0 })
    }

    #[test]
    fn step_and_run_ticks_advance_exactly() {
        let mut sim = small_sim();
        let clock = Clock::new();

        clock.step(&mut sim);
        assert_eq!(sim.ticks(), 1);

        clock.run_ticks(&mut sim, 41);
        assert_eq!(sim.ticks(), 42);
    }

    #[test]
    fn tripwire_stops_the_run() {
        let mut sim = small_sim();
        let clock = Clock::new();

        clock.run_while(&mut sim, |sim| sim.ticks() < 7);
        assert_eq!(sim.ticks(), 7);
        assert!(!clock.run_flag().load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn spawned_clock_applies_commands_between_ticks() {
        let mut sim = small_sim();
        sim.scheduler_mut().create_task("spin", 5, 0x1000, 256).unwrap();

        let clock = Clock::with_period(Duration::from_millis(1));
        let running = clock.spawn(sim);

        // the command confirms over a channel once it has run inside the loop;
        // a tick always follows a drained command, so the preemption is certain
        let (applied_tx, applied_rx) = crossbeam_channel::bounded(1);
        assert!(running.send(move |sim| {
            sim.scheduler_mut().create_task("late", 3, 0x2000, 256).unwrap();
            let _ = applied_tx.send(());
        }));
        applied_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("command was never applied");

        let sim = running.stop();
        assert!(sim.ticks() > 0);
        assert_eq!(sim.scheduler().tasks().len(), 2);
        // the late, higher-priority task preempted the spinner
        assert!(sim.scheduler().metrics().preemptions >= 1);
    }
}
