//! Cooperative run loops, one per core.
//!
//! Each loop owns a fixed roster of [`Task`]s and visits them round robin.
//! A task step always ends by handing back a [`Yield`], so a task can't hold
//! its core past the end of a step. There is no preemption; an edge interrupt
//! is the only thing that runs concurrently with a step.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::Result;

/// Longest a loop idles between readiness checks when a task waits on a signal
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Counting signal raised from interrupt context and consumed by one task.
///
/// Raises that land before the consumer runs accumulate in the count. The
/// consumer decides whether to take them one at a time or all at once.
#[derive(Debug, Default)]
pub struct Signal {
    count: AtomicU32,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt safe: no blocking, no allocation. Returns the new count.
    pub fn raise(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Release) + 1
    }

    pub fn pending(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Takes every pending raise at once, returning how many there were
    pub fn take(&self) -> u32 {
        self.count.swap(0, Ordering::Acquire)
    }

    /// Takes a single raise if there is one
    pub fn take_one(&self) -> bool {
        self.count
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }
}

/// Monotonic time since boot
pub trait Clock: Send + Clone + 'static {
    fn now(&self) -> Duration;
}

#[derive(Clone, Debug)]
pub struct SystemClock {
    boot: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.boot.elapsed()
    }
}

/// Clock that only moves when told to, for deterministic tests
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::AcqRel);
    }

    pub fn set(&self, to: Duration) {
        self.micros.store(to.as_micros() as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Acquire))
    }
}

/// How a task gives its core back
#[derive(Debug, Clone)]
pub enum Yield {
    /// Resume no sooner than this long from now
    Sleep(Duration),
    /// Resume once the signal has been raised
    Wait(Arc<Signal>),
}

pub trait Task: Send {
    fn name(&self) -> &'static str;

    /// Run one step. Must return promptly.
    fn poll(&mut self, now: Duration) -> Yield;

    /// Soft deadline for a single step
    fn budget(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
    A,
    B,
}

impl Core {
    pub fn thread_name(self) -> &'static str {
        match self {
            Core::A => "core-a",
            Core::B => "core-b",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskStats {
    pub runs: u64,
    pub overruns: u64,
    pub longest: Duration,
}

enum Wake {
    At(Duration),
    On(Arc<Signal>),
}

struct Slot {
    task: Box<dyn Task>,
    wake: Wake,
    stats: TaskStats,
}

impl Slot {
    fn ready(&self, now: Duration) -> bool {
        match &self.wake {
            Wake::At(at) => now >= *at,
            Wake::On(signal) => signal.pending() > 0,
        }
    }
}

pub struct RunLoop<C: Clock> {
    core: Core,
    clock: C,
    slots: Vec<Slot>,
}

impl<C: Clock> RunLoop<C> {
    pub fn new(core: Core, clock: C) -> Self {
        Self {
            core,
            clock,
            slots: vec![],
        }
    }

    /// Add a task to the roster. It becomes ready immediately.
    pub fn spawn(&mut self, task: Box<dyn Task>) {
        debug!(core = ?self.core, task = task.name(), "Task added");
        self.slots.push(Slot {
            task,
            wake: Wake::At(Duration::ZERO),
            stats: TaskStats::default(),
        });
    }

    pub fn core(&self) -> Core {
        self.core
    }

    /// One round-robin pass over the roster. Returns how many tasks ran.
    pub fn run_once(&mut self) -> usize {
        let mut ran = 0;
        for slot in self.slots.iter_mut() {
            let now = self.clock.now();
            if !slot.ready(now) {
                continue;
            }
            let yielded = slot.task.poll(now);
            let after = self.clock.now();
            let elapsed = after.saturating_sub(now);
            slot.stats.runs += 1;
            slot.stats.longest = slot.stats.longest.max(elapsed);
            if let Some(budget) = slot.task.budget() {
                if elapsed > budget {
                    slot.stats.overruns += 1;
                    warn!(
                        core = ?self.core,
                        task = slot.task.name(),
                        elapsed_us = elapsed.as_micros() as u64,
                        budget_us = budget.as_micros() as u64,
                        "Task overran its budget"
                    );
                }
            }
            slot.wake = match yielded {
                Yield::Sleep(delay) => Wake::At(now + delay),
                Yield::Wait(signal) => Wake::On(signal),
            };
            ran += 1;
        }
        ran
    }

    /// Earliest time-based wake-up on this core, if any task is sleeping
    pub fn next_wake(&self) -> Option<Duration> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.wake {
                Wake::At(at) => Some(at),
                Wake::On(_) => None,
            })
            .min()
    }

    fn idle(&self) {
        let now = self.clock.now();
        let waiting_on_signal = self.slots.iter().any(|s| matches!(s.wake, Wake::On(_)));
        let mut nap = self
            .next_wake()
            .map(|at| at.saturating_sub(now))
            .unwrap_or(SIGNAL_POLL_INTERVAL);
        if waiting_on_signal {
            nap = nap.min(SIGNAL_POLL_INTERVAL);
        }
        if !nap.is_zero() {
            thread::sleep(nap);
        }
    }

    pub fn stats(&self) -> impl Iterator<Item = (&'static str, TaskStats)> + '_ {
        self.slots.iter().map(|s| (s.task.name(), s.stats))
    }

    /// Run until `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(core = ?self.core, tasks = self.slots.len(), "Run loop started");
        while !stop.load(Ordering::Acquire) {
            if self.run_once() == 0 {
                self.idle();
            }
        }
        for (name, stats) in self.stats() {
            info!(
                core = ?self.core,
                task = name,
                runs = stats.runs,
                overruns = stats.overruns,
                longest_us = stats.longest.as_micros() as u64,
                "Run loop stopped"
            );
        }
    }
}

impl<C: Clock> RunLoop<C> {
    /// Pin this loop to its own thread
    pub fn spawn_on_core(mut self, stop: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(self.core.thread_name().to_owned())
            .spawn(move || self.run(&stop))?;
        Ok(handle)
    }
}
