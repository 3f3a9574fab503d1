//! Trigger-synchronized frame capture.
//!
//! The edge interrupt only ever moves ARMED → FIRED and raises the signal.
//! The consumer task moves FIRED → READY after copying the live ring into
//! the frame buffer, then straight back to ARMED in continuous mode, or
//! holds at READY until someone re-arms.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use tracing::{debug, trace};

use crate::{capture::SampleBuffer, gain::GainSetting, scheduler::Signal, Samples, CAPTURE_DEPTH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerState {
    Armed = 0,
    Fired = 1,
    Ready = 2,
}

impl TriggerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TriggerState::Armed,
            1 => TriggerState::Fired,
            _ => TriggerState::Ready,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriggerMode {
    /// Re-arm as soon as the frame copy is done
    #[default]
    Continuous,
    /// Hold at READY until [`TriggerLine::rearm`]
    HoldOff,
}

/// Counter snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerStats {
    /// Every edge the comparator delivered
    pub edges: u64,
    /// Edges that armed a capture
    pub fired: u64,
    /// Edges dropped because the trigger wasn't armed
    pub ignored: u64,
    /// Signal raises folded into a single consume
    pub coalesced: u64,
    /// Frames copied out of the ring
    pub frames: u64,
    /// Captures thrown away while the ring settled after a gain change
    pub discarded: u64,
    /// Captures forced by the auto-trigger
    pub forced: u64,
}

#[derive(Default)]
struct Counters {
    edges: AtomicU64,
    fired: AtomicU64,
    ignored: AtomicU64,
    coalesced: AtomicU64,
    frames: AtomicU64,
    discarded: AtomicU64,
    forced: AtomicU64,
}

struct TriggerShared {
    state: AtomicU8,
    signal: Arc<Signal>,
    counters: Counters,
}

impl TriggerShared {
    fn fire(&self) -> bool {
        let fired = self
            .state
            .compare_exchange(
                TriggerState::Armed as u8,
                TriggerState::Fired as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();
        if fired {
            self.counters.fired.fetch_add(1, Ordering::Relaxed);
            self.signal.raise();
        } else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
        }
        fired
    }

    fn state(&self) -> TriggerState {
        TriggerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TriggerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Shared trigger state, cheap to clone onto either core
#[derive(Clone)]
pub struct TriggerLine {
    shared: Arc<TriggerShared>,
}

impl Default for TriggerLine {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerLine {
    /// Starts ARMED
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TriggerShared {
                state: AtomicU8::new(TriggerState::Armed as u8),
                signal: Arc::new(Signal::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// The interrupt-side handle
    pub fn edge_handle(&self) -> EdgeHandle {
        EdgeHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.shared.state()
    }

    pub fn signal(&self) -> Arc<Signal> {
        self.shared.signal.clone()
    }

    /// Release a held capture. Only READY → ARMED; anything else is left alone.
    pub fn rearm(&self) -> bool {
        let rearmed = self
            .shared
            .state
            .compare_exchange(
                TriggerState::Ready as u8,
                TriggerState::Armed as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();
        if rearmed {
            debug!("Trigger re-armed");
        }
        rearmed
    }

    /// Fire as if an edge had arrived, for free-running display
    pub fn force(&self) -> bool {
        let fired = self.shared.fire();
        if fired {
            self.shared.counters.forced.fetch_add(1, Ordering::Relaxed);
        }
        fired
    }

    pub fn stats(&self) -> TriggerStats {
        let c = &self.shared.counters;
        TriggerStats {
            edges: c.edges.load(Ordering::Relaxed),
            fired: c.fired.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            frames: c.frames.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            forced: c.forced.load(Ordering::Relaxed),
        }
    }
}

/// Handed to the comparator's edge interrupt
#[derive(Clone)]
pub struct EdgeHandle {
    shared: Arc<TriggerShared>,
}

impl EdgeHandle {
    /// Interrupt context only. ARMED → FIRED plus one signal raise, otherwise nothing.
    pub fn on_edge(&self) -> bool {
        self.shared.counters.edges.fetch_add(1, Ordering::Relaxed);
        self.shared.fire()
    }
}

/// One frozen capture
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Oldest sample first
    pub samples: Samples,
    pub sequence: u64,
    /// Gain in force while the frame was captured
    pub gain: GainSetting,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            samples: [0u8; CAPTURE_DEPTH],
            sequence: 0,
            gain: GainSetting::Low,
        }
    }
}

/// Owns the frame buffer. Only the trigger task holds one of these.
pub struct TriggerSynchronizer {
    line: TriggerLine,
    mode: TriggerMode,
    frame: Frame,
}

impl TriggerSynchronizer {
    pub fn new(line: TriggerLine, mode: TriggerMode) -> Self {
        Self {
            line,
            mode,
            frame: Frame::default(),
        }
    }

    pub fn line(&self) -> &TriggerLine {
        &self.line
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// Record that `raised` signal counts were handled by one consume
    pub fn note_signal(&self, raised: u32) {
        if raised > 1 {
            let extra = (raised - 1) as u64;
            self.line
                .shared
                .counters
                .coalesced
                .fetch_add(extra, Ordering::Relaxed);
            debug!(raised, "Coalesced trigger burst");
        }
    }

    /// Copy the live ring into the frame buffer if the trigger fired.
    /// The frame buffer is untouched in any other state.
    pub fn consume(&mut self, source: &SampleBuffer, gain: GainSetting) -> Option<&Frame> {
        let shared = &self.line.shared;
        if shared.state() != TriggerState::Fired {
            return None;
        }
        source.freeze(&mut self.frame.samples);
        self.frame.sequence += 1;
        self.frame.gain = gain;
        shared.counters.frames.fetch_add(1, Ordering::Relaxed);
        shared.set_state(TriggerState::Ready);
        if self.mode == TriggerMode::Continuous {
            shared.set_state(TriggerState::Armed);
        }
        trace!(sequence = self.frame.sequence, "Frame captured");
        Some(&self.frame)
    }

    /// Drop a fired capture without copying and re-arm
    pub fn discard(&mut self) -> bool {
        let shared = &self.line.shared;
        let discarded = shared
            .state
            .compare_exchange(
                TriggerState::Fired as u8,
                TriggerState::Armed as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();
        if discarded {
            shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
        discarded
    }

    /// Last completed frame, if any capture has happened yet
    pub fn frame(&self) -> Option<&Frame> {
        (self.frame.sequence > 0).then_some(&self.frame)
    }
}
