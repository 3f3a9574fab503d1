//! The fixed task roster.
//!
//! Core A: [`TriggerTask`] (waits on the trigger signal) and [`UiTask`] (~60 Hz).
//! Core B: [`HousekeepingTask`] (~5 Hz) and [`SpectrumTask`] (only busy while
//! the spectrum is on screen).

use std::{sync::Arc, time::Duration};

use num_traits::clamp;
use tracing::{debug, info, trace, warn};

use crate::{
    bus::{Bus, Subscriber, Versioned},
    capture::CapturePipeline,
    dac::{level_for_bias, trigger_level_limit, DacOutput},
    input::{InputDecoder, InputDevice, RotaryEncoder},
    menu::SettingsStateMachine,
    render::{Renderer, ScaleCache, Trace, View},
    scheduler::{Signal, Task, Yield},
    settings::{Dirty, DisplayMode, ScopeSettings, SettingsSnapshot},
    spectrum::{SpectralAnalyzer, Spectrum},
    trigger::{Frame, TriggerLine, TriggerMode, TriggerState, TriggerSynchronizer},
};

fn running(settings: &Subscriber<SettingsSnapshot>) -> bool {
    settings.latest().map_or(true, |s| s.value.running)
}

fn display_mode(settings: &Subscriber<SettingsSnapshot>) -> DisplayMode {
    settings
        .latest()
        .map_or(DisplayMode::Scope, |s| s.value.display_mode)
}

/// Freezes a frame every time the trigger fires
pub struct TriggerTask {
    sync: TriggerSynchronizer,
    signal: Arc<Signal>,
    pipeline: Arc<CapturePipeline>,
    settings: Subscriber<SettingsSnapshot>,
    frames: Bus<Arc<Frame>>,
}

impl TriggerTask {
    pub fn new(
        sync: TriggerSynchronizer,
        pipeline: Arc<CapturePipeline>,
        settings: Subscriber<SettingsSnapshot>,
        frames: Bus<Arc<Frame>>,
    ) -> Self {
        let signal = sync.line().signal();
        Self {
            sync,
            signal,
            pipeline,
            settings,
            frames,
        }
    }
}

impl Task for TriggerTask {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn poll(&mut self, _now: Duration) -> Yield {
        let raised = self.signal.take();
        self.sync.note_signal(raised);
        self.settings.poll();
        if !self.pipeline.is_settled() {
            if self.sync.discard() {
                trace!("Capture straddles a gain change, dropped");
            }
        } else if let Some(frame) = self
            .sync
            .consume(self.pipeline.buffer(), self.pipeline.current_gain())
        {
            // Stopped: keep the trigger cycling but leave the display frozen
            if running(&self.settings) {
                self.frames.publish(Arc::new(frame.clone()));
            }
        }
        Yield::Wait(self.signal.clone())
    }
}

/// Everything the UI task owns besides its collaborators
pub struct UiPorts {
    pub settings: Bus<SettingsSnapshot>,
    pub frames: Subscriber<Arc<Frame>>,
    pub spectra: Subscriber<Arc<Spectrum>>,
}

/// Input → settings state machine → side effects → render, at a steady cadence
pub struct UiTask {
    period: Duration,
    deadline: Option<Duration>,
    input: Box<dyn InputDevice>,
    encoder: Box<dyn RotaryEncoder>,
    decoder: InputDecoder,
    machine: SettingsStateMachine,
    version: u64,
    pipeline: Arc<CapturePipeline>,
    dac: DacOutput,
    line: TriggerLine,
    trigger_mode: TriggerMode,
    holdoff: Duration,
    last_frame_at: Duration,
    ports: UiPorts,
    renderer: Box<dyn Renderer>,
    scale: ScaleCache,
    frame: Option<Arc<Frame>>,
    trace: Option<Trace>,
    spectrum: Option<Arc<Spectrum>>,
    bars: Vec<u16>,
    peak_label: Option<String>,
}

pub struct UiSetup {
    pub period: Duration,
    pub initial: ScopeSettings,
    pub trigger_mode: TriggerMode,
    pub holdoff: Duration,
}

impl UiTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        setup: UiSetup,
        input: Box<dyn InputDevice>,
        encoder: Box<dyn RotaryEncoder>,
        pipeline: Arc<CapturePipeline>,
        mut dac: DacOutput,
        line: TriggerLine,
        ports: UiPorts,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        let initial = Versioned {
            version: 1,
            value: setup.initial,
        };
        if let Err(e) = dac.center_offset() {
            warn!("Offset DAC rejected mid-scale: {}", e);
        }
        // A rejected initial bias is logged inside and the comparator keeps its reset value
        let _ = dac.apply_trigger_level(setup.initial.trigger_level, setup.initial.gain);
        ports.settings.publish(initial.clone());
        Self {
            period: setup.period,
            deadline: None,
            input,
            encoder,
            decoder: InputDecoder::new(),
            machine: SettingsStateMachine::new(setup.initial),
            version: initial.version,
            scale: ScaleCache::new(&initial, pipeline.sample_rate()),
            pipeline,
            dac,
            line,
            trigger_mode: setup.trigger_mode,
            holdoff: setup.holdoff,
            last_frame_at: Duration::ZERO,
            ports,
            renderer,
            frame: None,
            trace: None,
            spectrum: None,
            bars: vec![],
            peak_label: None,
        }
    }

    /// Push gain and trigger changes to the hardware, then pull back into the
    /// machine whatever the hardware did not take
    fn apply(&mut self, before: &ScopeSettings, after: &ScopeSettings) {
        if before.gain != after.gain {
            if let Err(e) = self.pipeline.set_gain(after.gain) {
                let held = self.pipeline.current_gain();
                warn!("Gain change to {:?} failed, staying at {:?}: {}", after.gain, held, e);
                self.machine.set_gain(held);
            }
        }
        let gain = self.machine.settings().gain;
        let level = self.machine.settings().trigger_level;
        if before.gain == gain && before.trigger_level == level {
            return;
        }
        let limit = trigger_level_limit(gain);
        let wanted = clamp(level, -limit, limit);
        let applied = match self.dac.apply_trigger_level(wanted, gain) {
            Ok(_) => wanted,
            Err(e) => {
                // The comparator keeps its previous bias; show what that bias means now
                let held = self
                    .dac
                    .trigger_bias()
                    .map_or(before.trigger_level, |bias| level_for_bias(bias, gain));
                warn!("Trigger level {} not applied, holding {}: {}", wanted, held, e);
                held
            }
        };
        if applied != level {
            debug!(level, applied, ?gain, "Trigger level pulled into DAC range");
            self.machine.set_trigger_level(applied);
        }
    }

    fn next_sleep(&mut self, now: Duration) -> Duration {
        let mut deadline = self.deadline.map_or(now + self.period, |d| d + self.period);
        if deadline <= now {
            // Missed a whole refresh, resync rather than burst
            deadline = now + self.period;
        }
        self.deadline = Some(deadline);
        deadline - now
    }
}

impl Task for UiTask {
    fn name(&self) -> &'static str {
        "ui"
    }

    fn budget(&self) -> Option<Duration> {
        Some(self.period)
    }

    fn poll(&mut self, now: Duration) -> Yield {
        let snapshot = self.input.read();
        let delta = self.encoder.take_delta();
        let before = *self.machine.settings();
        let mut dirty = Dirty::NONE;
        for event in self.decoder.decode(snapshot, delta) {
            dirty |= self.machine.handle(event, now);
        }
        let mut after = *self.machine.settings();
        if after != before {
            self.apply(&before, &after);
            after = *self.machine.settings();
        }
        if after != before {
            self.version += 1;
            let published = Versioned {
                version: self.version,
                value: after,
            };
            self.ports.settings.publish(published.clone());
            if self.scale.refresh(&published) {
                dirty |= Dirty::WAVEFORM | Dirty::CURSORS | Dirty::SPECTRUM;
                self.trace = self.frame.as_ref().map(|f| self.scale.trace(f));
            }
        }

        if self.ports.frames.poll() {
            self.last_frame_at = now;
            if let Some(frame) = self.ports.frames.latest() {
                self.trace = Some(self.scale.trace(frame));
                self.frame = Some(frame.clone());
                dirty |= Dirty::WAVEFORM;
            }
        }
        if self.ports.spectra.poll() || dirty.contains(Dirty::SPECTRUM) {
            if let Some(spectrum) = self.ports.spectra.latest() {
                self.bars = self.scale.spectrum_bars(spectrum);
                self.peak_label = Some(self.scale.peak_label(spectrum));
                self.spectrum = Some(spectrum.clone());
                dirty |= Dirty::SPECTRUM;
            }
        }

        if self.trigger_mode == TriggerMode::HoldOff
            && after.running
            && self.line.state() == TriggerState::Ready
            && now.saturating_sub(self.last_frame_at) >= self.holdoff
        {
            self.line.rearm();
        }

        if !dirty.is_empty() {
            let spectrum_mode = after.display_mode == DisplayMode::Spectrum;
            let view = View {
                settings: self.machine.settings(),
                menu: self.machine.menu(),
                dirty,
                trace: self.trace.as_ref().filter(|_| !spectrum_mode),
                spectrum: self.spectrum.as_deref().filter(|_| spectrum_mode),
                spectrum_bars: Some(self.bars.as_slice()).filter(|_| spectrum_mode),
                peak_label: self.peak_label.as_deref().filter(|_| spectrum_mode),
                cursor_rows: after.cursors_enabled.then(|| {
                    (
                        self.scale.volts_to_y(after.cursor1_volts),
                        self.scale.volts_to_y(after.cursor2_volts),
                    )
                }),
                trigger_row: self.scale.volts_to_y(after.trigger_level),
                trigger_stats: self.line.stats(),
                recording_since: self.machine.recording_since(),
            };
            self.renderer.render(&view);
        }

        Yield::Sleep(self.next_sleep(now))
    }
}

/// Low-rate bookkeeping: capture health, auto-trigger, periodic stats
pub struct HousekeepingTask {
    period: Duration,
    line: TriggerLine,
    pipeline: Arc<CapturePipeline>,
    settings: Subscriber<SettingsSnapshot>,
    auto_trigger: Option<Duration>,
    last_frames: u64,
    last_progress: Duration,
    last_blocks: u64,
    ticks: u64,
}

/// Ticks between status reports
const REPORT_EVERY: u64 = 5;

impl HousekeepingTask {
    pub fn new(
        period: Duration,
        line: TriggerLine,
        pipeline: Arc<CapturePipeline>,
        settings: Subscriber<SettingsSnapshot>,
        auto_trigger: Option<Duration>,
    ) -> Self {
        Self {
            period,
            line,
            pipeline,
            settings,
            auto_trigger,
            last_frames: 0,
            last_progress: Duration::ZERO,
            last_blocks: 0,
            ticks: 0,
        }
    }
}

impl Task for HousekeepingTask {
    fn name(&self) -> &'static str {
        "housekeeping"
    }

    fn poll(&mut self, now: Duration) -> Yield {
        self.settings.poll();
        self.ticks += 1;
        let stats = self.line.stats();
        if stats.frames != self.last_frames {
            self.last_frames = stats.frames;
            self.last_progress = now;
        } else if let Some(timeout) = self.auto_trigger {
            if running(&self.settings)
                && now.saturating_sub(self.last_progress) >= timeout
                && self.line.state() == TriggerState::Armed
            {
                if self.line.force() {
                    debug!("No edge within {:?}, forcing a capture", timeout);
                }
                self.last_progress = now;
            }
        }

        if self.ticks % REPORT_EVERY == 0 {
            let blocks = self.pipeline.buffer().blocks_completed();
            if blocks == self.last_blocks {
                debug!("No capture blocks completed since last report");
            }
            self.last_blocks = blocks;
            info!(
                blocks,
                gain = self.pipeline.current_gain().label(),
                edges = stats.edges,
                fired = stats.fired,
                ignored = stats.ignored,
                coalesced = stats.coalesced,
                frames = stats.frames,
                discarded = stats.discarded,
                forced = stats.forced,
                "Status"
            );
        }
        Yield::Sleep(self.period)
    }
}

/// Spectrum of the newest frame, only while the spectrum is displayed
pub struct SpectrumTask {
    analyzer: SpectralAnalyzer,
    settings: Subscriber<SettingsSnapshot>,
    frames: Subscriber<Arc<Frame>>,
    spectra: Bus<Arc<Spectrum>>,
    last_sequence: u64,
    period: Duration,
    idle_period: Duration,
}

impl SpectrumTask {
    pub fn new(
        analyzer: SpectralAnalyzer,
        settings: Subscriber<SettingsSnapshot>,
        frames: Subscriber<Arc<Frame>>,
        spectra: Bus<Arc<Spectrum>>,
        period: Duration,
        idle_period: Duration,
    ) -> Self {
        Self {
            analyzer,
            settings,
            frames,
            spectra,
            last_sequence: 0,
            period,
            idle_period,
        }
    }
}

impl Task for SpectrumTask {
    fn name(&self) -> &'static str {
        "spectrum"
    }

    fn budget(&self) -> Option<Duration> {
        Some(self.period)
    }

    fn poll(&mut self, _now: Duration) -> Yield {
        self.settings.poll();
        if display_mode(&self.settings) != DisplayMode::Spectrum {
            return Yield::Sleep(self.idle_period);
        }
        self.frames.poll();
        if let Some(frame) = self.frames.latest() {
            if frame.sequence != self.last_sequence {
                self.last_sequence = frame.sequence;
                let spectrum = self.analyzer.analyze(frame);
                trace!(
                    sequence = frame.sequence,
                    peak_hz = spectrum.peak_frequency(),
                    "Spectrum"
                );
                self.spectra.publish(Arc::new(spectrum));
            }
        }
        Yield::Sleep(self.period)
    }
}
