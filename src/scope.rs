//! Wires the hardware, the shared state and the task roster onto two cores

use std::{
    sync::{atomic::AtomicBool, Arc},
    thread::JoinHandle,
};

use tracing::info;

use crate::{
    bus::Bus,
    capture::{CapturePeripheral, CapturePipeline},
    config::ScopeConfig,
    dac::{Dac, DacOutput},
    gain::GainSelector,
    input::{InputDevice, RotaryEncoder},
    render::Renderer,
    scheduler::{Clock, Core, RunLoop},
    settings::SettingsSnapshot,
    spectrum::{SpectralAnalyzer, Spectrum},
    tasks::{HousekeepingTask, SpectrumTask, TriggerTask, UiPorts, UiSetup, UiTask},
    trigger::{Frame, TriggerLine, TriggerSynchronizer},
    Result, ScopeError,
};

/// The collaborators the core drives
pub struct Hardware {
    pub capture: Box<dyn CapturePeripheral>,
    pub gain_selector: Box<dyn GainSelector>,
    pub dac: Box<dyn Dac>,
    pub input: Box<dyn InputDevice>,
    pub encoder: Box<dyn RotaryEncoder>,
    pub renderer: Box<dyn Renderer>,
}

pub struct Scope<C: Clock> {
    core_a: RunLoop<C>,
    core_b: RunLoop<C>,
    pipeline: Arc<CapturePipeline>,
    line: TriggerLine,
}

impl<C: Clock> Scope<C> {
    /// `line` is the trigger whose [`crate::trigger::EdgeHandle`] the comparator interrupt holds
    pub fn build(config: ScopeConfig, hw: Hardware, line: TriggerLine, clock: C) -> Result<Self> {
        config.validate()?;
        let pipeline = Arc::new(CapturePipeline::new(
            hw.capture,
            hw.gain_selector,
            config.initial.gain,
            config.sample_rate_divisor,
        )?);

        // Everyone subscribes before the UI task publishes the first snapshot
        let mut settings_bus: Bus<SettingsSnapshot> = Bus::new();
        let mut frame_bus: Bus<Arc<Frame>> = Bus::new();
        let mut spectrum_bus: Bus<Arc<Spectrum>> = Bus::new();
        let trigger_settings = settings_bus.subscribe();
        let housekeeping_settings = settings_bus.subscribe();
        let spectrum_settings = settings_bus.subscribe();
        let ui_frames = frame_bus.subscribe();
        let spectrum_frames = frame_bus.subscribe();
        let ui_spectra = spectrum_bus.subscribe();

        let mut core_a = RunLoop::new(Core::A, clock.clone());
        core_a.spawn(Box::new(TriggerTask::new(
            TriggerSynchronizer::new(line.clone(), config.trigger_mode),
            pipeline.clone(),
            trigger_settings,
            frame_bus,
        )));
        core_a.spawn(Box::new(UiTask::new(
            UiSetup {
                period: config.ui_period,
                initial: config.initial,
                trigger_mode: config.trigger_mode,
                holdoff: config.holdoff,
            },
            hw.input,
            hw.encoder,
            pipeline.clone(),
            DacOutput::new(hw.dac),
            line.clone(),
            UiPorts {
                settings: settings_bus,
                frames: ui_frames,
                spectra: ui_spectra,
            },
            hw.renderer,
        )));

        let mut core_b = RunLoop::new(Core::B, clock);
        core_b.spawn(Box::new(HousekeepingTask::new(
            config.housekeeping_period,
            line.clone(),
            pipeline.clone(),
            housekeeping_settings,
            config.auto_trigger,
        )));
        core_b.spawn(Box::new(SpectrumTask::new(
            SpectralAnalyzer::new(pipeline.sample_rate()),
            spectrum_settings,
            spectrum_frames,
            spectrum_bus,
            config.spectrum_period,
            config.spectrum_idle_period,
        )));

        Ok(Self {
            core_a,
            core_b,
            pipeline,
            line,
        })
    }

    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }

    pub fn trigger(&self) -> &TriggerLine {
        &self.line
    }

    /// Start free-running capture
    pub fn start(&self) -> Result<()> {
        self.pipeline.start()
    }

    /// Both loops, for driving by hand
    pub fn into_run_loops(self) -> (RunLoop<C>, RunLoop<C>) {
        (self.core_a, self.core_b)
    }

    /// Start capture and put each loop on its own thread
    pub fn spawn(self, stop: Arc<AtomicBool>) -> Result<Running> {
        self.start()?;
        let core_a = self.core_a.spawn_on_core(stop.clone())?;
        let core_b = self.core_b.spawn_on_core(stop)?;
        info!("Both cores running");
        Ok(Running { core_a, core_b })
    }
}

pub struct Running {
    core_a: JoinHandle<()>,
    core_b: JoinHandle<()>,
}

impl Running {
    pub fn join(self) -> Result<()> {
        for (core, handle) in [(Core::A, self.core_a), (Core::B, self.core_b)] {
            handle
                .join()
                .map_err(|_| ScopeError::Peripheral(format!("{:?} run loop panicked", core)))?;
        }
        Ok(())
    }
}
