//! A software bench standing in for the board: signal source, ADC + DMA,
//! trigger comparator, gain switch, DAC, buttons/encoder and a display that
//! only logs.

use std::{
    f32::consts::PI,
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, info, trace, warn};

use crate::{
    capture::{CapturePeripheral, DmaChain, SampleBuffer},
    dac::Dac,
    gain::{GainSelector, GainSetting},
    input::{Button, EncoderCounter, InputDevice, InputSnapshot},
    render::{Renderer, View},
    sample_rate,
    trigger::EdgeHandle,
    Result, ScopeError, CAPTURE_DEPTH, FULL_SCALE_CODE, REFERENCE_VOLTAGE,
};

/// Entries in the ADC's conversion FIFO
const ADC_FIFO_DEPTH: usize = 4;

/// Sine source at the probe tip
#[derive(Clone, Copy, Debug)]
pub struct SignalGenerator {
    pub frequency_hz: f32,
    /// Peak input volts
    pub amplitude: f32,
}

impl SignalGenerator {
    pub fn at(&self, t: f64) -> f32 {
        self.amplitude * (2.0 * PI as f64 * self.frequency_hz as f64 * t).sin() as f32
    }
}

/// Analog state shared by the bench parts: the switch position and the comparator threshold
#[derive(Default)]
struct Analog {
    gain_code: AtomicU8,
    trigger_bias: AtomicU32,
}

impl Analog {
    fn gain(&self) -> GainSetting {
        let code = self.gain_code.load(Ordering::Acquire);
        GainSetting::ALL
            .into_iter()
            .find(|g| g.selector_code() == code)
            .unwrap_or_default()
    }

    fn bias(&self) -> f32 {
        f32::from_bits(self.trigger_bias.load(Ordering::Acquire))
    }
}

#[derive(Clone, Default)]
pub struct Bench {
    analog: Arc<Analog>,
}

impl Bench {
    pub fn new() -> Self {
        let bench = Self::default();
        bench
            .analog
            .trigger_bias
            .store((REFERENCE_VOLTAGE / 2.0).to_bits(), Ordering::Release);
        bench
    }

    pub fn gain_selector(&self) -> SimGainSelector {
        SimGainSelector {
            analog: self.analog.clone(),
        }
    }

    pub fn dac(&self) -> SimDac {
        SimDac {
            analog: self.analog.clone(),
        }
    }

    pub fn adc(&self, generator: SignalGenerator, edge: EdgeHandle) -> SimulatedAdc {
        SimulatedAdc {
            analog: self.analog.clone(),
            generator,
            edge,
            divisor: 0.0,
        }
    }

    /// Comparator threshold currently on the DAC
    pub fn trigger_bias(&self) -> f32 {
        self.analog.bias()
    }

    pub fn gain(&self) -> GainSetting {
        self.analog.gain()
    }
}

pub struct SimGainSelector {
    analog: Arc<Analog>,
}

impl GainSelector for SimGainSelector {
    fn select(&mut self, code: u8) -> Result<()> {
        if code > 0b10 {
            return Err(ScopeError::Peripheral(format!("no gain path for code {:#04b}", code)));
        }
        self.analog.gain_code.store(code, Ordering::Release);
        Ok(())
    }
}

pub struct SimDac {
    analog: Arc<Analog>,
}

impl Dac for SimDac {
    fn write(&mut self, word: u16) -> Result<()> {
        let volts = (word & 0x0FFF) as f32 * REFERENCE_VOLTAGE / 4095.0;
        // Bit 15 selects VOUT_B; only VOUT_A feeds the comparator
        if word & 0x8000 == 0 {
            self.analog
                .trigger_bias
                .store(volts.to_bits(), Ordering::Release);
        }
        Ok(())
    }
}

/// ADC + chained DMA on its own thread, with the trigger comparator watching
/// the amplified signal
pub struct SimulatedAdc {
    analog: Arc<Analog>,
    generator: SignalGenerator,
    edge: EdgeHandle,
    divisor: f32,
}

impl CapturePeripheral for SimulatedAdc {
    fn configure(&mut self, sample_rate_divisor: f32, depth: usize) -> Result<()> {
        if depth != CAPTURE_DEPTH {
            return Err(ScopeError::InvalidConfig(format!(
                "capture depth {} unsupported",
                depth
            )));
        }
        self.divisor = sample_rate_divisor;
        Ok(())
    }

    fn start(&mut self, buffer: SampleBuffer) -> Result<()> {
        let analog = self.analog.clone();
        let generator = self.generator;
        let edge = self.edge.clone();
        let rate = sample_rate(self.divisor);
        thread::Builder::new()
            .name("adc".to_owned())
            .spawn(move || run_adc(analog, generator, edge, rate, buffer))?;
        Ok(())
    }
}

fn run_adc(
    analog: Arc<Analog>,
    generator: SignalGenerator,
    edge: EdgeHandle,
    rate: f32,
    buffer: SampleBuffer,
) -> ! {
    let (mut fifo_in, mut fifo_out) = rtrb::RingBuffer::<u8>::new(ADC_FIFO_DEPTH);
    let mut dma = DmaChain::new(buffer);
    let block_period = Duration::from_secs_f32(CAPTURE_DEPTH as f32 / rate);
    let mid = REFERENCE_VOLTAGE / 2.0;
    let mut n = 0u64;
    let mut above = false;
    info!(rate, "Simulated ADC running");
    loop {
        for _ in 0..CAPTURE_DEPTH {
            let t = n as f64 / rate as f64;
            n += 1;
            let adc_volts = (mid + generator.at(t) * analog.gain().scale_factor())
                .clamp(0.0, REFERENCE_VOLTAGE);
            // Rising edge through the DAC threshold
            let now_above = adc_volts > analog.bias();
            if now_above && !above {
                edge.on_edge();
            }
            above = now_above;
            let code = (adc_volts / REFERENCE_VOLTAGE * FULL_SCALE_CODE).min(255.0) as u8;
            if fifo_in.push(code).is_err() {
                warn!("ADC FIFO overflow");
            }
            // DREQ: the data channel drains the FIFO as soon as samples land
            while let Ok(code) = fifo_out.pop() {
                dma.transfer(code);
            }
        }
        thread::sleep(block_period);
    }
}

/// One stretch of the input script
#[derive(Clone, Copy, Debug)]
pub struct Step {
    pub polls: u32,
    pub snapshot: InputSnapshot,
    /// Encoder detents delivered at the start of the step
    pub detents: i32,
}

impl Step {
    pub fn idle(polls: u32) -> Vec<Step> {
        vec![Step {
            polls,
            snapshot: InputSnapshot::default(),
            detents: 0,
        }]
    }

    pub fn press(button: Button) -> Vec<Step> {
        vec![
            Step {
                polls: 4,
                snapshot: InputSnapshot::pressed(&[button]),
                detents: 0,
            },
            Step {
                polls: 4,
                snapshot: InputSnapshot::default(),
                detents: 0,
            },
        ]
    }

    pub fn hold(button: Button, polls: u32) -> Vec<Step> {
        let mut steps = vec![Step {
            polls,
            snapshot: InputSnapshot::pressed(&[button]),
            detents: 0,
        }];
        steps.extend(Step::idle(4));
        steps
    }

    fn joystick(axis_y: u16) -> Vec<Step> {
        vec![
            Step {
                polls: 2,
                snapshot: InputSnapshot::default().with_axis_y(axis_y),
                detents: 0,
            },
            Step {
                polls: 2,
                snapshot: InputSnapshot::default(),
                detents: 0,
            },
        ]
    }

    pub fn next() -> Vec<Step> {
        Self::joystick(1000)
    }

    pub fn previous() -> Vec<Step> {
        Self::joystick(20)
    }

    pub fn rotate(detents: i32) -> Vec<Step> {
        vec![Step {
            polls: 1,
            snapshot: InputSnapshot::default(),
            detents,
        }]
    }
}

/// Plays back a fixed script, one snapshot per poll, turning the encoder
/// through its interrupt-side counter
pub struct ScriptedInput {
    steps: Vec<Step>,
    idx: usize,
    left: u32,
    encoder: EncoderCounter,
}

impl ScriptedInput {
    pub fn new(steps: Vec<Step>, encoder: EncoderCounter) -> Self {
        Self {
            steps,
            idx: 0,
            left: 0,
            encoder,
        }
    }

    fn turn(&self, detents: i32) {
        for _ in 0..detents.unsigned_abs() {
            self.encoder.on_clk_edge(detents < 0);
        }
    }
}

impl InputDevice for ScriptedInput {
    fn read(&mut self) -> InputSnapshot {
        while self.left == 0 {
            if self.idx >= self.steps.len() {
                return InputSnapshot::default();
            }
            let step = self.steps[self.idx];
            self.idx += 1;
            self.left = step.polls;
            self.turn(step.detents);
        }
        self.left -= 1;
        self.steps[self.idx - 1].snapshot
    }
}

/// Opens the menu, switches to the spectrum view, then bumps the gain
pub fn demo_script() -> Vec<Step> {
    let mut steps = Step::idle(120);
    steps.extend(Step::press(Button::Menu));
    // Display is the last item; one step back wraps to it
    steps.extend(Step::previous());
    steps.extend(Step::press(Button::Confirm));
    steps.extend(Step::rotate(1));
    steps.extend(Step::press(Button::Confirm));
    steps.extend(Step::idle(240));
    steps.extend(Step::next());
    steps.extend(Step::next());
    steps.extend(Step::next());
    steps.extend(Step::next());
    steps.extend(Step::press(Button::Confirm));
    steps.extend(Step::rotate(1));
    steps.extend(Step::press(Button::Back));
    steps.extend(Step::press(Button::Menu));
    steps
}

/// Display stand-in: logs what would have been drawn
#[derive(Default)]
pub struct LogRenderer {
    renders: u64,
    last_peak: Option<String>,
}

impl Renderer for LogRenderer {
    fn render(&mut self, view: &View<'_>) {
        self.renders += 1;
        trace!(
            renders = self.renders,
            dirty = ?view.dirty,
            mode = ?view.settings.display_mode,
            menu_open = view.menu.is_open(),
            frame = view.trace.map(|t| t.frame_sequence),
            "Render"
        );
        if view.peak_label != self.last_peak.as_deref() {
            if let Some(label) = view.peak_label {
                info!(peak = label, "Spectrum peak");
            }
            self.last_peak = view.peak_label.map(str::to_owned);
        }
        if view.menu.is_open() {
            let param = view.menu.selected_param();
            debug!(
                item = param.name,
                value = %param.value_label(view.settings),
                editing = view.menu.is_editing(),
                "Menu"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dac::{DacChannel, DacOutput},
        input::{InputDecoder, InputEvent, RotaryEncoder},
        trigger::TriggerLine,
    };

    #[test]
    fn test_dac_drives_comparator_only_on_channel_a() {
        let bench = Bench::new();
        let mut dac = DacOutput::new(Box::new(bench.dac()));
        dac.set_voltage(DacChannel::Offset, 0.5).unwrap();
        assert!((bench.trigger_bias() - 1.65).abs() < 1e-6);
        dac.set_voltage(DacChannel::Trigger, 2.0).unwrap();
        assert!((bench.trigger_bias() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_gain_switch_decodes() {
        let bench = Bench::new();
        let mut sel = bench.gain_selector();
        sel.select(GainSetting::High.selector_code()).unwrap();
        assert_eq!(bench.gain(), GainSetting::High);
        assert!(sel.select(0b11).is_err());
    }

    #[test]
    fn test_script_replays_presses_and_detents() {
        let mut encoder = EncoderCounter::new();
        let mut steps = Step::press(Button::Menu);
        steps.extend(Step::rotate(-2));
        let mut input = ScriptedInput::new(steps, encoder.clone());
        let mut decoder = InputDecoder::new();
        let mut events = vec![];
        for _ in 0..12 {
            let snapshot = input.read();
            events.extend(decoder.decode(snapshot, encoder.take_delta()));
        }
        assert_eq!(
            events,
            vec![InputEvent::Pressed(Button::Menu), InputEvent::Rotate(-2)]
        );
    }

    #[test]
    fn test_adc_fills_ring_and_fires_edges() {
        let bench = Bench::new();
        let line = TriggerLine::new();
        let mut adc = bench.adc(
            SignalGenerator {
                frequency_hz: 10_000.0,
                amplitude: 1.0,
            },
            line.edge_handle(),
        );
        let buffer = SampleBuffer::new();
        adc.configure(0.0, CAPTURE_DEPTH).unwrap();
        adc.start(buffer.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(buffer.blocks_completed() > 0);
        assert!(line.stats().edges > 0);
    }
}
