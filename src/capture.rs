//! This module contains all the capture logic

// The capture unit does one thing, forever: move ADC conversions into the
// sample ring without the CPU. Two chained DMA channels make that gapless.
// The data channel writes one block, and the instant it finishes the control
// channel points it back at the start of the ring and restarts it.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc, Mutex,
};

use tracing::{info, warn};

use crate::{
    gain::{GainSelector, GainSetting, GainStage},
    sample_rate, Result, Samples, ScopeError, CAPTURE_DEPTH,
};

struct SampleRing {
    samples: [AtomicU8; CAPTURE_DEPTH],
    written: AtomicU64,
}

/// The live ring the capture hardware keeps overwriting.
///
/// Cloning hands out another reference to the same ring. Nothing but the
/// trigger copy reads it.
#[derive(Clone)]
pub struct SampleBuffer {
    ring: Arc<SampleRing>,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(SampleRing {
                samples: std::array::from_fn(|_| AtomicU8::new(0)),
                written: AtomicU64::new(0),
            }),
        }
    }

    /// Total samples transferred since capture started
    pub fn samples_written(&self) -> u64 {
        self.ring.written.load(Ordering::Acquire)
    }

    pub fn blocks_completed(&self) -> u64 {
        self.samples_written() / CAPTURE_DEPTH as u64
    }

    /// Where the next sample will land, which is also the oldest sample in the ring
    pub fn write_position(&self) -> usize {
        (self.samples_written() % CAPTURE_DEPTH as u64) as usize
    }

    fn store(&self, idx: usize, code: u8) {
        self.ring.samples[idx].store(code, Ordering::Relaxed);
        self.ring.written.fetch_add(1, Ordering::Release);
    }

    /// Bulk copy of the ring, oldest sample first. The writer keeps running
    /// underneath; one block period is ~1000x the duration of this copy.
    pub(crate) fn freeze(&self, out: &mut Samples) {
        let start = self.write_position();
        let (tail, head) = out.split_at_mut(CAPTURE_DEPTH - start);
        for (i, slot) in tail.iter_mut().enumerate() {
            *slot = self.ring.samples[start + i].load(Ordering::Relaxed);
        }
        for (i, slot) in head.iter_mut().enumerate() {
            *slot = self.ring.samples[i].load(Ordering::Relaxed);
        }
    }
}

/// Data channel + control channel pair feeding a [`SampleBuffer`]
pub struct DmaChain {
    buffer: SampleBuffer,
    write_addr: usize,
    remaining: usize,
    reloads: u64,
}

impl DmaChain {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            write_addr: 0,
            remaining: CAPTURE_DEPTH,
            reloads: 0,
        }
    }

    /// One DREQ-paced transfer from the ADC FIFO. Returns true when it completed a block.
    pub fn transfer(&mut self, code: u8) -> bool {
        self.buffer.store(self.write_addr, code);
        self.write_addr += 1;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.reload();
            true
        } else {
            false
        }
    }

    // The control channel rewrites the data channel's write address and
    // retriggers it, so the next transfer lands at index 0 with no gap.
    fn reload(&mut self) {
        self.write_addr = 0;
        self.remaining = CAPTURE_DEPTH;
        self.reloads += 1;
    }

    pub fn reloads(&self) -> u64 {
        self.reloads
    }
}

/// The ADC + DMA hardware
pub trait CapturePeripheral: Send {
    fn configure(&mut self, sample_rate_divisor: f32, depth: usize) -> Result<()>;
    /// Begin free-running capture into `buffer`. Never stops once started.
    fn start(&mut self, buffer: SampleBuffer) -> Result<()>;
}

pub struct CapturePipeline {
    peripheral: Mutex<Box<dyn CapturePeripheral>>,
    buffer: SampleBuffer,
    gain: GainStage,
    divisor: f32,
    started: AtomicBool,
    settle_until: AtomicU64,
}

impl CapturePipeline {
    pub fn new(
        peripheral: Box<dyn CapturePeripheral>,
        selector: Box<dyn GainSelector>,
        initial_gain: GainSetting,
        divisor: f32,
    ) -> Result<Self> {
        if !(0.0..=65_535.0).contains(&divisor) {
            return Err(ScopeError::InvalidConfig(format!(
                "clock divisor {} out of range",
                divisor
            )));
        }
        Ok(Self {
            peripheral: Mutex::new(peripheral),
            buffer: SampleBuffer::new(),
            gain: GainStage::new(selector, initial_gain)?,
            divisor,
            started: AtomicBool::new(false),
            settle_until: AtomicU64::new(0),
        })
    }

    /// Configure and start the peripheral. Only marked started once it is,
    /// so a failed start can be retried.
    pub fn start(&self) -> Result<()> {
        let mut peripheral = self
            .peripheral
            .lock()
            .map_err(|_| ScopeError::Peripheral("capture lock poisoned".to_owned()))?;
        if self.started.load(Ordering::Acquire) {
            warn!("Capture already running");
            return Ok(());
        }
        peripheral.configure(self.divisor, CAPTURE_DEPTH)?;
        peripheral.start(self.buffer.clone())?;
        self.started.store(true, Ordering::Release);
        info!(
            rate = self.sample_rate(),
            depth = CAPTURE_DEPTH,
            "Free-running capture started"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn sample_rate(&self) -> f32 {
        sample_rate(self.divisor)
    }

    pub fn current_gain(&self) -> GainSetting {
        self.gain.current()
    }

    /// Switches the analog path and scale factor together. Capture keeps
    /// running; the ring holds mixed-gain data until a full block of new
    /// samples has landed, see [`CapturePipeline::is_settled`].
    pub fn set_gain(&self, gain: GainSetting) -> Result<()> {
        if gain == self.current_gain() {
            return Ok(());
        }
        // Unsettle before the new gain is visible to frame stamping
        self.settle_until.store(
            self.buffer.samples_written() + CAPTURE_DEPTH as u64,
            Ordering::Release,
        );
        self.gain.set(gain)
    }

    /// False while the ring still holds samples taken before the last gain change
    pub fn is_settled(&self) -> bool {
        self.buffer.samples_written() >= self.settle_until.load(Ordering::Acquire)
    }

    pub fn raw_to_volts(&self, sample: u8) -> f32 {
        self.gain.raw_to_volts(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MID_SCALE_CODE;

    struct NullSelector;

    impl GainSelector for NullSelector {
        fn select(&mut self, _code: u8) -> Result<()> {
            Ok(())
        }
    }

    struct Recording(Arc<Mutex<Option<(f32, usize)>>>);

    impl CapturePeripheral for Recording {
        fn configure(&mut self, sample_rate_divisor: f32, depth: usize) -> Result<()> {
            *self.0.lock().unwrap() = Some((sample_rate_divisor, depth));
            Ok(())
        }

        fn start(&mut self, _buffer: SampleBuffer) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline() -> CapturePipeline {
        CapturePipeline::new(
            Box::new(Recording(Arc::new(Mutex::new(None)))),
            Box::new(NullSelector),
            GainSetting::Low,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn test_chain_reloads_without_gap() {
        let buffer = SampleBuffer::new();
        let mut dma = DmaChain::new(buffer.clone());
        let completed = (0..CAPTURE_DEPTH * 2 + 5)
            .filter(|i| dma.transfer(*i as u8))
            .count();
        assert_eq!(completed, 2);
        assert_eq!(dma.reloads(), 2);
        assert_eq!(buffer.blocks_completed(), 2);
        assert_eq!(buffer.write_position(), 5);
    }

    #[test]
    fn test_freeze_is_oldest_first() {
        let buffer = SampleBuffer::new();
        let mut dma = DmaChain::new(buffer.clone());
        for i in 0..CAPTURE_DEPTH + 10 {
            dma.transfer((i % 251) as u8);
        }
        let mut out = [0u8; CAPTURE_DEPTH];
        buffer.freeze(&mut out);
        // Oldest surviving sample is #10, newest is #329
        assert_eq!(out[0], 10);
        assert_eq!(out[CAPTURE_DEPTH - 1], ((CAPTURE_DEPTH + 9) % 251) as u8);
    }

    #[test]
    fn test_start_configures_peripheral() {
        let seen = Arc::new(Mutex::new(None));
        let pipeline = CapturePipeline::new(
            Box::new(Recording(seen.clone())),
            Box::new(NullSelector),
            GainSetting::Med,
            0.0,
        )
        .unwrap();
        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((0.0, CAPTURE_DEPTH)));
        assert_eq!(pipeline.sample_rate(), 500_000.0);
    }

    #[test]
    fn test_gain_change_settles_after_one_block() {
        let pipeline = pipeline();
        let mut dma = DmaChain::new(pipeline.buffer().clone());
        for _ in 0..100 {
            dma.transfer(MID_SCALE_CODE);
        }
        assert!(pipeline.is_settled());
        pipeline.set_gain(GainSetting::High).unwrap();
        assert_eq!(pipeline.current_gain(), GainSetting::High);
        assert!(!pipeline.is_settled());
        for _ in 0..CAPTURE_DEPTH - 1 {
            dma.transfer(MID_SCALE_CODE);
        }
        assert!(!pipeline.is_settled());
        dma.transfer(MID_SCALE_CODE);
        assert!(pipeline.is_settled());
    }

    #[test]
    fn test_same_gain_does_not_unsettle() {
        let pipeline = pipeline();
        pipeline.set_gain(GainSetting::Low).unwrap();
        assert!(pipeline.is_settled());
    }

    /// Fails `configure` the first time, then counts successful starts
    struct FailsOnce {
        failed: bool,
        starts: Arc<AtomicU64>,
    }

    impl CapturePeripheral for FailsOnce {
        fn configure(&mut self, _sample_rate_divisor: f32, _depth: usize) -> Result<()> {
            if !self.failed {
                self.failed = true;
                return Err(ScopeError::Peripheral("ADC not ready".to_owned()));
            }
            Ok(())
        }

        fn start(&mut self, _buffer: SampleBuffer) -> Result<()> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let starts = Arc::new(AtomicU64::new(0));
        let pipeline = CapturePipeline::new(
            Box::new(FailsOnce {
                failed: false,
                starts: starts.clone(),
            }),
            Box::new(NullSelector),
            GainSetting::Low,
            0.0,
        )
        .unwrap();
        assert!(pipeline.start().is_err());
        assert!(!pipeline.is_started());
        assert_eq!(starts.load(Ordering::Relaxed), 0);

        pipeline.start().unwrap();
        assert!(pipeline.is_started());
        pipeline.start().unwrap();
        assert_eq!(starts.load(Ordering::Relaxed), 1);
    }

    /// Records whether the pipeline already reported unsettled when the switch moved
    struct SettleWatcher {
        pipeline: Arc<Mutex<Option<Arc<CapturePipeline>>>>,
        settled_at_switch: Arc<Mutex<Vec<bool>>>,
    }

    impl GainSelector for SettleWatcher {
        fn select(&mut self, _code: u8) -> Result<()> {
            if let Some(p) = self.pipeline.lock().unwrap().as_ref() {
                self.settled_at_switch.lock().unwrap().push(p.is_settled());
            }
            Ok(())
        }
    }

    #[test]
    fn test_unsettled_before_gain_switches() {
        let slot = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(vec![]));
        let pipeline = Arc::new(
            CapturePipeline::new(
                Box::new(Recording(Arc::new(Mutex::new(None)))),
                Box::new(SettleWatcher {
                    pipeline: slot.clone(),
                    settled_at_switch: seen.clone(),
                }),
                GainSetting::Low,
                0.0,
            )
            .unwrap(),
        );
        *slot.lock().unwrap() = Some(pipeline.clone());
        pipeline.set_gain(GainSetting::Med).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        // Break the cycle
        slot.lock().unwrap().take();
    }

    #[test]
    fn test_set_gain_round_trip_scales_readings() {
        let pipeline = pipeline();
        pipeline.set_gain(GainSetting::Med).unwrap();
        let med = pipeline.raw_to_volts(MID_SCALE_CODE);
        pipeline.set_gain(GainSetting::High).unwrap();
        assert_eq!(pipeline.current_gain(), GainSetting::High);
        let high = pipeline.raw_to_volts(MID_SCALE_CODE);
        let ratio = GainSetting::Med.scale_factor() / GainSetting::High.scale_factor();
        assert!((high / med - ratio).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_divisor() {
        let err = CapturePipeline::new(
            Box::new(Recording(Arc::new(Mutex::new(None)))),
            Box::new(NullSelector),
            GainSetting::Low,
            -1.0,
        );
        assert!(matches!(err, Err(ScopeError::InvalidConfig(_))));
    }
}
