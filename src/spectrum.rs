use num_complex::Complex;
use std::f32::consts::PI;

use crate::{
    gain::{mid_scale_volts, raw_to_volts},
    trigger::Frame,
    CAPTURE_DEPTH,
};

// For each frozen frame we want a magnitude spectrum to draw. To get there we
// * convert codes to volts with the frame's own gain
// * remove the mid-scale DC level (also gain dependent)
// * multiply by a Hann window
// * run a direct DFT over the first half of the bins (input is real)
//
// 320 isn't a power of two and we only need 160 bins a few times a second,
// so a table-driven direct transform is plenty.

/// Bins in the one-sided spectrum
pub const BINS: usize = CAPTURE_DEPTH / 2;

#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    /// Amplitude per bin in input volts, DC first
    pub magnitudes: Vec<f32>,
    /// Strongest non-DC bin
    pub peak_bin: usize,
    pub bin_width_hz: f32,
    /// Sequence number of the frame this came from
    pub frame_sequence: u64,
}

impl Spectrum {
    pub fn peak_frequency(&self) -> f32 {
        self.peak_bin as f32 * self.bin_width_hz
    }

    pub fn peak_magnitude(&self) -> f32 {
        self.magnitudes[self.peak_bin]
    }
}

pub struct SpectralAnalyzer {
    window: [f32; CAPTURE_DEPTH],
    twiddles: Vec<Complex<f32>>,
    sample_rate: f32,
    scale: f32,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: f32) -> Self {
        let n = CAPTURE_DEPTH as f32;
        let window: [f32; CAPTURE_DEPTH] =
            std::array::from_fn(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()));
        let twiddles = (0..CAPTURE_DEPTH)
            .map(|i| Complex::from_polar(1.0, -2.0 * PI * i as f32 / n))
            .collect();
        // One-sided spectrum, corrected for the window's coherent gain, so a
        // sine of amplitude A reads as A in its bin
        let coherent_gain: f32 = window.iter().sum::<f32>() / n;
        Self {
            window,
            twiddles,
            sample_rate,
            scale: 2.0 / (n * coherent_gain),
        }
    }

    pub fn window(&self) -> &[f32; CAPTURE_DEPTH] {
        &self.window
    }

    pub fn bin_width_hz(&self) -> f32 {
        self.sample_rate / CAPTURE_DEPTH as f32
    }

    pub fn analyze(&self, frame: &Frame) -> Spectrum {
        let dc = mid_scale_volts(frame.gain);
        let mut input = [0f32; CAPTURE_DEPTH];
        for (i, (x, code)) in input.iter_mut().zip(frame.samples.iter()).enumerate() {
            *x = (raw_to_volts(*code, frame.gain) - dc) * self.window[i];
        }

        let magnitudes: Vec<f32> = (0..BINS)
            .map(|k| {
                let acc = input
                    .iter()
                    .enumerate()
                    .fold(Complex::new(0f32, 0f32), |acc, (n, x)| {
                        acc + self.twiddles[(k * n) % CAPTURE_DEPTH] * *x
                    });
                acc.norm() * self.scale
            })
            .collect();

        let peak_bin = magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .fold((1, f32::MIN), |best, (k, m)| if *m > best.1 { (k, *m) } else { best })
            .0;

        Spectrum {
            magnitudes,
            peak_bin,
            bin_width_hz: self.bin_width_hz(),
            frame_sequence: frame.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gain::GainSetting, MID_SCALE_CODE};

    fn sine_frame(cycles: f32, amplitude_codes: f32, gain: GainSetting) -> Frame {
        let mut frame = Frame {
            gain,
            sequence: 7,
            ..Default::default()
        };
        for (i, s) in frame.samples.iter_mut().enumerate() {
            let phase = 2.0 * PI * cycles * i as f32 / CAPTURE_DEPTH as f32;
            *s = (MID_SCALE_CODE as f32 + amplitude_codes * phase.sin()).round() as u8;
        }
        frame
    }

    #[test]
    fn test_window_is_symmetric_hann() {
        let a = SpectralAnalyzer::new(500_000.0);
        let w = a.window();
        assert!(w[0].abs() < 1e-6);
        assert!(w[CAPTURE_DEPTH - 1].abs() < 1e-6);
        for i in 0..CAPTURE_DEPTH / 2 {
            assert!((w[i] - w[CAPTURE_DEPTH - 1 - i]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_peak_on_bin_center() {
        let a = SpectralAnalyzer::new(500_000.0);
        let s = a.analyze(&sine_frame(20.0, 100.0, GainSetting::Low));
        assert_eq!(s.magnitudes.len(), BINS);
        assert_eq!(s.peak_bin, 20);
        assert_eq!(s.frame_sequence, 7);
        assert!((s.peak_frequency() - 31_250.0).abs() < 1.0);
        // 100 codes at x1 is ~1.29 V
        let expected = 100.0 / 256.0 * 3.3;
        assert!((s.peak_magnitude() - expected).abs() < 0.05 * expected);
    }

    #[test]
    fn test_flat_mid_scale_has_no_content() {
        let a = SpectralAnalyzer::new(500_000.0);
        let frame = Frame {
            samples: [MID_SCALE_CODE; CAPTURE_DEPTH],
            ..Default::default()
        };
        for gain in GainSetting::ALL {
            let s = a.analyze(&Frame { gain, ..frame.clone() });
            assert!(s.magnitudes.iter().all(|m| m.abs() < 1e-4));
        }
    }

    #[test]
    fn test_gain_scales_magnitude() {
        let a = SpectralAnalyzer::new(500_000.0);
        let low = a.analyze(&sine_frame(12.0, 80.0, GainSetting::Low));
        let high = a.analyze(&sine_frame(12.0, 80.0, GainSetting::High));
        assert_eq!(low.peak_bin, high.peak_bin);
        assert!((low.peak_magnitude() / high.peak_magnitude() - 4.0).abs() < 1e-3);
    }
}
