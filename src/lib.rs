//! Control core of a handheld two-core digital oscilloscope.
//!
//! The hardware (ADC + DMA, gain switch, DAC, buttons, encoder, display) is
//! reached through the collaborator traits in [`capture`], [`gain`], [`dac`],
//! [`input`] and [`render`]. [`sim`] provides a software bench for all of them.

pub mod args;
pub mod bus;
pub mod capture;
pub mod config;
pub mod dac;
pub mod error;
pub mod gain;
pub mod input;
pub mod menu;
pub mod render;
pub mod scheduler;
pub mod scope;
pub mod settings;
pub mod sim;
pub mod spectrum;
pub mod tasks;
pub mod trigger;

pub use error::{Result, ScopeError};

/// Samples per capture block (and per frame)
pub const CAPTURE_DEPTH: usize = 320;
/// Number of codes of the 8-bit ADC
pub const FULL_SCALE_CODE: f32 = 256.0;
/// Nominal mid-scale code, the DC level of a centered input
pub const MID_SCALE_CODE: u8 = 128;
/// ADC and DAC reference voltage
pub const REFERENCE_VOLTAGE: f32 = 3.3;
/// ADC conversion clock
pub const ADC_CLOCK_HZ: f32 = 48_000_000.0;
/// Clock cycles per conversion, the fastest the ADC can go
pub const ADC_CYCLES_PER_SAMPLE: f32 = 96.0;

/// One raw capture block, oldest sample first
pub type Samples = [u8; CAPTURE_DEPTH];

/// Sample rate produced by a free-running ADC clock divisor.
///
/// A divisor below 95 can't go faster than back-to-back conversions.
pub fn sample_rate(divisor: f32) -> f32 {
    ADC_CLOCK_HZ / (divisor + 1.0).max(ADC_CYCLES_PER_SAMPLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_speed_rate() {
        assert_eq!(sample_rate(0.0), 500_000.0);
        assert_eq!(sample_rate(95.0), 500_000.0);
        assert_eq!(sample_rate(959.0), 50_000.0);
    }
}
