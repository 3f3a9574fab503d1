//! Argument parsing for running the scope on the simulated bench

use std::time::Duration;

use clap::Parser;

use crate::{config::ScopeConfig, gain::GainSetting, settings::DisplayMode, trigger::TriggerMode};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Frequency of the simulated input sine in Hz
    #[clap(short, long, default_value_t = 5_000.0)]
    pub frequency: f32,
    /// Peak amplitude of the simulated input in volts
    #[clap(short, long, default_value_t = 0.5)]
    pub amplitude: f32,
    /// Starting front-end gain (0 = x1, 1 = x2, 2 = x4)
    #[clap(short, long, default_value_t = 0)]
    #[clap(value_parser = clap::value_parser!(u8).range(0..=2))]
    pub gain: u8,
    /// Trigger level in input volts relative to mid-scale
    #[clap(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub trigger_level: f32,
    /// Hold each frame on screen for this many milliseconds before re-arming
    #[clap(long)]
    pub holdoff_ms: Option<u64>,
    /// Force a capture after this many milliseconds without an edge (0 disables)
    #[clap(long, default_value_t = 500)]
    pub auto_trigger_ms: u64,
    /// ADC clock divisor, 0 for full speed
    #[clap(long, default_value_t = 0.0)]
    pub divisor: f32,
    /// Start on the spectrum view
    #[clap(long)]
    pub spectrum: bool,
    /// Play the scripted button demo
    #[clap(long)]
    pub demo: bool,
    /// Seconds to run before exiting, runs until Ctrl-C if absent
    #[clap(short, long)]
    pub duration: Option<u64>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    pub fn to_config(&self) -> ScopeConfig {
        let mut config = ScopeConfig {
            sample_rate_divisor: self.divisor,
            auto_trigger: (self.auto_trigger_ms > 0)
                .then(|| Duration::from_millis(self.auto_trigger_ms)),
            ..Default::default()
        };
        if let Some(ms) = self.holdoff_ms {
            config.trigger_mode = TriggerMode::HoldOff;
            config.holdoff = Duration::from_millis(ms);
        }
        config.initial.trigger_level = self.trigger_level;
        let mode = if self.spectrum {
            DisplayMode::Spectrum
        } else {
            DisplayMode::Scope
        };
        config
            .with_gain(GainSetting::from_index(self.gain as usize))
            .with_display_mode(mode)
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_make_valid_config() {
        let args = Args::parse_from(["pocket_scope"]);
        let config = args.to_config();
        config.validate().unwrap();
        assert_eq!(config.trigger_mode, TriggerMode::Continuous);
        assert_eq!(config.auto_trigger, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_holdoff_and_gain() {
        let args = Args::parse_from([
            "pocket_scope",
            "--holdoff-ms",
            "100",
            "--gain",
            "2",
            "--auto-trigger-ms",
            "0",
            "--trigger-level",
            "-0.2",
        ]);
        let config = args.to_config();
        assert_eq!(config.trigger_mode, TriggerMode::HoldOff);
        assert_eq!(config.holdoff, Duration::from_millis(100));
        assert_eq!(config.initial.gain, GainSetting::High);
        assert_eq!(config.auto_trigger, None);
        assert!((config.initial.trigger_level + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_gain_out_of_range_rejected() {
        assert!(Args::try_parse_from(["pocket_scope", "--gain", "3"]).is_err());
    }
}
