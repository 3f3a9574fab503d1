use clap::Parser;
use pocket_scope::{
    args,
    input::{EncoderCounter, InputDevice},
    scheduler::SystemClock,
    scope::{Hardware, Scope},
    sim::{demo_script, Bench, LogRenderer, ScriptedInput, SignalGenerator},
    trigger::TriggerLine,
    Result, ScopeError,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{info, warn};

fn main() -> Result<()> {
    // Get the CLI options
    let cli = args::Args::parse();

    // Logger init
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(cli.verbose.log_level_filter()))
        .init();

    // Setup the exit handler
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        warn!("Stopping");
        handler_stop.store(true, Ordering::Release);
    })
    .map_err(|e| ScopeError::Peripheral(format!("installing Ctrl-C handler: {}", e)))?;

    let config = cli.to_config();
    info!(?config, "Starting scope");

    // Bench wiring: the comparator interrupt holds the edge handle
    let bench = Bench::new();
    let line = TriggerLine::new();
    let generator = SignalGenerator {
        frequency_hz: cli.frequency,
        amplitude: cli.amplitude,
    };
    let encoder = EncoderCounter::new();
    let script = if cli.demo { demo_script() } else { vec![] };
    let input: Box<dyn InputDevice> = Box::new(ScriptedInput::new(script, encoder.clone()));
    let hw = Hardware {
        capture: Box::new(bench.adc(generator, line.edge_handle())),
        gain_selector: Box::new(bench.gain_selector()),
        dac: Box::new(bench.dac()),
        input,
        encoder: Box::new(encoder),
        renderer: Box::new(LogRenderer::default()),
    };

    let scope = Scope::build(config, hw, line.clone(), SystemClock::default())?;
    let running = scope.spawn(stop.clone())?;

    let start = Instant::now();
    let deadline = cli.duration.map(Duration::from_secs);
    while !stop.load(Ordering::Acquire) {
        if deadline.map_or(false, |d| start.elapsed() >= d) {
            stop.store(true, Ordering::Release);
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    running.join()?;
    info!(stats = ?line.stats(), "Exiting");
    Ok(())
}
