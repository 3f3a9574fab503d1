use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pocket_scope::{
    bus::Versioned,
    capture::{DmaChain, SampleBuffer},
    gain::GainSetting,
    input::{Button, InputDecoder, InputSnapshot},
    render::ScaleCache,
    settings::ScopeSettings,
    spectrum::SpectralAnalyzer,
    trigger::{Frame, TriggerLine, TriggerMode, TriggerSynchronizer},
    CAPTURE_DEPTH,
};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let mut dummy_samples = [0u8; CAPTURE_DEPTH];
    rng.fill(&mut dummy_samples[..]);

    // Containers
    let buffer = SampleBuffer::new();
    let mut dma = DmaChain::new(buffer.clone());
    let line = TriggerLine::new();
    let edge = line.edge_handle();
    let mut sync = TriggerSynchronizer::new(line, TriggerMode::Continuous);
    let analyzer = SpectralAnalyzer::new(500_000.0);
    let frame = Frame {
        samples: dummy_samples,
        sequence: 1,
        gain: GainSetting::Low,
    };
    let scale = ScaleCache::new(
        &Versioned {
            version: 1,
            value: ScopeSettings::default(),
        },
        500_000.0,
    );

    c.bench_function("dma block", |b| {
        b.iter(|| {
            for code in dummy_samples {
                dma.transfer(black_box(code));
            }
        })
    });

    c.bench_function("trigger consume", |b| {
        b.iter(|| {
            edge.on_edge();
            black_box(sync.consume(black_box(&buffer), GainSetting::Low).is_some())
        })
    });

    c.bench_function("spectrum", |b| {
        b.iter(|| analyzer.analyze(black_box(&frame)))
    });

    c.bench_function("trace", |b| b.iter(|| scale.trace(black_box(&frame))));

    let mut decoder = InputDecoder::new();
    let snapshots = [
        InputSnapshot::pressed(&[Button::Confirm]),
        InputSnapshot::default().with_axis_y(1000),
        InputSnapshot::default(),
    ];
    c.bench_function("input decode", |b| {
        b.iter(|| {
            for s in snapshots {
                black_box(decoder.decode(black_box(s), 1));
            }
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
