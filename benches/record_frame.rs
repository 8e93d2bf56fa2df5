use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fluid_canvas::{
    CommandStream, Extent, FrameContext, GlobalHeap, GpuDevice, HeadlessDevice, InputMask,
    Simulation, SimulationConfig,
};

fn setup(extent: Extent, validate_barriers: bool) -> (HeadlessDevice, GlobalHeap, Simulation) {
    let mut device = HeadlessDevice::new();
    let mut heap = GlobalHeap::new();
    let config = SimulationConfig {
        validate_barriers,
        ..SimulationConfig::default()
    };
    let simulation = Simulation::new(&mut device, &mut heap, extent, config).unwrap();
    (device, heap, simulation)
}

fn benchmark_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_frame");

    for (width, height) in [(640, 480), (1920, 1080)] {
        for validate in [false, true] {
            let id = format!("{width}x{height}{}", if validate { "_validated" } else { "" });
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                let (mut device, _heap, mut simulation) =
                    setup(Extent::new(width, height), validate);
                let mut stream = CommandStream::new();
                let mut frame = 0usize;

                b.iter(|| {
                    let context = FrameContext::new(frame as f64 / 60.0, 1.0 / 60.0, frame % 3);
                    simulation.update(&mut device, &mut stream, &context, InputMask::PAN_RIGHT);
                    black_box(stream.len());
                    device.submit(&mut stream);
                    frame += 1;
                });
            });
        }
    }
    group.finish();
}

fn benchmark_resize(c: &mut Criterion) {
    c.bench_function("resize_1000x700_to_1920x1080", |b| {
        let (mut device, mut heap, mut simulation) = setup(Extent::new(1000, 700), false);
        let extents = [Extent::new(1920, 1080), Extent::new(1000, 700)];
        let mut i = 0;

        b.iter(|| {
            simulation
                .resize(&mut device, &mut heap, extents[i % 2])
                .unwrap();
            i += 1;
        });
    });
}

criterion_group!(benches, benchmark_record, benchmark_resize);
criterion_main!(benches);
