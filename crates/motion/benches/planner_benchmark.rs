use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motion::stepper::SegmentQueue;
use motion::{Config, Planner, AXES, X, Y};

fn xy(x: f64, y: f64) -> [f64; AXES] {
    let mut v = [0.0; AXES];
    v[X] = x;
    v[Y] = y;
    v
}

fn benchmark_planner(c: &mut Criterion) {
    let cfg = Config::default();

    c.bench_function("aline_long_move", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            planner.aline(black_box(&cfg), black_box(xy(150.0, 50.0)), black_box(0.25))
        })
    });

    c.bench_function("aline_corner_retro_edit", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            planner.aline(&cfg, xy(10.0, 0.0), 10.0 / 600.0);
            planner.aline(&cfg, black_box(xy(10.0, 10.0)), black_box(10.0 / 600.0))
        })
    });

    c.bench_function("generate_segments_full_profile", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            planner.aline(&cfg, xy(10.0, 0.0), 10.0 / 600.0);
            let mut queue = SegmentQueue::new();
            let mut emitted = 0u32;
            loop {
                match planner.run_move(&cfg, &mut queue) {
                    motion::Status::Noop => break,
                    _ => {
                        while queue.pop().is_some() {
                            emitted += 1;
                        }
                    }
                }
            }
            black_box(emitted)
        })
    });
}

criterion_group!(benches, benchmark_planner);
criterion_main!(benches);
