//! Incremental loading benchmarks
//!
//! Measures the resident skip, a reload from dumps, and a full compile.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scriptc::{Config, Environment, Session};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn generate_script(id: usize, includes: &[usize]) -> String {
    let mut content = String::new();

    for include in includes {
        content.push_str(&format!("%include \"module_{}\"\n", include));
    }

    content.push_str(&format!(
        "type shape_{id} = Circle_{id} num | Dot_{id}\n\
         size_{id} :: num\n\
         size_{id} = {id}\n\
         label_{id} = \"module {id}\"\n\
         alias_{id} = size_{id}\n",
        id = id
    ));
    content
}

/// A chain of scripts, each including the one before; returns the last
fn setup_project(dir: &TempDir, modules: usize) -> PathBuf {
    let mut last = PathBuf::new();
    for i in 0..modules {
        let includes: Vec<usize> = if i > 0 { vec![i - 1] } else { vec![] };
        last = dir.path().join(format!("module_{}.m", i));
        fs::write(&last, generate_script(i, &includes)).unwrap();
    }
    last
}

fn environment() -> Environment {
    let mut config = Config::default();
    config.compile.verbosity = false;
    Environment::new(config)
}

fn bench_resident_skip(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let top = setup_project(&temp, 10);
    let mut session = Session::new(environment());
    session.load(&top);

    c.bench_function("resident_skip", |b| {
        b.iter(|| black_box(session.load(&top)));
    });
}

fn bench_reload_from_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("reload_from_dump");

    for size in [1, 5, 10].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp = TempDir::new().unwrap();
            let top = setup_project(&temp, size);
            Session::new(environment()).load(&top);

            b.iter(|| {
                let mut session = Session::new(environment());
                black_box(session.load(&top))
            });
        });
    }

    group.finish();
}

fn bench_full_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_compile");
    group.sample_size(10);

    for size in [1, 5].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp = TempDir::new().unwrap();
            let top = setup_project(&temp, size);

            b.iter(|| {
                let mut session = Session::new(environment());
                black_box(session.compile(&top))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resident_skip, bench_reload_from_dump, bench_full_compile);
criterion_main!(benches);
