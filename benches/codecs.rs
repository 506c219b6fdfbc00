use criterion::{black_box, criterion_group, criterion_main, Criterion};

use std::sync::Arc;

use gammaspec::io::{read_n42, read_pcf, write_n42, write_pcf};
use gammaspec::prelude::*;

fn portal_file(n_records: usize, n_channels: usize) -> SpecFile {
    let mut file = SpecFile::new();
    let cal = Arc::new(EnergyCalibration::polynomial(&[0.0, 3.0], n_channels, &[]).unwrap());
    for i in 0..n_records {
        let mut m = Measurement::new();
        let counts = (0..n_channels).map(|c| ((c * 7 + i) % 101) as f32).collect();
        m.set_gamma_counts(counts, 9.5, 10.0).unwrap();
        m.set_energy_calibration(cal.clone()).unwrap();
        m.set_sample_number((i / 4) as i32 + 1);
        m.set_detector_name(format!("A{}1", ["a", "b", "c", "d"][i % 4]));
        file.add_measurement(m, true).unwrap();
    }
    file.cleanup(CleanupOptions::default()).unwrap();
    file
}

fn codecs(c: &mut Criterion) {
    let file = portal_file(64, 1024);
    let mut n42 = Vec::new();
    write_n42(&file, &[], &[] as &[&str], &mut n42).unwrap();
    let mut pcf = Vec::new();
    write_pcf(&file, &[], &[] as &[&str], &mut pcf).unwrap();

    c.bench_function("decode_n42", |b| {
        b.iter(|| read_n42(black_box(n42.as_slice())).unwrap())
    });
    c.bench_function("decode_pcf", |b| {
        b.iter(|| read_pcf(black_box(pcf.as_slice())).unwrap())
    });
    c.bench_function("decode_auto_pcf", |b| {
        b.iter(|| gammaspec::decode_auto(black_box(&pcf)).unwrap())
    });
    c.bench_function("encode_n42", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            write_n42(black_box(&file), &[], &[] as &[&str], &mut buf).unwrap();
            buf
        })
    });
}

criterion_group!(benches, codecs);
criterion_main!(benches);
