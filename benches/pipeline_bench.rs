#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use network_comms::core::pipeline::{PipelineConfig, TransformPipeline};
use network_comms::core::processor::ProcessorKind;
use network_comms::core::serialization::SerializationFormat;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
struct Telemetry {
    node: String,
    sequence: u64,
    readings: Vec<f64>,
    labels: Vec<String>,
}

fn telemetry(readings: usize) -> Telemetry {
    Telemetry {
        node: "node-17".to_string(),
        sequence: 42,
        readings: (0..readings).map(|i| i as f64 * 0.25).collect(),
        labels: (0..16).map(|i| format!("label-{i}")).collect(),
    }
}

fn configurations() -> Vec<(&'static str, PipelineConfig)> {
    vec![
        ("bincode", PipelineConfig::new(SerializationFormat::Bincode)),
        ("json", PipelineConfig::new(SerializationFormat::Json)),
        ("msgpack", PipelineConfig::new(SerializationFormat::MessagePack)),
        (
            "bincode_lz4",
            PipelineConfig::new(SerializationFormat::Bincode).with_processor(ProcessorKind::Lz4),
        ),
        (
            "bincode_zstd",
            PipelineConfig::new(SerializationFormat::Bincode).with_processor(ProcessorKind::Zstd),
        ),
        (
            "bincode_lz4_chacha",
            PipelineConfig::new(SerializationFormat::Bincode)
                .with_processor(ProcessorKind::Lz4)
                .with_processor(ProcessorKind::ChaCha20Poly1305)
                .with_password("benchmark password"),
        ),
    ]
}

fn bench_object_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_pipeline");
    let pipeline = TransformPipeline::new();

    for &readings in &[16usize, 1024, 65536] {
        let value = telemetry(readings);
        for (name, config) in configurations() {
            let encoded = pipeline.forward(&value, &config).unwrap();
            group.throughput(Throughput::Bytes(encoded.len() as u64));

            group.bench_function(format!("{}_forward_{}", name, readings), |b| {
                b.iter(|| pipeline.forward(&value, &config).unwrap())
            });
            group.bench_function(format!("{}_reverse_{}", name, readings), |b| {
                b.iter(|| {
                    let decoded: Telemetry = pipeline.reverse(&encoded, &config).unwrap();
                    assert_eq!(decoded.readings.len(), readings);
                })
            });
        }
    }

    group.finish();
}

fn bench_primitive_arrays(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitive_arrays");
    let pipeline = TransformPipeline::new();

    for &len in &[1024usize, 262_144] {
        let values: Vec<f64> = (0..len).map(|i| (i as f64).sin()).collect();
        group.throughput(Throughput::Bytes((len * 8) as u64));

        for (name, config) in [
            ("plain", PipelineConfig::default()),
            ("lz4", PipelineConfig::default().with_processor(ProcessorKind::Lz4)),
        ] {
            let encoded = pipeline.forward_array(&values, &config).unwrap();
            group.bench_function(format!("{}_forward_{}", name, len), |b| {
                b.iter(|| pipeline.forward_array(&values, &config).unwrap())
            });
            group.bench_function(format!("{}_reverse_{}", name, len), |b| {
                b.iter(|| {
                    let decoded = pipeline.reverse_array::<f64>(&encoded, &config).unwrap();
                    assert_eq!(decoded.len(), len);
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_object_pipeline, bench_primitive_arrays);
criterion_main!(benches);
