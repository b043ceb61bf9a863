use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use network_comms::core::assembler::PacketAssembler;
use network_comms::core::codec::PacketCodec;
use network_comms::core::packet::Packet;
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

fn random_payload(size: usize) -> Bytes {
    let mut payload = vec![0u8; size];
    rand::rng().fill(&mut payload[..]);
    Bytes::from(payload)
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        let packet = Packet::raw("Benchmark", random_payload(size));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("frame_{size}b"), |b| {
            let codec = PacketCodec::default();
            b.iter(|| {
                let frame = codec.frame(&packet).unwrap();
                assert_eq!(frame.payload.len(), size);
            })
        });
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || packet.clone(),
                |p| {
                    let mut buf = BytesMut::with_capacity(size + 64);
                    let mut codec = PacketCodec::default();
                    codec.encode(p, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut wire = BytesMut::new();
            PacketCodec::default().encode(packet.clone(), &mut wire).unwrap();
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let decoded = PacketCodec::default().decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Reassembly cost when the stream arrives in socket-sized pieces
#[allow(clippy::unwrap_used)]
fn bench_assembler_fragments(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler_fragments");
    let codec = PacketCodec::default();
    let packets: Vec<Packet> = (0..32)
        .map(|i| Packet::raw("Stream", random_payload(512 + i * 977)))
        .collect();
    let mut wire = BytesMut::new();
    for packet in &packets {
        wire.extend_from_slice(&codec.frame(packet).unwrap().to_bytes());
    }
    let wire = wire.freeze();
    group.throughput(Throughput::Bytes(wire.len() as u64));

    for &fragment in &[1460usize, 8192, 65536] {
        group.bench_function(format!("fragment_{fragment}b"), |b| {
            b.iter(|| {
                let mut assembler = PacketAssembler::new(fragment);
                let mut count = 0;
                for chunk in wire.chunks(fragment) {
                    assembler.append(wire.slice_ref(chunk));
                    while assembler.try_extract_one(&codec).unwrap().is_some() {
                        count += 1;
                    }
                }
                assert_eq!(count, packets.len());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_assembler_fragments);
criterion_main!(benches);
