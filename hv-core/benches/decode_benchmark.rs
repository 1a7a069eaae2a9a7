//! Benchmarks for EVT2 and sub-frame decoder performance.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hv_core::subframe::{self, BUF_LEN, SUB_FULL_BYTES, SUB_VALID_BYTES};
use hv_core::{encode_events, CdEvent, Evt2Decoder, EventTimeEncoder};

fn evt2_decode_benchmark(c: &mut Criterion) {
    // Encode 1M synthetic events spread over ~10 seconds.
    let events: Vec<CdEvent> = (0..1_000_000u64)
        .map(|i| CdEvent::new((i % 768) as u16, (i % 608) as u16, (i % 2) as u8, i * 10))
        .collect();
    let mut encoder = EventTimeEncoder::new(0);
    let mut bytes = Vec::new();
    encode_events(&events, &mut bytes, &mut encoder);

    let mut group = c.benchmark_group("evt2_decode");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("synthetic_1m_events", |b| {
        b.iter(|| {
            let mut decoder = Evt2Decoder::new();
            let mut decoded = Vec::with_capacity(events.len());
            decoder.decode_buffer(black_box(&bytes), &mut decoded, None);
            black_box(decoded.len())
        })
    });

    group.finish();
}

fn subframe_decode_benchmark(c: &mut Criterion) {
    // Build a full raw block: 16 sub-frame slots with a dense diagonal of
    // lit pixels in each quadrant.
    let mut block = vec![0u8; BUF_LEN];
    for slot_index in 0..16usize {
        let mut words = vec![0u64; SUB_VALID_BYTES / 8];
        words[0] = ((slot_index as u64 + 1) * 200_000 << 24) | 0x00FFFF;
        words[1] = ((slot_index % 4) as u64) << 44;
        for row in 0..304usize {
            words[2 + row * 12 + (row % 12)] = 0xCCCC_CCCC_CCCC_CCCC;
        }
        let base = slot_index * SUB_FULL_BYTES;
        for (i, word) in words.iter().enumerate() {
            block[base + i * 8..base + i * 8 + 8].copy_from_slice(&word.to_le_bytes());
        }
    }

    let mut group = c.benchmark_group("subframe_decode");
    group.throughput(Throughput::Bytes(BUF_LEN as u64));

    group.bench_function("full_block", |b| {
        b.iter(|| {
            let mut events = Vec::new();
            subframe::decode_block(black_box(&block), &mut events);
            black_box(events.len())
        })
    });

    group.finish();
}

criterion_group!(benches, evt2_decode_benchmark, subframe_decode_benchmark);
criterion_main!(benches);
