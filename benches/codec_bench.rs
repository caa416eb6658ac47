//! Benchmarks for state encoding, diffing and decoding of client payloads
//!
//! Run with: cargo bench --bench codec_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use uidl::codec::{self, NoConnectors, Transport, TypeDesc, Value};
use uidl::rpc::{VAR_ESCAPE_CHARACTER, unescape_burst};

uidl::bean! {
    #[derive(Debug, Default, Clone)]
    struct TableState {
        caption: Option<String>,
        rows: Vec<String>,
        widths: Vec<i32>,
        selected: i32,
        sortable: bool,
    }
}

fn make_table(rows: usize, rng: &mut SmallRng) -> TableState {
    TableState {
        caption: Some("Orders".to_string()),
        rows: (0..rows).map(|i| format!("row {} {}", i, rng.gen::<u32>())).collect(),
        widths: (0..rows).map(|_| rng.gen_range(20..400)).collect(),
        selected: 0,
        sortable: true,
    }
}

fn bench_encode_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode/full");
    let mut rng = SmallRng::seed_from_u64(7);

    for rows in [10, 100, 1000] {
        group.throughput(Throughput::Elements(rows as u64));
        let value = make_table(rows, &mut rng).to_value();
        let declared = TableState::type_desc();
        group.bench_with_input(BenchmarkId::new("table", rows), &(), |b, _| {
            b.iter(|| black_box(codec::encode(&value, None, &declared, &NoConnectors)))
        });
    }

    group.finish();
}

fn bench_encode_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode/diff");
    let mut rng = SmallRng::seed_from_u64(11);

    for rows in [10, 100, 1000] {
        group.throughput(Throughput::Elements(rows as u64));
        let declared = TableState::type_desc();
        let table = make_table(rows, &mut rng);
        let reference = match codec::encode(&table.to_value(), None, &declared, &NoConnectors) {
            Ok(result) => result.encoded,
            Err(e) => panic!("could not encode the reference: {}", e),
        };

        // the selection changes, the rows stay
        let mut changed = table.clone();
        changed.selected = 3;
        let value = changed.to_value();
        group.bench_with_input(BenchmarkId::new("selection", rows), &(), |b, _| {
            b.iter(|| black_box(codec::encode(&value, Some(&reference), &declared, &NoConnectors)))
        });

        let unchanged = table.to_value();
        group.bench_with_input(BenchmarkId::new("unchanged", rows), &(), |b, _| {
            b.iter(|| black_box(codec::encode(&unchanged, Some(&reference), &declared, &NoConnectors)))
        });
    }

    group.finish();
}

fn make_variables(len: usize, rng: &mut SmallRng) -> Value {
    Value::List(
        (0..len)
            .map(|i| match i % 4 {
                0 => Value::Integer(rng.gen()),
                1 => Value::String(format!("value {}", rng.gen::<u16>())),
                2 => Value::Boolean(rng.gen()),
                _ => Value::Double(rng.gen()),
            })
            .collect(),
    )
}

fn bench_decode_variables(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/variables");
    let mut rng = SmallRng::seed_from_u64(13);

    for len in [8, 64, 512] {
        group.throughput(Throughput::Elements(len as u64));
        let encoded = match codec::encode_uidl_value(&make_variables(len, &mut rng), &NoConnectors) {
            Ok(encoded) => encoded,
            Err(e) => panic!("could not encode the variables: {}", e),
        };
        let tag = encoded[0].as_str().unwrap_or_default().to_string();
        let target = TypeDesc::from_transport_type(&tag).unwrap_or(TypeDesc::List(None));
        let json = encoded[1].clone();
        group.bench_with_input(BenchmarkId::new("list", len), &(), |b, _| {
            b.iter(|| black_box(codec::decode_internal(&target, true, &json, &NoConnectors)))
        });
    }

    group.finish();
}

fn bench_unescape(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst/unescape");

    for escapes_per_kb in [0, 16, 128] {
        let mut burst = String::with_capacity(1024);
        for i in 0..1024 {
            if escapes_per_kb > 0 && i % (1024 / escapes_per_kb) == 0 {
                burst.push(VAR_ESCAPE_CHARACTER);
                burst.push(char::from(VAR_ESCAPE_CHARACTER as u8 + 0x30));
            } else {
                burst.push('x');
            }
        }
        group.throughput(Throughput::Bytes(burst.len() as u64));
        group.bench_with_input(BenchmarkId::new("escapes_per_kb", escapes_per_kb), &burst, |b, burst| {
            b.iter(|| black_box(unescape_burst(burst)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_full,
    bench_encode_diff,
    bench_decode_variables,
    bench_unescape,
);

criterion_main!(benches);
