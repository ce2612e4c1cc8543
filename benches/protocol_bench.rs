//! Benchmarks for the protocol module.
//!
//! Run with: `cargo bench --bench protocol_bench`

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use dsql_pgadapter::protocol::framing::{PROTOCOL_VERSION_3, encode_startup_message};
use dsql_pgadapter::protocol::messages::parse_error_response;
use dsql_pgadapter::protocol::startup::decode_startup;
use dsql_pgadapter::proxy::encode_auth_success;

/// Startup body (length prefix stripped) with `extra` filler parameters
fn make_startup_body(extra: usize) -> Bytes {
    let names: Vec<String> = (0..extra).map(|i| format!("option_{i}")).collect();
    let mut params = vec![
        ("user", "admin"),
        ("database", "postgres"),
        ("application_name", "psql"),
        ("client_encoding", "UTF8"),
    ];
    params.extend(names.iter().map(|n| (n.as_str(), "on")));
    let msg = encode_startup_message(PROTOCOL_VERSION_3, &params);
    msg.freeze().slice(4..)
}

/// Generate a realistic error response payload
fn make_error_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"SFATAL\0");
    payload.extend_from_slice(b"VFATAL\0");
    payload.extend_from_slice(b"C28P01\0");
    payload.extend_from_slice(b"Mpassword authentication failed for user \"admin\"\0");
    payload.extend_from_slice(b"Dtoken has expired\0");
    payload.extend_from_slice(b"Hgenerate a new token\0");
    payload.extend_from_slice(b"Fauth.c\0");
    payload.extend_from_slice(b"L326\0");
    payload.extend_from_slice(b"Rauth_failed\0");
    payload.push(0);
    payload
}

fn bench_decode_startup(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_startup");

    for extra in [0, 8, 32, 128] {
        let body = make_startup_body(extra);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(extra), &body, |b, body| {
            b.iter(|| decode_startup(black_box(body.clone())));
        });
    }

    group.finish();
}

fn bench_parse_error_response(c: &mut Criterion) {
    let payload = make_error_payload();

    c.bench_function("parse_error_response", |b| {
        b.iter(|| parse_error_response(black_box(&payload)));
    });
}

fn bench_encode_auth_success(c: &mut Criterion) {
    c.bench_function("encode_auth_success", |b| {
        b.iter(encode_auth_success);
    });
}

criterion_group!(
    benches,
    bench_decode_startup,
    bench_parse_error_response,
    bench_encode_auth_success,
);
criterion_main!(benches);
