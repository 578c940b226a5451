//! Fixture fingerprint benchmarks
//!
//! Fingerprinting runs once per intercepted request, before any I/O:
//! - Plain GET with a shuffled query string
//! - Form and JSON bodies folded into the filename
//! - Oversized filenames that fall back to a digest

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;

use replay_engine::interception::{Protocol, RequestDescriptor, RequestOptions};
use replay_engine::recording::compute_fingerprint;
use replay_engine::TransformConfig;

fn with_body(url: &str, content_type: &str, body: &str) -> RequestDescriptor {
    let options = RequestOptions::from_url(url)
        .unwrap()
        .method("POST")
        .header("Content-Type", content_type);
    let mut descriptor = RequestDescriptor::from_options(options, Protocol::Http).unwrap();
    descriptor.body = body.to_string();
    descriptor
}

fn bench_fingerprint(c: &mut Criterion) {
    let base = Path::new("/tmp/mocks");
    let transform = TransformConfig::new().ignore_params(["timestamp"]);

    let get = RequestDescriptor::from_url(
        "https://api.example.com/v1/search?q=rust&page=2&timestamp=1700000000&lang=en",
    )
    .unwrap();
    c.bench_function("fingerprint_get_query", |b| {
        b.iter(|| compute_fingerprint(base, black_box(&get), &transform, 250).unwrap())
    });

    let form = with_body(
        "https://api.example.com/v1/orders",
        "application/x-www-form-urlencoded",
        "item=tea&quantity=2&note=hot",
    );
    c.bench_function("fingerprint_form_body", |b| {
        b.iter(|| compute_fingerprint(base, black_box(&form), &transform, 250).unwrap())
    });

    let json = with_body(
        "https://api.example.com/v1/orders",
        "application/json",
        r#"{"item":"tea","quantity":2,"tags":["hot","green"]}"#,
    );
    c.bench_function("fingerprint_json_body", |b| {
        b.iter(|| compute_fingerprint(base, black_box(&json), &transform, 250).unwrap())
    });

    let long = RequestDescriptor::from_url(&format!(
        "https://api.example.com/v1/items?ids={}",
        (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(",")
    ))
    .unwrap();
    c.bench_function("fingerprint_digest_fallback", |b| {
        b.iter(|| compute_fingerprint(base, black_box(&long), &transform, 250).unwrap())
    });
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
