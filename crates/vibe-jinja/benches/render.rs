//! Template rendering benchmarks
//!
//! Run with: cargo bench -p vibe-jinja

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use vibe_jinja::{Engine, ValueMap, to_context};

const SIMPLE: &str = "Hello {{ name }}!";
const LOOP: &str = "{% for item in items %}{{ item }}{% endfor %}";
const CONDITIONAL: &str =
    "{% if x > 5 %}big{% elif x > 2 %}medium{% else %}small{% endif %}";
const NESTED: &str = "{% for row in rows %}<tr>{% for cell in row %}<td>{{ cell }}</td>{% endfor %}</tr>{% endfor %}";
const FILTER_CHAIN: &str = "{{ text|upper|lower|trim|length }}";

fn json_context() -> serde_json::Value {
    let rows: Vec<Vec<i64>> = (0..10).map(|r| (0..10).map(|c| r * 10 + c).collect()).collect();
    json!({
        "name": "World",
        "items": (0..100).collect::<Vec<i64>>(),
        "x": 3,
        "rows": rows,
        "text": "  The Quick Brown Fox  ",
    })
}

fn context() -> ValueMap {
    to_context(&json_context()).unwrap()
}

/// Render an already compiled template
fn bench_render(c: &mut Criterion) {
    let engine = Engine::new();
    let ctx = context();
    for (name, source) in [
        ("simple", SIMPLE),
        ("loop_100", LOOP),
        ("conditional", CONDITIONAL),
        ("nested_10x10", NESTED),
        ("filter_chain", FILTER_CHAIN),
    ] {
        let template = engine.add_template(name, source).unwrap();
        c.bench_function(&format!("render_{}", name), |b| {
            b.iter(|| black_box(template.render_map(black_box(&ctx)).unwrap()))
        });
    }
}

/// Parse, compile and render from scratch on every iteration
fn bench_compile_and_render(c: &mut Criterion) {
    let engine = Engine::new();
    let ctx = json_context();
    c.bench_function("compile_render_loop_100", |b| {
        b.iter(|| black_box(engine.render_str(black_box(LOOP), &ctx).unwrap()))
    });
}

/// Template lookup through the compiled-template map
fn bench_cached_lookup(c: &mut Criterion) {
    let engine = Engine::new();
    engine.add_template("page", NESTED).unwrap();
    let ctx = context();
    c.bench_function("cached_get_and_render", |b| {
        b.iter(|| {
            let template = engine.get_template(black_box("page")).unwrap();
            black_box(template.render_map(&ctx).unwrap())
        })
    });
}

/// Load persisted bytecode instead of compiling
fn bench_bytecode_load(c: &mut Criterion) {
    let engine = Engine::new();
    let bytes = engine.compile_to_bytes(NESTED).unwrap();
    c.bench_function("load_bytecode_nested", |b| {
        b.iter_batched(
            || bytes.clone(),
            |bytes| black_box(engine.template_from_bytes("page", &bytes).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_render,
    bench_compile_and_render,
    bench_cached_lookup,
    bench_bytecode_load
);
criterion_main!(benches);
