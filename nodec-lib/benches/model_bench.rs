use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nodec::nodes::{CoordinatewiseNode, HammingWindowNode, InputNode, SumNode};
use nodec::{
    compile_model, HostFunctions, Model, ModelTransformer, NodeId, OutputRef, PortElements,
    PortValues, RefineOptions, TransformContext,
};

fn port(node: NodeId, size: usize) -> PortElements {
    OutputRef::new(node, 0).elements(size)
}

/// Shift, window and sum `size` inputs.
fn windowed_sum(size: usize) -> (Model, NodeId, NodeId) {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(size)).unwrap();
    let shifted = model
        .add_node(CoordinatewiseNode::shift(vec![0.5; size], port(x, size)).unwrap())
        .unwrap();
    let windowed = model
        .add_node(HammingWindowNode::<f64>::new(port(shifted, size)))
        .unwrap();
    let total = model
        .add_node(SumNode::<f64>::new(vec![port(windowed, size)]))
        .unwrap();
    (model, x, total)
}

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_compute");

    for size in [8, 64, 512].iter() {
        group.bench_with_input(BenchmarkId::new("windowed_sum", size), size, |b, &size| {
            let (mut model, x, _) = windowed_sum(size);
            model.set_input(x, vec![1.0f64; size]).unwrap();
            b.iter(|| {
                black_box(model.compute().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_refine");

    for size in [8, 512].iter() {
        group.bench_with_input(BenchmarkId::new("windowed_sum", size), size, |b, &size| {
            let (model, _, _) = windowed_sum(size);
            b.iter(|| {
                let refined = ModelTransformer::new(TransformContext::new())
                    .refine_model(&model, &RefineOptions::default())
                    .unwrap();
                black_box(refined.model.len());
            });
        });
    }

    group.finish();
}

fn bench_compiled(c: &mut Criterion) {
    let mut group = c.benchmark_group("compiled_compute");

    for size in [8, 512].iter() {
        let (model, _, total) = windowed_sum(*size);
        let refined = ModelTransformer::new(TransformContext::new())
            .refine_model(&model, &RefineOptions::default())
            .unwrap();
        let output = refined.translate(&port(total, 1)).unwrap();
        let compiled = compile_model(&refined.model, &[output]).unwrap();
        let inputs = [PortValues::F64(vec![1.0; *size])];

        group.bench_with_input(BenchmarkId::new("interpreter", size), size, |b, _| {
            let mut host = HostFunctions::new();
            b.iter(|| {
                black_box(compiled.compute(&inputs, &mut host).unwrap());
            });
        });

        #[cfg(feature = "jit")]
        {
            let jit = compiled.jit().unwrap();
            group.bench_with_input(BenchmarkId::new("jit", size), size, |b, _| {
                let mut host = HostFunctions::new();
                b.iter(|| {
                    black_box(jit.compute(&inputs, &mut host).unwrap());
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_compute, bench_refine, bench_compiled);
criterion_main!(benches);
