use std::sync::{Arc, Mutex};

use super::*;
use crate::emitter::{BinaryOp, ComparePredicate, HostValue};
use crate::model::{ModelTransformer, RefineOptions, TransformContext};
use crate::nodes::{
    BinaryOperationNode, BinaryPredicateNode, ConcatenationNode, ConstantNode, CoordinatewiseNode,
    InputNode, SinkNode, SumNode,
};

fn port(node: NodeId, size: usize) -> PortElements {
    OutputRef::new(node, 0).elements(size)
}

/// `input * [0, 1, .., size)`; returns the model and the product node.
fn product_model(size: usize) -> (Model, NodeId) {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(size)).unwrap();
    let weights = model
        .add_node(ConstantNode::new((0..size).map(|i| i as f64).collect()))
        .unwrap();
    let product = model
        .add_node(
            BinaryOperationNode::<f64>::new(BinaryOp::Multiply, port(input, size), port(weights, size))
                .unwrap(),
        )
        .unwrap();
    (model, product)
}

fn main_function(compiled: &CompiledMap) -> &crate::emitter::ir::Function {
    compiled.module().function("predict").unwrap()
}

#[test]
fn test_small_sizes_are_expanded() {
    let (model, product) = product_model(3);
    let compiled = compile_model(&model, &[port(product, 3)]).unwrap();
    assert_eq!(compiled.strategy(product), Some(EmissionStrategy::Expanded));
    assert_eq!(main_function(&compiled).count_loops(), 0);

    let out = compiled
        .compute(&[PortValues::F64(vec![5.0, 5.0, 5.0])], &mut HostFunctions::new())
        .unwrap();
    assert_eq!(out, vec![PortValues::F64(vec![0.0, 5.0, 10.0])]);
}

#[test]
fn test_large_sizes_emit_loops() {
    let (model, product) = product_model(20);
    let compiled = compile_model(&model, &[port(product, 20)]).unwrap();
    assert_eq!(compiled.strategy(product), Some(EmissionStrategy::Loop));
    // One loop for the product, one copying it into the output parameter.
    assert_eq!(main_function(&compiled).count_loops(), 2);

    let unrolled = IrMapCompiler::new(CompilerOptions {
        unroll_loops: true,
        ..CompilerOptions::default()
    })
    .compile(&model, &[port(product, 20)])
    .unwrap();
    assert_eq!(unrolled.strategy(product), Some(EmissionStrategy::Expanded));
    assert_eq!(main_function(&unrolled).count_loops(), 0);

    let inputs = [PortValues::F64(vec![2.0; 20])];
    assert_eq!(
        compiled.compute(&inputs, &mut HostFunctions::new()).unwrap(),
        unrolled.compute(&inputs, &mut HostFunctions::new()).unwrap()
    );
}

#[test]
fn test_subroutines_are_called_from_entry_point() {
    let (model, product) = product_model(4);
    let options = CompilerOptions {
        inline: InlinePolicy::Never,
        function_name: "run".to_string(),
        ..CompilerOptions::default()
    };
    let compiled = IrMapCompiler::new(options).compile(&model, &[port(product, 4)]).unwrap();
    assert_eq!(compiled.report().subroutines, vec![product]);

    let name = format!("run_node_{product}");
    let subroutine = compiled.module().function(&name).unwrap();
    assert_eq!(subroutine.params.len(), 3);
    let entry = compiled.module().function("run").unwrap();
    assert_eq!(entry.calls(), vec![&Callee::Function(name)]);

    let out = compiled
        .compute(&[PortValues::F64(vec![1.0, 1.0, 1.0, 1.0])], &mut HostFunctions::new())
        .unwrap();
    assert_eq!(out, vec![PortValues::F64(vec![0.0, 1.0, 2.0, 3.0])]);
}

#[test]
fn test_unrefined_nodes_are_rejected() {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(2)).unwrap();
    let scaled = model
        .add_node(CoordinatewiseNode::scale(vec![2.0, 3.0], port(x, 2)).unwrap())
        .unwrap();
    let err = compile_model(&model, &[port(scaled, 2)]).unwrap_err();
    assert_eq!(
        err,
        CompileError::UncompilableNode {
            node: scaled,
            type_name: "CoordinatewiseNode<f64>".to_string(),
        }
    );

    let mut refined = ModelTransformer::new(TransformContext::new())
        .refine_model(&model, &RefineOptions::default())
        .unwrap();
    let output = refined.translate(&port(scaled, 2)).unwrap();
    let compiled = compile_model(&refined.model, &[output.clone()]).unwrap();

    let input = refined.model.input_nodes()[0];
    refined.model.set_input(input, vec![4.0f64, 5.0]).unwrap();
    let expected = refined.model.compute_output(&output).unwrap();
    let out = compiled
        .compute(&[PortValues::F64(vec![4.0, 5.0])], &mut HostFunctions::new())
        .unwrap();
    assert_eq!(out, vec![expected]);
    assert_eq!(out[0], PortValues::F64(vec![8.0, 15.0]));
}

#[test]
fn test_concatenation_aliases_without_copies() {
    let mut model = Model::new();
    let a = model.add_node(InputNode::<f32>::new(2)).unwrap();
    let b = model.add_node(ConstantNode::new(vec![10.0f32])).unwrap();
    let joined = model
        .add_node(ConcatenationNode::<f32>::new(PortElements::concat([&port(b, 1), &port(a, 2)])))
        .unwrap();
    let doubled = model
        .add_node(BinaryOperationNode::<f32>::new(BinaryOp::Add, port(joined, 3), port(joined, 3)).unwrap())
        .unwrap();

    let compiled = compile_model(&model, &[port(doubled, 3), port(joined, 3)]).unwrap();
    let out = compiled
        .compute(&[PortValues::F32(vec![1.0, 2.0])], &mut HostFunctions::new())
        .unwrap();
    assert_eq!(
        out,
        vec![
            PortValues::F32(vec![20.0, 2.0, 4.0]),
            PortValues::F32(vec![10.0, 1.0, 2.0]),
        ]
    );
    assert!(compiled.strategy(joined).is_none());
}

#[test]
fn test_sum_uses_loop_for_long_groups() {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(16)).unwrap();
    let sum = model
        .add_node(SumNode::<f64>::new(vec![
            port(x, 16),
            PortElements::new(vec![
                OutputRef::new(x, 0).element(0),
                OutputRef::new(x, 0).element(15),
            ]),
        ]))
        .unwrap();
    let compiled = compile_model(&model, &[port(sum, 2)]).unwrap();
    assert_eq!(
        compiled.report().strategies,
        vec![(sum, EmissionStrategy::Loop), (sum, EmissionStrategy::Expanded)]
    );

    let out = compiled
        .compute(&[PortValues::F64((1..=16).map(f64::from).collect())], &mut HostFunctions::new())
        .unwrap();
    assert_eq!(out, vec![PortValues::F64(vec![136.0, 17.0])]);
}

#[test]
fn test_sink_calls_host_function_when_triggered() {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(2)).unwrap();
    let limit = model.add_node(ConstantNode::new(vec![0.0f64])).unwrap();
    let negative = model
        .add_node(BinaryPredicateNode::<f64>::new(ComparePredicate::Less, port(x, 1), port(limit, 1)).unwrap())
        .unwrap();
    let sink = model
        .add_node(SinkNode::<f64>::new(port(x, 2), port(negative, 1), "alarm").unwrap())
        .unwrap();
    let compiled = compile_model(&model, &[port(sink, 2)]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let mut host = HostFunctions::new();
    host.register("alarm", move |args: &[HostValue]| {
        log.lock().unwrap().push(args.to_vec());
    });

    let out = compiled.compute(&[PortValues::F64(vec![1.0, 2.0])], &mut host).unwrap();
    assert_eq!(out, vec![PortValues::F64(vec![1.0, 2.0])]);
    assert!(seen.lock().unwrap().is_empty());

    compiled.compute(&[PortValues::F64(vec![-1.0, 2.0])], &mut host).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![HostValue::Array(PortValues::F64(vec![-1.0, 2.0]))]]
    );

    let err = compiled
        .compute(&[PortValues::F64(vec![-1.0, 2.0])], &mut HostFunctions::new())
        .unwrap_err();
    assert_eq!(err, RuntimeError::UnknownHostFunction("alarm".to_string()));
}

#[test]
fn test_signature_and_argument_checks() {
    let (model, product) = product_model(2);
    let compiled = compile_model(&model, &[port(product, 2)]).unwrap();
    let signature = compiled.signature();
    assert_eq!(signature.function, "predict");
    assert_eq!(signature.inputs.len(), 1);
    assert_eq!(signature.outputs[0].element_type, ScalarType::F64);
    assert_eq!(signature.params().len(), 2);

    assert!(matches!(
        compiled.compute(&[], &mut HostFunctions::new()),
        Err(RuntimeError::ArgumentCount { expected: 1, found: 0, .. })
    ));
}

#[test]
fn test_outputs_must_share_element_type() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64])).unwrap();
    let p = model
        .add_node(BinaryPredicateNode::<f64>::new(ComparePredicate::Equal, port(a, 1), port(a, 1)).unwrap())
        .unwrap();
    let mixed = PortElements::concat([&port(a, 1), &port(p, 1)]);
    assert!(matches!(
        compile_model(&model, &[mixed]),
        Err(CompileError::InvalidOutput(_))
    ));
}
