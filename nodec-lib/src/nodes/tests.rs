use std::sync::{Arc, Mutex};

use float_cmp::assert_approx_eq;

use super::*;
use crate::archive::{ArchiveVersion, NodeRegistry};
use crate::emitter::{BinaryOp, ComparePredicate};
use crate::model::{
    MemoryShape, Model, ModelError, ModelTransformer, Node, NodeError, NodeId, OutputRef,
    PortElements, PortValues, RefineOptions, TransformContext,
};

fn port(node: NodeId, size: usize) -> PortElements {
    OutputRef::new(node, 0).elements(size)
}

fn refine(model: &Model) -> crate::model::Refined {
    ModelTransformer::new(TransformContext::new())
        .refine_model(model, &RefineOptions::default())
        .unwrap()
}

#[test]
fn test_constant_emits_values() {
    let mut model = Model::new();
    let c = model.add_node(ConstantNode::new(vec![1.5f64, -2.0])).unwrap();
    let out = model.compute_output(&port(c, 2)).unwrap();
    assert_eq!(out, PortValues::F64(vec![1.5, -2.0]));
}

#[test]
fn test_constant_shape_must_match_values() {
    let err = ConstantNode::with_shape(vec![1.0f32; 5], MemoryShape::new(vec![2, 3])).unwrap_err();
    assert_eq!(
        err,
        NodeError::LengthMismatch {
            what: "constant shape",
            expected: 6,
            found: 5,
        }
    );
    let node = ConstantNode::with_shape(vec![0.0f32; 6], MemoryShape::new(vec![2, 3])).unwrap();
    assert_eq!(node.shape().dims(), &[2, 3]);
}

#[test]
fn test_binary_operation_computes_elementwise() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![6.0f64, 8.0])).unwrap();
    let b = model.add_node(ConstantNode::new(vec![2.0f64, 4.0])).unwrap();
    let ops = [
        (BinaryOp::Add, [8.0, 12.0]),
        (BinaryOp::Subtract, [4.0, 4.0]),
        (BinaryOp::Multiply, [12.0, 32.0]),
        (BinaryOp::Divide, [3.0, 2.0]),
    ];
    let ids: Vec<_> = ops
        .iter()
        .map(|(op, _)| {
            model
                .add_node(BinaryOperationNode::<f64>::new(*op, port(a, 2), port(b, 2)).unwrap())
                .unwrap()
        })
        .collect();
    model.compute().unwrap();
    for (id, (_, expected)) in ids.into_iter().zip(ops) {
        assert_eq!(
            model.output_values(OutputRef::new(id, 0)).unwrap(),
            &PortValues::F64(expected.to_vec())
        );
    }
}

#[test]
fn test_binary_operation_rejects_mismatched_inputs() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64, 2.0])).unwrap();
    let err = BinaryOperationNode::<f64>::new(BinaryOp::Add, port(a, 2), port(a, 1)).unwrap_err();
    assert!(matches!(err, NodeError::LengthMismatch { expected: 2, found: 1, .. }));

    let err = BinaryOperationNode::<f64>::from_name("modulo", port(a, 1), port(a, 1)).unwrap_err();
    assert!(matches!(err, NodeError::UnknownVariant { .. }));
}

#[test]
fn test_binary_predicate_emits_booleans() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f32, 5.0, 3.0])).unwrap();
    let b = model.add_node(ConstantNode::new(vec![2.0f32, 5.0, 1.0])).unwrap();
    let p = model
        .add_node(BinaryPredicateNode::<f32>::from_name("less_or_equal", port(a, 3), port(b, 3)).unwrap())
        .unwrap();
    let out = model.compute_output(&port(p, 3)).unwrap();
    assert_eq!(out, PortValues::Bool(vec![true, true, false]));
}

#[test]
fn test_predicate_output_cannot_feed_real_input() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64])).unwrap();
    let p = model
        .add_node(BinaryPredicateNode::<f64>::new(ComparePredicate::Equal, port(a, 1), port(a, 1)).unwrap())
        .unwrap();
    let err = model
        .add_node(BinaryOperationNode::<f64>::new(BinaryOp::Add, port(p, 1), port(a, 1)).unwrap())
        .unwrap_err();
    assert!(matches!(err, ModelError::PortTypeMismatch { .. }));
}

#[test]
fn test_coordinatewise_scale_and_shift() {
    let mut model = Model::new();
    let x = model.add_node(ConstantNode::new(vec![2.0f64, 3.0])).unwrap();
    let scaled = model
        .add_node(CoordinatewiseNode::scale(vec![10.0, 100.0], port(x, 2)).unwrap())
        .unwrap();
    let shifted = model
        .add_node(CoordinatewiseNode::shift(vec![-1.0, 1.0], port(scaled, 2)).unwrap())
        .unwrap();
    let out = model.compute_output(&port(shifted, 2)).unwrap();
    assert_eq!(out, PortValues::F64(vec![19.0, 301.0]));
}

#[test]
fn test_coordinatewise_values_must_match_coordinates() {
    let mut model = Model::new();
    let x = model.add_node(ConstantNode::new(vec![2.0f64, 3.0])).unwrap();
    let err = CoordinatewiseNode::scale(vec![1.0], port(x, 2)).unwrap_err();
    assert!(matches!(err, NodeError::LengthMismatch { expected: 2, found: 1, .. }));
    assert!("rotate".parse::<CoordinatewiseOperation>().is_err());
}

#[test]
fn test_coordinatewise_refines_to_constant_and_binary_operation() {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(3)).unwrap();
    let scaled = model
        .add_node(CoordinatewiseNode::scale(vec![2.0, 3.0, 4.0], port(x, 3)).unwrap())
        .unwrap();

    let mut refined = refine(&model);
    assert!(refined.converged);
    assert_eq!(refined.iterations, 2);
    assert_eq!(refined.model.len(), 3);
    assert!(refined.model.iter().all(|(_, node)| node.capabilities().compilable));

    let output = refined.translate(&port(scaled, 3)).unwrap();
    let input = refined.translate(&port(x, 3)).unwrap();
    let input_id = input.get(0).unwrap().node;
    refined.model.set_input(input_id, vec![1.0f64, 1.0, 2.0]).unwrap();
    let out = refined.model.compute_output(&output).unwrap();
    assert_eq!(out, PortValues::F64(vec![2.0, 3.0, 8.0]));
}

#[test]
fn test_sum_groups_and_empty_group() {
    let mut model = Model::new();
    let x = model.add_node(ConstantNode::new(vec![1.0f64, 2.0, 3.0])).unwrap();
    let groups = vec![
        PortElements::new(vec![
            OutputRef::new(x, 0).element(0),
            OutputRef::new(x, 0).element(1),
        ]),
        PortElements::new(vec![
            OutputRef::new(x, 0).element(1),
            OutputRef::new(x, 0).element(2),
        ]),
        PortElements::default(),
    ];
    let sum = model.add_node(SumNode::<f64>::new(groups)).unwrap();
    let out = model.compute_output(&port(sum, 3)).unwrap();
    assert_eq!(out, PortValues::F64(vec![3.0, 5.0, 0.0]));
}

#[test]
fn test_concatenation_regroups_elements() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f32, 2.0])).unwrap();
    let b = model.add_node(ConstantNode::new(vec![3.0f32])).unwrap();
    let joined = PortElements::concat([&port(b, 1), &port(a, 2)]);
    let cat = model.add_node(ConcatenationNode::<f32>::new(joined)).unwrap();
    let out = model.compute_output(&port(cat, 3)).unwrap();
    assert_eq!(out, PortValues::F32(vec![3.0, 1.0, 2.0]));

    let err = ConcatenationNode::<f32>::with_shape(port(a, 2), MemoryShape::vector(3)).unwrap_err();
    assert!(matches!(err, NodeError::LengthMismatch { .. }));
}

#[test]
fn test_hamming_window_values() {
    let window = hamming_window::<f64>(5);
    let expected = [0.08, 0.54, 1.0, 0.54, 0.08];
    for (value, expected) in window.iter().zip(expected) {
        assert_approx_eq!(f64, *value, expected, epsilon = 1e-12);
    }
    assert_eq!(hamming_window::<f32>(1), vec![1.0]);
    assert!(hamming_window::<f32>(0).is_empty());
}

#[test]
fn test_hamming_window_node_refines_to_same_values() {
    let mut model = Model::new();
    let x = model.add_node(ConstantNode::new(vec![2.0f64; 4])).unwrap();
    let w = model.add_node(HammingWindowNode::<f64>::new(port(x, 4))).unwrap();
    let direct = model.compute_output(&port(w, 4)).unwrap();

    let mut refined = refine(&model);
    let output = refined.translate(&port(w, 4)).unwrap();
    let via_refined = refined.model.compute_output(&output).unwrap();

    let direct = direct.as_slice::<f64>().unwrap();
    let via_refined = via_refined.as_slice::<f64>().unwrap();
    for (a, b) in direct.iter().zip(via_refined) {
        assert_approx_eq!(f64, *a, *b);
    }
    assert_approx_eq!(f64, direct[0], 0.16, epsilon = 1e-12);
}

#[test]
fn test_sink_calls_back_only_when_triggered() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let mut model = Model::new();
    let data = model.add_node(ConstantNode::new(vec![4.0f64, 5.0])).unwrap();
    let trigger = model.add_node(InputNode::<bool>::new(1)).unwrap();
    let sink = model
        .add_node(
            SinkNode::<f64>::new(port(data, 2), port(trigger, 1), "observe")
                .unwrap()
                .with_callback(move |values| log.lock().unwrap().push(values.to_vec())),
        )
        .unwrap();

    let out = model.compute_output(&port(sink, 2)).unwrap();
    assert_eq!(out, PortValues::F64(vec![4.0, 5.0]));
    assert!(seen.lock().unwrap().is_empty());

    model.set_input(trigger, vec![true]).unwrap();
    model.compute().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![vec![4.0, 5.0]]);
}

#[test]
fn test_sink_trigger_must_be_single_element() {
    let mut model = Model::new();
    let trigger = model.add_node(InputNode::<bool>::new(2)).unwrap();
    let err = SinkNode::<bool>::new(port(trigger, 2), port(trigger, 2), "s").unwrap_err();
    assert!(matches!(err, NodeError::LengthMismatch { expected: 1, found: 2, .. }));
}

#[test]
fn test_standard_registry_versions() {
    let registry = NodeRegistry::standard();
    assert!(registry.contains("ConstantNode<f64>"));
    assert!(registry.contains("SinkNode<bool>"));
    assert!(!registry.contains("SumNode<bool>"));
    assert_eq!(
        registry.current_version("ConstantNode<f32>").unwrap(),
        ArchiveVersion(2)
    );
    assert_eq!(
        registry.current_version("BinaryOperationNode<f64>").unwrap(),
        ArchiveVersion(1)
    );
}

#[test]
fn test_configured_nodes_report_state() {
    let x = port(NodeId(0), 2);
    let trigger = OutputRef::new(NodeId(1), 0).elements(1);

    let stateful: Vec<Box<dyn Node>> = vec![
        Box::new(ConstantNode::new(vec![1.0f64])),
        Box::new(BinaryPredicateNode::<f64>::new(ComparePredicate::Less, x.clone(), x.clone()).unwrap()),
        Box::new(HammingWindowNode::<f64>::new(x.clone())),
        Box::new(ConcatenationNode::<f64>::new(x.clone())),
        Box::new(SinkNode::<f64>::new(x.clone(), trigger, "s").unwrap()),
        Box::new(CoordinatewiseNode::scale(vec![2.0f64; 2], x.clone()).unwrap()),
    ];
    for node in &stateful {
        assert!(node.has_state(), "{}", node.type_name());
    }

    let stateless: Vec<Box<dyn Node>> = vec![
        Box::new(InputNode::<f64>::new(2)),
        Box::new(BinaryOperationNode::<f64>::new(BinaryOp::Add, x.clone(), x.clone()).unwrap()),
        Box::new(SumNode::<f64>::new(vec![x])),
    ];
    for node in &stateless {
        assert!(!node.has_state(), "{}", node.type_name());
    }
}
