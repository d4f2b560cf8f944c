use super::*;
use crate::archive::{ArchiveError, ObjectWriter};
use crate::emitter::BinaryOp;
use crate::nodes::{BinaryOperationNode, ConstantNode, CoordinatewiseNode, InputNode, SumNode};

fn port(node: NodeId, size: usize) -> PortElements {
    OutputRef::new(node, 0).elements(size)
}

/// Refine-only node that turns into a scale, which itself still needs refining.
#[derive(Clone, Debug)]
struct Doubler {
    input: [InputPort; 1],
    output: [OutputPort; 1],
}

impl Doubler {
    fn new(input: PortElements) -> Self {
        let size = input.len();
        Self {
            input: [InputPort::new("input", ScalarType::F64, input)],
            output: [OutputPort::vector("output", ScalarType::F64, size)],
        }
    }
}

impl Node for Doubler {
    fn type_name(&self) -> String {
        "Doubler".to_string()
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.input
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::refine_only()
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let doubled = context.input::<f64>(0)?.iter().map(|x| x * 2.0).collect();
        context.set_output(0, doubled)
    }

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        let size = self.input[0].size();
        let input = transformer.translate(self.input[0].elements())?;
        let scale = transformer.add_node(CoordinatewiseNode::scale(vec![2.0; size], input)?)?;
        transformer.map_output(0, port(scale, size))?;
        Ok(true)
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("input", self.input[0].elements())
    }
}

fn chain() -> (Model, NodeId, NodeId) {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(2)).unwrap();
    let d = model.add_node(Doubler::new(port(x, 2))).unwrap();
    (model, x, d)
}

#[test]
fn test_ids_increase_in_insertion_order() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64])).unwrap();
    let b = model.add_node(ConstantNode::new(vec![2.0f64])).unwrap();
    assert!(a < b);
    assert_eq!(model.ids().collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(model.len(), 2);
}

#[test]
fn test_forward_and_dangling_references_rejected() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64, 2.0])).unwrap();

    let dangling = OutputRef::new(NodeId(a.0 + 5), 0).elements(2);
    let err = model
        .add_node(BinaryOperationNode::<f64>::new(BinaryOp::Add, port(a, 2), dangling).unwrap())
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidReference { .. }));

    let too_far = PortElements::new(vec![OutputRef::new(a, 0).element(2)]);
    let err = model
        .add_node(BinaryOperationNode::<f64>::new(BinaryOp::Add, too_far, port(a, 1)).unwrap())
        .unwrap_err();
    assert!(matches!(err, ModelError::CoordinateOutOfRange(_)));
    assert_eq!(model.len(), 1);
}

#[test]
fn test_remove_node_respects_dependents() {
    let (mut model, x, d) = chain();
    let err = model.remove_node(x).unwrap_err();
    assert_eq!(
        err,
        ModelError::DependencyViolation {
            node: x,
            dependents: vec![d],
        }
    );

    model.remove_node(d).unwrap();
    model.remove_node(x).unwrap();
    assert!(model.is_empty());

    let next = model.add_node(InputNode::<f64>::new(1)).unwrap();
    assert!(next > d);
}

#[test]
fn test_set_input_checks_kind_and_length() {
    let (mut model, x, d) = chain();
    assert_eq!(
        model.set_input(d, vec![1.0f64, 2.0]).unwrap_err(),
        ModelError::NotAnInput { node: d }
    );
    assert!(matches!(
        model.set_input(x, vec![1.0f64]).unwrap_err(),
        ModelError::Node { .. }
    ));

    model.set_input(x, vec![1.5f64, 2.5]).unwrap();
    let out = model.compute_output(&port(d, 2)).unwrap();
    assert_eq!(out, PortValues::F64(vec![3.0, 5.0]));
}

#[test]
fn test_gather_uses_requested_type() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64, 2.0])).unwrap();
    model.compute().unwrap();

    assert_eq!(
        model.gather(&PortElements::default(), ScalarType::Bool).unwrap(),
        PortValues::Bool(Vec::new())
    );
    assert_eq!(
        model.gather(&PortElements::default(), ScalarType::F32).unwrap(),
        PortValues::F32(Vec::new())
    );
    assert_eq!(
        model.gather(&port(a, 2), ScalarType::F64).unwrap(),
        PortValues::F64(vec![1.0, 2.0])
    );
    assert_eq!(
        model.gather(&port(a, 1), ScalarType::Bool).unwrap_err(),
        ModelError::PortTypeMismatch {
            port: OutputRef::new(a, 0),
            expected: ScalarType::Bool,
            found: ScalarType::F64,
        }
    );
}

#[test]
fn test_node_as_downcasts() {
    let (model, x, d) = chain();
    assert_eq!(model.node_as::<InputNode<f64>>(x).unwrap().size(), 2);
    assert!(model.node_as::<InputNode<f32>>(x).is_none());
    assert!(model.node_as::<Doubler>(d).is_some());
    assert_eq!(model.dependencies(d), vec![x]);
    assert_eq!(model.input_nodes(), vec![x]);
}

#[test]
fn test_verify_and_submodel_order() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64])).unwrap();
    let b = model.add_node(ConstantNode::new(vec![2.0f64])).unwrap();
    let s = model
        .add_node(SumNode::<f64>::new(vec![PortElements::concat([&port(a, 1), &port(b, 1)])]))
        .unwrap();
    let unused = model.add_node(ConstantNode::new(vec![3.0f64])).unwrap();

    model.verify().unwrap();
    let order = model.submodel_order([s]).unwrap();
    assert_eq!(order, vec![a, b, s]);
    assert!(!order.contains(&unused));
}

#[test]
fn test_copy_model_is_equivalent() {
    let (mut model, x, d) = chain();
    model.set_input(x, vec![1.0f64, -1.0]).unwrap();
    let expected = model.compute_output(&port(d, 2)).unwrap();

    let mut transformer = ModelTransformer::new(TransformContext::new());
    let mut copy = transformer.copy_model(&model).unwrap();
    assert_eq!(copy.len(), model.len());

    let input = transformer.port_map().translate(&port(x, 2)).unwrap();
    copy.set_input(input.get(0).unwrap().node, vec![1.0f64, -1.0]).unwrap();
    let output = transformer.port_map().translate(&port(d, 2)).unwrap();
    assert_eq!(copy.compute_output(&output).unwrap(), expected);
}

#[test]
fn test_copy_submodel_keeps_only_needed_nodes() {
    let mut model = Model::new();
    let a = model.add_node(ConstantNode::new(vec![1.0f64, 2.0])).unwrap();
    let _b = model.add_node(ConstantNode::new(vec![5.0f64])).unwrap();
    let c = model
        .add_node(BinaryOperationNode::<f64>::new(BinaryOp::Multiply, port(a, 2), port(a, 2)).unwrap())
        .unwrap();

    let mut transformer = ModelTransformer::default();
    let (mut sub, outputs) = transformer.copy_submodel(&model, &[port(c, 2)]).unwrap();
    assert_eq!(sub.len(), 2);
    assert_eq!(
        sub.compute_output(&outputs[0]).unwrap(),
        PortValues::F64(vec![1.0, 4.0])
    );
}

#[test]
fn test_refinement_converges() {
    let (model, x, d) = chain();
    let mut refined = ModelTransformer::default()
        .refine_model(&model, &RefineOptions::default())
        .unwrap();
    // Doubler -> scale -> constant * input, then one pass that changes nothing.
    assert_eq!(refined.iterations, 3);
    assert!(refined.converged);
    assert!(refined
        .model
        .iter()
        .all(|(_, node)| !node.capabilities().must_refine()));

    let input = refined.translate(&port(x, 2)).unwrap();
    let output = refined.translate(&port(d, 2)).unwrap();
    refined
        .model
        .set_input(input.get(0).unwrap().node, vec![3.0f64, 4.0])
        .unwrap();
    assert_eq!(
        refined.model.compute_output(&output).unwrap(),
        PortValues::F64(vec![6.0, 8.0])
    );
}

#[test]
fn test_refinement_stops_at_iteration_cap() {
    let (model, _, d) = chain();
    let mut refined = ModelTransformer::default()
        .refine_model(&model, &RefineOptions { max_iterations: 1 })
        .unwrap();
    assert_eq!(refined.iterations, 1);
    assert!(!refined.converged);
    let remaining: Vec<String> = refined.model.iter().map(|(_, n)| n.type_name()).collect();
    assert!(remaining.contains(&"CoordinatewiseNode<f64>".to_string()));

    // The partial model still computes the same function.
    let output = refined.translate(&port(d, 2)).unwrap();
    assert_eq!(
        refined.model.compute_output(&output).unwrap(),
        PortValues::F64(vec![0.0, 0.0])
    );

    let copy = ModelTransformer::default()
        .refine_model(&model, &RefineOptions { max_iterations: 0 })
        .unwrap();
    assert_eq!(copy.iterations, 0);
    assert_eq!(copy.model.len(), model.len());
}

#[test]
fn test_refinement_finished_on_last_allowed_pass_converges() {
    let mut model = Model::new();
    let x = model.add_node(InputNode::<f64>::new(2)).unwrap();
    let scaled = model
        .add_node(CoordinatewiseNode::scale(vec![3.0, 3.0], port(x, 2)).unwrap())
        .unwrap();

    let mut refined = ModelTransformer::default()
        .refine_model(&model, &RefineOptions { max_iterations: 1 })
        .unwrap();
    assert_eq!(refined.iterations, 1);
    assert!(refined.converged);
    assert!(refined.model.iter().all(|(_, node)| node.capabilities().compilable));

    let input = refined.translate(&port(x, 2)).unwrap();
    let output = refined.translate(&port(scaled, 2)).unwrap();
    refined
        .model
        .set_input(input.get(0).unwrap().node, vec![1.0f64, 2.0])
        .unwrap();
    assert_eq!(
        refined.model.compute_output(&output).unwrap(),
        PortValues::F64(vec![3.0, 6.0])
    );

    let copy = ModelTransformer::default()
        .refine_model(&refined.model, &RefineOptions { max_iterations: 0 })
        .unwrap();
    assert!(copy.converged);
}

#[test]
fn test_compilable_predicate_overrides_capabilities() {
    let (model, _, _) = chain();
    let context = TransformContext::new().with_compilable(|_| true);
    let refined = ModelTransformer::new(context)
        .refine_model(&model, &RefineOptions::default())
        .unwrap();
    assert_eq!(refined.iterations, 1);
    assert!(refined.converged);
    assert_eq!(refined.model.len(), 2);
}

#[test]
fn test_mapping_errors() {
    let (model, x, d) = chain();
    let mut transformer = ModelTransformer::default();

    let err = transformer
        .transform_model(&model, |t, node| {
            if node.capabilities().input {
                t.copy_node(node)?;
            }
            Ok(false)
        })
        .unwrap_err();
    assert_eq!(err, ModelError::UnmappedPort(OutputRef::new(d, 0)));

    let err = transformer
        .transform_model(&model, |t, node| {
            let id = t.copy_node(node)?;
            t.map_output(0, port(id, node.output_ports()[0].size()))?;
            Ok(false)
        })
        .unwrap_err();
    assert_eq!(err, ModelError::PortAlreadyMapped(OutputRef::new(x, 0)));

    let err = transformer
        .transform_model(&model, |t, _| {
            let id = t.add_node(ConstantNode::new(vec![0.0f64]))?;
            t.map_output(0, port(id, 1))?;
            Ok(true)
        })
        .unwrap_err();
    assert!(matches!(err, ModelError::MappingSize { expected: 2, found: 1, .. }));

    assert_eq!(
        transformer.map_output(0, PortElements::default()).unwrap_err(),
        ModelError::NoCurrentNode
    );
}

#[test]
fn test_model_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<Model>();
}

#[test]
fn test_cloned_model_is_independent() {
    let (mut model, x, d) = chain();
    let mut clone = model.clone();
    model.set_input(x, vec![1.0f64, 1.0]).unwrap();
    clone.set_input(x, vec![5.0f64, 5.0]).unwrap();
    assert_eq!(
        model.compute_output(&port(d, 2)).unwrap(),
        PortValues::F64(vec![2.0, 2.0])
    );
    assert_eq!(
        clone.compute_output(&port(d, 2)).unwrap(),
        PortValues::F64(vec![10.0, 10.0])
    );
}
