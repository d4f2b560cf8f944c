use std::collections::HashMap;
use std::fmt;

use arrayvec::ArrayVec;
use slotmap::SlotMap;
use tracing::trace;

use super::error::ModelError;
use super::node::{ComputeContext, Node};
use super::topology::topological_sort;
use super::types::{
    Coordinate, Element, NodeId, NodeKey, OutputRef, PortElements, PortValues, Scalar, ScalarType,
    MAX_OUTPUT_PORTS,
};

pub struct NodeData {
    pub id: NodeId,
    pub node: Box<dyn Node>,
    pub outputs: ArrayVec<PortValues, MAX_OUTPUT_PORTS>,
}

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("id", &self.id)
            .field("type", &self.node.type_name())
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Owns a set of nodes and keeps them in creation order, which is always a
/// valid topological order.
#[derive(Default)]
pub struct Model {
    nodes: SlotMap<NodeKey, NodeData>,
    order: Vec<NodeKey>,
    ids: HashMap<NodeId, NodeKey>,
    next_id: u64,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.order.iter().filter_map(|key| self.nodes.get(*key)))
            .finish()
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        let mut nodes = SlotMap::with_key();
        let mut order = Vec::with_capacity(self.order.len());
        let mut ids = HashMap::with_capacity(self.ids.len());
        for key in &self.order {
            let data = &self.nodes[*key];
            let new_key = nodes.insert(NodeData {
                id: data.id,
                node: data.node.box_clone(),
                outputs: data.outputs.clone(),
            });
            order.push(new_key);
            ids.insert(data.id, new_key);
        }
        Self {
            nodes,
            order,
            ids,
            next_id: self.next_id,
        }
    }
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Validates the node's references, assigns the next id and appends it.
    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<NodeId, ModelError> {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> Result<NodeId, ModelError> {
        let id = NodeId(self.next_id);
        self.insert_with_id(id, node)?;
        Ok(id)
    }

    /// Inserts a node under a caller-chosen id, used when unarchiving. Ids must
    /// keep increasing.
    pub(crate) fn insert_with_id(&mut self, id: NodeId, node: Box<dyn Node>) -> Result<(), ModelError> {
        if id.0 < self.next_id {
            return Err(ModelError::NonMonotonicId(id));
        }
        if node.output_ports().len() > MAX_OUTPUT_PORTS {
            return Err(ModelError::TooManyOutputPorts(node.output_ports().len()));
        }
        self.validate_inputs(id, node.as_ref())?;

        let outputs = node
            .output_ports()
            .iter()
            .map(|port| PortValues::zeros(port.port_type(), port.size()))
            .collect();

        trace!(node = %id, type_name = %node.type_name(), "adding node");
        let key = self.nodes.insert(NodeData { id, node, outputs });
        self.order.push(key);
        self.ids.insert(id, key);
        self.next_id = id.0 + 1;
        Ok(())
    }

    fn validate_inputs(&self, id: NodeId, node: &dyn Node) -> Result<(), ModelError> {
        for input in node.input_ports() {
            for coordinate in input.elements() {
                let invalid = || ModelError::InvalidReference {
                    node: id,
                    coordinate: *coordinate,
                };
                if coordinate.node >= id {
                    return Err(invalid());
                }
                let source = self.data(coordinate.node).map_err(|_| invalid())?;
                let port = source
                    .node
                    .output_ports()
                    .get(coordinate.port)
                    .ok_or(ModelError::CoordinateOutOfRange(*coordinate))?;
                if coordinate.element >= port.size() {
                    return Err(ModelError::CoordinateOutOfRange(*coordinate));
                }
                if port.port_type() != input.port_type() {
                    return Err(ModelError::PortTypeMismatch {
                        port: coordinate.output(),
                        expected: input.port_type(),
                        found: port.port_type(),
                    });
                }
            }
        }
        Ok(())
    }

    fn data(&self, id: NodeId) -> Result<&NodeData, ModelError> {
        self.ids
            .get(&id)
            .and_then(|key| self.nodes.get(*key))
            .ok_or(ModelError::UnknownNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, ModelError> {
        let key = *self.ids.get(&id).ok_or(ModelError::UnknownNode(id))?;
        self.nodes.get_mut(key).ok_or(ModelError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
        self.data(id).ok().map(|data| data.node.as_ref())
    }

    pub fn node_as<N: Node + 'static>(&self, id: NodeId) -> Option<&N> {
        self.node(id)?.as_any().downcast_ref()
    }

    pub fn node_as_mut<N: Node + 'static>(&mut self, id: NodeId) -> Option<&mut N> {
        self.data_mut(id).ok()?.node.as_any_mut().downcast_mut()
    }

    /// Node ids in topological (creation) order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().map(move |key| self.nodes[*key].id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn Node)> + '_ {
        self.order.iter().map(move |key| {
            let data = &self.nodes[*key];
            (data.id, data.node.as_ref())
        })
    }

    pub fn visit(&self, mut callback: impl FnMut(NodeId, &dyn Node)) {
        for (id, node) in self.iter() {
            callback(id, node);
        }
    }

    pub fn try_visit<E>(
        &self,
        mut callback: impl FnMut(NodeId, &dyn Node) -> Result<(), E>,
    ) -> Result<(), E> {
        for (id, node) in self.iter() {
            callback(id, node)?;
        }
        Ok(())
    }

    /// Nodes reading any output of `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| {
                node.input_ports()
                    .iter()
                    .any(|port| port.elements().iter().any(|c| c.node == id))
            })
            .map(|(dependent, _)| dependent)
            .collect()
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Box<dyn Node>, ModelError> {
        let key = *self.ids.get(&id).ok_or(ModelError::UnknownNode(id))?;
        let dependents = self.dependents(id);
        if !dependents.is_empty() {
            return Err(ModelError::DependencyViolation {
                node: id,
                dependents,
            });
        }

        trace!(node = %id, "removing node");
        self.ids.remove(&id);
        self.order.retain(|k| *k != key);
        let data = self.nodes.remove(key).ok_or(ModelError::UnknownNode(id))?;
        Ok(data.node)
    }

    pub fn output_size(&self, port: OutputRef) -> Result<usize, ModelError> {
        let data = self.data(port.node)?;
        data.node
            .output_ports()
            .get(port.port)
            .map(|p| p.size())
            .ok_or(ModelError::CoordinateOutOfRange(port.element(0)))
    }

    /// Every element of an output port, in order.
    pub fn port_elements(&self, port: OutputRef) -> Result<PortElements, ModelError> {
        Ok(port.elements(self.output_size(port)?))
    }

    /// Buffer of an output port as of the last compute.
    pub fn output_values(&self, port: OutputRef) -> Result<&PortValues, ModelError> {
        self.data(port.node)?
            .outputs
            .get(port.port)
            .ok_or(ModelError::CoordinateOutOfRange(port.element(0)))
    }

    pub fn value(&self, coordinate: Coordinate) -> Result<Scalar, ModelError> {
        self.output_values(coordinate.output())?
            .get(coordinate.element)
            .ok_or(ModelError::CoordinateOutOfRange(coordinate))
    }

    /// Collects the current values of `elements` into one buffer of `scalar_type`.
    pub fn gather(
        &self,
        elements: &PortElements,
        scalar_type: ScalarType,
    ) -> Result<PortValues, ModelError> {
        let mut values = PortValues::with_capacity(scalar_type, elements.len());
        for coordinate in elements.iter() {
            let value = self.value(coordinate)?;
            if !values.push(value) {
                return Err(ModelError::PortTypeMismatch {
                    port: coordinate.output(),
                    expected: scalar_type,
                    found: value.scalar_type(),
                });
            }
        }
        Ok(values)
    }

    /// Writes values into the output buffer of an input node.
    pub fn set_input<T: Element>(&mut self, id: NodeId, values: Vec<T>) -> Result<(), ModelError> {
        let data = self.data_mut(id)?;
        if !data.node.capabilities().input {
            return Err(ModelError::NotAnInput { node: id });
        }
        let type_name = data.node.type_name();
        let mut context = ComputeContext::new(&[], &mut data.outputs);
        context
            .set_output(0, values)
            .map_err(|source| ModelError::Node {
                node: id,
                type_name,
                source,
            })
    }

    /// Ids of the input nodes, in order. These become the parameters of a compiled routine.
    pub fn input_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.capabilities().input)
            .map(|(id, _)| id)
            .collect()
    }

    /// Runs every node's compute in topological order.
    pub fn compute(&mut self) -> Result<(), ModelError> {
        for index in 0..self.order.len() {
            let key = self.order[index];
            let inputs = {
                let data = &self.nodes[key];
                data.node
                    .input_ports()
                    .iter()
                    .map(|port| self.gather(port.elements(), port.port_type()))
                    .collect::<Result<Vec<_>, _>>()?
            };

            let data = &mut self.nodes[key];
            let mut context = ComputeContext::new(&inputs, &mut data.outputs);
            data.node
                .compute(&mut context)
                .map_err(|source| ModelError::Node {
                    node: data.id,
                    type_name: data.node.type_name(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Computes the model, then gathers the requested elements. The buffer takes
    /// the type of the first element's port; an empty request yields empty `f64`s.
    pub fn compute_output(&mut self, elements: &PortElements) -> Result<PortValues, ModelError> {
        self.compute()?;
        let scalar_type = match elements.get(0) {
            Some(first) => self.output_values(first.output())?.scalar_type(),
            None => ScalarType::F64,
        };
        self.gather(elements, scalar_type)
    }

    /// Re-checks the DAG invariant: every reference points at an existing, earlier
    /// node, and the dependency graph has no cycle.
    pub fn verify(&self) -> Result<(), ModelError> {
        for (id, node) in self.iter() {
            for port in node.input_ports() {
                for coordinate in port.elements() {
                    if coordinate.node >= id || !self.contains(coordinate.node) {
                        return Err(ModelError::InvalidReference {
                            node: id,
                            coordinate: *coordinate,
                        });
                    }
                }
            }
        }
        self.submodel_order(self.ids().collect::<Vec<_>>())?;
        Ok(())
    }

    /// Dependencies of a node: distinct source nodes of all its inputs.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut sources = Vec::new();
        if let Some(node) = self.node(id) {
            for port in node.input_ports() {
                for source in port.elements().source_nodes() {
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                }
            }
        }
        sources
    }

    /// Nodes needed to compute `roots`, dependencies first.
    pub fn submodel_order(&self, roots: impl IntoIterator<Item = NodeId>) -> Result<Vec<NodeId>, ModelError> {
        Ok(topological_sort(roots, |id| self.dependencies(*id))?)
    }
}
