use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ModelError;
use super::model_impl::Model;
use super::node::Node;
use super::types::{Coordinate, NodeId, OutputRef, PortElements};

/// Limits for the refinement driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    pub max_iterations: usize,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

type CompilablePredicate = dyn Fn(&dyn Node) -> bool + Send + Sync;

/// Caller-supplied knobs for a transformation.
#[derive(Clone, Default)]
pub struct TransformContext {
    compilable: Option<Arc<CompilablePredicate>>,
}

impl fmt::Debug for TransformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformContext")
            .field("compilable", &self.compilable.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides which nodes refinement leaves untouched.
    pub fn with_compilable(
        mut self,
        predicate: impl Fn(&dyn Node) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.compilable = Some(Arc::new(predicate));
        self
    }

    pub fn is_compilable(&self, node: &dyn Node) -> bool {
        match &self.compilable {
            Some(predicate) => predicate(node),
            None => node.capabilities().compilable,
        }
    }
}

/// Old-port to new-port substitutions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortMap {
    entries: HashMap<OutputRef, PortElements>,
}

impl PortMap {
    pub fn get(&self, port: OutputRef) -> Option<&PortElements> {
        self.entries.get(&port)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, port: OutputRef, elements: PortElements) -> Result<(), ModelError> {
        if self.entries.contains_key(&port) {
            return Err(ModelError::PortAlreadyMapped(port));
        }
        self.entries.insert(port, elements);
        Ok(())
    }

    pub fn translate_coordinate(&self, coordinate: Coordinate) -> Result<Coordinate, ModelError> {
        let mapped = self
            .entries
            .get(&coordinate.output())
            .ok_or(ModelError::UnmappedPort(coordinate.output()))?;
        mapped
            .get(coordinate.element)
            .ok_or(ModelError::CoordinateOutOfRange(coordinate))
    }

    pub fn translate(&self, elements: &PortElements) -> Result<PortElements, ModelError> {
        elements
            .iter()
            .map(|coordinate| self.translate_coordinate(coordinate))
            .collect()
    }

    /// `self` maps A to B and `next` maps B to C; the result maps A to C.
    fn compose(&self, next: &PortMap) -> Result<PortMap, ModelError> {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for (port, elements) in &self.entries {
            entries.insert(*port, next.translate(elements)?);
        }
        Ok(PortMap { entries })
    }
}

/// Result of the refinement driver.
#[derive(Debug)]
pub struct Refined {
    pub model: Model,
    /// Passes that ran.
    pub iterations: usize,
    /// `false` when the iteration cap stopped refinement early.
    pub converged: bool,
    /// Maps ports of the source model to ports of `model`.
    pub port_map: PortMap,
}

impl Refined {
    pub fn translate(&self, elements: &PortElements) -> Result<PortElements, ModelError> {
        self.port_map.translate(elements)
    }
}

#[derive(Debug)]
struct CurrentNode {
    id: NodeId,
    output_sizes: Vec<usize>,
}

/// Graph-to-graph rewrite engine. Each pass walks a source model in topological
/// order and builds a fresh target model, recording where every source port ended up.
#[derive(Debug, Default)]
pub struct ModelTransformer {
    context: TransformContext,
    target: Model,
    port_map: PortMap,
    current: Option<CurrentNode>,
}

impl ModelTransformer {
    pub fn new(context: TransformContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn context(&self) -> &TransformContext {
        &self.context
    }

    /// Model being built by the current pass.
    pub fn target(&self) -> &Model {
        &self.target
    }

    /// Port map of the last completed operation.
    pub fn port_map(&self) -> &PortMap {
        &self.port_map
    }

    /// Runs one pass. `callback` decides what each source node turns into and
    /// returns whether the node was refined.
    pub fn transform_model(
        &mut self,
        source: &Model,
        mut callback: impl FnMut(&mut Self, &dyn Node) -> Result<bool, ModelError>,
    ) -> Result<(Model, usize), ModelError> {
        self.transform_nodes(source, source.ids().collect(), &mut callback)
    }

    fn transform_nodes(
        &mut self,
        source: &Model,
        order: Vec<NodeId>,
        callback: &mut dyn FnMut(&mut Self, &dyn Node) -> Result<bool, ModelError>,
    ) -> Result<(Model, usize), ModelError> {
        self.target = Model::new();
        self.port_map = PortMap::default();
        let mut refined = 0;

        for id in order {
            let node = source.node(id).ok_or(ModelError::UnknownNode(id))?;
            self.current = Some(CurrentNode {
                id,
                output_sizes: node.output_ports().iter().map(|p| p.size()).collect(),
            });
            let result = callback(self, node);
            let current = self.current.take();
            if result? {
                refined += 1;
            }
            if let Some(current) = current {
                for port in 0..current.output_sizes.len() {
                    let port = OutputRef::new(current.id, port);
                    if self.port_map.get(port).is_none() {
                        return Err(ModelError::UnmappedPort(port));
                    }
                }
            }
        }

        Ok((std::mem::take(&mut self.target), refined))
    }

    /// Clones every node of `source`, translating input references.
    pub fn copy_model(&mut self, source: &Model) -> Result<Model, ModelError> {
        let (model, _) = self.transform_model(source, |transformer, node| {
            transformer.copy_node(node)?;
            Ok(false)
        })?;
        Ok(model)
    }

    /// Copies only the nodes needed to compute `outputs`. Returns the new model
    /// and the translated outputs.
    pub fn copy_submodel(
        &mut self,
        source: &Model,
        outputs: &[PortElements],
    ) -> Result<(Model, Vec<PortElements>), ModelError> {
        let roots: Vec<NodeId> = outputs.iter().flat_map(|o| o.source_nodes()).collect();
        let needed: HashSet<NodeId> = source.submodel_order(roots)?.into_iter().collect();
        let order = source.ids().filter(|id| needed.contains(id)).collect();

        let (model, _) = self.transform_nodes(source, order, &mut |transformer, node| {
            transformer.copy_node(node)?;
            Ok(false)
        })?;
        let outputs = outputs
            .iter()
            .map(|elements| self.port_map.translate(elements))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((model, outputs))
    }

    /// Repeats refinement passes until one refines nothing or the cap is hit.
    pub fn refine_model(
        &mut self,
        source: &Model,
        options: &RefineOptions,
    ) -> Result<Refined, ModelError> {
        if options.max_iterations == 0 {
            let model = self.copy_model(source)?;
            let converged = self.fully_compilable(&model);
            return Ok(Refined {
                model,
                iterations: 0,
                converged,
                port_map: self.port_map.clone(),
            });
        }

        let (mut model, refined) = self.refine_pass(source)?;
        let mut total = self.port_map.clone();
        let mut iterations = 1;
        let mut converged = refined == 0;

        while !converged && iterations < options.max_iterations {
            let (next, refined) = self.refine_pass(&model)?;
            total = total.compose(&self.port_map)?;
            model = next;
            iterations += 1;
            converged = refined == 0;
        }
        // The last allowed pass may have finished the job without a quiet pass after it.
        converged = converged || self.fully_compilable(&model);

        if !converged {
            warn!(
                max_iterations = options.max_iterations,
                "refinement stopped at the iteration cap; model may still contain uncompilable nodes"
            );
        }

        self.port_map = total.clone();
        Ok(Refined {
            model,
            iterations,
            converged,
            port_map: total,
        })
    }

    fn fully_compilable(&self, model: &Model) -> bool {
        model.iter().all(|(_, node)| self.context.is_compilable(node))
    }

    fn refine_pass(&mut self, source: &Model) -> Result<(Model, usize), ModelError> {
        let (model, refined) = self.transform_model(source, |transformer, node| {
            if !transformer.context.is_compilable(node) && node.refine(transformer)? {
                return Ok(true);
            }
            transformer.copy_node(node)?;
            Ok(false)
        })?;
        debug!(refined, nodes = model.len(), "refinement pass");
        Ok((model, refined))
    }

    /// Adds a new node to the target model.
    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<NodeId, ModelError> {
        self.target.add_node(node)
    }

    /// Id of the source node being transformed.
    pub fn current_node(&self) -> Result<NodeId, ModelError> {
        self.current
            .as_ref()
            .map(|c| c.id)
            .ok_or(ModelError::NoCurrentNode)
    }

    /// Translates source-model elements to target-model elements.
    pub fn translate(&self, elements: &PortElements) -> Result<PortElements, ModelError> {
        self.port_map.translate(elements)
    }

    /// Records that output `port` of the current source node now lives at `elements`.
    pub fn map_output(&mut self, port: usize, elements: PortElements) -> Result<(), ModelError> {
        let current = self.current.as_ref().ok_or(ModelError::NoCurrentNode)?;
        let key = OutputRef::new(current.id, port);
        let expected = *current
            .output_sizes
            .get(port)
            .ok_or(ModelError::CoordinateOutOfRange(key.element(0)))?;
        if elements.len() != expected {
            return Err(ModelError::MappingSize {
                port: key,
                expected,
                found: elements.len(),
            });
        }
        self.port_map.insert(key, elements)
    }

    /// Clones `node` into the target with translated inputs and maps its outputs
    /// one to one.
    pub fn copy_node(&mut self, node: &dyn Node) -> Result<NodeId, ModelError> {
        let mut copy = node.box_clone();
        for port in copy.input_ports_mut() {
            let translated = self.port_map.translate(port.elements())?;
            port.set_elements(translated);
        }
        let sizes: Vec<usize> = copy.output_ports().iter().map(|p| p.size()).collect();
        let id = self.target.add_boxed(copy)?;
        for (port, size) in sizes.into_iter().enumerate() {
            self.map_output(port, OutputRef::new(id, port).elements(size))?;
        }
        Ok(id)
    }
}
