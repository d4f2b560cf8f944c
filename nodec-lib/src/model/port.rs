use super::types::{Coordinate, PortElements, PortMemoryLayout, ScalarType};

/// Reads elements of earlier output ports. Owns no memory.
#[derive(Clone, Debug, PartialEq)]
pub struct InputPort {
    name: &'static str,
    port_type: ScalarType,
    elements: PortElements,
}

impl InputPort {
    pub fn new(name: &'static str, port_type: ScalarType, elements: PortElements) -> Self {
        Self {
            name,
            port_type,
            elements,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn port_type(&self) -> ScalarType {
        self.port_type
    }

    pub fn elements(&self) -> &PortElements {
        &self.elements
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn coordinate(&self, index: usize) -> Option<Coordinate> {
        self.elements.get(index)
    }

    pub(crate) fn set_elements(&mut self, elements: PortElements) {
        self.elements = elements;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputPort {
    name: &'static str,
    port_type: ScalarType,
    layout: PortMemoryLayout,
}

impl OutputPort {
    pub fn new(name: &'static str, port_type: ScalarType, layout: PortMemoryLayout) -> Self {
        Self {
            name,
            port_type,
            layout,
        }
    }

    pub fn vector(name: &'static str, port_type: ScalarType, size: usize) -> Self {
        Self::new(name, port_type, PortMemoryLayout::vector(size))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn port_type(&self) -> ScalarType {
        self.port_type
    }

    pub fn layout(&self) -> &PortMemoryLayout {
        &self.layout
    }

    /// Number of active elements, which is also the length of the computed buffer.
    pub fn size(&self) -> usize {
        self.layout.active_size()
    }
}
