use std::fmt;
use std::ops::Range;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

pub const MAX_OUTPUT_PORTS: usize = 8;

new_key_type! { pub struct NodeKey; }

/// Stable node identifier. Ids are handed out in increasing order, so an id
/// comparison doubles as a dependency-order check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One output port of one node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: usize,
}

impl OutputRef {
    pub const fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }

    pub const fn element(self, element: usize) -> Coordinate {
        Coordinate {
            node: self.node,
            port: self.port,
            element,
        }
    }

    /// The first `size` elements of this port, in order.
    pub fn elements(self, size: usize) -> PortElements {
        (0..size).map(|element| self.element(element)).collect()
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

/// Address of a single scalar: element `element` of output port `port` on node `node`.
///
/// Archived as a `(node, port, element)` triple.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(NodeId, usize, usize)", into = "(NodeId, usize, usize)")]
pub struct Coordinate {
    pub node: NodeId,
    pub port: usize,
    pub element: usize,
}

impl Coordinate {
    pub const fn new(node: NodeId, port: usize, element: usize) -> Self {
        Self {
            node,
            port,
            element,
        }
    }

    pub const fn output(&self) -> OutputRef {
        OutputRef::new(self.node, self.port)
    }
}

impl From<(NodeId, usize, usize)> for Coordinate {
    fn from((node, port, element): (NodeId, usize, usize)) -> Self {
        Self::new(node, port, element)
    }
}

impl From<Coordinate> for (NodeId, usize, usize) {
    fn from(c: Coordinate) -> Self {
        (c.node, c.port, c.element)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.node, self.port, self.element)
    }
}

/// An ordered list of coordinates. This is what an input port reads: any mix of
/// elements from any earlier output ports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortElements(Vec<Coordinate>);

impl PortElements {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self(coordinates)
    }

    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a PortElements>) -> Self {
        parts
            .into_iter()
            .flat_map(|part| part.0.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Coordinate> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[Coordinate] {
        &self.0
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Coordinate] {
        &mut self.0
    }

    /// Returns the source port and element range when every element comes from
    /// the same port in consecutive, increasing order.
    pub fn single_port_range(&self) -> Option<(OutputRef, Range<usize>)> {
        let first = self.0.first()?;
        let port = first.output();
        let start = first.element;
        for (offset, coordinate) in self.0.iter().enumerate() {
            if coordinate.output() != port || coordinate.element != start + offset {
                return None;
            }
        }
        Some((port, start..start + self.0.len()))
    }

    /// Distinct source nodes, in first-seen order.
    pub fn source_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for coordinate in &self.0 {
            if !nodes.contains(&coordinate.node) {
                nodes.push(coordinate.node);
            }
        }
        nodes
    }
}

impl FromIterator<Coordinate> for PortElements {
    fn from_iter<I: IntoIterator<Item = Coordinate>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Coordinate>> for PortElements {
    fn from(coordinates: Vec<Coordinate>) -> Self {
        Self(coordinates)
    }
}

impl<'a> IntoIterator for &'a PortElements {
    type Item = &'a Coordinate;
    type IntoIter = std::slice::Iter<'a, Coordinate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    F32,
    F64,
    Bool,
}

impl ScalarType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
        }
    }

    /// Storage size of one element in compiled code. Booleans occupy a byte.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
            Self::Bool => 1,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Scalar {
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
            Self::Bool(_) => ScalarType::Bool,
        }
    }

    pub const fn zero(scalar_type: ScalarType) -> Self {
        match scalar_type {
            ScalarType::F32 => Self::F32(0.0),
            ScalarType::F64 => Self::F64(0.0),
            ScalarType::Bool => Self::Bool(false),
        }
    }
}

/// Type-erased contents of one port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum PortValues {
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
}

impl PortValues {
    pub fn with_capacity(scalar_type: ScalarType, capacity: usize) -> Self {
        match scalar_type {
            ScalarType::F32 => Self::F32(Vec::with_capacity(capacity)),
            ScalarType::F64 => Self::F64(Vec::with_capacity(capacity)),
            ScalarType::Bool => Self::Bool(Vec::with_capacity(capacity)),
        }
    }

    pub fn zeros(scalar_type: ScalarType, len: usize) -> Self {
        match scalar_type {
            ScalarType::F32 => Self::F32(vec![0.0; len]),
            ScalarType::F64 => Self::F64(vec![0.0; len]),
            ScalarType::Bool => Self::Bool(vec![false; len]),
        }
    }

    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::into_values(values)
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
            Self::Bool(_) => ScalarType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            Self::F32(v) => v.get(index).copied().map(Scalar::F32),
            Self::F64(v) => v.get(index).copied().map(Scalar::F64),
            Self::Bool(v) => v.get(index).copied().map(Scalar::Bool),
        }
    }

    /// Overwrites one element. Returns `false` on a type mismatch or a bad index.
    pub fn set(&mut self, index: usize, value: Scalar) -> bool {
        match (self, value) {
            (Self::F32(v), Scalar::F32(x)) => v.get_mut(index).map(|slot| *slot = x).is_some(),
            (Self::F64(v), Scalar::F64(x)) => v.get_mut(index).map(|slot| *slot = x).is_some(),
            (Self::Bool(v), Scalar::Bool(x)) => v.get_mut(index).map(|slot| *slot = x).is_some(),
            _ => false,
        }
    }

    /// Appends one element. Returns `false` on a type mismatch.
    pub fn push(&mut self, value: Scalar) -> bool {
        match (self, value) {
            (Self::F32(v), Scalar::F32(x)) => v.push(x),
            (Self::F64(v), Scalar::F64(x)) => v.push(x),
            (Self::Bool(v), Scalar::Bool(x)) => v.push(x),
            _ => return false,
        }
        true
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    pub fn slice(&self, range: Range<usize>) -> Option<Self> {
        Some(match self {
            Self::F32(v) => Self::F32(v.get(range)?.to_vec()),
            Self::F64(v) => Self::F64(v.get(range)?.to_vec()),
            Self::Bool(v) => Self::Bool(v.get(range)?.to_vec()),
        })
    }
}

/// Element types a port can carry.
pub trait Element:
    Copy + fmt::Debug + PartialEq + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const SCALAR_TYPE: ScalarType;

    fn slice(values: &PortValues) -> Option<&[Self]>;
    fn into_values(values: Vec<Self>) -> PortValues;
    fn to_scalar(self) -> Scalar;
    fn from_scalar(value: Scalar) -> Option<Self>;

    /// Serialization name of a node generic over this element type, e.g. `ConstantNode<f64>`.
    fn composite_type_name(base: &str) -> String {
        format!("{}<{}>", base, Self::SCALAR_TYPE.name())
    }

    /// Archive name for a value JSON numbers cannot hold (`NaN`, `inf`, `-inf`).
    fn special_name(self) -> Option<&'static str> {
        None
    }

    fn from_special_name(_name: &str) -> Option<Self> {
        None
    }
}

/// Floating point elements; the numeric nodes are generic over these.
pub trait Real: Element + num_traits::Float {
    fn from_f64(value: f64) -> Self;
}

fn float_special_name<F: num_traits::Float>(value: F) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == F::infinity() {
        Some("inf")
    } else if value == F::neg_infinity() {
        Some("-inf")
    } else {
        None
    }
}

fn float_from_special_name<F: num_traits::Float>(name: &str) -> Option<F> {
    match name {
        "NaN" => Some(F::nan()),
        "inf" => Some(F::infinity()),
        "-inf" => Some(F::neg_infinity()),
        _ => None,
    }
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl_element!($ty, $variant, {});
    };
    ($ty:ty, $variant:ident, { $($extra:tt)* }) => {
        impl Element for $ty {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;

            fn slice(values: &PortValues) -> Option<&[Self]> {
                match values {
                    PortValues::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn into_values(values: Vec<Self>) -> PortValues {
                PortValues::$variant(values)
            }

            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            $($extra)*
        }
    };
}

macro_rules! impl_float_element {
    ($ty:ty, $variant:ident) => {
        impl_element!($ty, $variant, {
            fn special_name(self) -> Option<&'static str> {
                float_special_name(self)
            }

            fn from_special_name(name: &str) -> Option<Self> {
                float_from_special_name(name)
            }
        });
    };
}

impl_float_element!(f32, F32);
impl_float_element!(f64, F64);
impl_element!(bool, Bool);

impl Real for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Real for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Ordered dimension sizes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryShape(Vec<usize>);

impl MemoryShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn vector(size: usize) -> Self {
        Self(vec![size])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of the dimensions; a rank-0 shape holds nothing.
    pub fn num_elements(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.iter().product()
        }
    }
}

/// Active shape of a port plus per-dimension padding on both sides.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMemoryLayout {
    active: MemoryShape,
    padding: MemoryShape,
}

impl PortMemoryLayout {
    pub fn new(active: MemoryShape) -> Self {
        let padding = MemoryShape::new(vec![0; active.rank()]);
        Self { active, padding }
    }

    pub fn vector(size: usize) -> Self {
        Self::new(MemoryShape::vector(size))
    }

    /// Returns `None` when the padding rank differs from the active rank.
    pub fn with_padding(active: MemoryShape, padding: MemoryShape) -> Option<Self> {
        (active.rank() == padding.rank()).then_some(Self { active, padding })
    }

    pub fn active(&self) -> &MemoryShape {
        &self.active
    }

    pub fn padding(&self) -> &MemoryShape {
        &self.padding
    }

    pub fn active_size(&self) -> usize {
        self.active.num_elements()
    }

    pub fn extent(&self) -> MemoryShape {
        MemoryShape::new(
            self.active
                .dims()
                .iter()
                .zip(self.padding.dims())
                .map(|(size, pad)| size + 2 * pad)
                .collect(),
        )
    }

    pub fn memory_size(&self) -> usize {
        self.extent().num_elements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_port_range_requires_consecutive_elements() {
        let port = OutputRef::new(NodeId(3), 0);
        let contiguous: PortElements = (2..5).map(|e| port.element(e)).collect();
        assert_eq!(contiguous.single_port_range(), Some((port, 2..5)));

        let reversed: PortElements = (0..3).rev().map(|e| port.element(e)).collect();
        assert_eq!(reversed.single_port_range(), None);

        let mixed = PortElements::new(vec![port.element(0), Coordinate::new(NodeId(4), 0, 1)]);
        assert_eq!(mixed.single_port_range(), None);
        assert_eq!(mixed.source_nodes(), vec![NodeId(3), NodeId(4)]);
    }

    #[test]
    fn coordinates_serialize_as_triples() {
        let c = Coordinate::new(NodeId(7), 1, 4);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "[7,1,4]");
        let back: Coordinate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn padded_layout_extent() {
        let layout = PortMemoryLayout::with_padding(
            MemoryShape::new(vec![4, 3]),
            MemoryShape::new(vec![1, 0]),
        )
        .unwrap();
        assert_eq!(layout.active_size(), 12);
        assert_eq!(layout.extent().dims(), &[6, 3]);
        assert_eq!(layout.memory_size(), 18);
        assert!(PortMemoryLayout::with_padding(
            MemoryShape::vector(2),
            MemoryShape::new(vec![1, 1])
        )
        .is_none());
    }

    #[test]
    fn port_values_reject_mismatched_scalars() {
        let mut values = PortValues::zeros(ScalarType::F64, 2);
        assert!(values.set(1, Scalar::F64(2.5)));
        assert!(!values.set(0, Scalar::Bool(true)));
        assert!(!values.set(5, Scalar::F64(1.0)));
        assert!(!values.push(Scalar::F32(1.0)));
        assert_eq!(values.as_slice::<f64>(), Some(&[0.0, 2.5][..]));
        assert_eq!(values.as_slice::<f32>(), None);
    }
}
