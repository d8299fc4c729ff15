//! Typed accessor storage.
//!
//! Accessor data is held tightly packed in little-endian order, exactly as it
//! would appear in a non-strided buffer view, so passes that only move whole
//! elements around never need to know the component type.

use serde::{Deserialize, Serialize};

/// Component type of an accessor, tagged with its glTF enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    /// Map a glTF `componentType` value.
    pub fn from_gl(value: u32) -> Option<Self> {
        match value {
            5120 => Some(ComponentType::I8),
            5121 => Some(ComponentType::U8),
            5122 => Some(ComponentType::I16),
            5123 => Some(ComponentType::U16),
            5125 => Some(ComponentType::U32),
            5126 => Some(ComponentType::F32),
            _ => None,
        }
    }

    pub fn gl(self) -> u32 {
        match self {
            ComponentType::I8 => 5120,
            ComponentType::U8 => 5121,
            ComponentType::I16 => 5122,
            ComponentType::U16 => 5123,
            ComponentType::U32 => 5125,
            ComponentType::F32 => 5126,
        }
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 => 2,
            ComponentType::U32 | ComponentType::F32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ComponentType::F32)
    }

    /// Decode one little-endian component. `bytes` must hold at least `size()` bytes.
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            ComponentType::I8 => bytes[0] as i8 as f64,
            ComponentType::U8 => bytes[0] as f64,
            ComponentType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ComponentType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ComponentType::U32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            ComponentType::F32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
        }
    }
}

/// Element shape of an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    /// Map a glTF `type` string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SCALAR" => Some(ElementType::Scalar),
            "VEC2" => Some(ElementType::Vec2),
            "VEC3" => Some(ElementType::Vec3),
            "VEC4" => Some(ElementType::Vec4),
            "MAT2" => Some(ElementType::Mat2),
            "MAT3" => Some(ElementType::Mat3),
            "MAT4" => Some(ElementType::Mat4),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Scalar => "SCALAR",
            ElementType::Vec2 => "VEC2",
            ElementType::Vec3 => "VEC3",
            ElementType::Vec4 => "VEC4",
            ElementType::Mat2 => "MAT2",
            ElementType::Mat3 => "MAT3",
            ElementType::Mat4 => "MAT4",
        }
    }

    /// Number of components per element.
    pub fn components(self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 | ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }
}

/// One typed view of vertex or index data.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: Option<String>,
    pub component_type: ComponentType,
    pub element_type: ElementType,
    pub normalized: bool,
    /// Number of elements.
    pub count: usize,
    /// Tightly packed element bytes (`count * element_size()`).
    pub data: Vec<u8>,
    /// Declared per-component minimum.
    pub min: Option<Vec<f64>>,
    /// Declared per-component maximum.
    pub max: Option<Vec<f64>>,
}

impl Accessor {
    /// Create an accessor from packed bytes.
    pub fn from_bytes(
        component_type: ComponentType,
        element_type: ElementType,
        count: usize,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: None,
            component_type,
            element_type,
            normalized: false,
            count,
            data,
            min: None,
            max: None,
        }
    }

    /// Float VEC2 accessor.
    pub fn from_vec2(values: &[[f32; 2]]) -> Self {
        let data = values.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(ComponentType::F32, ElementType::Vec2, values.len(), data)
    }

    /// Float VEC3 accessor.
    pub fn from_vec3(values: &[[f32; 3]]) -> Self {
        let data = values.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(ComponentType::F32, ElementType::Vec3, values.len(), data)
    }

    /// Unsigned 32-bit SCALAR index accessor.
    pub fn from_indices(indices: &[u32]) -> Self {
        let data = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        Self::from_bytes(ComponentType::U32, ElementType::Scalar, indices.len(), data)
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.element_type.components()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Packed bytes of element `index`.
    pub fn element_bytes(&self, index: usize) -> &[u8] {
        let size = self.element_size();
        &self.data[index * size..(index + 1) * size]
    }

    /// Raw (non-normalized) value of component `component` of element `index`.
    pub fn component(&self, index: usize, component: usize) -> f64 {
        let size = self.component_type.size();
        let offset = index * self.element_size() + component * size;
        self.component_type.decode(&self.data[offset..offset + size])
    }

    /// Value as seen by a renderer: normalized integers are mapped to [-1, 1] / [0, 1].
    pub fn value(&self, index: usize, component: usize) -> f32 {
        let raw = self.component(index, component);
        if !self.normalized {
            return raw as f32;
        }
        let value = match self.component_type {
            ComponentType::I8 => (raw / 127.0).max(-1.0),
            ComponentType::U8 => raw / 255.0,
            ComponentType::I16 => (raw / 32767.0).max(-1.0),
            ComponentType::U16 => raw / 65535.0,
            ComponentType::U32 => raw / u32::MAX as f64,
            ComponentType::F32 => raw,
        };
        value as f32
    }

    /// Read as 2-component vectors (missing components read as zero).
    pub fn to_vec2(&self) -> Vec<[f32; 2]> {
        (0..self.count)
            .map(|i| [self.value_or_zero(i, 0), self.value_or_zero(i, 1)])
            .collect()
    }

    /// Read as 3-component vectors (missing components read as zero).
    pub fn to_vec3(&self) -> Vec<[f32; 3]> {
        (0..self.count)
            .map(|i| {
                [
                    self.value_or_zero(i, 0),
                    self.value_or_zero(i, 1),
                    self.value_or_zero(i, 2),
                ]
            })
            .collect()
    }

    /// Read a SCALAR accessor as indices.
    pub fn to_indices(&self) -> Vec<u32> {
        (0..self.count).map(|i| self.component(i, 0) as u32).collect()
    }

    /// Per-component minimum and maximum of the stored values.
    pub fn compute_bounds(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        if self.count == 0 {
            return None;
        }
        let components = self.element_type.components();
        let mut min = vec![f64::INFINITY; components];
        let mut max = vec![f64::NEG_INFINITY; components];
        for i in 0..self.count {
            for c in 0..components {
                let v = self.component(i, c);
                min[c] = min[c].min(v);
                max[c] = max[c].max(v);
            }
        }
        Some((min, max))
    }

    /// Whether both declared bounds are present.
    pub fn has_bounds(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    fn value_or_zero(&self, index: usize, component: usize) -> f32 {
        if component < self.element_type.components() {
            self.value(index, component)
        } else {
            0.0
        }
    }
}
