//! In-memory scene graph.
//!
//! Decoded once from a container, mutated by the pipeline passes and encoded
//! back. Objects refer to each other by index into the owning [`SceneGraph`]
//! vectors, the same way the container's structural document does.

pub mod accessor;
pub mod decode;
pub mod encode;

pub use accessor::{Accessor, ComponentType, ElementType};

use crate::error::{ConvertError, Result};
use glam::{Mat4, Quat, Vec3};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Primitive topology. Only [`Topology::Triangles`] survives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    /// Map a glTF `mode` value.
    pub fn from_gl(value: u32) -> Option<Self> {
        match value {
            0 => Some(Topology::Points),
            1 => Some(Topology::Lines),
            2 => Some(Topology::LineLoop),
            3 => Some(Topology::LineStrip),
            4 => Some(Topology::Triangles),
            5 => Some(Topology::TriangleStrip),
            6 => Some(Topology::TriangleFan),
            _ => None,
        }
    }

    pub fn gl(self) -> u32 {
        match self {
            Topology::Points => 0,
            Topology::Lines => 1,
            Topology::LineLoop => 2,
            Topology::LineStrip => 3,
            Topology::Triangles => 4,
            Topology::TriangleStrip => 5,
            Topology::TriangleFan => 6,
        }
    }
}

/// Vertex attribute semantic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Semantic {
    Position,
    Normal,
    Tangent,
    TexCoord(u32),
    Color(u32),
    Joints(u32),
    Weights(u32),
    /// Application-specific attribute (leading underscore).
    Custom(String),
}

impl Semantic {
    pub fn parse(name: &str) -> Self {
        let indexed = |prefix: &str| name.strip_prefix(prefix).and_then(|n| n.parse::<u32>().ok());
        match name {
            "POSITION" => Semantic::Position,
            "NORMAL" => Semantic::Normal,
            "TANGENT" => Semantic::Tangent,
            _ => {
                if let Some(n) = indexed("TEXCOORD_") {
                    Semantic::TexCoord(n)
                } else if let Some(n) = indexed("COLOR_") {
                    Semantic::Color(n)
                } else if let Some(n) = indexed("JOINTS_") {
                    Semantic::Joints(n)
                } else if let Some(n) = indexed("WEIGHTS_") {
                    Semantic::Weights(n)
                } else {
                    Semantic::Custom(name.to_string())
                }
            }
        }
    }

    /// Skinning attributes, removed together with skins.
    pub fn is_skinning(&self) -> bool {
        matches!(self, Semantic::Joints(_) | Semantic::Weights(_))
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Semantic::Position => write!(f, "POSITION"),
            Semantic::Normal => write!(f, "NORMAL"),
            Semantic::Tangent => write!(f, "TANGENT"),
            Semantic::TexCoord(n) => write!(f, "TEXCOORD_{}", n),
            Semantic::Color(n) => write!(f, "COLOR_{}", n),
            Semantic::Joints(n) => write!(f, "JOINTS_{}", n),
            Semantic::Weights(n) => write!(f, "WEIGHTS_{}", n),
            Semantic::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Node-local transform. The two forms are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Trs {
        translation: [f32; 3],
        /// Quaternion as (x, y, z, w).
        rotation: [f32; 4],
        scale: [f32; 3],
    },
    /// Column-major 4x4 matrix.
    Matrix([f32; 16]),
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Trs {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

impl Transform {
    pub fn to_mat4(&self) -> Mat4 {
        match self {
            Transform::Trs {
                translation,
                rotation,
                scale,
            } => Mat4::from_scale_rotation_translation(
                Vec3::from_array(*scale),
                Quat::from_array(*rotation),
                Vec3::from_array(*translation),
            ),
            Transform::Matrix(m) => Mat4::from_cols_array(m),
        }
    }

    /// Decompose into translation, rotation and scale.
    pub fn to_trs(&self) -> ([f32; 3], [f32; 4], [f32; 3]) {
        match self {
            Transform::Trs {
                translation,
                rotation,
                scale,
            } => (*translation, *rotation, *scale),
            Transform::Matrix(m) => {
                let (scale, rotation, translation) =
                    Mat4::from_cols_array(m).to_scale_rotation_translation();
                (translation.to_array(), rotation.to_array(), scale.to_array())
            }
        }
    }

    pub fn from_mat4(matrix: &Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Transform::Trs {
            translation: translation.to_array(),
            rotation: rotation.to_array(),
            scale: scale.to_array(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.to_mat4().abs_diff_eq(Mat4::IDENTITY, 1e-6)
    }
}

/// A node of the scene hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: Option<String>,
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
    pub transform: Transform,
    pub camera: Option<usize>,
    pub skin: Option<usize>,
    /// Free-form custom data attached by the exporter.
    pub extras: Option<Value>,
}

/// Rendering model of a material as found in the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialModel {
    MetallicRoughness,
    SpecularGlossiness { diffuse: [f32; 4], glossiness: f32 },
    Unlit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "MASK" => AlphaMode::Mask,
            "BLEND" => AlphaMode::Blend,
            _ => AlphaMode::Opaque,
        }
    }
}

/// The neutral base color used for invalid or synthesized materials.
pub const DEFAULT_BASE_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];
/// Metallic factor of synthesized materials.
pub const DEFAULT_METALLIC: f32 = 0.0;
/// Roughness factor of synthesized materials.
pub const DEFAULT_ROUGHNESS: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub model: MaterialModel,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: [f32; 3],
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: Option<f32>,
    pub double_sided: bool,
    pub extras: Option<Value>,
}

impl Material {
    /// The synthesized neutral material.
    pub fn neutral(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            model: MaterialModel::MetallicRoughness,
            base_color: DEFAULT_BASE_COLOR,
            metallic: DEFAULT_METALLIC,
            roughness: DEFAULT_ROUGHNESS,
            emissive: [0.0; 3],
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: None,
            double_sided: false,
            extras: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub topology: Topology,
    pub attributes: BTreeMap<Semantic, usize>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
}

impl Primitive {
    pub fn position(&self) -> Option<usize> {
        self.attributes.get(&Semantic::Position).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
    pub extras: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub name: Option<String>,
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Skin {
    pub name: Option<String>,
    pub inverse_bind_matrices: Option<usize>,
    pub joints: Vec<usize>,
    pub skeleton: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AnimationChannel {
    pub sampler: usize,
    pub node: Option<usize>,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct AnimationSampler {
    pub input: usize,
    pub output: usize,
    pub interpolation: String,
}

#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<AnimationChannel>,
    pub samplers: Vec<AnimationSampler>,
}

/// Asset metadata copied from the source document.
#[derive(Debug, Clone, Default)]
pub struct AssetInfo {
    pub generator: Option<String>,
    pub copyright: Option<String>,
}

/// A complete decoded scene.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    pub asset: AssetInfo,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub accessors: Vec<Accessor>,
    pub materials: Vec<Material>,
    pub scenes: Vec<Scene>,
    pub scene: Option<usize>,
    pub skins: Vec<Skin>,
    pub animations: Vec<Animation>,
    /// Camera definitions, kept verbatim.
    pub cameras: Vec<Value>,
    pub extensions_used: Vec<String>,
    pub extensions_required: Vec<String>,
    pub extras: Option<Value>,
}

impl SceneGraph {
    pub fn accessor(&self, index: usize) -> Result<&Accessor> {
        self.accessors.get(index).ok_or_else(|| {
            ConvertError::MissingAttribute(format!("accessor {} does not exist", index))
        })
    }

    pub fn node(&self, index: usize) -> Result<&Node> {
        self.nodes.get(index).ok_or_else(|| {
            ConvertError::MissingAttribute(format!("node {} does not exist", index))
        })
    }

    /// Root nodes of the active scene, or of every scene when none is marked active.
    pub fn root_nodes(&self) -> Vec<usize> {
        match self.scene.and_then(|i| self.scenes.get(i)) {
            Some(scene) => scene.nodes.clone(),
            None => self.scenes.iter().flat_map(|s| s.nodes.iter().copied()).collect(),
        }
    }

    /// All primitives with their mesh index.
    pub fn primitives(&self) -> impl Iterator<Item = (usize, &Primitive)> {
        self.meshes
            .iter()
            .enumerate()
            .flat_map(|(i, mesh)| mesh.primitives.iter().map(move |p| (i, p)))
    }

    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(|m| m.primitives.len()).sum()
    }

    /// World matrix of every node reachable from a scene root.
    ///
    /// Unreachable nodes keep their local matrix. A node reached twice keeps
    /// the first path found.
    pub fn world_matrices(&self) -> Vec<Mat4> {
        let mut world: Vec<Option<Mat4>> = vec![None; self.nodes.len()];
        let mut stack: Vec<(usize, Mat4)> = self
            .scenes
            .iter()
            .flat_map(|s| s.nodes.iter().map(|n| (*n, Mat4::IDENTITY)))
            .collect();

        while let Some((index, parent)) = stack.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            if world[index].is_some() {
                continue;
            }
            let matrix = parent * node.transform.to_mat4();
            world[index] = Some(matrix);
            for child in &node.children {
                stack.push((*child, matrix));
            }
        }

        world
            .into_iter()
            .zip(&self.nodes)
            .map(|(m, node)| m.unwrap_or_else(|| node.transform.to_mat4()))
            .collect()
    }

    /// Drop every free-form `extras` value.
    pub fn clear_extras(&mut self) -> usize {
        let mut cleared = usize::from(self.extras.take().is_some());
        for node in &mut self.nodes {
            cleared += usize::from(node.extras.take().is_some());
        }
        for mesh in &mut self.meshes {
            cleared += usize::from(mesh.extras.take().is_some());
        }
        for material in &mut self.materials {
            cleared += usize::from(material.extras.take().is_some());
        }
        cleared
    }
}
