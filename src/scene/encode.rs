//! Scene graph to container encoding.
//!
//! Emits the AR-compatible subset of the format: one embedded buffer, one
//! buffer view per accessor, metallic-roughness materials, meshes, nodes and
//! scenes. Empty accessors are left out, together with the primitives that
//! depend on them. Only POSITION accessors get bounds here; the rest are
//! filled in by [`crate::pipeline::bounds`].

use super::{Accessor, AlphaMode, ComponentType, ElementType, SceneGraph, Semantic, Topology, Transform};
use crate::container::{padding_for, Container};
use crate::error::{ConvertError, Result};
use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use std::collections::{BTreeMap, HashSet};

/// Encode a scene graph into a fresh container.
pub fn encode(graph: &SceneGraph) -> Result<Container> {
    if !graph.animations.is_empty() || !graph.skins.is_empty() || !graph.cameras.is_empty() {
        tracing::warn!(
            animations = graph.animations.len(),
            skins = graph.skins.len(),
            cameras = graph.cameras.len(),
            "Animations, skins and cameras are not encoded"
        );
    }

    let mut index_accessors = HashSet::new();
    let mut attribute_accessors = HashSet::new();
    let mut position_accessors = HashSet::new();
    for (_, prim) in graph.primitives() {
        if let Some(indices) = prim.indices {
            index_accessors.insert(indices);
        }
        for (semantic, accessor) in &prim.attributes {
            attribute_accessors.insert(*accessor);
            if *semantic == Semantic::Position {
                position_accessors.insert(*accessor);
            }
        }
    }

    // Build the binary buffer incrementally
    let mut buffer_data: Vec<u8> = Vec::new();
    let mut buffer_views = Vec::new();
    let mut accessors = Vec::with_capacity(graph.accessors.len());

    // Accessors need at least one element; empty ones are dropped and the
    // remaining indices shift down.
    let mut accessor_remap: Vec<Option<u32>> = Vec::with_capacity(graph.accessors.len());
    for (i, accessor) in graph.accessors.iter().enumerate() {
        if accessor.is_empty() {
            accessor_remap.push(None);
            continue;
        }
        let target = if index_accessors.contains(&i) {
            Some(json::buffer::Target::ElementArrayBuffer)
        } else if attribute_accessors.contains(&i) {
            Some(json::buffer::Target::ArrayBuffer)
        } else {
            None
        };

        let padding = padding_for(buffer_data.len());
        buffer_data.extend(std::iter::repeat(0u8).take(padding));
        let offset = buffer_data.len();
        buffer_data.extend_from_slice(&accessor.data);
        buffer_views.push(create_buffer_view(offset, accessor.data.len(), target));
        let buffer_view = buffer_views.len() as u32 - 1;

        let bounds = if position_accessors.contains(&i) {
            accessor.compute_bounds()
        } else {
            accessor.min.clone().zip(accessor.max.clone())
        };
        accessor_remap.push(Some(accessors.len() as u32));
        accessors.push(create_accessor(accessor, buffer_view, bounds));
    }
    let dropped = accessor_remap.iter().filter(|a| a.is_none()).count();
    if dropped > 0 {
        tracing::debug!(dropped, "Dropped empty accessors");
    }

    // A mesh left without primitives is dropped along with node references to it
    let mut meshes = Vec::with_capacity(graph.meshes.len());
    let mut mesh_remap: Vec<Option<u32>> = Vec::with_capacity(graph.meshes.len());
    for mesh in &graph.meshes {
        let primitives: Vec<_> = mesh
            .primitives
            .iter()
            .filter_map(|prim| create_primitive(prim, &accessor_remap))
            .collect();
        if primitives.is_empty() && !mesh.primitives.is_empty() {
            tracing::debug!(mesh = ?mesh.name, "Mesh has no encodable primitives");
            mesh_remap.push(None);
            continue;
        }
        mesh_remap.push(Some(meshes.len() as u32));
        meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: mesh.name.clone(),
            primitives,
            weights: None,
        });
    }

    let nodes = graph
        .nodes
        .iter()
        .map(|node| {
            let (matrix, translation, rotation, scale) = match node.transform {
                Transform::Matrix(m) => (Some(m), None, None, None),
                Transform::Trs {
                    translation,
                    rotation,
                    scale,
                } => (
                    None,
                    (translation != [0.0; 3]).then_some(translation),
                    (rotation != [0.0, 0.0, 0.0, 1.0])
                        .then_some(json::scene::UnitQuaternion(rotation)),
                    (scale != [1.0; 3]).then_some(scale),
                ),
            };
            json::Node {
                camera: None,
                children: (!node.children.is_empty())
                    .then(|| node.children.iter().map(|c| json::Index::new(*c as u32)).collect()),
                extensions: Default::default(),
                extras: Default::default(),
                matrix,
                mesh: node
                    .mesh
                    .and_then(|m| mesh_remap.get(m).copied().flatten())
                    .map(json::Index::new),
                name: node.name.clone(),
                rotation,
                scale,
                translation,
                skin: None,
                weights: None,
            }
        })
        .collect();

    let materials = graph.materials.iter().map(create_material).collect();

    let scenes = graph
        .scenes
        .iter()
        .map(|scene| json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: scene.name.clone(),
            nodes: scene.nodes.iter().map(|n| json::Index::new(*n as u32)).collect(),
        })
        .collect();

    let buffers = if buffer_data.is_empty() {
        Vec::new()
    } else {
        vec![json::Buffer {
            byte_length: USize64(buffer_data.len() as u64),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }]
    };

    let root = json::Root {
        accessors,
        buffers,
        buffer_views,
        materials,
        meshes,
        nodes,
        scenes,
        scene: graph.scene.map(|s| json::Index::new(s as u32)),
        ..Default::default()
    };

    let json_string = json::serialize::to_string(&root).map_err(|e| {
        ConvertError::MalformedContainer(format!("Failed to serialize glTF JSON: {}", e))
    })?;
    let mut value: serde_json::Value = serde_json::from_str(&json_string)?;
    value["asset"]["version"] = serde_json::Value::from("2.0");
    if let Some(generator) = &graph.asset.generator {
        value["asset"]["generator"] = serde_json::Value::from(generator.as_str());
    }
    if let Some(copyright) = &graph.asset.copyright {
        value["asset"]["copyright"] = serde_json::Value::from(copyright.as_str());
    }

    let bin = (!buffer_data.is_empty()).then_some(buffer_data);
    Ok(Container::new(value, bin))
}

/// Encode and serialize in one step.
pub fn encode_to_bytes(graph: &SceneGraph) -> Result<Vec<u8>> {
    encode(graph)?.to_bytes()
}

/// Create a buffer view.
fn create_buffer_view(
    offset: usize,
    size: usize,
    target: Option<json::buffer::Target>,
) -> json::buffer::View {
    json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64(size as u64),
        byte_offset: Some(USize64(offset as u64)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: target.map(Valid),
    }
}

/// Create an accessor.
fn create_accessor(
    accessor: &Accessor,
    buffer_view: u32,
    bounds: Option<(Vec<f64>, Vec<f64>)>,
) -> json::Accessor {
    let component_type = match accessor.component_type {
        ComponentType::I8 => json::accessor::ComponentType::I8,
        ComponentType::U8 => json::accessor::ComponentType::U8,
        ComponentType::I16 => json::accessor::ComponentType::I16,
        ComponentType::U16 => json::accessor::ComponentType::U16,
        ComponentType::U32 => json::accessor::ComponentType::U32,
        ComponentType::F32 => json::accessor::ComponentType::F32,
    };
    let type_ = match accessor.element_type {
        ElementType::Scalar => json::accessor::Type::Scalar,
        ElementType::Vec2 => json::accessor::Type::Vec2,
        ElementType::Vec3 => json::accessor::Type::Vec3,
        ElementType::Vec4 => json::accessor::Type::Vec4,
        ElementType::Mat2 => json::accessor::Type::Mat2,
        ElementType::Mat3 => json::accessor::Type::Mat3,
        ElementType::Mat4 => json::accessor::Type::Mat4,
    };
    let (min, max) = match bounds {
        Some((min, max)) => (
            Some(bounds_value(&min, accessor.component_type)),
            Some(bounds_value(&max, accessor.component_type)),
        ),
        None => (None, None),
    };

    json::Accessor {
        buffer_view: Some(json::Index::new(buffer_view)),
        byte_offset: Some(USize64(0)),
        count: USize64(accessor.count as u64),
        component_type: Valid(json::accessor::GenericComponentType(component_type)),
        extensions: Default::default(),
        extras: Default::default(),
        name: accessor.name.clone(),
        type_: Valid(type_),
        min,
        max,
        normalized: accessor.normalized,
        sparse: None,
    }
}

/// Bounds as JSON numbers; integer components are written without a fraction.
pub(crate) fn bounds_value(values: &[f64], component_type: ComponentType) -> serde_json::Value {
    if component_type.is_float() {
        serde_json::Value::from(values.to_vec())
    } else {
        serde_json::Value::from(values.iter().map(|v| *v as i64).collect::<Vec<_>>())
    }
}

/// Create a primitive, or `None` when its positions or indices were dropped.
fn create_primitive(
    prim: &super::Primitive,
    accessor_remap: &[Option<u32>],
) -> Option<json::mesh::Primitive> {
    let remap = |accessor: usize| accessor_remap.get(accessor).copied().flatten();
    let indices = match prim.indices {
        Some(indices) => match remap(indices) {
            Some(index) => Some(json::Index::new(index)),
            None => {
                tracing::debug!(accessor = indices, "Primitive indices are empty; primitive dropped");
                return None;
            }
        },
        None => None,
    };

    let mut attributes = BTreeMap::new();
    for (semantic, accessor) in &prim.attributes {
        let Some(accessor) = remap(*accessor) else {
            if *semantic == Semantic::Position {
                tracing::debug!("Primitive positions are empty; primitive dropped");
                return None;
            }
            continue;
        };
        let semantic = match semantic {
            Semantic::Position => json::mesh::Semantic::Positions,
            Semantic::Normal => json::mesh::Semantic::Normals,
            Semantic::Tangent => json::mesh::Semantic::Tangents,
            Semantic::TexCoord(n) => json::mesh::Semantic::TexCoords(*n),
            Semantic::Color(n) => json::mesh::Semantic::Colors(*n),
            Semantic::Joints(n) => json::mesh::Semantic::Joints(*n),
            Semantic::Weights(n) => json::mesh::Semantic::Weights(*n),
            Semantic::Custom(name) => {
                tracing::debug!(attribute = %name, "Custom vertex attribute is not encoded");
                continue;
            }
        };
        attributes.insert(Valid(semantic), json::Index::new(accessor));
    }

    let mode = match prim.topology {
        Topology::Points => json::mesh::Mode::Points,
        Topology::Lines => json::mesh::Mode::Lines,
        Topology::LineLoop => json::mesh::Mode::LineLoop,
        Topology::LineStrip => json::mesh::Mode::LineStrip,
        Topology::Triangles => json::mesh::Mode::Triangles,
        Topology::TriangleStrip => json::mesh::Mode::TriangleStrip,
        Topology::TriangleFan => json::mesh::Mode::TriangleFan,
    };

    Some(json::mesh::Primitive {
        attributes,
        extensions: Default::default(),
        extras: Default::default(),
        indices,
        material: prim.material.map(|m| json::Index::new(m as u32)),
        mode: Valid(mode),
        targets: None,
    })
}

/// Create a metallic-roughness material.
fn create_material(material: &super::Material) -> json::Material {
    let alpha_mode = match material.alpha_mode {
        AlphaMode::Opaque => json::material::AlphaMode::Opaque,
        AlphaMode::Mask => json::material::AlphaMode::Mask,
        AlphaMode::Blend => json::material::AlphaMode::Blend,
    };
    json::Material {
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_texture: None,
            base_color_factor: json::material::PbrBaseColorFactor(material.base_color),
            metallic_factor: json::material::StrengthFactor(material.metallic),
            roughness_factor: json::material::StrengthFactor(material.roughness),
            metallic_roughness_texture: None,
            extensions: Default::default(),
            extras: Default::default(),
        },
        alpha_mode: Valid(alpha_mode),
        alpha_cutoff: material.alpha_cutoff.map(json::material::AlphaCutoff),
        double_sided: material.double_sided,
        name: material.name.clone(),
        normal_texture: None,
        occlusion_texture: None,
        emissive_texture: None,
        emissive_factor: json::material::EmissiveFactor(material.emissive),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::decode::{decode, tests::triangle_container};
    use crate::scene::{Mesh, Node, Primitive};

    #[test]
    fn test_encode_round_trip() {
        let graph = decode(&triangle_container([0.2, 0.4, 0.6, 1.0])).unwrap();
        let bytes = encode_to_bytes(&graph).unwrap();
        assert_eq!(&bytes[0..4], b"glTF");

        let reread = decode(&Container::read(&bytes).unwrap()).unwrap();
        assert_eq!(reread.nodes[0].name.as_deref(), Some("Steel Beam [424461]"));
        assert_eq!(reread.accessors[0].to_vec3(), graph.accessors[0].to_vec3());
        assert_eq!(reread.accessors[1].to_indices(), vec![0, 1, 2]);
        assert_eq!(reread.materials[0].base_color, [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(reread.asset.generator.as_deref(), Some("test"));
    }

    #[test]
    fn test_only_positions_get_bounds() {
        let graph = decode(&triangle_container([1.0; 4])).unwrap();
        let container = encode(&graph).unwrap();
        let accessors = container.json["accessors"].as_array().unwrap();
        assert_eq!(accessors[0]["min"], serde_json::json!([0.0, 0.0, 0.0]));
        assert_eq!(accessors[0]["max"], serde_json::json!([1.0, 1.0, 0.0]));
        assert!(accessors[1].get("min").is_none());
    }

    #[test]
    fn test_buffer_views_are_aligned() {
        let mut graph = SceneGraph::default();
        graph.accessors.push(Accessor::from_bytes(
            ComponentType::U8,
            ElementType::Scalar,
            3,
            vec![1, 2, 3],
        ));
        graph.accessors.push(Accessor::from_vec3(&[[1.0, 2.0, 3.0]]));
        let container = encode(&graph).unwrap();
        let views = container.json["bufferViews"].as_array().unwrap();
        assert_eq!(views[1]["byteOffset"], 4);
        assert_eq!(container.payload().len(), 16);
    }

    #[test]
    fn test_empty_accessors_are_dropped() {
        let mut graph = SceneGraph::default();
        graph.accessors.push(Accessor::from_bytes(
            ComponentType::U32,
            ElementType::Scalar,
            0,
            Vec::new(),
        ));
        graph.accessors.push(Accessor::from_vec3(&[
            [0.0; 3],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ]));
        graph.meshes.push(Mesh {
            primitives: vec![
                Primitive {
                    topology: Topology::Triangles,
                    attributes: BTreeMap::from([(Semantic::Position, 1), (Semantic::Normal, 0)]),
                    indices: None,
                    material: None,
                },
                Primitive {
                    topology: Topology::Triangles,
                    attributes: BTreeMap::from([(Semantic::Position, 1)]),
                    indices: Some(0),
                    material: None,
                },
            ],
            ..Default::default()
        });
        graph.meshes.push(Mesh {
            primitives: vec![Primitive {
                topology: Topology::Triangles,
                attributes: BTreeMap::from([(Semantic::Position, 0)]),
                indices: None,
                material: None,
            }],
            ..Default::default()
        });
        graph.nodes.push(Node {
            mesh: Some(1),
            ..Default::default()
        });
        graph.nodes.push(Node {
            mesh: Some(0),
            ..Default::default()
        });

        let container = encode(&graph).unwrap();
        let accessors = container.json["accessors"].as_array().unwrap();
        assert_eq!(accessors.len(), 1);
        assert_eq!(accessors[0]["count"], 3);

        let meshes = container.json["meshes"].as_array().unwrap();
        assert_eq!(meshes.len(), 1);
        let primitives = meshes[0]["primitives"].as_array().unwrap();
        assert_eq!(primitives.len(), 1);
        assert_eq!(primitives[0]["attributes"], serde_json::json!({ "POSITION": 0 }));

        let nodes = container.json["nodes"].as_array().unwrap();
        assert!(nodes[0].get("mesh").is_none());
        assert_eq!(nodes[1]["mesh"], 0);
    }

    #[test]
    fn test_empty_graph_has_no_payload() {
        let container = encode(&SceneGraph::default()).unwrap();
        assert!(container.bin.is_none());
        assert_eq!(container.json["asset"]["version"], "2.0");
    }
}
