//! Container to scene graph decoding.

use super::{
    Accessor, AlphaMode, Animation, AnimationChannel, AnimationSampler, AssetInfo, ComponentType,
    ElementType, Material, MaterialModel, Mesh, Node, Primitive, Scene, SceneGraph, Semantic,
    Skin, Topology, Transform,
};
use crate::container::Container;
use crate::error::{ConvertError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Structural document schema (only what the pipeline reads)
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Document {
    asset: DocAsset,
    accessors: Vec<DocAccessor>,
    buffer_views: Vec<DocBufferView>,
    buffers: Vec<DocBuffer>,
    meshes: Vec<DocMesh>,
    nodes: Vec<DocNode>,
    materials: Vec<DocMaterial>,
    scenes: Vec<DocScene>,
    scene: Option<usize>,
    skins: Vec<DocSkin>,
    animations: Vec<DocAnimation>,
    cameras: Vec<Value>,
    textures: Vec<Value>,
    extensions_used: Vec<String>,
    extensions_required: Vec<String>,
    extras: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DocAsset {
    generator: Option<String>,
    copyright: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocAccessor {
    buffer_view: Option<usize>,
    #[serde(default)]
    byte_offset: usize,
    component_type: u32,
    #[serde(default)]
    normalized: bool,
    count: usize,
    #[serde(rename = "type")]
    accessor_type: String,
    min: Option<Vec<f64>>,
    max: Option<Vec<f64>>,
    sparse: Option<Value>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocBufferView {
    buffer: usize,
    #[serde(default)]
    byte_offset: usize,
    byte_length: usize,
    byte_stride: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DocBuffer {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocMesh {
    name: Option<String>,
    #[serde(default)]
    primitives: Vec<DocPrimitive>,
    extras: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DocPrimitive {
    #[serde(default)]
    attributes: BTreeMap<String, usize>,
    indices: Option<usize>,
    material: Option<usize>,
    #[serde(default = "default_mode")]
    mode: u32,
    targets: Option<Vec<Value>>,
}

/// Largest zero-filled accessor (no buffer view) that is materialized.
const MAX_ZERO_FILL_BYTES: usize = 1 << 28;

fn default_mode() -> u32 {
    4
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DocNode {
    name: Option<String>,
    mesh: Option<usize>,
    children: Vec<usize>,
    matrix: Option<[f32; 16]>,
    translation: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
    camera: Option<usize>,
    skin: Option<usize>,
    extras: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DocMaterial {
    name: Option<String>,
    pbr_metallic_roughness: Option<DocPbr>,
    emissive_factor: Option<[f32; 3]>,
    alpha_mode: Option<String>,
    alpha_cutoff: Option<f32>,
    double_sided: bool,
    extensions: Option<serde_json::Map<String, Value>>,
    extras: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocPbr {
    #[serde(default = "default_color")]
    base_color_factor: [f32; 4],
    #[serde(default = "one")]
    metallic_factor: f32,
    #[serde(default = "one")]
    roughness_factor: f32,
}

impl Default for DocPbr {
    fn default() -> Self {
        Self {
            base_color_factor: default_color(),
            metallic_factor: 1.0,
            roughness_factor: 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocSpecularGlossiness {
    #[serde(default = "default_color")]
    diffuse_factor: [f32; 4],
    #[serde(default = "one")]
    glossiness_factor: f32,
}

fn default_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

fn one() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DocScene {
    name: Option<String>,
    nodes: Vec<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DocSkin {
    name: Option<String>,
    inverse_bind_matrices: Option<usize>,
    joints: Vec<usize>,
    skeleton: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DocAnimation {
    name: Option<String>,
    channels: Vec<DocChannel>,
    samplers: Vec<DocSampler>,
}

#[derive(Debug, Deserialize)]
struct DocChannel {
    sampler: usize,
    target: DocTarget,
}

#[derive(Debug, Deserialize)]
struct DocTarget {
    node: Option<usize>,
    path: String,
}

#[derive(Debug, Deserialize)]
struct DocSampler {
    input: usize,
    output: usize,
    #[serde(default = "linear")]
    interpolation: String,
}

fn linear() -> String {
    "LINEAR".to_string()
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a container into a scene graph.
///
/// Fails only when the structural document does not match the schema or
/// declares an unknown component type or element shape. Accessors whose data
/// cannot be read are decoded as empty and logged; the pipeline drops the
/// primitives that depend on them.
pub fn decode(container: &Container) -> Result<SceneGraph> {
    let doc: Document = serde_json::from_value(container.json.clone()).map_err(|e| {
        ConvertError::MalformedContainer(format!("structural document is invalid: {}", e))
    })?;
    let payload = container.payload();

    if !doc.textures.is_empty() {
        tracing::debug!(count = doc.textures.len(), "Texture references are not carried");
    }

    let accessors = doc
        .accessors
        .iter()
        .enumerate()
        .map(|(i, acc)| decode_accessor(i, acc, &doc, payload))
        .collect::<Result<Vec<_>>>()?;

    let meshes = doc
        .meshes
        .into_iter()
        .map(|mesh| Mesh {
            name: mesh.name,
            primitives: mesh.primitives.into_iter().map(decode_primitive).collect(),
            extras: mesh.extras,
        })
        .collect();

    let nodes = doc.nodes.into_iter().map(decode_node).collect();
    let materials = doc.materials.into_iter().map(decode_material).collect();

    let graph = SceneGraph {
        asset: AssetInfo {
            generator: doc.asset.generator,
            copyright: doc.asset.copyright,
        },
        nodes,
        meshes,
        accessors,
        materials,
        scenes: doc
            .scenes
            .into_iter()
            .map(|s| Scene {
                name: s.name,
                nodes: s.nodes,
            })
            .collect(),
        scene: doc.scene,
        skins: doc
            .skins
            .into_iter()
            .map(|s| Skin {
                name: s.name,
                inverse_bind_matrices: s.inverse_bind_matrices,
                joints: s.joints,
                skeleton: s.skeleton,
            })
            .collect(),
        animations: doc
            .animations
            .into_iter()
            .map(|a| Animation {
                name: a.name,
                channels: a
                    .channels
                    .into_iter()
                    .map(|c| AnimationChannel {
                        sampler: c.sampler,
                        node: c.target.node,
                        path: c.target.path,
                    })
                    .collect(),
                samplers: a
                    .samplers
                    .into_iter()
                    .map(|s| AnimationSampler {
                        input: s.input,
                        output: s.output,
                        interpolation: s.interpolation,
                    })
                    .collect(),
            })
            .collect(),
        cameras: doc.cameras,
        extensions_used: doc.extensions_used,
        extensions_required: doc.extensions_required,
        extras: doc.extras,
    };

    tracing::debug!(
        nodes = graph.nodes.len(),
        meshes = graph.meshes.len(),
        primitives = graph.primitive_count(),
        accessors = graph.accessors.len(),
        materials = graph.materials.len(),
        "Decoded scene graph"
    );

    Ok(graph)
}

fn decode_accessor(
    index: usize,
    acc: &DocAccessor,
    doc: &Document,
    payload: &[u8],
) -> Result<Accessor> {
    let component_type = ComponentType::from_gl(acc.component_type).ok_or_else(|| {
        ConvertError::MalformedContainer(format!(
            "accessor {} has unknown component type {}",
            index, acc.component_type
        ))
    })?;
    let element_type = ElementType::parse(&acc.accessor_type).ok_or_else(|| {
        ConvertError::MalformedContainer(format!(
            "accessor {} has unknown type {}",
            index, acc.accessor_type
        ))
    })?;

    let element_size = component_type.size() * element_type.components();
    let byte_len = acc.count.checked_mul(element_size).ok_or_else(|| {
        ConvertError::MalformedContainer(format!(
            "accessor {} declares {} elements, more than any buffer can hold",
            index, acc.count
        ))
    })?;
    if acc.buffer_view.is_none() && byte_len > MAX_ZERO_FILL_BYTES {
        return Err(ConvertError::MalformedContainer(format!(
            "accessor {} has no buffer view but needs {} bytes",
            index, byte_len
        )));
    }

    let mut accessor = Accessor::from_bytes(component_type, element_type, acc.count, Vec::new());
    accessor.name = acc.name.clone();
    accessor.normalized = acc.normalized;
    accessor.min = acc.min.clone();
    accessor.max = acc.max.clone();

    if acc.sparse.is_some() {
        tracing::warn!(accessor = index, "Sparse substitution is not applied");
    }

    match read_accessor_data(acc, element_size, byte_len, doc, payload) {
        Ok(data) => accessor.data = data,
        Err(reason) => {
            tracing::warn!(accessor = index, %reason, "Accessor data unreadable, treating as empty");
            accessor.count = 0;
            accessor.min = None;
            accessor.max = None;
        }
    }

    Ok(accessor)
}

/// Gather the accessor's elements into a tightly packed buffer of
/// `byte_len` bytes. The span is checked against the view and payload
/// before anything is allocated.
fn read_accessor_data(
    acc: &DocAccessor,
    element_size: usize,
    byte_len: usize,
    doc: &Document,
    payload: &[u8],
) -> std::result::Result<Vec<u8>, String> {
    let Some(view_index) = acc.buffer_view else {
        // No buffer view: all elements are zero.
        return Ok(vec![0u8; byte_len]);
    };

    let view = doc
        .buffer_views
        .get(view_index)
        .ok_or_else(|| format!("buffer view {} does not exist", view_index))?;
    let buffer = doc
        .buffers
        .get(view.buffer)
        .ok_or_else(|| format!("buffer {} does not exist", view.buffer))?;
    if view.buffer != 0 || buffer.uri.is_some() {
        return Err(format!("buffer {} is not the embedded payload", view.buffer));
    }
    if acc.count == 0 {
        return Ok(Vec::new());
    }

    let overflow = || "accessor span overflows".to_string();
    let stride = view.byte_stride.filter(|s| *s > 0).unwrap_or(element_size);
    let start = view.byte_offset.checked_add(acc.byte_offset).ok_or_else(overflow)?;
    let view_end = view.byte_offset.checked_add(view.byte_length).ok_or_else(overflow)?;
    let last_end = (acc.count - 1)
        .checked_mul(stride)
        .and_then(|span| span.checked_add(start))
        .and_then(|span| span.checked_add(element_size))
        .ok_or_else(overflow)?;
    if last_end > view_end || view_end > payload.len() {
        return Err(format!(
            "elements end at byte {} but the view ends at {} (payload {} bytes)",
            last_end,
            view_end,
            payload.len()
        ));
    }

    let mut data = Vec::with_capacity(byte_len);
    for i in 0..acc.count {
        let offset = start + i * stride;
        data.extend_from_slice(&payload[offset..offset + element_size]);
    }
    Ok(data)
}

fn decode_primitive(prim: DocPrimitive) -> Primitive {
    if prim.targets.as_ref().is_some_and(|t| !t.is_empty()) {
        tracing::debug!("Morph targets are not carried");
    }
    Primitive {
        // Unknown modes are kept as points so the topology filter removes them.
        topology: Topology::from_gl(prim.mode).unwrap_or(Topology::Points),
        attributes: prim
            .attributes
            .into_iter()
            .map(|(name, accessor)| (Semantic::parse(&name), accessor))
            .collect(),
        indices: prim.indices,
        material: prim.material,
    }
}

fn decode_node(node: DocNode) -> Node {
    let transform = match node.matrix {
        Some(matrix) => Transform::Matrix(matrix),
        None => Transform::Trs {
            translation: node.translation.unwrap_or([0.0; 3]),
            rotation: node.rotation.unwrap_or([0.0, 0.0, 0.0, 1.0]),
            scale: node.scale.unwrap_or([1.0; 3]),
        },
    };
    Node {
        name: node.name,
        mesh: node.mesh,
        children: node.children,
        transform,
        camera: node.camera,
        skin: node.skin,
        extras: node.extras,
    }
}

fn decode_material(mat: DocMaterial) -> Material {
    let pbr = mat.pbr_metallic_roughness.unwrap_or_default();
    let extensions = mat.extensions.unwrap_or_default();

    let model = if let Some(sg) = extensions
        .get("KHR_materials_pbrSpecularGlossiness")
        .and_then(|v| serde_json::from_value::<DocSpecularGlossiness>(v.clone()).ok())
    {
        MaterialModel::SpecularGlossiness {
            diffuse: sg.diffuse_factor,
            glossiness: sg.glossiness_factor,
        }
    } else if extensions.contains_key("KHR_materials_unlit") {
        MaterialModel::Unlit
    } else {
        MaterialModel::MetallicRoughness
    };

    Material {
        name: mat.name,
        model,
        base_color: pbr.base_color_factor,
        metallic: pbr.metallic_factor,
        roughness: pbr.roughness_factor,
        emissive: mat.emissive_factor.unwrap_or([0.0; 3]),
        alpha_mode: mat
            .alpha_mode
            .as_deref()
            .map(AlphaMode::parse)
            .unwrap_or(AlphaMode::Opaque),
        alpha_cutoff: mat.alpha_cutoff,
        double_sided: mat.double_sided,
        extras: mat.extras,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// A container with one triangle: positions, indices, one material.
    pub(crate) fn triangle_container(base_color: [f32; 4]) -> Container {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let mut bin: Vec<u8> = positions
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        for i in [0u16, 1, 2] {
            bin.extend_from_slice(&i.to_le_bytes());
        }

        let json = json!({
            "asset": {"version": "2.0", "generator": "test"},
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [{"name": "Steel Beam [424461]", "mesh": 0, "translation": [1.0, 2.0, 3.0]}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "indices": 1, "material": 0}]}],
            "materials": [{"name": "Steel", "pbrMetallicRoughness": {"baseColorFactor": base_color}}],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
                {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 36},
                {"buffer": 0, "byteOffset": 36, "byteLength": 6}
            ],
            "buffers": [{"byteLength": 42}]
        });
        Container::new(json, Some(bin))
    }

    #[test]
    fn test_decode_triangle() {
        let graph = decode(&triangle_container([1.0, 0.0, 0.0, 1.0])).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].name.as_deref(), Some("Steel Beam [424461]"));
        assert_eq!(graph.accessors[0].to_vec3()[1], [1.0, 0.0, 0.0]);
        assert_eq!(graph.accessors[1].to_indices(), vec![0, 1, 2]);
        let prim = &graph.meshes[0].primitives[0];
        assert_eq!(prim.topology, Topology::Triangles);
        assert_eq!(prim.position(), Some(0));
        assert_eq!(graph.materials[0].base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(graph.materials[0].metallic, 1.0);
    }

    #[test]
    fn test_decode_strided_view() {
        // Two VEC2 elements interleaved with 4 bytes of padding each.
        let mut bin = Vec::new();
        for v in [[1.0f32, 2.0], [3.0, 4.0]] {
            bin.extend_from_slice(&v[0].to_le_bytes());
            bin.extend_from_slice(&v[1].to_le_bytes());
            bin.extend_from_slice(&[0xFF; 4]);
        }
        let json = json!({
            "accessors": [{"bufferView": 0, "componentType": 5126, "count": 2, "type": "VEC2"}],
            "bufferViews": [{"buffer": 0, "byteLength": 24, "byteStride": 12}],
            "buffers": [{"byteLength": 24}]
        });
        let graph = decode(&Container::new(json, Some(bin))).unwrap();
        assert_eq!(graph.accessors[0].to_vec2(), vec![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn test_out_of_bounds_accessor_is_empty() {
        let json = json!({
            "accessors": [{"bufferView": 0, "componentType": 5126, "count": 100, "type": "VEC3"}],
            "bufferViews": [{"buffer": 0, "byteLength": 8}],
            "buffers": [{"byteLength": 8}]
        });
        let graph = decode(&Container::new(json, Some(vec![0u8; 8]))).unwrap();
        assert!(graph.accessors[0].is_empty());
    }

    #[test]
    fn test_huge_counts_do_not_panic() {
        let overflowing = json!({
            "accessors": [{"bufferView": 0, "componentType": 5126, "count": 1537228672809129302u64, "type": "VEC3"}],
            "bufferViews": [{"buffer": 0, "byteLength": 12}],
            "buffers": [{"byteLength": 12}]
        });
        assert!(matches!(
            decode(&Container::new(overflowing, Some(vec![0u8; 12]))),
            Err(ConvertError::MalformedContainer(_))
        ));

        let past_view = json!({
            "accessors": [{"bufferView": 0, "byteOffset": 4, "componentType": 5126, "count": 1_000_000_000_000_000u64, "type": "VEC3"}],
            "bufferViews": [{"buffer": 0, "byteLength": 12, "byteStride": 1_000_000_000_000_000u64}],
            "buffers": [{"byteLength": 12}]
        });
        let graph = decode(&Container::new(past_view, Some(vec![0u8; 12]))).unwrap();
        assert!(graph.accessors[0].is_empty());

        let zero_filled = json!({
            "accessors": [{"componentType": 5126, "count": 1_000_000_000_000u64, "type": "VEC3"}]
        });
        assert!(matches!(
            decode(&Container::new(zero_filled, None)),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_unknown_component_type_is_malformed() {
        let json = json!({
            "accessors": [{"componentType": 1, "count": 1, "type": "VEC3"}]
        });
        assert!(matches!(
            decode(&Container::new(json, None)),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_decode_matrix_and_extras() {
        let json = json!({
            "nodes": [{
                "name": "Door",
                "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,6,7,1],
                "extras": {"ElementId": 12}
            }],
            "materials": [{
                "extensions": {"KHR_materials_pbrSpecularGlossiness": {"diffuseFactor": [0.5, 0.5, 0.5, 1.0], "glossinessFactor": 0.25}}
            }]
        });
        let graph = decode(&Container::new(json, None)).unwrap();
        assert!(matches!(graph.nodes[0].transform, Transform::Matrix(m) if m[12] == 5.0));
        assert_eq!(graph.nodes[0].extras.as_ref().unwrap()["ElementId"], 12);
        assert!(matches!(
            graph.materials[0].model,
            MaterialModel::SpecularGlossiness { glossiness, .. } if glossiness == 0.25
        ));
    }
}
