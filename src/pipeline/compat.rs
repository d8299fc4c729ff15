//! Viewer compatibility repairs.

use crate::error::Result;
use crate::scene::{
    Accessor, Material, SceneGraph, Semantic, DEFAULT_BASE_COLOR, DEFAULT_METALLIC,
    DEFAULT_ROUGHNESS,
};
use std::collections::HashMap;

/// Name of the material given to primitives that have none.
pub const DEFAULT_MATERIAL_NAME: &str = "Default";

/// Give every primitive without `TEXCOORD_0` an all-zero UV channel.
/// Primitives with the same vertex count share one accessor.
pub fn synthesize_uvs(graph: &mut SceneGraph) -> Result<usize> {
    let mut shared: HashMap<usize, usize> = HashMap::new();
    let mut synthesized = 0;

    for mesh_index in 0..graph.meshes.len() {
        for prim_index in 0..graph.meshes[mesh_index].primitives.len() {
            let prim = &graph.meshes[mesh_index].primitives[prim_index];
            if prim.attributes.contains_key(&Semantic::TexCoord(0)) {
                continue;
            }
            let Some(position) = prim.position() else {
                continue;
            };
            let count = graph.accessor(position)?.count;

            let accessors = &mut graph.accessors;
            let uv = *shared.entry(count).or_insert_with(|| {
                accessors.push(Accessor::from_vec2(&vec![[0.0, 0.0]; count]));
                accessors.len() - 1
            });
            graph.meshes[mesh_index].primitives[prim_index]
                .attributes
                .insert(Semantic::TexCoord(0), uv);
            synthesized += 1;
        }
    }
    Ok(synthesized)
}

/// Reset invalid material factors. An out-of-range or non-finite base color
/// becomes the neutral default as a whole; metallic and roughness are
/// clamped to [0, 1]. Returns how many materials changed.
pub fn clamp_materials(graph: &mut SceneGraph) -> usize {
    let mut clamped = 0;
    for material in &mut graph.materials {
        if clamp_material(material) {
            clamped += 1;
        }
    }
    if clamped > 0 {
        tracing::debug!(clamped, "Clamped material factors");
    }
    clamped
}

fn clamp_material(material: &mut Material) -> bool {
    let before = material.clone();

    if material
        .base_color
        .iter()
        .any(|c| !c.is_finite() || !(0.0..=1.0).contains(c))
    {
        material.base_color = DEFAULT_BASE_COLOR;
    }
    material.metallic = clamp_factor(material.metallic, DEFAULT_METALLIC);
    material.roughness = clamp_factor(material.roughness, DEFAULT_ROUGHNESS);
    for channel in &mut material.emissive {
        *channel = clamp_factor(*channel, 0.0);
    }
    material.alpha_cutoff = material.alpha_cutoff.map(|c| clamp_factor(c, 0.5));

    *material != before
}

fn clamp_factor(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Point primitives without a valid material at one shared neutral material.
/// Returns how many primitives were assigned.
pub fn assign_default_material(graph: &mut SceneGraph) -> usize {
    let material_count = graph.materials.len();
    let mut default_index = None;
    let mut assigned = 0;

    for mesh in &mut graph.meshes {
        for prim in &mut mesh.primitives {
            if prim.material.is_some_and(|m| m < material_count) {
                continue;
            }
            let index = *default_index.get_or_insert(material_count);
            prim.material = Some(index);
            assigned += 1;
        }
    }

    if default_index.is_some() {
        graph.materials.push(Material::neutral(DEFAULT_MATERIAL_NAME));
        tracing::debug!(assigned, "Assigned default material");
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Mesh, Primitive, Topology};
    use std::collections::BTreeMap;

    fn graph_with_primitives(count: usize) -> SceneGraph {
        let positions = Accessor::from_vec3(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let prim = Primitive {
            topology: Topology::Triangles,
            attributes: BTreeMap::from([(Semantic::Position, 0)]),
            indices: None,
            material: None,
        };
        SceneGraph {
            accessors: vec![positions],
            meshes: vec![Mesh {
                primitives: vec![prim; count],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_uvs_are_zero_and_shared() {
        let mut graph = graph_with_primitives(2);
        assert_eq!(synthesize_uvs(&mut graph).unwrap(), 2);
        assert_eq!(graph.accessors.len(), 2);
        let uv = &graph.accessors[1];
        assert_eq!(uv.count, 3);
        assert_eq!(uv.to_vec2(), vec![[0.0, 0.0]; 3]);
        assert_eq!(synthesize_uvs(&mut graph).unwrap(), 0);
    }

    #[test]
    fn test_clamp_out_of_range_color() {
        let mut graph = SceneGraph::default();
        let mut material = Material::neutral("Bad");
        material.base_color = [2.0, -1.0, 0.5, 1.0];
        material.metallic = f32::NAN;
        material.roughness = 3.0;
        graph.materials.push(material);
        graph.materials.push(Material::neutral("Good"));

        assert_eq!(clamp_materials(&mut graph), 1);
        let material = &graph.materials[0];
        assert_eq!(material.base_color, DEFAULT_BASE_COLOR);
        assert_eq!(material.metallic, DEFAULT_METALLIC);
        assert_eq!(material.roughness, 1.0);
    }

    #[test]
    fn test_default_material_is_shared() {
        let mut graph = graph_with_primitives(3);
        graph.meshes[0].primitives[2].material = Some(7);
        assert_eq!(assign_default_material(&mut graph), 3);
        assert_eq!(graph.materials.len(), 1);
        assert_eq!(graph.materials[0].name.as_deref(), Some(DEFAULT_MATERIAL_NAME));
        assert!(graph.meshes[0].primitives.iter().all(|p| p.material == Some(0)));
        assert_eq!(assign_default_material(&mut graph), 0);
    }
}
