//! Removal passes: unsupported primitives, animation data and extensions.

use crate::error::{ConvertError, Result};
use crate::scene::{Accessor, ComponentType, ElementType, Primitive, SceneGraph, Topology};

/// Drop primitives that cannot be shown: non-triangle topology, missing or
/// empty POSITION, or indices pointing past the vertex data. Triangle index
/// counts are truncated to a multiple of 3. Returns how many were dropped.
pub fn strip_invalid_primitives(graph: &mut SceneGraph) -> Result<usize> {
    let mut dropped = 0;
    let mut new_accessors = Vec::new();
    let base = graph.accessors.len();

    for (mesh_index, mesh) in graph.meshes.iter_mut().enumerate() {
        let mut kept = Vec::with_capacity(mesh.primitives.len());
        for mut prim in std::mem::take(&mut mesh.primitives) {
            match check_primitive(&graph.accessors, &mut prim) {
                Ok(None) => kept.push(prim),
                Ok(Some(truncated)) => {
                    new_accessors.push(truncated);
                    prim.indices = Some(base + new_accessors.len() - 1);
                    kept.push(prim);
                }
                Err(reason) => {
                    tracing::debug!(mesh = mesh_index, reason = %reason, "Dropping primitive");
                    dropped += 1;
                }
            }
        }
        mesh.primitives = kept;
    }

    graph.accessors.extend(new_accessors);
    if dropped > 0 {
        tracing::info!(dropped, "Removed unsupported primitives");
    }
    Ok(dropped)
}

/// Validate one primitive, dropping attributes whose length does not match
/// POSITION. `Ok(Some(_))` carries a replacement index accessor whose count
/// is a multiple of 3.
fn check_primitive(accessors: &[Accessor], prim: &mut Primitive) -> Result<Option<Accessor>> {
    if prim.topology != Topology::Triangles {
        return Err(ConvertError::UnsupportedTopology(format!(
            "{:?} primitives are not supported",
            prim.topology
        )));
    }
    let vertex_count = prim
        .position()
        .and_then(|i| accessors.get(i))
        .map(|a| a.count)
        .unwrap_or(0);
    if vertex_count == 0 {
        return Err(ConvertError::MissingAttribute(
            "primitive has no POSITION data".to_string(),
        ));
    }
    prim.attributes.retain(|semantic, index| {
        let matches = accessors.get(*index).is_some_and(|a| a.count == vertex_count);
        if !matches {
            tracing::debug!(attribute = %semantic, "Removing attribute with mismatched length");
        }
        matches
    });

    match prim.indices {
        Some(index) => {
            let accessor = accessors.get(index).ok_or_else(|| {
                ConvertError::MissingAttribute(format!("index accessor {} does not exist", index))
            })?;
            if accessor.element_type != ElementType::Scalar
                || accessor.component_type == ComponentType::F32
                || accessor.component_type == ComponentType::I8
                || accessor.component_type == ComponentType::I16
            {
                return Err(ConvertError::MissingAttribute(
                    "index accessor is not an unsigned scalar".to_string(),
                ));
            }
            let indices = accessor.to_indices();
            if indices.iter().any(|i| *i as usize >= vertex_count) {
                return Err(ConvertError::MissingAttribute(
                    "index out of range of the vertex data".to_string(),
                ));
            }
            let usable = indices.len() - indices.len() % 3;
            if usable == 0 {
                return Err(ConvertError::MissingAttribute(
                    "primitive has no complete triangle".to_string(),
                ));
            }
            if usable == indices.len() {
                return Ok(None);
            }
            let size = accessor.element_size();
            let mut truncated = accessor.clone();
            truncated.count = usable;
            truncated.data.truncate(usable * size);
            truncated.min = None;
            truncated.max = None;
            Ok(Some(truncated))
        }
        None => {
            let usable = vertex_count - vertex_count % 3;
            if usable == 0 {
                return Err(ConvertError::MissingAttribute(
                    "primitive has no complete triangle".to_string(),
                ));
            }
            if usable == vertex_count {
                return Ok(None);
            }
            let sequence: Vec<u32> = (0..usable as u32).collect();
            Ok(Some(Accessor::from_indices(&sequence)))
        }
    }
}

/// Remove animations, skins, cameras and the node and attribute references to them.
pub fn strip_animation_data(graph: &mut SceneGraph) -> Result<()> {
    let animations = graph.animations.len();
    let skins = graph.skins.len();
    let cameras = graph.cameras.len();

    graph.animations.clear();
    graph.skins.clear();
    graph.cameras.clear();
    for node in &mut graph.nodes {
        node.camera = None;
        node.skin = None;
    }
    for mesh in &mut graph.meshes {
        for prim in &mut mesh.primitives {
            prim.attributes.retain(|semantic, _| !semantic.is_skinning());
        }
    }

    if animations + skins + cameras > 0 {
        tracing::debug!(animations, skins, cameras, "Stripped animation data");
    }
    Ok(())
}

/// Clear declared extension usage. Returns how many names were removed.
pub fn strip_extensions(graph: &mut SceneGraph) -> usize {
    let mut removed: Vec<String> = graph.extensions_used.drain(..).collect();
    removed.extend(graph.extensions_required.drain(..));
    removed.sort();
    removed.dedup();
    if !removed.is_empty() {
        tracing::debug!(extensions = ?removed, "Removed extension usage");
    }
    removed.len()
}
