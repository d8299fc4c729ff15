//! Graph optimizations: deduplication, hierarchy flattening, vertex welding,
//! normal generation and pruning of unreferenced objects.

use crate::error::{ConvertError, Result};
use crate::scene::{
    Accessor, ComponentType, ElementType, Material, Primitive, SceneGraph, Semantic, Topology,
    Transform,
};
use glam::{Mat4, Vec3};
use std::collections::HashMap;

/// Point every reference to accessor `i` at `map(i)`.
fn remap_accessors(graph: &mut SceneGraph, map: impl Fn(usize) -> Option<usize>) {
    for mesh in &mut graph.meshes {
        for prim in &mut mesh.primitives {
            let attributes = std::mem::take(&mut prim.attributes);
            prim.attributes = attributes
                .into_iter()
                .filter_map(|(semantic, index)| map(index).map(|i| (semantic, i)))
                .collect();
            prim.indices = prim.indices.and_then(&map);
        }
    }
    for skin in &mut graph.skins {
        skin.inverse_bind_matrices = skin.inverse_bind_matrices.and_then(&map);
    }
    for animation in &mut graph.animations {
        animation.samplers.retain_mut(|sampler| match (map(sampler.input), map(sampler.output)) {
            (Some(input), Some(output)) => {
                sampler.input = input;
                sampler.output = output;
                true
            }
            _ => false,
        });
    }
}

/// Merge accessors with identical type and contents. Returns how many were
/// redirected; the now-unused copies are left for [`prune`].
pub fn dedup_accessors(graph: &mut SceneGraph) -> Result<usize> {
    let remap: Vec<usize> = {
        let mut seen: HashMap<(ComponentType, ElementType, bool, usize, &[u8]), usize> =
            HashMap::new();
        graph
            .accessors
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let key = (a.component_type, a.element_type, a.normalized, a.count, a.data.as_slice());
                *seen.entry(key).or_insert(i)
            })
            .collect()
    };

    let merged = remap.iter().enumerate().filter(|(i, target)| i != *target).count();
    if merged > 0 {
        remap_accessors(graph, |i| Some(remap.get(i).copied().unwrap_or(i)));
        tracing::debug!(merged, "Deduplicated accessors");
    }
    Ok(merged)
}

/// Merge materials that differ only in name or extras.
pub fn dedup_materials(graph: &mut SceneGraph) -> Result<usize> {
    fn appearance(material: &Material) -> Material {
        Material {
            name: None,
            extras: None,
            ..material.clone()
        }
    }

    let mut unique: Vec<(usize, Material)> = Vec::new();
    let mut remap = Vec::with_capacity(graph.materials.len());
    for (i, material) in graph.materials.iter().enumerate() {
        let key = appearance(material);
        match unique.iter().find(|(_, existing)| *existing == key) {
            Some((first, _)) => remap.push(*first),
            None => {
                unique.push((i, key));
                remap.push(i);
            }
        }
    }

    let merged = remap.iter().enumerate().filter(|(i, target)| i != *target).count();
    if merged > 0 {
        for mesh in &mut graph.meshes {
            for prim in &mut mesh.primitives {
                if let Some(material) = prim.material {
                    prim.material = Some(remap.get(material).copied().unwrap_or(material));
                }
            }
        }
        tracing::debug!(merged, "Deduplicated materials");
    }
    Ok(merged)
}

/// Bake the hierarchy into mesh nodes and make them the scene roots.
///
/// Fails when a node has more than one parent, since its single world
/// transform would be ambiguous.
pub fn flatten(graph: &mut SceneGraph) -> Result<()> {
    let node_count = graph.nodes.len();
    let mut parents = vec![0usize; node_count];
    for node in &graph.nodes {
        for child in &node.children {
            let slot = parents.get_mut(*child).ok_or_else(|| {
                ConvertError::pass("flatten", format!("child node {} does not exist", child))
            })?;
            *slot += 1;
        }
    }
    if let Some(shared) = parents.iter().position(|p| *p > 1) {
        return Err(ConvertError::pass(
            "flatten",
            format!("node {} has more than one parent", shared),
        ));
    }

    let world = graph.world_matrices();
    let mut visited = vec![false; node_count];
    for scene_index in 0..graph.scenes.len() {
        let mut stack: Vec<usize> = graph.scenes[scene_index].nodes.iter().rev().copied().collect();
        let mut roots = Vec::new();
        while let Some(index) = stack.pop() {
            if index >= node_count || visited[index] {
                continue;
            }
            visited[index] = true;
            let node = &mut graph.nodes[index];
            stack.extend(node.children.drain(..).rev());
            if node.mesh.is_some() {
                node.transform = baked_transform(&world[index]);
                roots.push(index);
            }
        }
        graph.scenes[scene_index].nodes = roots;
    }
    Ok(())
}

/// TRS when the matrix decomposes cleanly, the matrix itself otherwise.
fn baked_transform(matrix: &Mat4) -> Transform {
    let trs = Transform::from_mat4(matrix);
    if trs.to_mat4().abs_diff_eq(*matrix, 1e-4) {
        trs
    } else {
        Transform::Matrix(matrix.to_cols_array())
    }
}

/// New vertex data for one welded primitive.
struct Welded {
    attributes: Vec<(Semantic, Accessor)>,
    indices: Accessor,
    removed: usize,
}

/// Merge vertices whose every attribute value matches after quantizing to
/// `tolerance`. Returns how many vertices were removed.
pub fn weld(graph: &mut SceneGraph, tolerance: f32) -> Result<usize> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(ConvertError::pass(
            "weld",
            format!("tolerance must be positive, got {}", tolerance),
        ));
    }

    let mut removed = 0;
    for mesh_index in 0..graph.meshes.len() {
        for prim_index in 0..graph.meshes[mesh_index].primitives.len() {
            let prim = &graph.meshes[mesh_index].primitives[prim_index];
            let Some(welded) = weld_primitive(&graph.accessors, prim, tolerance)? else {
                continue;
            };

            removed += welded.removed;
            let prim = &mut graph.meshes[mesh_index].primitives[prim_index];
            for (semantic, accessor) in welded.attributes {
                graph.accessors.push(accessor);
                prim.attributes.insert(semantic, graph.accessors.len() - 1);
            }
            graph.accessors.push(welded.indices);
            prim.indices = Some(graph.accessors.len() - 1);
        }
    }

    if removed > 0 {
        tracing::debug!(removed, "Welded vertices");
    }
    Ok(removed)
}

fn weld_primitive(accessors: &[Accessor], prim: &Primitive, tolerance: f32) -> Result<Option<Welded>> {
    if prim.topology != Topology::Triangles {
        return Ok(None);
    }
    let Some(position) = prim.position() else {
        return Ok(None);
    };
    let vertex_count = accessors
        .get(position)
        .map(|a| a.count)
        .ok_or_else(|| ConvertError::pass("weld", "position accessor does not exist"))?;

    let mut attributes = Vec::with_capacity(prim.attributes.len());
    for (semantic, index) in &prim.attributes {
        let accessor = accessors
            .get(*index)
            .ok_or_else(|| ConvertError::pass("weld", format!("{} accessor does not exist", semantic)))?;
        if accessor.count != vertex_count {
            return Ok(None);
        }
        attributes.push((semantic, accessor));
    }

    let mut keys: HashMap<Vec<i64>, u32> = HashMap::new();
    let mut representatives: Vec<usize> = Vec::new();
    let mut remap: Vec<u32> = Vec::with_capacity(vertex_count);
    for vertex in 0..vertex_count {
        let key: Vec<i64> = attributes
            .iter()
            .flat_map(|(_, a)| {
                (0..a.element_type.components())
                    .map(move |c| (a.value(vertex, c) / tolerance).round() as i64)
            })
            .collect();
        let next = representatives.len() as u32;
        let id = *keys.entry(key).or_insert_with(|| {
            representatives.push(vertex);
            next
        });
        remap.push(id);
    }

    if representatives.len() == vertex_count {
        return Ok(None);
    }

    let old_indices: Vec<u32> = match prim.indices {
        Some(index) => accessors
            .get(index)
            .ok_or_else(|| ConvertError::pass("weld", "index accessor does not exist"))?
            .to_indices(),
        None => (0..vertex_count as u32).collect(),
    };
    let new_indices = old_indices
        .iter()
        .map(|i| {
            remap
                .get(*i as usize)
                .copied()
                .ok_or_else(|| ConvertError::pass("weld", format!("index {} out of range", i)))
        })
        .collect::<Result<Vec<u32>>>()?;

    let attributes = attributes
        .into_iter()
        .map(|(semantic, source)| {
            let mut data = Vec::with_capacity(representatives.len() * source.element_size());
            for vertex in &representatives {
                data.extend_from_slice(source.element_bytes(*vertex));
            }
            let mut accessor = Accessor::from_bytes(
                source.component_type,
                source.element_type,
                representatives.len(),
                data,
            );
            accessor.name = source.name.clone();
            accessor.normalized = source.normalized;
            (semantic.clone(), accessor)
        })
        .collect();

    Ok(Some(Welded {
        attributes,
        indices: compact_indices(&new_indices),
        removed: vertex_count - representatives.len(),
    }))
}

/// Index accessor using 16-bit indices when they fit.
fn compact_indices(indices: &[u32]) -> Accessor {
    if indices.iter().all(|i| *i < u16::MAX as u32) {
        let data = indices.iter().flat_map(|i| (*i as u16).to_le_bytes()).collect();
        Accessor::from_bytes(ComponentType::U16, ElementType::Scalar, indices.len(), data)
    } else {
        Accessor::from_indices(indices)
    }
}

/// Add area-weighted vertex normals to triangle primitives that have none.
/// Authored normals are never replaced. Returns how many primitives got normals.
pub fn generate_normals(graph: &mut SceneGraph) -> Result<usize> {
    let mut generated = 0;
    for mesh_index in 0..graph.meshes.len() {
        for prim_index in 0..graph.meshes[mesh_index].primitives.len() {
            let prim = &graph.meshes[mesh_index].primitives[prim_index];
            if prim.topology != Topology::Triangles
                || prim.attributes.contains_key(&Semantic::Normal)
            {
                continue;
            }
            let Some(position) = prim.position() else {
                continue;
            };
            let positions = graph.accessor(position)?.to_vec3();
            let indices = match prim.indices {
                Some(index) => graph.accessor(index)?.to_indices(),
                None => (0..positions.len() as u32).collect(),
            };

            let normals = compute_normals(&positions, &indices)?;
            graph.accessors.push(Accessor::from_vec3(&normals));
            let normal_index = graph.accessors.len() - 1;
            graph.meshes[mesh_index].primitives[prim_index]
                .attributes
                .insert(Semantic::Normal, normal_index);
            generated += 1;
        }
    }
    Ok(generated)
}

/// Sum of unnormalized face normals per vertex, so larger faces weigh more.
pub fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Result<Vec<[f32; 3]>> {
    let mut sums = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
        if a.max(b).max(c) >= positions.len() {
            return Err(ConvertError::pass("normals", "index out of range"));
        }
        let pa = Vec3::from_array(positions[a]);
        let face = (Vec3::from_array(positions[b]) - pa).cross(Vec3::from_array(positions[c]) - pa);
        sums[a] += face;
        sums[b] += face;
        sums[c] += face;
    }
    Ok(sums
        .into_iter()
        .map(|sum| {
            let normal = sum.normalize_or_zero();
            if normal == Vec3::ZERO {
                Vec3::Z.to_array()
            } else {
                normal.to_array()
            }
        })
        .collect())
}

/// Keep the items marked used; returns them with an old → new index map.
fn compact<T>(items: Vec<T>, used: &[bool]) -> (Vec<T>, Vec<Option<usize>>) {
    let mut map = Vec::with_capacity(items.len());
    let mut kept = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        if used.get(i).copied().unwrap_or(false) {
            map.push(Some(kept.len()));
            kept.push(item);
        } else {
            map.push(None);
        }
    }
    (kept, map)
}

/// Remove nodes that lead to no geometry, and meshes, materials and
/// accessors nothing refers to. Returns how many objects were removed.
pub fn prune(graph: &mut SceneGraph) -> Result<usize> {
    for node in &mut graph.nodes {
        if let Some(mesh) = node.mesh {
            if graph.meshes.get(mesh).map_or(true, |m| m.primitives.is_empty()) {
                node.mesh = None;
            }
        }
    }

    // Nodes
    let node_count = graph.nodes.len();
    let roots: Vec<usize> = if graph.scenes.is_empty() {
        let mut is_child = vec![false; node_count];
        for child in graph.nodes.iter().flat_map(|n| n.children.iter()) {
            if let Some(flag) = is_child.get_mut(*child) {
                *flag = true;
            }
        }
        (0..node_count).filter(|i| !is_child[*i]).collect()
    } else {
        graph.scenes.iter().flat_map(|s| s.nodes.iter().copied()).collect()
    };

    let mut pinned = vec![false; node_count];
    let pinned_refs = graph
        .skins
        .iter()
        .flat_map(|s| s.joints.iter().copied().chain(s.skeleton))
        .chain(graph.animations.iter().flat_map(|a| a.channels.iter().filter_map(|c| c.node)));
    for index in pinned_refs {
        if let Some(flag) = pinned.get_mut(index) {
            *flag = true;
        }
    }

    let mut order = Vec::new();
    let mut visited = vec![false; node_count];
    let mut stack = roots;
    while let Some(index) = stack.pop() {
        if index >= node_count || visited[index] {
            continue;
        }
        visited[index] = true;
        order.push(index);
        stack.extend(graph.nodes[index].children.iter().copied());
    }

    let mut keep = vec![false; node_count];
    loop {
        let mut changed = false;
        for &index in order.iter().rev() {
            let node = &graph.nodes[index];
            let wanted = node.mesh.is_some()
                || pinned[index]
                || node.children.iter().any(|c| keep.get(*c).copied().unwrap_or(false));
            if wanted && !keep[index] {
                keep[index] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for (index, flag) in pinned.iter().enumerate() {
        keep[index] |= *flag;
    }

    let (nodes, node_map) = compact(std::mem::take(&mut graph.nodes), &keep);
    graph.nodes = nodes;
    let map_node = |i: usize| node_map.get(i).copied().flatten();
    for node in &mut graph.nodes {
        node.children = node.children.iter().filter_map(|c| map_node(*c)).collect();
    }
    for scene in &mut graph.scenes {
        scene.nodes = scene.nodes.iter().filter_map(|n| map_node(*n)).collect();
    }
    for skin in &mut graph.skins {
        skin.joints = skin.joints.iter().filter_map(|j| map_node(*j)).collect();
        skin.skeleton = skin.skeleton.and_then(map_node);
    }
    for animation in &mut graph.animations {
        for channel in &mut animation.channels {
            channel.node = channel.node.and_then(map_node);
        }
    }
    let mut removed = node_count - graph.nodes.len();

    // Meshes
    let mut used = vec![false; graph.meshes.len()];
    for mesh in graph.nodes.iter().filter_map(|n| n.mesh) {
        used[mesh] = true;
    }
    let mesh_count = graph.meshes.len();
    let (meshes, mesh_map) = compact(std::mem::take(&mut graph.meshes), &used);
    graph.meshes = meshes;
    for node in &mut graph.nodes {
        node.mesh = node.mesh.and_then(|m| mesh_map.get(m).copied().flatten());
    }
    removed += mesh_count - graph.meshes.len();

    // Materials
    let mut used = vec![false; graph.materials.len()];
    for (_, prim) in graph.primitives() {
        if let Some(flag) = prim.material.and_then(|m| used.get_mut(m)) {
            *flag = true;
        }
    }
    let material_count = graph.materials.len();
    let (materials, material_map) = compact(std::mem::take(&mut graph.materials), &used);
    graph.materials = materials;
    for mesh in &mut graph.meshes {
        for prim in &mut mesh.primitives {
            prim.material = prim.material.and_then(|m| material_map.get(m).copied().flatten());
        }
    }
    removed += material_count - graph.materials.len();

    // Accessors
    let mut used = vec![false; graph.accessors.len()];
    let referenced = graph
        .primitives()
        .flat_map(|(_, p)| p.attributes.values().copied().chain(p.indices))
        .chain(graph.skins.iter().filter_map(|s| s.inverse_bind_matrices))
        .chain(
            graph
                .animations
                .iter()
                .flat_map(|a| a.samplers.iter().flat_map(|s| [s.input, s.output])),
        )
        .collect::<Vec<_>>();
    for index in referenced {
        if let Some(flag) = used.get_mut(index) {
            *flag = true;
        }
    }
    let accessor_count = graph.accessors.len();
    let (accessors, accessor_map) = compact(std::mem::take(&mut graph.accessors), &used);
    graph.accessors = accessors;
    remap_accessors(graph, |i| accessor_map.get(i).copied().flatten());
    removed += accessor_count - graph.accessors.len();

    if removed > 0 {
        tracing::debug!(removed, "Pruned unreferenced objects");
    }
    Ok(removed)
}
