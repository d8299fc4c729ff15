//! USDA scene description.
//!
//! Generates the ASCII layer by string formatting. Every triangle primitive
//! becomes one `Mesh` prim under `/Root/Geometry` carrying its baked world
//! transform; materials become `UsdPreviewSurface` networks under
//! `/Root/Materials`.

use crate::error::{ConvertError, Result};
use crate::scene::{AlphaMode, Material, Primitive, SceneGraph, Semantic, Topology};
use glam::{Quat, Vec3};
use std::collections::HashSet;
use std::fmt::{self, Write};

/// Material bound to primitives that have none. Written when some mesh
/// needs it or the scene has no materials at all.
pub const DEFAULT_MATERIAL: &str = "DefaultMaterial";

/// Prim names reserved by the document layout.
const RESERVED: [&str; 4] = ["Root", "Materials", "Geometry", DEFAULT_MATERIAL];

/// Restrict a name to `[A-Za-z0-9_]`, prefixing `_` when it starts with a digit.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Hands out sanitized names that are unique within one document.
#[derive(Debug, Default)]
pub struct NameRegistry {
    used: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            used: RESERVED.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sanitize `name` and append `_N` until it is unused.
    pub fn unique(&mut self, name: &str) -> String {
        let base = sanitize_name(name);
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Accumulated world transform, composed component-wise.
#[derive(Debug, Clone, Copy)]
struct WorldTransform {
    translation: Vec3,
    rotation: Quat,
    scale: Vec3,
}

impl WorldTransform {
    const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Parent scale applies to the child offset; rotation composes only
    /// when the child has its own.
    fn child(&self, translation: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> Self {
        let rotation = Quat::from_array(rotation);
        Self {
            translation: self.translation + self.scale * Vec3::from_array(translation),
            rotation: if is_identity_rotation(rotation) {
                self.rotation
            } else {
                self.rotation * rotation
            },
            scale: self.scale * Vec3::from_array(scale),
        }
    }
}

fn is_identity_rotation(rotation: Quat) -> bool {
    rotation.abs_diff_eq(Quat::IDENTITY, 1e-6) || rotation.abs_diff_eq(-Quat::IDENTITY, 1e-6)
}

/// Vertex data of one emitted mesh.
struct MeshData {
    indices: Vec<u32>,
    points: Vec<[f32; 3]>,
    normals: Option<Vec<[f32; 3]>>,
    uvs: Option<Vec<[f32; 2]>>,
}

/// Generate the USDA document for a scene graph.
pub fn write_usda(graph: &SceneGraph) -> Result<String> {
    write_document(graph).map_err(|e| {
        ConvertError::ArchiveSynthesisFailure(format!("failed to format scene description: {}", e))
    })
}

fn write_document(graph: &SceneGraph) -> std::result::Result<String, fmt::Error> {
    let mut names = NameRegistry::new();
    let mut usda = String::with_capacity(4096);

    // Header
    writeln!(usda, "#usda 1.0")?;
    writeln!(usda, "(")?;
    writeln!(usda, "    defaultPrim = \"Root\"")?;
    writeln!(usda, "    metersPerUnit = 1")?;
    writeln!(usda, "    upAxis = \"Y\"")?;
    writeln!(usda, ")\n")?;
    writeln!(usda, "def Xform \"Root\"")?;
    writeln!(usda, "{{")?;

    let material_names: Vec<String> = graph
        .materials
        .iter()
        .enumerate()
        .map(|(i, material)| {
            let fallback = format!("Material_{}", i);
            names.unique(material.name.as_deref().unwrap_or(&fallback))
        })
        .collect();

    // Collect geometry first so the default material is only written when needed
    let mut prims = Vec::new();
    let mut visited = vec![false; graph.nodes.len()];
    let mut stack: Vec<(usize, WorldTransform)> = root_nodes(graph)
        .into_iter()
        .rev()
        .map(|n| (n, WorldTransform::IDENTITY))
        .collect();
    while let Some((index, parent)) = stack.pop() {
        let Some(node) = graph.nodes.get(index) else {
            continue;
        };
        if visited[index] {
            continue;
        }
        visited[index] = true;

        let (translation, rotation, scale) = node.transform.to_trs();
        let world = parent.child(translation, rotation, scale);
        for child in node.children.iter().rev() {
            stack.push((*child, world));
        }

        let Some(mesh) = node.mesh.and_then(|m| graph.meshes.get(m)) else {
            continue;
        };
        let base_name = node
            .name
            .as_deref()
            .or(mesh.name.as_deref())
            .unwrap_or("Mesh");
        for prim in &mesh.primitives {
            let Some(data) = mesh_data(graph, prim) else {
                continue;
            };
            let material = prim
                .material
                .and_then(|m| material_names.get(m))
                .map(String::as_str);
            prims.push((names.unique(base_name), data, world, material));
        }
    }
    let needs_default =
        material_names.is_empty() || prims.iter().any(|(_, _, _, material)| material.is_none());

    // Materials
    writeln!(usda, "    def Scope \"Materials\"")?;
    writeln!(usda, "    {{")?;
    if needs_default {
        write_material(&mut usda, DEFAULT_MATERIAL, &Material::neutral(DEFAULT_MATERIAL))?;
    }
    for (name, material) in material_names.iter().zip(&graph.materials) {
        write_material(&mut usda, name, material)?;
    }
    writeln!(usda, "    }}\n")?;

    // Geometry
    writeln!(usda, "    def Scope \"Geometry\"")?;
    writeln!(usda, "    {{")?;
    for (name, data, world, material) in &prims {
        write_mesh_prim(&mut usda, name, data, world, material.unwrap_or(DEFAULT_MATERIAL))?;
    }
    writeln!(usda, "    }}")?;

    // Close Root Xform
    writeln!(usda, "}}")?;

    tracing::debug!(meshes = prims.len(), materials = graph.materials.len(), "Wrote USDA");
    Ok(usda)
}

/// Scene roots, or every node without a parent when no scene lists any.
fn root_nodes(graph: &SceneGraph) -> Vec<usize> {
    let roots = graph.root_nodes();
    if !roots.is_empty() {
        return roots;
    }
    let mut has_parent = vec![false; graph.nodes.len()];
    for child in graph.nodes.iter().flat_map(|n| n.children.iter()) {
        if let Some(flag) = has_parent.get_mut(*child) {
            *flag = true;
        }
    }
    (0..graph.nodes.len()).filter(|i| !has_parent[*i]).collect()
}

/// Collect emit-ready data; `None` for primitives with nothing to draw.
fn mesh_data(graph: &SceneGraph, prim: &Primitive) -> Option<MeshData> {
    if prim.topology != Topology::Triangles {
        return None;
    }
    let points = graph.accessor(prim.position()?).ok()?.to_vec3();
    if points.is_empty() {
        return None;
    }

    let mut indices = match prim.indices {
        Some(i) => graph.accessor(i).ok()?.to_indices(),
        None => (0..points.len() as u32).collect(),
    };
    indices.truncate(indices.len() - indices.len() % 3);
    if indices.is_empty() || indices.iter().any(|i| *i as usize >= points.len()) {
        tracing::warn!("Skipping primitive with invalid indices");
        return None;
    }

    let attribute = |semantic: &Semantic| {
        prim.attributes
            .get(semantic)
            .and_then(|i| graph.accessors.get(*i))
            .filter(|a| a.count == points.len())
    };
    let normals = attribute(&Semantic::Normal).map(|a| a.to_vec3());
    // glTF puts the texture origin top-left, USD bottom-left
    let uvs = attribute(&Semantic::TexCoord(0))
        .map(|a| a.to_vec2().into_iter().map(|[u, v]| [u, 1.0 - v]).collect());

    Some(MeshData {
        indices,
        points,
        normals,
        uvs,
    })
}

/// Finite value for the text output.
fn num(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Write a UsdPreviewSurface material definition.
fn write_material(usda: &mut String, name: &str, material: &Material) -> fmt::Result {
    let [r, g, b, a] = material.base_color;
    let opacity = if material.alpha_mode == AlphaMode::Opaque { 1.0 } else { a };

    writeln!(usda, "        def Material \"{}\"", name)?;
    writeln!(usda, "        {{")?;
    writeln!(
        usda,
        "            token outputs:surface.connect = </Root/Materials/{}/PreviewSurface.outputs:surface>",
        name
    )?;
    writeln!(usda, "            def Shader \"PreviewSurface\"")?;
    writeln!(usda, "            {{")?;
    writeln!(usda, "                uniform token info:id = \"UsdPreviewSurface\"")?;
    writeln!(
        usda,
        "                color3f inputs:diffuseColor = ({}, {}, {})",
        num(r),
        num(g),
        num(b)
    )?;
    if material.emissive.iter().any(|c| *c > 0.0) {
        let [er, eg, eb] = material.emissive;
        writeln!(
            usda,
            "                color3f inputs:emissiveColor = ({}, {}, {})",
            num(er),
            num(eg),
            num(eb)
        )?;
    }
    writeln!(usda, "                float inputs:metallic = {}", num(material.metallic))?;
    writeln!(usda, "                float inputs:roughness = {}", num(material.roughness))?;
    writeln!(usda, "                float inputs:opacity = {}", num(opacity))?;
    if material.alpha_mode == AlphaMode::Mask {
        writeln!(
            usda,
            "                float inputs:opacityThreshold = {}",
            num(material.alpha_cutoff.unwrap_or(0.5))
        )?;
    }
    writeln!(usda, "                token outputs:surface")?;
    writeln!(usda, "            }}")?;
    writeln!(usda, "        }}\n")
}

/// Write a comma-separated array inline.
fn write_array_inline<T, F>(usda: &mut String, items: &[T], mut fmt: F) -> fmt::Result
where
    F: FnMut(&T, &mut String) -> fmt::Result,
{
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            usda.push_str(", ");
        }
        fmt(item, usda)?;
    }
    Ok(())
}

/// Write a Mesh prim with transform ops, geometry and material binding.
fn write_mesh_prim(
    usda: &mut String,
    name: &str,
    mesh: &MeshData,
    world: &WorldTransform,
    material: &str,
) -> fmt::Result {
    writeln!(usda, "        def Mesh \"{}\"", name)?;
    writeln!(usda, "        {{")?;

    // Transform ops, each only when not identity
    let mut ops = Vec::new();
    let t = world.translation;
    if !t.abs_diff_eq(Vec3::ZERO, 1e-6) {
        writeln!(
            usda,
            "            double3 xformOp:translate = ({}, {}, {})",
            num(t.x),
            num(t.y),
            num(t.z)
        )?;
        ops.push("\"xformOp:translate\"");
    }
    let q = world.rotation;
    if !is_identity_rotation(q) {
        writeln!(
            usda,
            "            quatf xformOp:orient = ({}, {}, {}, {})",
            num(q.w),
            num(q.x),
            num(q.y),
            num(q.z)
        )?;
        ops.push("\"xformOp:orient\"");
    }
    let s = world.scale;
    if !s.abs_diff_eq(Vec3::ONE, 1e-6) {
        writeln!(
            usda,
            "            float3 xformOp:scale = ({}, {}, {})",
            num(s.x),
            num(s.y),
            num(s.z)
        )?;
        ops.push("\"xformOp:scale\"");
    }
    if !ops.is_empty() {
        writeln!(usda, "            uniform token[] xformOpOrder = [{}]", ops.join(", "))?;
    }

    // Extent
    let (min, max) = mesh.points.iter().fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(min, max), p| {
            let p = Vec3::from_array(*p);
            (min.min(p), max.max(p))
        },
    );
    writeln!(
        usda,
        "            float3[] extent = [({}, {}, {}), ({}, {}, {})]",
        num(min.x),
        num(min.y),
        num(min.z),
        num(max.x),
        num(max.y),
        num(max.z)
    )?;

    // Face vertex counts, all triangles
    write!(usda, "            int[] faceVertexCounts = [")?;
    for i in 0..mesh.indices.len() / 3 {
        if i > 0 {
            usda.push_str(", ");
        }
        usda.push('3');
    }
    writeln!(usda, "]")?;

    write!(usda, "            int[] faceVertexIndices = [")?;
    write_array_inline(usda, &mesh.indices, |i, s| write!(s, "{}", i))?;
    writeln!(usda, "]")?;

    write!(usda, "            point3f[] points = [")?;
    write_array_inline(usda, &mesh.points, |p, s| {
        write!(s, "({}, {}, {})", num(p[0]), num(p[1]), num(p[2]))
    })?;
    writeln!(usda, "]")?;

    if let Some(normals) = &mesh.normals {
        write!(usda, "            normal3f[] normals = [")?;
        write_array_inline(usda, normals, |n, s| {
            write!(s, "({}, {}, {})", num(n[0]), num(n[1]), num(n[2]))
        })?;
        writeln!(usda, "] (")?;
        writeln!(usda, "                interpolation = \"vertex\"")?;
        writeln!(usda, "            )")?;
    }

    if let Some(uvs) = &mesh.uvs {
        write!(usda, "            texCoord2f[] primvars:st = [")?;
        write_array_inline(usda, uvs, |uv, s| write!(s, "({}, {})", num(uv[0]), num(uv[1])))?;
        writeln!(usda, "] (")?;
        writeln!(usda, "                interpolation = \"vertex\"")?;
        writeln!(usda, "            )")?;
    }

    writeln!(usda, "            uniform token subdivisionScheme = \"none\"")?;
    writeln!(
        usda,
        "            rel material:binding = </Root/Materials/{}>",
        material
    )?;
    writeln!(usda, "        }}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::decode::{decode, tests::triangle_container};
    use crate::scene::{Accessor, Mesh, Node, Scene, Transform};
    use std::collections::BTreeMap;

    #[test]
    fn test_usda_header_and_scopes() {
        let graph = decode(&triangle_container([0.5, 0.5, 0.5, 1.0])).unwrap();
        let usda = write_usda(&graph).unwrap();
        assert!(usda.starts_with("#usda 1.0"));
        assert!(usda.contains("defaultPrim = \"Root\""));
        assert!(usda.contains("def Scope \"Materials\""));
        assert!(usda.contains("def Material \"Steel\""));
        assert!(!usda.contains("DefaultMaterial"));
        assert!(usda.contains("UsdPreviewSurface"));
    }

    #[test]
    fn test_usda_mesh_prim() {
        let graph = decode(&triangle_container([0.5, 0.5, 0.5, 1.0])).unwrap();
        let usda = write_usda(&graph).unwrap();
        assert!(usda.contains("def Mesh \"Steel_Beam__424461_\""));
        assert!(usda.contains("int[] faceVertexCounts = [3]"));
        assert!(usda.contains("int[] faceVertexIndices = [0, 1, 2]"));
        assert!(usda.contains("point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]"));
        assert!(usda.contains("double3 xformOp:translate = (1, 2, 3)"));
        assert!(usda.contains("uniform token[] xformOpOrder = [\"xformOp:translate\"]"));
        assert!(!usda.contains("xformOp:orient"));
        assert!(usda.contains("rel material:binding = </Root/Materials/Steel>"));
    }

    #[test]
    fn test_empty_graph_still_has_default_material() {
        let usda = write_usda(&SceneGraph::default()).unwrap();
        assert!(usda.contains("def Material \"DefaultMaterial\""));
        assert!(usda.contains("def Scope \"Geometry\"\n    {\n    }"));
        assert!(!usda.contains("def Mesh"));
    }

    #[test]
    fn test_default_material_only_for_unbound_meshes() {
        let mut graph = decode(&triangle_container([0.5, 0.5, 0.5, 1.0])).unwrap();
        let mut unbound = graph.meshes[0].primitives[0].clone();
        unbound.material = None;
        graph.meshes[0].primitives.push(unbound);

        let usda = write_usda(&graph).unwrap();
        assert_eq!(usda.matches("def Material \"DefaultMaterial\"").count(), 1);
        assert!(usda.contains("rel material:binding = </Root/Materials/Steel>"));
        assert!(usda.contains("rel material:binding = </Root/Materials/DefaultMaterial>"));
    }

    #[test]
    fn test_world_transform_composition() {
        let parent = WorldTransform::IDENTITY.child([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], [2.0, 2.0, 2.0]);
        let child = parent.child([0.0, 3.0, 0.0], [0.0, 0.0, 0.0, 1.0], [1.0, 0.5, 1.0]);
        assert_eq!(child.translation, Vec3::new(1.0, 6.0, 0.0));
        assert_eq!(child.scale, Vec3::new(2.0, 1.0, 2.0));
        assert!(is_identity_rotation(child.rotation));

        let turned = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let rotated = WorldTransform::IDENTITY.child([0.0; 3], turned.to_array(), [1.0; 3]);
        let inherited = rotated.child([0.0; 3], [0.0, 0.0, 0.0, 1.0], [1.0; 3]);
        assert!(inherited.rotation.abs_diff_eq(turned, 1e-6));
    }

    #[test]
    fn test_unindexed_primitive_gets_generated_indices() {
        let mut graph = SceneGraph::default();
        graph.accessors.push(Accessor::from_vec3(&[
            [0.0; 3],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [5.0, 5.0, 5.0],
        ]));
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
            name: Some("9 lives".into()),
            mesh: Some(0),
            transform: Transform::default(),
            ..Default::default()
        });
        graph.scenes.push(Scene {
            name: None,
            nodes: vec![0],
        });

        let usda = write_usda(&graph).unwrap();
        assert!(usda.contains("def Mesh \"_9_lives\""));
        assert!(usda.contains("faceVertexIndices = [0, 1, 2]"));
        assert!(usda.contains("</Root/Materials/DefaultMaterial>"));
        assert!(!usda.contains("xformOpOrder"));
    }

    #[test]
    fn test_names_are_unique_and_restricted() {
        let mut names = NameRegistry::new();
        let inputs = ["Wall (1)", "Wall [1]", "Wall_1_", "Root", "", "3D", "Wall (1)"];
        let produced: Vec<String> = inputs.iter().map(|n| names.unique(n)).collect();

        let unique: HashSet<&String> = produced.iter().collect();
        assert_eq!(unique.len(), produced.len());
        for name in &produced {
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            assert!(!name.starts_with(|c: char| c.is_ascii_digit()));
            assert!(!RESERVED.contains(&name.as_str()));
        }
        assert_eq!(produced[0], "Wall__1_");
        assert_eq!(produced[1], "Wall__1__1");
        assert_eq!(produced[3], "Root_1");
        assert_eq!(produced[5], "_3D");
    }
}
