//! Material color injection and model normalization.

use crate::scene::{MaterialModel, SceneGraph};
use std::collections::HashMap;

/// Overwrite base colors of materials whose name matches a key of `colors`,
/// ignoring case. Returns how many materials changed.
pub fn inject_colors(graph: &mut SceneGraph, colors: &HashMap<String, [f32; 4]>) -> usize {
    let lookup: HashMap<String, [f32; 4]> = colors
        .iter()
        .map(|(name, color)| (name.to_lowercase(), *color))
        .collect();

    let mut injected = 0;
    for material in &mut graph.materials {
        let Some(color) = material
            .name
            .as_ref()
            .and_then(|name| lookup.get(&name.to_lowercase()))
        else {
            continue;
        };
        material.base_color = *color;
        if let MaterialModel::SpecularGlossiness { diffuse, .. } = &mut material.model {
            *diffuse = *color;
        }
        injected += 1;
    }
    injected
}

/// Convert every material to metallic-roughness. Returns how many were converted.
///
/// Specular-glossiness keeps its diffuse color, becomes non-metallic and uses
/// `1 - glossiness` as roughness. Unlit becomes fully rough and non-metallic.
pub fn normalize_materials(graph: &mut SceneGraph) -> usize {
    let mut converted = 0;
    for material in &mut graph.materials {
        match material.model {
            MaterialModel::MetallicRoughness => continue,
            MaterialModel::SpecularGlossiness {
                diffuse,
                glossiness,
            } => {
                material.base_color = diffuse;
                material.metallic = 0.0;
                material.roughness = 1.0 - glossiness;
            }
            MaterialModel::Unlit => {
                material.metallic = 0.0;
                material.roughness = 1.0;
            }
        }
        material.model = MaterialModel::MetallicRoughness;
        converted += 1;
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Material;
    use approx::assert_relative_eq;

    fn named(name: &str) -> Material {
        let mut material = Material::neutral(name);
        material.base_color = [1.0; 4];
        material
    }

    #[test]
    fn test_inject_colors_case_insensitive() {
        let mut graph = SceneGraph::default();
        graph.materials.push(named("Concrete"));
        graph.materials.push(named("Glass"));
        graph.materials.push(Material {
            name: None,
            ..named("x")
        });
        let colors = HashMap::from([("concrete".to_string(), [0.5, 0.5, 0.5, 1.0])]);

        assert_eq!(inject_colors(&mut graph, &colors), 1);
        assert_eq!(graph.materials[0].base_color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(graph.materials[1].base_color, [1.0; 4]);
    }

    #[test]
    fn test_injection_survives_spec_gloss_normalization() {
        let mut graph = SceneGraph::default();
        let mut material = named("Brick");
        material.model = MaterialModel::SpecularGlossiness {
            diffuse: [0.9, 0.1, 0.1, 1.0],
            glossiness: 0.25,
        };
        graph.materials.push(material);

        let colors = HashMap::from([("BRICK".to_string(), [0.2, 0.2, 0.2, 1.0])]);
        inject_colors(&mut graph, &colors);
        assert_eq!(normalize_materials(&mut graph), 1);

        let material = &graph.materials[0];
        assert_eq!(material.model, MaterialModel::MetallicRoughness);
        assert_eq!(material.base_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(material.metallic, 0.0);
        assert_relative_eq!(material.roughness, 0.75);
    }

    #[test]
    fn test_unlit_normalization() {
        let mut graph = SceneGraph::default();
        let mut material = named("Sky");
        material.model = MaterialModel::Unlit;
        material.metallic = 1.0;
        graph.materials.push(material);
        graph.materials.push(named("Plain"));

        assert_eq!(normalize_materials(&mut graph), 1);
        assert_eq!(graph.materials[0].roughness, 1.0);
        assert_eq!(graph.materials[0].metallic, 0.0);
    }
}
