//! AR-compatibility transform pipeline.
//!
//! Passes run in a fixed order on the scene graph. Each pass works on a
//! copy; when it fails the copy is discarded, a warning is logged and the
//! pipeline carries on with the graph as it was before that pass. After
//! encoding, [`bounds`] patches the written container bytes.

pub mod bounds;
pub mod cleanup;
pub mod compat;
pub mod materials;
pub mod optimize;

use crate::error::{ConvertError, Result};
use crate::scene::encode::encode_to_bytes;
use crate::scene::SceneGraph;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Merge vertices that are equal within `weld_tolerance`.
    pub weld: bool,
    /// Generate normals for primitives without them.
    pub normals: bool,
    /// Merge identical accessors and materials.
    pub dedup: bool,
    /// Bake the node hierarchy into world transforms on mesh nodes.
    pub flatten: bool,
    /// Remove unreferenced nodes, meshes, materials and accessors.
    pub prune: bool,
    /// Quantization step used when welding.
    pub weld_tolerance: f32,
    /// Base colors to apply by material name (case-insensitive).
    pub colors: HashMap<String, [f32; 4]>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weld: true,
            normals: true,
            dedup: true,
            flatten: true,
            prune: true,
            weld_tolerance: 1e-4,
            colors: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Override base colors by material name.
    pub fn with_colors(mut self, colors: HashMap<String, [f32; 4]>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_weld_tolerance(mut self, tolerance: f32) -> Self {
        self.weld_tolerance = tolerance;
        self
    }

    /// Disable every optional optimization; only repairs remain.
    pub fn repairs_only(mut self) -> Self {
        self.weld = false;
        self.normals = false;
        self.dedup = false;
        self.flatten = false;
        self.prune = false;
        self
    }

    /// Load a `{"name": [r, g, b(, a)]}` color map from a JSON file.
    pub fn load_colors(path: impl AsRef<Path>) -> Result<HashMap<String, [f32; 4]>> {
        let text = std::fs::read_to_string(path)?;
        parse_colors(&text)
    }
}

/// Parse a color map. Three-component colors get alpha 1.
pub fn parse_colors(text: &str) -> Result<HashMap<String, [f32; 4]>> {
    let raw: HashMap<String, Vec<f32>> = serde_json::from_str(text).map_err(|e| {
        ConvertError::InvalidConfiguration(format!("color map is not valid JSON: {}", e))
    })?;
    raw.into_iter()
        .map(|(name, values)| {
            let color = match values.as_slice() {
                [r, g, b] => [*r, *g, *b, 1.0],
                [r, g, b, a] => [*r, *g, *b, *a],
                _ => {
                    return Err(ConvertError::InvalidConfiguration(format!(
                        "color for '{}' needs 3 or 4 components",
                        name
                    )))
                }
            };
            Ok((name, color))
        })
        .collect()
}

/// A pass that was skipped because it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPass {
    pub pass: String,
    pub reason: String,
}

/// What the pipeline did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub passes_applied: Vec<String>,
    pub passes_skipped: Vec<SkippedPass>,
    /// Primitives removed for topology or missing/invalid data.
    pub primitives_dropped: usize,
    pub colors_injected: usize,
    pub materials_normalized: usize,
    pub accessors_deduplicated: usize,
    pub materials_deduplicated: usize,
    pub vertices_welded: usize,
    pub normals_generated: usize,
    pub objects_pruned: usize,
    pub uvs_synthesized: usize,
    pub extras_cleared: usize,
    pub materials_clamped: usize,
    pub default_materials_assigned: usize,
    pub extensions_removed: usize,
    pub accessors_patched: usize,
}

impl PipelineReport {
    fn skip(&mut self, pass: &str, error: &ConvertError) {
        tracing::warn!(pass, error = %error, "Pipeline pass failed, continuing without it");
        self.passes_skipped.push(SkippedPass {
            pass: pass.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Result of [`optimize`].
#[derive(Debug, Clone)]
pub struct OptimizedScene {
    /// Transformed graph, as encoded.
    pub graph: SceneGraph,
    /// Encoded and bounds-patched container bytes.
    pub glb: Vec<u8>,
    pub report: PipelineReport,
}

/// Run one pass on a copy of the graph and keep the result only on success.
fn run_pass<F>(name: &str, graph: &mut SceneGraph, report: &mut PipelineReport, pass: F)
where
    F: FnOnce(&mut SceneGraph, &mut PipelineReport) -> Result<()>,
{
    let mut candidate = graph.clone();
    let mut candidate_report = report.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pass(&mut candidate, &mut candidate_report)
    }))
    .unwrap_or_else(|payload| Err(ConvertError::pass(name, panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => {
            *graph = candidate;
            *report = candidate_report;
            report.passes_applied.push(name.to_string());
            tracing::debug!(pass = name, "Pipeline pass applied");
        }
        Err(e) => report.skip(name, &e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    match payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
    {
        Some(message) => format!("panicked: {}", message),
        None => "panicked".to_string(),
    }
}

/// Run every graph-level pass in order.
pub fn run(graph: &mut SceneGraph, config: &PipelineConfig) -> PipelineReport {
    let mut report = PipelineReport::default();

    run_pass("strip_topology", graph, &mut report, |g, r| {
        r.primitives_dropped += cleanup::strip_invalid_primitives(g)?;
        Ok(())
    });
    run_pass("strip_animation", graph, &mut report, |g, _| {
        cleanup::strip_animation_data(g)
    });
    if !config.colors.is_empty() {
        run_pass("inject_colors", graph, &mut report, |g, r| {
            r.colors_injected += materials::inject_colors(g, &config.colors);
            Ok(())
        });
    }
    run_pass("normalize_materials", graph, &mut report, |g, r| {
        r.materials_normalized += materials::normalize_materials(g);
        Ok(())
    });
    if config.dedup {
        run_pass("dedup", graph, &mut report, |g, r| {
            r.accessors_deduplicated += optimize::dedup_accessors(g)?;
            r.materials_deduplicated += optimize::dedup_materials(g)?;
            Ok(())
        });
    }
    if config.flatten {
        run_pass("flatten", graph, &mut report, |g, _| optimize::flatten(g));
    }
    if config.weld {
        let tolerance = config.weld_tolerance;
        run_pass("weld", graph, &mut report, |g, r| {
            r.vertices_welded += optimize::weld(g, tolerance)?;
            Ok(())
        });
    }
    if config.normals {
        run_pass("normals", graph, &mut report, |g, r| {
            r.normals_generated += optimize::generate_normals(g)?;
            Ok(())
        });
    }
    if config.prune {
        run_pass("prune", graph, &mut report, |g, r| {
            r.objects_pruned += optimize::prune(g)?;
            Ok(())
        });
    }
    run_pass("synthesize_uvs", graph, &mut report, |g, r| {
        r.uvs_synthesized += compat::synthesize_uvs(g)?;
        Ok(())
    });
    run_pass("clear_extras", graph, &mut report, |g, r| {
        r.extras_cleared += g.clear_extras();
        Ok(())
    });
    run_pass("clamp_materials", graph, &mut report, |g, r| {
        r.materials_clamped += compat::clamp_materials(g);
        Ok(())
    });
    run_pass("default_material", graph, &mut report, |g, r| {
        r.default_materials_assigned += compat::assign_default_material(g);
        Ok(())
    });
    run_pass("strip_extensions", graph, &mut report, |g, r| {
        r.extensions_removed += cleanup::strip_extensions(g);
        Ok(())
    });

    report
}

/// Transform a graph and produce bounds-patched container bytes.
pub fn optimize(graph: &SceneGraph, config: &PipelineConfig) -> Result<OptimizedScene> {
    let mut graph = graph.clone();
    let mut report = run(&mut graph, config);

    let written = encode_to_bytes(&graph)?;
    let glb = match bounds::patch_bounds(&written) {
        Ok((patched, count)) => {
            report.accessors_patched = count;
            report.passes_applied.push("bounds".to_string());
            patched
        }
        Err(e) => {
            report.skip("bounds", &e);
            written
        }
    };

    tracing::info!(
        applied = report.passes_applied.len(),
        skipped = report.passes_skipped.len(),
        primitives_dropped = report.primitives_dropped,
        accessors_patched = report.accessors_patched,
        bytes = glb.len(),
        "Pipeline finished"
    );

    Ok(OptimizedScene { graph, glb, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::scene::decode::{decode, tests::triangle_container};
    use crate::scene::{Semantic, DEFAULT_BASE_COLOR};

    #[test]
    fn test_out_of_range_color_and_missing_uvs() {
        let graph = decode(&triangle_container([2.0, -1.0, 0.5, 1.0])).unwrap();
        let result = optimize(&graph, &PipelineConfig::default()).unwrap();

        let out = decode(&Container::read(&result.glb).unwrap()).unwrap();
        let prim = &out.meshes[0].primitives[0];
        let uv = out.accessor(prim.attributes[&Semantic::TexCoord(0)]).unwrap();
        assert_eq!(uv.count, 3);
        assert!(uv.to_vec2().iter().all(|v| *v == [0.0, 0.0]));

        let material = &out.materials[prim.material.unwrap()];
        assert_eq!(material.base_color, DEFAULT_BASE_COLOR);
        assert_eq!(result.report.materials_clamped, 1);
        assert_eq!(result.report.uvs_synthesized, 1);
        assert!(result.report.passes_skipped.is_empty());
    }

    #[test]
    fn test_every_accessor_has_bounds() {
        let graph = decode(&triangle_container([0.5; 4])).unwrap();
        let result = optimize(&graph, &PipelineConfig::default()).unwrap();
        let container = Container::read(&result.glb).unwrap();
        for accessor in container.json["accessors"].as_array().unwrap() {
            assert!(accessor.get("min").is_some(), "{}", accessor);
            assert!(accessor.get("max").is_some(), "{}", accessor);
        }
        assert!(result.report.accessors_patched > 0);
        assert!(container.json.get("extensionsUsed").is_none());
    }

    #[test]
    fn test_failing_pass_keeps_graph() {
        let mut graph = decode(&triangle_container([0.5; 4])).unwrap();
        let before = graph.nodes.len();
        let mut report = PipelineReport::default();
        run_pass("broken", &mut graph, &mut report, |g, _| {
            g.nodes.clear();
            Err(ConvertError::pass("broken", "always fails"))
        });
        assert_eq!(graph.nodes.len(), before);
        assert_eq!(report.passes_skipped[0].pass, "broken");
        assert!(report.passes_applied.is_empty());
    }

    #[test]
    fn test_panicking_pass_keeps_graph() {
        let mut graph = decode(&triangle_container([0.5; 4])).unwrap();
        let before = graph.accessors.len();
        let mut report = PipelineReport::default();
        run_pass("indexing", &mut graph, &mut report, |g, _| {
            g.accessors.clear();
            panic!("accessor 3 does not exist");
        });
        assert_eq!(graph.accessors.len(), before);
        assert_eq!(report.passes_skipped.len(), 1);
        assert!(report.passes_skipped[0].reason.contains("panicked"));
        assert!(report.passes_applied.is_empty());
    }

    #[test]
    fn test_color_injection_is_case_insensitive() {
        let graph = decode(&triangle_container([0.5; 4])).unwrap();
        let config = PipelineConfig::default()
            .with_colors(HashMap::from([("STEEL".to_string(), [0.1, 0.2, 0.3, 1.0])]));
        let result = optimize(&graph, &config).unwrap();
        assert_eq!(result.report.colors_injected, 1);
        assert_eq!(result.graph.materials[0].base_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_parse_colors() {
        let colors = parse_colors(r#"{"Concrete": [0.6, 0.6, 0.6], "Glass": [0.2, 0.3, 0.4, 0.5]}"#)
            .unwrap();
        assert_eq!(colors["Concrete"], [0.6, 0.6, 0.6, 1.0]);
        assert_eq!(colors["Glass"][3], 0.5);
        for bad in [r#"{"Bad": [1.0]}"#, "not json"] {
            let err = parse_colors(bad).unwrap_err();
            assert!(matches!(err, ConvertError::InvalidConfiguration(_)), "{}", err);
            assert!(err.is_fatal());
        }
    }
}
