//! # BIM AR Pipeline
//!
//! Prepares building-design exports for augmented-reality viewing.
//!
//! ## Overview
//!
//! The library takes a GLB container exported from a design tool, and
//! optionally the matching IFC exchange file, and produces:
//!
//! - an optimized, viewer-compatible GLB,
//! - a USDZ package for AR Quick Look,
//! - per-element annotations enriched with IFC properties and materials.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bim_ar_pipeline::{process_asset, ProcessOptions};
//!
//! let glb = std::fs::read("model.glb")?;
//! let ifc = std::fs::read_to_string("model.ifc").ok();
//!
//! let asset = process_asset(&glb, ifc.as_deref(), &ProcessOptions::default())?;
//! std::fs::write("optimized.glb", &asset.optimized_glb)?;
//! if let Some(usdz) = &asset.archive {
//!     std::fs::write("model.usdz", usdz)?;
//! }
//! ```
//!
//! ## Failure domains
//!
//! A malformed container fails the whole call. IFC problems only reduce the
//! annotations to what the container carries, a failing pipeline pass is
//! skipped, and a failed package build leaves the optimized GLB usable.

pub mod annotations;
pub mod container;
pub mod error;
pub mod ifc;
pub mod pipeline;
pub mod scene;
pub mod usdz;

// Re-export main types for convenience
pub use annotations::{Annotation, AnnotationSet};
pub use container::{Container, ContainerSummary};
pub use error::{ConvertError, Result};
pub use ifc::{EntityTable, IfcEntity, PropertyIndex};
pub use pipeline::{OptimizedScene, PipelineConfig, PipelineReport};
pub use scene::SceneGraph;

/// Options for [`process_asset`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub pipeline: PipelineConfig,
    /// Build the USDZ package.
    pub emit_archive: bool,
    /// Name of the scene layer inside the package.
    pub archive_entry_name: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            emit_archive: true,
            archive_entry_name: usdz::DEFAULT_ENTRY_NAME.to_string(),
        }
    }
}

impl ProcessOptions {
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn without_archive(mut self) -> Self {
        self.emit_archive = false;
        self
    }
}

/// Everything produced for one uploaded asset.
#[derive(Debug, Clone)]
pub struct ProcessedAsset {
    pub optimized_glb: Vec<u8>,
    /// USDZ package, `None` when disabled or when synthesis failed.
    pub archive: Option<Vec<u8>>,
    pub archive_error: Option<String>,
    pub annotations: AnnotationSet,
    pub report: PipelineReport,
}

/// Parse and index IFC text, degrading to `None` on failure.
fn load_index(ifc: Option<&str>) -> Option<PropertyIndex> {
    let text = ifc?;
    match PropertyIndex::from_text(text) {
        Ok(index) => {
            tracing::info!(
                elements = index.element_count(),
                content_size = text.len(),
                "Indexed IFC properties"
            );
            Some(index)
        }
        Err(e) => {
            tracing::warn!(error = %e, "IFC data unusable, annotations use container data only");
            None
        }
    }
}

/// Run the full conversion for one asset.
pub fn process_asset(
    glb: &[u8],
    ifc: Option<&str>,
    options: &ProcessOptions,
) -> Result<ProcessedAsset> {
    let container = Container::read(glb)?;
    let graph = scene::decode::decode(&container)?;

    let index = load_index(ifc);
    let annotations = AnnotationSet::extract(&graph, index.as_ref());

    let optimized = pipeline::optimize(&graph, &options.pipeline)?;

    let (archive, archive_error) = if options.emit_archive {
        match usdz::synthesize(&optimized.graph, &options.archive_entry_name) {
            Ok(bytes) => (Some(bytes), None),
            Err(e) => {
                tracing::warn!(error = %e, "USDZ synthesis failed, continuing with GLB only");
                (None, Some(e.to_string()))
            }
        }
    } else {
        (None, None)
    };

    Ok(ProcessedAsset {
        optimized_glb: optimized.glb,
        archive,
        archive_error,
        annotations,
        report: optimized.report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::decode::tests::triangle_container;

    const IFC: &str = "ISO-10303-21;\nDATA;\n\
        #5=IFCBEAM('2O2Fr$t4X7Zf8NOew3FLOH',$,'Steel Beam:424461',$,$,$,$,'424461');\n\
        #12=IFCPROPERTYSINGLEVALUE('Span','',IFCREAL(4.),$);\n\
        #13=IFCPROPERTYSET('0x',$,'Pset_BeamCommon',$,(#12));\n\
        #14=IFCRELDEFINESBYPROPERTIES('1x',$,$,$,(#5),#13);\n\
        ENDSEC;\nEND-ISO-10303-21;\n";

    fn glb() -> Vec<u8> {
        triangle_container([0.3, 0.3, 0.3, 1.0]).to_bytes().unwrap()
    }

    #[test]
    fn test_process_without_ifc() {
        let asset = process_asset(&glb(), None, &ProcessOptions::default()).unwrap();
        assert!(Container::read(&asset.optimized_glb).is_ok());
        assert!(asset.archive.is_some());
        assert!(asset.archive_error.is_none());
        assert_eq!(asset.annotations.len(), 1);
        assert_eq!(asset.annotations.container_only_count, 1);
        assert_eq!(
            asset.annotations.annotations[0].metadata["revit_element_id"],
            "424461"
        );
    }

    #[test]
    fn test_process_with_ifc_enrichment() {
        let asset = process_asset(&glb(), Some(IFC), &ProcessOptions::default()).unwrap();
        assert_eq!(asset.annotations.enriched_count, 1);
        assert_eq!(asset.annotations.annotations[0].metadata["Span"], "4");
    }

    #[test]
    fn test_unusable_ifc_degrades() {
        let asset = process_asset(&glb(), Some("not ifc at all"), &ProcessOptions::default()).unwrap();
        assert_eq!(asset.annotations.enriched_count, 0);
        assert_eq!(asset.annotations.container_only_count, 1);
    }

    #[test]
    fn test_malformed_container_is_fatal() {
        let err = process_asset(b"glTF", None, &ProcessOptions::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_archive_failure_keeps_glb() {
        let options = ProcessOptions {
            archive_entry_name: String::new(),
            ..Default::default()
        };
        let asset = process_asset(&glb(), None, &options).unwrap();
        assert!(asset.archive.is_none());
        assert!(asset.archive_error.is_some());
        assert!(!asset.optimized_glb.is_empty());
    }

    #[test]
    fn test_archive_disabled() {
        let options = ProcessOptions::default().without_archive();
        let asset = process_asset(&glb(), None, &options).unwrap();
        assert!(asset.archive.is_none());
        assert!(asset.archive_error.is_none());
    }
}
