//! AR package synthesis: a USDA layer wrapped in an aligned stored archive.

pub mod archive;
pub mod usda;

pub use archive::{crc32, write_stored_zip};
pub use usda::{sanitize_name, write_usda, NameRegistry};

use crate::error::{ConvertError, Result};
use crate::scene::SceneGraph;

/// Entry name of the scene layer inside the package.
pub const DEFAULT_ENTRY_NAME: &str = "model.usda";

/// Extensions that name an ASCII layer; `.usdc` would claim the binary format.
const LAYER_EXTENSIONS: [&str; 2] = [".usda", ".usd"];

/// Build a package holding the scene description of `graph` as `entry_name`.
pub fn synthesize(graph: &SceneGraph, entry_name: &str) -> Result<Vec<u8>> {
    let lower = entry_name.to_ascii_lowercase();
    if !LAYER_EXTENSIONS.iter().any(|ext| lower.ends_with(ext) && lower.len() > ext.len()) {
        return Err(ConvertError::ArchiveSynthesisFailure(format!(
            "entry name {:?} is not a USD layer",
            entry_name
        )));
    }
    let usda = write_usda(graph)?;
    let package = write_stored_zip(entry_name, usda.as_bytes()).map_err(|e| match e {
        ConvertError::ArchiveSynthesisFailure(_) => e,
        other => ConvertError::ArchiveSynthesisFailure(other.to_string()),
    })?;
    tracing::info!(
        entry = entry_name,
        usda_bytes = usda.len(),
        package_bytes = package.len(),
        "Synthesized AR package"
    );
    Ok(package)
}
