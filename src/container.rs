//! Binary glTF (GLB) container codec.
//!
//! A container is a 12-byte header followed by a JSON chunk holding the
//! structural document and an optional binary payload chunk. The payload is
//! carried through untouched; only the JSON chunk is re-serialized on write.

use crate::error::{ConvertError, Result};
use serde_json::Value;

/// "glTF" in little-endian.
pub const GLB_MAGIC: u32 = 0x46546C67;
/// Container version written by [`Container::to_bytes`] for new documents.
pub const GLB_VERSION: u32 = 2;
/// Chunk type of the structural JSON chunk.
pub const CHUNK_JSON: u32 = 0x4E4F534A;
/// Chunk type of the binary payload chunk ("BIN\0").
pub const CHUNK_BIN: u32 = 0x004E4942;

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// The binary payload chunk, kept byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct BinChunk {
    /// Chunk type as declared in the source container.
    pub chunk_type: u32,
    /// Chunk payload including any trailing alignment bytes.
    pub data: Vec<u8>,
}

/// A decoded container: structural JSON plus the opaque payload chunk.
#[derive(Debug, Clone)]
pub struct Container {
    /// Container version from the header.
    pub version: u32,
    /// The structural document.
    pub json: Value,
    /// The binary payload chunk, if present.
    pub bin: Option<BinChunk>,
}

/// Object counts of a container's structural document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub nodes: usize,
    pub meshes: usize,
    pub primitives: usize,
    pub accessors: usize,
    pub materials: usize,
    pub animations: usize,
    pub payload_bytes: usize,
}

impl Container {
    /// Create a container from a structural document and optional payload.
    pub fn new(json: Value, bin: Option<Vec<u8>>) -> Self {
        Self {
            version: GLB_VERSION,
            json,
            bin: bin.map(|mut data| {
                let padding = padding_for(data.len());
                data.extend(std::iter::repeat(0u8).take(padding));
                BinChunk {
                    chunk_type: CHUNK_BIN,
                    data,
                }
            }),
        }
    }

    /// Parse a container from raw bytes.
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(ConvertError::MalformedContainer(format!(
                "{} bytes is shorter than the {}-byte header",
                data.len(),
                HEADER_LEN
            )));
        }

        let magic = read_u32_le(data, 0);
        if magic != GLB_MAGIC {
            return Err(ConvertError::MalformedContainer(format!(
                "invalid magic 0x{:08X}",
                magic
            )));
        }
        let version = read_u32_le(data, 4);
        let declared_len = read_u32_le(data, 8) as usize;
        if declared_len > data.len() {
            return Err(ConvertError::MalformedContainer(format!(
                "header declares {} bytes but only {} are present",
                declared_len,
                data.len()
            )));
        }
        let data = &data[..declared_len];

        let (json_type, json_bytes, next) = read_chunk(data, HEADER_LEN)?
            .ok_or_else(|| ConvertError::MalformedContainer("missing JSON chunk".to_string()))?;
        if json_type != CHUNK_JSON {
            return Err(ConvertError::MalformedContainer(format!(
                "first chunk has type 0x{:08X}, expected JSON",
                json_type
            )));
        }

        let json = parse_json_chunk(json_bytes)?;

        let bin = read_chunk(data, next)?.map(|(chunk_type, bytes, _)| BinChunk {
            chunk_type,
            data: bytes.to_vec(),
        });

        Ok(Self { version, json, bin })
    }

    /// Serialize the container.
    ///
    /// The JSON chunk is written compact and padded with spaces; the payload
    /// chunk header and bytes are emitted as read.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json_bytes = serde_json::to_vec(&self.json)?;
        let json_padding = padding_for(json_bytes.len());
        let padded_json_len = json_bytes.len() + json_padding;

        let bin_len = self
            .bin
            .as_ref()
            .map(|bin| CHUNK_HEADER_LEN + bin.data.len())
            .unwrap_or(0);
        let total_size = HEADER_LEN + CHUNK_HEADER_LEN + padded_json_len + bin_len;

        let mut glb = Vec::with_capacity(total_size);

        // Header
        glb.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        glb.extend_from_slice(&self.version.to_le_bytes());
        glb.extend_from_slice(&(total_size as u32).to_le_bytes());

        // JSON chunk
        glb.extend_from_slice(&(padded_json_len as u32).to_le_bytes());
        glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        glb.extend_from_slice(&json_bytes);
        glb.extend(std::iter::repeat(0x20u8).take(json_padding));

        // Payload chunk
        if let Some(bin) = &self.bin {
            glb.extend_from_slice(&(bin.data.len() as u32).to_le_bytes());
            glb.extend_from_slice(&bin.chunk_type.to_le_bytes());
            glb.extend_from_slice(&bin.data);
        }

        Ok(glb)
    }

    /// The payload bytes, or an empty slice when the container has none.
    pub fn payload(&self) -> &[u8] {
        self.bin.as_ref().map(|bin| bin.data.as_slice()).unwrap_or(&[])
    }

    /// Count the top-level objects of the structural document.
    pub fn summary(&self) -> ContainerSummary {
        let count = |key: &str| {
            self.json
                .get(key)
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0)
        };
        let primitives = self
            .json
            .get("meshes")
            .and_then(Value::as_array)
            .map(|meshes| {
                meshes
                    .iter()
                    .filter_map(|mesh| mesh.get("primitives").and_then(Value::as_array))
                    .map(Vec::len)
                    .sum()
            })
            .unwrap_or(0);

        ContainerSummary {
            nodes: count("nodes"),
            meshes: count("meshes"),
            primitives,
            accessors: count("accessors"),
            materials: count("materials"),
            animations: count("animations"),
            payload_bytes: self.payload().len(),
        }
    }
}

/// Read the chunk starting at `offset`, returning its type, payload and the
/// offset just past it. `None` when no chunk starts there.
fn read_chunk(data: &[u8], offset: usize) -> Result<Option<(u32, &[u8], usize)>> {
    if offset >= data.len() {
        return Ok(None);
    }
    if offset + CHUNK_HEADER_LEN > data.len() {
        return Err(ConvertError::MalformedContainer(format!(
            "truncated chunk header at offset {}",
            offset
        )));
    }

    let chunk_len = read_u32_le(data, offset) as usize;
    let chunk_type = read_u32_le(data, offset + 4);
    let start = offset + CHUNK_HEADER_LEN;
    let end = start
        .checked_add(chunk_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            ConvertError::MalformedContainer(format!(
                "chunk at offset {} declares {} bytes, past the end of the buffer",
                offset, chunk_len
            ))
        })?;

    Ok(Some((chunk_type, &data[start..end], end)))
}

/// Strip alignment padding (nulls or spaces) and parse the structural text.
fn parse_json_chunk(bytes: &[u8]) -> Result<Value> {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map(|i| i + 1)
        .unwrap_or(0);
    serde_json::from_slice(&bytes[..end]).map_err(|e| {
        ConvertError::MalformedContainer(format!("structural chunk is not valid JSON: {}", e))
    })
}

pub(crate) fn padding_for(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
