//! Accessor bounds patch on written container bytes.
//!
//! Runs after encoding: the structural chunk is parsed again, every accessor
//! without `min`/`max` is scanned straight from the binary payload using its
//! declared component type, offset and stride, and the container is
//! reassembled with the payload chunk copied unchanged.

use crate::container::Container;
use crate::error::{ConvertError, Result};
use crate::scene::encode::bounds_value;
use crate::scene::{ComponentType, ElementType};
use serde_json::Value;

/// Per-component bounds of one accessor.
type Bounds = (Vec<f64>, Vec<f64>, ComponentType);

/// Patch missing accessor bounds in a serialized container.
/// Returns the new bytes and how many accessors were patched.
pub fn patch_bounds(glb: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut container = Container::read(glb)?;
    let patched = patch_container(&mut container)?;
    Ok((container.to_bytes()?, patched))
}

/// Insert `min`/`max` into every accessor of `container` that lacks them.
///
/// Accessors that cannot be scanned (external buffers, sparse storage, data
/// out of range) are left as they are with a warning.
pub fn patch_container(container: &mut Container) -> Result<usize> {
    let views: Vec<Value> = container
        .json
        .get("bufferViews")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let payload = container
        .bin
        .as_ref()
        .map(|bin| bin.data.as_slice())
        .unwrap_or(&[]);
    let Some(accessors) = container
        .json
        .get_mut("accessors")
        .and_then(Value::as_array_mut)
    else {
        return Ok(0);
    };

    let mut patched = 0;
    for (index, accessor) in accessors.iter_mut().enumerate() {
        if accessor.get("min").is_some() && accessor.get("max").is_some() {
            continue;
        }
        match scan_bounds(accessor, &views, payload) {
            Ok(Some((min, max, component_type))) => {
                if let Some(object) = accessor.as_object_mut() {
                    object.insert("min".to_string(), bounds_value(&min, component_type));
                    object.insert("max".to_string(), bounds_value(&max, component_type));
                    patched += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(accessor = index, error = %e, "Could not compute accessor bounds");
            }
        }
    }

    if patched > 0 {
        tracing::debug!(patched, "Patched accessor bounds");
    }
    Ok(patched)
}

fn usize_field(value: &Value, key: &str) -> Option<usize> {
    value.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

/// Compute bounds of one accessor from the payload. `None` for empty accessors.
fn scan_bounds(accessor: &Value, views: &[Value], payload: &[u8]) -> Result<Option<Bounds>> {
    let invalid = |reason: String| ConvertError::pass("bounds", reason);

    let count = usize_field(accessor, "count").ok_or_else(|| invalid("missing count".into()))?;
    let component_type = accessor
        .get("componentType")
        .and_then(Value::as_u64)
        .and_then(|v| ComponentType::from_gl(v as u32))
        .ok_or_else(|| invalid("unknown componentType".into()))?;
    let element_type = accessor
        .get("type")
        .and_then(Value::as_str)
        .and_then(ElementType::parse)
        .ok_or_else(|| invalid("unknown type".into()))?;
    if count == 0 {
        return Ok(None);
    }
    if accessor.get("sparse").is_some() {
        return Err(invalid("sparse accessors are not scanned".into()));
    }

    let components = element_type.components();
    let Some(view_index) = usize_field(accessor, "bufferView") else {
        // No buffer view: every element is zero
        return Ok(Some((vec![0.0; components], vec![0.0; components], component_type)));
    };

    let view = views
        .get(view_index)
        .ok_or_else(|| invalid(format!("buffer view {} does not exist", view_index)))?;
    if usize_field(view, "buffer").unwrap_or(0) != 0 {
        return Err(invalid("only the embedded buffer can be scanned".into()));
    }

    let size = component_type.size();
    let element_size = size * components;
    let view_offset = usize_field(view, "byteOffset").unwrap_or(0);
    let view_length =
        usize_field(view, "byteLength").ok_or_else(|| invalid("view without byteLength".into()))?;
    let stride = usize_field(view, "byteStride")
        .filter(|s| *s > 0)
        .unwrap_or(element_size);
    let overflow = || invalid("accessor span overflows".into());
    let start = view_offset
        .checked_add(usize_field(accessor, "byteOffset").unwrap_or(0))
        .ok_or_else(overflow)?;
    let view_end = view_offset.checked_add(view_length).ok_or_else(overflow)?;
    let end = (count - 1)
        .checked_mul(stride)
        .and_then(|span| span.checked_add(start))
        .and_then(|span| span.checked_add(element_size))
        .ok_or_else(overflow)?;
    if end > view_end || end > payload.len() {
        return Err(invalid(format!(
            "elements end at byte {}, past the view or payload",
            end
        )));
    }

    let mut min = vec![f64::INFINITY; components];
    let mut max = vec![f64::NEG_INFINITY; components];
    for element in 0..count {
        let base = start + element * stride;
        for c in 0..components {
            let offset = base + c * size;
            let value = component_type.decode(&payload[offset..offset + size]);
            min[c] = min[c].min(value);
            max[c] = max[c].max(value);
        }
    }
    Ok(Some((min, max, component_type)))
}
