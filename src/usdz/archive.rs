//! Single-entry stored ZIP writer.
//!
//! Package readers memory-map entries, so the payload of every entry must be
//! uncompressed and start on a 64-byte boundary. Alignment is reached by
//! padding the local header's extra field.

use crate::error::{ConvertError, Result};

/// Required alignment of entry data.
pub const DATA_ALIGNMENT: usize = 64;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
const LOCAL_HEADER_LEN: usize = 30;
/// Extra field ID used for padding.
const PADDING_FIELD_ID: u16 = 0x1986;
/// Version 2.0: stored entries with no extensions.
const VERSION: u16 = 20;
/// 1980-01-01 in MS-DOS date format.
const DOS_DATE: u16 = 0x21;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// CRC-32 (IEEE, reflected) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0u32, |crc, byte| {
        CRC_TABLE[((crc ^ *byte as u32) & 0xFF) as usize] ^ (crc >> 8)
    })
}

/// Extra field bytes placing the data of an entry named `name_len` bytes on
/// the alignment boundary. A padding field needs at least its 4-byte header.
fn padding_field(name_len: usize) -> Vec<u8> {
    let mut pad = (DATA_ALIGNMENT - (LOCAL_HEADER_LEN + name_len) % DATA_ALIGNMENT) % DATA_ALIGNMENT;
    if pad == 0 {
        return Vec::new();
    }
    if pad < 4 {
        pad += DATA_ALIGNMENT;
    }
    let mut field = Vec::with_capacity(pad);
    field.extend_from_slice(&PADDING_FIELD_ID.to_le_bytes());
    field.extend_from_slice(&((pad - 4) as u16).to_le_bytes());
    field.resize(pad, 0);
    field
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write an archive holding `data` as one uncompressed entry.
pub fn write_stored_zip(entry_name: &str, data: &[u8]) -> Result<Vec<u8>> {
    if entry_name.is_empty() || !entry_name.is_ascii() || entry_name.starts_with('/') {
        return Err(ConvertError::ArchiveSynthesisFailure(format!(
            "invalid entry name {:?}",
            entry_name
        )));
    }
    let name = entry_name.as_bytes();
    let name_len = u16::try_from(name.len()).map_err(|_| {
        ConvertError::ArchiveSynthesisFailure("entry name too long".to_string())
    })?;
    let size = u32::try_from(data.len()).map_err(|_| {
        ConvertError::ArchiveSynthesisFailure(format!(
            "entry of {} bytes needs 64-bit archive records",
            data.len()
        ))
    })?;
    let crc = crc32(data);
    let extra = padding_field(name.len());

    let mut out = Vec::with_capacity(LOCAL_HEADER_LEN + name.len() + extra.len() + data.len() + 128);

    // Local file header
    put_u32(&mut out, LOCAL_HEADER_SIGNATURE);
    put_u16(&mut out, VERSION);
    put_u16(&mut out, 0); // flags
    put_u16(&mut out, 0); // stored
    put_u16(&mut out, 0); // time
    put_u16(&mut out, DOS_DATE);
    put_u32(&mut out, crc);
    put_u32(&mut out, size);
    put_u32(&mut out, size);
    put_u16(&mut out, name_len);
    put_u16(&mut out, extra.len() as u16);
    out.extend_from_slice(name);
    out.extend_from_slice(&extra);
    debug_assert_eq!(out.len() % DATA_ALIGNMENT, 0);
    out.extend_from_slice(data);

    // Central directory
    let central_offset = out.len();
    put_u32(&mut out, CENTRAL_HEADER_SIGNATURE);
    put_u16(&mut out, VERSION); // made by
    put_u16(&mut out, VERSION); // needed
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, DOS_DATE);
    put_u32(&mut out, crc);
    put_u32(&mut out, size);
    put_u32(&mut out, size);
    put_u16(&mut out, name_len);
    put_u16(&mut out, 0); // extra
    put_u16(&mut out, 0); // comment
    put_u16(&mut out, 0); // disk
    put_u16(&mut out, 0); // internal attributes
    put_u32(&mut out, 0); // external attributes
    put_u32(&mut out, 0); // local header offset
    out.extend_from_slice(name);
    let central_size = out.len() - central_offset;

    let central_offset = u32::try_from(central_offset).map_err(|_| {
        ConvertError::ArchiveSynthesisFailure("archive exceeds 4 GiB".to_string())
    })?;

    // End of central directory
    put_u32(&mut out, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, 1);
    put_u16(&mut out, 1);
    put_u32(&mut out, central_size as u32);
    put_u32(&mut out, central_offset);
    put_u16(&mut out, 0);

    tracing::debug!(entry = entry_name, bytes = out.len(), "Wrote stored archive");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_crc_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_padding_keeps_alignment() {
        for name_len in 0..200 {
            let extra = padding_field(name_len);
            assert_eq!((LOCAL_HEADER_LEN + name_len + extra.len()) % DATA_ALIGNMENT, 0);
            assert!(extra.is_empty() || extra.len() >= 4);
        }
    }

    #[test]
    fn test_archive_readable() {
        let content = b"#usda 1.0\n(\n)\n";
        let bytes = write_stored_zip("model.usda", content).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut file = archive.by_index(0).unwrap();
        assert_eq!(file.name(), "model.usda");
        assert_eq!(file.compression(), zip::CompressionMethod::Stored);
        assert_eq!(file.data_start() % 64, 0);

        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, content);
    }

    #[test]
    fn test_alignment_for_awkward_name_lengths() {
        // 30 + 33 leaves a one-byte gap, which forces a full extra block
        for name in ["a.usda", "abcdefghijklmnopqrstuvwxyz012.usd", "x"] {
            let bytes = write_stored_zip(name, &[7u8; 100]).unwrap();
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
            let file = archive.by_index(0).unwrap();
            assert_eq!(file.data_start() % 64, 0, "{}", name);
        }
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(write_stored_zip("", b"x").is_err());
        assert!(write_stored_zip("/abs.usda", b"x").is_err());
        assert!(write_stored_zip("modèle.usda", b"x").is_err());
    }
}
