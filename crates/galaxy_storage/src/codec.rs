use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bevy::prelude::*;
use bincode::Options;
use galaxy_core::*;
use serde::{Deserialize, Serialize};

/// `.glxy` header: magic, version, body count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub count: u32,
}

/// One body on disk: position, velocity, mass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BodyRecord {
    position: [f32; 3],
    velocity: [f32; 3],
    mass: f32,
}

pub const HEADER_BYTES: usize = 12;
pub const RECORD_BYTES: usize = 28;

/// Fixed-width little-endian encoding, so records have a known size
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn write_error(path: &Path, source: io::Error) -> IoError {
    IoError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn encode<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>, IoError> {
    options()
        .serialize(value)
        .map_err(|e| write_error(path, io::Error::other(e.to_string())))
}

/// Write `bodies` to `path`, creating parent directories
pub fn save(bodies: &[Body], path: &Path) -> Result<(), IoError> {
    let count = u32::try_from(bodies.len()).map_err(|_| {
        write_error(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "too many bodies for one file"),
        )
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IoError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);

    let header = FileHeader {
        magic: GLXY_MAGIC,
        version: GLXY_VERSION,
        count,
    };
    writer
        .write_all(&encode(&header, path)?)
        .map_err(|e| write_error(path, e))?;

    for body in bodies {
        let record = BodyRecord {
            position: body.position,
            velocity: body.velocity,
            mass: body.mass,
        };
        writer
            .write_all(&encode(&record, path)?)
            .map_err(|e| write_error(path, e))?;
    }
    writer.flush().map_err(|e| write_error(path, e))?;

    info!("Saved {} bodies to {}", bodies.len(), path.display());
    Ok(())
}

/// Read a whole `.glxy` file. Nothing is returned unless every check passes.
pub fn load(path: &Path, required_minimum: usize) -> Result<Vec<Body>, IoError> {
    let data = fs::read(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let bodies = decode(&data, required_minimum)?;
    info!("Loaded {} bodies from {}", bodies.len(), path.display());
    Ok(bodies)
}

/// Decode an in-memory `.glxy` image
pub fn decode(data: &[u8], required_minimum: usize) -> Result<Vec<Body>, IoError> {
    if data.len() < 4 {
        return Err(IoError::ReadFailure {
            reason: format!("file is {} bytes, too short for a header", data.len()),
        });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&data[..4]);
    if magic != GLXY_MAGIC {
        return Err(IoError::BadMagic { found: magic });
    }
    if data.len() < HEADER_BYTES {
        return Err(IoError::ReadFailure {
            reason: format!("file is {} bytes, too short for a header", data.len()),
        });
    }

    let header: FileHeader = options()
        .deserialize(&data[..HEADER_BYTES])
        .map_err(|e| IoError::ReadFailure {
            reason: e.to_string(),
        })?;
    if header.version != GLXY_VERSION {
        return Err(IoError::BadVersion {
            found: header.version,
        });
    }

    let count = header.count as usize;
    if count < required_minimum {
        return Err(IoError::InsufficientBodies {
            required: required_minimum,
            found: count,
        });
    }

    let payload = &data[HEADER_BYTES..];
    let expected = count as u64 * RECORD_BYTES as u64;
    if payload.len() as u64 != expected {
        return Err(IoError::ReadFailure {
            reason: format!(
                "expected {expected} bytes of body data, found {}",
                payload.len()
            ),
        });
    }

    let mut bodies = Vec::new();
    bodies
        .try_reserve_exact(count)
        .map_err(|e| IoError::ReadFailure {
            reason: e.to_string(),
        })?;
    for (i, chunk) in payload.chunks_exact(RECORD_BYTES).enumerate() {
        let record: BodyRecord = options()
            .deserialize(chunk)
            .map_err(|e| IoError::ReadFailure {
                reason: format!("body {i}: {e}"),
            })?;
        if !(record.mass.is_finite() && record.mass > 0.0) {
            return Err(IoError::ReadFailure {
                reason: format!("body {i} has mass {}", record.mass),
            });
        }
        bodies.push(Body::new(
            i as u32,
            record.position,
            record.velocity,
            record.mass,
        ));
    }
    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_sizes_are_fixed() {
        let header = FileHeader {
            magic: GLXY_MAGIC,
            version: GLXY_VERSION,
            count: 3,
        };
        let bytes = encode(&header, Path::new("x")).unwrap();
        assert_eq!(bytes.len(), HEADER_BYTES);
        assert_eq!(&bytes[..4], b"GLXY");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..], &3u32.to_le_bytes());

        let record = BodyRecord {
            position: [1.0, 2.0, 3.0],
            velocity: [0.0; 3],
            mass: 1.5,
        };
        let bytes = encode(&record, Path::new("x")).unwrap();
        assert_eq!(bytes.len(), RECORD_BYTES);
        assert_eq!(&bytes[24..], &1.5f32.to_le_bytes());
    }

    #[test]
    fn short_input_is_a_read_failure() {
        assert!(matches!(decode(b"GL", 0), Err(IoError::ReadFailure { .. })));
        assert!(matches!(decode(b"GLXY\x01\x00", 0), Err(IoError::ReadFailure { .. })));
    }
}
