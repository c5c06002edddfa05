//! Little-endian `f32` encoding for weight and gradient blobs
//!
//! The coordination core treats blobs as opaque bytes. The bundled gradient
//! applier and reference compute backend agree on this flat layout.

use crate::error::ApplyError;

const WIDTH: usize = std::mem::size_of::<f32>();

/// Encode parameters as a little-endian blob
#[must_use]
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * WIDTH);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian blob into parameters
pub fn decode_f32(bytes: &[u8]) -> Result<Vec<f32>, ApplyError> {
    if bytes.len() % WIDTH != 0 {
        return Err(ApplyError::Misaligned {
            len: bytes.len(),
            width: WIDTH,
        });
    }
    Ok(bytes
        .chunks_exact(WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Number of `f32` parameters a blob holds
#[must_use]
pub fn param_count(bytes: &[u8]) -> usize {
    bytes.len() / WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_little_endian() {
        assert_eq!(encode_f32(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(decode_f32(&[0x00, 0x00, 0x80, 0x3f]).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_misaligned_blob() {
        assert_eq!(
            decode_f32(&[0, 1, 2]),
            Err(ApplyError::Misaligned { len: 3, width: 4 })
        );
    }

    #[test]
    fn test_param_count() {
        assert_eq!(param_count(&encode_f32(&[0.5, -2.0, 3.25])), 3);
    }
}
