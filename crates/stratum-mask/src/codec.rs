//! Wire format for masks crossing a process boundary.
//!
//! `i32 x_size, i32 y_size, i32 z_size` (big-endian), then a `u32` byte count and
//! that many payload bytes. Payload bit `i` is bit `i % 8` of byte `i / 8`; trailing
//! zero bytes may be omitted.

use crate::mask::{MAX_DIM, VoxelMask};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskDecodeError {
    #[error("buffer truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid mask size [{x}, {y}, {z}] (each must be 1..=256)")]
    InvalidDimensions { x: i32, y: i32, z: i32 },
    #[error("payload of {actual} bytes exceeds the {expected} bytes a mask of this size needs")]
    PayloadLength { expected: usize, actual: usize },
    #[error("{0} unexpected bytes after the mask")]
    TrailingBytes(usize),
}

fn read_i32(bytes: &[u8], at: usize) -> Result<i32, MaskDecodeError> {
    let end = at + 4;
    let chunk = bytes.get(at..end).ok_or(MaskDecodeError::Truncated {
        needed: end,
        available: bytes.len(),
    })?;
    Ok(i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

pub(crate) fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

impl VoxelMask {
    pub fn encode(&self) -> Vec<u8> {
        let (x, y, z) = self.size();
        let mut payload = vec![0u8; self.volume().div_ceil(8)];
        for i in self.raw_bits().iter_ones() {
            payload[i / 8] |= 1 << (i % 8);
        }
        while payload.last() == Some(&0) {
            payload.pop();
        }
        let mut out = Vec::with_capacity(16 + payload.len());
        put_i32(&mut out, x as i32);
        put_i32(&mut out, y as i32);
        put_i32(&mut out, z as i32);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decode a whole buffer.
    pub fn decode(bytes: &[u8]) -> Result<VoxelMask, MaskDecodeError> {
        let (mask, used) = Self::decode_prefix(bytes)?;
        if used != bytes.len() {
            return Err(MaskDecodeError::TrailingBytes(bytes.len() - used));
        }
        Ok(mask)
    }

    /// Decode a mask at the start of `bytes`, returning it with the bytes consumed.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(VoxelMask, usize), MaskDecodeError> {
        let x = read_i32(bytes, 0)?;
        let y = read_i32(bytes, 4)?;
        let z = read_i32(bytes, 8)?;
        let valid = |v: i32| v >= 1 && v as usize <= MAX_DIM;
        if !(valid(x) && valid(y) && valid(z)) {
            return Err(MaskDecodeError::InvalidDimensions { x, y, z });
        }
        let len = read_i32(bytes, 12)? as u32 as usize;
        let mut mask = VoxelMask::new(x as usize, y as usize, z as usize);
        let expected = mask.volume().div_ceil(8);
        if len > expected {
            return Err(MaskDecodeError::PayloadLength {
                expected,
                actual: len,
            });
        }
        let payload = bytes.get(16..16 + len).ok_or(MaskDecodeError::Truncated {
            needed: 16 + len,
            available: bytes.len(),
        })?;
        let volume = mask.volume();
        let bits = mask.raw_bits_mut();
        for (byte_idx, byte) in payload.iter().enumerate() {
            for bit in 0..8 {
                let i = byte_idx * 8 + bit;
                if byte & (1 << bit) != 0 && i < volume {
                    bits.set(i, true);
                }
            }
        }
        Ok((mask, 16 + len))
    }

    /// Replace this mask with the decoded one. On failure the mask is left untouched.
    pub fn read_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MaskDecodeError> {
        *self = Self::decode(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian_sizes() {
        let mut m = VoxelMask::new(17, 3, 200);
        m.set(0, 0, 0);
        let bytes = m.encode();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 17]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 200]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 1]);
        assert_eq!(bytes[16], 1);
    }

    #[test]
    fn zero_size_is_rejected_and_target_untouched() {
        let mut target = VoxelMask::new(2, 2, 2);
        target.set(1, 1, 1);
        let before = target.clone();
        let mut bytes = VoxelMask::new(4, 4, 4).encode();
        bytes[0..4].copy_from_slice(&0i32.to_be_bytes());
        let err = target.read_from_bytes(&bytes).unwrap_err();
        assert_eq!(err, MaskDecodeError::InvalidDimensions { x: 0, y: 4, z: 4 });
        assert_eq!(target, before);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut bytes = VoxelMask::new(1, 1, 1).encode();
        bytes[12..16].copy_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 1]);
        assert!(matches!(
            VoxelMask::decode(&bytes),
            Err(MaskDecodeError::PayloadLength { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let bytes = VoxelMask::new(2, 2, 2).encode();
        assert!(matches!(
            VoxelMask::decode(&bytes[..10]),
            Err(MaskDecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn empty_mask_has_empty_payload() {
        let bytes = VoxelMask::new(8, 8, 8).encode();
        assert_eq!(bytes.len(), 16);
        assert!(VoxelMask::decode(&bytes).unwrap().is_empty());
    }
}
