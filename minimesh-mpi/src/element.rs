//! Fixed numeric element set and reduction ops
//!
//! The collective layer moves raw bytes; this module maps them onto the
//! small, closed set of element types the reductions understand. Elements
//! are encoded little-endian on the wire so results do not depend on host
//! byte order.

use bytes::Bytes;

use crate::error::{MpiError, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f64 {}
    impl Sealed for f32 {}
}

/// A numeric element the collective layer can ship and reduce.
///
/// Sealed: only `f64` and `f32` are supported.
pub trait Element: Copy + Default + Send + Sync + sealed::Sealed + 'static {
    /// Encoded size of one element in bytes.
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn add_assign(&mut self, other: Self);
}

impl Element for f64 {
    const SIZE: usize = 8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Self::from_le_bytes(buf)
    }

    fn add_assign(&mut self, other: Self) {
        *self += other;
    }
}

impl Element for f32 {
    const SIZE: usize = 4;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        Self::from_le_bytes(buf)
    }

    fn add_assign(&mut self, other: Self) {
        *self += other;
    }
}

/// Reduction operators. Only an associative left-fold over `Sum` is
/// provided; the fold order is fixed by the caller, not by this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Sum,
}

impl Op {
    /// Fold `data` into `acc`, element-wise.
    pub fn combine<T: Element>(self, acc: &mut [T], data: &[T]) {
        match self {
            Self::Sum => {
                for (a, d) in acc.iter_mut().zip(data) {
                    a.add_assign(*d);
                }
            }
        }
    }
}

/// Encode an element slice little-endian.
#[must_use]
pub fn encode_slice<T: Element>(buf: &[T]) -> Bytes {
    let mut out = Vec::with_capacity(buf.len() * T::SIZE);
    for element in buf {
        element.write_le(&mut out);
    }
    Bytes::from(out)
}

/// Decode `bytes` into a prefix of `out`, returning the element count.
///
/// Errors if the payload is not a whole number of elements or holds more
/// elements than `out` can take. A short payload is legal.
pub fn decode_slice<T: Element>(bytes: &[u8], out: &mut [T]) -> Result<usize> {
    if bytes.len() % T::SIZE != 0 {
        return Err(MpiError::SizeMismatch {
            expected: (bytes.len() / T::SIZE + 1) * T::SIZE,
            actual: bytes.len(),
        });
    }
    let elements = bytes.len() / T::SIZE;
    if elements > out.len() {
        return Err(MpiError::SizeMismatch {
            expected: out.len() * T::SIZE,
            actual: bytes.len(),
        });
    }
    for (i, slot) in out.iter_mut().take(elements).enumerate() {
        *slot = T::read_le(&bytes[i * T::SIZE..(i + 1) * T::SIZE]);
    }
    Ok(elements)
}

/// Decode `bytes` into all of `out`, rejecting any size difference.
pub fn decode_exact<T: Element>(bytes: &[u8], out: &mut [T]) -> Result<()> {
    if bytes.len() != out.len() * T::SIZE {
        return Err(MpiError::SizeMismatch {
            expected: out.len() * T::SIZE,
            actual: bytes.len(),
        });
    }
    decode_slice(bytes, out).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let input = [1.5f64, -2.25, 0.0, f64::MAX];
        let bytes = encode_slice(&input);
        assert_eq!(bytes.len(), 32);
        let mut output = [0.0f64; 4];
        decode_exact(&bytes, &mut output).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn short_payload_is_legal_for_decode_slice() {
        let bytes = encode_slice(&[7.0f32]);
        let mut output = [0.0f32; 3];
        assert_eq!(decode_slice(&bytes, &mut output).unwrap(), 1);
        assert_eq!(output[0], 7.0);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let bytes = encode_slice(&[1.0f64, 2.0]);
        let mut output = [0.0f64; 1];
        assert!(matches!(
            decode_slice(&bytes, &mut output),
            Err(MpiError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn ragged_payload_is_rejected() {
        let mut output = [0.0f64; 2];
        assert!(decode_slice(&[0u8; 12], &mut output).is_err());
    }

    #[test]
    fn sum_combines_element_wise() {
        let mut acc = [1.0f64, 2.0, 3.0];
        Op::Sum.combine(&mut acc, &[0.5, 0.5, 0.5]);
        assert_eq!(acc, [1.5, 2.5, 3.5]);
    }
}
