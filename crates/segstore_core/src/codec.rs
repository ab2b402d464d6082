//! Typed values over the byte stream.
//!
//! [`Encode`] and [`Decode`] are implemented explicitly per type; there is no
//! runtime discovery. Encodings are little-endian and fixed width for
//! scalars. Strings, byte vectors and vectors carry a `u32` length prefix.
//!
//! ```rust
//! use segstore_core::{Decode, Encode};
//!
//! let mut bytes = Vec::new();
//! (-5i32).encode(&mut bytes).unwrap();
//! String::from("hi").encode(&mut bytes).unwrap();
//!
//! let mut input = bytes.as_slice();
//! assert_eq!(i32::decode(&mut input).unwrap(), -5);
//! assert_eq!(String::decode(&mut input).unwrap(), "hi");
//! ```

use crate::error::{CoreError, CoreResult};
use uuid::Uuid;

/// Upper bound on a length prefix, enforced on both encode and decode.
pub const MAX_LENGTH: usize = 256 * 1024 * 1024;

/// Something typed values can be decoded from.
pub trait Source {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails.
    fn pull(&mut self, buf: &mut [u8]) -> CoreResult<usize>;
}

impl Source for &[u8] {
    fn pull(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        let n = buf.len().min(self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }
}

/// A value that can be written to the byte stream.
pub trait Encode {
    /// Appends the encoded value to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if a length exceeds
    /// [`MAX_LENGTH`]. `out` may hold a partial encoding in that case.
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()>;
}

/// A value that can be read back from the byte stream.
pub trait Decode: Sized {
    /// Reads one value from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnexpectedEnd`] if the stream ends early and
    /// [`CoreError::InvalidFormat`] if the bytes are not a valid value.
    fn decode(source: &mut dyn Source) -> CoreResult<Self>;
}

/// Fills `buf` completely or reports how much was available.
pub(crate) fn fill(source: &mut dyn Source, buf: &mut [u8]) -> CoreResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.pull(&mut buf[filled..])?;
        if n == 0 {
            return Err(CoreError::UnexpectedEnd {
                needed: buf.len(),
                available: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

fn read_array<const N: usize>(source: &mut dyn Source) -> CoreResult<[u8; N]> {
    let mut buf = [0u8; N];
    fill(source, &mut buf)?;
    Ok(buf)
}

fn read_len(source: &mut dyn Source) -> CoreResult<usize> {
    let len = u32::from_le_bytes(read_array(source)?) as usize;
    if len > MAX_LENGTH {
        return Err(CoreError::invalid_format(format!(
            "length prefix {len} exceeds limit"
        )));
    }
    Ok(len)
}

fn write_len(len: usize, out: &mut Vec<u8>) -> CoreResult<()> {
    if len > MAX_LENGTH {
        return Err(CoreError::invalid_format(format!(
            "length {len} exceeds limit"
        )));
    }
    // MAX_LENGTH fits in u32
    out.extend_from_slice(&(len as u32).to_le_bytes());
    Ok(())
}

macro_rules! impl_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
                    out.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl Decode for $ty {
                fn decode(source: &mut dyn Source) -> CoreResult<Self> {
                    Ok(<$ty>::from_le_bytes(read_array(source)?))
                }
            }
        )*
    };
}

impl_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Encode for bool {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        out.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    fn decode(source: &mut dyn Source) -> CoreResult<Self> {
        match u8::decode(source)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::invalid_format(format!("invalid bool byte {other}"))),
        }
    }
}

impl Encode for str {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        write_len(self.len(), out)?;
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        self.as_str().encode(out)
    }
}

impl Decode for String {
    fn decode(source: &mut dyn Source) -> CoreResult<Self> {
        let len = read_len(source)?;
        let mut bytes = vec![0u8; len];
        fill(source, &mut bytes)?;
        String::from_utf8(bytes).map_err(|_| CoreError::invalid_format("string is not UTF-8"))
    }
}

impl Encode for [u8] {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        write_len(self.len(), out)?;
        out.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for Uuid {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for Uuid {
    fn decode(source: &mut dyn Source) -> CoreResult<Self> {
        Ok(Uuid::from_bytes(read_array(source)?))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        write_len(self.len(), out)?;
        for item in self {
            item.encode(out)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(source: &mut dyn Source) -> CoreResult<Self> {
        let len = read_len(source)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::decode(source)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode(&mut out).unwrap();
        out
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(encoded(&0x0102_0304u32), vec![4, 3, 2, 1]);
        assert_eq!(encoded(&-1i16), vec![0xff, 0xff]);
        assert_eq!(encoded(&7u8), vec![7]);
    }

    #[test]
    fn string_has_length_prefix() {
        assert_eq!(encoded("ab"), vec![2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn byte_vector_matches_slice_encoding() {
        // Vec<u8> goes through the generic Vec<T> impl and frames the same way.
        assert_eq!(encoded(&vec![9u8, 8]), encoded(&[9u8, 8][..]));
        let bytes = encoded(&vec![9u8, 8]);
        let mut input = bytes.as_slice();
        assert_eq!(Vec::<u8>::decode(&mut input).unwrap(), vec![9, 8]);
    }

    #[test]
    fn mixed_sequence_decodes_in_order() {
        let id = Uuid::new_v4();
        let mut out = Vec::new();
        true.encode(&mut out).unwrap();
        id.encode(&mut out).unwrap();
        vec![String::from("x"), String::from("yz")]
            .encode(&mut out)
            .unwrap();
        i64::MIN.encode(&mut out).unwrap();

        let mut input = out.as_slice();
        assert!(bool::decode(&mut input).unwrap());
        assert_eq!(Uuid::decode(&mut input).unwrap(), id);
        assert_eq!(
            Vec::<String>::decode(&mut input).unwrap(),
            vec!["x".to_string(), "yz".to_string()]
        );
        assert_eq!(i64::decode(&mut input).unwrap(), i64::MIN);
        assert!(input.is_empty());
    }

    #[test]
    fn short_input_reports_unexpected_end() {
        let mut input: &[u8] = &[1, 2, 3];
        let result = u64::decode(&mut input);
        assert!(matches!(
            result,
            Err(CoreError::UnexpectedEnd {
                needed: 8,
                available: 3
            })
        ));
    }

    #[test]
    fn invalid_bool_rejected() {
        let mut input: &[u8] = &[2];
        assert!(matches!(
            bool::decode(&mut input),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut input: &[u8] = &[2, 0, 0, 0, 0xff, 0xfe];
        assert!(String::decode(&mut input).is_err());
    }

    #[test]
    fn oversized_length_rejected() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            String::decode(&mut input),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn oversized_payload_is_refused_on_encode() {
        let payload = vec![0u8; MAX_LENGTH + 1];
        let mut out = Vec::new();
        assert!(matches!(
            payload.as_slice().encode(&mut out),
            Err(CoreError::InvalidFormat { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn payload_at_limit_frames_exactly() {
        let mut out = Vec::new();
        write_len(MAX_LENGTH, &mut out).unwrap();
        let mut input = out.as_slice();
        assert_eq!(read_len(&mut input).unwrap(), MAX_LENGTH);
    }
}
