//! Argument lists for RPC calls.
//!
//! RPC arguments and return values travel as a flat field list: element `i`
//! of the tuple is written with tag `i + 1` and is always present. Decoding
//! matches by tag, so unknown trailing arguments are skipped and missing ones
//! keep their default.

use super::value::SpbValue;
use super::wire::{SpbError, SpbReader, SpbWriter};

/// A tuple of Spb values used as RPC arguments or return values.
pub trait SpbArgs: Sized {
    fn pack_args(&self, w: &mut SpbWriter);

    fn unpack_args(r: &mut SpbReader<'_>) -> Result<Self, SpbError>;

    /// Encode into a fresh buffer.
    fn to_spb_args(&self) -> Vec<u8> {
        let mut w = SpbWriter::new();
        self.pack_args(&mut w);
        w.into_vec()
    }

    /// Decode from a complete buffer.
    fn from_spb_args(data: &[u8]) -> Result<Self, SpbError> {
        Self::unpack_args(&mut SpbReader::new(data))
    }
}

impl SpbArgs for () {
    fn pack_args(&self, _w: &mut SpbWriter) {}

    fn unpack_args(r: &mut SpbReader<'_>) -> Result<Self, SpbError> {
        while !r.is_empty() {
            r.skip_field()?;
        }
        Ok(())
    }
}

macro_rules! impl_args {
    ($( ($($idx:tt $name:ident),+) )+) => {$(
        impl<$($name: SpbValue + Default),+> SpbArgs for ($($name,)+) {
            fn pack_args(&self, w: &mut SpbWriter) {
                $( self.$idx.pack(w, $idx + 1, true); )+
            }

            fn unpack_args(r: &mut SpbReader<'_>) -> Result<Self, SpbError> {
                let mut out: ($($name,)+) = Default::default();
                while !r.is_empty() {
                    let (tag, ty) = r.read_header()?;
                    match tag {
                        $( t if t == $idx + 1 => out.$idx.unpack(r, ty)?, )+
                        _ => r.skip(ty)?,
                    }
                }
                Ok(out)
            }
        }
    )+};
}

impl_args! {
    (0 A)
    (0 A, 1 B)
    (0 A, 1 B, 2 C)
    (0 A, 1 B, 2 C, 3 D)
    (0 A, 1 B, 2 C, 3 D, 4 E)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_argument() {
        let bytes = ("ping".to_string(),).to_spb_args();
        // tag 1, String, len 4
        assert_eq!(&bytes[..2], &[0x41, 0x04]);
        let (s,): (String,) = SpbArgs::from_spb_args(&bytes).unwrap();
        assert_eq!(s, "ping");
    }

    #[test]
    fn test_zero_arguments_are_present() {
        let bytes = (0u32, String::new()).to_spb_args();
        assert_eq!(bytes, vec![0x01, 0x00, 0x42, 0x00]);
    }

    #[test]
    fn test_mixed_arguments() {
        let args = (7i32, "x".to_string(), vec![1u8, 2, 3], true);
        let decoded: (i32, String, Vec<u8>, bool) =
            SpbArgs::from_spb_args(&args.to_spb_args()).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_extra_arguments_are_skipped() {
        let bytes = (1u32, "two".to_string(), 3u64).to_spb_args();
        let (a,): (u32,) = SpbArgs::from_spb_args(&bytes).unwrap();
        assert_eq!(a, 1);
    }

    #[test]
    fn test_missing_arguments_default() {
        let bytes = (9u32,).to_spb_args();
        let (a, b): (u32, String) = SpbArgs::from_spb_args(&bytes).unwrap();
        assert_eq!((a, b.as_str()), (9, ""));
    }

    #[test]
    fn test_malformed_arguments() {
        let result = <(String,)>::from_spb_args(&[0x41, 0x09, b'a']);
        assert!(matches!(result, Err(SpbError::LengthOutOfRange(9))));
    }

    #[test]
    fn test_unit_accepts_anything_well_formed() {
        let bytes = (5u8,).to_spb_args();
        assert!(<()>::from_spb_args(&bytes).is_ok());
        assert!(<()>::from_spb_args(&[0x41]).is_err());
    }
}
