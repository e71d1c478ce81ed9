//! Spb: a tagged, self-describing binary format.
//!
//! Every field is `header [value]` where the header byte holds the type code
//! in the high nibble and the field tag in the low nibble (tags of 15 and
//! above are escaped with `0xF` and follow as a varint):
//!
//! | type        | code | value                                    |
//! |-------------|------|------------------------------------------|
//! | IntPositive | 0    | varint                                   |
//! | IntNegative | 1    | varint of the magnitude                  |
//! | Float       | 2    | varint of the `f32` bits                 |
//! | Double      | 3    | varint of the `f64` bits                 |
//! | String      | 4    | varint length + bytes                    |
//! | Vector      | 5    | varint count + headered elements (tag 0) |
//! | Map         | 6    | varint count + headered key/value pairs  |
//! | StructBegin | 7    | fields until StructEnd                   |
//! | StructEnd   | 8    | none                                     |
//!
//! Unknown tags are skipped structurally, so records can gain fields without
//! breaking older readers. Records are declared with
//! [`spb_record!`](crate::spb_record).

mod args;
mod record;
mod value;
mod wire;

pub use args::SpbArgs;
pub use value::SpbValue;
pub use wire::{SpbError, SpbReader, SpbWriter, WireType, MAX_DEPTH, TAG_ESCAPE};

/// Spb codec entry points.
pub struct SpbCodec;

impl SpbCodec {
    /// Encode a value as a top-level field with tag 0.
    #[inline]
    pub fn encode<T: SpbValue>(value: &T) -> Vec<u8> {
        let mut w = SpbWriter::new();
        value.pack(&mut w, 0, true);
        w.into_vec()
    }

    /// Decode a top-level value. Trailing bytes are ignored.
    pub fn decode<T: SpbValue + Default>(bytes: &[u8]) -> Result<T, SpbError> {
        let mut r = SpbReader::new(bytes);
        let (_, ty) = r.read_header()?;
        let mut value = T::default();
        value.unpack(&mut r, ty)?;
        Ok(value)
    }
}
