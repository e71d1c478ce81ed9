//! [`SpbValue`] and its implementations for std and `bytes` types.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use bytes::Bytes;

use super::wire::{SpbError, SpbReader, SpbWriter, WireType};

/// A type that can be written to and read from the Spb wire.
///
/// `pack` writes the header and the value for field `tag`. Non-required zero
/// values (0, false, empty strings, empty collections, `None`) write nothing.
///
/// `unpack` is called after the field header (of type `ty`) was consumed. A
/// value the target cannot hold (wrong type code, out of range integer) is
/// consumed and ignored, leaving `self` unchanged. Only malformed input is an
/// error.
pub trait SpbValue {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool);

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError>;
}

/// A decoded numeric value before conversion to the target type.
enum Scalar {
    Positive(u64),
    Negative(u64),
    Float(u32),
    Double(u64),
}

/// Read a numeric value, or skip a non-numeric one and return `None`.
fn read_scalar(r: &mut SpbReader<'_>, ty: WireType) -> Result<Option<Scalar>, SpbError> {
    let scalar = match ty {
        WireType::IntPositive => Scalar::Positive(r.read_varint()?),
        WireType::IntNegative => Scalar::Negative(r.read_varint()?),
        WireType::Float => match u32::try_from(r.read_varint()?) {
            Ok(bits) => Scalar::Float(bits),
            Err(_) => return Ok(None),
        },
        WireType::Double => Scalar::Double(r.read_varint()?),
        other => {
            r.skip(other)?;
            return Ok(None);
        }
    };
    Ok(Some(scalar))
}

fn pack_scalar(w: &mut SpbWriter, tag: u32, ty: WireType, value: u64, required: bool) {
    if value == 0 && !required {
        return;
    }
    w.write_header(tag, ty);
    w.write_varint(value);
}

macro_rules! impl_unsigned {
    ($($t:ty),*) => {$(
        impl SpbValue for $t {
            fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
                pack_scalar(w, tag, WireType::IntPositive, u64::from(*self), required);
            }

            fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
                if let Some(Scalar::Positive(v)) = read_scalar(r, ty)? {
                    if let Ok(v) = <$t>::try_from(v) {
                        *self = v;
                    }
                }
                Ok(())
            }
        }
    )*};
}

macro_rules! impl_signed {
    ($($t:ty),*) => {$(
        impl SpbValue for $t {
            fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
                let v = i64::from(*self);
                if v < 0 {
                    pack_scalar(w, tag, WireType::IntNegative, v.unsigned_abs(), required);
                } else {
                    pack_scalar(w, tag, WireType::IntPositive, v as u64, required);
                }
            }

            fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
                let wide = match read_scalar(r, ty)? {
                    Some(Scalar::Positive(v)) => i128::from(v),
                    Some(Scalar::Negative(v)) => -i128::from(v),
                    _ => return Ok(()),
                };
                if let Ok(v) = <$t>::try_from(wide) {
                    *self = v;
                }
                Ok(())
            }
        }
    )*};
}

impl_unsigned!(u8, u16, u32, u64);
impl_signed!(i8, i16, i32, i64);

impl SpbValue for bool {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        pack_scalar(w, tag, WireType::IntPositive, u64::from(*self), required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        if let Some(Scalar::Positive(v)) = read_scalar(r, ty)? {
            *self = v > 0;
        }
        Ok(())
    }
}

impl SpbValue for f32 {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        pack_scalar(w, tag, WireType::Float, u64::from(self.to_bits()), required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        match read_scalar(r, ty)? {
            Some(Scalar::Float(bits)) => *self = f32::from_bits(bits),
            Some(Scalar::Double(bits)) => *self = f64::from_bits(bits) as f32,
            _ => {}
        }
        Ok(())
    }
}

impl SpbValue for f64 {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        pack_scalar(w, tag, WireType::Double, self.to_bits(), required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        match read_scalar(r, ty)? {
            Some(Scalar::Double(bits)) => *self = f64::from_bits(bits),
            Some(Scalar::Float(bits)) => *self = f64::from(f32::from_bits(bits)),
            _ => {}
        }
        Ok(())
    }
}

fn pack_bytes(w: &mut SpbWriter, tag: u32, data: &[u8], required: bool) {
    if data.is_empty() && !required {
        return;
    }
    w.write_header(tag, WireType::String);
    w.write_bytes(data);
}

impl SpbValue for String {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        pack_bytes(w, tag, self.as_bytes(), required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        if ty != WireType::String {
            return r.skip(ty);
        }
        let raw = r.read_bytes()?;
        let text = std::str::from_utf8(raw).map_err(|_| SpbError::InvalidUtf8)?;
        self.clear();
        self.push_str(text);
        Ok(())
    }
}

/// Raw bytes travel with the `String` type code.
impl SpbValue for Bytes {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        pack_bytes(w, tag, self, required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        if ty != WireType::String {
            return r.skip(ty);
        }
        *self = Bytes::copy_from_slice(r.read_bytes()?);
        Ok(())
    }
}

impl<T: SpbValue + Default> SpbValue for Vec<T> {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        if self.is_empty() && !required {
            return;
        }
        w.write_header(tag, WireType::Vector);
        w.write_varint(self.len() as u64);
        for item in self {
            item.pack(w, 0, true);
        }
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        if ty != WireType::Vector {
            return r.skip(ty);
        }
        let count = r.read_count()?;
        r.nested(|r| {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let (_, ty) = r.read_header()?;
                let mut item = T::default();
                item.unpack(r, ty)?;
                items.push(item);
            }
            *self = items;
            Ok(())
        })
    }
}

fn read_entry<K, V>(r: &mut SpbReader<'_>) -> Result<(K, V), SpbError>
where
    K: SpbValue + Default,
    V: SpbValue + Default,
{
    let (_, ty) = r.read_header()?;
    let mut key = K::default();
    key.unpack(r, ty)?;
    let (_, ty) = r.read_header()?;
    let mut value = V::default();
    value.unpack(r, ty)?;
    Ok((key, value))
}

macro_rules! impl_map {
    ($map:ident, $($bound:path),+) => {
        impl<K, V> SpbValue for $map<K, V>
        where
            K: SpbValue + Default $(+ $bound)+,
            V: SpbValue + Default,
        {
            fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
                if self.is_empty() && !required {
                    return;
                }
                w.write_header(tag, WireType::Map);
                w.write_varint(self.len() as u64);
                for (key, value) in self {
                    key.pack(w, 0, true);
                    value.pack(w, 0, true);
                }
            }

            fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
                if ty != WireType::Map {
                    return r.skip(ty);
                }
                let count = r.read_count()?;
                r.nested(|r| {
                    let mut entries = $map::new();
                    for _ in 0..count {
                        let (key, value) = read_entry::<K, V>(r)?;
                        entries.insert(key, value);
                    }
                    *self = entries;
                    Ok(())
                })
            }
        }
    };
}

impl_map!(HashMap, Eq, Hash);
impl_map!(BTreeMap, Ord);

/// `None` is never written. A present field decodes into `Some`.
impl<T: SpbValue + Default> SpbValue for Option<T> {
    fn pack(&self, w: &mut SpbWriter, tag: u32, _required: bool) {
        if let Some(value) = self {
            value.pack(w, tag, true);
        }
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        let mut value = self.take().unwrap_or_default();
        value.unpack(r, ty)?;
        *self = Some(value);
        Ok(())
    }
}

impl<T: SpbValue + Default> SpbValue for Box<T> {
    fn pack(&self, w: &mut SpbWriter, tag: u32, required: bool) {
        (**self).pack(w, tag, required);
    }

    fn unpack(&mut self, r: &mut SpbReader<'_>, ty: WireType) -> Result<(), SpbError> {
        (**self).unpack(r, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: SpbValue>(value: &T, required: bool) -> Vec<u8> {
        let mut w = SpbWriter::new();
        value.pack(&mut w, 1, required);
        w.into_vec()
    }

    fn decode<T: SpbValue + Default>(bytes: &[u8]) -> T {
        let mut r = SpbReader::new(bytes);
        let (_, ty) = r.read_header().unwrap();
        let mut value = T::default();
        value.unpack(&mut r, ty).unwrap();
        value
    }

    #[test]
    fn test_zero_values_omitted_unless_required() {
        assert!(encode(&0u32, false).is_empty());
        assert!(encode(&false, false).is_empty());
        assert!(encode(&String::new(), false).is_empty());
        assert!(encode(&Vec::<u8>::new(), false).is_empty());
        assert!(encode(&0.0f64, false).is_empty());

        assert_eq!(encode(&0u32, true), vec![0x01, 0x00]);
        assert_eq!(encode(&String::new(), true), vec![0x41, 0x00]);
    }

    #[test]
    fn test_negative_uses_sign_type() {
        let bytes = encode(&-5i32, false);
        assert_eq!(bytes, vec![0x11, 0x05]);
        assert_eq!(decode::<i32>(&bytes), -5);
    }

    #[test]
    fn test_extreme_integers() {
        assert_eq!(decode::<i64>(&encode(&i64::MIN, false)), i64::MIN);
        assert_eq!(decode::<i64>(&encode(&i64::MAX, false)), i64::MAX);
        assert_eq!(decode::<u64>(&encode(&u64::MAX, false)), u64::MAX);
    }

    #[test]
    fn test_out_of_range_integer_is_ignored() {
        let bytes = encode(&300u32, false);
        let mut r = SpbReader::new(&bytes);
        let (_, ty) = r.read_header().unwrap();
        let mut small = 7u8;
        small.unpack(&mut r, ty).unwrap();
        assert_eq!(small, 7);
        assert!(r.is_empty());
    }

    #[test]
    fn test_negative_into_unsigned_is_ignored() {
        let bytes = encode(&-1i64, false);
        assert_eq!(decode::<u32>(&bytes), 0);
    }

    #[test]
    fn test_string_into_integer_is_skipped() {
        let bytes = encode(&String::from("hello"), false);
        let mut r = SpbReader::new(&bytes);
        let (_, ty) = r.read_header().unwrap();
        let mut n = 3u32;
        n.unpack(&mut r, ty).unwrap();
        assert_eq!(n, 3);
        assert!(r.is_empty());
    }

    #[test]
    fn test_floats() {
        assert_eq!(decode::<f32>(&encode(&1.5f32, false)), 1.5);
        assert_eq!(decode::<f64>(&encode(&-2.25f64, false)), -2.25);
        assert_eq!(decode::<f64>(&encode(&0.5f32, false)), 0.5);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut w = SpbWriter::new();
        w.write_header(1, WireType::String);
        w.write_bytes(&[0xFF, 0xFE]);
        let mut r = SpbReader::new(w.as_slice());
        let (_, ty) = r.read_header().unwrap();
        let mut s = String::new();
        assert_eq!(s.unpack(&mut r, ty), Err(SpbError::InvalidUtf8));
    }

    #[test]
    fn test_bytes_round_trip() {
        let data = Bytes::from_static(b"\x00\x01binary");
        assert_eq!(decode::<Bytes>(&encode(&data, false)), data);
    }

    #[test]
    fn test_vector_of_strings() {
        let v = vec!["a".to_string(), String::new(), "c".to_string()];
        assert_eq!(decode::<Vec<String>>(&encode(&v, false)), v);
    }

    #[test]
    fn test_maps() {
        let mut hash = HashMap::new();
        hash.insert("one".to_string(), 1i32);
        hash.insert("minus".to_string(), -1i32);
        assert_eq!(decode::<HashMap<String, i32>>(&encode(&hash, false)), hash);

        let mut tree = BTreeMap::new();
        tree.insert(3u16, vec![1u8, 2]);
        assert_eq!(decode::<BTreeMap<u16, Vec<u8>>>(&encode(&tree, false)), tree);
    }

    #[test]
    fn test_option() {
        assert!(encode(&None::<u32>, false).is_empty());
        assert_eq!(decode::<Option<u32>>(&encode(&Some(0u32), false)), Some(0));
    }
}
