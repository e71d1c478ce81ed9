//! The [`spb_record!`](crate::spb_record) macro.
//!
//! Declares a struct and implements [`SpbValue`](super::SpbValue) for it with
//! explicit, stable field tags. A field marked `required` is written even when
//! it holds its zero value.
//!
//! ```
//! use stnet::spb_record;
//! use stnet::codec::SpbCodec;
//!
//! spb_record! {
//!     #[derive(Debug, Default, Clone, PartialEq)]
//!     pub struct Login {
//!         [1] pub user: String,
//!         [2, required] pub level: u32,
//!         [3] pub tags: Vec<String>,
//!     }
//! }
//!
//! let login = Login { user: "ann".into(), level: 0, tags: vec![] };
//! let bytes = SpbCodec::encode(&login);
//! assert_eq!(SpbCodec::decode::<Login>(&bytes).unwrap(), login);
//! ```

/// Declare a struct with Spb field tags. See the [module docs](crate::codec::spb).
#[macro_export]
macro_rules! spb_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                [$tag:literal $(, $required:ident)?] $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::codec::SpbValue for $name {
            fn pack(&self, w: &mut $crate::codec::SpbWriter, tag: u32, _required: bool) {
                w.write_header(tag, $crate::codec::WireType::StructBegin);
                $(
                    $crate::codec::SpbValue::pack(
                        &self.$field,
                        w,
                        $tag,
                        $crate::__spb_required!($($required)?),
                    );
                )*
                w.write_header(0, $crate::codec::WireType::StructEnd);
            }

            fn unpack(
                &mut self,
                r: &mut $crate::codec::SpbReader<'_>,
                ty: $crate::codec::WireType,
            ) -> ::std::result::Result<(), $crate::codec::SpbError> {
                if ty != $crate::codec::WireType::StructBegin {
                    return r.skip(ty);
                }
                r.nested(|r| loop {
                    let (tag, ty) = r.read_header()?;
                    if ty == $crate::codec::WireType::StructEnd {
                        return Ok(());
                    }
                    match tag {
                        $( $tag => $crate::codec::SpbValue::unpack(&mut self.$field, r, ty)?, )*
                        _ => r.skip(ty)?,
                    }
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __spb_required {
    () => {
        false
    };
    (required) => {
        true
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::codec::{SpbCodec, SpbError};

    crate::spb_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Inner {
            [0] name: String,
            [1] score: i64,
        }
    }

    crate::spb_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Outer {
            [1] id: u64,
            [2, required] label: String,
            [3] ratio: f64,
            [4] items: Vec<Inner>,
            [5] inner: Inner,
            [6] index: HashMap<u32, String>,
            [20] far: bool,
        }
    }

    crate::spb_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct V1 {
            [1] id: u32,
            [3] name: String,
        }
    }

    crate::spb_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct V2 {
            [1] id: u32,
            [2] extra: Vec<Inner>,
            [3] name: String,
            [4] more: Inner,
        }
    }

    fn sample() -> Outer {
        let mut index = HashMap::new();
        index.insert(7, "seven".to_string());
        Outer {
            id: 42,
            label: String::new(),
            ratio: 0.25,
            items: vec![
                Inner {
                    name: "a".into(),
                    score: -3,
                },
                Inner::default(),
            ],
            inner: Inner {
                name: "nested".into(),
                score: 9,
            },
            index,
            far: true,
        }
    }

    #[test]
    fn test_record_round_trip() {
        let value = sample();
        let bytes = SpbCodec::encode(&value);
        assert_eq!(SpbCodec::decode::<Outer>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_default_record_is_compact() {
        let bytes = SpbCodec::encode(&Inner::default());
        // StructBegin(tag 0) + StructEnd(tag 0)
        assert_eq!(bytes, vec![0x70, 0x80]);
    }

    #[test]
    fn test_required_empty_string_is_written() {
        let bytes = SpbCodec::encode(&Outer::default());
        // Required label field (tag 2, String, length 0), nested Inner record.
        assert!(bytes.windows(2).any(|w| w == [0x42, 0x00]));
        assert_eq!(SpbCodec::decode::<Outer>(&bytes).unwrap(), Outer::default());
    }

    #[test]
    fn test_new_schema_decodes_with_old() {
        let v2 = V2 {
            id: 5,
            extra: vec![Inner {
                name: "x".into(),
                score: 1,
            }],
            name: "hello".into(),
            more: Inner {
                name: "y".into(),
                score: -1,
            },
        };
        let v1: V1 = SpbCodec::decode(&SpbCodec::encode(&v2)).unwrap();
        assert_eq!(
            v1,
            V1 {
                id: 5,
                name: "hello".into()
            }
        );
    }

    #[test]
    fn test_old_schema_decodes_with_new() {
        let v1 = V1 {
            id: 1,
            name: "n".into(),
        };
        let v2: V2 = SpbCodec::decode(&SpbCodec::encode(&v1)).unwrap();
        assert_eq!(v2.id, 1);
        assert_eq!(v2.name, "n");
        assert!(v2.extra.is_empty());
    }

    #[test]
    fn test_truncated_record_is_error() {
        let bytes = SpbCodec::encode(&sample());
        let result = SpbCodec::decode::<Outer>(&bytes[..bytes.len() - 1]);
        assert_eq!(result, Err(SpbError::UnexpectedEof));
    }
}
