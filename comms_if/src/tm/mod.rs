//! # Telemetry module
//!
//! Telemetry is a flat stream of `key -> value` entries where keys are hierarchical paths such as
//! `drive/modules/0/angle`. Values are typed, see [`TmValue`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single timestamped telemetry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmEntry {
    /// Hierarchical key, segments separated by `/`
    pub key: String,

    /// Time the value was recorded.
    ///
    /// Units: seconds since session start
    pub time_s: f64,

    pub value: TmValue,
}

/// A batch of telemetry entries sent by the telemetry server once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TmPacket {
    /// Cycle time the packet was built at.
    ///
    /// Units: seconds since session start
    pub time_s: f64,

    pub entries: Vec<TmEntry>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A typed telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TmValue {
    Double(f64),
    Long(i64),
    Bool(bool),
    Str(String),
    DoubleArray(Vec<f64>),
    LongArray(Vec<i64>),
    BoolArray(Vec<bool>),
    StrArray(Vec<String>),

    /// A binary packed struct, see [`TmStruct`].
    Struct {
        type_name: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A struct which can be packed into a binary telemetry value.
///
/// Fields are packed little endian in declaration order.
pub trait TmStruct: Sized {
    /// Name of the struct type, used by consumers to pick an unpacker.
    fn type_name() -> &'static str;

    /// Append the packed struct to the buffer.
    fn pack(&self, buf: &mut Vec<u8>);

    /// Read the struct back from a packed buffer.
    fn unpack(buf: &mut &[u8]) -> std::io::Result<Self>;

    /// Pack into a telemetry value.
    fn to_tm_value(&self) -> TmValue {
        let mut data = Vec::new();
        self.pack(&mut data);
        TmValue::Struct {
            type_name: Self::type_name().to_string(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TmValue {
    /// Interpret the value as a double if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TmValue::Double(v) => Some(*v),
            TmValue::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Interpret the value as an integer if it is a long.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TmValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TmValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as a single CSV-friendly string.
    pub fn to_field_string(&self) -> String {
        fn join<T: ToString>(v: &[T]) -> String {
            v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(";")
        }

        match self {
            TmValue::Double(v) => v.to_string(),
            TmValue::Long(v) => v.to_string(),
            TmValue::Bool(v) => v.to_string(),
            TmValue::Str(v) => v.clone(),
            TmValue::DoubleArray(v) => join(v),
            TmValue::LongArray(v) => join(v),
            TmValue::BoolArray(v) => join(v),
            TmValue::StrArray(v) => join(v),
            TmValue::Struct { type_name, data } => {
                format!("{}:{}", type_name, base64::encode(data))
            }
        }
    }
}

macro_rules! impl_from_for_tm_value {
    ($($t:ty => $variant:ident),+) => {
        $(
            impl From<$t> for TmValue {
                fn from(v: $t) -> Self {
                    TmValue::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_for_tm_value!(
    f64 => Double,
    f32 => Double,
    i64 => Long,
    i32 => Long,
    u32 => Long,
    bool => Bool,
    String => Str,
    &str => Str,
    Vec<f64> => DoubleArray,
    Vec<i64> => LongArray,
    Vec<bool> => BoolArray,
    Vec<String> => StrArray
);

impl From<usize> for TmValue {
    fn from(v: usize) -> Self {
        TmValue::Long(v as i64)
    }
}

impl From<&[f64]> for TmValue {
    fn from(v: &[f64]) -> Self {
        TmValue::DoubleArray(v.to_vec())
    }
}

/// Helpers for packing plain values, used by [`TmStruct`] implementations.
pub fn pack_f64s(buf: &mut Vec<u8>, values: &[f64]) {
    for v in values {
        // Writing into a Vec can't fail
        buf.write_f64::<LittleEndian>(*v).ok();
    }
}

/// Read `N` doubles from a packed buffer.
pub fn unpack_f64s<const N: usize>(buf: &mut &[u8]) -> std::io::Result<[f64; N]> {
    let mut out = [0f64; N];
    for v in out.iter_mut() {
        *v = buf.read_f64::<LittleEndian>()?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// PRIVATE MODULES
// ---------------------------------------------------------------------------

mod base64_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::decode(s.as_bytes()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Pair {
        a: f64,
        b: f64,
    }

    impl TmStruct for Pair {
        fn type_name() -> &'static str {
            "Pair"
        }

        fn pack(&self, buf: &mut Vec<u8>) {
            pack_f64s(buf, &[self.a, self.b]);
        }

        fn unpack(buf: &mut &[u8]) -> std::io::Result<Self> {
            let [a, b] = unpack_f64s::<2>(buf)?;
            Ok(Pair { a, b })
        }
    }

    #[test]
    fn test_struct_value_survives_json() {
        let value = Pair { a: 1.5, b: -2.0 }.to_tm_value();

        let json = serde_json::to_string(&value).unwrap();
        let back: TmValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);

        match back {
            TmValue::Struct { type_name, data } => {
                assert_eq!(type_name, "Pair");
                assert_eq!(data.len(), 16);
                let p = Pair::unpack(&mut data.as_slice()).unwrap();
                assert_eq!(p.a, 1.5);
                assert_eq!(p.b, -2.0);
            }
            _ => panic!("expected a struct value"),
        }
    }

    #[test]
    fn test_field_strings() {
        assert_eq!(TmValue::from(vec![1.0, 2.5]).to_field_string(), "1;2.5");
        assert_eq!(TmValue::from(true).to_field_string(), "true");
        assert_eq!(TmValue::from(3i32).as_f64(), Some(3.0));
    }
}
