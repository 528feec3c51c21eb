//! Type-directed conversion between JSON params and native argument types.
//!
//! Handlers declared through [`rpc_method!`](crate::rpc_method) never touch
//! raw JSON: each positional element of the params array is converted into
//! the declared argument type by [`FromParam`], and the return value is
//! converted back by [`ToParam`].  Conversions are strict about JSON kinds -
//! an integer is not a float, a float is not an integer - and every failure
//! carries the argument name so the resulting -32602 error tells the caller
//! *which* argument was wrong.
use serde_json::Value as JsonValue;

use crate::{Result, RpcError};

/// Classify a JSON value by the kind names used in marshalling diagnostics.
pub fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// The standard marshalling failure: `value` was not of the `expected` kind.
pub fn kind_mismatch(param: &str, expected: &str, value: &JsonValue) -> RpcError {
    RpcError::invalid_params(param, format!("expected {expected}, got {}", kind_of(value)))
}

/// Conversion from a JSON param element into a native argument type.
///
/// `param` is the argument name, used only for diagnostics.
pub trait FromParam: Sized {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self>;
}

/// Conversion from a native value back into JSON.
pub trait ToParam {
    fn to_param(self) -> JsonValue;
}

impl FromParam for bool {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        value.as_bool().ok_or_else(|| kind_mismatch(param, "bool", value))
    }
}

impl ToParam for bool {
    fn to_param(self) -> JsonValue {
        JsonValue::Bool(self)
    }
}

macro_rules! impl_int_param {
    ($($ty:ty),*) => {$(
        impl FromParam for $ty {
            fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
                let n = value.as_i64().ok_or_else(|| kind_mismatch(param, "int", value))?;
                <$ty>::try_from(n).map_err(|_| {
                    RpcError::invalid_params(
                        param,
                        format!("value {n} out of range for {}", stringify!($ty)),
                    )
                })
            }
        }

        impl ToParam for $ty {
            fn to_param(self) -> JsonValue {
                JsonValue::from(self as i64)
            }
        }
    )*};
}

impl_int_param!(i8, i16, i32, i64, u16, u32);

/// A byte is an int restricted to `[0, 255]`.
impl FromParam for u8 {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        let n = value.as_i64().ok_or_else(|| kind_mismatch(param, "int", value))?;
        u8::try_from(n)
            .map_err(|_| RpcError::invalid_params(param, format!("value {n} out of range [0, 255]")))
    }
}

impl ToParam for u8 {
    fn to_param(self) -> JsonValue {
        JsonValue::from(self as i64)
    }
}

/// JSON has no unsigned 64-bit integer, so `u64` rides the signed carrier
/// bit-for-bit: values above 2^63-1 travel as negative JSON integers and
/// round-trip between peers applying the same rule.  For a lossless
/// human-readable form use [`U64String`] instead.
impl FromParam for u64 {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        let n = value.as_i64().ok_or_else(|| kind_mismatch(param, "int", value))?;
        Ok(n as u64)
    }
}

impl ToParam for u64 {
    fn to_param(self) -> JsonValue {
        JsonValue::from(self as i64)
    }
}

impl FromParam for f64 {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Number(n) if n.is_f64() => {
                n.as_f64().ok_or_else(|| kind_mismatch(param, "float", value))
            }
            other => Err(kind_mismatch(param, "float", other)),
        }
    }
}

impl ToParam for f64 {
    fn to_param(self) -> JsonValue {
        serde_json::Number::from_f64(self)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl FromParam for f32 {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        f64::from_param(param, value).map(|f| f as f32)
    }
}

impl ToParam for f32 {
    fn to_param(self) -> JsonValue {
        (self as f64).to_param()
    }
}

impl FromParam for String {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| kind_mismatch(param, "string", value))
    }
}

impl ToParam for String {
    fn to_param(self) -> JsonValue {
        JsonValue::String(self)
    }
}

impl ToParam for &str {
    fn to_param(self) -> JsonValue {
        JsonValue::String(self.to_owned())
    }
}

impl<T: FromParam> FromParam for Vec<T> {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        let items = match value {
            JsonValue::Array(items) => items,
            other => return Err(kind_mismatch(param, "array", other)),
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| T::from_param(&format!("{param}[{i}]"), item))
            .collect()
    }
}

impl<T: ToParam> ToParam for Vec<T> {
    fn to_param(self) -> JsonValue {
        JsonValue::Array(self.into_iter().map(ToParam::to_param).collect())
    }
}

/// Fixed arrays accept *up to* N elements; positions beyond the supplied
/// count keep `T::default()`.  Supplying more than N is an error.
impl<T: FromParam + Default + Copy, const N: usize> FromParam for [T; N] {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        let items = match value {
            JsonValue::Array(items) => items,
            other => return Err(kind_mismatch(param, "array", other)),
        };
        if items.len() > N {
            return Err(RpcError::invalid_params(
                param,
                format!("at most {N} elements allowed, got {}", items.len()),
            ));
        }
        let mut out = [T::default(); N];
        for (i, item) in items.iter().enumerate() {
            out[i] = T::from_param(&format!("{param}[{i}]"), item)?;
        }
        Ok(out)
    }
}

impl<T: ToParam, const N: usize> ToParam for [T; N] {
    fn to_param(self) -> JsonValue {
        JsonValue::Array(self.into_iter().map(ToParam::to_param).collect())
    }
}

impl<T: FromParam> FromParam for Option<T> {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(None),
            other => T::from_param(param, other).map(Some),
        }
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(self) -> JsonValue {
        match self {
            Some(value) => value.to_param(),
            None => JsonValue::Null,
        }
    }
}

/// Passthrough for handlers that want one argument as raw JSON.
impl FromParam for JsonValue {
    fn from_param(_param: &str, value: &JsonValue) -> Result<Self> {
        Ok(value.clone())
    }
}

impl ToParam for JsonValue {
    fn to_param(self) -> JsonValue {
        self
    }
}

/// A `u64` encoded as a decimal string on the wire.
///
/// The lossless alternative to the signed-carrier encoding of the plain
/// `u64` impl, for peers that would rather read `"18446744073709551615"`
/// than `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct U64String(pub u64);

impl FromParam for U64String {
    fn from_param(param: &str, value: &JsonValue) -> Result<Self> {
        let s = value.as_str().ok_or_else(|| kind_mismatch(param, "string", value))?;
        s.parse::<u64>()
            .map(U64String)
            .map_err(|_| RpcError::invalid_params(param, format!("'{s}' is not a decimal u64")))
    }
}

impl ToParam for U64String {
    fn to_param(self) -> JsonValue {
        JsonValue::String(self.0.to_string())
    }
}

/// Declare a record type marshalled as a JSON object with named fields.
///
/// Field lookup is by name; a missing key is an invalid-params failure
/// naming the field.  Serialization writes fields in declaration order.
///
/// ```
/// linerpc::rpc_record! {
///     #[derive(Debug, PartialEq)]
///     pub struct Point {
///         pub x: i64,
///         pub y: f64,
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $fvis:vis $field:ident : $fty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $fvis $field : $fty ),+
        }

        impl $crate::FromParam for $name {
            fn from_param(param: &str, value: &$crate::JsonValue) -> $crate::Result<Self> {
                let object = match value {
                    $crate::JsonValue::Object(map) => map,
                    other => return Err($crate::marshal::kind_mismatch(param, "object", other)),
                };
                Ok(Self {
                    $(
                        $field: {
                            let field_param = format!("{}.{}", param, stringify!($field));
                            match object.get(stringify!($field)) {
                                Some(value) => {
                                    <$fty as $crate::FromParam>::from_param(&field_param, value)?
                                }
                                None => {
                                    return Err($crate::RpcError::invalid_params(
                                        field_param,
                                        "missing field",
                                    ));
                                }
                            }
                        }
                    ),+
                })
            }
        }

        impl $crate::ToParam for $name {
            fn to_param(self) -> $crate::JsonValue {
                let mut map = $crate::serde_json::Map::new();
                $(
                    map.insert(
                        stringify!($field).to_string(),
                        $crate::ToParam::to_param(self.$field),
                    );
                )+
                $crate::JsonValue::Object(map)
            }
        }
    };
}

/// Declare an enumeration marshalled as its integer tag.
///
/// ```
/// linerpc::rpc_enum! {
///     #[derive(Debug, PartialEq)]
///     pub enum Mode {
///         Off = 0,
///         On = 1,
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $variant:ident = $tag:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $variant = $tag ),+
        }

        impl $crate::FromParam for $name {
            fn from_param(param: &str, value: &$crate::JsonValue) -> $crate::Result<Self> {
                let tag = value
                    .as_i64()
                    .ok_or_else(|| $crate::marshal::kind_mismatch(param, "int", value))?;
                match tag {
                    $( $tag => Ok($name::$variant), )+
                    other => Err($crate::RpcError::invalid_params(
                        param,
                        format!("unknown {} tag {}", stringify!($name), other),
                    )),
                }
            }
        }

        impl $crate::ToParam for $name {
            fn to_param(self) -> $crate::JsonValue {
                $crate::JsonValue::from(self as i64)
            }
        }
    };
}
