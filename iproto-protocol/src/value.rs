//! The MessagePack object/value mapper (`spec.md` §4.1).
//!
//! Rust has no runtime class registry, so the "`(MsgPackValueVariant,
//! TargetType) -> ValueConverter`" lookup is realized as a `HashMap` keyed
//! on `(ValueVariant, TypeId)`, holding a type-erased
//! `Arc<dyn Fn(&rmpv::Value) -> Result<T, Error>>` that is downcast back to
//! its concrete closure type on lookup (`spec.md` §9, Design Note on mapper
//! registries). Lookups only ever succeed on an exact `(variant, type)`
//! match. There is no structural fallback.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use iproto_errors::{ConverterNotFound, Error, ProtocolError};
use uuid::Uuid;

use crate::keys::ext_type;

/// The coarse shape of a decoded MessagePack value, used as half of the
/// converter registry key. Signed/unsigned integers of every width share
/// one `Int` variant (MessagePack itself does not distinguish them at this
/// level); the target Rust type is what narrows the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueVariant {
    Nil,
    Bool,
    Int,
    Float,
    String,
    Binary,
    Array,
    Map,
    Ext(i8),
}

impl ValueVariant {
    pub fn of(value: &rmpv::Value) -> Self {
        match value {
            rmpv::Value::Nil => ValueVariant::Nil,
            rmpv::Value::Boolean(_) => ValueVariant::Bool,
            rmpv::Value::Integer(_) => ValueVariant::Int,
            rmpv::Value::F32(_) | rmpv::Value::F64(_) => ValueVariant::Float,
            rmpv::Value::String(_) => ValueVariant::String,
            rmpv::Value::Binary(_) => ValueVariant::Binary,
            rmpv::Value::Array(_) => ValueVariant::Array,
            rmpv::Value::Map(_) => ValueVariant::Map,
            rmpv::Value::Ext(ty, _) => ValueVariant::Ext(*ty),
        }
    }

    fn name(&self) -> String {
        match self {
            ValueVariant::Nil => "nil".to_string(),
            ValueVariant::Bool => "bool".to_string(),
            ValueVariant::Int => "int".to_string(),
            ValueVariant::Float => "float".to_string(),
            ValueVariant::String => "string".to_string(),
            ValueVariant::Binary => "binary".to_string(),
            ValueVariant::Array => "array".to_string(),
            ValueVariant::Map => "map".to_string(),
            ValueVariant::Ext(ty) => format!("ext({ty})"),
        }
    }
}

/// A 16-byte UUID carried as a MessagePack ext value (ext type
/// [`ext_type::UUID`]).
pub type UuidValue = Uuid;

/// An opaque decimal payload carried as a MessagePack ext value (ext type
/// [`ext_type::DECIMAL`]). The server's BCD-like wire encoding is internal
/// to the server and out of scope for this core; callers that need to
/// interpret it arithmetically can do so from the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal(pub Vec<u8>);

type ValueConverterFn<T> = Arc<dyn Fn(&rmpv::Value) -> Result<T, Error> + Send + Sync>;
type ObjectConverterFn<T> = Arc<dyn Fn(&T) -> rmpv::Value + Send + Sync>;

/// MessagePack value -> native object registry (`spec.md` §4.1).
pub struct ValueMapper {
    converters: HashMap<(ValueVariant, TypeId), Box<dyn Any + Send + Sync>>,
}

impl ValueMapper {
    pub fn new() -> Self {
        ValueMapper {
            converters: HashMap::new(),
        }
    }

    /// Registers a converter from `variant` to `T`. A later call for the
    /// same `(variant, T)` pair replaces the earlier one.
    pub fn register<T, F>(&mut self, variant: ValueVariant, f: F)
    where
        T: 'static,
        F: Fn(&rmpv::Value) -> Result<T, Error> + Send + Sync + 'static,
    {
        let boxed: ValueConverterFn<T> = Arc::new(f);
        self.converters
            .insert((variant, TypeId::of::<T>()), Box::new(boxed));
    }

    /// Converts `value` to `T`, failing with `ConverterNotFound` if no
    /// converter is registered for `(variant_of(value), T)`.
    pub fn convert<T: 'static>(&self, value: &rmpv::Value) -> Result<T, Error> {
        let variant = ValueVariant::of(value);
        let entry = self
            .converters
            .get(&(variant, TypeId::of::<T>()))
            .ok_or_else(|| {
                ConverterNotFound {
                    from_ty: variant.name(),
                    to_ty: std::any::type_name::<T>().to_string(),
                }
                .build()
            })?;
        let f = entry
            .downcast_ref::<ValueConverterFn<T>>()
            .expect("registry invariant: stored closure type matches lookup key");
        f(value)
    }

    /// As [`ValueMapper::convert`], but treats a MessagePack nil as `None`
    /// instead of consulting the registry.
    pub fn convert_option<T: 'static>(&self, value: &rmpv::Value) -> Result<Option<T>, Error> {
        if matches!(value, rmpv::Value::Nil) {
            Ok(None)
        } else {
            self.convert(value).map(Some)
        }
    }
}

macro_rules! register_int {
    ($mapper:expr, $ty:ty, $accessor:ident, $name:literal) => {
        $mapper.register::<$ty, _>(ValueVariant::Int, |v| {
            v.$accessor()
                .and_then(|n| <$ty>::try_from(n).ok())
                .ok_or_else(|| invalid($name))
        })
    };
}

impl Default for ValueMapper {
    fn default() -> Self {
        let mut m = ValueMapper::new();
        register_int!(m, i8, as_i64, "i8");
        register_int!(m, i16, as_i64, "i16");
        register_int!(m, i32, as_i64, "i32");
        register_int!(m, i64, as_i64, "i64");
        register_int!(m, u8, as_u64, "u8");
        register_int!(m, u16, as_u64, "u16");
        register_int!(m, u32, as_u64, "u32");
        register_int!(m, u64, as_u64, "u64");

        m.register::<bool, _>(ValueVariant::Bool, |v| {
            v.as_bool().ok_or_else(|| invalid("bool"))
        });
        m.register::<f32, _>(ValueVariant::Float, |v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| invalid("f32"))
        });
        m.register::<f64, _>(ValueVariant::Float, |v| {
            v.as_f64().ok_or_else(|| invalid("f64"))
        });
        m.register::<String, _>(ValueVariant::String, |v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| invalid("String"))
        });
        m.register::<Vec<u8>, _>(ValueVariant::Binary, |v| {
            v.as_slice()
                .map(|s| s.to_vec())
                .ok_or_else(|| invalid("Vec<u8>"))
        });
        m.register::<rmpv::Value, _>(ValueVariant::Array, |v| Ok(v.clone()));
        m.register::<rmpv::Value, _>(ValueVariant::Map, |v| Ok(v.clone()));
        m.register::<UuidValue, _>(ValueVariant::Ext(ext_type::UUID), |v| match v {
            rmpv::Value::Ext(_, bytes) if bytes.len() == 16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                Ok(Uuid::from_bytes(raw))
            }
            _ => Err(invalid("Uuid")),
        });
        m.register::<Decimal, _>(ValueVariant::Ext(ext_type::DECIMAL), |v| match v {
            rmpv::Value::Ext(_, bytes) => Ok(Decimal(bytes.clone())),
            _ => Err(invalid("Decimal")),
        });
        m
    }
}

fn invalid(target: &'static str) -> Error {
    ProtocolError {
        message: format!("malformed value for target type {target}"),
    }
    .build()
}

/// Native object -> MessagePack value registry (`spec.md` §4.1, reverse
/// direction).
pub struct ObjectMapper {
    converters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ObjectMapper {
    pub fn new() -> Self {
        ObjectMapper {
            converters: HashMap::new(),
        }
    }

    pub fn register<T, F>(&mut self, f: F)
    where
        T: 'static,
        F: Fn(&T) -> rmpv::Value + Send + Sync + 'static,
    {
        let boxed: ObjectConverterFn<T> = Arc::new(f);
        self.converters.insert(TypeId::of::<T>(), Box::new(boxed));
    }

    pub fn convert<T: 'static>(&self, value: &T) -> Result<rmpv::Value, Error> {
        let entry = self.converters.get(&TypeId::of::<T>()).ok_or_else(|| {
            ConverterNotFound {
                from_ty: std::any::type_name::<T>().to_string(),
                to_ty: "rmpv::Value".to_string(),
            }
            .build()
        })?;
        let f = entry
            .downcast_ref::<ObjectConverterFn<T>>()
            .expect("registry invariant: stored closure type matches lookup key");
        Ok(f(value))
    }
}

impl Default for ObjectMapper {
    fn default() -> Self {
        let mut m = ObjectMapper::new();
        m.register::<bool, _>(|v| rmpv::Value::from(*v));
        m.register::<i8, _>(|v| rmpv::Value::from(*v as i64));
        m.register::<i16, _>(|v| rmpv::Value::from(*v as i64));
        m.register::<i32, _>(|v| rmpv::Value::from(*v as i64));
        m.register::<i64, _>(|v| rmpv::Value::from(*v));
        m.register::<u8, _>(|v| rmpv::Value::from(*v as u64));
        m.register::<u16, _>(|v| rmpv::Value::from(*v as u64));
        m.register::<u32, _>(|v| rmpv::Value::from(*v as u64));
        m.register::<u64, _>(|v| rmpv::Value::from(*v));
        m.register::<f32, _>(|v| rmpv::Value::from(*v));
        m.register::<f64, _>(|v| rmpv::Value::from(*v));
        m.register::<String, _>(|v| rmpv::Value::from(v.as_str()));
        m.register::<Vec<u8>, _>(|v| rmpv::Value::from(v.clone()));
        m.register::<UuidValue, _>(|v| {
            rmpv::Value::Ext(ext_type::UUID, v.as_bytes().to_vec())
        });
        m.register::<Decimal, _>(|v| rmpv::Value::Ext(ext_type::DECIMAL, v.0.clone()));
        m
    }
}

/// Decodes one server tuple (a MessagePack array) into a fixed-arity Rust
/// tuple type, using a [`ValueMapper`] for each element.
pub trait TupleDecode: Sized {
    fn decode_tuple(mapper: &ValueMapper, value: &rmpv::Value) -> Result<Self, Error>;
}

macro_rules! impl_tuple_decode {
    ($($name:ident),+) => {
        impl<$($name: 'static),+> TupleDecode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn decode_tuple(mapper: &ValueMapper, value: &rmpv::Value) -> Result<Self, Error> {
                let arr = value.as_array().ok_or_else(|| ProtocolError {
                    message: "expected tuple to be a msgpack array".to_string(),
                }.build())?;
                let mut iter = arr.iter();
                $(
                    let $name: $name = mapper.convert(iter.next().ok_or_else(|| ProtocolError {
                        message: "tuple has fewer fields than expected".to_string(),
                    }.build())?)?;
                )+
                Ok(($($name,)+))
            }
        }
    };
}

impl_tuple_decode!(A);
impl_tuple_decode!(A, B);
impl_tuple_decode!(A, B, C);
impl_tuple_decode!(A, B, C, D);
impl_tuple_decode!(A, B, C, D, E);
impl_tuple_decode!(A, B, C, D, E, F);
impl_tuple_decode!(A, B, C, D, E, F, G);
impl_tuple_decode!(A, B, C, D, E, F, G, H);

/// Produces a [`ResultMapper<T>`] specialized for a given tuple type `T`,
/// caching instances so repeat calls for the same `T` return the same
/// mapper (`spec.md` §4.1: "the same type yields the same mapper
/// instance").
pub struct ResultMapperFactory {
    value_mapper: Arc<ValueMapper>,
    cache: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ResultMapperFactory {
    pub fn new(value_mapper: Arc<ValueMapper>) -> Self {
        ResultMapperFactory {
            value_mapper,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get<T>(&self) -> Arc<ResultMapper<T>>
    where
        T: TupleDecode + Send + Sync + 'static,
    {
        let mut cache = self.cache.lock().expect("result mapper cache poisoned");
        let entry = cache.entry(TypeId::of::<T>()).or_insert_with(|| {
            Arc::new(ResultMapper::<T> {
                value_mapper: self.value_mapper.clone(),
                _marker: std::marker::PhantomData,
            }) as Arc<dyn Any + Send + Sync>
        });
        entry
            .clone()
            .downcast::<ResultMapper<T>>()
            .expect("registry invariant: cached mapper type matches TypeId key")
    }
}

pub struct ResultMapper<T> {
    value_mapper: Arc<ValueMapper>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: TupleDecode> ResultMapper<T> {
    pub fn decode_many(&self, tuples: &[rmpv::Value]) -> Result<Vec<T>, Error> {
        tuples
            .iter()
            .map(|v| T::decode_tuple(&self.value_mapper, v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_registered_scalars() {
        let m = ValueMapper::default();
        assert_eq!(m.convert::<i64>(&rmpv::Value::from(42i64)).unwrap(), 42);
        assert_eq!(
            m.convert::<String>(&rmpv::Value::from("hi")).unwrap(),
            "hi"
        );
        assert!(m.convert::<bool>(&rmpv::Value::from(true)).unwrap());
    }

    #[test]
    fn converter_not_found_for_unregistered_pair() {
        let m = ValueMapper::default();
        let err = m.convert::<Vec<u8>>(&rmpv::Value::from(true)).unwrap_err();
        assert_eq!(err.kind(), "converter_not_found");
    }

    #[test]
    fn nil_maps_to_none_without_consulting_registry() {
        let m = ValueMapper::default();
        let v: Option<i64> = m.convert_option(&rmpv::Value::Nil).unwrap();
        assert_eq!(v, None);
        let v: Option<i64> = m.convert_option(&rmpv::Value::from(5i64)).unwrap();
        assert_eq!(v, Some(5));
    }

    #[test]
    fn result_mapper_factory_caches_by_type() {
        let factory = ResultMapperFactory::new(Arc::new(ValueMapper::default()));
        let a = factory.get::<(i64, String)>();
        let b = factory.get::<(i64, String)>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn decodes_a_tuple() {
        let factory = ResultMapperFactory::new(Arc::new(ValueMapper::default()));
        let mapper = factory.get::<(i64, String)>();
        let tuple = rmpv::Value::Array(vec![
            rmpv::Value::from(1i64),
            rmpv::Value::from("hello"),
        ]);
        let decoded = mapper.decode_many(&[tuple]).unwrap();
        assert_eq!(decoded, vec![(1, "hello".to_string())]);
    }

    #[test]
    fn uuid_round_trips_through_ext_type() {
        let value_mapper = ValueMapper::default();
        let object_mapper = ObjectMapper::default();
        let id = Uuid::from_bytes([7u8; 16]);
        let encoded = object_mapper.convert(&id).unwrap();
        let decoded: Uuid = value_mapper.convert(&encoded).unwrap();
        assert_eq!(decoded, id);
    }
}
