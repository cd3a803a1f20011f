//! Entry weights.
//!
//! Every fast store accounts its entries by byte weight. The weight of a
//! value comes from a [`Weigher`]; the built-in one is a [`WeightTable`]:
//! an explicit table of per-type overrides assembled before the cache is
//! built, falling back to the value type's [`Sizeof`] implementation.
//!
//! ```
//! use device_host_cache::cache::weigher::WeightTable;
//!
//! let mut table = WeightTable::new();
//! // Count every Vec<u8> as one page.
//! table.register(|_: &Vec<u8>| 4096);
//! assert_eq!(table.weigh(&vec![0u8; 10]), 4096);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::serialize::HostObject;

/// Byte size of a value.
pub trait Sizeof {
    fn sizeof(&self) -> u64;
}

impl Sizeof for Vec<u8> {
    fn sizeof(&self) -> u64 {
        self.len() as u64
    }
}

impl Sizeof for Bytes {
    fn sizeof(&self) -> u64 {
        self.len() as u64
    }
}

impl Sizeof for String {
    fn sizeof(&self) -> u64 {
        self.len() as u64
    }
}

/// Computes the weight of a cache entry.
///
/// Weights must be deterministic for a given value. Zero is allowed.
pub trait Weigher<V> {
    fn weigh(&self, value: &V) -> u64;
}

/// A weigher backed by a closure.
pub struct FnWeigher<F>(pub F);

impl<V, F> Weigher<V> for FnWeigher<F>
where
    F: Fn(&V) -> u64,
{
    #[inline]
    fn weigh(&self, value: &V) -> u64 {
        (self.0)(value)
    }
}

/// Weighs values by their [`Sizeof`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeofWeigher;

impl<V: Sizeof> Weigher<V> for SizeofWeigher {
    #[inline]
    fn weigh(&self, value: &V) -> u64 {
        value.sizeof()
    }
}

type WeightFn = Box<dyn Fn(&dyn Any) -> u64 + Send + Sync>;

/// Per-type weight functions registered up front.
#[derive(Default)]
pub struct WeightTable {
    overrides: HashMap<TypeId, WeightFn>,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the weight function for `T`.
    pub fn register<T, F>(&mut self, weigh: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        self.overrides.insert(
            TypeId::of::<T>(),
            Box::new(move |value: &dyn Any| value.downcast_ref::<T>().map_or(0, &weigh)),
        );
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T, F>(mut self, weigh: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        self.register(weigh);
        self
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.overrides.contains_key(&TypeId::of::<T>())
    }

    /// Weight of `value`: the registered function for its type, else `Sizeof`.
    pub fn weigh<T: Any + Sizeof>(&self, value: &T) -> u64 {
        match self.overrides.get(&TypeId::of::<T>()) {
            Some(weigh) => weigh(value),
            None => value.sizeof(),
        }
    }
}

impl fmt::Debug for WeightTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightTable")
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

/// Weighs values through a frozen [`WeightTable`].
#[derive(Debug, Clone)]
pub struct TableWeigher(pub Arc<WeightTable>);

impl<V: Any + Sizeof> Weigher<V> for TableWeigher {
    fn weigh(&self, value: &V) -> u64 {
        self.0.weigh(value)
    }
}

/// Weighs host-tier values, dispatching to the table for the wrapped type.
#[derive(Debug, Clone)]
pub struct HostObjectWeigher(pub Arc<WeightTable>);

impl<V: Any + Sizeof> Weigher<HostObject<V>> for HostObjectWeigher {
    fn weigh(&self, value: &HostObject<V>) -> u64 {
        match value {
            HostObject::Value(value) => self.0.weigh(value),
            HostObject::DeviceSerialized(serialized) => self.0.weigh(serialized),
        }
    }
}
