// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Function result memoization backed by a [`RecencyCache`].
//!
//! A [`Memoize`] binds an operation name to a cache. Wrapping a function with it produces a
//! [`MemoizedFn`] (or [`MemoizedAsyncFn`] for functions returning futures) with the same
//! calling contract as the original function. Successful results are cached under a key
//! derived from the operation name and the serialized arguments; failures are returned to
//! the caller and never cached.
//!
//! A cache hit skips the wrapped function entirely, including any side effects it has. Only
//! wrap functions whose results are safe to reuse.
//!
//! Concurrent misses for the same key are not merged: each caller runs the function and the
//! last result stored wins.
//!
//! # Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use perfkit::cache::RecencyCache;
//! use perfkit::memo::Memoize;
//! use tick::Clock;
//!
//! # fn example(clock: Clock) -> Result<(), perfkit::error::ConfigurationError> {
//! let cache = RecencyCache::new("api_cache", 100, clock)?;
//! let square = Memoize::new("square", cache).wrap(|x: u64| Ok::<_, Infallible>(x * x));
//!
//! assert_eq!(square.call(12), Ok(144));
//! assert_eq!(square.call(12), Ok(144)); // served from the cache
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Debug, Display};
use std::time::Duration;

use serde::ser::{self, Error as _, Serialize, Serializer};

use crate::cache::RecencyCache;

/// Cache key for a memoized call: the operation name followed by the canonical JSON form of
/// the arguments.
///
/// Arguments are first converted to a JSON value, which orders object keys, so two argument
/// sets that differ only in field order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoKey(String);

impl MemoKey {
    /// Derives the key for calling `name` with `args`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error when `args` cannot be represented as JSON, for
    /// example a map with non-string keys, or when `args` holds a NaN or infinite float.
    /// JSON writes every non-finite float as `null`, so such arguments would share a key.
    pub fn new<A>(name: &str, args: &A) -> Result<Self, serde_json::Error>
    where
        A: Serialize + ?Sized,
    {
        args.serialize(FiniteFloats)?;
        let canonical = serde_json::to_value(args)?;
        Ok(Self(format!("{name}:{canonical}")))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Walks a value and fails on the first NaN or infinite float.
#[derive(Clone, Copy)]
struct FiniteFloats;

impl FiniteFloats {
    fn check(value: f64) -> Result<(), serde_json::Error> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(serde_json::Error::custom(format!("non-finite float {value} has no distinct JSON form")))
        }
    }
}

macro_rules! accept_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<(), serde_json::Error> {
                Ok(())
            }
        )*
    };
}

impl Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_f32(self, value: f32) -> Result<(), serde_json::Error> {
        Self::check(f64::from(value))
    }

    fn serialize_f64(self, value: f64) -> Result<(), serde_json::Error> {
        Self::check(value)
    }

    fn serialize_none(self) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, _: &'static str, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(self, _: &'static str, _: u32, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct_variant(self, _: &'static str, _: u32, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), serde_json::Error> {
        key.serialize(*self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Result<(), serde_json::Error> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

/// Binds an operation name and an optional time-to-live to a result cache.
#[derive(Debug, Clone)]
pub struct Memoize<V> {
    name: String,
    cache: RecencyCache<MemoKey, V>,
    ttl: Option<Duration>,
}

impl<V: Clone> Memoize<V> {
    /// Creates a memoizer for the operation `name`, storing results in `cache`.
    ///
    /// Several memoizers may share one cache; their keys are kept apart by the name.
    #[must_use]
    pub fn new(name: impl Into<String>, cache: RecencyCache<MemoKey, V>) -> Self {
        Self {
            name: name.into(),
            cache,
            ttl: None,
        }
    }

    /// Treats cached results older than `ttl` as absent.
    ///
    /// Without a time-to-live, results stay cached until evicted for recency.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Wraps a synchronous function.
    #[must_use]
    pub fn wrap<F>(self, f: F) -> MemoizedFn<F, V> {
        MemoizedFn { memo: self, f }
    }

    /// Wraps a function returning a future.
    #[must_use]
    pub fn wrap_async<F>(self, f: F) -> MemoizedAsyncFn<F, V> {
        MemoizedAsyncFn { memo: self, f }
    }

    /// Removes the cached result for `args`, returning `true` if one was cached.
    pub fn invalidate<A>(&self, args: &A) -> bool
    where
        A: Serialize + ?Sized,
    {
        self.key(args).is_some_and(|key| self.cache.remove(&key).is_some())
    }

    /// The operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing cache.
    #[must_use]
    pub fn cache(&self) -> &RecencyCache<MemoKey, V> {
        &self.cache
    }

    fn key<A>(&self, args: &A) -> Option<MemoKey>
    where
        A: Serialize + ?Sized,
    {
        match MemoKey::new(&self.name, args) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(memo.name = %self.name, error = %e, "arguments cannot be serialized, calling without cache");
                None
            }
        }
    }

    fn lookup(&self, key: &MemoKey) -> Option<V> {
        let cached = match self.ttl {
            Some(ttl) => self.cache.get_fresh(key, ttl),
            None => self.cache.get(key),
        };

        if cached.is_some() {
            tracing::trace!(memo.name = %self.name, memo.key = %key, "memo hit");
        } else {
            tracing::trace!(memo.name = %self.name, memo.key = %key, "memo miss");
        }

        cached
    }
}

/// A synchronous function whose successful results are memoized.
///
/// Created by [`Memoize::wrap`].
pub struct MemoizedFn<F, V> {
    memo: Memoize<V>,
    f: F,
}

impl<F, V: Clone> MemoizedFn<F, V> {
    /// Calls the wrapped function, or returns the cached result for identical arguments.
    ///
    /// # Errors
    ///
    /// Returns the wrapped function's error unchanged. Errors are not cached.
    pub fn call<A, E>(&self, args: A) -> Result<V, E>
    where
        A: Serialize,
        F: Fn(A) -> Result<V, E>,
    {
        let Some(key) = self.memo.key(&args) else {
            return (self.f)(args);
        };

        if let Some(value) = self.memo.lookup(&key) {
            return Ok(value);
        }

        let value = (self.f)(args)?;
        self.memo.cache.set(key, value.clone());
        Ok(value)
    }

    /// The memoizer configuration.
    #[must_use]
    pub fn memo(&self) -> &Memoize<V> {
        &self.memo
    }
}

impl<F, V> Debug for MemoizedFn<F, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFn").field("name", &self.memo.name).finish_non_exhaustive()
    }
}

/// An asynchronous function whose successful results are memoized.
///
/// Created by [`Memoize::wrap_async`].
pub struct MemoizedAsyncFn<F, V> {
    memo: Memoize<V>,
    f: F,
}

impl<F, V: Clone> MemoizedAsyncFn<F, V> {
    /// Awaits the wrapped function, or returns the cached result for identical arguments.
    ///
    /// # Errors
    ///
    /// Returns the wrapped function's error unchanged. Errors are not cached.
    pub async fn call<A, E, Fut>(&self, args: A) -> Result<V, E>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let Some(key) = self.memo.key(&args) else {
            return (self.f)(args).await;
        };

        if let Some(value) = self.memo.lookup(&key) {
            return Ok(value);
        }

        let value = (self.f)(args).await?;
        self.memo.cache.set(key, value.clone());
        Ok(value)
    }

    /// The memoizer configuration.
    #[must_use]
    pub fn memo(&self) -> &Memoize<V> {
        &self.memo
    }
}

impl<F, V> Debug for MemoizedAsyncFn<F, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedAsyncFn").field("name", &self.memo.name).finish_non_exhaustive()
    }
}
