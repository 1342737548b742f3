use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

/// An integer ID, used for identification of resources and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// The minimum allowable value of an ID.
    pub const MIN: Id = Id(1);

    /// The maximum allowable value of an ID.
    pub const MAX: Id = Id(1 << 53);
}

impl Default for Id {
    fn default() -> Self {
        Id::MIN
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Id> for u64 {
    fn from(value: Id) -> Self {
        value.0
    }
}

/// Error for an ID being out of range.
#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl IdOutOfRange {
    fn new(value: u64) -> Self {
        Self { value }
    }
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            Err(IdOutOfRange::new(value))
        } else {
            Ok(Id(value))
        }
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "an unsigned integer in the range [{}, {}]",
            Id::MIN,
            Id::MAX
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Id::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u64(IdVisitor)
    }
}

/// An ID allocator.
///
/// Allocators are owned by a single writer (the broker loop or a test
/// fixture), so generation takes `&mut self` and needs no interior locking.
pub trait IdAllocator: Send {
    /// Generates a new ID.
    fn generate_id(&mut self) -> Id;

    /// Resets the allocator to its initial state.
    fn reset(&mut self);
}

/// An ID allocator that generates IDs from a random sequence.
///
/// Used for global-scoped IDs, such as session IDs.
#[derive(Debug, Default)]
pub struct RandomIdAllocator {}

impl IdAllocator for RandomIdAllocator {
    fn generate_id(&mut self) -> Id {
        let id = (rand::random::<u64>() & (Id::MAX.0 - 1)) + 1;
        Id(id)
    }

    fn reset(&mut self) {}
}

/// An ID allocator that generates IDs sequentially.
///
/// Used for broker-scoped IDs, such as subscription and publication IDs.
#[derive(Debug)]
pub struct SequentialIdAllocator {
    next: Id,
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self { next: Id::MIN }
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn generate_id(&mut self) -> Id {
        let id = self.next;
        let next = if id.0 == Id::MAX.0 { 1 } else { id.0 + 1 };
        self.next = Id(next);
        id
    }

    fn reset(&mut self) {
        self.next = Id::MIN;
    }
}
