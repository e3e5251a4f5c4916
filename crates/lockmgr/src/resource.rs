//! Resource identifiers.
//!
//! A [`ResourceId`] is a single 64-bit key: the resource type lives in the top
//! [`RESOURCE_TYPE_BITS`] bits and a hash identifying the resource within that
//! type in the rest. Ordering, equality and hashing all use the combined key.

use std::hash::{DefaultHasher, Hash, Hasher};

pub const RESOURCE_TYPE_BITS: u32 = 3;

const HASH_BITS: u32 = 64 - RESOURCE_TYPE_BITS;
const HASH_MASK: u64 = (1u64 << HASH_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResourceType {
    Invalid = 0,
    Global = 1,
    Database = 2,
    Collection = 3,
    Metadata = 4,
    Mutex = 5,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Invalid,
        ResourceType::Global,
        ResourceType::Database,
        ResourceType::Collection,
        ResourceType::Metadata,
        ResourceType::Mutex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceType::Invalid => "Invalid",
            ResourceType::Global => "Global",
            ResourceType::Database => "Database",
            ResourceType::Collection => "Collection",
            ResourceType::Metadata => "Metadata",
            ResourceType::Mutex => "Mutex",
        }
    }

    fn from_bits(bits: u64) -> ResourceType {
        Self::ALL
            .get(bits as usize)
            .copied()
            .unwrap_or(ResourceType::Invalid)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Builds an id from a type and a hash; bits above the hash width are dropped.
    pub const fn new(resource_type: ResourceType, hash_id: u64) -> Self {
        Self(((resource_type as u64) << HASH_BITS) | (hash_id & HASH_MASK))
    }

    /// Builds an id by hashing a resource name, e.g. a namespace or mutex name.
    ///
    /// The hash is stable within one build only, since `DefaultHasher` may
    /// change between Rust releases. Hash ids shown by `Display` and
    /// `lock_info` are not comparable across builds.
    pub fn from_name(resource_type: ResourceType, name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(resource_type, hasher.finish())
    }

    pub const fn full_hash(self) -> u64 {
        self.0
    }

    pub const fn hash_id(self) -> u64 {
        self.0 & HASH_MASK
    }

    pub fn resource_type(self) -> ResourceType {
        ResourceType::from_bits(self.0 >> HASH_BITS)
    }

    pub fn is_valid(self) -> bool {
        self.resource_type() != ResourceType::Invalid
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new(ResourceType::Invalid, 0)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{}: {}, {}}}",
            self.0,
            self.resource_type(),
            self.hash_id()
        )
    }
}

impl std::fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
