use std::fmt::{Display, Formatter};

use digest::Digest;
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use sha2::Sha256;

use crate::{
    error::{Error, Result},
    FromBytes, ToBytes,
};

pub const HASH_SIZE: usize = 32;

/// Content hash of a tree node, and the unit every proof is built from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Hash([u8; HASH_SIZE]);

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Arbitrary for Hash {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<[u8; HASH_SIZE]>().prop_map(Hash::new).boxed()
    }
}

impl Hash {
    /// Creates a new Hash from any type that can be converted into [u8; 32].
    pub fn new<T: Into<[u8; HASH_SIZE]>>(data: T) -> Self {
        Hash(data.into())
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        let mut inner = [0u8; HASH_SIZE];
        inner.copy_from_slice(slice);
        Hash(inner)
    }

    /// Returns a zero hash (all bytes set to 0).
    pub fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    pub fn digest<D: Digest>(data: &[u8]) -> Self {
        let mut hasher = D::new();
        hasher.update(data);
        Hash::from_slice(&hasher.finalize())
    }

    /// SHA-256 of `data`; the digest the tree format is fixed to.
    pub fn of(data: &[u8]) -> Self {
        Self::digest::<Sha256>(data)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::zero()
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(array: [u8; HASH_SIZE]) -> Self {
        Hash(array)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Hash> for [u8; HASH_SIZE] {
    fn from(val: Hash) -> Self {
        val.0
    }
}

impl FromBytes for Hash {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_SIZE {
            return Err(Error::Deserialization(format!(
                "expected {} hash bytes, got {}",
                HASH_SIZE,
                bytes.len()
            )));
        }
        let mut array = [0u8; HASH_SIZE];
        array.copy_from_slice(bytes);
        Ok(Hash(array))
    }
}

impl ToBytes for Hash {
    type Output = [u8; HASH_SIZE];

    fn to_bytes(&self) -> Self::Output {
        self.0
    }
}

crate::impl_associate_bytes_types!(Hash);
