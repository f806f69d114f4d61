use std::{array::TryFromSliceError, num::TryFromIntError};

use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum Error {
    #[error("version {0} was not found")]
    VersionNotFound(u64),

    #[error("version {0} already exists")]
    VersionAlreadyExists(u64),

    #[error("initial version {initial} is above the lowest stored version {lowest}")]
    InvalidInitialVersion { initial: u64, lowest: u64 },

    #[error("tree has no committed versions")]
    EmptyTree,

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("proof root hash does not match the expected root")]
    InvalidRoot,

    #[error("invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("importer is closed")]
    NoImport,

    #[error("store error: {0}")]
    Store(String),

    #[error("corrupted state: {0}")]
    Corruption(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Self {
        Error::Deserialization(format!("hex error: {}", error))
    }
}

impl From<TryFromIntError> for Error {
    fn from(error: TryFromIntError) -> Self {
        Error::Deserialization(format!("invalid number format: {}", error))
    }
}

impl From<TryFromSliceError> for Error {
    fn from(error: TryFromSliceError) -> Self {
        Error::Deserialization(format!("invalid slice format: {}", error))
    }
}
