//! Framed proof messages.
//!
//! A proof travels as one discriminator byte, the root hash it commits
//! to, and the range-proof body. The historical single-key existence
//! and absence forms keep their magic numbers but carry the same range
//! body; they are translated to and from [`RangeProof`] here, at the
//! boundary, so there is exactly one verification algebra.

use crate::encoding;
use crate::error::{Error, Result};
use crate::hash::{Hash, HASH_SIZE};
use crate::node::{decode_version, MAX_HEIGHT};
use crate::proof::{PathToLeaf, ProofInnerNode, ProofLeaf, RangeProof};
use crate::{FromBytes, ToBytes};

const EXISTS_MAGIC: u8 = 0x50;
const ABSENT_MAGIC: u8 = 0x51;
const RANGE_MAGIC: u8 = 0x52;

const SIDE_LEFT_ELIDED: u8 = 0x00;
const SIDE_RIGHT_ELIDED: u8 = 0x01;

/// What a framed proof message claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofOp {
    /// A single key exists with a given value.
    Exists,
    /// A single key is absent.
    Absent,
    /// A contiguous key interval.
    Range,
}

impl ProofOp {
    fn magic(self) -> u8 {
        match self {
            ProofOp::Exists => EXISTS_MAGIC,
            ProofOp::Absent => ABSENT_MAGIC,
            ProofOp::Range => RANGE_MAGIC,
        }
    }

    fn from_magic(byte: u8) -> Result<Self> {
        match byte {
            EXISTS_MAGIC => Ok(ProofOp::Exists),
            ABSENT_MAGIC => Ok(ProofOp::Absent),
            RANGE_MAGIC => Ok(ProofOp::Range),
            other => Err(Error::Deserialization(format!(
                "unrecognized proof discriminator {:#04x}",
                other
            ))),
        }
    }
}

fn write_frame(buf: &mut Vec<u8>, frame: &ProofInnerNode) -> Result<()> {
    encoding::write_varint(buf, i64::from(frame.height));
    encoding::write_varint(buf, frame.size as i64);
    encoding::write_varint(buf, frame.version as i64);
    match (&frame.left, &frame.right) {
        (None, Some(right)) => {
            buf.push(SIDE_LEFT_ELIDED);
            encoding::write_bytes(buf, right.as_ref());
        }
        (Some(left), None) => {
            buf.push(SIDE_RIGHT_ELIDED);
            encoding::write_bytes(buf, left.as_ref());
        }
        _ => {
            return Err(Error::InvalidInputs(
                "path frame must elide exactly one side".to_string(),
            ))
        }
    }
    Ok(())
}

fn read_frame(cur: &mut &[u8]) -> Result<ProofInnerNode> {
    let height = encoding::read_varint(cur)?;
    let height = u8::try_from(height)
        .ok()
        .filter(|h| *h <= MAX_HEIGHT)
        .ok_or_else(|| Error::Deserialization(format!("invalid frame height {}", height)))?;
    let size = encoding::read_varint(cur)?;
    let size = u64::try_from(size)
        .map_err(|_| Error::Deserialization(format!("invalid frame size {}", size)))?;
    let version = decode_version(cur)?;
    let side = encoding::read_byte(cur)?;
    let hash = read_hash(cur)?;
    let (left, right) = match side {
        SIDE_LEFT_ELIDED => (None, Some(hash)),
        SIDE_RIGHT_ELIDED => (Some(hash), None),
        other => {
            return Err(Error::Deserialization(format!(
                "invalid frame side marker {:#04x}",
                other
            )))
        }
    };
    Ok(ProofInnerNode {
        height,
        size,
        version,
        left,
        right,
    })
}

fn read_hash(cur: &mut &[u8]) -> Result<Hash> {
    let bytes = encoding::read_bytes(cur)?;
    if bytes.len() != HASH_SIZE {
        return Err(Error::Deserialization(format!(
            "hash field of {} bytes",
            bytes.len()
        )));
    }
    Ok(Hash::from_slice(&bytes))
}

fn write_path(buf: &mut Vec<u8>, path: &PathToLeaf) -> Result<()> {
    encoding::write_uvarint(buf, path.0.len() as u64);
    for frame in &path.0 {
        write_frame(buf, frame)?;
    }
    Ok(())
}

fn read_path(cur: &mut &[u8]) -> Result<PathToLeaf> {
    let count = encoding::read_uvarint(cur)?;
    let mut frames = Vec::new();
    for _ in 0..count {
        frames.push(read_frame(cur)?);
    }
    Ok(PathToLeaf(frames))
}

fn write_leaf(buf: &mut Vec<u8>, leaf: &ProofLeaf) {
    encoding::write_bytes(buf, &leaf.key);
    encoding::write_bytes(buf, leaf.value_hash.as_ref());
    encoding::write_varint(buf, leaf.version as i64);
}

fn read_leaf(cur: &mut &[u8]) -> Result<ProofLeaf> {
    let key = encoding::read_bytes(cur)?;
    if key.is_empty() {
        return Err(Error::Deserialization("proof leaf with empty key".to_string()));
    }
    let value_hash = read_hash(cur)?;
    let version = decode_version(cur)?;
    Ok(ProofLeaf {
        key,
        value_hash,
        version,
    })
}

impl RangeProof {
    /// Frames the proof under a discriminator, committing it to `root`.
    pub fn to_wire(&self, op: ProofOp, root: &Hash) -> Result<Vec<u8>> {
        let mut buf = vec![op.magic()];
        encoding::write_bytes(&mut buf, root.as_ref());
        write_path(&mut buf, &self.left_path)?;
        encoding::write_uvarint(&mut buf, self.inner_nodes.len() as u64);
        for spine in &self.inner_nodes {
            write_path(&mut buf, spine)?;
        }
        encoding::write_uvarint(&mut buf, self.leaves.len() as u64);
        for leaf in &self.leaves {
            write_leaf(&mut buf, leaf);
        }
        Ok(buf)
    }

    /// Decodes a framed proof message into its claim, the root it
    /// commits to, and the range proof itself.
    pub fn from_wire(bytes: &[u8]) -> Result<(ProofOp, Hash, RangeProof)> {
        let mut cur = bytes;
        let op = ProofOp::from_magic(encoding::read_byte(&mut cur)?)?;
        let root = read_hash(&mut cur)?;
        let left_path = read_path(&mut cur)?;
        let spine_count = encoding::read_uvarint(&mut cur)?;
        let mut inner_nodes = Vec::new();
        for _ in 0..spine_count {
            inner_nodes.push(read_path(&mut cur)?);
        }
        let leaf_count = encoding::read_uvarint(&mut cur)?;
        let mut leaves = Vec::new();
        for _ in 0..leaf_count {
            leaves.push(read_leaf(&mut cur)?);
        }
        encoding::expect_done(cur)?;
        Ok((
            op,
            root,
            RangeProof {
                left_path,
                inner_nodes,
                leaves,
            },
        ))
    }

    /// Decodes and verifies a framed proof message. The embedded root
    /// must match the caller's expected root; the claim is then checked
    /// against `key` and `value` (`Some` for existence, `None` for
    /// absence).
    pub fn verify_wire(
        bytes: &[u8],
        key: &[u8],
        value: Option<&[u8]>,
        expected_root: &Hash,
    ) -> Result<()> {
        let (op, root, proof) = Self::from_wire(bytes)?;
        if root != *expected_root {
            return Err(Error::InvalidRoot);
        }
        match (op, value) {
            (ProofOp::Exists, Some(value)) => proof.verify_item(key, value, expected_root),
            (ProofOp::Exists, None) => Err(Error::InvalidInputs(
                "existence proofs need a value".to_string(),
            )),
            (ProofOp::Absent, None) => proof.verify_absence(key, expected_root),
            (ProofOp::Absent, Some(_)) => Err(Error::InvalidInputs(
                "absence proofs take no value".to_string(),
            )),
            (ProofOp::Range, Some(value)) => proof.verify_item(key, value, expected_root),
            (ProofOp::Range, None) => proof.verify_absence(key, expected_root),
        }
    }
}

impl ToBytes for ProofLeaf {
    type Output = Vec<u8>;

    fn to_bytes(&self) -> Self::Output {
        let mut buf = Vec::new();
        write_leaf(&mut buf, self);
        buf
    }
}

impl FromBytes for ProofLeaf {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = bytes;
        let leaf = read_leaf(&mut cur)?;
        encoding::expect_done(cur)?;
        Ok(leaf)
    }
}
