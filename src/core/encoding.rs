//! Binary key encoding for the persisted layout
//!
//! Every dataset-scoped key starts with the 4-byte big-endian dataset id, so a
//! dataset occupies one contiguous key range in each column family:
//!
//! | Store   | Key                                   | Value             |
//! |---------|---------------------------------------|-------------------|
//! | data    | `dataset ++ rid`                      | entity JSON       |
//! | size    | `dataset ++ rid`                      | `u64` BE length   |
//! | log     | `dataset ++ u64 BE sequence`          | rid               |
//! | outrefs | `dataset ++ RefKey(subject, p, obj)`  | object rid        |
//! | inrefs  | `dataset ++ RefKey(obj, p, subject)`  | subject rid       |
//!
//! Fixed-width big-endian integers make lexicographic order equal numeric order.

use crate::core::{CompactId, Reference};

/// Width of the dataset id prefix.
pub const DATASET_PREFIX_LEN: usize = 4;

/// Width of an encoded log sequence number.
pub const SEQUENCE_LEN: usize = 8;

/// Width of each length field inside a [`RefKey`].
pub const LEN_FIELD: usize = 4;

pub fn encode_id(id: CompactId) -> [u8; 4] {
    id.to_be_bytes()
}

pub fn decode_id(bytes: &[u8]) -> Option<CompactId> {
    let raw: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

pub fn encode_size(len: u64) -> [u8; 8] {
    len.to_be_bytes()
}

pub fn decode_size(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

pub fn dataset_prefix(dataset_id: CompactId) -> [u8; DATASET_PREFIX_LEN] {
    encode_id(dataset_id)
}

/// Half-open key range `[start, end)` covering every key of a dataset.
pub fn dataset_range(dataset_id: CompactId) -> (Vec<u8>, Vec<u8>) {
    let start = dataset_prefix(dataset_id).to_vec();
    let end = match dataset_id.checked_add(1) {
        Some(next) => dataset_prefix(next).to_vec(),
        None => vec![0xff; DATASET_PREFIX_LEN + 1],
    };
    (start, end)
}

/// Key of an entity in the data and size stores.
pub fn entity_key(dataset_id: CompactId, rid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(DATASET_PREFIX_LEN + rid.len());
    key.extend_from_slice(&dataset_prefix(dataset_id));
    key.extend_from_slice(rid.as_bytes());
    key
}

/// Recover the RID from a data/size key of the given dataset.
pub fn entity_key_rid(dataset_id: CompactId, key: &[u8]) -> Option<&str> {
    let rest = key.strip_prefix(&dataset_prefix(dataset_id)[..])?;
    std::str::from_utf8(rest).ok()
}

pub fn log_key(dataset_id: CompactId, sequence: u64) -> [u8; DATASET_PREFIX_LEN + SEQUENCE_LEN] {
    let mut key = [0u8; DATASET_PREFIX_LEN + SEQUENCE_LEN];
    key[0..DATASET_PREFIX_LEN].copy_from_slice(&dataset_prefix(dataset_id));
    key[DATASET_PREFIX_LEN..].copy_from_slice(&sequence.to_be_bytes());
    key
}

pub fn decode_log_key(key: &[u8]) -> Option<(CompactId, u64)> {
    if key.len() != DATASET_PREFIX_LEN + SEQUENCE_LEN {
        return None;
    }
    let dataset_id = decode_id(&key[0..DATASET_PREFIX_LEN])?;
    let raw: [u8; SEQUENCE_LEN] = key[DATASET_PREFIX_LEN..].try_into().ok()?;
    Some((dataset_id, u64::from_be_bytes(raw)))
}

/// Composite key of a reference index entry.
///
/// Layout: `len(from) ++ from ++ len(property) ++ property ++ len(to) ++ to`,
/// lengths as u32 BE. The property token is the 4-byte property id. OutRefs
/// keys have `from = subject`, InRefs keys have `from = object`; both are
/// produced by [`RefKey::encode`] only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefKey {
    pub from: String,
    pub property: CompactId,
    pub to: String,
}

impl RefKey {
    /// Key for the forward (OutRefs) index.
    pub fn outgoing(reference: &Reference) -> Self {
        Self {
            from: reference.subject.clone(),
            property: reference.property,
            to: reference.object.clone(),
        }
    }

    /// Key for the inverse (InRefs) index.
    pub fn incoming(reference: &Reference) -> Self {
        Self {
            from: reference.object.clone(),
            property: reference.property,
            to: reference.subject.clone(),
        }
    }

    pub fn encode(&self, dataset_id: CompactId) -> Vec<u8> {
        let mut key = Self::from_prefix(dataset_id, &self.from);
        push_field(&mut key, &encode_id(self.property));
        push_field(&mut key, self.to.as_bytes());
        key
    }

    pub fn decode(key: &[u8]) -> Option<(CompactId, Self)> {
        let dataset_id = decode_id(key)?;
        let mut rest = &key[DATASET_PREFIX_LEN..];
        let from = take_field(&mut rest)?;
        let property = take_field(&mut rest)?;
        let to = take_field(&mut rest)?;
        if !rest.is_empty() || property.len() != 4 {
            return None;
        }
        Some((
            dataset_id,
            RefKey {
                from: String::from_utf8(from.to_vec()).ok()?,
                property: decode_id(property)?,
                to: String::from_utf8(to.to_vec()).ok()?,
            },
        ))
    }

    /// Seek prefix matching every entry whose `from` side equals `from`.
    pub fn from_prefix(dataset_id: CompactId, from: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(DATASET_PREFIX_LEN + 3 * LEN_FIELD + from.len() + 4);
        key.extend_from_slice(&dataset_prefix(dataset_id));
        push_field(&mut key, from.as_bytes());
        key
    }

    /// Seek prefix matching entries with the given `from` side and property.
    pub fn from_property_prefix(dataset_id: CompactId, from: &str, property: CompactId) -> Vec<u8> {
        let mut key = Self::from_prefix(dataset_id, from);
        push_field(&mut key, &encode_id(property));
        key
    }

    /// Reference in subject/object orientation. `inverse` is true for keys
    /// read from the InRefs index.
    pub fn to_reference(&self, inverse: bool) -> Reference {
        if inverse {
            Reference::new(&self.to, self.property, &self.from)
        } else {
            Reference::new(&self.from, self.property, &self.to)
        }
    }
}

fn push_field(buffer: &mut Vec<u8>, field: &[u8]) {
    let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(field);
}

fn take_field<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = decode_id(rest)? as usize;
    let field = rest.get(LEN_FIELD..LEN_FIELD + len)?;
    *rest = &rest[LEN_FIELD + len..];
    Some(field)
}
