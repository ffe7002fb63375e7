use std::{borrow::Cow, cell::OnceCell};

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a over raw bytes. Zero is remapped so a computed hash is never `0`.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 { 1 } else { hash }
}

/// Immutable byte string.
///
/// Interned strings are canonical: two interned strings with equal bytes are the
/// same heap object, so identity comparison suffices between them.
#[derive(Debug)]
pub struct StrObj {
    bytes: Box<[u8]>,
    hash: OnceCell<u32>,
    interned: bool,
}

impl StrObj {
    pub fn new(bytes: impl Into<Box<[u8]>>, interned: bool) -> Self {
        Self {
            bytes: bytes.into(),
            hash: OnceCell::new(),
            interned,
        }
    }

    /// Builds an interned string whose hash is already known.
    pub(crate) fn interned_with_hash(bytes: &[u8], hash: u32) -> Self {
        let hash_cell = OnceCell::new();
        let _ = hash_cell.set(hash);
        Self {
            bytes: bytes.into(),
            hash: hash_cell,
            interned: true,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_interned(&self) -> bool {
        self.interned
    }

    /// Content hash, computed on first use.
    pub fn hash(&self) -> u32 {
        *self.hash.get_or_init(|| hash_bytes(&self.bytes))
    }

    pub fn content_eq(&self, other: &StrObj) -> bool {
        self.bytes == other.bytes
    }
}
