//! NaN-boxed value encoding.
//!
//! [`PackedValue`] stores a [`Value`] in a single `u64`: ordinary doubles are
//! kept as-is and every other variant lives in the payload of a quiet NaN.
//! Both encodings implement [`ValueRepr`]; storage written against the trait
//! (the string-keyed [`HashTable`]) picks one at build time through the
//! `nan-tagging` feature.
//!
//! [`HashTable`]: crate::runtime::hashtable::HashTable

use std::ffi::c_void;

use crate::runtime::{
    gc::GcHandle,
    value::{HostPtr, Value},
};

/// A storage encoding for [`Value`].
pub trait ValueRepr: Copy {
    fn encode(value: Value) -> Self;
    fn decode(self) -> Value;
}

impl ValueRepr for Value {
    #[inline]
    fn encode(value: Value) -> Self {
        value
    }

    #[inline]
    fn decode(self) -> Value {
        self
    }
}

const NAN_MASK: u64 = 0x7FF8_0000_0000_0000;
const TYPE_MASK: u64 = 0x0007_0000_0000_0000;
const DATA_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const TYPE_SHIFT: u32 = 48;

const TAG_NULL: u64 = 1;
const TAG_BOOL: u64 = 2;
const TAG_HANDLE: u64 = 3;
const TAG_OBJ: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PackedValue(u64);

impl PackedValue {
    #[inline]
    const fn tagged(tag: u64, data: u64) -> Self {
        Self(NAN_MASK | (tag << TYPE_SHIFT) | (data & DATA_MASK))
    }

    #[inline]
    fn tag(self) -> u64 {
        if self.0 & NAN_MASK == NAN_MASK {
            (self.0 & TYPE_MASK) >> TYPE_SHIFT
        } else {
            0
        }
    }

    #[inline]
    fn data(self) -> u64 {
        self.0 & DATA_MASK
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }
}

impl ValueRepr for PackedValue {
    fn encode(value: Value) -> Self {
        match value {
            // Canonicalise NaNs so no payload collides with a tag.
            Value::Number(n) if n.is_nan() => PackedValue(NAN_MASK),
            Value::Number(n) => PackedValue(n.to_bits()),
            Value::Null => Self::tagged(TAG_NULL, 0),
            Value::Boolean(b) => Self::tagged(TAG_BOOL, b as u64),
            Value::Handle(ptr) => {
                let addr = ptr.0 as usize as u64;
                assert!(addr & !DATA_MASK == 0, "host pointer exceeds 48 bits");
                Self::tagged(TAG_HANDLE, addr)
            }
            Value::Obj(handle) => Self::tagged(
                TAG_OBJ,
                ((handle.generation() as u64) << 32) | handle.index() as u64,
            ),
        }
    }

    fn decode(self) -> Value {
        match self.tag() {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Boolean(self.data() != 0),
            TAG_HANDLE => Value::Handle(HostPtr(self.data() as usize as *mut c_void)),
            TAG_OBJ => {
                let data = self.data();
                Value::Obj(GcHandle::from_parts(data as u32, (data >> 32) as u16))
            }
            _ => Value::Number(f64::from_bits(self.0)),
        }
    }
}
