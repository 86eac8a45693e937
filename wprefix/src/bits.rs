// Copyright 2022 Oxide Computer Company

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use bitvec::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// The widest address space, in bits, that offsets and ranges are computed
/// over. Offsets are `u64` and a block of the full space must still have a
/// representable size.
pub const MAX_WIDTH: usize = 63;

/// A most-significant-bit-first string of bits. Used as the name of a trie
/// node (its path from the root), as a trie insertion key, and as the prefix
/// of a compiled rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitPath(BitVec<u8, Msb0>);

impl BitPath {
    pub fn new() -> Self {
        Self(BitVec::new())
    }

    /// The low `len` bits of `value`, highest first.
    pub fn from_value(value: u64, len: usize) -> Self {
        assert!(len <= 64, "bit path of {} bits does not fit in u64", len);
        let mut bv = BitVec::with_capacity(len);
        for i in (0..len).rev() {
            bv.push((value >> i) & 1 == 1);
        }
        Self(bv)
    }

    /// The top `len` bits of a `width` bit `offset`.
    pub fn prefix_of(offset: u64, width: usize, len: usize) -> Self {
        assert!(len <= width && width <= MAX_WIDTH);
        Self::from_value(offset >> (width - len), len)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, bit: bool) {
        self.0.push(bit);
    }

    /// This path extended by one step, `false` to the left and `true` to the
    /// right.
    pub fn child(&self, bit: bool) -> Self {
        let mut c = self.clone();
        c.push(bit);
        c
    }

    /// The first `len` bits of this path.
    pub fn truncated(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.len())].to_bitvec())
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().by_vals()
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        self.0.as_bitslice()
    }

    /// The path read as an unsigned integer. Paths longer than 64 bits keep
    /// only their trailing 64 bits.
    pub fn value(&self) -> u64 {
        self.iter().fold(0u64, |acc, b| (acc << 1) | b as u64)
    }

    /// Whether `self` is a prefix of (or equal to) `other`.
    pub fn is_prefix_of(&self, other: &BitPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// The half-open range of offsets this prefix selects out of a `width`
    /// bit address space.
    pub fn range(&self, width: usize) -> Range<u64> {
        assert!(self.len() <= width && width <= MAX_WIDTH);
        let span = 1u64 << (width - self.len());
        let begin = self.value() << (width - self.len());
        begin..begin + span
    }
}

impl From<BitVec<u8, Msb0>> for BitPath {
    fn from(bv: BitVec<u8, Msb0>) -> Self {
        Self(bv)
    }
}

impl From<&BitSlice<u8, Msb0>> for BitPath {
    fn from(bs: &BitSlice<u8, Msb0>) -> Self {
        Self(bs.to_bitvec())
    }
}

impl fmt::Display for BitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.iter() {
            f.write_str(if b { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for BitPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bv = BitVec::with_capacity(s.len());
        for (i, c) in s.chars().enumerate() {
            match c {
                '0' => bv.push(false),
                '1' => bv.push(true),
                x => {
                    return Err(Error::invalid(
                        "parse bit path",
                        format!("unexpected '{}' at position {}", x, i),
                    ))
                }
            }
        }
        Ok(Self(bv))
    }
}

impl Serialize for BitPath {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BitPath {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
