// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::fmt;

use bitflags::bitflags;

use crate::error::ErrorKind;

/// Longest path the engine resolves: 32-byte keys, one nibble per step.
pub const MAX_PATH_NIBBLES: usize = 64;

bitflags! {
    // hex-prefix header, should only ever be the size of a nibble
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Flags: u8 {
        const TERMINAL = 0b0010;
        const ODD_LEN  = 0b0001;
    }
}

/// A path fragment, one nibble (0..16) per element.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct NibblePath(Vec<u8>);

impl NibblePath {
    pub fn new(nibbles: Vec<u8>) -> Self {
        debug_assert!(nibbles.iter().all(|n| *n < 16));
        Self(nibbles)
    }

    /// Expand a byte key into its nibble sequence, high nibble first.
    pub fn from_bytes(key: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(key.len() * 2);
        for b in key {
            nibbles.push(b >> 4);
            nibbles.push(b & 0xf);
        }
        Self(nibbles)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn at(&self, i: usize) -> u8 {
        self.0[i]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Sub-path starting at `from`.
    pub fn suffix(&self, from: usize) -> Self {
        Self(self.0[from..].to_vec())
    }

    /// Sub-path covering the first `len` nibbles.
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len].to_vec())
    }

    /// Number of leading nibbles shared with `other`.
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// `self` extended by one nibble and then another fragment.
    pub fn join(&self, nibble: u8, rest: &Self) -> Self {
        let mut out = Vec::with_capacity(self.0.len() + 1 + rest.0.len());
        out.extend_from_slice(&self.0);
        out.push(nibble);
        out.extend_from_slice(&rest.0);
        Self(out)
    }

    /// Hex-prefix encoding: parity and terminator flags in the head
    /// nibble, then the path packed two nibbles per byte.
    pub fn encode(&self, term: bool) -> Vec<u8> {
        let mut flags = Flags::empty();
        if term {
            flags |= Flags::TERMINAL;
        }
        let odd = self.0.len() & 1 == 1;
        if odd {
            flags |= Flags::ODD_LEN;
        }
        let mut out = Vec::with_capacity(1 + self.0.len() / 2);
        let rest = if odd {
            out.push(flags.bits() << 4 | self.0[0]);
            &self.0[1..]
        } else {
            out.push(flags.bits() << 4);
            &self.0[..]
        };
        for pair in rest.chunks_exact(2) {
            out.push(pair[0] << 4 | pair[1]);
        }
        out
    }

    /// Inverse of [`Self::encode`]; returns the path and the terminator
    /// flag.
    pub fn decode(raw: &[u8]) -> Result<(Self, bool), ErrorKind> {
        let head = *raw.first().ok_or(ErrorKind::CodecTooShort)?;
        let flags = Flags::from_bits(head >> 4).ok_or(ErrorKind::CodecSizeGarbled)?;
        let mut nibbles = Vec::with_capacity(raw.len() * 2);
        if flags.contains(Flags::ODD_LEN) {
            nibbles.push(head & 0xf);
        } else if head & 0xf != 0 {
            return Err(ErrorKind::CodecSizeGarbled);
        }
        for b in &raw[1..] {
            nibbles.push(b >> 4);
            nibbles.push(b & 0xf);
        }
        if nibbles.len() > MAX_PATH_NIBBLES {
            return Err(ErrorKind::CodecOverflow);
        }
        Ok((Self(nibbles), flags.contains(Flags::TERMINAL)))
    }
}

impl fmt::Debug for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for n in &self.0 {
            write!(f, "{n:x}")?;
        }
        Ok(())
    }
}
