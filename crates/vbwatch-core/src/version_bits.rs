// VERSION BITS: UNKNOWN-BIT DETECTOR
// Classifies a block version as a bit-vector signal or a legacy number
//
// SAFETY INVARIANTS:
// 1. Classification is a pure function of (version, marker, known bits)
// 2. Versions without the top-bit marker never signal anything
// 3. Only the low 29 bits can be signal bits; the marker bits never are

use serde::{Deserialize, Serialize};

/// Number of signal bits available below the top-bit marker.
pub const VERSION_BITS_COUNT: u8 = 29;

/// Mask covering every signal bit (bits 0..=28).
pub const SIGNAL_BITS_MASK: u32 = (1u32 << VERSION_BITS_COUNT) - 1;

/// Default marker: top three bits equal to `001`.
pub const VERSIONBITS_TOP_BITS: u32 = 0x2000_0000;

/// Default mask selecting the marker bits.
pub const VERSIONBITS_TOP_MASK: u32 = 0xE000_0000;

/// A single block's contribution to the signal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVersionRecord {
    pub height: u64,
    pub version: u32,
}

impl BlockVersionRecord {
    pub fn new(height: u64, version: u32) -> Self {
        BlockVersionRecord { height, version }
    }
}

/// Set of signal bits, stored as a mask over bits 0..=28.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalBits(u32);

impl SignalBits {
    pub const EMPTY: SignalBits = SignalBits(0);

    /// Build from a raw mask; anything above bit 28 is dropped.
    pub fn from_mask(mask: u32) -> Self {
        SignalBits(mask & SIGNAL_BITS_MASK)
    }

    pub fn from_bits<I: IntoIterator<Item = u8>>(bits: I) -> Self {
        let mask = bits
            .into_iter()
            .filter(|bit| *bit < VERSION_BITS_COUNT)
            .fold(0u32, |acc, bit| acc | (1u32 << bit));
        SignalBits(mask)
    }

    pub fn mask(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, bit: u8) -> bool {
        bit < VERSION_BITS_COUNT && self.0 & (1u32 << bit) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Signal bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..VERSION_BITS_COUNT).filter(move |bit| self.contains(*bit))
    }
}

/// Outcome of classifying one block version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSignal {
    /// No top-bit marker: a plain numeric version.
    Legacy,
    /// Bit-vector version whose set bits are all known deployments (or none).
    KnownOnly,
    /// Bit-vector version signaling one or more unknown bits.
    Unknown(SignalBits),
}

impl VersionSignal {
    pub fn unknown_bits(&self) -> SignalBits {
        match self {
            VersionSignal::Unknown(bits) => *bits,
            _ => SignalBits::EMPTY,
        }
    }
}

/// Detects version bits not claimed by any known deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBitDetector {
    top_bits: u32,
    top_bits_mask: u32,
    known: SignalBits,
}

impl UnknownBitDetector {
    pub fn new(top_bits: u32, top_bits_mask: u32, known: SignalBits) -> Self {
        UnknownBitDetector {
            top_bits,
            top_bits_mask,
            known,
        }
    }

    pub fn known_bits(&self) -> SignalBits {
        self.known
    }

    /// True when the version carries the bit-vector marker.
    pub fn is_bit_vector(&self, version: u32) -> bool {
        version & self.top_bits_mask == self.top_bits
    }

    pub fn classify(&self, version: u32) -> VersionSignal {
        if !self.is_bit_vector(version) {
            return VersionSignal::Legacy;
        }

        let unknown = version & SIGNAL_BITS_MASK & !self.known.mask();
        if unknown == 0 {
            VersionSignal::KnownOnly
        } else {
            VersionSignal::Unknown(SignalBits::from_mask(unknown))
        }
    }

    pub fn unknown_bits(&self, version: u32) -> SignalBits {
        self.classify(version).unknown_bits()
    }
}

impl Default for UnknownBitDetector {
    fn default() -> Self {
        Self::new(VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK, SignalBits::EMPTY)
    }
}
