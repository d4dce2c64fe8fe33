//! One-byte rolling checksum (Pearson hash) used as every blobette's trailer.
//!
//! `new_state = PEARSON_TABLE[state ^ byte]`, folded left to right from `0`.
//! The table is frozen: changing a single entry breaks every existing
//! container file.

/// Canonical 256-entry permutation of `0..=255`.
#[rustfmt::skip]
pub const PEARSON_TABLE: [u8; 256] = [
    241,  18, 181, 164,  92, 237, 100, 216, 183, 107,   2,  12,  43, 246,  90, 143,
    251,  49, 228, 134, 215,  20, 193, 172, 140, 227, 148, 118,  57,  72, 119, 174,
     78,  14,  97,   3, 208, 252,  11, 195,  31,  28, 121, 206, 149,  23,  83, 154,
    223, 109,  89,  10, 178, 243,  42, 194, 221, 131, 212,  94, 205, 240, 161,   7,
     62, 214, 222, 219,   1,  84,  95,  58, 103,  60,  33, 111, 188, 218, 186, 166,
    146, 189, 201, 155,  68, 145,  44, 163,  69, 196, 115, 231,  61, 157, 165, 213,
    139, 112, 173, 191, 142,  88, 106, 250,   8, 127,  26, 126,   0,  96,  52, 182,
    113,  38, 242,  48, 204, 160,  15,  54, 158, 192,  81, 125, 245, 239, 101,  17,
    136, 110,  24,  53, 132, 117, 102, 153, 226,   4, 203, 199,  16, 249, 211, 167,
     55, 255, 254, 116, 122,  13, 236,  93, 144,  86,  59,  76, 150, 162, 207,  77,
    176,  32, 124, 171,  29,  45,  30,  67, 184,  51,  22, 105, 170, 253, 180, 187,
    130, 156,  98, 159, 220,  40, 133, 135, 114, 147,  75,  73, 210,  21, 129,  39,
    138,  91,  41, 235,  47, 185,   9,  82,  64,  87, 244,  50,  74, 233, 175, 247,
    120,   6, 169,  85,  66, 104,  80,  71, 230, 152, 225,  34, 248, 198,  63, 168,
    179, 141, 137,   5,  19,  79, 232, 128, 202,  46,  70,  37, 209, 217, 123,  27,
    177,  25,  56,  65, 229,  36, 197, 234, 108,  35, 151, 238, 200, 224,  99, 190,
];

/// Advance the hash state by one byte.
#[inline]
pub fn hash_byte(state: u8, byte: u8) -> u8 {
    PEARSON_TABLE[(state ^ byte) as usize]
}

/// Fold `bytes` into `state`.
#[inline]
pub fn hash_bytes(state: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(state, |s, &b| hash_byte(s, b))
}

/// Accumulated checksum of a record in progress.
///
/// A plain value: every byte-consuming step takes the current `Checksum`
/// and hands back the next one, so there is never any shared hash state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checksum(u8);

impl Checksum {
    pub const fn new() -> Self {
        Checksum(0)
    }

    #[must_use]
    pub fn update(self, bytes: &[u8]) -> Self {
        Checksum(hash_bytes(self.0, bytes))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}
