//! Structural identity of neurons and connections.
//!
//! Every neuron carries an innovation number that survives graph copies and
//! layer renumbering, and every connection's number is derived from its two
//! endpoints. Population statistics are keyed by these numbers, so a value
//! observed on one member can be matched to the same structural site on another
//! member even after the template network has grown new layers.
//!
//! Innovations are deterministic hashes of the mutation that created them, so
//! two colonies that split the same connection agree on the new neuron's identity
//! without sharing a counter.

/// Innovations below this value are reserved for the fixed input/output neurons.
pub const RESERVED_RANGE: u64 = 1 << 16;

const OUTPUT_BASE: u64 = RESERVED_RANGE / 2;
const CONNECTION_MARKER: u64 = 0x636f_6e6e_6563_7421;
const SPLIT_MARKER: u64 = 0x7370_6c69_745f_6e65;
const ADD_MARKER: u64 = 0x6164_645f_6e65_7572;

/// SplitMix64 finalizer.
#[inline]
const fn avalanche(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Fold `words` into a hash in `[RESERVED_RANGE, u64::MAX]`.
#[inline]
fn fold(words: &[u64]) -> u64 {
    let h = words.iter().fold(0x9e37_79b9_7f4a_7c15_u64, |acc, &w| {
        avalanche(acc ^ w.wrapping_add(0x9e37_79b9_7f4a_7c15))
    });
    RESERVED_RANGE + h % (u64::MAX - RESERVED_RANGE)
}

/// Innovation of the `index`-th input neuron.
#[inline]
#[must_use]
pub const fn input_neuron(index: usize) -> u64 {
    1 + index as u64
}

/// Innovation of the `index`-th output neuron.
#[inline]
#[must_use]
pub const fn output_neuron(index: usize) -> u64 {
    OUTPUT_BASE + index as u64
}

/// Innovation of the connection `from -> to`, given the endpoint innovations.
#[inline]
#[must_use]
pub fn connection(from: u64, to: u64) -> u64 {
    fold(&[CONNECTION_MARKER, from, to])
}

/// Innovation of the neuron created by splitting `connection_innovation`.
#[inline]
#[must_use]
pub fn split_neuron(connection_innovation: u64) -> u64 {
    fold(&[SPLIT_MARKER, connection_innovation])
}

/// Innovation of a neuron added between `from` and `to`.
///
/// `salt` distinguishes repeated additions between the same endpoints.
#[inline]
#[must_use]
pub fn added_neuron(from: u64, to: u64, salt: u64) -> u64 {
    fold(&[ADD_MARKER, from, to, salt])
}
