//! Small shared helpers.

pub mod bitset;

pub use bitset::BitSet;
