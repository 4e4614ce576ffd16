//! Value types shared by every layer of a bricks archive: content hashes,
//! brick references and the signed records appended to the anchoring chain.

pub mod anchor;
pub mod brick;
pub mod hash;
pub mod ssi;

pub use anchor::{AnchorId, AnchorValue};
pub use brick::{BrickRef, HashLink};
pub use hash::Hash;
pub use ssi::{KeySsi, SeedSsi};
