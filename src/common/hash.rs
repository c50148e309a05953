//! Hashing utilities for ringkv
//!
//! Ring positions are 31-bit values derived from BLAKE3 digests. The same
//! function is used on the write path and the route path; a key lands on a
//! node only because both sides agree on its position.

/// Compute the ring position of a name (a key or a virtual-node name).
///
/// Takes the first 4 bytes of the BLAKE3 digest as a little-endian u32 and
/// masks off the sign bit so positions are always non-negative 32-bit values.
pub fn ring_position(name: &str) -> u32 {
    let digest = blake3::hash(name.as_bytes());
    let raw = u32::from_le_bytes(digest.as_bytes()[0..4].try_into().unwrap());
    raw & 0x7fff_ffff
}

/// Virtual-node name for the `i`-th placement of a physical node.
///
/// Port-qualified: the full `host:port` address is hashed, so two nodes on
/// the same host never share ring points.
pub fn virtual_node_name(addr: &str, index: usize) -> String {
    format!("{}#{}", addr, index)
}

/// BLAKE3 digest of a key, used to index the membership filter.
pub fn key_digest(key: &str) -> [u8; 32] {
    *blake3::hash(key.as_bytes()).as_bytes()
}
