//! FNV-1a hashing for name interning
//!
//! Every interned name is identified by the 64-bit FNV-1a hash of its raw
//! bytes. The 32-bit variant keys the resolver's short-hash reverse map.
//!
//! Both functions are `const` so well-known names can be hashed at compile
//! time.

/// FNV-1a 64-bit offset basis
pub const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime
pub const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 32-bit offset basis
pub const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a 32-bit prime
pub const FNV32_PRIME: u32 = 0x0100_0193;

/// Compute the 64-bit FNV-1a hash of `data`
///
/// # Examples
///
/// ```
/// use depotfs_name::fnv::fnv1a64;
///
/// assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
/// ```
pub const fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
        i += 1;
    }
    hash
}

/// Compute the 32-bit FNV-1a hash of `data`
pub const fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
        i += 1;
    }
    hash
}
