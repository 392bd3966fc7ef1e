//! Hash-interned names for the depotfs content index
//!
//! Every path component that enters the content index is turned into a
//! [`Name`]: a 64-bit FNV-1a hash of its bytes. Names compare, order and hash
//! by that value alone, so directory lookups never touch string data.
//!
//! The original text is kept once, in a [`NameResolver`], for names that were
//! registered. A process-wide resolver is available through [`global`], with
//! an explicit lifecycle ([`init_global`], [`install_global`],
//! [`shutdown_global`]); components that want isolation take an
//! `Arc<NameResolver>` instead.
//!
//! # Example
//!
//! ```
//! use depotfs_name::{Name, NameResolver};
//!
//! let resolver = NameResolver::new();
//! let name = Name::new_in("base", &resolver);
//!
//! assert_eq!(name, Name::from("base"));
//! assert_eq!(resolver.resolve_str(name).as_deref(), Some("base"));
//! ```
//!
//! Hash collisions are not defended against: two byte strings with the same
//! 64-bit hash are the same name. The resolver logs a warning when it sees
//! one and keeps the first text it was given.

#![warn(missing_docs)]

pub mod fnv;
pub mod name;
pub mod resolver;

pub use name::Name;
pub use resolver::{
    NameResolver, ResolverStats, global, hash_of, init_global, install_global, shutdown_global,
};
