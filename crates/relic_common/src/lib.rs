//! Shared building blocks for the relic compiler cache: the content digest
//! type, the streaming hasher it is produced by, and path utilities used to
//! make cache entries portable across build trees.

pub mod hash;
pub mod paths;

pub use hash::{hash_file, Digest, DigestHasher, DIGEST_LEN};
pub use paths::{is_precompiled_header, PathRewriter};

use std::collections::HashMap;

/// The set of include files observed during one compilation, mapping each
/// (rewritten) path to the digest of its content. Iteration order carries no
/// meaning.
pub type IncludeSet = HashMap<String, Digest>;
