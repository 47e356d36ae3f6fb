//! Turning raw option strings into [`TreeParameters`].
//!
//! Only syntax is checked here. Whether a block size or salt length is acceptable for the chosen
//! hash algorithm is up to [`compute_digest`](crate::compute_digest).

use crate::config::*;
use crate::error::{Error, Result};

/// The tree-related options as they were given on the command line. `None` means "not given".
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct TreeOptions {
    pub hash_alg: Option<String>,
    pub block_size: Option<String>,
    pub salt: Option<String>,
}

/// Looks up a hash algorithm by its fs-verity name, e.g. `sha256`.
pub fn parse_hash_alg(arg: &str) -> Result<InnerHashAlgorithm> {
    arg.parse().map_err(|_| Error::UnknownHashAlgorithm(arg.to_owned()))
}

/// Parses a Merkle tree block size in bytes. It must be positive and below `i32::MAX`;
/// powers of two are not enforced here.
pub fn parse_block_size(arg: &str) -> Result<usize> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 && n < i32::MAX as usize => Ok(n),
        _ => Err(Error::InvalidBlockSize(arg.to_owned())),
    }
}

/// Parses a salt given as hex.
///
/// An empty argument is rejected like any other malformed salt, so that "no salt" can only be
/// expressed by leaving the option out.
pub fn parse_salt(arg: &str) -> Result<Salt> {
    hex::decode(arg)
        .ok()
        .and_then(Salt::new)
        .ok_or_else(|| Error::InvalidSalt(arg.to_owned()))
}

impl TreeParameters {
    /// Builds the parameters for a batch, using the fsverity defaults for anything not given.
    pub fn resolve(options: &TreeOptions) -> Result<Self> {
        let mut params = TreeParameters::default();
        if let Some(arg) = &options.hash_alg {
            params.hash_algorithm = parse_hash_alg(arg)?;
        }
        if let Some(arg) = &options.block_size {
            params.block_size = parse_block_size(arg)?;
        }
        if let Some(arg) = &options.salt {
            params.salt = Some(parse_salt(arg)?);
        }
        tracing::debug!(
            hash_alg = %params.hash_algorithm,
            block_size = params.block_size,
            salt_size = params.salt_bytes().len(),
            "resolved tree parameters"
        );
        Ok(params)
    }
}
