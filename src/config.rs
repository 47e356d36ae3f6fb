use num_enum::{IntoPrimitive, TryFromPrimitive};
use sha2::digest::OutputSizeUser;
use sha2::{Sha256, Sha512};

// source for these two: https://www.kernel.org/doc/html/latest/filesystems/fsverity.html#fs-verity-descriptor
pub const MAX_DIGEST_SIZE: usize = 64;
pub const MAX_SALT_SIZE: usize = 32;

// linux has a hardcoded limit, see FS_VERITY_MAX_LEVELS in /fs/verity/fsverity_private.h
pub const MAX_LEVELS: usize = 8;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

// the block size travels as a u32 through the fsverity library and kernel APIs
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize;

// So we can have easy cross references in doc comments
use super::*;

/// Enum of the supported inner hash algorithms.
///
/// The [`Default`] value is `Sha256`, corresponding to the default hash algorithm in the `fsverity` tools.
///
/// This enum supports conversion to string using [`std::fmt::Display`] and from a string using [`parse_display::FromStr`].
///
/// It also supports conversion to integer using [`IntoPrimitive`] and from integer using [`TryFromPrimitive`]. These
/// integer values match the hash algorithm numbering used in the fsverity kernel API, and they are what ends up in
/// the descriptor and in a [`signed_digest`] record.
#[derive(Copy, Clone, PartialEq, Eq, Hash, parse_display::FromStr, parse_display::Display, Debug, TryFromPrimitive, IntoPrimitive)]
#[display(style = "lowercase")]
#[repr(u8)]
pub enum InnerHashAlgorithm {
    /// As string: `sha256`. As number: `FS_VERITY_HASH_ALG_SHA256` from the kernel API.
    Sha256 = 1,

    /// As string: `sha512`. As number: `FS_VERITY_HASH_ALG_SHA512` from the kernel API.
    Sha512 = 2,
}

impl Default for InnerHashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl InnerHashAlgorithm {
    /// All algorithms, in kernel numbering order.
    pub const ALL: [InnerHashAlgorithm; 2] = [InnerHashAlgorithm::Sha256, InnerHashAlgorithm::Sha512];

    /// Size in bytes of the digests this algorithm produces.
    pub fn digest_size(self) -> usize {
        match self {
            InnerHashAlgorithm::Sha256 => Sha256::output_size(),
            InnerHashAlgorithm::Sha512 => Sha512::output_size(),
        }
    }
}

/// A salt which is known to contain at least one byte.
///
/// "No salt" is represented as `Option::<Salt>::None`, never as an empty `Salt`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Salt(Box<[u8]>);

impl Salt {
    /// Returns `None` for empty input.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() { None } else { Some(Self(bytes)) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The Merkle tree parameters shared by every file in a batch.
///
/// The file size is deliberately not part of this struct, it is passed to [`compute_digest`] per call.
///
/// Values produced by [`TreeParameters::resolve`] are only syntactically checked. Whether the block size and salt
/// are acceptable for the chosen algorithm is decided by [`compute_digest`].
///
/// Converting unchecked parameters into a `Box<dyn DynDigestWrite>` panics the same way
/// [`FsVerityDigest::new_with_salt_and_block_size`] does.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TreeParameters {
    pub hash_algorithm: InnerHashAlgorithm,
    pub block_size: usize,
    pub salt: Option<Salt>,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            hash_algorithm: Default::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            salt: None,
        }
    }
}

impl TreeParameters {
    /// The salt bytes, empty if there is no salt.
    pub fn salt_bytes(&self) -> &[u8] {
        self.salt.as_ref().map(Salt::as_bytes).unwrap_or_default()
    }
}

// the inner hash is selected at runtime; compute_digest checks the parameters before converting
impl From<&TreeParameters> for Box<dyn DynDigestWrite> {
    fn from(params: &TreeParameters) -> Self {
        let salt: Box<[u8]> = params.salt_bytes().into();
        match params.hash_algorithm {
            InnerHashAlgorithm::Sha256 => Box::new(crate::FsVeritySha256::new_with_salt_and_block_size(salt, params.block_size)),
            InnerHashAlgorithm::Sha512 => Box::new(crate::FsVeritySha512::new_with_salt_and_block_size(salt, params.block_size)),
        }
    }
}
