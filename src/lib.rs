//! Compute fs-verity measurements of files, and format them for offline signing.
//!
//! The measurement is the hash of the fs-verity descriptor of a file, the same value the Linux
//! kernel reports through `FS_IOC_MEASURE_VERITY`. [`compute_digest`] produces it from any
//! [`std::io::Read`], [`FsVerityDigest`] is the streaming hasher underneath, and
//! [`signed_digest`] builds the record the kernel's builtin signature support expects a
//! signer to sign.
//!
//! [`digest_files`] ties it together the way the `fsverity-digest` command does.

mod batch;
mod config;
mod digest;
mod error;
mod output;
mod resolve;
mod signed;

pub use batch::*;
pub use config::*;
pub use digest::*;
pub use error::Error;
pub use output::*;
pub use resolve::*;
pub use signed::*;
