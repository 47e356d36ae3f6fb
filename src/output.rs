use std::path::Path;

use crate::digest::FileDigest;
use crate::signed::signed_digest;

/// How each file's digest is printed.
///
/// | `compact` | `for_builtin_sig` | line |
/// |---|---|---|
/// | no  | no  | `<alg>:<hex(digest)> <path>` |
/// | no  | yes | `<hex(record)> <path>` |
/// | yes | no  | `<hex(digest)>` |
/// | yes | yes | `<hex(record)>` |
///
/// where `record` is the [`signed_digest`] of the digest.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct OutputFormat {
    pub compact: bool,
    pub for_builtin_sig: bool,
}

impl OutputFormat {
    /// Renders one output line, without the trailing newline.
    pub fn render(&self, digest: &FileDigest, path: &Path) -> String {
        let hex = if self.for_builtin_sig {
            hex::encode(signed_digest(digest))
        } else {
            hex::encode(&digest.bytes)
        };

        if self.compact {
            hex
        } else if self.for_builtin_sig {
            format!("{} {}", hex, path.display())
        } else {
            format!("{}:{} {}", digest.algorithm, hex, path.display())
        }
    }
}
