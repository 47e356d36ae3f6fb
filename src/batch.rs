use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::*;
use crate::digest::{compute_digest, FileDigest};
use crate::error::{Error, Result};
use crate::output::OutputFormat;

/// Opens `path` and computes its fs-verity measurement with `params`.
///
/// The file is closed before this returns, whether or not hashing succeeded.
pub fn measure_file(path: &Path, params: &TreeParameters) -> Result<FileDigest> {
    let file = File::open(path).map_err(|source| Error::Open { path: path.to_owned(), source })?;
    let file_size = file
        .metadata()
        .map_err(|source| Error::FileSize { path: path.to_owned(), source })?
        .len();

    tracing::debug!(path = %path.display(), file_size, "measuring");

    let digest = compute_digest(BufReader::new(file), params, file_size)
        .map_err(|source| Error::Compute { path: path.to_owned(), source })?;

    // the primitive and this crate must agree on the largest digest there is
    assert!(
        digest.size() <= MAX_DIGEST_SIZE,
        "{} digest of {} bytes exceeds MAX_DIGEST_SIZE",
        digest.algorithm,
        digest.size()
    );

    Ok(digest)
}

/// Measures every file in order and writes one line per file to `out`.
///
/// Stops at the first file that fails; nothing is written for it or for any file after it.
/// Each line is flushed as soon as it is written.
pub fn digest_files<W: Write>(paths: &[PathBuf], params: &TreeParameters, format: OutputFormat, out: &mut W) -> Result<()> {
    if paths.is_empty() {
        return Err(Error::NoFiles);
    }

    for path in paths {
        let digest = measure_file(path, params)?;
        writeln!(out, "{}", format.render(&digest, path))?;
        out.flush()?;
    }

    tracing::debug!(files = paths.len(), "all files measured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "3d248ca542a24fc62d1c43b916eae5016878e2533c88238480b26128a1f1af95";

    fn files(dir: &TempDir, contents: &[(&str, &[u8])]) -> Vec<PathBuf> {
        contents
            .iter()
            .map(|(name, data)| {
                let path = dir.path().join(name);
                fs::write(&path, data).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn default_format() {
        let dir = TempDir::new().unwrap();
        let paths = files(&dir, &[("empty", b"")]);
        let mut out = Vec::new();
        digest_files(&paths, &TreeParameters::default(), OutputFormat::default(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("sha256:{} {}\n", EMPTY_SHA256, paths[0].display())
        );
    }

    #[test]
    fn compact_builtin_sig() {
        let dir = TempDir::new().unwrap();
        let paths = files(&dir, &[("empty", b"")]);
        let mut out = Vec::new();
        let format = OutputFormat { compact: true, for_builtin_sig: true };
        digest_files(&paths, &TreeParameters::default(), format, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("465356657269747901002000{}\n", EMPTY_SHA256));
    }

    #[test]
    fn lines_follow_argument_order() {
        let dir = TempDir::new().unwrap();
        let paths = files(&dir, &[("b", b"bbbb"), ("a", b"a"), ("b2", b"bbbb")]);
        let mut out = Vec::new();
        let format = OutputFormat { compact: true, for_builtin_sig: false };
        digest_files(&paths, &TreeParameters::default(), format, &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], lines[2]);
        assert_ne!(lines[0], lines[1]);
        assert!(lines.iter().all(|l| l.len() == 64));
    }

    #[test]
    fn missing_file_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let mut paths = files(&dir, &[("one", b"1"), ("three", b"3")]);
        paths.insert(1, dir.path().join("two"));

        let mut out = Vec::new();
        let err = digest_files(&paths, &TreeParameters::default(), OutputFormat::default(), &mut out).unwrap_err();
        assert!(matches!(&err, Error::Open { path, .. } if path == &paths[1]));
        assert_eq!(err.exit_code(), 1);

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.ends_with(&format!(" {}\n", paths[0].display())));
    }

    #[test]
    fn bad_block_size_is_runtime_failure() {
        let dir = TempDir::new().unwrap();
        let paths = files(&dir, &[("f", b"data")]);
        let params = TreeParameters { block_size: 3000, ..Default::default() };
        let mut out = Vec::new();
        let err = digest_files(&paths, &params, OutputFormat::default(), &mut out).unwrap_err();
        assert!(matches!(err, Error::Compute { .. }));
        assert!(!err.is_usage());
        assert!(out.is_empty());
    }

    #[test]
    fn no_files() {
        let mut out = Vec::new();
        let err = digest_files(&[], &TreeParameters::default(), OutputFormat::default(), &mut out).unwrap_err();
        assert!(matches!(err, Error::NoFiles));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn measure_matches_reader() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x5au8; 9000];
        let paths = files(&dir, &[("f", &data)]);
        let params = TreeParameters { salt: Salt::new(vec![1, 2, 3]), ..Default::default() };
        assert_eq!(
            measure_file(&paths[0], &params).unwrap(),
            compute_digest(&data[..], &params, data.len() as u64).unwrap()
        );
    }
}
