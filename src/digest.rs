use sha2::digest;
use digest::core_api::BlockSizeUser;
use digest::{FixedOutput, FixedOutputReset, HashMarker, OutputSizeUser, Reset, Update};
use sha2::{Sha256, Sha512};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::config::*;

static ZEROES: [u8; 128] = [0u8; 128];

/// Reasons the Merkle tree primitive refuses to produce a digest.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unsupported block size {block_size} for {algorithm} (must be a power of two, at least {minimum} and at most 2^31)")]
    UnsupportedBlockSize { block_size: usize, algorithm: InnerHashAlgorithm, minimum: usize },
    #[error("salt is {0} bytes, at most 32 are allowed")]
    SaltTooLong(usize),
    #[error("file of {file_size} bytes needs a Merkle tree with more than 8 levels")]
    TooManyLevels { file_size: u64 },
    #[error("file ended after {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },
    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// A finished fs-verity measurement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FileDigest {
    pub algorithm: InnerHashAlgorithm,
    pub bytes: Box<[u8]>,
}

impl FileDigest {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Trait for the inner hash algorithms we support (currently implemented for [`Sha256`] and [`Sha512`]).
///
/// It adds some information we need, some useful functions, and declares all the trait bounds we need
/// so we have them in one place.
pub trait InnerHash: Update + FixedOutputReset + Clone + Default + BlockSizeUser + HashMarker {
    /// The value of [`InnerHashAlgorithm`] that corresponds to this hash algorithm.
    const VERITY_HASH_ALGORITHM: InnerHashAlgorithm;

    /// Update the hash state with given data, padded with zero bytes to the given size.
    /// This will panic if `data.len() > padded_size`.
    fn update_padded(&mut self, data: &[u8], padded_size: usize) {
        self.update(data);
        self.update_zeroes(padded_size.checked_sub(data.len()).unwrap());
    }

    /// Update the hash state with the given amount of zero bytes
    fn update_zeroes(&mut self, amount: usize) {
        let (quotient, remainder) = (amount / ZEROES.len(), amount % ZEROES.len());
        if remainder != 0 { self.update(&ZEROES[..remainder]); }
        for _ in 0..quotient { self.update(&ZEROES); }
    }

    /// The size in bytes of the digests produced by this hash function
    fn digest_output_size() -> usize {
        <Self as OutputSizeUser>::output_size()
    }

    /// The native input block size of this hash function (in bytes)
    fn digest_block_size() -> usize {
        <Self as BlockSizeUser>::block_size()
    }
}

impl InnerHash for Sha256 {
    const VERITY_HASH_ALGORITHM: InnerHashAlgorithm = InnerHashAlgorithm::Sha256;
}

impl InnerHash for Sha512 {
    const VERITY_HASH_ALGORITHM: InnerHashAlgorithm = InnerHashAlgorithm::Sha512;
}

/// Logically this represents a fixed-size block of data to be hashed (padded with zeroes if needed.)
/// It actually remembers only the hash state and how many more bytes are needed, not the data itself.
#[derive(Clone)]
struct FixedSizeBlock<D> where D: InnerHash {
    inner: D,
    remaining: usize,
}

impl<D> FixedSizeBlock<D> where D: InnerHash {
    fn new(inner: D, block_size: usize) -> Self {
        Self { inner, remaining: block_size }
    }

    /// Appends data to block, panics if it doesn't fit.
    fn append(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.remaining = self.remaining.checked_sub(data.len()).unwrap();
    }

    /// Fills the remaining space in the block with zero bytes.
    fn fill_to_end(&mut self) {
        self.inner.update_zeroes(self.remaining);
        self.remaining = 0;
    }

    /// Appends as much as possible to the block, returning the data that wouldn't fit.
    fn overflowing_append<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        let (a, b) = data.split_at(self.remaining.min(data.len()));
        self.append(a);
        b
    }

    // Returns the final hash of the block, consuming it.
    fn finalize_into(mut self, dest: &mut digest::Output<D>) {
        self.fill_to_end();
        self.inner.finalize_into(dest);
    }

    /// Return the final hash of the block, and then reset its state to a copy of the given block.
    fn finalize_into_and_reset_from(&mut self, dest: &mut digest::Output<D>, template: &Self) {
        std::mem::replace(self, template.clone()).finalize_into(dest);
    }
}

/// Streaming fs-verity measurement over the inner hash `D`, with salt storage `S`.
///
/// Feed it file contents through [`Update`] or [`Write`], then finalize it like any other RustCrypto hash.
/// The result is the hash of the fs-verity descriptor, which is what `FS_IOC_MEASURE_VERITY` reports.
#[derive(Clone)]
pub struct FsVerityDigest<D=Sha256, S=[u8; 0]> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    block_size: usize,
    /// We have to keep the actual salt around (not just its digest) as it is needed for the descriptor.
    salt: S,
    /// Cloned whenever we need a new empty block.
    empty_block: FixedSizeBlock<D>,
    /// The currently relevant hierarchy of blocks in the Merkle tree.
    levels: Vec<FixedSizeBlock<D>>,
    /// Number of input bytes seen so far.
    total_size: u64,
}

/// Returns an instance of the hash algorithm which has been fed the given salt,
/// zero-padded to a multiple of the hash algorithm's input block size.
fn salted_digest<D: InnerHash>(salt: &[u8]) -> D {
    let mut tmp = D::default();
    // in practice this will run either 0 or 1 iterations, due to low MAX_SALT_SIZE
    for chunk in salt.chunks(D::digest_block_size()) {
        tmp.update_padded(chunk, D::digest_block_size());
    }
    tmp
}

impl<D> FsVerityDigest<D> where D: InnerHash {

    /// Creates a new instance of `FsVerityDigest` with an empty salt and the default block size.
    pub fn new() -> Self {
        Self::new_with_salt(Default::default())
    }
}

impl<D, S> FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {

    pub fn inner_hash_algorithm(&self) -> InnerHashAlgorithm {
        D::VERITY_HASH_ALGORITHM
    }

    /// Creates a new instance of `FsVerityDigest` with the given salt. The salt will be mixed
    /// into every Merkle tree block hash, and it is recorded in the descriptor.
    ///
    /// This will panic if the salt is longer than [`MAX_SALT_SIZE`] bytes.
    pub fn new_with_salt(salt: S) -> Self {
        Self::new_with_salt_and_block_size(salt, DEFAULT_BLOCK_SIZE)
    }

    /// Creates a new instance of `FsVerityDigest` with the given salt and a custom block size.
    ///
    /// The block size must be a power of two, and it must be at least twice the size of the
    /// digests produced by the inner hash algorithm. This will panic otherwise, or if the salt is
    /// longer than [`MAX_SALT_SIZE`] bytes. Use [`compute_digest`] to get errors instead.
    pub fn new_with_salt_and_block_size(salt: S, block_size: usize) -> Self {
        assert!(salt.as_ref().len() <= MAX_SALT_SIZE);
        assert!(block_size.is_power_of_two());
        assert!(block_size >= D::digest_output_size() * 2);
        assert!(D::digest_output_size() <= MAX_DIGEST_SIZE);

        let empty_block = FixedSizeBlock::new(salted_digest(salt.as_ref()), block_size);

        Self {
            block_size,
            salt,
            empty_block,
            levels: vec![],
            total_size: 0,
        }
    }

    /// Flushes every pending tree level and writes the hash of the descriptor to `out`.
    /// Leaves `self` without any levels; callers reset it or drop it afterwards.
    fn finalize_measurement(&mut self, out: &mut digest::Output<D>) {

        // flush all levels bottom to top. each level produces exactly one more digest for the next
        // level (see the invariants in update), and the last one produced is the root hash.
        // zero length files are defined to have a root hash of all zeroes, which is what we get
        // when there are no levels at all.
        let mut root_hash: digest::Output<D> = Default::default();
        let mut overflow: &[u8] = &[];
        for mut level in self.levels.drain(..) {
            level.append(overflow);
            level.finalize_into(&mut root_hash);
            overflow = &root_hash;
        }

        tracing::trace!(root_hash = %hex::encode(&root_hash), size = self.total_size, "merkle tree flushed");

        // the root hash, file size, hash algorithm, and salt are combined into a structure
        // called a 'verity descriptor'. the (unsalted) hash of this data is the final result,
        // and it is called a 'verity measurement'.
        // https://www.kernel.org/doc/html/latest/filesystems/fsverity.html#fs-verity-descriptor
        let salt = self.salt.as_ref();
        let mut descriptor = D::default();
        descriptor.update(&[1]);
        descriptor.update(&[u8::from(D::VERITY_HASH_ALGORITHM)]);
        descriptor.update(&[self.block_size.trailing_zeros() as u8]);
        descriptor.update(&[salt.len() as u8]);
        descriptor.update(&[0; 4]);
        descriptor.update(&self.total_size.to_le_bytes());
        descriptor.update_padded(&root_hash, MAX_DIGEST_SIZE);
        descriptor.update_padded(salt, MAX_SALT_SIZE);
        descriptor.update_zeroes(144);

        descriptor.finalize_into(out);
    }
}

impl<D, S> Default for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    fn default() -> Self { Self::new_with_salt(Default::default()) }
}

impl<D, S> OutputSizeUser for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    type OutputSize = D::OutputSize;
}

impl<D, S> HashMarker for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {}

impl<D, S> Update for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {

    fn update(&mut self, data: &[u8]) {
        // self.levels represents the hierarchy of currently-relevant Merkle tree blocks.
        // level 0 is filled with input data. when the block at level n fills up, the hash of its
        // contents is appended to the block at level n + 1, and it is reset to an empty state.
        // this process can repeat if that causes the next level to fill up and so on.
        //
        // invariants:
        // - level 0 is (once it's created) never empty. it *may* be completely full.
        // - levels 1..n are never full, they always have room for one more hash. they *may* be empty.
        // - overflow is never larger than self.block_size
        //
        // the asymmetry between level 0 and the others makes the final flush simple: each level
        // produces exactly one more digest for the next level.
        self.total_size += data.len() as u64;

        for chunk in data.chunks(self.block_size) {

            let mut keep_space_for_one_digest = false;
            let mut last_digest: digest::Output<D>;
            let mut overflow = chunk;  // input data is treated as overflow into level[0]
            for level in self.levels.iter_mut() {

                // only input data (level 0) is ever split across two blocks. block sizes and digest
                // sizes are powers of two, and digest levels always have room for one more digest.
                overflow = level.overflowing_append(overflow);
                if keep_space_for_one_digest {
                    if level.remaining >= D::digest_output_size() {
                        assert!(overflow.is_empty());
                        break;
                    }
                } else if overflow.is_empty() {
                    // done if there was no overflow, even if the block is now totally full
                    break;
                }

                // can't write directly into last_digest because overflow is (sometimes) a
                // reference to last_digest.
                let mut tmp: digest::Output<D> = Default::default();
                level.finalize_into_and_reset_from(&mut tmp, &self.empty_block);
                level.append(overflow);
                last_digest = tmp;

                overflow = &last_digest;

                keep_space_for_one_digest = true;  // only false for level[0]
            }

            // if there is still overflow, add a new top level to the Merkle tree
            if !overflow.is_empty() {
                // level 0 holds data, so up to MAX_LEVELS hash levels sit on top of it
                assert!(self.levels.len() <= MAX_LEVELS);

                let mut level = self.empty_block.clone();
                level.append(overflow);
                self.levels.push(level);
            }
        }
    }
}

impl<D, S> FixedOutput for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    fn finalize_into(mut self, out: &mut digest::Output<Self>) {
        self.finalize_measurement(out);
    }
}

impl<D, S> FixedOutputReset for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    fn finalize_into_reset(&mut self, out: &mut digest::Output<Self>) {
        self.finalize_measurement(out);
        Reset::reset(self);
    }
}

/// Resets to a blank state, but with the same Merkle tree block size and salt
impl<D, S> Reset for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    fn reset(&mut self) {
        self.levels.clear();
        self.total_size = 0;
    }
}

impl<D, S> Write for FsVerityDigest<D, S> where D: InnerHash, S: AsRef<[u8]> + Clone + Default {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Update::update(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// For trait objects of [`FsVerityDigest`], when the inner hash is not statically known (see [`TreeParameters`])
pub trait DynDigestWrite: digest::DynDigest + Write {}
impl<D: InnerHash + 'static, S: AsRef<[u8]> + Clone + Default + 'static> DynDigestWrite for FsVerityDigest<D, S> {}

/// Alias for `FsVerityDigest<Sha256>`
pub type FsVeritySha256<S> = FsVerityDigest<Sha256, S>;

/// Alias for `FsVerityDigest<Sha512>`
pub type FsVeritySha512<S> = FsVerityDigest<Sha512, S>;

/// Number of hash levels above the data blocks for a file of `file_size` bytes.
fn tree_levels(file_size: u64, block_size: usize, digest_size: usize) -> usize {
    let hashes_per_block = (block_size / digest_size) as u64;
    let mut blocks = file_size.div_ceil(block_size as u64);
    let mut levels = 0;
    while blocks > 1 {
        blocks = blocks.div_ceil(hashes_per_block);
        levels += 1;
    }
    levels
}

fn check_parameters(params: &TreeParameters, file_size: u64) -> Result<(), TreeError> {
    let algorithm = params.hash_algorithm;
    let minimum = algorithm.digest_size() * 2;
    if !params.block_size.is_power_of_two() || params.block_size < minimum || params.block_size > MAX_BLOCK_SIZE {
        return Err(TreeError::UnsupportedBlockSize { block_size: params.block_size, algorithm, minimum });
    }
    let salt_size = params.salt_bytes().len();
    if salt_size > MAX_SALT_SIZE {
        return Err(TreeError::SaltTooLong(salt_size));
    }
    let levels = tree_levels(file_size, params.block_size, algorithm.digest_size());
    if levels > MAX_LEVELS {
        return Err(TreeError::TooManyLevels { file_size });
    }
    tracing::trace!(levels, file_size, "merkle tree shape");
    Ok(())
}

/// Computes the fs-verity measurement of exactly `file_size` bytes read from `reader`.
///
/// The parameters are checked before anything is read. A reader that runs out before
/// `file_size` bytes is an error; anything after `file_size` bytes is left unread.
pub fn compute_digest<R: Read>(reader: R, params: &TreeParameters, file_size: u64) -> Result<FileDigest, TreeError> {
    use digest::DynDigest;

    check_parameters(params, file_size)?;

    let mut hasher: Box<dyn DynDigestWrite> = params.into();
    let copied = io::copy(&mut reader.take(file_size), &mut hasher)?;
    if copied != file_size {
        return Err(TreeError::Truncated { expected: file_size, actual: copied });
    }

    Ok(FileDigest {
        algorithm: params.hash_algorithm,
        bytes: hasher.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const EMPTY_SHA256: &str = "3d248ca542a24fc62d1c43b916eae5016878e2533c88238480b26128a1f1af95";

    fn params(hash_algorithm: InnerHashAlgorithm, block_size: usize, salt: &[u8]) -> TreeParameters {
        TreeParameters { hash_algorithm, block_size, salt: Salt::new(salt.to_vec()) }
    }

    fn digest_of(data: &[u8], params: &TreeParameters) -> FileDigest {
        compute_digest(Cursor::new(data), params, data.len() as u64).unwrap()
    }

    #[test]
    fn empty_file() {
        let out = digest_of(&[], &TreeParameters::default());
        assert_eq!(out.algorithm, InnerHashAlgorithm::Sha256);
        assert_eq!(hex::encode(&out.bytes), EMPTY_SHA256);

        let mut d = FsVeritySha256::<[u8; 0]>::new();
        d.write_all(&[]).unwrap();
        assert_eq!(hex::encode(d.finalize_fixed()), EMPTY_SHA256);
    }

    fn pattern(len: u32) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 13) as u8).collect()
    }

    #[test]
    fn known_answers() {
        // computed with an independent implementation of the kernel's fsverity descriptor hashing
        let testcases = [
            (
                vec![0xa5u8; 4097],
                params(InnerHashAlgorithm::Sha256, 4096, &[]),
                "9dcc6b2a853b01cc0fe9caedf5185477b5453d1ae4968eaa2fa6355d3e897db5",
            ),
            (
                pattern(20_000),
                params(InnerHashAlgorithm::Sha256, 1024, b"pepper"),
                "10c3a15be03196aa5ade59f6b4ab95582bf00881e080791040b7a3df9d9e12e4",
            ),
            (
                pattern(70_000),
                params(InnerHashAlgorithm::Sha256, 1024, &[]),
                "2dc46255cc8f1c883361c3bad47dca63c30e1497b3a7b61284d19e2d37e1698f",
            ),
            (
                pattern(10_000),
                params(InnerHashAlgorithm::Sha512, 4096, &[0x00, 0x11, 0x22, 0x33, 0x44]),
                "2f3b4042893bde66d9d95442354b4a9ac689c2890025282555cbe0f52a2b956d\
                 258634c688cda2a2b4991321e8dc4c291fa64f10ab867ebc7540b3366d5b10c1",
            ),
        ];

        for (data, params, expected) in testcases.iter() {
            let out = digest_of(data, params);
            assert_eq!(out.algorithm, params.hash_algorithm);
            assert_eq!(hex::encode(&out.bytes), *expected, "{} bytes, {:?}", data.len(), params);
        }
    }

    #[test]
    fn static_hasher_reports_algorithm() {
        let mut d = FsVeritySha512::new_with_salt_and_block_size([0x00u8, 0x11, 0x22, 0x33, 0x44], 4096);
        assert_eq!(d.inner_hash_algorithm(), InnerHashAlgorithm::Sha512);
        d.write_all(&pattern(10_000)).unwrap();
        assert_eq!(
            hex::encode(d.finalize_fixed()),
            "2f3b4042893bde66d9d95442354b4a9ac689c2890025282555cbe0f52a2b956d\
             258634c688cda2a2b4991321e8dc4c291fa64f10ab867ebc7540b3366d5b10c1"
        );
        assert_eq!(FsVeritySha256::<[u8; 0]>::new().inner_hash_algorithm(), InnerHashAlgorithm::Sha256);
    }

    #[test]
    fn chunking_does_not_matter() {
        use sha2::digest::DynDigest;

        // crosses several block and level boundaries with a small block size
        let data = pattern(20_000);
        let params = params(InnerHashAlgorithm::Sha256, 1024, b"pepper");
        let expected = digest_of(&data, &params);

        for chunk_size in [1, 31, 1024, 1025, 4096] {
            let mut d: Box<dyn DynDigestWrite> = (&params).into();
            for chunk in data.chunks(chunk_size) {
                d.write_all(chunk).unwrap();
            }
            assert_eq!(d.finalize(), expected.bytes, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn deterministic_and_size_sensitive() {
        let data = vec![0xa5u8; 4097];
        let params = TreeParameters::default();
        let a = digest_of(&data, &params);
        let b = digest_of(&data, &params);
        assert_eq!(a, b);
        assert_eq!(a.size(), 32);

        // trailing zero bytes are not the same as padding, because the size is in the descriptor
        let mut padded = data.clone();
        padded.push(0);
        assert_ne!(digest_of(&padded, &params), a);
    }

    #[test]
    fn salt_sensitivity() {
        let data = b"hello fs-verity";
        let none = digest_of(data, &params(InnerHashAlgorithm::Sha256, 4096, &[]));
        let zeroes = digest_of(data, &params(InnerHashAlgorithm::Sha256, 4096, &[0; 4]));
        let one = digest_of(data, &params(InnerHashAlgorithm::Sha256, 4096, &[0, 0, 1, 0]));
        assert_ne!(none, zeroes);
        assert_ne!(zeroes, one);
    }

    #[test]
    fn sha512() {
        let data = vec![1u8; 10_000];
        let out = digest_of(&data, &params(InnerHashAlgorithm::Sha512, 4096, &[]));
        assert_eq!(out.algorithm, InnerHashAlgorithm::Sha512);
        assert_eq!(out.size(), 64);
        assert_ne!(&out.bytes[..32], &digest_of(&data, &TreeParameters::default()).bytes[..]);
    }

    #[test]
    fn reset_reuses_salt_and_block_size() {
        let mut d = FsVeritySha256::new_with_salt_and_block_size(Box::<[u8]>::from(&b"salt"[..]), 1024);
        Update::update(&mut d, &[7u8; 3000]);
        let first = d.finalize_fixed_reset();
        Update::update(&mut d, &[7u8; 3000]);
        assert_eq!(d.finalize_fixed(), first);
    }

    #[test]
    fn rejects_bad_parameters() {
        let data = [0u8; 10];
        let err = |p: &TreeParameters| compute_digest(Cursor::new(&data[..]), p, data.len() as u64).unwrap_err();

        assert!(matches!(err(&params(InnerHashAlgorithm::Sha256, 4095, &[])), TreeError::UnsupportedBlockSize { .. }));
        assert!(matches!(err(&params(InnerHashAlgorithm::Sha256, 32, &[])), TreeError::UnsupportedBlockSize { .. }));
        assert!(matches!(err(&params(InnerHashAlgorithm::Sha512, 64, &[])), TreeError::UnsupportedBlockSize { .. }));
        // rejected before any zero padding of a huge block could start
        assert!(matches!(err(&params(InnerHashAlgorithm::Sha256, 1 << 40, &[])), TreeError::UnsupportedBlockSize { .. }));
        assert!(matches!(err(&params(InnerHashAlgorithm::Sha256, 4096, &[1; 33])), TreeError::SaltTooLong(33)));

        // 64 byte blocks hold two sha256 digests, so every level halves the block count
        let p = params(InnerHashAlgorithm::Sha256, 64, &[]);
        assert!(matches!(
            compute_digest(io::empty(), &p, 64 * (1 << 9)).unwrap_err(),
            TreeError::TooManyLevels { .. }
        ));
        assert_eq!(tree_levels(64 * (1 << 8), 64, 32), 8);
        assert_eq!(tree_levels(0, 4096, 32), 0);
        assert_eq!(tree_levels(4096, 4096, 32), 0);
        assert_eq!(tree_levels(4097, 4096, 32), 1);
    }

    #[test]
    fn short_reader_is_truncated() {
        let err = compute_digest(Cursor::new(vec![0u8; 100]), &TreeParameters::default(), 200).unwrap_err();
        assert!(matches!(err, TreeError::Truncated { expected: 200, actual: 100 }));

        // extra bytes past file_size are ignored
        let long = compute_digest(Cursor::new(vec![0u8; 200]), &TreeParameters::default(), 100).unwrap();
        assert_eq!(long, digest_of(&[0u8; 100], &TreeParameters::default()));
    }
}
