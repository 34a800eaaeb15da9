//! Pluggable compression codecs and the post-store compression pass.
//!
//! Two uses share one codec registry:
//!
//! - **Transparent stream I/O**: [`auto_detect_reader`] and [`auto_detect_writer`]
//!   wrap the JSONL input and the stream sink's output file, so
//!   `fr-extract.jsonl.gz` can be read and `out.jsonl.zst` written without any
//!   extra flags.
//! - **Whole-file compression**: [`compress_store`] turns a finished SQLite store
//!   into a single compressed artifact and removes the original.
//!
//! ## Built-in Codecs
//!
//! When enabled via feature flags, the following codecs are available:
//! - **Gzip** (`.gz`) - via `flate2` crate (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` crate (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`) - via `bzip2` crate (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) - via `xz2` crate (feature: `compression-xz`)
//!
//! ## Custom Codecs
//!
//! ```
//! use dictfilter::io::compression::{CompressionCodec, FinishWrite};
//! use std::io::{Read, Result, Write};
//!
//! struct Identity;
//!
//! impl CompressionCodec for Identity {
//!     fn name(&self) -> &str { "identity" }
//!     fn extensions(&self) -> &[&str] { &[".id"] }
//!     fn magic_bytes(&self) -> Option<&[u8]> { None }
//!     fn wrap_reader_dyn(&self, r: Box<dyn Read>) -> Result<Box<dyn Read>> { Ok(r) }
//!     fn wrap_writer_dyn(&self, w: Box<dyn Write>) -> Result<Box<dyn FinishWrite>> {
//!         Ok(Box::new(w))
//!     }
//!     fn compress_bytes(&self, data: &[u8]) -> Result<Vec<u8>> { Ok(data.to_vec()) }
//! }
//! ```
//!
//! ## Artifact Safety
//!
//! [`compress_store`] writes the artifact to a temporary file in the target
//! directory, syncs it, and renames it into place. The original store is removed
//! only after the rename succeeded, so a failure at any earlier step leaves the
//! uncompressed store exactly as it was.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Global codec registry for pluggable compression support.
static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

/// Codec used by the store compression pass when none is named.
pub const DEFAULT_STORE_CODEC: &str = "zstd";

fn init_registry() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

fn get_registry() -> Vec<Arc<dyn CompressionCodec>> {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).clone()
}

/// Register a custom compression codec globally.
///
/// Registered codecs take part in extension and magic-byte detection and can be
/// looked up by name with [`codec_by_name`].
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).push(codec);
}

/// Pluggable compression codec trait.
///
/// Implementations must be `Send + Sync` as they live in a global registry.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// File extensions associated with this codec, leading dot, lowercase.
    /// The first one is the suffix appended to compressed store artifacts.
    fn extensions(&self) -> &[&str];

    /// Optional magic byte signature for content-based detection.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>>;

    /// Wrap a writer with compression.
    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn FinishWrite>>;

    /// Compress a whole buffer in one call.
    fn compress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Decompress a whole buffer in one call.
    fn decompress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut reader = self.wrap_reader_dyn(Box::new(Cursor::new(data.to_vec())))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// A writer whose output is only complete once it is finished.
///
/// Compressing writers emit their trailer in [`FinishWrite::finish_stream`];
/// relying on drop instead would lose any error raised while writing it.
pub trait FinishWrite: Write {
    /// Write any trailer, flush everything underneath and release the writer.
    fn finish_stream(self: Box<Self>) -> std::io::Result<()>;
}

impl<W: Write> FinishWrite for BufWriter<W> {
    fn finish_stream(mut self: Box<Self>) -> std::io::Result<()> {
        self.flush()
    }
}

impl FinishWrite for Box<dyn Write> {
    fn finish_stream(mut self: Box<Self>) -> std::io::Result<()> {
        self.flush()
    }
}

#[cfg(feature = "compression-gzip")]
impl<W: Write> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        flate2::write::GzEncoder::finish(*self)?.flush()
    }
}

#[cfg(feature = "compression-zstd")]
impl<W: Write> FinishWrite for zstd::stream::write::Encoder<'static, W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        zstd::stream::write::Encoder::finish(*self)?.flush()
    }
}

#[cfg(feature = "compression-bzip2")]
impl<W: Write> FinishWrite for bzip2::write::BzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        bzip2::write::BzEncoder::finish(*self)?.flush()
    }
}

#[cfg(feature = "compression-xz")]
impl<W: Write> FinishWrite for xz2::write::XzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        xz2::write::XzEncoder::finish(*self)?.flush()
    }
}

/// Find a registered codec by its [`CompressionCodec::name`] (case-insensitive).
pub fn codec_by_name(name: &str) -> Option<Arc<dyn CompressionCodec>> {
    get_registry()
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name))
}

/// Names of every registered codec, in registration order.
pub fn codec_names() -> Vec<String> {
    get_registry().iter().map(|c| c.name().to_string()).collect()
}

/// Detect compression codec from file path extension.
fn detect_from_extension(path: impl AsRef<Path>) -> Option<Arc<dyn CompressionCodec>> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    get_registry()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
}

/// Detect compression codec from magic bytes. The reader is not advanced.
fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    get_registry().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| buf.len() >= magic.len() && buf.starts_with(magic))
    })
}

/// Wrap a reader with decompression when the path or the leading bytes name a codec.
///
/// Extension is checked first; magic bytes are the fallback; otherwise the
/// reader is returned buffered but otherwise untouched.
pub fn auto_detect_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Read>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_reader_dyn(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buf_reader = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buf_reader) {
        return codec
            .wrap_reader_dyn(Box::new(buf_reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    Ok(Box::new(buf_reader))
}

/// Wrap a writer with compression when the path extension names a codec.
///
/// The result must be finished with [`FinishWrite::finish_stream`] for the
/// output to be complete.
pub fn auto_detect_writer<W: Write + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn FinishWrite>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_writer_dyn(Box::new(BufWriter::new(writer)))
            .with_context(|| format!("wrap writer with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

/// Sizes recorded by one [`compress_store`] pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    pub codec: String,
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl CompressionReport {
    /// Size reduction in percent; 0 for an empty input.
    pub fn reduction_pct(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.output_bytes as f64 / self.input_bytes as f64) * 100.0
    }
}

impl fmt::Display for CompressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}): {} bytes -> {} bytes ({:.1}% reduction)",
            self.source.display(),
            self.artifact.display(),
            self.codec,
            self.input_bytes,
            self.output_bytes,
            self.reduction_pct()
        )
    }
}

/// Path of the compressed artifact for `store`: the store path plus the
/// codec's primary extension.
pub fn artifact_path(store: impl AsRef<Path>, codec: &dyn CompressionCodec) -> PathBuf {
    let suffix = codec.extensions().first().copied().unwrap_or(".compressed");
    let mut name = store.as_ref().as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Compress a finished store file and delete the original.
///
/// The store must already be closed. The artifact is written next to the store
/// (see [`artifact_path`]); the original is removed only after the artifact is
/// fully written, synced and renamed into place.
///
/// # Errors
/// Returns an error if the store cannot be read, compression fails, or the
/// artifact cannot be written. In all of these cases the original is kept.
/// A failure to remove the original after a successful write is also reported.
pub fn compress_store(
    store: impl AsRef<Path>,
    codec: &dyn CompressionCodec,
) -> Result<CompressionReport> {
    let store = store.as_ref();
    let data = fs::read(store).with_context(|| format!("read {}", store.display()))?;
    debug!(path = %store.display(), bytes = data.len(), codec = codec.name(), "compressing store");

    let packed = codec
        .compress_bytes(&data)
        .with_context(|| format!("compress {} with {}", store.display(), codec.name()))?;

    let target = artifact_path(store, codec);
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("create temporary artifact in {}", dir.display()))?;
    tmp.write_all(&packed)
        .with_context(|| format!("write temporary artifact for {}", target.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temporary artifact for {}", target.display()))?;
    tmp.persist(&target)
        .map_err(|e| anyhow!(e.error))
        .with_context(|| format!("rename artifact into {}", target.display()))?;

    fs::remove_file(store).with_context(|| format!("remove {}", store.display()))?;

    let report = CompressionReport {
        codec: codec.name().to_string(),
        source: store.to_path_buf(),
        artifact: target,
        input_bytes: data.len() as u64,
        output_bytes: packed.len() as u64,
    };
    info!(
        original = report.input_bytes,
        compressed = report.output_bytes,
        reduction_pct = report.reduction_pct(),
        artifact = %report.artifact.display(),
        "store compressed"
    );
    Ok(report)
}

/// Read a compressed artifact back into memory, picking the codec from the
/// file extension or its magic bytes.
///
/// # Errors
/// Returns an error if the file cannot be opened or fails to decompress.
pub fn decompress_artifact(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = auto_detect_reader(f, path)
        .with_context(|| format!("setup decompression for {}", path.display()))?;
    let mut out = Vec::new();
    rdr.read_to_end(&mut out)
        .with_context(|| format!("decompress {}", path.display()))?;
    Ok(out)
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn FinishWrite>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }

    fn compress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn FinishWrite>> {
        zstd::stream::write::Encoder::new(writer, 3).map(|e| Box::new(e) as Box<dyn FinishWrite>)
    }

    fn compress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, 19)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x42, 0x5a, 0x68])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use bzip2::read::MultiBzDecoder;
        Ok(Box::new(MultiBzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn FinishWrite>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        Ok(Box::new(BzEncoder::new(writer, Compression::default())))
    }

    fn compress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        let mut enc = BzEncoder::new(Vec::new(), Compression::best());
        enc.write_all(data)?;
        enc.finish()
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use xz2::read::XzDecoder;
        Ok(Box::new(XzDecoder::new_multi_decoder(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn FinishWrite>> {
        use xz2::write::XzEncoder;
        Ok(Box::new(XzEncoder::new(writer, 6)))
    }

    fn compress_bytes(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use xz2::write::XzEncoder;
        let mut enc = XzEncoder::new(Vec::new(), 9);
        enc.write_all(data)?;
        enc.finish()
    }
}
