//! Client side of the binary-rewriter service.
//!
//! The rewriter is a host-side collaborator that takes a raw guest module
//! and emits an instrumented one whose every store, memory growth, and
//! global write is preceded by a host callback. It is reached through a
//! shared-byte-buffer ABI: the caller reserves space in the service's own
//! memory, writes the raw module there, asks for preparation, and reads the
//! result back out of the service's memory.
//!
//! The gzip and 128-bit hash helpers the same service module exposes to
//! embedders live here too; they are byte-slice utilities outside the
//! engine's hot path.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use xxhash_rust::xxh3::xxh3_128;

/// The rewriter's shared-byte-buffer ABI.
pub trait RewriterService {
    /// Allocate `len` bytes in the service's memory; returns their address.
    fn reserve_space(&mut self, len: u32) -> u32;

    /// Read the raw module from the reserved region and write the
    /// instrumented module to the service's internal output.
    ///
    /// # Errors
    ///
    /// Returns [`RewriteError::Rejected`] if the module cannot be
    /// instrumented.
    fn prepare_wasm(&mut self) -> Result<(), RewriteError>;

    /// Address of the instrumented output in the service's memory.
    fn output_ptr(&self) -> u32;

    /// Length of the instrumented output.
    fn output_len(&self) -> u32;

    /// The service's memory.
    fn memory(&self) -> &[u8];

    /// The service's memory, writable.
    fn memory_mut(&mut self) -> &mut [u8];
}

/// Failure to instrument a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// The service rejected the module.
    #[error("rewriter rejected module: {message}")]
    Rejected {
        /// Service-reported reason.
        message: String,
    },
    /// The service reported a region outside its own memory.
    #[error("rewriter range {ptr}+{len} exceeds service memory ({memory_len} bytes)")]
    OutOfBounds {
        /// Start of the reported region.
        ptr: u32,
        /// Length of the reported region.
        len: u32,
        /// Size of the service memory.
        memory_len: usize,
    },
}

/// Run the four-step rewriter protocol over `raw`, returning the
/// instrumented module bytes.
///
/// # Errors
///
/// Returns [`RewriteError`] if the service rejects the module or reports an
/// out-of-bounds region.
pub fn instrument(service: &mut dyn RewriterService, raw: &[u8]) -> Result<Vec<u8>, RewriteError> {
    let len = u32::try_from(raw.len()).map_err(|_| RewriteError::Rejected {
        message: "module exceeds 4 GiB".to_string(),
    })?;
    let ptr = service.reserve_space(len);
    let start = ptr as usize;
    let end = start.saturating_add(raw.len());
    let memory_len = service.memory().len();
    let region = service
        .memory_mut()
        .get_mut(start..end)
        .ok_or(RewriteError::OutOfBounds {
            ptr,
            len,
            memory_len,
        })?;
    region.copy_from_slice(raw);

    service.prepare_wasm()?;

    let out_ptr = service.output_ptr();
    let out_len = service.output_len();
    let start = out_ptr as usize;
    let end = start.saturating_add(out_len as usize);
    let memory_len = service.memory().len();
    service
        .memory()
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or(RewriteError::OutOfBounds {
            ptr: out_ptr,
            len: out_len,
            memory_len,
        })
}

/// Gzip-compress a byte slice.
///
/// # Errors
///
/// Propagates the underlying I/O error, which for in-memory sinks only
/// occurs on allocation failure.
pub fn gzip_encode(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Decompress a gzip byte slice.
///
/// # Errors
///
/// Returns an error if the input is not valid gzip.
pub fn gzip_decode(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// 128-bit content hash of a byte slice.
#[must_use]
pub fn hash128(bytes: &[u8]) -> u128 {
    xxh3_128(bytes)
}
