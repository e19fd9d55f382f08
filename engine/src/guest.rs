//! Trait seam to the instrumented guest VM.
//!
//! The guest VM itself is an external collaborator: the engine only needs the
//! operations below. The host (an embedder's wasm runtime, or the scripted
//! runtime in `mulligan-harness`) implements these traits to plug in.
//!
//! Instrumented modules must satisfy one contract beyond the callback
//! surface: when instantiated with an explicit memory image, the instance
//! must adopt that image verbatim and perform no other state mutation (no
//! start-function side effects). The engine reinstantiates the module to
//! undo a memory grow and to shrink on reset, and reconstructs past states
//! bit-exactly on top of that image; globals are carried across by the
//! rewinder itself.

use crate::imports::HostImports;
use crate::value::{Value, ValueType};

/// Size of one linear-memory page in bytes.
pub const PAGE_SIZE: usize = 65_536;

/// Read-only view of guest state.
pub trait GuestView {
    /// The full linear memory.
    fn memory(&self) -> &[u8];

    /// Current linear-memory size in pages.
    fn page_count(&self) -> u32;

    /// Current value of the typed global at `index`, or `None` if there is
    /// no such global.
    fn global(&self, index: u32) -> Option<Value>;
}

/// A live instrumented guest instance.
pub trait GuestInstance: GuestView {
    /// Overwrite `bytes.len()` bytes of memory at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MemoryOutOfBounds`] if the range does not fit.
    fn write_memory(&mut self, location: u32, bytes: &[u8]) -> Result<(), StateError>;

    /// Set the typed global at `index`, validating the declared type.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NoSuchGlobal`] or [`StateError::GlobalTypeMismatch`].
    fn set_global(&mut self, index: u32, value: Value) -> Result<(), StateError>;

    /// Grow linear memory by `additional_pages` zeroed pages.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::GrowFailed`] if the runtime refuses the grow.
    fn grow_memory(&mut self, additional_pages: u32) -> Result<(), StateError>;

    /// Invoke the named export with `args`.
    ///
    /// The instrumented guest calls back into `imports` before every
    /// persistent-state mutation, synchronously, under this call.
    ///
    /// # Errors
    ///
    /// Returns [`GuestFault::MissingExport`] without executing anything, or
    /// [`GuestFault::Trap`] if the export traps partway.
    fn invoke(
        &mut self,
        name: &str,
        args: &[Value],
        imports: &mut dyn HostImports,
    ) -> Result<Option<Value>, GuestFault>;
}

/// A loaded instrumented module image, retained so instances can be rebuilt.
///
/// The engine reinstantiates during memory-grow undo and during a shrinking
/// reset; callers must not hold guest handles across engine operations that
/// may rewind.
pub trait GuestModule {
    /// Build a fresh instance.
    ///
    /// `memory` is the exact initial linear-memory contents (a multiple of
    /// [`PAGE_SIZE`]); `None` means the module's own declared initial memory.
    ///
    /// # Errors
    ///
    /// Returns [`InstantiateError`] if the runtime cannot build the instance.
    fn instantiate(&self, memory: Option<&[u8]>) -> Result<Box<dyn GuestInstance>, InstantiateError>;
}

/// Failure of a guest export invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuestFault {
    /// The export trapped partway through execution.
    #[error("trap: {message}")]
    Trap {
        /// Runtime-reported trap reason.
        message: String,
    },
    /// The named export does not exist on the instance.
    #[error("no export named {name:?}")]
    MissingExport {
        /// The requested export name.
        name: String,
    },
}

/// Failure of a direct host-side state operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A memory write fell outside the live memory range.
    #[error("memory write of {len} bytes at {location} is out of bounds")]
    MemoryOutOfBounds {
        /// Byte address of the write.
        location: u32,
        /// Length of the write.
        len: usize,
    },
    /// No global is declared at the index.
    #[error("no global at index {index}")]
    NoSuchGlobal {
        /// The requested global index.
        index: u32,
    },
    /// The value's type does not match the global's declared type.
    #[error("global {index} is {declared}, got {provided}")]
    GlobalTypeMismatch {
        /// The global index.
        index: u32,
        /// The global's declared type.
        declared: ValueType,
        /// The type of the provided value.
        provided: ValueType,
    },
    /// The runtime refused to grow memory.
    #[error("memory grow by {additional_pages} pages failed")]
    GrowFailed {
        /// Requested page delta.
        additional_pages: u32,
    },
}

/// Failure to build a guest instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("guest instantiation failed: {message}")]
pub struct InstantiateError {
    /// Runtime-reported reason.
    pub message: String,
}

impl InstantiateError {
    /// Build an error from any displayable reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
