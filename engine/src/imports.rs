//! Host functions exposed to the instrumented guest.
//!
//! The binary rewriter prefixes every persistent-state mutation in the guest
//! with a call to one of the three journaling imports below; the diagnostic
//! pair lets the guest emit text. All callbacks run synchronously inside the
//! guest's call, before the mutation they precede, so the bytes they snapshot
//! cannot be concurrently modified.

use tracing::{error, info};

use crate::guest::GuestView;
use crate::journal::{Journal, UndoRecord};

/// The import surface an instrumented guest requires.
///
/// Implementations receive a read-only view of the calling guest so they can
/// capture pre-mutation state themselves.
pub trait HostImports {
    /// The guest is about to store `size` bytes at `location`.
    fn on_store(&mut self, guest: &dyn GuestView, location: u32, size: u32);

    /// The guest is about to grow linear memory by `pages` pages.
    fn on_grow(&mut self, guest: &dyn GuestView, pages: u32);

    /// The guest is about to overwrite the global at `index`.
    fn on_global_set(&mut self, guest: &dyn GuestView, index: u32);

    /// The guest emits an informational message at `ptr..ptr + len`.
    fn external_log(&mut self, guest: &dyn GuestView, ptr: u32, len: u32);

    /// The guest emits an error message at `ptr..ptr + len`.
    fn external_error(&mut self, guest: &dyn GuestView, ptr: u32, len: u32);
}

/// Imports that record nothing and log nothing.
///
/// An instrumented module driven with these callbacks must be observationally
/// equivalent to the uninstrumented original; the harness uses this to check
/// that contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImports;

impl HostImports for NoopImports {
    fn on_store(&mut self, _guest: &dyn GuestView, _location: u32, _size: u32) {}
    fn on_grow(&mut self, _guest: &dyn GuestView, _pages: u32) {}
    fn on_global_set(&mut self, _guest: &dyn GuestView, _index: u32) {}
    fn external_log(&mut self, _guest: &dyn GuestView, _ptr: u32, _len: u32) {}
    fn external_error(&mut self, _guest: &dyn GuestView, _ptr: u32, _len: u32) {}
}

/// The engine's imports: every mutation callback appends the matching
/// [`UndoRecord`]; diagnostics forward to the `tracing` sinks.
///
/// Borrows the journal mutably for the duration of one guest invocation,
/// which keeps the guest, the journal, and the engine shell free of
/// reference cycles.
pub struct JournalingImports<'a> {
    journal: &'a mut Journal,
}

impl<'a> JournalingImports<'a> {
    /// Record into `journal` for one guest invocation.
    #[must_use]
    pub fn new(journal: &'a mut Journal) -> Self {
        Self { journal }
    }
}

fn decode_text(guest: &dyn GuestView, ptr: u32, len: u32) -> String {
    let start = ptr as usize;
    let end = start.saturating_add(len as usize);
    match guest.memory().get(start..end) {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => format!("<message range {ptr}+{len} out of bounds>"),
    }
}

impl HostImports for JournalingImports<'_> {
    fn on_store(&mut self, guest: &dyn GuestView, location: u32, size: u32) {
        let start = location as usize;
        let end = start.saturating_add(size as usize);
        let memory = guest.memory();
        debug_assert!(end <= memory.len(), "instrumented store out of bounds");
        // A store that would trap never commits, so snapshotting the in-range
        // prefix is sufficient.
        let end = end.min(memory.len());
        let start = start.min(end);
        self.journal.append(UndoRecord::MemoryWrite {
            location,
            old_bytes: memory[start..end].to_vec(),
        });
    }

    fn on_grow(&mut self, guest: &dyn GuestView, _pages: u32) {
        self.journal.append(UndoRecord::MemoryGrow {
            old_page_count: guest.page_count(),
        });
    }

    fn on_global_set(&mut self, guest: &dyn GuestView, index: u32) {
        let Some(old) = guest.global(index) else {
            debug_assert!(false, "instrumented write to unknown global {index}");
            return;
        };
        self.journal.append(UndoRecord::GlobalWrite { index, old });
    }

    fn external_log(&mut self, guest: &dyn GuestView, ptr: u32, len: u32) {
        info!(target: "guest", "{}", decode_text(guest, ptr, len));
    }

    fn external_error(&mut self, guest: &dyn GuestView, ptr: u32, len: u32) {
        error!(target: "guest", "{}", decode_text(guest, ptr, len));
    }
}
