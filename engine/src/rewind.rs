//! Reverse application of journaled mutations.

use crate::guest::{GuestInstance, GuestModule, InstantiateError, PAGE_SIZE};
use crate::journal::{Journal, UndoRecord};

/// Failure while rolling guest state backwards.
///
/// Both variants are fatal: the engine is poisoned because the guest can no
/// longer be proven bit-identical to any point on the timeline.
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    /// Reinstantiation during a memory-grow undo failed.
    #[error("reinstantiation during memory-grow undo failed: {0}")]
    Reinstantiate(#[from] InstantiateError),
    /// An undo record no longer matches the guest it was captured from.
    #[error("undo record does not match guest state: {reason}")]
    CorruptRecord {
        /// What went wrong applying the record.
        reason: String,
    },
}

/// Pop and invert journal records until the journal is `target_len` long.
///
/// Memory-grow undo reconstructs the instance: the runtime exposes no shrink,
/// so a fresh memory of the old page count is filled from the current
/// memory's prefix and the retained module is reinstantiated around it.
/// Instantiation resets globals to their declared initial values, so the
/// live globals are snapshotted first and written back afterwards; a global
/// restored this way may still be overwritten by a global-write undo later
/// in the same sweep, which is exactly the older value it should take.
pub(crate) fn rewind_to(
    journal: &mut Journal,
    instance: &mut Box<dyn GuestInstance>,
    module: &dyn GuestModule,
    target_len: usize,
) -> Result<(), RewindError> {
    debug_assert!(target_len <= journal.len());
    while journal.len() > target_len {
        let record = journal.pop().expect("journal longer than target");
        apply_inverse(record, instance, module)?;
    }
    Ok(())
}

fn apply_inverse(
    record: UndoRecord,
    instance: &mut Box<dyn GuestInstance>,
    module: &dyn GuestModule,
) -> Result<(), RewindError> {
    match record {
        UndoRecord::MemoryWrite {
            location,
            old_bytes,
        } => instance
            .write_memory(location, &old_bytes)
            .map_err(|e| RewindError::CorruptRecord {
                reason: e.to_string(),
            }),
        UndoRecord::GlobalWrite { index, old } => {
            instance
                .set_global(index, old)
                .map_err(|e| RewindError::CorruptRecord {
                    reason: e.to_string(),
                })
        }
        UndoRecord::MemoryGrow { old_page_count } => {
            let keep = old_page_count as usize * PAGE_SIZE;
            let memory = instance.memory();
            if memory.len() < keep {
                return Err(RewindError::CorruptRecord {
                    reason: format!(
                        "memory-grow undo wants {keep} bytes, guest has {}",
                        memory.len()
                    ),
                });
            }
            let image = memory[..keep].to_vec();

            let mut globals = Vec::new();
            let mut index = 0u32;
            while let Some(value) = instance.global(index) {
                globals.push(value);
                index += 1;
            }

            *instance = module.instantiate(Some(&image))?;

            for (index, value) in globals.into_iter().enumerate() {
                instance
                    .set_global(index as u32, value)
                    .map_err(|e| RewindError::CorruptRecord {
                        reason: format!("carrying global across reinstantiation: {e}"),
                    })?;
            }
            Ok(())
        }
    }
}
