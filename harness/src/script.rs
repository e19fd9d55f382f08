//! Scripted guest runtime.
//!
//! A [`ScriptedModule`] stands in for a real instrumented module: each export
//! is a short sequence of [`Op`]s, and every persistent-state mutation calls
//! the matching host import before it executes, the same contract the
//! binary rewriter installs in production modules. Scripts are serde-derived
//! so scenarios can be written as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mulligan_engine::{
    GuestFault, GuestInstance, GuestModule, GuestView, HostImports, InstantiateError, StateError,
    Value, PAGE_SIZE,
};

/// One step of a scripted export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Overwrite the global at `index` with `value`.
    SetGlobal {
        /// Global index.
        index: u32,
        /// New value; must match the global's declared type.
        value: Value,
    },
    /// Add `delta` to an integer global (wrapping).
    AddGlobal {
        /// Global index.
        index: u32,
        /// Signed delta.
        delta: i64,
    },
    /// Overwrite bytes at a fixed address.
    Store {
        /// Byte address.
        addr: u32,
        /// Bytes to write.
        bytes: Vec<u8>,
    },
    /// Store the little-endian bit pattern of argument `arg` at `addr`.
    StoreArg {
        /// Byte address.
        addr: u32,
        /// Argument position.
        arg: usize,
    },
    /// Add `delta` to the byte at `addr` (wrapping).
    AddByte {
        /// Byte address.
        addr: u32,
        /// Wrapping delta.
        delta: u8,
    },
    /// Grow linear memory by zeroed pages.
    Grow {
        /// Pages to add.
        pages: u32,
    },
    /// Emit the memory range as an informational diagnostic.
    Log {
        /// Start of the message.
        addr: u32,
        /// Length of the message.
        len: u32,
    },
    /// Emit the memory range as an error diagnostic.
    LogError {
        /// Start of the message.
        addr: u32,
        /// Length of the message.
        len: u32,
    },
    /// Set the export's return value.
    Return {
        /// Value to return.
        value: Value,
    },
    /// Return the current value of a global.
    ReturnGlobal {
        /// Global index.
        index: u32,
    },
    /// Trap with a message.
    Trap {
        /// Trap reason.
        message: String,
    },
}

/// A deterministic stand-in for an instrumented guest module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedModule {
    /// Initial linear-memory size in pages.
    pub initial_pages: u32,
    /// Initial (and type-declaring) global values.
    pub globals: Vec<Value>,
    /// Exports by name.
    pub exports: BTreeMap<String, Vec<Op>>,
}

impl ScriptedModule {
    /// A module with `initial_pages` pages, no globals, no exports.
    #[must_use]
    pub fn new(initial_pages: u32) -> Self {
        Self {
            initial_pages,
            globals: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    /// Declare a global; its initial value fixes its type.
    #[must_use]
    pub fn with_global(mut self, value: Value) -> Self {
        self.globals.push(value);
        self
    }

    /// Declare an export.
    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>, ops: Vec<Op>) -> Self {
        self.exports.insert(name.into(), ops);
        self
    }

    /// Load a module description from JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl GuestModule for ScriptedModule {
    fn instantiate(
        &self,
        memory: Option<&[u8]>,
    ) -> Result<Box<dyn GuestInstance>, InstantiateError> {
        let memory = match memory {
            Some(image) => {
                if image.len() % PAGE_SIZE != 0 {
                    return Err(InstantiateError::new(format!(
                        "memory image of {} bytes is not page aligned",
                        image.len()
                    )));
                }
                image.to_vec()
            }
            None => vec![0; self.initial_pages as usize * PAGE_SIZE],
        };
        // Globals always start from their declared initial values; the
        // rewinder's global-write undos overwrite them right after a
        // grow-undo reinstantiation.
        Ok(Box::new(ScriptedInstance {
            exports: self.exports.clone(),
            globals: self.globals.clone(),
            memory,
        }))
    }
}

/// A live scripted instance.
#[derive(Debug)]
pub struct ScriptedInstance {
    exports: BTreeMap<String, Vec<Op>>,
    globals: Vec<Value>,
    memory: Vec<u8>,
}

impl ScriptedInstance {
    fn trap(message: impl Into<String>) -> GuestFault {
        GuestFault::Trap {
            message: message.into(),
        }
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), GuestFault> {
        let start = addr as usize;
        if start.saturating_add(len) > self.memory.len() {
            return Err(Self::trap(format!(
                "store of {len} bytes at {addr} out of bounds"
            )));
        }
        Ok(())
    }

    fn step(
        &mut self,
        op: &Op,
        args: &[Value],
        imports: &mut dyn HostImports,
    ) -> Result<Option<Value>, GuestFault> {
        match op {
            Op::SetGlobal { index, value } => {
                let declared = self
                    .globals
                    .get(*index as usize)
                    .ok_or_else(|| Self::trap(format!("no global {index}")))?;
                if declared.ty() != value.ty() {
                    return Err(Self::trap(format!(
                        "global {index} is {}, got {}",
                        declared.ty(),
                        value.ty()
                    )));
                }
                imports.on_global_set(self, *index);
                self.globals[*index as usize] = *value;
                Ok(None)
            }
            Op::AddGlobal { index, delta } => {
                let current = self
                    .globals
                    .get(*index as usize)
                    .copied()
                    .ok_or_else(|| Self::trap(format!("no global {index}")))?;
                let next = match current {
                    Value::I32(v) => Value::I32(v.wrapping_add(*delta as i32)),
                    Value::I64(v) => Value::I64(v.wrapping_add(*delta)),
                    Value::F32(_) | Value::F64(_) => {
                        return Err(Self::trap(format!("integer add on float global {index}")))
                    }
                };
                imports.on_global_set(self, *index);
                self.globals[*index as usize] = next;
                Ok(None)
            }
            Op::Store { addr, bytes } => {
                self.check_range(*addr, bytes.len())?;
                imports.on_store(self, *addr, bytes.len() as u32);
                let start = *addr as usize;
                self.memory[start..start + bytes.len()].copy_from_slice(bytes);
                Ok(None)
            }
            Op::StoreArg { addr, arg } => {
                let value = args
                    .get(*arg)
                    .copied()
                    .ok_or_else(|| Self::trap(format!("missing argument {arg}")))?;
                let bytes = match value {
                    Value::I32(v) => v.to_le_bytes().to_vec(),
                    Value::I64(v) => v.to_le_bytes().to_vec(),
                    Value::F32(v) => v.to_le_bytes().to_vec(),
                    Value::F64(v) => v.to_le_bytes().to_vec(),
                };
                self.check_range(*addr, bytes.len())?;
                imports.on_store(self, *addr, bytes.len() as u32);
                let start = *addr as usize;
                self.memory[start..start + bytes.len()].copy_from_slice(&bytes);
                Ok(None)
            }
            Op::AddByte { addr, delta } => {
                self.check_range(*addr, 1)?;
                imports.on_store(self, *addr, 1);
                let start = *addr as usize;
                self.memory[start] = self.memory[start].wrapping_add(*delta);
                Ok(None)
            }
            Op::Grow { pages } => {
                imports.on_grow(self, *pages);
                let additional = *pages as usize * PAGE_SIZE;
                self.memory.extend(std::iter::repeat(0).take(additional));
                Ok(None)
            }
            Op::Log { addr, len } => {
                imports.external_log(self, *addr, *len);
                Ok(None)
            }
            Op::LogError { addr, len } => {
                imports.external_error(self, *addr, *len);
                Ok(None)
            }
            Op::Return { value } => Ok(Some(*value)),
            Op::ReturnGlobal { index } => {
                let value = self
                    .globals
                    .get(*index as usize)
                    .copied()
                    .ok_or_else(|| Self::trap(format!("no global {index}")))?;
                Ok(Some(value))
            }
            Op::Trap { message } => Err(Self::trap(message.clone())),
        }
    }
}

impl GuestView for ScriptedInstance {
    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn page_count(&self) -> u32 {
        (self.memory.len() / PAGE_SIZE) as u32
    }

    fn global(&self, index: u32) -> Option<Value> {
        self.globals.get(index as usize).copied()
    }
}

impl GuestInstance for ScriptedInstance {
    fn write_memory(&mut self, location: u32, bytes: &[u8]) -> Result<(), StateError> {
        let start = location as usize;
        let end = start.saturating_add(bytes.len());
        if end > self.memory.len() {
            return Err(StateError::MemoryOutOfBounds {
                location,
                len: bytes.len(),
            });
        }
        self.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn set_global(&mut self, index: u32, value: Value) -> Result<(), StateError> {
        let declared = self
            .globals
            .get(index as usize)
            .ok_or(StateError::NoSuchGlobal { index })?;
        if declared.ty() != value.ty() {
            return Err(StateError::GlobalTypeMismatch {
                index,
                declared: declared.ty(),
                provided: value.ty(),
            });
        }
        self.globals[index as usize] = value;
        Ok(())
    }

    fn grow_memory(&mut self, additional_pages: u32) -> Result<(), StateError> {
        let additional = additional_pages as usize * PAGE_SIZE;
        self.memory.extend(std::iter::repeat(0).take(additional));
        Ok(())
    }

    fn invoke(
        &mut self,
        name: &str,
        args: &[Value],
        imports: &mut dyn HostImports,
    ) -> Result<Option<Value>, GuestFault> {
        let ops = self
            .exports
            .get(name)
            .cloned()
            .ok_or_else(|| GuestFault::MissingExport {
                name: name.to_string(),
            })?;
        let mut ret = None;
        for op in &ops {
            if let Some(value) = self.step(op, args, imports)? {
                ret = Some(value);
            }
        }
        Ok(ret)
    }
}
