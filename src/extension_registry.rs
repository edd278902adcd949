//! Lookup of extensions by extendee table and field number.

use crate::arena::Arena;
use crate::hash::StrTable;
use crate::mini_table::{MiniTable, MiniTableExtension};

const KEY_LEN: usize = core::mem::size_of::<usize>() + 4;

fn registry_key(extendee: *const MiniTable, number: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..core::mem::size_of::<usize>()].copy_from_slice(&(extendee as usize).to_ne_bytes());
    key[core::mem::size_of::<usize>()..].copy_from_slice(&number.to_ne_bytes());
    key
}

/// Maps `(extendee, number)` to the extension's layout.
///
/// The registry stores pointers: registered extensions and their extendee
/// tables must outlive it.
pub struct ExtensionRegistry {
    exts: StrTable,
}

/// Why [`ExtensionRegistry::add`] refused an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionRegistryStatus {
    DuplicateEntry,
    InvalidExtension,
    OutOfMemory,
}

impl ExtensionRegistry {
    pub fn new(arena: &Arena<'_>) -> Option<Self> {
        Some(ExtensionRegistry {
            exts: StrTable::new(8, arena)?,
        })
    }

    pub fn len(&self) -> usize {
        self.exts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exts.is_empty()
    }

    /// Registers one extension. A second extension with the same extendee
    /// and number is rejected.
    pub fn add(&mut self, ext: &MiniTableExtension, arena: &Arena<'_>) -> Result<(), ExtensionRegistryStatus> {
        let extendee = ext.extendee_ptr();
        if extendee.is_null() || ext.number() == 0 {
            return Err(ExtensionRegistryStatus::InvalidExtension);
        }
        let key = registry_key(extendee, ext.number());
        if self.exts.lookup(&key).is_some() {
            tracing::debug!(number = ext.number(), "duplicate extension");
            return Err(ExtensionRegistryStatus::DuplicateEntry);
        }
        self.exts
            .insert(&key, ext as *const MiniTableExtension as usize as u64, arena)
            .ok_or(ExtensionRegistryStatus::OutOfMemory)
    }

    /// Registers every extension or none of them.
    pub fn add_array(&mut self, exts: &[&MiniTableExtension], arena: &Arena<'_>) -> Result<(), ExtensionRegistryStatus> {
        for (i, ext) in exts.iter().enumerate() {
            if let Err(status) = self.add(ext, arena) {
                for added in &exts[..i] {
                    self.exts.remove(&registry_key(added.extendee_ptr(), added.number()));
                }
                return Err(status);
            }
        }
        Ok(())
    }

    pub fn lookup(&self, extendee: &MiniTable, number: u32) -> Option<&MiniTableExtension> {
        let bits = self.exts.lookup(&registry_key(extendee, number))?;
        unsafe { (bits as usize as *const MiniTableExtension).as_ref() }
    }
}

impl core::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExtensionRegistry").field("len", &self.len()).finish()
    }
}
