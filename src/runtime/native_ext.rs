//! Native extensions: dynamic libraries that provide the bodies of a module's
//! natives.
//!
//! A library exports `ember_ext_entries`, returning an [`ExtensionTable`] that
//! lists `(class, name, func)` triples. The table is copied into a lookup map
//! when the library is opened; the library itself stays loaded for as long as
//! the owning module object is alive.

use std::{
    collections::HashMap,
    ffi::{CStr, c_char},
    fmt,
    path::{Path, PathBuf},
};

use libloading::{Library, Symbol};
use thiserror::Error;

use crate::runtime::NativeFn;

/// Must match the `version` field of the table a library exports.
pub const ABI_VERSION: u32 = 1;

pub const ENTRY_SYMBOL: &[u8] = b"ember_ext_entries";

/// One exported native. `class` is null for module-level functions.
#[repr(C)]
pub struct ExtensionEntry {
    pub class: *const c_char,
    pub name: *const c_char,
    pub func: NativeFn,
}

#[repr(C)]
pub struct ExtensionTable {
    pub version: u32,
    pub entry_count: usize,
    pub entries: *const ExtensionEntry,
}

#[derive(Debug, Error)]
pub enum ExtError {
    #[error("failed to load extension {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },
    #[error("extension {0} does not export ember_ext_entries")]
    MissingEntryPoint(PathBuf),
    #[error("ABI version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("extension entry {0} has an invalid name")]
    InvalidName(usize),
}

type SymbolKey = (Option<String>, String);

pub struct NativeExtension {
    path: PathBuf,
    symbols: HashMap<SymbolKey, NativeFn>,
    // Declared last: the function pointers above must not outlive the library.
    _lib: Option<Library>,
}

impl fmt::Debug for NativeExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeExtension")
            .field("path", &self.path)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl NativeExtension {
    /// Opens `path` and reads its registry table.
    pub fn open(path: &Path) -> Result<Self, ExtError> {
        // SAFETY: loading runs the library's initializers; callers only load
        // extensions built against this crate.
        let lib = unsafe { Library::new(path) }.map_err(|e| ExtError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let table = {
            // SAFETY: the symbol's signature is part of the extension ABI.
            let entries: Symbol<extern "C" fn() -> *const ExtensionTable> =
                unsafe { lib.get(ENTRY_SYMBOL) }
                    .map_err(|_| ExtError::MissingEntryPoint(path.to_path_buf()))?;
            entries()
        };
        // SAFETY: a non-null table pointer refers to static data in the library.
        let Some(table) = (unsafe { table.as_ref() }) else {
            return Err(ExtError::MissingEntryPoint(path.to_path_buf()));
        };

        let symbols = read_table(table)?;
        Ok(Self {
            path: path.to_path_buf(),
            symbols,
            _lib: Some(lib),
        })
    }

    /// Builds an extension from a registry table linked into the host, with no
    /// library behind it. `name` stands in for the path in diagnostics.
    pub fn from_table(name: &str, table: &ExtensionTable) -> Result<Self, ExtError> {
        Ok(Self {
            path: PathBuf::from(name),
            symbols: read_table(table)?,
            _lib: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn lookup(&self, class: Option<&str>, name: &str) -> Option<NativeFn> {
        self.symbols
            .get(&(class.map(str::to_string), name.to_string()))
            .copied()
    }
}

fn read_table(table: &ExtensionTable) -> Result<HashMap<SymbolKey, NativeFn>, ExtError> {
    if table.version != ABI_VERSION {
        return Err(ExtError::VersionMismatch {
            expected: ABI_VERSION,
            found: table.version,
        });
    }

    let entries: &[ExtensionEntry] = if table.entry_count == 0 || table.entries.is_null() {
        &[]
    } else {
        // SAFETY: the table promises `entry_count` contiguous entries.
        unsafe { std::slice::from_raw_parts(table.entries, table.entry_count) }
    };

    let mut symbols = HashMap::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let class = if entry.class.is_null() {
            None
        } else {
            // SAFETY: non-null names are NUL-terminated strings.
            Some(c_name(unsafe { CStr::from_ptr(entry.class) }, index)?)
        };
        if entry.name.is_null() {
            return Err(ExtError::InvalidName(index));
        }
        let name = c_name(unsafe { CStr::from_ptr(entry.name) }, index)?;
        symbols.insert((class, name), entry.func);
    }
    Ok(symbols)
}

fn c_name(name: &CStr, index: usize) -> Result<String, ExtError> {
    name.to_str()
        .map(str::to_string)
        .map_err(|_| ExtError::InvalidName(index))
}
