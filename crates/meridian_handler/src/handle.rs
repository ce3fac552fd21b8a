//! Handler Loader (C2): resolve a named handler to a loaded dylib and
//! hand back a `HandlerHandle` the Worker can invoke.

use std::path::PathBuf;
use std::time::SystemTime;

use libloading::{Library, Symbol};
use meridian_protocol::HandlerMetadata;

use crate::error::HandlerError;
use crate::registry::{self, DiscoveredHandler};
use crate::{Handler, HandlerEntryFn, HANDLER_ENTRY_SYMBOL};

/// A loaded handler. Field order matters: `handler` is dropped before
/// `library`, since the trait object's vtable and any state it holds
/// live inside the `Library`'s mapped memory — dropping the library
/// first would be unsound.
pub struct HandlerHandle {
    handler: Box<dyn Handler>,
    _library: Library,
    pub name: String,
    pub dylib_path: PathBuf,
    pub mtime: SystemTime,
    pub metadata: HandlerMetadata,
    unloaded: bool,
}

impl HandlerHandle {
    /// Load the named handler from the first matching entry across
    /// `paths`. `HandlerNotFound` if no sidecar+dylib pair exists;
    /// `HandlerImportFailed` if the dylib can't be opened or doesn't
    /// export the expected symbol, or if `load()` fails.
    pub fn load(name: &str, paths: &[PathBuf]) -> Result<Self, HandlerError> {
        let discovered: DiscoveredHandler = registry::find(name, paths)
            .ok_or_else(|| HandlerError::HandlerNotFound(name.to_string()))?;
        Self::load_discovered(discovered)
    }

    pub fn load_discovered(discovered: DiscoveredHandler) -> Result<Self, HandlerError> {
        let library = unsafe { Library::new(&discovered.dylib_path) }.map_err(|e| {
            HandlerError::HandlerImportFailed {
                name: discovered.name.clone(),
                source: e.into(),
            }
        })?;

        let mut handler: Box<dyn Handler> = unsafe {
            let entry: Symbol<HandlerEntryFn> =
                library
                    .get(HANDLER_ENTRY_SYMBOL)
                    .map_err(|e| HandlerError::HandlerImportFailed {
                        name: discovered.name.clone(),
                        source: e.into(),
                    })?;
            entry()
        };

        // §4.2: a failing `load()` hook is logged, not a hard failure
        // of the import itself — `canrun()` is the signal callers
        // should use to decide whether this handler is actually usable.
        if let Err(e) = handler.load() {
            tracing::warn!(handler = %discovered.name, error = %e, "handler load() hook failed");
        }

        Ok(Self {
            handler,
            _library: library,
            name: discovered.name,
            dylib_path: discovered.dylib_path,
            mtime: discovered.mtime,
            metadata: discovered.metadata,
            unloaded: false,
        })
    }

    /// True iff this handle is still the right one to use for
    /// `(name, mtime)` — the current-handler affinity check that lets
    /// the Worker skip an unnecessary unload/reload cycle.
    pub fn matches_affinity(&self, name: &str, mtime: SystemTime) -> bool {
        self.name == name && self.mtime == mtime
    }

    pub fn handler_mut(&mut self) -> &mut dyn Handler {
        self.handler.as_mut()
    }

    pub fn cancellable(&self) -> bool {
        self.metadata.cancellable
    }

    pub fn canrun(&self) -> bool {
        self.handler.canrun()
    }

    /// Explicit unload, idempotent. The Worker calls this when
    /// switching away from a handler; `Drop` calls it again as a
    /// backstop if the Worker didn't.
    pub fn unload(&mut self) -> anyhow::Result<()> {
        if self.unloaded {
            return Ok(());
        }
        self.unloaded = true;
        self.handler.unload()
    }
}

impl Drop for HandlerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.unload() {
            tracing::warn!(handler = %self.name, error = %e, "handler unload failed during drop");
        }
    }
}
