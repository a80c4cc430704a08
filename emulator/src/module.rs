//! Dynamically loaded extension modules.
//!
//! A module is a shared object exporting exactly three C-ABI entry points;
//! anything else is rejected at load time. There is no runtime reflection:
//! the event hook takes a tagged kind and one argument word.
//!
//! ```c
//! int32_t sd_module_init(void);
//! int64_t sd_module_event(uint32_t kind, uint64_t arg);
//! void    sd_module_fini(void);
//! ```

use common::error::{LibraryLoadError, ModuleResolutionError};

use libloading::{Library, Symbol};
use log::{debug, error};
use thiserror::Error;

pub const EVENT_MACHINE_START: u32 = 1;
pub const EVENT_MACHINE_STOP: u32 = 2;

type InitFn = unsafe extern "C" fn() -> i32;
type EventFn = unsafe extern "C" fn(u32, u64) -> i64;
type FiniFn = unsafe extern "C" fn();

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Load(#[from] LibraryLoadError),
    #[error(transparent)]
    Resolve(#[from] ModuleResolutionError),
}

pub struct Module {
    name: String,
    lib: Library,
    initialized: bool,
}

impl Module {
    /// Open a shared object, verify its entry points, and run its init hook.
    pub fn load(path: &str) -> Result<Module, ModuleError> {
        let lib = unsafe { Library::new(path) }
            .map_err(|e| LibraryLoadError(format!("{path}: {e}")))?;
        let mut module = Module { name: path.to_string(), lib, initialized: false };

        // All three shapes must resolve, or the module does not conform.
        module.symbol::<InitFn>("sd_module_init")?;
        module.symbol::<EventFn>("sd_module_event")?;
        module.symbol::<FiniFn>("sd_module_fini")?;

        let init = module.symbol::<InitFn>("sd_module_init")?;
        let status = unsafe { init() };
        if status != 0 {
            return Err(LibraryLoadError(format!("{path}: init returned {status}")).into());
        }
        module.initialized = true;
        debug!("loaded module {path}");
        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event(&self, kind: u32, arg: u64) -> Result<i64, ModuleError> {
        let hook = self.symbol::<EventFn>("sd_module_event")?;
        Ok(unsafe { hook(kind, arg) })
    }

    fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>, ModuleResolutionError> {
        unsafe { self.lib.get(name.as_bytes()) }
            .map_err(|e| ModuleResolutionError(format!("{name}: {e}")))
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }
        match self.symbol::<FiniFn>("sd_module_fini") {
            Ok(fini) => unsafe { fini() },
            Err(e) => error!("{}: {e}", self.name),
        }
    }
}

/// The set of modules loaded into one machine.
#[derive(Default)]
pub struct ModuleHost {
    modules: Vec<Module>,
}

impl ModuleHost {
    pub fn new() -> ModuleHost {
        ModuleHost::default()
    }

    pub fn load(&mut self, path: &str) -> Result<(), ModuleError> {
        self.modules.push(Module::load(path)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Deliver an event to every module. Failures are logged, not fatal.
    pub fn broadcast(&self, kind: u32, arg: u64) {
        for module in &self.modules {
            if let Err(e) = module.event(kind, arg) {
                error!("{}: {e}", module.name());
            }
        }
    }
}
