//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for opening shared libraries and resolving
//! their exports. Symbol addresses are resolved lazily and cached per library,
//! so repeated lookups never reach the OS loader again.
//!
//! Opening a library runs its static initializers. That is the OS loader's
//! behaviour and is not masked here.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libloading::Library;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::config::LoaderConfig;
use crate::ctype::CType;
use crate::error::{FfiError, Result};

/// A dynamically loaded library
pub struct DynamicLibrary {
    /// Name the library was requested under
    name: String,
    /// Path it was opened from; `None` for the process image or OS-resolved names
    path: Option<PathBuf>,
    /// The loaded library handle
    library: Library,
    /// Cached symbol addresses
    symbols: RwLock<HashMap<String, usize>>,
    /// Number of lookups that reached the OS loader
    os_lookups: AtomicUsize,
}

impl DynamicLibrary {
    fn from_library(name: &str, path: Option<PathBuf>, library: Library) -> Self {
        Self {
            name: name.to_string(),
            path,
            library,
            symbols: RwLock::new(HashMap::new()),
            os_lookups: AtomicUsize::new(0),
        }
    }

    /// Load a library from the given path
    pub fn load(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initializers, which may execute
        // arbitrary code. The caller chose to trust this library.
        let library = unsafe {
            Library::new(&path).map_err(|e| FfiError::Load {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?
        };
        debug!("loaded library '{}' from {}", name, path.display());
        Ok(Self::from_library(name, Some(path), library))
    }

    /// Open the running process image, giving access to everything already
    /// linked into it (libc, libm on most platforms).
    pub fn open_self() -> Result<Self> {
        #[cfg(unix)]
        let library: Library = libloading::os::unix::Library::this().into();
        #[cfg(windows)]
        let library: Library = libloading::os::windows::Library::this()
            .map_err(|e| FfiError::Load {
                path: "<self>".to_string(),
                detail: e.to_string(),
            })?
            .into();
        debug!("opened process image");
        Ok(Self::from_library("<self>", None, library))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Address of an exported symbol, resolved on first use.
    pub fn address_of(&self, name: &str) -> Result<usize> {
        if let Some(&addr) = self.symbols.read().get(name) {
            return Ok(addr);
        }

        let c_name = CString::new(name).map_err(|_| FfiError::SymbolNotFound {
            library: self.name.clone(),
            symbol: name.to_string(),
            detail: "name contains a NUL byte".to_string(),
        })?;

        self.os_lookups.fetch_add(1, Ordering::Relaxed);
        // Safety: the address is only used through a declared type; reading it
        // as a raw pointer does not touch the symbol itself.
        let addr = unsafe {
            let symbol: libloading::Symbol<*const ()> = self
                .library
                .get(c_name.as_bytes_with_nul())
                .map_err(|e| FfiError::SymbolNotFound {
                    library: self.name.clone(),
                    symbol: name.to_string(),
                    detail: e.to_string(),
                })?;
            *symbol as usize
        };

        debug!("resolved '{}' in '{}' at {:#x}", name, self.name, addr);
        Ok(*self.symbols.write().entry(name.to_string()).or_insert(addr))
    }

    /// How many lookups reached the OS loader.
    pub fn os_lookups(&self) -> usize {
        self.os_lookups.load(Ordering::Relaxed)
    }

    /// Number of cached symbol addresses.
    pub fn cached_symbols(&self) -> usize {
        self.symbols.read().len()
    }
}

impl std::fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// A resolved export bound to its declared type. Keeps the library loaded.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: usize,
    pub ctype: CType,
    library: Arc<DynamicLibrary>,
}

impl Symbol {
    pub fn resolve(library: &Arc<DynamicLibrary>, name: &str, ctype: &CType) -> Result<Self> {
        let address = library.address_of(name)?;
        Ok(Self {
            name: name.to_string(),
            address,
            ctype: ctype.clone(),
            library: Arc::clone(library),
        })
    }

    pub fn library(&self) -> &Arc<DynamicLibrary> {
        &self.library
    }
}

/// Library loader with search paths
pub struct LibraryLoader {
    /// Directories tried before the platform defaults
    search_paths: Vec<PathBuf>,
    use_default_paths: bool,
    /// Loaded libraries
    libraries: HashMap<String, Arc<DynamicLibrary>>,
}

impl LibraryLoader {
    /// Create a new library loader
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            use_default_paths: true,
            libraries: HashMap::new(),
        }
    }

    pub fn with_config(config: &LoaderConfig) -> Self {
        Self {
            search_paths: config.search_paths.clone(),
            use_default_paths: config.use_default_paths,
            libraries: HashMap::new(),
        }
    }

    /// Add a search path
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.push(path.as_ref().to_path_buf());
    }

    /// Candidate files for `name`, most preferred first.
    ///
    /// A name with a path separator or naming an existing file is its own only
    /// candidate. Bare names are looked up in every search directory, versioned
    /// sonames (`libm.so.6`) ahead of the unversioned development link, which
    /// is often a linker script.
    pub fn candidate_paths(&self, name: &str) -> Vec<PathBuf> {
        let path = Path::new(name);
        if is_path_like(name) || path.is_file() {
            return if path.exists() {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            };
        }

        let lib_name = library_filename(name);
        let mut dirs = self.search_paths.clone();
        if self.use_default_paths {
            dirs.extend(default_search_paths());
        }

        let mut candidates = Vec::new();
        for dir in dirs {
            candidates.extend(versioned_candidates(&dir, name));
            let full_path = dir.join(&lib_name);
            if full_path.is_file() {
                candidates.push(full_path);
            }
        }
        candidates.dedup();
        candidates
    }

    /// Find a library by name
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        self.candidate_paths(name).into_iter().next()
    }

    /// Load a library by name or path. Loaded libraries are cached by name.
    pub fn load(&mut self, name: &str) -> Result<Arc<DynamicLibrary>> {
        if let Some(lib) = self.libraries.get(name) {
            return Ok(Arc::clone(lib));
        }

        let library = self.open(name)?;
        let lib = Arc::new(library);
        self.libraries.insert(name.to_string(), Arc::clone(&lib));
        Ok(lib)
    }

    fn open(&self, name: &str) -> Result<DynamicLibrary> {
        let candidates = self.candidate_paths(name);
        let mut first_failure = None;
        for path in &candidates {
            match DynamicLibrary::load(name, path) {
                Ok(lib) => return Ok(lib),
                Err(e) => {
                    warn!("candidate {} for '{}' failed: {}", path.display(), name, e);
                    first_failure.get_or_insert(e);
                }
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }
        if is_path_like(name) {
            return Err(FfiError::LibraryNotFound {
                name: name.to_string(),
                detail: "no such file".to_string(),
            });
        }

        // let the OS loader search its own configured paths
        let mut detail = String::new();
        for os_name in [library_filename(name), name.to_string()] {
            // Safety: see `DynamicLibrary::load`.
            match unsafe { Library::new(&os_name) } {
                Ok(library) => {
                    debug!("loaded library '{}' as '{}' via the OS search path", name, os_name);
                    return Ok(DynamicLibrary::from_library(name, None, library));
                }
                Err(e) => detail = e.to_string(),
            }
        }
        Err(FfiError::LibraryNotFound {
            name: name.to_string(),
            detail,
        })
    }

    /// Get a loaded library
    pub fn get(&self, name: &str) -> Option<Arc<DynamicLibrary>> {
        self.libraries.get(name).cloned()
    }

    /// Drop the cached handle. The OS handle closes once every other owner
    /// (libraries, symbols, values) is gone as well.
    pub fn unload(&mut self, name: &str) -> bool {
        self.libraries.remove(name).is_some()
    }

    /// List loaded libraries
    pub fn loaded_libraries(&self) -> Vec<&str> {
        self.libraries.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_path_like(name: &str) -> bool {
    name.contains('/') || name.contains(std::path::MAIN_SEPARATOR)
}

/// `lib<name>.so.<version>` files in `dir`, shortest version first.
fn versioned_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    if !cfg!(all(unix, not(target_os = "macos"))) {
        return Vec::new();
    }
    let prefix = format!("lib{}.so.", name);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_name().to_str().is_some_and(|file| {
                file.strip_prefix(&prefix)
                    .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit() || c == '.'))
            })
        })
        .map(|entry| entry.path())
        .collect();
    found.sort_by_key(|p| (p.as_os_str().len(), p.clone()));
    found
}

/// Get the default library search paths for this platform
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Current directory
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        // LD_LIBRARY_PATH
        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            paths.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }

        let multiarch = format!("{}-linux-gnu", std::env::consts::ARCH);
        paths.push(PathBuf::from("/lib").join(&multiarch));
        paths.push(PathBuf::from("/usr/lib").join(&multiarch));
        paths.push(PathBuf::from("/lib64"));
        paths.push(PathBuf::from("/usr/lib64"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
    }

    #[cfg(target_os = "macos")]
    {
        // DYLD_LIBRARY_PATH
        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            paths.extend(dyld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Windows\\System32"));

        // PATH
        if let Ok(path) = std::env::var("PATH") {
            paths.extend(path.split(';').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    paths
}

/// Construct the platform-specific library filename
pub fn library_filename(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if name.starts_with("lib") && name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if name.starts_with("lib") && name.contains(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }
}
