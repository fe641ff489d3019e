//! Aurora Loader - Encrypted Module Imports
//!
//! Ships script modules as AES-CBC ciphertext and decrypts them at import
//! time, so a package never carries its sources in plaintext.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Seal Time (Dev Machine)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  mod_a.rhai ──► PKCS#7 pad ──► AES-CBC (key, IV)               │
//! │                                      │                          │
//! │                                      ▼                          │
//! │                             mod_a_encrypted.enc                 │
//! │                                                                 │
//! │  Also: registry { "pkg.mod_a" ──► mod_a_encrypted.enc }         │
//! │        as JSON manifest or embedded literal source              │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Import Time (User Machine)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  1. key/IV from environment ──► ImportContext (fatal if absent) │
//! │                                                                 │
//! │  2. import "pkg.mod_a" ──► EncryptedModuleFinder (first in      │
//! │     chain) ──► registry hit ──► DecryptingLoader                │
//! │                                                                 │
//! │  3. read .enc ──► AES-CBC decrypt ──► unpad ──► execute into    │
//! │     the module namespace                                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aurora_loader::{install, ImportContext, ImportSystem, LoaderConfig, ModuleRegistry};
//!
//! let config = LoaderConfig::default();
//! let registry = ModuleRegistry::load_manifest(&package_dir.join(&config.manifest_name))?;
//! let context = ImportContext::from_env(&config, registry)?;
//!
//! let imports = ImportSystem::new();
//! install(&imports, context);
//!
//! let module = imports.import("pkg.mod_a")?;
//! assert_eq!(module.get_as::<i64>("VALUE"), Some(42));
//! ```

mod config;
mod context;
pub mod crypto;
pub mod embed;
mod error;
mod executor;
mod finder;
mod import;
mod loader;
mod module;
mod registry;
mod sealer;

pub use config::{LoaderConfig, NamingScheme, DEFAULT_IV_VAR, DEFAULT_KEY_VAR};
pub use context::{install, ImportContext};
pub use crypto::KeyMaterial;
pub use error::{LoaderError, LoaderResult};
pub use executor::{RhaiExecutor, ScriptExecutor};
pub use finder::{EncryptedModuleFinder, Finder, ModuleSpec, SourceFileFinder};
pub use import::ImportSystem;
pub use loader::{load, DecryptingLoader, Loader, SourceLoader};
pub use module::Module;
pub use registry::{ModuleRegistry, RegistryBuilder, RegistryEntry};
pub use sealer::{SealReport, SealedModule, Sealer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
