//! Source generator for embedding a registry as literal data
//!
//! The generated file is meant to be written from a build script and pulled
//! in with `include!`, so the registry ships inside the binary instead of as a
//! manifest next to the package:
//!
//! ```rust,ignore
//! include!(concat!(env!("OUT_DIR"), "/encrypted_modules.rs"));
//!
//! let registry = ModuleRegistry::from_static(package_dir, ENCRYPTED_MODULES)?;
//! ```

use crate::registry::ModuleRegistry;

/// Name of the generated static
pub const STATIC_NAME: &str = "ENCRYPTED_MODULES";

/// Render `registry` as a `&[(&str, &str, Option<&str>)]` static of
/// `(name, path, digest)` rows
pub fn render_registry(registry: &ModuleRegistry) -> String {
    let mut code = String::new();
    code.push_str("// Auto-generated by aurora-loader - DO NOT EDIT\n");
    code.push_str(&format!(
        "pub static {}: &[(&str, &str, Option<&str>)] = &[\n",
        STATIC_NAME
    ));
    for entry in registry.entries() {
        // Forward slashes keep the literal portable across build hosts
        let path = entry.path.to_string_lossy().replace('\\', "/");
        let digest = match &entry.digest {
            Some(d) => format!("Some({:?})", d),
            None => "None".to_string(),
        };
        code.push_str(&format!("    ({:?}, {:?}, {}),\n", entry.name, path, digest));
    }
    code.push_str("];\n");
    code
}
