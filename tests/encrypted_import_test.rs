//! Integration tests for encrypted module imports

use aurora_loader::crypto::plaintext_digest;
use aurora_loader::embed::render_registry;
use aurora_loader::{
    install, ImportContext, ImportSystem, KeyMaterial, LoaderConfig, LoaderError,
    ModuleRegistry, RhaiExecutor, Sealer, SourceFileFinder,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const KEY: &str = "0123456789abcdef";
const IV: &str = "abcdef9876543210";

fn keys() -> KeyMaterial {
    KeyMaterial::from_text(KEY, IV).unwrap()
}

/// Write `source` encrypted under the test keys to `dir/file`
fn seal(dir: &Path, file: &str, source: &str) {
    fs::write(dir.join(file), keys().encrypt(source.as_bytes()).unwrap()).unwrap();
}

fn system_for(
    dir: &Path,
    modules: &[(&str, &str, Option<&str>)],
    keys: KeyMaterial,
) -> ImportSystem {
    let registry = ModuleRegistry::from_static(dir, modules).unwrap();
    let imports = ImportSystem::new();
    install(&imports, ImportContext::new(keys, registry));
    imports
}

/// The basic scenario: one sealed module, matching key and IV
#[test]
fn test_import_sealed_module() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42;");

    let imports = system_for(dir.path(), &[("pkg.mod_a", "mod_a_encrypted.enc", None)], keys());
    let module = imports.import("pkg.mod_a").unwrap();

    assert_eq!(module.name(), "pkg.mod_a");
    assert_eq!(module.get_as::<i64>("VALUE"), Some(42));
    assert_eq!(
        module.origin(),
        Some(dir.path().join("mod_a_encrypted.enc").as_path())
    );
}

/// IV off by one byte in the padding position: padding check fails
#[test]
fn test_wrong_iv_fails_without_partial_module() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42;");

    let mut iv = IV.as_bytes().to_vec();
    iv[15] ^= 0x01;
    let wrong = KeyMaterial::new(KEY.as_bytes(), &iv).unwrap();

    let imports = system_for(dir.path(), &[("pkg.mod_a", "mod_a_encrypted.enc", None)], wrong);
    let err = imports.import("pkg.mod_a").unwrap_err();

    assert!(matches!(err, LoaderError::Integrity { .. }), "got {err}");
    assert!(!imports.is_loaded("pkg.mod_a"));
    assert!(imports.loaded_names().is_empty());
}

/// Embedded registry rows carry the seal-time digest, so a one-byte IV change
/// is rejected wherever it lands, not only on the padding byte
#[test]
fn test_wrong_iv_rejected_at_every_position_with_embedded_registry() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("mod_a.rhai"), "let VALUE = 42;").unwrap();
    let report = Sealer::new(LoaderConfig::default(), keys())
        .seal_package(dir.path(), "pkg")
        .unwrap();

    let digest = plaintext_digest(b"let VALUE = 42;");
    assert!(render_registry(&report.registry).contains(&format!(
        "(\"pkg.mod_a\", \"mod_a_encrypted.enc\", Some({:?}))",
        digest
    )));
    let rows = [("pkg.mod_a", "mod_a_encrypted.enc", Some(digest.as_str()))];

    let imports = system_for(dir.path(), &rows, keys());
    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(42)
    );

    for position in 0..IV.len() {
        let mut iv = IV.as_bytes().to_vec();
        iv[position] ^= 0x01;
        let wrong = KeyMaterial::new(KEY.as_bytes(), &iv).unwrap();

        let imports = system_for(dir.path(), &rows, wrong);
        let err = imports.import("pkg.mod_a").unwrap_err();
        assert!(
            matches!(err, LoaderError::Integrity { .. }),
            "IV byte {position}: got {err}"
        );
        assert!(!imports.is_loaded("pkg.mod_a"), "IV byte {position}");
    }
}

/// IV off by one byte in the first position of a sealed package: the digest
/// recorded at seal time catches what padding alone cannot
#[test]
fn test_wrong_iv_caught_by_digest() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("mod_a.rhai"), "let VALUE = 42;").unwrap();
    let report = Sealer::new(LoaderConfig::default(), keys())
        .seal_package(dir.path(), "pkg")
        .unwrap();

    let mut iv = IV.as_bytes().to_vec();
    iv[0] ^= 0x01;
    let wrong = KeyMaterial::new(KEY.as_bytes(), &iv).unwrap();

    let imports = ImportSystem::new();
    install(&imports, ImportContext::new(wrong, report.registry));

    let err = imports.import("pkg.mod_a").unwrap_err();
    assert!(err.to_string().contains("digest mismatch"), "got {err}");
    assert!(!imports.is_loaded("pkg.mod_a"));
}

#[test]
fn test_missing_ciphertext_fails_import() {
    let dir = TempDir::new().unwrap();
    let imports = system_for(dir.path(), &[("pkg.gone", "gone_encrypted.enc", None)], keys());

    assert!(matches!(
        imports.import("pkg.gone"),
        Err(LoaderError::CiphertextMissing { .. })
    ));
    assert!(!imports.is_loaded("pkg.gone"));
}

#[test]
fn test_unregistered_name_falls_through() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42;");
    let imports = system_for(dir.path(), &[("pkg.mod_a", "mod_a_encrypted.enc", None)], keys());

    assert!(matches!(
        imports.import("pkg.other"),
        Err(LoaderError::ModuleNotFound(_))
    ));
}

/// A sealed module shadows a plain module of the same name
#[test]
fn test_encrypted_module_shadows_plain_module() {
    let sealed_dir = TempDir::new().unwrap();
    let plain_dir = TempDir::new().unwrap();
    seal(sealed_dir.path(), "mod_a_encrypted.enc", "let VALUE = 42;");
    fs::create_dir_all(plain_dir.path().join("pkg")).unwrap();
    fs::write(plain_dir.path().join("pkg/mod_a.rhai"), "let VALUE = 1;").unwrap();
    fs::write(plain_dir.path().join("pkg/plain.rhai"), "let VALUE = 7;").unwrap();

    let plain_finder = Arc::new(SourceFileFinder::new(
        plain_dir.path(),
        "rhai",
        Arc::new(RhaiExecutor::new()),
    ));

    // Plain finder alone
    let imports = ImportSystem::new();
    imports.push_finder(plain_finder.clone());
    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(1)
    );

    // Encrypted finder installed after the plain one still goes first
    let imports = ImportSystem::new();
    imports.push_finder(plain_finder);
    let registry = ModuleRegistry::from_static(
        sealed_dir.path(),
        &[("pkg.mod_a", "mod_a_encrypted.enc", None)],
    )
    .unwrap();
    install(&imports, ImportContext::new(keys(), registry));

    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(42)
    );
    assert_eq!(
        imports.import("pkg.plain").unwrap().get_as::<i64>("VALUE"),
        Some(7)
    );
}

#[test]
fn test_concurrent_imports_of_distinct_modules() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42; let NAME = \"a\";");
    seal(
        dir.path(),
        "mod_b_encrypted.enc",
        "let VALUE = 7; let NAME = \"b\"; let padding = \"a longer module body spanning several cipher blocks\";",
    );
    let imports = system_for(
        dir.path(),
        &[
            ("pkg.mod_a", "mod_a_encrypted.enc", None),
            ("pkg.mod_b", "mod_b_encrypted.enc", None),
        ],
        keys(),
    );

    let handles: Vec<_> = [("pkg.mod_a", 42_i64, "a"), ("pkg.mod_b", 7, "b")]
        .into_iter()
        .flat_map(|case| std::iter::repeat(case).take(4))
        .map(|(name, value, tag)| {
            let imports = imports.clone();
            thread::spawn(move || {
                let module = imports.import(name).unwrap();
                assert_eq!(module.get_as::<i64>("VALUE"), Some(value));
                assert_eq!(module.get_as::<String>("NAME").as_deref(), Some(tag));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(imports.loaded_names(), vec!["pkg.mod_a", "pkg.mod_b"]);
}

/// Sealed modules can import each other through the same import system
#[test]
fn test_sealed_module_imports_sealed_module() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42; fn triple(x) { x * 3 }");
    seal(
        dir.path(),
        "mod_b_encrypted.enc",
        "import \"pkg.mod_a\" as a; let DOUBLE = a::VALUE * 2; let TRIPLE = a::triple(5);",
    );
    let imports = system_for(
        dir.path(),
        &[
            ("pkg.mod_a", "mod_a_encrypted.enc", None),
            ("pkg.mod_b", "mod_b_encrypted.enc", None),
        ],
        keys(),
    );

    let module = imports.import("pkg.mod_b").unwrap();
    assert_eq!(module.get_as::<i64>("DOUBLE"), Some(84));
    assert_eq!(module.get_as::<i64>("TRIPLE"), Some(15));
    assert!(imports.is_loaded("pkg.mod_a"));
}

#[test]
fn test_circular_import_fails() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "x_encrypted.enc", "import \"pkg.y\" as y; let X = 1;");
    seal(dir.path(), "y_encrypted.enc", "import \"pkg.x\" as x; let Y = 2;");
    let imports = system_for(
        dir.path(),
        &[("pkg.x", "x_encrypted.enc", None), ("pkg.y", "y_encrypted.enc", None)],
        keys(),
    );

    let err = imports.import("pkg.x").unwrap_err();
    assert!(matches!(err, LoaderError::Execution { .. }), "got {err}");
    assert!(!imports.is_loaded("pkg.x"));
    assert!(!imports.is_loaded("pkg.y"));
}

/// Nothing decrypted is retained: a re-import reads the file again
#[test]
fn test_reimport_decrypts_from_disk() {
    let dir = TempDir::new().unwrap();
    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 42;");
    let imports = system_for(dir.path(), &[("pkg.mod_a", "mod_a_encrypted.enc", None)], keys());

    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(42)
    );

    seal(dir.path(), "mod_a_encrypted.enc", "let VALUE = 43;");
    // Cached module is unaffected until invalidated
    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(42)
    );
    imports.invalidate("pkg.mod_a");
    assert_eq!(
        imports.import("pkg.mod_a").unwrap().get_as::<i64>("VALUE"),
        Some(43)
    );
}

/// Seal a package, reload its manifest and import from it with env-supplied keys
#[test]
fn test_seal_then_import_via_manifest_and_env() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("__init__.rhai"), "").unwrap();
    fs::write(root.join("mod_a.rhai"), "let VALUE = 42;").unwrap();
    fs::write(
        root.join("sub/mod_b.rhai"),
        "import \"pkg.mod_a\" as a; let SUM = a::VALUE + 1;",
    )
    .unwrap();

    let config = LoaderConfig::default().env_vars("AURORA_IT_SEAL_KEY", "AURORA_IT_SEAL_IV");
    let report = Sealer::new(config.clone(), keys())
        .seal_package(root, "pkg")
        .unwrap();
    assert_eq!(report.sealed.len(), 2);

    std::env::set_var("AURORA_IT_SEAL_KEY", KEY);
    std::env::set_var("AURORA_IT_SEAL_IV", IV);

    let registry = ModuleRegistry::load_manifest(&root.join(&config.manifest_name)).unwrap();
    let context = ImportContext::from_env(&config, registry).unwrap();
    let imports = ImportSystem::new();
    install(&imports, context);

    let module = imports.import("pkg.sub.mod_b").unwrap();
    assert_eq!(module.get_as::<i64>("SUM"), Some(43));
}

/// Independently configured systems coexist without sharing state
#[test]
fn test_independent_systems() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    seal(dir_a.path(), "m_encrypted.enc", "let VALUE = 1;");

    let other_keys = KeyMaterial::from_text("fedcba9876543210", IV).unwrap();
    fs::write(
        dir_b.path().join("m_encrypted.enc"),
        other_keys.encrypt(b"let VALUE = 2;").unwrap(),
    )
    .unwrap();

    let a = system_for(dir_a.path(), &[("pkg.m", "m_encrypted.enc", None)], keys());
    let b = system_for(dir_b.path(), &[("pkg.m", "m_encrypted.enc", None)], other_keys);

    assert_eq!(a.import("pkg.m").unwrap().get_as::<i64>("VALUE"), Some(1));
    assert_eq!(b.import("pkg.m").unwrap().get_as::<i64>("VALUE"), Some(2));
}
