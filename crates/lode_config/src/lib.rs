//! lode build configuration: the `lode.toml` manifest.

mod manifest;

pub use manifest::{
    find_manifest, load_manifest, BuildConfig, Emit, Manifest, Package, TypeOverride, WasmConfig,
    MANIFEST_FILE,
};
