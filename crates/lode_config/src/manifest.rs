//! lode.toml manifest parsing.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "lode.toml";

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub package: Option<Package>,
    pub build: BuildConfig,
    pub wasm: WasmConfig,
    /// Type name -> layout override.
    pub types: BTreeMap<String, TypeOverride>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// An artifact the build writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emit {
    Hlir,
    Mlir,
    Wat,
    Wasm,
}

impl Emit {
    pub const ALL: [Emit; 4] = [Emit::Hlir, Emit::Mlir, Emit::Wat, Emit::Wasm];

    pub fn extension(self) -> &'static str {
        match self {
            Emit::Hlir => "hlir",
            Emit::Mlir => "mlir",
            Emit::Wat => "wat",
            Emit::Wasm => "wasm",
        }
    }

    pub fn parse(s: &str) -> Option<Emit> {
        Emit::ALL.into_iter().find(|e| e.extension() == s)
    }
}

impl fmt::Display for Emit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub emit: Vec<Emit>,
    pub out_dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            emit: vec![Emit::Wat, Emit::Wasm],
            out_dir: "dist".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WasmConfig {
    /// Minimum pages; the module grows this to fit its data segment.
    pub memory_pages: u32,
    pub import_module: String,
    pub export_memory: bool,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            memory_pages: 1,
            import_module: "env".to_string(),
            export_memory: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TypeOverride {
    pub size: u32,
    #[serde(default = "default_signed")]
    pub signed: bool,
}

fn default_signed() -> bool {
    true
}

impl Manifest {
    pub fn parse(s: &str) -> io::Result<Manifest> {
        toml::from_str(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn emits(&self, e: Emit) -> bool {
        self.build.emit.contains(&e)
    }
}

pub fn load_manifest(path: &Path) -> io::Result<Manifest> {
    let s = std::fs::read_to_string(path)?;
    Manifest::parse(&s)
}

/// Nearest `lode.toml` at or above `start`.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(MANIFEST_FILE))
        .find(|p| p.is_file())
}
