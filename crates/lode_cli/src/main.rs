//! lode CLI: build, dump.

use clap::{Args, Parser, Subcommand};
use lode_compiler::{compile_program, type_information, wasm_options, CompileError, CompileOptions, CompiledModule};
use lode_config::{find_manifest, load_manifest, Emit, Manifest};
use lode_syntax::ast::Program;
use lode_syntax::format_diagnostic;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "lode")]
#[command(about = "lode compiler backend: typed AST to HLIR, MLIR and WebAssembly")]
struct Cli {
    /// Log every compiler stage to stderr (same as LODE_DEBUG=1)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a typed AST and write the configured artifacts
    Build(BuildArgs),
    /// Print one stage of the pipeline to stdout
    Dump {
        /// Typed AST as JSON
        path: PathBuf,
        /// hlir, mlir or wat
        #[arg(long, default_value = "hlir")]
        stage: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    /// Typed AST as JSON
    path: PathBuf,
    /// lode.toml to use instead of the nearest one above the AST
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Artifacts to write (hlir, mlir, wat, wasm); overrides the manifest
    #[arg(long, value_delimiter = ',')]
    emit: Vec<String>,
    /// Output directory; overrides the manifest
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Source file the AST was produced from, shown with diagnostics
    #[arg(long)]
    source: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose || std::env::var_os("LODE_DEBUG").is_some());
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Build(args) => {
            for path in cmd_build(&args)? {
                println!("Wrote {}", path.display());
            }
            Ok(())
        }
        Commands::Dump {
            path,
            stage,
            manifest,
        } => {
            print!("{}", cmd_dump(&path, &stage, manifest.as_deref())?);
            Ok(())
        }
    }
}

fn load_program(path: &Path) -> Result<Program, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: invalid AST: {}", path.display(), e))
}

/// The explicit manifest, else the nearest `lode.toml` above the AST, else
/// defaults. Also returns the directory relative paths resolve against.
fn resolve_manifest(explicit: Option<&Path>, ast: &Path) -> Result<(Manifest, PathBuf), String> {
    let ast_dir = ast
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_manifest(&ast_dir),
    };
    match path {
        Some(p) => {
            let manifest = load_manifest(&p).map_err(|e| format!("{}: {}", p.display(), e))?;
            debug!(manifest = %p.display(), "loaded manifest");
            let root = p
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .map_or(ast_dir, Path::to_path_buf);
            Ok((manifest, root))
        }
        None => Ok((Manifest::default(), ast_dir)),
    }
}

fn parse_emits(names: &[String]) -> Result<Vec<Emit>, String> {
    names
        .iter()
        .map(|n| Emit::parse(n.trim()).ok_or_else(|| format!("unknown artifact `{}`", n)))
        .collect()
}

fn options_for(manifest: &Manifest, emit: &[Emit]) -> CompileOptions {
    let wants_wasm = emit.iter().any(|e| matches!(e, Emit::Wat | Emit::Wasm));
    CompileOptions {
        mlir: emit.contains(&Emit::Mlir),
        wasm: wants_wasm.then(|| wasm_options(&manifest.wasm)),
    }
}

/// Renders a compile error with source context when the source is known.
fn report(err: &CompileError, source: Option<&Path>, ast: &Path) -> String {
    let text = source.and_then(|p| std::fs::read_to_string(p).ok());
    let shown = source.unwrap_or(ast);
    format_diagnostic(
        text.as_deref(),
        &shown.display().to_string(),
        &err.to_diagnostic(),
    )
}

fn compile(
    program: &Program,
    manifest: &Manifest,
    emit: &[Emit],
    source: Option<&Path>,
    ast: &Path,
) -> Result<CompiledModule, String> {
    let types = type_information(manifest);
    compile_program(program, &types, &options_for(manifest, emit))
        .map_err(|e| report(&e, source, ast))
}

/// Compiles and writes one file per requested artifact. Returns the paths
/// written, in `hlir, mlir, wat, wasm` order.
fn cmd_build(args: &BuildArgs) -> Result<Vec<PathBuf>, String> {
    let program = load_program(&args.path)?;
    let (manifest, root) = resolve_manifest(args.manifest.as_deref(), &args.path)?;
    let mut emit = if args.emit.is_empty() {
        manifest.build.emit.clone()
    } else {
        parse_emits(&args.emit)?
    };
    emit.sort();
    emit.dedup();
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| root.join(&manifest.build.out_dir));
    let name = match &manifest.package {
        Some(p) => p.name.clone(),
        None => args
            .path
            .file_stem()
            .map_or("main".to_string(), |s| s.to_string_lossy().into_owned()),
    };

    let module = compile(&program, &manifest, &emit, args.source.as_deref(), &args.path)?;
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| format!("cannot create {}: {}", out_dir.display(), e))?;

    let mut written = Vec::new();
    for e in emit {
        let bytes = match e {
            Emit::Hlir => module.hlir_text().into_bytes(),
            Emit::Mlir => module.mlir_text().into_bytes(),
            Emit::Wat | Emit::Wasm => {
                let Some(wasm) = &module.wasm else {
                    return Err("wasm output was not produced".to_string());
                };
                if e == Emit::Wat {
                    wasm.to_wat().into_bytes()
                } else {
                    wasm.encode().map_err(|err| err.to_string())?
                }
            }
        };
        let path = out_dir.join(format!("{}.{}", name, e.extension()));
        std::fs::write(&path, bytes).map_err(|err| format!("{}: {}", path.display(), err))?;
        written.push(path);
    }
    info!(artifacts = written.len(), out_dir = %out_dir.display(), "build finished");
    Ok(written)
}

fn cmd_dump(path: &Path, stage: &str, manifest: Option<&Path>) -> Result<String, String> {
    let stage = match Emit::parse(stage) {
        Some(Emit::Wasm) => return Err("the binary module cannot be dumped; use `build`".into()),
        Some(s) => s,
        None => return Err(format!("unknown stage `{}`", stage)),
    };
    let program = load_program(path)?;
    let (manifest, _) = resolve_manifest(manifest, path)?;
    let module = compile(&program, &manifest, &[stage], None, path)?;
    Ok(match stage {
        Emit::Hlir => module.hlir_text(),
        Emit::Mlir => module.mlir_text(),
        _ => module.wasm.map(|w| w.to_wat()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_syntax::ast::{FuncDecl, Item, Stmt, Type, Value, VarWithType};

    fn hello() -> Program {
        Program {
            items: vec![Item::Func(FuncDecl::new(
                "main",
                vec![],
                vec![],
                vec![
                    Stmt::call("PrintString", vec![Value::string("Hello, world!\\n")]),
                    Stmt::let_(VarWithType::new("n", Type::Int), Value::int(5)),
                    Stmt::call("PrintInt", vec![Value::var("n", Type::Int)]),
                ],
            ))],
        }
    }

    /// Fresh directory holding `main.json`.
    fn project(name: &str, program: &Program) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("lode_cli_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let ast = dir.join("main.json");
        std::fs::write(&ast, serde_json::to_string_pretty(program).unwrap()).unwrap();
        (dir, ast)
    }

    fn exports(wasm: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for payload in wasmparser::Parser::new(0).parse_all(wasm) {
            if let wasmparser::Payload::ExportSection(reader) = payload.unwrap() {
                for export in reader {
                    names.push(export.unwrap().name.to_string());
                }
            }
        }
        names
    }

    #[test]
    fn build_writes_default_artifacts() {
        let (dir, ast) = project("default", &hello());
        let written = cmd_build(&BuildArgs {
            path: ast,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            written,
            vec![dir.join("dist/main.wat"), dir.join("dist/main.wasm")]
        );
        let wasm = std::fs::read(&written[1]).unwrap();
        wasmparser::Validator::new().validate_all(&wasm).unwrap();
        assert_eq!(exports(&wasm), vec!["memory", "main"]);
        let wat = std::fs::read_to_string(&written[0]).unwrap();
        assert!(wat.contains("(import \"env\" \"PrintInt\""));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_next_to_the_ast_is_used() {
        let (dir, ast) = project("manifest", &hello());
        std::fs::write(
            dir.join("lode.toml"),
            "[package]\nname = \"hello\"\n\n[build]\nemit = [\"hlir\", \"wasm\"]\nout_dir = \"out\"\n\n[wasm]\nimport_module = \"lode\"\n",
        )
        .unwrap();
        let written = cmd_build(&BuildArgs {
            path: ast,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            written,
            vec![dir.join("out/hello.hlir"), dir.join("out/hello.wasm")]
        );
        let hlir = std::fs::read_to_string(&written[0]).unwrap();
        assert!(hlir.starts_with("func main (params 0, returns 0, locals 1, temps 0):"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn flags_override_the_manifest() {
        let (dir, ast) = project("flags", &hello());
        let out = dir.join("elsewhere");
        let written = cmd_build(&BuildArgs {
            path: ast,
            emit: vec!["mlir".to_string()],
            out_dir: Some(out.clone()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(written, vec![out.join("main.mlir")]);
        assert!(!dir.join("dist").exists());
        assert!(parse_emits(&["exe".to_string()]).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn compile_errors_name_the_function() {
        let program = Program {
            items: vec![Item::Func(FuncDecl::new(
                "main",
                vec![],
                vec![],
                vec![Stmt::call("Missing", vec![])],
            ))],
        };
        let (dir, ast) = project("error", &program);
        let err = cmd_build(&BuildArgs {
            path: ast,
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.contains("undefined function `Missing`"), "{}", err);
        assert!(err.contains("main"), "{}", err);
        assert!(!dir.join("dist").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dump_prints_one_stage() {
        let (dir, ast) = project("dump", &hello());
        let mlir = cmd_dump(&ast, "mlir", None).unwrap();
        assert!(mlir.contains("  CALL PrintInt(LV0)"));
        let wat = cmd_dump(&ast, "wat", None).unwrap();
        assert!(wat.starts_with("(module\n"));
        assert!(cmd_dump(&ast, "wasm", None).is_err());
        assert!(cmd_dump(&ast, "asm", None).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_ast_is_reported() {
        let dir = std::env::temp_dir().join(format!("lode_cli_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let ast = dir.join("main.json");
        std::fs::write(&ast, "{\"items\": 3}").unwrap();
        let err = load_program(&ast).unwrap_err();
        assert!(err.contains("invalid AST"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
