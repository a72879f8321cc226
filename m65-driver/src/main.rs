//! M65 6502 Compiler Driver
//!
//! Thin command-line glue around the backend: reads a JSON IR module,
//! compiles it for a named target and writes the artifact next to a JSON
//! relocation table.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use m65_backend::{compile_module, Artifact, CodegenOptions, CompiledOutput, Module, TARGETS};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "m65c")]
#[command(about = "M65 6502 Compiler")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON IR module
    Compile {
        /// Input IR module (JSON)
        input: PathBuf,

        /// Backend interface to emit for
        #[arg(short, long, default_value = "symbolic")]
        target: String,

        /// Code generation options (JSON); missing fields take defaults
        #[arg(long)]
        options: Option<PathBuf>,

        /// Output file; defaults to the input with a target extension
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the mos6502 image as an Atari binary-load file instead of JSON
        #[arg(long)]
        xex: bool,
    },

    /// List the valid target names
    Targets,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            target,
            options,
            output,
            xex,
        } => compile_file(&input, &target, options.as_deref(), output.as_deref(), xex),
        Commands::Targets => {
            for name in TARGETS {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn load_options(path: Option<&Path>) -> Result<CodegenOptions> {
    let Some(path) = path else {
        return Ok(CodegenOptions::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading options {}", path.display()))?;
    Ok(CodegenOptions::from_json(&text)?)
}

fn extension(artifact: &Artifact, xex: bool) -> &'static str {
    match artifact {
        Artifact::Listing(_) => "asm",
        Artifact::Bytecode(_) => "m65b",
        Artifact::Nothing => "stats.json",
        Artifact::Image(_) if xex => "xex",
        Artifact::Image(_) => "image.json",
    }
}

/// `out.asm` -> `out.asm.reloc.json`
fn relocation_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".reloc.json");
    PathBuf::from(name)
}

fn compile_file(
    input: &Path,
    target: &str,
    options: Option<&Path>,
    output: Option<&Path>,
    xex: bool,
) -> Result<()> {
    let options = load_options(options)?;
    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let module: Module =
        serde_json::from_str(&text).with_context(|| format!("parsing IR module {}", input.display()))?;

    let compiled = compile_module(&module, target, options)
        .with_context(|| format!("compiling '{}' for {}", module.name, target))?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => input.with_extension(extension(&compiled.artifact, xex)),
    };
    write_output(&compiled, &output, xex)?;
    Ok(())
}

fn write_output(compiled: &CompiledOutput, output: &Path, xex: bool) -> Result<()> {
    match &compiled.artifact {
        Artifact::Listing(text) => fs::write(output, text)?,
        Artifact::Bytecode(bytes) => fs::write(output, bytes)?,
        Artifact::Nothing => fs::write(output, serde_json::to_string_pretty(&compiled.statistics)?)?,
        Artifact::Image(image) if xex => fs::write(output, image.to_binary_load()?)?,
        Artifact::Image(image) => fs::write(output, serde_json::to_string_pretty(image)?)?,
    }
    let relocations = relocation_path(output);
    fs::write(&relocations, serde_json::to_string_pretty(&compiled.relocations)?)
        .with_context(|| format!("writing {}", relocations.display()))?;

    let stats = &compiled.statistics;
    info!(
        "{}: {} functions, {} instructions, {} code bytes, {} data bytes",
        compiled.target, stats.functions, stats.instructions, stats.code_bytes, stats.data_bytes
    );
    println!("Output written to: {}", output.display());
    Ok(())
}
