//! CLI tool to compile Erde files to Lua.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use erde::{CompileError, CompileOptions, GeneratedCode, Target};

#[derive(Parser, Debug)]
#[command(name = "erde", version, about = "Compile Erde source files to Lua")]
struct Cli {
    /// Lua version to generate code for (5.1, 5.1+, 5.2, 5.3, 5.4, jit)
    #[arg(long, global = true, default_value_t = Target::default())]
    target: Target,

    /// Module to require for bitwise operators on targets without them
    #[arg(long, global = true)]
    bitlib: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile each file to a `.lua` file next to it
    Compile {
        /// Print the generated Lua to stdout instead of writing files
        #[arg(long)]
        print: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Check that each file compiles, without writing anything
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the generated-to-original line map of each file
    Sourcemap {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Command {
    fn files(&self) -> &[PathBuf] {
        match self {
            Self::Compile { files, .. } | Self::Check { files } | Self::Sourcemap { files } => {
                files
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut options = CompileOptions::new().target(cli.target);
    if let Some(name) = &cli.bitlib {
        options = options.bitlib(name);
    }

    let mut had_error = false;

    for path in cli.command.files() {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                had_error = true;
                continue;
            }
        };

        let generated = match erde::compile_with(&content, &options) {
            Ok(generated) => generated,
            Err(e) => {
                report(path, &e);
                had_error = true;
                continue;
            }
        };

        let result = match &cli.command {
            Command::Compile { print: true, .. } => {
                print!("{}", generated.code);
                Ok(())
            }
            Command::Compile { print: false, .. } => write_lua(path, &generated),
            Command::Check { .. } => {
                eprintln!("{}: ok", path.display());
                Ok(())
            }
            Command::Sourcemap { .. } => {
                print_source_map(path, &generated);
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("{}: {e}", path.display());
            had_error = true;
        }
    }

    if had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn report(path: &Path, error: &CompileError) {
    eprintln!(
        "{}:{}:{}: {}",
        path.display(),
        error.line(),
        error.column(),
        error.message()
    );
}

fn write_lua(path: &Path, generated: &GeneratedCode) -> std::io::Result<()> {
    let out = path.with_extension("lua");
    if out == path {
        return Err(std::io::Error::other("output would overwrite the input file"));
    }
    fs::write(&out, &generated.code)?;
    log::info!("wrote {}", out.display());
    Ok(())
}

fn print_source_map(path: &Path, generated: &GeneratedCode) {
    println!("{}:", path.display());
    for (lua_line, erde_line) in generated.source_map.iter() {
        match erde_line {
            Some(line) => println!("  {lua_line} -> {line}"),
            None => println!("  {lua_line} -> -"),
        }
    }
}
