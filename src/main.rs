use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{bail, Context, Result};
use clap::{error::ErrorKind, Parser, Subcommand};
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use cpu16::{
    asm::Assembler,
    emu::{debugger::Debugger, Allocation, EmuConfig, Emulator},
    plat::{le_bytes_to_words, words_to_le_bytes},
};

#[derive(Parser)]
#[command(name = "cpu16", version)]
#[command(about = "Assembler and virtual machine for a small 16-bit CPU")]
struct Cli {
    /// Trace every executed instruction and halt (instead of retrying) when a program runs off
    /// its end
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a source file into a little-endian program image
    Com {
        #[arg(help = "Assembly source file")]
        path: PathBuf,

        #[arg(
            short,
            long,
            help = "Output file (defaults to the input path without its extension)"
        )]
        output: Option<PathBuf>,
    },
    /// Load a program image and run it, exiting with the final value of `b`
    Exe {
        #[arg(help = "Program image")]
        path: PathBuf,

        #[arg(help = "Arguments passed to the program after its own path")]
        args: Vec<String>,

        #[arg(long, help = "Throttle execution to this many instructions per second")]
        clock_hz: Option<f64>,

        #[arg(long, help = "Make allocations advance hp instead of dp")]
        heap_alloc: bool,

        #[arg(long, help = "Start in the interactive debugger")]
        step: bool,
    },
}

fn usage() -> ! {
    let exe = std::env::args().next().unwrap_or_else(|| "cpu16".to_owned());
    eprintln!("usage: {exe} [com|exe] <path> [args...]");
    process::exit(1)
}

fn output_path(input: &Path) -> Result<PathBuf> {
    if input.extension().is_none() {
        bail!(
            "cannot derive an output name from {}: it has no extension (use -o)",
            input.display()
        );
    }
    Ok(input.with_extension(""))
}

fn compile(path: &Path, output: Option<PathBuf>) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let output = match output {
        Some(output) => output,
        None => output_path(path)?,
    };

    let stream = path.to_string_lossy();
    let bin = Assembler::default()
        .assemble(&stream, &source)
        .with_context(|| format!("Failed to assemble {}", path.display()))?;

    fs::write(&output, words_to_le_bytes(&bin))
        .with_context(|| format!("Failed to write output to {}", output.display()))?;
    log::info!(
        "{} -> {} ({} words)",
        path.display(),
        output.display(),
        bin.len()
    );
    Ok(())
}

fn execute(path: &Path, args: Vec<String>, config: EmuConfig, step: bool) -> Result<u16> {
    let image = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let program = le_bytes_to_words(&image);

    let mut emu = Emulator::new(config)?;
    emu.load_program(&program)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut argv = vec![path.to_string_lossy().into_owned()];
    argv.extend(args);

    if step {
        emu.start(&argv)?;
        Debugger::new(&mut emu).repl()?;
        emu.halt();
        Ok(emu.exit_status())
    } else {
        Ok(emu.run(&argv)?)
    }
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => usage(),
    };

    let level = if cli.debug {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        ConfigBuilder::new().set_time_level(LevelFilter::Off).build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    match cli.command {
        Commands::Com { path, output } => compile(&path, output)?,
        Commands::Exe {
            path,
            args,
            clock_hz,
            heap_alloc,
            step,
        } => {
            let config = EmuConfig {
                debug: cli.debug,
                allocation: if heap_alloc {
                    Allocation::Heap
                } else {
                    Allocation::Literal
                },
                clock_rate_hz: clock_hz,
            };
            let status = execute(&path, args, config, step)?;
            log::debug!("exit code: {status}");
            process::exit(i32::from(status));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("dir/prog.s")).unwrap(),
            PathBuf::from("dir/prog")
        );
        assert_eq!(
            output_path(Path::new("prog.tar.s")).unwrap(),
            PathBuf::from("prog.tar")
        );
        assert!(output_path(Path::new("prog")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["cpu16", "exe", "prog", "x", "y", "--heap-alloc"]).unwrap();
        match cli.command {
            Commands::Exe {
                path,
                args,
                heap_alloc,
                step,
                clock_hz,
            } => {
                assert_eq!(path, PathBuf::from("prog"));
                assert_eq!(args, ["x", "y"]);
                assert!(heap_alloc);
                assert!(!step);
                assert_eq!(clock_hz, None);
            }
            Commands::Com { .. } => panic!("expected exe"),
        }
        assert!(Cli::try_parse_from(["cpu16", "run", "prog"]).is_err());
        assert!(Cli::try_parse_from(["cpu16", "com"]).is_err());
    }
}
