//! memsim - Memory Hierarchy Simulator CLI
//!
//! Usage: memsim [OPTIONS] [COMMAND]
//!
//! With no command (or `shell`) this starts the interactive prompt;
//! `run <file>` replays a command script instead.

use std::path::Path;
use std::process::ExitCode;

use memsim::cli::{self, output::OutputFormatter, shell::Shell, OutputFormat};

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let config = cli::load_config();
    let mut output_format = config.output_format;

    // Parse global options and command
    let mut i = 1;
    while i < args.len() && args[i].starts_with('-') {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-V" | "--version" => {
                println!("memsim {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "-o" | "--output" => {
                i += 1;
                if i < args.len() {
                    output_format = args[i].parse().unwrap_or(OutputFormat::Table);
                }
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                return ExitCode::from(1);
            }
        }
        i += 1;
    }

    let formatter = OutputFormatter::new(output_format);
    let mut shell = Shell::new(config).with_format(output_format);

    let result = match args.get(i).map(|s| s.as_str()) {
        None | Some("shell") => shell.run(),
        Some("run") => match args.get(i + 1) {
            Some(path) => shell.run_script(Path::new(path)),
            None => {
                eprintln!("Usage: memsim run <file>");
                return ExitCode::from(1);
            }
        },
        Some("help") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from(1)
        }
    }
}

fn print_usage() {
    println!("memsim - Memory Hierarchy Simulator");
    println!();
    println!("USAGE:");
    println!("    memsim [OPTIONS] [COMMAND]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help             Show this help message");
    println!("    -V, --version          Show version information");
    println!("    -o, --output <FORMAT>  Output format (table|json|yaml|plain)");
    println!();
    println!("COMMANDS:");
    println!("    shell      Interactive shell mode (default)");
    println!("    run <file> Execute a command script");
    println!("    help       Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    memsim");
    println!("    memsim -o json shell");
    println!("    memsim run traces/buddy.msim");
    println!();
    println!("SHELL COMMANDS:");
    println!("    init <ram> <page> <l1 geometry> <l2 geometry>   Reset the system");
    println!("    alloc <ff|bf|wf|buddy> <bytes>                  Allocate");
    println!("    free <id>                                       Free by block id");
    println!("    vm_init <pid> <size>                            Create a process");
    println!("    access <pid> <vaddr>                            Access memory");
    println!("    vm_table <pid> | stats | dump | exit            Inspect and quit");
}
