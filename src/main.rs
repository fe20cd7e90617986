//! gitarchive - inspect and initialise repository libraries
//!
//! This is the main entry point for the gitarchive command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use gitarchive::library::{Library, LibraryId, LibraryOptions, Mode, RepositoryId};
use gitarchive::storage::{ObjectStorer, ReferenceStorer};

enum Command {
    Locations,
    List,
    Has(String),
    Init(String),
    Refs(String),
    Recover,
    PinVersion(u64),
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut root = PathBuf::from(".");
    let mut verbose = false;
    let mut options = match LibraryOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-l" | "--library" => {
                i += 1;
                if i < args.len() {
                    root = PathBuf::from(&args[i]);
                }
            }
            "-t" | "--transactional" => options.transactional = true,
            "-r" | "--rooted" => options.rooted = true,
            "--bucket" => {
                i += 1;
                match args.get(i).and_then(|v| v.parse().ok()) {
                    Some(bucket) => options.bucket = bucket,
                    None => {
                        eprintln!("--bucket needs a number");
                        return ExitCode::FAILURE;
                    }
                }
            }
            "--timeout-ms" => {
                i += 1;
                match args.get(i).and_then(|v| v.parse().ok()) {
                    Some(ms) => options.timeout = Duration::from_millis(ms),
                    None => {
                        eprintln!("--timeout-ms needs a number");
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("gitarchive v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()))
        .with_writer(std::io::stderr)
        .init();

    let command = match parse_command(&positional) {
        Some(command) => command,
        None => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(root, options, command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_command(args: &[String]) -> Option<Command> {
    let arg = |n: usize| args.get(n).cloned();
    match args.first()?.as_str() {
        "locations" => Some(Command::Locations),
        "list" => Some(Command::List),
        "has" => arg(1).map(Command::Has),
        "init" => arg(1).map(Command::Init),
        "refs" => arg(1).map(Command::Refs),
        "recover" => Some(Command::Recover),
        "pin-version" => arg(1)?.parse().ok().map(Command::PinVersion),
        _ => None,
    }
}

fn print_help() {
    println!("gitarchive - transactional git repository libraries");
    println!();
    println!("Usage: gitarchive [OPTIONS] COMMAND");
    println!();
    println!("Commands:");
    println!("  locations              List the containers of the library");
    println!("  list                   List every repository and its location");
    println!("  has ID                 Check if a repository exists");
    println!("  init ID                Create a repository and commit it");
    println!("  refs ID                Print the references of a repository");
    println!("  recover                Open every location, undoing unfinished writes");
    println!("  pin-version N          Record the current state of every location as version N");
    println!();
    println!("Options:");
    println!("  -l, --library PATH     Library root directory (default: .)");
    println!("  -t, --transactional    Isolate writes until commit");
    println!("  -r, --rooted           Several repositories per container");
    println!("  --bucket N             Bucket directory prefix length");
    println!("  --timeout-ms N         Write permit timeout");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Options can also be set with GITARCHIVE_TRANSACTIONAL, GITARCHIVE_ROOTED,");
    println!("GITARCHIVE_TIMEOUT_MS, GITARCHIVE_REGISTRY_CACHE and GITARCHIVE_BUCKET.");
}

fn run(
    root: PathBuf,
    options: LibraryOptions,
    command: Command,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let id = LibraryId::new(root.display().to_string())?;
    let library = match command {
        Command::Init(_) => Library::create(id, root, options)?,
        _ => Library::open(id, root, options)?,
    };

    match command {
        Command::Locations => {
            for location in library.locations()? {
                let size = std::fs::metadata(location.path()).map(|m| m.len()).unwrap_or(0);
                println!("{}\t{}\t{} bytes", location.id(), location.path().display(), size);
            }
        }
        Command::List => {
            for repository in library.repositories(Mode::ReadOnly)? {
                let repository = repository?;
                println!("{}\t{}", repository.id(), repository.location_id());
            }
        }
        Command::Has(id) => {
            let id = RepositoryId::new(id)?;
            if let Some(location) = library.find(&id)? {
                println!("{} is in location {}", id, location.id());
            } else {
                println!("{} not found", id);
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Init(id) => {
            let id = RepositoryId::new(id)?;
            let mut repository = library.init(&id)?;
            if library.options().transactional {
                repository.commit()?;
            } else {
                repository.close()?;
            }
            println!("initialized {} in location {}", id, repository.location_id());
        }
        Command::Refs(id) => {
            let id = RepositoryId::new(id)?;
            let repository = library.get(&id, Mode::ReadOnly)?;
            for reference in repository.storer().references()? {
                println!("{}", reference);
            }
            let objects = repository.storer().encoded_object_ids()?.len();
            println!("({} objects)", objects);
        }
        Command::Recover => {
            let locations = library.locations()?;
            println!("{} location(s) checked", locations.len());
        }
        Command::PinVersion(version) => {
            for location in library.locations()? {
                location.pin_version(version)?;
            }
            library.set_version(version)?;
            println!("pinned version {}", version);
        }
    }

    Ok(ExitCode::SUCCESS)
}
