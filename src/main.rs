use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use openerp_kvapi::{KVError, Store, StoreConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    for arg in &args {
        if arg == "--version" || arg == "-V" {
            println!("kvapi {}", VERSION);
            return ExitCode::SUCCESS;
        }
        if arg == "--help" || arg == "-h" {
            print_usage();
            return ExitCode::SUCCESS;
        }
    }

    let config = StoreConfig::from_args(&args);
    let command: Vec<&str> = args
        .iter()
        .filter(|arg| !arg.starts_with("--"))
        .map(String::as_str)
        .collect();

    match run(config, &command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kvapi: {} ({}, {})", e, e.name(), e.code());
            ExitCode::FAILURE
        }
    }
}

fn run(config: StoreConfig, command: &[&str]) -> Result<(), KVError> {
    let store = Store::open_with(config)?;
    let result = match command {
        ["get", key] => write_value(&store, key.as_bytes()),
        ["set", key, value] => store.store(key.as_bytes(), value.as_bytes()),
        ["append", key, value] => store.append(key.as_bytes(), value.as_bytes()),
        ["del", key] => store.delete(key.as_bytes()),
        _ => {
            print_usage();
            Err(KVError::Invalid)
        }
    };
    let closed = store.close();
    result.and(closed)
}

/// Stream the value to stdout without buffering it whole.
fn write_value(store: &Store, key: &[u8]) -> Result<(), KVError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    store.fetch_streaming(key, &mut |chunk: &[u8]| -> Result<(), KVError> {
        out.write_all(chunk).map_err(|_| KVError::IoErr)
    })?;
    out.flush().map_err(|_| KVError::IoErr)
}

fn print_usage() {
    println!("kvapi {}", VERSION);
    println!();
    println!("USAGE:");
    println!("    kvapi [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    get KEY             Write the value to stdout");
    println!("    set KEY VALUE       Create or replace a record");
    println!("    append KEY VALUE    Append to a record, creating it if absent");
    println!("    del KEY             Delete a record");
    println!();
    println!("OPTIONS:");
    println!("    --db=PATH           Database file, or :mem: (default)");
    println!("    --read-only         Open without write access");
    println!("    --chunk-size=BYTES  Streaming chunk size (default: 4096)");
    println!("    --fetch-retries=N   Extra probe/fill rounds (default: 3)");
    println!("    --version, -V       Print version");
    println!("    --help, -h          Print this help");
}
