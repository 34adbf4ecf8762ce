//! Sandboxed reference validator
//!
//! Spawned by the host for every candidate image. Applies resource limits
//! to itself, reads only the image's reference table and prints a JSON
//! verdict on stdout. Any failure is a rejection.
//!
//! Usage:
//!   addon-validate (--stdin | --path <image>) [--deny=<regex>]... [--enforce-allow [--allow=<name>]...]
//!
//! With `--stdin` the image is read from standard input and `--path` only
//! names it in log output.

use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, warn};

use addon_host::module::sandbox::ResourceLimits;
use addon_host::module::validation::{inspect_bytes, inspect_file, ValidationPolicy, Verdict};
use addon_host::utils::init_validator_logging;

#[derive(Parser, Debug)]
#[command(name = "addon-validate", about = "Check an addon image's references against a policy")]
struct Args {
    /// Candidate image (label only with --stdin)
    #[arg(long)]
    path: Option<PathBuf>,

    /// Read the image from standard input
    #[arg(long)]
    stdin: bool,

    /// Deny pattern (regular expression), repeatable
    #[arg(long, allow_hyphen_values = true)]
    deny: Vec<String>,

    /// Allowed reference name, repeatable; only used with --enforce-allow
    #[arg(long, allow_hyphen_values = true)]
    allow: Vec<String>,

    /// Require every reference to be listed with --allow
    #[arg(long)]
    enforce_allow: bool,

    #[arg(long)]
    max_memory_bytes: Option<u64>,

    #[arg(long)]
    max_file_descriptors: Option<u64>,

    #[arg(long)]
    max_cpu_seconds: Option<u64>,
}

fn verdict(args: &Args) -> Verdict {
    let limits = ResourceLimits {
        max_memory_bytes: args.max_memory_bytes,
        max_file_descriptors: args.max_file_descriptors,
        max_cpu_seconds: args.max_cpu_seconds,
    };
    if let Err(e) = limits.apply_to_current_process() {
        warn!("{}", e);
        return Verdict::reject(format!("sandbox setup failed: {}", e), Vec::new());
    }

    let policy = ValidationPolicy {
        deny: args.deny.clone(),
        allow: args.enforce_allow.then(|| args.allow.clone()),
    };
    let compiled = match policy.compile() {
        Ok(c) => c,
        Err(e) => return Verdict::reject(e.to_string(), Vec::new()),
    };

    if args.stdin {
        let mut bytes = Vec::new();
        if let Err(e) = std::io::stdin().lock().read_to_end(&mut bytes) {
            return Verdict::reject(format!("cannot read image from stdin: {}", e), Vec::new());
        }
        debug!("Inspecting {:?} ({} bytes from stdin)", args.path, bytes.len());
        return inspect_bytes(&bytes, &compiled);
    }

    match args.path {
        Some(ref path) => {
            debug!("Inspecting {:?}", path);
            inspect_file(path, &compiled)
        }
        None => Verdict::reject("no image given (use --path or --stdin)", Vec::new()),
    }
}

fn main() -> anyhow::Result<()> {
    init_validator_logging(None);
    let args = Args::parse();

    let verdict = verdict(&args);
    println!("{}", serde_json::to_string(&verdict)?);
    Ok(())
}
