mod config;

use std::process;

use clap::{Parser, Subcommand};
use flagcache_lib::{FlagCache, FlagCacheError, FlagUpdate};
use tracing_subscriber::EnvFilter;

use config::FcConfig;

#[derive(Parser, Debug)]
#[command(name = "fc")]
#[command(version)]
#[command(about = "Inspect and edit persisted feature flag snapshots", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short = 'c', long = "config", default_value = "fc.toml")]
    config: String,

    /// Directory of the snapshot database
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<String>,

    /// Context whose snapshot is used
    #[arg(short = 'u', long = "context")]
    context: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the flags of the persisted snapshot
    Show,
    /// Print one flag as JSON
    Get {
        /// Flag key
        key: String,
    },
    /// Apply a JSON array of flag updates and persist the result
    Apply {
        /// Path to the batch file
        batch: String,
    },
    /// Write the snapshot text to a file
    Export {
        /// Output path
        file: String,
    },
    /// Replace the snapshot with the content of a snapshot file
    Import {
        /// Input path
        file: String,
    },
    /// Delete the persisted snapshot
    Reset,
    /// List the names of all persisted snapshots
    List,
}

fn open_cache(args: &Args) -> Result<FlagCache, FlagCacheError> {
    let mut config = FcConfig::load(&args.config);
    config.apply_env_overrides();
    let data_dir = args.data_dir.as_ref().unwrap_or(&config.storage.data_dir);
    let context = args.context.as_ref().unwrap_or(&config.storage.context);

    FlagCache::builder()
        .context_key(context)
        .snapshot_prefix(&config.storage.prefix)
        .sled_store(data_dir)
        .build()
}

fn run_show(cache: &FlagCache) -> Result<(), FlagCacheError> {
    match cache.persisted_meta()? {
        Some(meta) => println!(
            "snapshot {} ({} flags, hash {}, saved {})",
            cache.snapshot_name().unwrap_or_default(),
            meta.flags_count,
            meta.hash,
            meta.saved_at
        ),
        None => {
            println!("No persisted snapshot");
            return Ok(());
        }
    }
    for flag in cache.all_flags() {
        let variation = flag
            .variation
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} v{:<6} var {:<4} {}",
            flag.key, flag.version, variation, flag.value
        );
    }
    Ok(())
}

fn run_list(cache: &FlagCache) -> Result<(), FlagCacheError> {
    let current = cache.snapshot_name().unwrap_or_default();
    for name in cache.persisted_names()? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

fn run_get(cache: &FlagCache, key: &str) -> Result<(), FlagCacheError> {
    match cache.flag(key) {
        Some(flag) => {
            println!("{}", serde_json::to_string_pretty(&flag)?);
            Ok(())
        }
        None => {
            eprintln!("Flag '{}' not found", key);
            process::exit(1);
        }
    }
}

fn run_apply(cache: &FlagCache, batch_path: &str) -> Result<(), FlagCacheError> {
    let content = std::fs::read_to_string(batch_path)?;
    let updates: Vec<FlagUpdate> = serde_json::from_str(&content)?;
    let changes = cache.apply_batch(updates)?;

    for change in &changes {
        println!("{:<10} {}", change.kind.to_string(), change.key);
    }
    if changes.skipped > 0 {
        println!("{} malformed entries skipped", changes.skipped);
    }
    if cache.persist()? {
        println!("Snapshot saved");
    }
    Ok(())
}

fn run_export(cache: &FlagCache, path: &str) -> Result<(), FlagCacheError> {
    std::fs::write(path, cache.save()?)?;
    println!("Exported {} flags to {}", cache.store().len(), path);
    Ok(())
}

fn run_import(cache: &FlagCache, path: &str) -> Result<(), FlagCacheError> {
    let text = std::fs::read_to_string(path)?;
    cache.restore(&text)?;
    cache.persist()?;
    println!("Imported {} flags from {}", cache.store().len(), path);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cache = match open_cache(&args) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Failed to open snapshot store: {}", e);
            process::exit(1);
        }
    };

    let result = match &args.cmd {
        Command::Show => run_show(&cache),
        Command::Get { key } => run_get(&cache, key),
        Command::Apply { batch } => run_apply(&cache, batch),
        Command::Export { file } => run_export(&cache, file),
        Command::Import { file } => run_import(&cache, file),
        Command::List => run_list(&cache),
        Command::Reset => cache.remove_persisted().map(|()| {
            println!("Removed snapshot {}", cache.snapshot_name().unwrap_or_default());
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
