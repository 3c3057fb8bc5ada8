//! tilestore-cli - Command-line access to tile storage
//!
//! Thin front end over [`tilestore_core::Storage`]:
//! - read, write, copy and delete files, S3 objects, RADOS objects and HTTP resources
//! - create S3 symbolic links
//! - inspect sizes and codec paths

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process;
use tilestore_core::{ByteRange, Storage, StorageConfig};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// tilestore - Unified access to files, S3, CEPH and HTTP storage
///
/// Addresses look like `file:///path`, `/path`, `s3://bucket[@host]/key`,
/// `ceph://pool/key` or `https://host/path`.
#[derive(Parser)]
#[command(name = "tilestore")]
#[command(author, version, about = "Unified access to files, S3, CEPH and HTTP storage", long_about = None)]
struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (TOML); the environment is used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the content of an address to stdout
    Cat {
        /// Address to read
        address: String,

        /// First byte to read
        #[arg(long)]
        offset: Option<u64>,

        /// Number of bytes to read
        #[arg(long)]
        length: Option<u64>,
    },

    /// Store a local file (or stdin) at an address
    Put {
        /// Destination address
        address: String,

        /// Local file to upload; stdin when omitted
        input: Option<PathBuf>,
    },

    /// Copy between any two addresses
    Cp {
        /// Source address
        from: String,

        /// Destination address
        to: String,

        /// Expected MD5 of the content (hex)
        #[arg(long)]
        md5: Option<String>,
    },

    /// Delete an address; missing targets are not an error
    Rm {
        /// Address to delete
        address: String,
    },

    /// Create an S3 symbolic link
    Ln {
        /// Object the link points to
        target: String,

        /// Link object to create
        link: String,
    },

    /// Show whether an address exists and its size
    Stat {
        /// Address to inspect
        address: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Total size below a directory or key prefix
    Du {
        /// Directory or prefix address
        address: String,
    },

    /// Print the path and options an external codec uses for an address
    Vsi {
        /// Address to translate
        address: String,
    },

    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Serialize)]
struct StatReport {
    address: String,
    backend: String,
    exists: bool,
    size: Option<u64>,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let result = run();

    match result {
        Ok(_) => process::exit(0),
        Err(e) => {
            error!("Error: {:#}", e);
            process::exit(map_error_to_exit_code(&e));
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<StorageConfig> {
    match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            Ok(StorageConfig::load(path)?)
        }
        None => Ok(StorageConfig::from_env()?),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = load_config(cli.config.as_ref())?;

    if let Commands::Config = cli.command {
        let mut shown = config;
        for cluster in &mut shown.s3 {
            cluster.secret_key = "***".to_string();
        }
        print!("{}", shown.to_toml_string()?);
        return Ok(());
    }

    let storage = Storage::new(config)?;

    match cli.command {
        Commands::Cat {
            address,
            offset,
            length,
        } => cat(&storage, &address, offset, length),
        Commands::Put { address, input } => {
            let written = put(&storage, &address, input.as_ref())?;
            info!("Wrote {} bytes to {}", written, address);
            Ok(())
        }
        Commands::Cp { from, to, md5 } => {
            match md5 {
                Some(md5) => storage.copy_checked(&from, &to, &md5)?,
                None => storage.copy(&from, &to)?,
            }
            info!("Copied {} to {}", from, to);
            Ok(())
        }
        Commands::Rm { address } => {
            storage.delete(&address)?;
            info!("Deleted {}", address);
            Ok(())
        }
        Commands::Ln { target, link } => {
            storage.symlink(&target, &link)?;
            info!("Linked {} -> {}", link, target);
            Ok(())
        }
        Commands::Stat { address, json } => {
            let location = storage.parse(&address)?;
            let report = StatReport {
                address: location.qualified(),
                backend: location.backend().to_string(),
                exists: storage.exists(&address)?,
                size: storage.size(&address)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Address: {}", report.address);
                println!("Backend: {}", report.backend);
                println!("Exists:  {}", report.exists);
                match report.size {
                    Some(size) => println!("Size:    {}", size),
                    None => println!("Size:    -"),
                }
            }
            Ok(())
        }
        Commands::Du { address } => {
            println!("{}", storage.prefix_size(&address)?);
            Ok(())
        }
        Commands::Vsi { address } => {
            let codec = storage.codec_path(&address)?;
            println!("{}", codec.path);
            for (key, value) in &codec.options {
                println!("{}={}", key, value);
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

fn cat(storage: &Storage, address: &str, offset: Option<u64>, length: Option<u64>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match (offset, length) {
        (offset, Some(length)) => {
            let range = ByteRange::new(offset.unwrap_or(0), length);
            let data = storage.get_binary(address, Some(range))?;
            out.write_all(&data)?;
        }
        (Some(offset), None) => {
            let mut reader = storage.open_read(address)?;
            reader.seek(SeekFrom::Start(offset))?;
            io::copy(&mut reader, &mut out).with_context(|| format!("Failed to read {}", address))?;
        }
        (None, None) => {
            let data = storage.get_binary(address, None)?;
            out.write_all(&data)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn put(storage: &Storage, address: &str, input: Option<&PathBuf>) -> Result<u64> {
    let mut writer = storage.open_write(address)?;

    match input {
        Some(path) => {
            let mut file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            io::copy(&mut file, &mut writer)
                .with_context(|| format!("Failed to write {}", address))?;
        }
        None => {
            io::copy(&mut io::stdin().lock(), &mut writer)
                .with_context(|| format!("Failed to write {}", address))?;
        }
    }

    Ok(writer.finish()?)
}

fn map_storage_error(err: &tilestore_core::Error) -> i32 {
    use tilestore_core::Error;

    match err {
        Error::Config(_) => 1,
        Error::NotFound(_) => 2,
        Error::Storage { .. } => 2,
        Error::InvalidAddress(_) => 3,
        Error::UnsupportedOperation(_) => 3,
        Error::UnknownCluster(_) => 3,
    }
}

fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(storage_err) = err.downcast_ref::<tilestore_core::Error>() {
        map_storage_error(storage_err)
    } else if let Some(io_err) = err.downcast_ref::<io::Error>() {
        // Reader and writer adapters carry storage errors inside io::Error
        io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<tilestore_core::Error>())
            .map_or(2, map_storage_error)
    } else {
        1
    }
}
