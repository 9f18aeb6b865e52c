//! CLI command definitions and handlers.

use std::collections::HashMap;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use tabled::{Table, Tabled};

use hdvol_common::VolumeName;

use crate::config::DriverArgs;
use crate::driver::{VolumeDriver, VolumeInfo};

/// hdvol - disk image backed container volumes
#[derive(Parser, Debug)]
#[command(name = "hdvol")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Driver settings.
    #[command(flatten)]
    pub driver: DriverArgs,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable table.
    #[default]
    Table,
    /// JSON document.
    Json,
}

/// Volume commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a volume
    Create {
        /// Volume name
        name: VolumeName,

        /// Volume option as key=value (size, mode, clog, tier, scope)
        #[arg(short, long = "opt", value_parser = parse_key_value)]
        opts: Vec<(String, String)>,
    },

    /// Remove a volume
    #[command(alias = "rm")]
    Remove {
        /// Volume name
        name: VolumeName,
    },

    /// Mount a volume and print its mountpoint
    Mount {
        /// Volume name
        name: VolumeName,
    },

    /// Release a mount of a volume
    Unmount {
        /// Volume name
        name: VolumeName,
    },

    /// Show a volume
    Get {
        /// Volume name
        name: VolumeName,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// List volumes
    #[command(alias = "ls")]
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,

        /// Only display volume names
        #[arg(short = 'q', long)]
        names_only: bool,
    },

    /// Print a volume's mountpoint
    Path {
        /// Volume name
        name: VolumeName,
    },

    /// Show driver capabilities
    Capabilities {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

#[derive(Tabled)]
struct VolumeRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "MOUNTPOINT")]
    mountpoint: String,
    #[tabled(rename = "DEVICE")]
    device: String,
    #[tabled(rename = "MOUNTS")]
    mounts: u32,
    #[tabled(rename = "CREATED")]
    created: String,
}

impl From<&VolumeInfo> for VolumeRow {
    fn from(info: &VolumeInfo) -> Self {
        Self {
            name: info.name.to_string(),
            mountpoint: info.mountpoint.display().to_string(),
            device: info.device.clone().unwrap_or_else(|| "-".to_string()),
            mounts: info.mount_count,
            created: info
                .created_at
                .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

#[derive(Tabled)]
struct CapabilityRow {
    #[tabled(rename = "SCOPE")]
    scope: String,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver can't be set up or the command fails.
    pub fn execute(self) -> Result<()> {
        let config = self
            .driver
            .into_config()
            .wrap_err("Invalid driver configuration")?;
        let driver = config
            .build()
            .wrap_err_with(|| format!("Can't open driver home {}", config.home.display()))?;
        driver.reconcile()?;

        run(&driver, self.command)
    }
}

fn run(driver: &VolumeDriver, command: Commands) -> Result<()> {
    match command {
        Commands::Create { name, opts } => {
            let opts: HashMap<String, String> = opts.into_iter().collect();
            driver.create(&name, &opts)?;
            println!("Volume {name} created");
        }

        Commands::Remove { name } => {
            driver.remove(&name)?;
            println!("Volume {name} removed");
        }

        Commands::Mount { name } => {
            let mountpoint = driver.mount(&name)?;
            println!("{}", mountpoint.display());
        }

        Commands::Unmount { name } => {
            driver.unmount(&name)?;
            println!("Volume {name} unmounted");
        }

        Commands::Get { name, format } => {
            let info = driver.get(&name)?;
            match format {
                OutputFormat::Json => print_json(&info)?,
                OutputFormat::Table => println!("{}", Table::new([VolumeRow::from(&info)])),
            }
        }

        Commands::List { format, names_only } => {
            let volumes = driver.list()?;
            if names_only {
                for volume in &volumes {
                    println!("{}", volume.name);
                }
            } else if format == OutputFormat::Json {
                print_json(&volumes)?;
            } else if volumes.is_empty() {
                println!("No volumes");
            } else {
                println!("{}", Table::new(volumes.iter().map(VolumeRow::from)));
            }
        }

        Commands::Path { name } => {
            println!("{}", driver.path(&name)?.display());
        }

        Commands::Capabilities { format } => {
            let caps = driver.capabilities();
            match format {
                OutputFormat::Json => print_json(&caps)?,
                OutputFormat::Table => println!(
                    "{}",
                    Table::new([CapabilityRow {
                        scope: caps.scope.to_string(),
                    }])
                ),
            }
        }
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a `key=value` pair.
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("missing key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
