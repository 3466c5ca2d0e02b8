//! armimg - bootable ARM disk image builder.
//!
//! Downloads a base SBC image, reshapes its partitions, provisions it inside
//! a qemu-user chroot, and writes the result as a single image artifact.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use armimg::builder::Builder;
use armimg::config::{BuildConfig, ImageType};
use armimg::download::CurlFetcher;
use armimg::hook::ShellHook;
use armimg::ui::StdoutUi;

#[derive(Parser)]
#[command(name = "armimg")]
#[command(about = "Bootable ARM disk image builder")]
#[command(
    after_help = "QUICK START:\n  armimg validate -c build.json   Check the configuration\n  armimg build -c build.json      Download, provision, and package the image\n  armimg profiles                 List built-in image-type profiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the image (requires root for loop devices and mounts)
    Build {
        /// JSON build configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Extra provision command, appended after the config's commands
        /// (repeatable)
        #[arg(long = "command")]
        commands: Vec<String>,
    },

    /// Validate a configuration without touching any resource
    Validate {
        /// JSON build configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List built-in image-type profiles
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config, commands } => cmd_build(&config, commands),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Profiles => {
            cmd_profiles();
            Ok(())
        }
    }
}

fn cmd_build(config_path: &PathBuf, extra_commands: Vec<String>) -> Result<()> {
    let mut config = BuildConfig::from_file(config_path)?;
    config.provision_commands.extend(extra_commands);

    let mut builder = Builder::new(config);
    let warnings = builder.prepare()?;
    for warning in &warnings {
        eprintln!("[WARN] {}", warning);
    }

    let hook = Arc::new(ShellHook::new(
        builder.config().provision_commands.clone(),
        &builder.config().qemu_args,
    ));
    let fetcher = Arc::new(CurlFetcher::with_default_cache());

    let artifact = builder.run(&StdoutUi, hook, fetcher)?;
    println!("Build finished ({}): {}", artifact.builder_id(), artifact);
    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    let mut config = BuildConfig::from_file(config_path)?;
    let warnings = config.prepare()?;
    for warning in &warnings {
        eprintln!("[WARN] {}", warning);
    }
    println!("Configuration OK");
    println!("  image type:   {}", match config.resolved_type {
        Some(t) => t.name(),
        None => "(unset)",
    });
    println!("  image mounts: {}", config.image_mounts.join(", "));
    println!("  qemu binary:  {}", config.qemu_binary);
    if !config.qemu_args.is_empty() {
        println!("  qemu args:    {}", config.qemu_args.join(" "));
    }
    println!("  output dir:   {}", config.output_directory.display());
    Ok(())
}

fn cmd_profiles() {
    println!("Built-in image-type profiles:");
    for t in ImageType::ALL {
        println!("  {}", t.name());
        println!("    mounts:    {}", t.default_mounts().join(", "));
        let args = t.default_qemu_args();
        if args.is_empty() {
            println!("    qemu args: (none)");
        } else {
            println!("    qemu args: {}", args.join(" "));
        }
    }
}
