//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::Command;

/// Attributes every library crate root must carry.
const REQUIRED_CRATE_ATTRS: &[&str] = &["#![forbid(unsafe_code)]", "#![deny(missing_docs)]"];

#[derive(Parser)]
#[command(name = "xtask", about = "Bulwark workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Generate coverage report
    Coverage,
    /// Re-run the concurrency suite to shake out races
    Stress {
        /// Number of consecutive runs
        #[arg(long, default_value_t = 20)]
        iterations: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Coverage => run_coverage(),
        Commands::Stress { iterations } => run_stress(iterations),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_lint()?;
    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd(
        "cargo",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    let crates = std::fs::read_dir("crates").context("Failed to read crates/")?;
    for entry in crates {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("bulwark-") {
            anyhow::bail!("Crate '{name}' does not follow bulwark-* naming");
        }
        check_manifest(&entry.path(), &name)?;
        check_crate_root(&entry.path(), &name)?;
    }

    println!("All conventions validated!");
    Ok(())
}

/// Every crate must inherit the workspace lint table.
fn check_manifest(dir: &Path, name: &str) -> Result<()> {
    let manifest = std::fs::read_to_string(dir.join("Cargo.toml"))
        .with_context(|| format!("Failed to read manifest of {name}"))?;
    if !manifest.contains("[lints]") || !manifest.contains("workspace = true") {
        anyhow::bail!("Crate '{name}' does not inherit workspace lints");
    }
    Ok(())
}

fn check_crate_root(dir: &Path, name: &str) -> Result<()> {
    let lib = dir.join("src").join("lib.rs");
    if !lib.exists() {
        return Ok(());
    }
    let source = std::fs::read_to_string(&lib)
        .with_context(|| format!("Failed to read {}", lib.display()))?;
    for attr in REQUIRED_CRATE_ATTRS {
        if !source.contains(attr) {
            anyhow::bail!("Crate '{name}' is missing {attr}");
        }
    }
    Ok(())
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_stress(iterations: u32) -> Result<()> {
    for i in 1..=iterations {
        println!("Stress run {i}/{iterations}");
        run_cmd(
            "cargo",
            &[
                "test",
                "-p",
                "bulwark-constraint",
                "--test",
                "concurrency_tests",
                "--release",
            ],
        )?;
    }
    println!("\n{iterations} stress runs passed!");
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
