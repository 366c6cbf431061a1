use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use gmid::{ConstraintSet, Interpolation, SizingResult, TechTable};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Size {
            table,
            constraints,
            json,
        } => size(table, constraints, json),
        Command::Lookup {
            table,
            param,
            length,
            vds,
            gmid,
            nearest,
        } => lookup(table, &param, length, vds, gmid, nearest),
    }
}

/// Arguments to `gmidsize`.
#[derive(ClapParser)]
#[command(
    version,
    about,
    long_about = "Size transistors with the gm/ID methodology from a tabulated technology characterization"
)]
pub struct Args {
    /// Increase log verbosity. May be repeated.
    ///
    /// Ignored if `RUST_LOG` is set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Size every design in a constraints file.
    Size {
        /// The path to the technology table.
        #[arg(short, long)]
        table: PathBuf,
        /// The path to the TOML design constraints.
        #[arg(short, long)]
        constraints: PathBuf,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Look up a device parameter at a given gm/ID.
    Lookup {
        /// The path to the technology table.
        #[arg(short, long)]
        table: PathBuf,
        /// The parameter to look up, e.g. `gm_gds` or `jds`.
        #[arg(short, long)]
        param: String,
        /// Channel length [m].
        #[arg(short, long)]
        length: f64,
        /// Drain-source voltage [V].
        #[arg(long)]
        vds: f64,
        /// Transconductance efficiency [1/V].
        #[arg(long)]
        gmid: f64,
        /// Use nearest-sample instead of linear interpolation.
        #[arg(long)]
        nearest: bool,
    },
}

/// Size every design in `constraints` against `table`.
fn size(table: PathBuf, constraints: PathBuf, json: bool) -> anyhow::Result<()> {
    let table = TechTable::from_file(&table)
        .with_context(|| format!("Failed to load technology table {:?}.", table))?;
    let set = ConstraintSet::from_file(&constraints)
        .with_context(|| format!("Failed to load design constraints {:?}.", constraints))?;

    let results = gmid::size_all(&table, set.designs());
    let mut failed = 0;
    let mut sized = Vec::new();
    for (i, (design, result)) in set.designs().iter().zip(results).enumerate() {
        let label = design
            .name
            .as_ref()
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("design {}", i + 1));
        match result {
            Ok(result) => sized.push(result),
            Err(err) => {
                failed += 1;
                eprintln!("{label}: {err}");
            }
        }
    }

    if json {
        let out = serde_json::to_string_pretty(&sized)
            .with_context(|| "Failed to serialize sizing results.")?;
        println!("{out}");
    } else {
        for result in &sized {
            print_result(result);
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} designs could not be sized.", set.len());
    }
    Ok(())
}

fn print_result(result: &SizingResult) {
    if let Some(name) = &result.name {
        println!("[{name}]");
    }
    println!("  L         = {:.4e} m", result.l);
    println!("  W         = {:.4e} m", result.w);
    println!("  ID        = {:.4e} A", result.id);
    println!("  VGS       = {:.4} V", result.vgs);
    println!("  VDS       = {:.4} V", result.vds);
    println!("  gm        = {:.4e} S", result.gm);
    println!("  gds       = {:.4e} S", result.gds);
    println!("  gm/gds    = {:.2}", result.intrinsic_gain);
    println!("  gm/ID     = {:.2} 1/V", result.gmid_achieved);
    println!("  C_par     = {:.4e} F", result.parasitic_cap);
    println!("  GBW       = {:.4e} Hz", result.gbw);
    println!("  iters     = {}", result.iterations);
}

/// Look up `param` at the given gm/ID.
fn lookup(
    table: PathBuf,
    param: &str,
    length: f64,
    vds: f64,
    gmid: f64,
    nearest: bool,
) -> anyhow::Result<()> {
    let table = TechTable::from_file(&table)
        .with_context(|| format!("Failed to load technology table {:?}.", table))?;
    let method = if nearest {
        Interpolation::Nearest
    } else {
        Interpolation::Linear
    };
    let value = table
        .lookup_at_gmid(param, length, vds, gmid, method)
        .with_context(|| format!("Failed to look up `{param}` at gm/ID = {gmid}."))?;
    println!("{value}");
    Ok(())
}
