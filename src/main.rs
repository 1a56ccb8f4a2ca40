//! Multi-Level Dataflow Analyzer - Command Line Interface
//!
//! Usage:
//!   df-analyze analyze [OPTIONS]    Analyze a problem and print per-level metrics
//!   df-analyze info [OPTIONS]       Show levels, mappings and reuse
//!   df-analyze explore [OPTIONS]    Sweep the PE array and bandwidth
//!   df-analyze compare [OPTIONS]    Compare presets side by side
//!   df-analyze export [OPTIONS]     Write a preset as an editable TOML file

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use colored::*;
use log::info;

use dataflow_analyzer::prelude::*;

#[derive(Parser)]
#[command(name = "df-analyze")]
#[command(about = "Multi-level spatial dataflow analyzer for accelerator mappings")]
#[command(version)]
struct Cli {
    /// Output results in JSON format (for machine parsing)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the problem description comes from
#[derive(Args)]
struct Source {
    /// Problem file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in preset, used when no file is given
    #[arg(short, long, default_value = "gemm-os")]
    preset: String,
}

impl Source {
    fn load(&self) -> Result<ProblemConfig, ConfigError> {
        match &self.config {
            Some(path) => ProblemConfig::load(path),
            None => preset(&self.preset),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every level of a problem
    Analyze {
        #[command(flatten)]
        source: Source,

        /// Append the per-level rows to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the full nested report (config and result per level)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show levels, mappings and reuse of a problem
    Info {
        #[command(flatten)]
        source: Source,
    },

    /// Explore PE array sizes and network bandwidths of the innermost level
    Explore {
        #[command(flatten)]
        source: Source,

        /// PE rows to try
        #[arg(long, value_delimiter = ',', default_value = "4,8,16")]
        rows: Vec<usize>,

        /// PE columns to try
        #[arg(long, value_delimiter = ',', default_value = "4,8,16")]
        cols: Vec<usize>,

        /// Network bandwidths to try
        #[arg(long, value_delimiter = ',', default_value = "8,16,32,64")]
        bandwidths: Vec<u64>,

        /// Output Pareto frontier only
        #[arg(long)]
        pareto_only: bool,

        /// Also report how delay responds to bandwidth at the base array size
        #[arg(long)]
        sensitivity: bool,
    },

    /// Compare presets side by side
    Compare {
        /// Presets to compare; all when omitted
        #[arg(value_delimiter = ',')]
        presets: Vec<String>,
    },

    /// Write a preset as a problem file
    Export {
        /// Preset to export
        preset: String,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let json_output = cli.json;

    let outcome = match cli.command {
        Commands::Analyze { source, csv, verbose } => run_analysis(&source, csv, verbose, json_output),
        Commands::Info { source } => show_info(&source, json_output),
        Commands::Explore { source, rows, cols, bandwidths, pareto_only, sensitivity } => {
            let space = DesignSpace { pe_rows: rows, pe_cols: cols, bandwidths };
            run_exploration(&source, space, pareto_only, sensitivity, json_output)
        }
        Commands::Compare { presets } => run_comparison(presets, json_output),
        Commands::Export { preset, output } => export_preset(&preset, &output, json_output),
    };

    if let Err(e) = outcome {
        if json_output {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn banner(title: &str) {
    println!("{}", "╔══════════════════════════════════════════════════════════════╗".cyan());
    println!("{}", format!("║ {:60} ║", title).cyan());
    println!("{}", "╚══════════════════════════════════════════════════════════════╝".cyan());
    println!();
}

fn run_analysis(source: &Source, csv: Option<PathBuf>, verbose: bool, json_output: bool) -> CliResult {
    let config = source.load()?;
    if !json_output {
        banner(&format!("Dataflow Analysis: {}", config.name));
        println!("{}", "Building levels...".yellow());
    }

    let mut analyzer = config.build()?;
    for (level, valid) in analyzer.valid_flags().into_iter().enumerate() {
        if !valid && !json_output {
            println!("  {} level {} failed its mapping checks", "✗".red(), level);
        }
    }

    let start = std::time::Instant::now();
    let report = analyzer.run_analysis()?;
    let fits = analyzer.check_required_data_size()?;
    info!("analysis of {} took {:.3}s", config.name, start.elapsed().as_secs_f64());

    let rows = report.rows();
    if let Some(path) = &csv {
        append_csv(path, &rows)?;
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report.to_nested()?)?);
        return Ok(());
    }

    println!("{}", "Analysis complete!".green());
    println!();
    for row in &rows {
        println!("{}", row);
    }
    if fits {
        println!("{}", "All buffers hold their working sets".green());
    } else {
        println!("{}", "Some buffers are too small (see log)".red());
    }
    if let Some(path) = csv {
        println!("Rows appended to {}", path.display());
    }
    if verbose {
        println!();
        println!("{}", serde_json::to_string_pretty(&report.to_nested()?)?);
    }
    Ok(())
}

fn show_info(source: &Source, json_output: bool) -> CliResult {
    let config = source.load()?;
    let analyzer = config.build()?;

    if json_output {
        let levels: Vec<serde_json::Value> = (0..analyzer.level_num())
            .map(|l| match analyzer.analyzer(l) {
                Ok(a) => a.describe(),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&levels)?);
        return Ok(());
    }

    banner(&format!("Problem: {}", config.name));
    let workload = analyzer.workload();
    println!("Workload:");
    for dt in DataType::ALL {
        println!("  • {}", workload.tensor(dt).display(&workload.iters));
    }
    println!("  • Iteration space: {}", workload.iteration_space());
    println!();

    for level in 0..analyzer.level_num() {
        let a = match analyzer.analyzer(level) {
            Ok(a) => a,
            Err(e) => {
                println!("{} {}", format!("Level {}:", level).red(), e);
                continue;
            }
        };
        let l = a.level();
        println!("{}", format!("Level {}: {} ({}x{} PEs)", level, l.name, l.rows, l.cols).cyan());
        let names: Vec<&str> = a.coupled_vars().iter().map(|&id| workload.iters.name(id)).collect();
        println!("  Iterators: {}", names.join(", "));
        println!("  Transform:\n{}", a.transform());
        for dt in DataType::ALL {
            println!(
                "  {:6} {:10} {} reuse vectors",
                dt.name(),
                l.network_type(dt).to_string(),
                a.reuse(dt).len()
            );
        }
        println!("  Pipelined time rows: {:?}", a.inner_time_rows());
        println!("  Outer time rows: {:?}", a.outer_time_rows());
        println!();
    }
    Ok(())
}

fn run_exploration(
    source: &Source,
    space: DesignSpace,
    pareto_only: bool,
    sensitivity: bool,
    json_output: bool,
) -> CliResult {
    let base = source.load()?;
    let bandwidths = space.bandwidths.clone();
    let explorer = DesignExplorer::new(space, base.clone());

    if !json_output {
        banner(&format!("Design Space Exploration: {}", base.name));
        println!("{}", "Evaluating configurations...".yellow());
    }

    let points = explorer.explore();
    let evaluated = points.len();
    let frontier = ParetoFrontier::compute(points);

    if json_output {
        let out = if pareto_only {
            serde_json::to_value(&frontier.points)?
        } else {
            serde_json::to_value(&frontier)?
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Analyzable configurations: {}", evaluated);
    println!("Pareto-optimal: {}", frontier.points.len());
    println!();
    println!("{}", "  Rows │ Cols │   BW │      Delay │ PE util │ Req BW  │ Fits".bold());
    let print_point = |p: &DesignPoint| {
        let m = &p.metrics;
        println!(
            "  {:4} │ {:4} │ {:4} │ {:10} │ {:6.1}% │ {:7.2} │ {}",
            m.rows,
            m.cols,
            m.bandwidth,
            m.delay,
            m.pe_util_rate * 100.0,
            m.required_bandwidth,
            if m.fits { "yes".green() } else { "no".red() },
        );
    };
    frontier.points.iter().for_each(print_point);
    if !pareto_only {
        println!("  {}", "── dominated ──".dimmed());
        frontier.dominated.iter().for_each(print_point);
    }

    for (label, objective) in [
        ("Fastest", Objective::MinDelay),
        ("Best utilization", Objective::MaxUtilization),
        ("Lowest bandwidth", Objective::MinBandwidth),
    ] {
        if let Some(best) = DesignExplorer::find_best(&frontier.points, objective) {
            println!(
                "{}: {}x{} @ {}",
                label.green(),
                best.metrics.rows,
                best.metrics.cols,
                best.metrics.bandwidth
            );
        }
    }

    if sensitivity {
        println!();
        println!("{}", SensitivityAnalysis::bandwidth(&base, &bandwidths).report());
    }
    Ok(())
}

fn run_comparison(names: Vec<String>, json_output: bool) -> CliResult {
    let names: Vec<&str> = if names.is_empty() {
        PRESETS.to_vec()
    } else {
        names.iter().map(String::as_str).collect()
    };
    let comparison = DataflowComparison::presets(&names)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        banner("Dataflow Comparison");
        println!("{}", comparison.report());
    }
    Ok(())
}

fn export_preset(name: &str, output: &Path, json_output: bool) -> CliResult {
    let config = preset(name)?;
    if output.extension().is_some_and(|e| e == "json") {
        std::fs::write(output, serde_json::to_string_pretty(&config)?)?;
    } else {
        config.save(output)?;
    }
    if json_output {
        println!("{}", serde_json::json!({ "preset": name, "output": output }));
    } else {
        println!("{} {} -> {}", "Exported".green(), name, output.display());
    }
    Ok(())
}
