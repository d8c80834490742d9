use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use refinery_model::{
    BufferTank, CaseOutcome, CaseStudy, RefineryData, RefineryModel, RefineryReport, Shutdown, STUDY_TANKS,
};
use refinery_solver::{Solution, Solver};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "refinery")]
#[command(about = "Multi-period refinery planning LP with buffer tanks and unit shutdowns", long_about = None)]
struct Cli {
    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScenarioArgs {
    /// Scenario JSON file; omitted fields keep the textbook defaults
    #[arg(short, long)]
    scenario: Option<PathBuf>,
    /// Number of planning periods
    #[arg(long)]
    periods: Option<usize>,
    /// Fix crude intake to this rate in every period
    #[arg(long)]
    crude: Option<f64>,
    /// Buffer tanks to enable: all, none, or a list such as srn,rfg
    #[arg(long, value_delimiter = ',')]
    tanks: Option<Vec<String>>,
    /// Shut a unit down for one period, e.g. rf:3 (repeatable)
    #[arg(long = "shutdown", value_name = "UNIT:PERIOD")]
    shutdowns: Vec<Shutdown>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and solve a scenario and print the plan
    Solve {
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Show shadow prices, binding constraints and reduced costs
        #[arg(short, long)]
        analysis: bool,
        /// Simplex pivot budget
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Print the assembled LP
    Pprint {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
    /// Check a scenario file for errors
    Check {
        /// The scenario file to check
        file: PathBuf,
    },
    /// Print the default scenario as JSON
    Defaults,
    /// Run the reformer/cracker shutdown case study. Without --tanks the
    /// scenario's tanks are used, or rfg_tk and ccfo_tk if it enables none.
    Cases {
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Write the outcome table to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn fail(message: impl Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_tanks(names: &[String]) -> Vec<BufferTank> {
    match names {
        [one] if one.eq_ignore_ascii_case("all") => BufferTank::ALL.to_vec(),
        [one] if one.eq_ignore_ascii_case("none") => Vec::new(),
        _ => names
            .iter()
            .map(|n| n.parse().unwrap_or_else(|e| fail(format!("Error: {}", e))))
            .collect(),
    }
}

/// Scenario file (or defaults) with command-line overrides applied
fn load_scenario(args: &ScenarioArgs) -> RefineryData {
    let mut data = match &args.scenario {
        Some(path) => RefineryData::from_json_file(path).unwrap_or_else(|e| fail(format!("Error: {}", e))),
        None => RefineryData::default(),
    };

    if let Some(periods) = args.periods {
        data.periods = periods;
    }
    if let Some(crude) = args.crude {
        data.crude.fixed_intake = Some(crude);
    }
    if let Some(names) = &args.tanks {
        data = data.with_tanks(&parse_tanks(names));
    }
    data.shutdowns.extend(args.shutdowns.iter().copied());

    info!(
        periods = data.periods,
        tanks = data.enabled_tanks().len(),
        shutdowns = data.shutdowns.len(),
        "scenario loaded"
    );
    data
}

fn build_model(data: &RefineryData) -> RefineryModel {
    RefineryModel::build(data).unwrap_or_else(|e| fail(format!("Build error: {}", e)))
}

/// Tank layout for the case study: explicit `--tanks`, else the scenario's, else the study's
fn study_tanks(args: &ScenarioArgs, data: &RefineryData) -> Vec<BufferTank> {
    let enabled = data.enabled_tanks();
    if args.tanks.is_none() && enabled.is_empty() {
        STUDY_TANKS.to_vec()
    } else {
        enabled
    }
}

fn print_analysis(solution: &Solution) {
    println!();
    println!("Analysis:");
    println!();

    if !solution.analysis.binding_constraints.is_empty() {
        println!("Binding constraints (pinch points):");
        for name in &solution.analysis.binding_constraints {
            println!("  - {}", name);
        }
        println!();
    }

    println!("Shadow prices:");
    for sp in &solution.analysis.shadow_prices {
        if sp.value.abs() > 0.001 {
            println!("  {:30} {:10.4}", sp.constraint, sp.value);
            println!("    {}", sp.interpretation);
        }
    }
    println!();

    println!("Reduced costs (flows not in the plan):");
    for rc in &solution.analysis.reduced_costs {
        if !rc.is_basic && rc.reduced_cost.abs() > 0.001 {
            println!(
                "  {:30} profit changes by {:.4} per unit forced in",
                rc.variable, rc.reduced_cost
            );
        }
    }
}

fn write_case_csv(path: &Path, outcomes: &[CaseOutcome]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["case", "status", "profit", "worst_violation"])?;
    for outcome in outcomes {
        let profit = outcome.profit().map(|p| format!("{:.2}", p)).unwrap_or_default();
        let worst = outcome
            .report
            .violations
            .first()
            .map(|v| v.constraint.clone())
            .unwrap_or_default();
        wtr.write_record([outcome.case.name.clone(), outcome.status().label().to_string(), profit, worst])?;
    }
    wtr.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Solve { scenario, format, analysis, max_iterations } => {
            let data = load_scenario(&scenario);
            let model = build_model(&data);

            let mut solver = Solver::new();
            if let Some(max) = max_iterations {
                solver = solver.with_max_iterations(max);
            }
            let solution = model.solve(&solver);
            let report = RefineryReport::new(&model, &solution);

            match format {
                OutputFormat::Json => {
                    let mut value = serde_json::to_value(&report).unwrap_or_else(|e| fail(format!("Error: {}", e)));
                    if analysis {
                        value["analysis"] = serde_json::to_value(&solution.analysis)
                            .unwrap_or_else(|e| fail(format!("Error: {}", e)));
                    }
                    match serde_json::to_string_pretty(&value) {
                        Ok(json) => println!("{}", json),
                        Err(e) => fail(format!("Error: {}", e)),
                    }
                }
                OutputFormat::Text => {
                    print!("{}", report);
                    if analysis && solution.status.is_optimal() {
                        print_analysis(&solution);
                    }
                }
            }

            if !solution.status.is_optimal() {
                std::process::exit(1);
            }
        }
        Commands::Pprint { scenario } => {
            let data = load_scenario(&scenario);
            let model = build_model(&data);
            print!("{}", model.problem);
        }
        Commands::Check { file } => {
            let data = match RefineryData::from_json_file(&file) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("✗ {} has errors:", file.display());
                    eprintln!("  {}", e);
                    std::process::exit(1);
                }
            };

            match RefineryModel::build(&data) {
                Ok(model) => {
                    println!("✓ {} is valid", file.display());
                    println!("  {} periods", data.periods);
                    println!("  {} buffer tanks enabled", model.network.tanks().len());
                    println!("  {} shutdowns", data.shutdowns.len());
                    println!("  {} variables", model.problem.num_variables());
                    println!("  {} constraints", model.problem.num_constraints());
                }
                Err(e) => {
                    eprintln!("✗ {} has errors:", file.display());
                    eprintln!("  {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Defaults => match RefineryData::default().to_json_pretty() {
            Ok(json) => println!("{}", json),
            Err(e) => fail(format!("Error: {}", e)),
        },
        Commands::Cases { scenario, csv } => {
            let data = load_scenario(&scenario);
            let study = CaseStudy::new(study_tanks(&scenario, &data));
            let outcomes = study
                .run(&data, &Solver::new())
                .unwrap_or_else(|e| fail(format!("Build error: {}", e)));

            let tanks: Vec<&str> = study.tanks.iter().map(|t| t.name()).collect();
            println!(
                "Buffer tanks: {}",
                if tanks.is_empty() { "none".to_string() } else { tanks.join(", ") }
            );
            println!();
            println!("  {:16} {:16} {:>14}", "case", "status", "profit");
            for outcome in &outcomes {
                let profit = outcome.profit().map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".to_string());
                println!("  {:16} {:16} {:>14}", outcome.case.name, outcome.status().label(), profit);
            }

            if let Some(path) = csv {
                if let Err(e) = write_case_csv(&path, &outcomes) {
                    fail(format!("Error writing {}: {}", path.display(), e));
                }
                println!();
                println!("Wrote {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_model::ProcessUnit;

    #[test]
    fn test_parse_solve_args() {
        let cli = Cli::try_parse_from([
            "refinery", "-vv", "solve", "--tanks", "srn,rfg_tk", "--shutdown", "rf:3", "--shutdown", "cc@1", "-f", "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Solve { scenario, format, analysis, .. } => {
                assert!(matches!(format, OutputFormat::Json));
                assert!(!analysis);
                assert_eq!(
                    scenario.shutdowns,
                    vec![Shutdown::new(ProcessUnit::Rf, 3), Shutdown::new(ProcessUnit::Cc, 1)]
                );
                let data = load_scenario(&scenario);
                assert_eq!(data.enabled_tanks(), vec![BufferTank::Srn, BufferTank::Rfg]);
                assert_eq!(data.shutdowns.len(), 2);
            }
            _ => panic!("expected solve"),
        }
    }

    #[test]
    fn test_parse_tank_keywords() {
        assert_eq!(parse_tanks(&["all".to_string()]), BufferTank::ALL.to_vec());
        assert!(parse_tanks(&["none".to_string()]).is_empty());
    }

    #[test]
    fn test_case_study_tank_layout() {
        let tanks_for = |args: &[&str]| {
            let cli = Cli::try_parse_from(args).unwrap();
            match cli.command {
                Commands::Cases { scenario, .. } => study_tanks(&scenario, &load_scenario(&scenario)),
                _ => panic!("expected cases"),
            }
        };
        assert_eq!(tanks_for(&["refinery", "cases"]), vec![BufferTank::Rfg, BufferTank::Ccfo]);
        assert!(tanks_for(&["refinery", "cases", "--tanks", "none"]).is_empty());
        assert_eq!(tanks_for(&["refinery", "cases", "--tanks", "srn"]), vec![BufferTank::Srn]);
    }

    #[test]
    fn test_rejects_bad_shutdown() {
        assert!(Cli::try_parse_from(["refinery", "solve", "--shutdown", "rf"]).is_err());
    }
}
