use clap::{Parser, Subcommand};
use ngm_app::{
    AppResult, ModelStructure, RunOptions, RunRequest, StudyConfig, compute_r0, expand_grid,
    load_study, model_service, prepare_model, query, run_service,
};
use ngm_results::ScenarioStore;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ngm-cli")]
#[command(about = "NgmFlow CLI - reproduction numbers and sampling studies for compartment models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a model file, or a study file with --study
    Validate {
        /// Path to the model (YAML or JSON) or study YAML file
        path: PathBuf,
        /// Treat the path as a study file
        #[arg(long)]
        study: bool,
    },
    /// Print the base reproduction number for every scenario of a study
    R0 {
        /// Path to the study YAML file
        study_path: PathBuf,
        /// Also print the age-level next-generation matrix
        #[arg(long)]
        matrix: bool,
    },
    /// Sample, evaluate and persist every scenario of a study
    Sample {
        /// Path to the study YAML file
        study_path: PathBuf,
        /// Skip cache and force re-run
        #[arg(long)]
        no_cache: bool,
    },
    /// List persisted scenarios, or show one in detail
    Show {
        /// Path to the study YAML file
        study_path: PathBuf,
        /// Scenario ID to display
        scenario_id: Option<String>,
    },
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path, study } => {
            if study {
                cmd_validate_study(&path)
            } else {
                cmd_validate_model(&path)
            }
        }
        Commands::R0 { study_path, matrix } => cmd_r0(&study_path, matrix),
        Commands::Sample {
            study_path,
            no_cache,
        } => cmd_sample(&study_path, !no_cache),
        Commands::Show {
            study_path,
            scenario_id,
        } => match scenario_id {
            Some(id) => cmd_show_scenario(&study_path, &id),
            None => cmd_list_scenarios(&study_path),
        },
    }
}

fn cmd_validate_model(model_path: &Path) -> AppResult<()> {
    println!("Validating model: {}", model_path.display());
    let model = model_service::load_model(model_path)?;
    let summary = model_service::summarize_model(&model);
    println!("✓ Model is valid");
    println!(
        "  {} states ({} substates), {} transitions",
        summary.state_count, summary.substate_count, summary.transition_count
    );
    println!("  Infected: {}", summary.infected_states.join(", "));
    println!("  Parameters: {}", summary.parameters.join(", "));
    if let Some(n_age) = summary.age_groups {
        println!("  Age groups: {}", n_age);
    }
    if summary.vaccinated {
        println!("  Has vaccination transition");
    }
    Ok(())
}

fn cmd_validate_study(study_path: &Path) -> AppResult<()> {
    println!("Validating study: {}", study_path.display());
    let study = load_study(study_path)?;
    let model = model_service::load_model(&study.model_path(study_path))?;
    let points = expand_grid(&study.grid);
    for point in &points {
        prepare_model(&model, &study, point)?;
    }
    println!("✓ Study is valid");
    println!(
        "  {} age groups, {} scenarios, {} samples each",
        study.n_age(),
        points.len(),
        study.sampling.n_samples
    );
    Ok(())
}

fn load_study_model(study_path: &Path) -> AppResult<(StudyConfig, ModelStructure)> {
    let study = load_study(study_path)?;
    let model = model_service::load_model(&study.model_path(study_path))?;
    Ok((study, model))
}

fn cmd_r0(study_path: &Path, show_matrix: bool) -> AppResult<()> {
    let (study, model) = load_study_model(study_path)?;
    let contact = study.contact();

    let base = compute_r0(
        &model,
        &study.population,
        &contact,
        None,
        study.execution_context(),
    )?;
    println!("Model R0: {:.6} (targets: {})", base.r0, base.targets.join(", "));

    for point in expand_grid(&study.grid) {
        let prepared = prepare_model(&model, &study, &point)?;
        let report = compute_r0(
            &prepared,
            &study.population,
            &contact,
            None,
            study.execution_context(),
        )?;
        println!("  {}: R0 = {:.6}", point.id, report.r0);
        if show_matrix {
            for row in report.ngm.row_iter() {
                let cells: Vec<String> = row.iter().map(|v| format!("{:>12.6}", v)).collect();
                println!("    {}", cells.join(" "));
            }
        }
    }
    Ok(())
}

fn cmd_sample(study_path: &Path, use_cache: bool) -> AppResult<()> {
    println!("Running study: {}", study_path.display());

    let request = RunRequest {
        study_path,
        options: RunOptions { use_cache },
    };
    let response = run_service::run_study(&request)?;

    for scenario in &response.scenarios {
        let best = scenario
            .manifest
            .best_value
            .map(|v| format!("{:.6}", v))
            .unwrap_or_else(|| "-".to_string());
        if scenario.loaded_from_cache {
            println!("✓ Loaded from cache: {} (best {})", scenario.scenario_id, best);
        } else {
            println!(
                "✓ Sampled: {} (best {}, {:.2}s)",
                scenario.scenario_id, best, scenario.elapsed_s
            );
        }
    }
    println!("Results written to {}", response.output_dir.display());
    Ok(())
}

fn cmd_list_scenarios(study_path: &Path) -> AppResult<()> {
    let scenarios = run_service::list_scenarios(study_path)?;

    if scenarios.is_empty() {
        println!("No persisted scenarios for study: {}", study_path.display());
    } else {
        println!("Persisted scenarios:");
        for manifest in scenarios {
            println!(
                "  {} ({} samples, {})",
                manifest.scenario_id, manifest.n_samples, manifest.timestamp
            );
        }
    }
    Ok(())
}

fn cmd_show_scenario(study_path: &Path, scenario_id: &str) -> AppResult<()> {
    println!("Loading scenario: {}", scenario_id);

    let study = load_study(study_path)?;
    let store = ScenarioStore::new(study.output_path(study_path))?;
    let report = query::get_scenario_report(&store, scenario_id)?;

    println!("\nScenario Summary:");
    println!("  Kind: {:?}", report.manifest.kind);
    println!("  Samples: {} x {}", report.row_count, report.column_count);
    println!(
        "  {} range: {:.6} - {:.6}",
        report.manifest.target, report.target_min, report.target_max
    );
    if let Some(seed) = report.manifest.seed {
        println!("  Seed: {}", seed);
    }
    println!("  Fingerprint: {}", report.manifest.fingerprint);
    if let Some(optimal) = report.optimal {
        let cells: Vec<String> = optimal.iter().map(|v| format!("{:.4}", v)).collect();
        println!("  Optimal allocation: [{}]", cells.join(", "));
    }
    Ok(())
}
