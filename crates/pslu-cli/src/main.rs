use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pslu_algo::Factorizer;
use pslu_cli::{matrix_io, Cli, Commands};
use pslu_core::{gallery, ErrorClass, FactorOptions, PsluError, SparseColumns};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Map an error onto the process exit status: 1 for bad input, 2 for a
/// singular matrix, 3 for resource or internal failures.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PsluError>().map(PsluError::class) {
        Some(ErrorClass::Numeric) => 2,
        Some(ErrorClass::Resource | ErrorClass::Internal) => 3,
        Some(ErrorClass::Input) | None => 1,
    }
}

fn matvec(a: &SparseColumns, x: &[f64]) -> Vec<f64> {
    let mut b = vec![0.0; a.n()];
    for (j, &xj) in x.iter().enumerate() {
        let (rows, values) = a.column(j);
        for (&row, &value) in rows.iter().zip(values) {
            b[row] += value * xj;
        }
    }
    b
}

fn run_factor(
    matrix: &Path,
    threads: usize,
    config: Option<&Path>,
    json_output: bool,
    check: bool,
) -> Result<()> {
    let options = match config {
        Some(path) => FactorOptions::load_from(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => FactorOptions::default(),
    };
    let a = matrix_io::read_matrix(matrix)?;
    info!(path = %matrix.display(), n = a.n(), nnz = a.nnz(), "matrix loaded");

    let factorizer = Factorizer::new(options).with_threads(threads);
    let lu = match factorizer.factor_columns(&a) {
        Ok(lu) => lu,
        Err(err) => {
            let info = err.info_code(a.n());
            return Err(anyhow::Error::new(err)
                .context(format!("factorization failed (info = {info})")));
        }
    };

    let verification = if check {
        let residual = lu.residual(&a)?;
        let x_true = vec![1.0; a.n()];
        let x = lu.solve(&matvec(&a, &x_true))?;
        let solve_error = x.iter().map(|v| (v - 1.0).abs()).fold(0.0, f64::max);
        Some((residual, solve_error))
    } else {
        None
    };

    if json_output {
        let mut out = json!({ "report": lu.report() });
        if let Some((residual, solve_error)) = verification {
            out["residual"] = json!(residual);
            out["solve_error"] = json!(solve_error);
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", lu.report());
        if let Some((residual, solve_error)) = verification {
            println!("residual: {residual:.3e}, max solve error: {solve_error:.3e}");
        }
    }
    Ok(())
}

fn run_generate(
    grid: Option<usize>,
    random: Option<usize>,
    peclet: f64,
    per_column: usize,
    seed: u64,
    out: &Path,
) -> Result<()> {
    let a = match (grid, random) {
        (Some(k), _) => gallery::convection_diffusion_2d(k, peclet)?,
        (None, Some(n)) => gallery::random_unsymmetric(n, per_column, seed)?,
        (None, None) => anyhow::bail!("one of --grid or --random is required"),
    };
    matrix_io::write_matrix(out, &a)?;
    println!("Wrote {}x{} matrix with {} entries to {}", a.n(), a.n(), a.nnz(), out.display());
    Ok(())
}

fn run_options(out: Option<&Path>) -> Result<()> {
    let options = FactorOptions::default();
    match out {
        Some(path) => {
            options.save_to(path)?;
            println!("Wrote default options to {}", path.display());
        }
        None => print!("{}", toml::to_string_pretty(&options)?),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let result = match &cli.command {
        Commands::Factor {
            matrix,
            threads,
            config,
            json,
            check,
        } => run_factor(matrix, *threads, config.as_deref(), *json, *check),
        Commands::Generate {
            grid,
            random,
            peclet,
            per_column,
            seed,
            out,
        } => run_generate(*grid, *random, *peclet, *per_column, *seed, out),
        Commands::Options { out } => run_options(out.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
