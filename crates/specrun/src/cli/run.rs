use anyhow::{Context, Result};
use specrun_core::{
    RunnerOptions, SpecRunner,
    engine::{DocumentLoader, ShellSuiteEngine},
    files::FsGlobMatcher,
};
use std::{path::PathBuf, sync::Arc};
use tracing::warn;

use super::RunArgs;
use crate::ux::present_notice;

/// Builds a runner for `project_dir` with config and command line options applied.
async fn prepare(args: &RunArgs, project_dir: PathBuf) -> Result<SpecRunner> {
    let engine = Arc::new(ShellSuiteEngine::new(&project_dir));
    let loader = Arc::new(DocumentLoader::new(engine.clone(), &project_dir));
    let matcher = Arc::new(FsGlobMatcher::new(&project_dir));
    let mut runner = SpecRunner::new(
        engine,
        loader,
        matcher,
        RunnerOptions {
            project_base_dir: project_dir,
            ..Default::default()
        },
    );

    let config_path = args
        .config
        .as_deref()
        .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()));
    runner
        .load_config_file(config_path.as_deref())
        .await
        .context("Failed to load configuration")?;

    runner.add_requires(&args.requires);
    runner
        .add_helper_files(&args.helpers)
        .context("Failed to resolve helper files")?;
    if let Some(random) = args.random {
        runner.randomize_tests(random);
    }
    if let Some(seed) = args.seed {
        runner.seed(seed);
    }
    if args.fail_fast {
        runner.stop_on_spec_failure(true);
    }
    if args.stop_on_expectation_failure {
        runner.stop_spec_on_expectation_failure(true);
    }
    if args.no_color {
        runner.show_colors(false);
    }
    Ok(runner)
}

/// Runs the suite. On success the process exits from inside the runner.
pub async fn execute(args: RunArgs, project_dir: PathBuf) -> Result<()> {
    let mut runner = prepare(&args, project_dir).await?;
    let completion = runner.completion();

    tokio::select! {
        result = runner.execute(&args.files, args.filter.as_deref()) => {
            result.context("Spec run failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted before the run completed");
            present_notice("Interrupted");
            std::process::exit(completion.termination_code());
        }
    }
    Ok(())
}
