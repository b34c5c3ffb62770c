//! Run filebench workloads: one script, or every script in a directory.

use clap::clap_app;

use crate::{
    cli::{self, OutputKind},
    config::{BenchmarkConfig, Settings},
    error::BenchError,
    sequencer::{RunOutcome, Sequencer},
    shell::LocalShell,
};

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { benchmark =>
        (about: "Load, run one filebench script and unload.")
        (@setting DisableVersion)
        (@arg SCRIPT: +required +takes_value "The filebench script to run.")
    };

    cli::add_output_option(cli::add_common_options(app), OutputKind::File)
}

pub fn all_cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { allbenchmarks =>
        (about: "Run every filebench script in a directory, each on a freshly loaded stack.")
        (@setting DisableVersion)
        (@arg DIR: +required +takes_value "The directory of filebench scripts.")
    };

    cli::add_output_option(cli::add_common_options(app), OutputKind::Directory)
}

pub fn run(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let seq = Sequencer::new(shell, cfg);

    let script = sub_m.value_of("SCRIPT").unwrap();

    match seq.run_once(script, sub_m.value_of("OUTPUT"))? {
        RunOutcome::Completed(_) => Ok(()),
        RunOutcome::AlreadyLoaded => Err(BenchError::AlreadyLoaded {
            device: seq.config().backing_device(),
        }
        .into()),
    }
}

pub fn run_all(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;

    let dir = sub_m.value_of("DIR").unwrap();

    let reports = Sequencer::new(shell, cfg).run_all_in_directory(dir, sub_m.value_of("OUTPUT"))?;
    println!("Completed {} workload runs", reports.len());

    Ok(())
}
