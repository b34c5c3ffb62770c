//! Sweep the storage checkpoint interval over a workload, or over every workload in a directory.

use clap::clap_app;

use crate::{
    cli::{self, OutputKind},
    config::{BenchmarkConfig, Settings},
    sequencer::Sequencer,
    shell::LocalShell,
};

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { series =>
        (about: "Run one filebench script once per checkpoint interval of a linear sweep.")
        (@setting DisableVersion)
        (@arg SCRIPT: +required +takes_value "The filebench script to run.")
        (@arg MIN: +required +takes_value {cli::validator::is::<i64>}
         "The first checkpoint interval (ms).")
        (@arg MAX: +required +takes_value {cli::validator::is::<i64>}
         "The last checkpoint interval (ms).")
        (@arg STEPS: +required +takes_value {cli::validator::is::<usize>}
         "The number of intervals between MIN and MAX, inclusive.")
    };

    cli::add_output_option(cli::add_common_options(app), OutputKind::Directory)
}

pub fn all_cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { allseries =>
        (about: "Run the checkpoint interval sweep for every filebench script in a directory.")
        (@setting DisableVersion)
        (@arg DIR: +required +takes_value "The directory of filebench scripts.")
        (@arg MIN: +required +takes_value {cli::validator::is::<i64>}
         "The first checkpoint interval (ms).")
        (@arg MAX: +required +takes_value {cli::validator::is::<i64>}
         "The last checkpoint interval (ms).")
        (@arg STEPS: +required +takes_value {cli::validator::is::<usize>}
         "The number of intervals between MIN and MAX, inclusive.")
    };

    cli::add_output_option(cli::add_common_options(app), OutputKind::Directory)
}

/// MIN, MAX and STEPS. They are validated by clap.
fn sweep_args(sub_m: &clap::ArgMatches<'_>) -> (i64, i64, usize) {
    let min = sub_m.value_of("MIN").unwrap().parse::<i64>().unwrap();
    let max = sub_m.value_of("MAX").unwrap().parse::<i64>().unwrap();
    let steps = sub_m.value_of("STEPS").unwrap().parse::<usize>().unwrap();
    (min, max, steps)
}

pub fn run(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let script = sub_m.value_of("SCRIPT").unwrap();
    let (min, max, steps) = sweep_args(sub_m);

    let reports =
        Sequencer::new(shell, cfg).run_series(script, min, max, steps, sub_m.value_of("OUTPUT"))?;
    for (i, report) in reports.iter().enumerate() {
        println!("Step {}: {} checkpoints", i, report.checkpoints);
    }

    Ok(())
}

pub fn run_all(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let dir = sub_m.value_of("DIR").unwrap();
    let (min, max, steps) = sweep_args(sub_m);

    let reports =
        Sequencer::new(shell, cfg).run_all_series(dir, min, max, steps, sub_m.value_of("OUTPUT"))?;
    println!("Completed {} workload runs", reports.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_arguments_are_validated() {
        let app = || cli_options();
        let matches = app()
            .get_matches_from_safe(vec!["series", "a.f", "10", "100", "4"])
            .unwrap();
        assert_eq!(sweep_args(&matches), (10, 100, 4));

        assert!(app()
            .get_matches_from_safe(vec!["series", "a.f", "10", "100", "four"])
            .is_err());
        assert!(app()
            .get_matches_from_safe(vec!["series", "a.f", "10", "100"])
            .is_err());
    }
}
