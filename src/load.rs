//! Bring the storage stack up or down by hand.

use clap::clap_app;

use crate::{
    cli,
    config::{BenchmarkConfig, Settings},
    sequencer::{Sequencer, UnloadOutcome},
    shell::LocalShell,
};

pub fn load_cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { load =>
        (about: "Stripe the disks, load the modules, format and mount. Fails if already loaded.")
        (@setting DisableVersion)
    };

    cli::add_common_options(app)
}

pub fn unload_cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { unload =>
        (about: "Unmount, unload the modules and destroy the stripe. Safe to run repeatedly.")
        (@setting DisableVersion)
    };

    cli::add_common_options(app)
}

pub fn run_load(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;

    Sequencer::new(shell, cfg).load()?;
    println!("Loaded..");

    Ok(())
}

pub fn run_unload(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;

    if let UnloadOutcome::Unloaded = Sequencer::new(shell, cfg).unload()? {
        println!("Unloaded..");
    }

    Ok(())
}
