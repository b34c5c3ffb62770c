//! This program drives benchmarks against the SLS. Which routine is chosen by passing different
//! subcommands; most of them take the storage stack options or a config file.

use slsbench::{cli, error::BenchError, shell::LocalShell};

fn run() -> Result<(), failure::Error> {
    let registry = slsbench::registry();
    let matches = registry.app().get_matches();

    let mut shell = LocalShell::new();
    if cli::is_dry_run(&matches) {
        shell.toggle_dry_run();
    }

    registry.dispatch(&matches, &shell)
}

fn main() {
    use console::style;

    env_logger::init();

    // Always get backtraces. The benchmarks dominate the running time anyway.
    std::env::set_var("RUST_BACKTRACE", "1");

    // If an error occurred, try to print something helpful.
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== ERROR ==================================================================================
`slsbench` encountered an error. The command log above may offer clues. Commands run over SSH log
more details with RUST_LOG=debug. If the storage stack was left half set up, run `slsbench unload`
with the same options before trying again.
"#;

        println!("{}", style(MESSAGE).red().bold());

        if let Some(bench_err) = err.downcast_ref::<BenchError>() {
            println!("{}", bench_err.hint());
        }

        // Errors from SSH commands
        if err.downcast_ref::<spurs::SshError>().is_some() {
            println!("An error occurred while attempting to run a command over SSH");
        }

        // Print error and backtrace
        println!(
            "`slsbench` encountered the following error:\n{}\n{}",
            err.as_fail(),
            err.backtrace(),
        );

        std::process::exit(101);
    }
}
