//! A library of routines for benchmarking the SLS: bringing the storage stack up and down,
//! running workloads on it, checkpointing processes and sweeping tunables.

#[macro_use]
extern crate failure_derive;

// Must be imported first because the other submodules use the macros defined therein.
#[macro_use]
mod macros;

pub mod background;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod httpserve;
pub mod remote;
pub mod sequencer;
pub mod shell;
pub mod stack;
pub mod sweep;
pub mod system;
pub mod templates;
pub mod workload;

pub mod benchmark;
pub mod firefox;
pub mod kvstore;
pub mod load;
pub mod series;
pub mod webserver;

use cli::{Command, Registry};

/// Format the given timings, one `label: duration` per line.
pub fn timings_str(timings: &[(&str, std::time::Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}

/// Every subcommand of `slsbench`.
pub fn registry() -> Registry {
    Registry::new()
        .register(Command {
            name: "load",
            aliases: &[],
            options: load::load_cli_options,
            run: load::run_load,
        })
        .register(Command {
            name: "unload",
            aliases: &[],
            options: load::unload_cli_options,
            run: load::run_unload,
        })
        .register(Command {
            name: "benchmark",
            aliases: &["runbenchmark"],
            options: benchmark::cli_options,
            run: benchmark::run,
        })
        .register(Command {
            name: "allbenchmarks",
            aliases: &["runallbenchmarks"],
            options: benchmark::all_cli_options,
            run: benchmark::run_all,
        })
        .register(Command {
            name: "series",
            aliases: &[],
            options: series::cli_options,
            run: series::run,
        })
        .register(Command {
            name: "allseries",
            aliases: &[],
            options: series::all_cli_options,
            run: series::run_all,
        })
        .register(Command {
            name: "webserver",
            aliases: &[],
            options: webserver::cli_options,
            run: webserver::run,
        })
        .register(Command {
            name: "webbench",
            aliases: &[],
            options: webserver::webbench_cli_options,
            run: webserver::run_bench,
        })
        .register(Command {
            name: "kvstore",
            aliases: &[],
            options: kvstore::cli_options,
            run: kvstore::run,
        })
        .register(Command {
            name: "firefox",
            aliases: &[],
            options: firefox::cli_options,
            run: firefox::run,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn every_subcommand_parses() {
        let registry = registry();
        assert_eq!(registry.names().len(), 10);

        let app = || registry.app();
        for argv in &[
            vec!["slsbench", "load"],
            vec!["slsbench", "unload", "--nounload"],
            vec!["slsbench", "runbenchmark", "a.f", "-o", "a.out"],
            vec!["slsbench", "runallbenchmarks", "scripts", "--runs", "3"],
            vec!["slsbench", "series", "a.f", "10", "100", "4"],
            vec!["slsbench", "allseries", "scripts", "0", "10", "2", "-o", "out"],
            vec!["slsbench", "webserver", "--server", "lighttpd", "-o", "out"],
            vec!["slsbench", "webbench", "--threads", "4"],
            vec!["slsbench", "kvstore", "--kvstore", "memcached", "--recordcount", "10"],
            vec!["slsbench", "firefox", "--hosted", "/srv/kraken", "-d"],
        ] {
            assert!(app().get_matches_from_safe(argv.clone()).is_ok(), "{:?}", argv);
        }

        assert!(app()
            .get_matches_from_safe(vec!["slsbench", "webserver", "--server", "apache"])
            .is_err());
    }

    #[test]
    fn timings_format() {
        let timings = [("workload", Duration::from_secs(2)), ("postprocess", Duration::from_millis(5))];
        assert_eq!(timings_str(&timings), "workload: 2s\npostprocess: 5ms\n");
    }
}
