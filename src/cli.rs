//! The command registry and the options shared by all subcommands.

use clap::{App, AppSettings, Arg, ArgMatches};

use crate::{config::Backend, shell::LocalShell};

/// Validators for clap arguments.
pub mod validator {
    /// Accepts anything that parses as a `T`.
    pub fn is<T: std::str::FromStr>(s: String) -> Result<(), String>
    where
        T::Err: std::fmt::Debug,
    {
        s.as_str()
            .parse::<T>()
            .map(|_| ())
            .map_err(|e| format!("{:?}", e))
    }
}

/// Runs a subcommand given its matches.
pub type Handler = fn(&ArgMatches<'_>, &LocalShell) -> Result<(), failure::Error>;

/// A subcommand: its name, other names it answers to, its option schema and its handler.
pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub options: fn() -> App<'static, 'static>,
    pub run: Handler,
}

/// All subcommands of the tool. Built once in `main` and passed around explicitly.
#[derive(Default)]
pub struct Registry {
    commands: Vec<Command>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { commands: vec![] }
    }

    pub fn register(mut self, command: Command) -> Self {
        assert!(
            self.get(command.name).is_none(),
            "command {} registered twice",
            command.name
        );
        self.commands.push(command);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    /// The clap application with one subcommand per registered command.
    pub fn app(&self) -> App<'static, 'static> {
        let mut app = App::new("slsbench")
            .about(
                "Drives benchmarks against the SLS: sets up the storage stack, runs workloads, \
                 checkpoints them and tears everything down again.",
            )
            .arg(
                Arg::with_name("DRY_RUN")
                    .short("d")
                    .long("dry_run")
                    .global(true)
                    .help("Print the commands instead of running them."),
            )
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .setting(AppSettings::DisableVersion);

        for command in self.commands.iter() {
            app = app.subcommand((command.options)().aliases(command.aliases));
        }

        app
    }

    /// Run the handler of the subcommand in `matches`.
    pub fn dispatch(
        &self,
        matches: &ArgMatches<'_>,
        shell: &LocalShell,
    ) -> Result<(), failure::Error> {
        match matches.subcommand() {
            (name, Some(sub_m)) => match self.get(name) {
                Some(command) => (command.run)(sub_m, shell),
                None => failure::bail!("unknown command {}", name),
            },
            _ => failure::bail!("no command given"),
        }
    }
}

/// True if `-d` was given, before or after the subcommand.
pub fn is_dry_run(matches: &ArgMatches<'_>) -> bool {
    matches.is_present("DRY_RUN")
        || matches
            .subcommand()
            .1
            .map_or(false, |sub_m| sub_m.is_present("DRY_RUN"))
}

/// Whether `-o` names a file or a directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputKind {
    File,
    Directory,
}

pub fn add_output_option<'a, 'b>(app: App<'a, 'b>, kind: OutputKind) -> App<'a, 'b> {
    let (name, help) = match kind {
        OutputKind::File => ("FILE", "Write the workload output to this file."),
        OutputKind::Directory => ("DIR", "Write the workload outputs into this directory."),
    };

    app.arg(
        Arg::with_name("OUTPUT")
            .short("o")
            .takes_value(true)
            .value_name(name)
            .help(help),
    )
}

/// The options describing the storage stack, checkpointing and tools. Any of them can also be set
/// in the config file under its long name.
pub fn add_common_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    fn value<'a, 'b>(name: &'a str, long: &'b str, help: &'b str) -> Arg<'a, 'b> {
        Arg::with_name(name).long(long).takes_value(true).help(help)
    }

    fn switch<'a, 'b>(name: &'a str, long: &'b str, help: &'b str) -> Arg<'a, 'b> {
        Arg::with_name(name).long(long).help(help)
    }

    app.arg(
        Arg::with_name("CONFIG")
            .short("c")
            .long("config")
            .takes_value(true)
            .help("A JSON file with default values for any of the options below."),
    )
    .arg(
        value("DISKS", "disks", "The disks to use, as a comma-separated list (repeatable).")
            .multiple(true)
            .number_of_values(1),
    )
    .arg(
        value("STRIPE", "stripe", "The stripe (and block) size in bytes.")
            .validator(validator::is::<u64>),
    )
    .arg(value("TYPE", "type", "The storage backend.").possible_values(Backend::ALL))
    .arg(value("MOUNTDIR", "mountdir", "Where the storage is mounted (absolute)."))
    .arg(value("STRIPENAME", "stripename", "The name of the stripe device."))
    .arg(value("SLSMODULE", "slsmodule", "Path to the checkpoint kernel module."))
    .arg(value("SLOSMODULE", "slosmodule", "Path to the storage kernel module."))
    .arg(value("NEWFS", "newfs", "Path to the tool that formats the SLOS."))
    .arg(
        value("CHECKPOINTTIME", "checkpointtime", "Milliseconds between SLOS checkpoints.")
            .validator(validator::is::<u64>),
    )
    .arg(switch("CHECKSUM", "checksum", "Enable checksumming (ZFS)."))
    .arg(switch("COMPRESS", "compress", "Enable compression (ZFS)."))
    .arg(switch(
        "WITHGSTAT",
        "withgstat",
        "Sample disk statistics with gstat while a workload runs.",
    ))
    .arg(switch("NOUNLOAD", "nounload", "Leave everything set up after the benchmark."))
    .arg(
        value("RUNS", "runs", "How many times to repeat batch runs.")
            .validator(validator::is::<usize>),
    )
    .arg(
        value("SLSPERIOD", "slsperiod", "Checkpoint period of processes in ms (0 disables).")
            .validator(validator::is::<u64>),
    )
    .arg(value("OID", "oid", "The OID of the checkpoint partition."))
    .arg(value("DELTA", "delta", "Use delta checkpoints (true/false)."))
    .arg(value("RECURSIVE", "recursive", "Checkpoint descendants too (true/false)."))
    .arg(value("SLSCTL", "slsctl", "Path to slsctl."))
    .arg(value("FILEBENCH", "filebench", "Path to filebench."))
    .arg(value("FSDB", "fsdb", "Path to the SLOS debugger, used to count checkpoints."))
    .arg(value("POSTPROCESS", "postprocess", "Script run on every captured output."))
    .arg(value("BENCHADDR", "benchaddr", "Address the server under test listens on."))
    .arg(
        value("BENCHPORT", "benchport", "Port the server under test listens on.")
            .validator(validator::is::<u16>),
    )
    .arg(value("SSHADDR", "sshaddr", "The machine running the load generator."))
    .arg(
        value("SSHPORT", "sshport", "SSH port of the load generator.")
            .validator(validator::is::<u16>),
    )
    .arg(value("SSHKEY", "sshkey", "SSH key for the load generator."))
    .arg(value("USER", "user", "User on the load generator."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn options() -> App<'static, 'static> {
        add_common_options(clap::SubCommand::with_name("noop"))
    }

    fn run(sub_m: &ArgMatches<'_>, _shell: &LocalShell) -> Result<(), failure::Error> {
        assert_eq!(sub_m.value_of("STRIPE"), Some("4096"));
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn registry() -> Registry {
        Registry::new().register(Command {
            name: "noop",
            aliases: &["runnoop"],
            options,
            run,
        })
    }

    #[test]
    fn dispatch_by_name_and_alias() {
        let registry = registry();
        let shell = LocalShell::new();

        for name in &["noop", "runnoop"] {
            let matches = registry
                .app()
                .get_matches_from_safe(vec!["slsbench", name, "--stripe", "4096"])
                .unwrap();
            registry.dispatch(&matches, &shell).unwrap();
        }

        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dry_run_is_global() {
        for argv in &[vec!["slsbench", "-d", "noop"], vec!["slsbench", "noop", "--dry_run"]] {
            let matches = registry().app().get_matches_from_safe(argv.clone()).unwrap();
            assert!(is_dry_run(&matches));
        }

        let matches = registry()
            .app()
            .get_matches_from_safe(vec!["slsbench", "noop"])
            .unwrap();
        assert!(!is_dry_run(&matches));
    }

    #[test]
    fn options_are_validated() {
        let app = || registry().app();
        assert!(app()
            .get_matches_from_safe(vec!["slsbench", "noop", "--stripe", "big"])
            .is_err());
        assert!(app()
            .get_matches_from_safe(vec!["slsbench", "noop", "--type", "ext4"])
            .is_err());
        assert!(app().get_matches_from_safe(vec!["slsbench"]).is_err());
    }

    #[test]
    fn output_option_kinds() {
        let app = add_output_option(App::new("t"), OutputKind::Directory);
        let matches = app.get_matches_from_safe(vec!["t", "-o", "/tmp/out"]).unwrap();
        assert_eq!(matches.value_of("OUTPUT"), Some("/tmp/out"));
    }
}
