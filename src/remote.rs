//! Load generators (wrk, YCSB) run on another machine and are driven over SSH.

use console::style;

use log::info;

use spurs::{Execute as _, SshShell};

use crate::{config::RemoteConfig, error::BenchError};

/// Default SSH port of the load generator.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// The `host:port` string to connect to.
pub fn ssh_host(remote: &RemoteConfig) -> Result<String, BenchError> {
    let addr = remote
        .sshaddr
        .as_deref()
        .ok_or(BenchError::MissingOption("sshaddr"))?;
    Ok(format!(
        "{}:{}",
        addr,
        remote.sshport.unwrap_or(DEFAULT_SSH_PORT)
    ))
}

/// Open a shell on the load generator, with the configured key if there is one.
pub fn connect(remote: &RemoteConfig) -> Result<SshShell, failure::Error> {
    let host = ssh_host(remote)?;
    let user = remote
        .user
        .as_deref()
        .ok_or(BenchError::MissingOption("user"))?;

    info!("Connecting to load generator {}@{}", user, host);

    let shell = match remote.sshkey.as_deref() {
        Some(key) => SshShell::with_key(user, &host, key)?,
        None => SshShell::with_default_key(user, &host)?,
    };

    Ok(shell)
}

/// Something that runs load generator commands and returns their standard output.
pub trait LoadGenerator {
    fn run(&self, command: &str) -> Result<String, failure::Error>;
}

/// A load generator on another machine, reached over SSH.
pub struct SshGenerator {
    shell: SshShell,
}

impl SshGenerator {
    pub fn connect(remote: &RemoteConfig) -> Result<Self, failure::Error> {
        Ok(SshGenerator {
            shell: connect(remote)?,
        })
    }
}

impl LoadGenerator for SshGenerator {
    fn run(&self, command: &str) -> Result<String, failure::Error> {
        Ok(self.shell.run(spurs::cmd!("{}", command))?.stdout)
    }
}

/// Prints the commands instead of running them.
pub struct DryRunGenerator;

impl LoadGenerator for DryRunGenerator {
    fn run(&self, command: &str) -> Result<String, failure::Error> {
        println!(
            "{} {}",
            style(format!("$ (remote) {}", command)).yellow().bold(),
            style("(dry run)").dim()
        );
        Ok(String::new())
    }
}

/// The generator to use for an invocation.
pub fn generator(
    remote: &RemoteConfig,
    dry_run: bool,
) -> Result<Box<dyn LoadGenerator>, failure::Error> {
    if dry_run {
        Ok(Box::new(DryRunGenerator))
    } else {
        Ok(Box::new(SshGenerator::connect(remote)?))
    }
}

/// Records commands and replays scripted output.
#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::LoadGenerator;

    #[derive(Default)]
    pub struct FakeGenerator {
        pub commands: RefCell<Vec<String>>,
        pub outputs: RefCell<VecDeque<String>>,
    }

    impl FakeGenerator {
        pub fn with_outputs(outputs: &[&str]) -> Self {
            FakeGenerator {
                commands: RefCell::new(vec![]),
                outputs: RefCell::new(outputs.iter().map(|o| o.to_string()).collect()),
            }
        }
    }

    impl LoadGenerator for FakeGenerator {
        fn run(&self, command: &str) -> Result<String, failure::Error> {
            self.commands.borrow_mut().push(command.into());
            Ok(self.outputs.borrow_mut().pop_front().unwrap_or_default())
        }
    }
}
