//! Running one workload against the mounted storage.

use std::fs::OpenOptions;
use std::io::Write;

use failure::ResultExt;

use log::{info, warn};

use serde::Serialize;

use crate::{
    background::{BackgroundContext, BackgroundTask},
    config::{BackendCaps, BenchmarkConfig},
    shell::{Cmd, Execute},
};

/// How long (in seconds) the `gstat` sampler runs at most.
pub const GSTAT_TIMEOUT: usize = 40;

/// What a workload run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveReport {
    /// Checkpoints completed by the storage engine while the workload ran.
    pub checkpoints: i64,
    /// Exit status of the workload tool.
    pub status: Option<i32>,
    /// The file holding the workload output, if it was captured.
    pub output: Option<String>,
}

/// The parameters of a run, written next to its output.
#[derive(Serialize)]
struct RunParams<'a> {
    script: &'a str,
    output: &'a str,
    config: &'a BenchmarkConfig,
    timestamp: String,
}

/// The sibling files of a workload output file.
pub fn gstat_file(output: &str) -> String {
    format!("{}.gstat.csv", output)
}

pub fn params_file(output: &str) -> String {
    format!("{}.params", output)
}

pub fn time_file(output: &str) -> String {
    format!("{}.time", output)
}

/// One execution of the workload tool against a script.
pub struct WorkloadRun<'s, E: Execute> {
    shell: &'s E,
    cfg: &'s BenchmarkConfig,
    script: &'s str,
    output: Option<&'s str>,
}

impl<'s, E: Execute> WorkloadRun<'s, E> {
    pub fn new(
        shell: &'s E,
        cfg: &'s BenchmarkConfig,
        script: &'s str,
        output: Option<&'s str>,
    ) -> Self {
        WorkloadRun {
            shell,
            cfg,
            script,
            output,
        }
    }

    /// The number of checkpoints the storage engine has completed so far. Always 0 for backends
    /// that do not count them.
    pub fn snapshot_count(&self) -> Result<i64, failure::Error> {
        if !self.cfg.caps().contains(BackendCaps::SNAPSHOT_COUNTER) {
            return Ok(0);
        }

        let out = self.shell.run(
            argv!(&self.cfg.tools.fsdb, "-s", self.cfg.backing_device()).capture(),
        )?;
        let count = out
            .stdout
            .trim()
            .parse::<i64>()
            .with_context(|_| format!("parsing the snapshot count `{}`", out.stdout.trim()))?;

        Ok(count)
    }

    /// Run the workload to completion.
    pub fn drive(self) -> Result<DriveReport, failure::Error> {
        let mut timers = vec![];

        let before = self.snapshot_count()?;

        let mut bgctx = BackgroundContext::new(self.shell);
        if let (Some(output), true) = (self.output, self.cfg.withgstat) {
            bgctx.spawn(BackgroundTask {
                name: "gstat",
                cmd: argv!(
                    "timeout",
                    GSTAT_TIMEOUT,
                    "gstat",
                    "-C",
                    "-f",
                    self.cfg.gstat_device()
                )
                .stdout_to(gstat_file(output)),
            })?;
        }

        let mut workload = argv!(&self.cfg.tools.filebench, "-f", self.script).allow_error();
        if let Some(output) = self.output {
            workload = workload.stdout_to(output);
        }

        info!("Running workload {}", self.script);
        let status = time!(timers, "Workload", self.shell.run(workload)?.status);
        if status != Some(0) {
            warn!("Workload {} exited with status {:?}", self.script, status);
        }

        bgctx.notify_and_join_all()?;

        let checkpoints = self.snapshot_count()? - before;

        match self.output {
            Some(output) => {
                time!(
                    timers,
                    "Post-processing",
                    self.shell
                        .run(Cmd::new(&self.cfg.tools.postprocess).arg(output).allow_error())?
                );

                append_line(output, &checkpoints.to_string())?;
                self.write_metadata(output, &timers)?;
            }
            None => println!("CHECKPOINTS COMPLETED {}", checkpoints),
        }

        Ok(DriveReport {
            checkpoints,
            status,
            output: self.output.map(String::from),
        })
    }

    fn write_metadata(
        &self,
        output: &str,
        timers: &[(&str, std::time::Duration)],
    ) -> Result<(), failure::Error> {
        let params = RunParams {
            script: self.script,
            output,
            config: self.cfg,
            timestamp: chrono::offset::Local::now().to_rfc3339(),
        };

        let params_file = params_file(output);
        std::fs::write(&params_file, serde_json::to_string_pretty(&params)?)
            .with_context(|_| format!("writing {}", params_file))?;

        let time_file = time_file(output);
        std::fs::write(&time_file, crate::timings_str(timers))
            .with_context(|_| format!("writing {}", time_file))?;

        Ok(())
    }
}

/// Append `line` to the file at `path`.
fn append_line(path: &str, line: &str) -> Result<(), failure::Error> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|_| format!("opening {}", path))?;
    writeln!(file, "{}", line).with_context(|_| format!("appending to {}", path))?;
    Ok(())
}
