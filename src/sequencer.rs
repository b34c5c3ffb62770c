//! The load -> drive -> unload sequence and its batch variants.
//!
//! The sequencer keeps no state of its own: whether the stack is loaded is always read off the
//! system (see `ResourceStack::is_loaded`), so a sequence can pick up after a crashed run.

use console::style;

use failure::ResultExt;

use log::{info, warn};

use crate::{
    config::BenchmarkConfig,
    error::BenchError,
    shell::Execute,
    stack::{ResourceHandle, ResourceStack, MOUNTDIR_MODE},
    sweep::SweepPlan,
    workload::{DriveReport, WorkloadRun},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded,
    /// `--nounload` was given; nothing was torn down.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(DriveReport),
    /// The stack was already set up, so nothing ran.
    AlreadyLoaded,
}

pub struct Sequencer<'s, E: Execute> {
    shell: &'s E,
    cfg: BenchmarkConfig,
}

impl<'s, E: Execute> Sequencer<'s, E> {
    pub fn new(shell: &'s E, cfg: BenchmarkConfig) -> Self {
        Sequencer { shell, cfg }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.cfg
    }

    fn stack(&self) -> ResourceStack<'_, E> {
        ResourceStack::new(self.shell, &self.cfg)
    }

    fn already_loaded(&self) -> BenchError {
        BenchError::AlreadyLoaded {
            device: self.cfg.backing_device(),
        }
    }

    pub fn state(&self) -> Result<LoadState, failure::Error> {
        Ok(if self.stack().is_loaded()? {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        })
    }

    /// Set up the stack. Fails with `BenchError::AlreadyLoaded` if it is already set up.
    pub fn load(&self) -> Result<ResourceHandle, failure::Error> {
        let stack = self.stack();
        stack.ensure_unloaded()?;
        let handle = stack.acquire()?;
        info!("Loaded {} on {}", self.cfg.backend, handle.device);
        Ok(handle)
    }

    /// Tear the stack down, unless `--nounload` was given. Safe to call on a stack that is not
    /// (or only partially) set up.
    pub fn unload(&self) -> Result<UnloadOutcome, failure::Error> {
        if self.cfg.nounload {
            println!("Unloading not permitted (--nounload)");
            return Ok(UnloadOutcome::Skipped);
        }

        self.stack().release(&ResourceHandle::for_config(&self.cfg))?;
        info!("Unloaded {}", self.cfg.backend);
        Ok(UnloadOutcome::Unloaded)
    }

    /// Load, run the workload in `script` and unload. Nothing runs if the stack is already set up.
    pub fn run_once(
        &self,
        script: &str,
        output: Option<&str>,
    ) -> Result<RunOutcome, failure::Error> {
        let stack = self.stack();
        if stack.is_loaded()? {
            println!("Already loaded. Unload first to run a benchmark");
            return Ok(RunOutcome::AlreadyLoaded);
        }

        let handle = stack.acquire()?;

        let report = match WorkloadRun::new(self.shell, &self.cfg, script, output).drive() {
            Ok(report) => report,
            Err(err) => {
                if !self.cfg.nounload {
                    warn!("Workload {} failed, tearing down: {}", script, err);
                    if let Err(release_err) = stack.release(&handle) {
                        warn!("Teardown failed: {}", release_err);
                    }
                }
                return Err(err);
            }
        };

        self.unload()?;

        Ok(RunOutcome::Completed(report))
    }

    /// Like `run_once`, but a stack that is already set up is an error.
    fn run_once_or_fail(
        &self,
        script: &str,
        output: Option<&str>,
    ) -> Result<DriveReport, failure::Error> {
        match self.run_once(script, output)? {
            RunOutcome::Completed(report) => Ok(report),
            RunOutcome::AlreadyLoaded => Err(self.already_loaded().into()),
        }
    }

    /// Run every file in `dir` once per configured run. With `outdir`, the output of run `x` of
    /// file `f` goes to `<outdir>/<x>/<f>.out`.
    pub fn run_all_in_directory(
        &self,
        dir: &str,
        outdir: Option<&str>,
    ) -> Result<Vec<DriveReport>, failure::Error> {
        self.stack().ensure_unloaded()?;

        let files = list_files(dir)?;
        let mut reports = vec![];

        for x in 0..self.cfg.runs {
            println!("{}", style(format!("===== Run {} =====", x)).bold());

            let rundir = match outdir {
                Some(outdir) => Some(self.make_output_dir(&dir!(outdir, x))?),
                None => None,
            };

            for (i, file) in files.iter().enumerate() {
                println!(
                    "{}",
                    style(format!(
                        "======= Running {} [{} of {}] =======",
                        file,
                        i + 1,
                        files.len()
                    ))
                    .bold()
                );

                let script = dir!(dir, file);
                let output = rundir
                    .as_ref()
                    .map(|rundir| dir!(rundir, format!("{}.out", file)));

                reports.push(self.run_once_or_fail(&script, output.as_deref())?);
            }
        }

        Ok(reports)
    }

    /// Run `script` once for every value of the linear sweep over `[min, max]`, using the value as
    /// the storage checkpoint interval. With `outdir`, the output goes to `<outdir>/<value>.out`.
    pub fn run_series(
        &self,
        script: &str,
        min: i64,
        max: i64,
        steps: usize,
        outdir: Option<&str>,
    ) -> Result<Vec<DriveReport>, failure::Error> {
        let plan = SweepPlan::linear(min, max, steps)?;
        if min < 0 {
            Err(BenchError::InvalidConfig(format!(
                "checkpoint interval {} is negative",
                min
            )))?;
        }

        self.stack().ensure_unloaded()?;

        let mut reports = vec![];
        for value in plan {
            println!("{}", style(format!("======= Running Step {} =======", value)).bold());

            let step = Sequencer::new(self.shell, self.cfg.with_checkpoint_time(value as u64));
            let output = outdir.map(|outdir| dir!(outdir, format!("{}.out", value)));

            reports.push(step.run_once_or_fail(script, output.as_deref())?);
        }

        Ok(reports)
    }

    /// `run_series` for every file in `dir`, once per configured run. With `outdir`, the series of
    /// run `x` of file `f` goes to `<outdir>/<x>/<f>/`.
    pub fn run_all_series(
        &self,
        dir: &str,
        min: i64,
        max: i64,
        steps: usize,
        outdir: Option<&str>,
    ) -> Result<Vec<DriveReport>, failure::Error> {
        self.stack().ensure_unloaded()?;

        let files = list_files(dir)?;
        let mut reports = vec![];

        for x in 0..self.cfg.runs {
            println!("{}", style(format!("===== Run {} =====", x)).bold());

            let rundir = match outdir {
                Some(outdir) => Some(self.make_output_dir(&dir!(outdir, x))?),
                None => None,
            };

            for file in files.iter() {
                let filedir = match &rundir {
                    Some(rundir) => Some(self.make_output_dir(&dir!(rundir, file))?),
                    None => None,
                };

                reports.extend(self.run_series(
                    &dir!(dir, file),
                    min,
                    max,
                    steps,
                    filedir.as_deref(),
                )?);
            }
        }

        Ok(reports)
    }

    /// Create a world-writable output directory. It may already exist.
    fn make_output_dir(&self, path: &str) -> Result<String, failure::Error> {
        self.shell.create_dir(path)?;
        if let Err(err) = self.shell.set_mode(path, MOUNTDIR_MODE) {
            warn!("Unable to make {} world-writable: {}", path, err);
        }
        Ok(path.to_owned())
    }
}

/// The names of the regular files in `dir`, sorted.
pub fn list_files(dir: &str) -> Result<Vec<String>, failure::Error> {
    let mut files = vec![];
    for entry in std::fs::read_dir(dir).with_context(|_| format!("listing {}", dir))? {
        let entry = entry.with_context(|_| format!("listing {}", dir))?;
        if entry.file_type()?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::shell::testing::FakeShell;

    fn slos() -> BenchmarkConfig {
        BenchmarkConfig::example(Backend::Slos, &["da1", "da2"])
    }

    fn scripts(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), "run 10\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        dir
    }

    #[test]
    fn second_load_is_refused_without_side_effects() {
        let shell = FakeShell::new();
        let seq = Sequencer::new(&shell, slos());

        assert_eq!(seq.state().unwrap(), LoadState::Unloaded);
        seq.load().unwrap();
        assert_eq!(seq.state().unwrap(), LoadState::Loaded);
        let after_first = shell.commands();

        let err = seq.load().unwrap_err();
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::AlreadyLoaded { device }) => assert_eq!(device, "/dev/stripe/st0"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(shell.commands(), after_first);
        assert_eq!(shell.count("mount -t slsfs"), 1);
    }

    #[test]
    fn unload_is_idempotent() {
        let shell = FakeShell::new();
        let seq = Sequencer::new(&shell, slos());
        seq.load().unwrap();

        assert_eq!(seq.unload().unwrap(), UnloadOutcome::Unloaded);
        assert_eq!(seq.unload().unwrap(), UnloadOutcome::Unloaded);
        assert_eq!(seq.state().unwrap(), LoadState::Unloaded);
    }

    #[test]
    fn nounload_keeps_everything_in_place() {
        let shell = FakeShell::new();
        let mut cfg = slos();
        cfg.nounload = true;
        let seq = Sequencer::new(&shell, cfg);
        seq.load().unwrap();
        shell.clear_log();

        assert_eq!(seq.unload().unwrap(), UnloadOutcome::Skipped);
        assert!(shell.commands().is_empty());
        assert!(shell.exists("/dev/stripe/st0"));
        assert!(shell.is_mounted("/testmnt"));
    }

    #[test]
    fn run_once_on_loaded_stack_does_nothing() {
        let shell = FakeShell::new();
        shell.add_path("/dev/stripe/st0");
        let seq = Sequencer::new(&shell, slos());

        assert_eq!(seq.run_once("a.f", None).unwrap(), RunOutcome::AlreadyLoaded);
        assert!(shell.commands().is_empty());
    }

    #[test]
    fn run_once_loads_drives_and_unloads() {
        let shell = FakeShell::new();
        shell.push_output("fsdb", "10\n");
        shell.push_output("fsdb", "12\n");
        let seq = Sequencer::new(&shell, slos());

        match seq.run_once("a.f", None).unwrap() {
            RunOutcome::Completed(report) => assert_eq!(report.checkpoints, 2),
            other => panic!("unexpected outcome {:?}", other),
        }

        let mount = shell.position("mount -t slsfs").unwrap();
        let workload = shell.position("filebench -f a.f").unwrap();
        let umount = shell.position("umount /testmnt").unwrap();
        assert!(mount < workload && workload < umount);
        assert_eq!(seq.state().unwrap(), LoadState::Unloaded);
    }

    #[test]
    fn failed_drive_tears_down() {
        let shell = FakeShell::new();
        shell.push_output("fsdb", "not a number\n");
        let seq = Sequencer::new(&shell, slos());

        assert!(seq.run_once("a.f", None).is_err());
        assert_eq!(shell.count("filebench"), 0);
        assert_eq!(shell.count("umount /testmnt"), 1);
        assert_eq!(seq.state().unwrap(), LoadState::Unloaded);
    }

    #[test]
    fn every_file_runs_once_per_run() {
        let dir = scripts(&["c.f", "a.f", "b.f"]);
        let shell = FakeShell::new();
        let mut cfg = BenchmarkConfig::example(Backend::Ffs, &["da1", "da2"]);
        cfg.runs = 2;
        let seq = Sequencer::new(&shell, cfg);

        let reports = seq
            .run_all_in_directory(dir.path().to_str().unwrap(), None)
            .unwrap();
        assert_eq!(reports.len(), 6);
        for name in &["a.f", "b.f", "c.f"] {
            assert_eq!(shell.count(&format!("filebench -f {}", dir!(dir.path().to_str().unwrap(), name))), 2);
        }
        assert_eq!(shell.count("filebench"), 6);
        assert_eq!(shell.count("gstripe create"), 6);
        assert_eq!(shell.count("mkdir"), 0);
    }

    #[test]
    fn batch_outputs_go_to_per_run_directories() {
        let dir = scripts(&["a.f", "b.f"]);
        let out = tempfile::tempdir().unwrap();
        let outdir = out.path().to_str().unwrap();
        std::fs::create_dir(out.path().join("0")).unwrap();

        let shell = FakeShell::new();
        let seq = Sequencer::new(&shell, BenchmarkConfig::example(Backend::Ffs, &["da1"]));
        seq.run_all_in_directory(dir.path().to_str().unwrap(), Some(outdir))
            .unwrap();

        assert_eq!(shell.count(&format!("mkdir {}/0", outdir)), 1);
        assert_eq!(shell.count(&format!("chmod 777 {}/0", outdir)), 1);
        assert!(out.path().join("0/a.f.out").is_file());
        assert!(out.path().join("0/b.f.out.params").is_file());
    }

    #[test]
    fn batches_refuse_a_loaded_stack() {
        let dir = scripts(&["a.f"]);
        let shell = FakeShell::new();
        shell.add_path("/dev/stripe/st0");
        let seq = Sequencer::new(&shell, slos());

        assert!(seq
            .run_all_in_directory(dir.path().to_str().unwrap(), None)
            .is_err());
        assert!(seq.run_series("a.f", 10, 100, 4, None).is_err());
        assert!(seq
            .run_all_series(dir.path().to_str().unwrap(), 10, 100, 4, None)
            .is_err());
        assert!(shell.commands().is_empty());
    }

    #[test]
    fn series_sweeps_the_checkpoint_interval() {
        let out = tempfile::tempdir().unwrap();
        let outdir = out.path().to_str().unwrap();
        let shell = FakeShell::new();
        let seq = Sequencer::new(&shell, BenchmarkConfig::example(Backend::Memory, &["da1", "da2"]));

        let reports = seq.run_series("a.f", 10, 100, 4, Some(outdir)).unwrap();
        assert_eq!(reports.len(), 4);

        let settings: Vec<String> = shell
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("sysctl aurora_slos.checkpointtime="))
            .collect();
        assert_eq!(
            settings,
            vec![
                "sysctl aurora_slos.checkpointtime=10",
                "sysctl aurora_slos.checkpointtime=40",
                "sysctl aurora_slos.checkpointtime=70",
                "sysctl aurora_slos.checkpointtime=100",
            ]
        );
        for value in &[10, 40, 70, 100] {
            assert!(out.path().join(format!("{}.out", value)).is_file());
        }
        // The base configuration is untouched.
        assert_eq!(seq.config().checkpointtime, Some(1000));
    }

    #[test]
    fn all_series_nests_output_directories() {
        let dir = scripts(&["a.f", "b.f"]);
        let out = tempfile::tempdir().unwrap();
        let outdir = out.path().to_str().unwrap();
        for sub in &["0", "0/a.f", "0/b.f"] {
            std::fs::create_dir(out.path().join(sub)).unwrap();
        }

        let shell = FakeShell::new();
        let seq = Sequencer::new(&shell, BenchmarkConfig::example(Backend::Memory, &["da1"]));
        let reports = seq
            .run_all_series(dir.path().to_str().unwrap(), 0, 10, 2, Some(outdir))
            .unwrap();

        assert_eq!(reports.len(), 4);
        assert_eq!(shell.count(&format!("mkdir {}/0/a.f", outdir)), 1);
        assert!(out.path().join("0/a.f/0.out").is_file());
        assert!(out.path().join("0/b.f/10.out").is_file());
    }
}
