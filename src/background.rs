//! Background tasks that run alongside a workload, e.g. the `gstat` sampler.
//!
//! Each task is an owned process. When the workload is done, `notify_and_join_all` stops every
//! task that is still running with SIGTERM, so a task wrapped in `timeout` takes its command down
//! with it and nothing is left behind. A task that already exited (e.g. because its own `timeout`
//! fired) is fine.

use log::{debug, warn};

use crate::shell::{Cmd, Execute, SpawnHandle};

/// A process to run in the background for the duration of a workload.
pub struct BackgroundTask {
    pub name: &'static str,
    pub cmd: Cmd,
}

/// Owns all background tasks of one workload run.
pub struct BackgroundContext<'s, E: Execute> {
    shell: &'s E,
    handles: Vec<SpawnHandle>,
}

impl<'s, E: Execute> BackgroundContext<'s, E> {
    pub fn new(shell: &'s E) -> Self {
        BackgroundContext {
            shell,
            handles: vec![],
        }
    }

    /// Start the task.
    pub fn spawn(&mut self, task: BackgroundTask) -> Result<(), failure::Error> {
        debug!("Starting background task {}", task.name);
        let handle = self.shell.spawn(task.cmd)?;
        self.handles.push(handle);
        Ok(())
    }

    /// The number of tasks started so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every task and reap it. Failing to stop a task is only a warning: the workload itself
    /// already finished and its results are more important than the samples.
    pub fn notify_and_join_all(self) -> Result<(), failure::Error> {
        for handle in self.handles.into_iter() {
            let label = handle.label().to_owned();
            if let Err(err) = handle.stop() {
                warn!("Unable to stop background task {}: {}", label, err);
            }
        }
        Ok(())
    }
}
