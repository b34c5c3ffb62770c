//! Periodic checkpointing of running processes with `slsctl`.

use log::info;

use serde::Serialize;

use crate::{
    config::{BackendCaps, BenchmarkConfig},
    error::BenchError,
    shell::Execute,
};

/// A partition that processes were attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckpointPartition {
    pub oid: String,
    pub pids: Vec<u32>,
    /// Checkpoint period in ms.
    pub period: u64,
    pub delta: bool,
    pub recursive: bool,
}

/// Create a partition for the configured OID on the configured backend, attach every process in
/// `pids` to it and trigger the first checkpoint. Returns `None` if the checkpoint period is 0.
pub fn start_checkpointing(
    shell: &impl Execute,
    cfg: &BenchmarkConfig,
    pids: &[u32],
) -> Result<Option<CheckpointPartition>, failure::Error> {
    let ckpt = &cfg.checkpoint;
    if ckpt.period == 0 {
        return Ok(None);
    }

    if !cfg.caps().contains(BackendCaps::CHECKPOINT) {
        Err(BenchError::InvalidBackend {
            backend: cfg.backend.to_string(),
            operation: "checkpointing",
        })?;
    }

    let slsctl = ckpt
        .slsctl
        .as_deref()
        .ok_or(BenchError::MissingOption("slsctl"))?;
    let oid = ckpt.oid.as_deref().ok_or(BenchError::MissingOption("oid"))?;

    info!(
        "Checkpointing {:?} into partition {} every {} ms",
        pids, oid, ckpt.period
    );

    let mut partadd = argv!(
        slsctl,
        "partadd",
        "-o",
        oid,
        "-b",
        cfg.backend,
        "-t",
        ckpt.period
    );
    if ckpt.delta {
        partadd = partadd.arg("-d");
    }
    shell.run(partadd)?;

    for pid in pids.iter() {
        shell.run(argv!(slsctl, "attach", "-o", oid, "-p", pid))?;
    }

    let mut checkpoint = argv!(slsctl, "checkpoint", "-o", oid);
    if ckpt.recursive {
        checkpoint = checkpoint.arg("-r");
    }
    shell.run(checkpoint)?;

    Ok(Some(CheckpointPartition {
        oid: oid.to_owned(),
        pids: pids.to_vec(),
        period: ckpt.period,
        delta: ckpt.delta,
        recursive: ckpt.recursive,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::shell::testing::FakeShell;

    #[test]
    fn partition_attach_then_checkpoint() {
        let shell = FakeShell::new();
        let mut cfg = BenchmarkConfig::example(Backend::Slos, &["da1"]).with_checkpoint_period(100);
        cfg.checkpoint.delta = true;

        let part = start_checkpointing(&shell, &cfg, &[42, 43]).unwrap().unwrap();
        assert_eq!(part.pids, vec![42, 43]);
        assert_eq!(part.oid, "1000");

        assert_eq!(
            shell.commands(),
            vec![
                "/sls/tools/slsctl/slsctl partadd -o 1000 -b slos -t 100 -d",
                "/sls/tools/slsctl/slsctl attach -o 1000 -p 42",
                "/sls/tools/slsctl/slsctl attach -o 1000 -p 43",
                "/sls/tools/slsctl/slsctl checkpoint -o 1000 -r",
            ]
        );
    }

    #[test]
    fn zero_period_does_nothing() {
        let shell = FakeShell::new();
        let cfg = BenchmarkConfig::example(Backend::Ffs, &["da1"]);

        assert_eq!(start_checkpointing(&shell, &cfg, &[42]).unwrap(), None);
        assert!(shell.commands().is_empty());
    }

    #[test]
    fn non_checkpointing_backend_is_rejected() {
        let shell = FakeShell::new();
        let cfg = BenchmarkConfig::example(Backend::Zfs, &["da1"]).with_checkpoint_period(10);

        let err = start_checkpointing(&shell, &cfg, &[42]).unwrap_err();
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::InvalidBackend { backend, .. }) => assert_eq!(backend, "zfs"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(shell.commands().is_empty());
    }

    #[test]
    fn failed_partition_creation_stops_before_attaching() {
        let shell = FakeShell::new();
        shell.fail_on("/sls/tools/slsctl/slsctl partadd");
        let mut cfg = BenchmarkConfig::example(Backend::Memory, &["da1"]).with_checkpoint_period(10);
        cfg.checkpoint.recursive = false;

        assert!(start_checkpointing(&shell, &cfg, &[42]).is_err());
        assert_eq!(shell.count("/sls/tools/slsctl/slsctl attach"), 0);
    }
}
