//! Thin wrappers around the system tools the benchmarks poke at: `sysctl`, `kldload`,
//! `kldunload`, `mount`, `zpool` and `pidof`.

use failure::ResultExt;

use crate::shell::{Cmd, Execute};

/// sysctl prefix of the checkpoint engine.
pub const SLS_SYSCTL: &str = "aurora";

/// sysctl prefix of the storage engine.
pub const SLOS_SYSCTL: &str = "aurora_slos";

/// Read `module.key`.
pub fn sysctl_get(shell: &impl Execute, module: &str, key: &str) -> Result<String, failure::Error> {
    let out = shell.run(argv!("sysctl", "-n", format!("{}.{}", module, key)).capture())?;
    Ok(out.stdout.trim_end().to_owned())
}

/// Set `module.key=value`. Fails if the key does not exist or cannot be set.
pub fn sysctl_set<V: std::fmt::Display>(
    shell: &impl Execute,
    module: &str,
    key: &str,
    value: V,
) -> Result<(), failure::Error> {
    shell.run(argv!("sysctl", format!("{}.{}={}", module, key, value)))?;
    Ok(())
}

/// Load the kernel module at `path`. Returns false if `kldload` refused, which usually means the
/// module is already loaded.
pub fn kldload(shell: &impl Execute, path: &str) -> Result<bool, failure::Error> {
    Ok(shell.run(argv!("kldload", path).allow_error())?.success())
}

/// Unload the kernel module `name`. Returns false if it was not loaded.
pub fn kldunload(shell: &impl Execute, name: &str) -> Result<bool, failure::Error> {
    Ok(shell.run(argv!("kldunload", name).allow_error())?.success())
}

/// The file name of a module path, which is what `kldunload` expects.
pub fn module_file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// Returns true if `device` appears in the mount table.
pub fn is_mounted(shell: &impl Execute, device: &str) -> Result<bool, failure::Error> {
    let table = shell.inspect(Cmd::new("mount").capture())?.stdout;
    let prefix = format!("{} on ", device);
    Ok(table.lines().any(|line| line.starts_with(&prefix)))
}

/// Returns true if the ZFS pool exists.
pub fn pool_exists(shell: &impl Execute, pool: &str) -> Result<bool, failure::Error> {
    Ok(shell
        .inspect(argv!("zpool", "list", "-H", pool).mute().allow_error())?
        .success())
}

/// The PID of the main process of a program. Servers often fork workers, so we take the smallest
/// PID reported by `pidof`, which assumes PIDs are not randomized and have not wrapped around.
pub fn pid_main(shell: &impl Execute, name: &str) -> Result<u32, failure::Error> {
    let out = shell.run(argv!("pidof", name).capture())?;
    let mut pids = out
        .stdout
        .split_whitespace()
        .map(|pid| pid.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|_| format!("parsing the output of `pidof {}`", name))?;
    pids.sort_unstable();

    pids.first()
        .copied()
        .ok_or_else(|| failure::format_err!("no running process named {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::FakeShell;

    #[test]
    fn pid_main_picks_the_smallest_pid() {
        let shell = FakeShell::new();
        shell.push_output("pidof", "4312 4310 4311\n");
        assert_eq!(pid_main(&shell, "nginx").unwrap(), 4310);

        shell.push_output("pidof", "\n");
        assert!(pid_main(&shell, "nginx").is_err());
    }

    #[test]
    fn sysctl_round_trip_commands() {
        let shell = FakeShell::new();
        shell.push_output("sysctl", "42\n");

        sysctl_set(&shell, SLOS_SYSCTL, "checkpointtime", 100).unwrap();
        assert_eq!(sysctl_get(&shell, SLS_SYSCTL, "ckpt_done").unwrap(), "42");

        assert_eq!(
            shell.commands(),
            vec![
                "sysctl aurora_slos.checkpointtime=100",
                "sysctl -n aurora.ckpt_done",
            ]
        );
    }

    #[test]
    fn kldload_reports_already_loaded_modules() {
        let shell = FakeShell::new();
        assert!(kldload(&shell, "/sls/slos/slos.ko").unwrap());
        assert!(!kldload(&shell, "/sls/slos/slos.ko").unwrap());
        assert!(kldunload(&shell, "slos.ko").unwrap());
        assert!(!kldunload(&shell, "slos.ko").unwrap());
    }

    #[test]
    fn mount_table_lookup() {
        let shell = FakeShell::new();
        shell
            .run(argv!("mount", "-t", "slsfs", "/dev/nvd0", "/testmnt"))
            .unwrap();
        assert!(is_mounted(&shell, "/dev/nvd0").unwrap());
        assert!(!is_mounted(&shell, "/dev/nvd1").unwrap());
    }

    #[test]
    fn dry_runs_still_read_the_mount_table() {
        use crate::shell::LocalShell;

        let real = LocalShell::new();
        let table = real.run(Cmd::new("mount").capture()).unwrap().stdout;
        let device = table
            .lines()
            .next()
            .and_then(|line| line.split(" on ").next())
            .unwrap()
            .to_owned();

        let mut shell = LocalShell::new();
        shell.toggle_dry_run();
        assert!(is_mounted(&shell, &device).unwrap());
        assert!(!is_mounted(&shell, "/dev/no-such-device").unwrap());
    }

    #[test]
    fn module_names() {
        assert_eq!(module_file_name("/usr/src/sls/kmod/sls.ko"), "sls.ko");
        assert_eq!(module_file_name("slos.ko"), "slos.ko");
    }
}
