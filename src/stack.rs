//! Bringing the storage under test online and offline.
//!
//! Acquisition happens in a fixed order: stripe device, kernel modules, tunables, filesystem,
//! mount. Release is the mirror image and every step of it is allowed to fail, so that a stack
//! left half-built by a crashed or killed run can always be cleaned up by running `unload`.

use log::{info, warn};

use crate::{
    config::{BackendCaps, BenchmarkConfig},
    error::BenchError,
    shell::Execute,
    system::{self, SLOS_SYSCTL},
};

/// Permissions of the mount directory. Benchmarks run as different users.
pub const MOUNTDIR_MODE: u32 = 0o777;

/// Describes what is (or will be) set up for a configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    /// The device that is formatted, or the pool name for ZFS.
    pub device: String,
    /// The stripe device name, if the disks are striped.
    pub stripe: Option<String>,
    /// Module paths in load order (storage engine first).
    pub modules: Vec<String>,
    /// The ZFS dataset, if any.
    pub dataset: Option<String>,
    pub mountdir: String,
}

impl ResourceHandle {
    pub fn for_config(cfg: &BenchmarkConfig) -> Self {
        let caps = cfg.caps();

        let modules = if caps.contains(BackendCaps::MODULES) {
            cfg.slosmodule
                .iter()
                .chain(cfg.slsmodule.iter())
                .cloned()
                .collect()
        } else {
            vec![]
        };

        ResourceHandle {
            device: cfg.backing_device(),
            stripe: if cfg.is_striped() {
                Some(cfg.stripename.clone())
            } else {
                None
            },
            modules,
            dataset: if caps.contains(BackendCaps::POOL) {
                Some(cfg.dataset())
            } else {
                None
            },
            mountdir: cfg.mountdir.clone(),
        }
    }
}

/// The storage stack of one configuration.
pub struct ResourceStack<'s, E: Execute> {
    shell: &'s E,
    cfg: &'s BenchmarkConfig,
}

impl<'s, E: Execute> ResourceStack<'s, E> {
    pub fn new(shell: &'s E, cfg: &'s BenchmarkConfig) -> Self {
        ResourceStack { shell, cfg }
    }

    /// Returns true if the backing device of this configuration is already set up. This is the
    /// only "loaded" state there is: it lives in the OS, not in this process.
    pub fn is_loaded(&self) -> Result<bool, failure::Error> {
        let device = self.cfg.backing_device();

        if self.cfg.caps().contains(BackendCaps::POOL) {
            system::pool_exists(self.shell, &device)
        } else if self.cfg.is_striped() {
            Ok(self.shell.exists(&device))
        } else {
            // A lone disk always exists, so look for it in the mount table instead.
            system::is_mounted(self.shell, &device)
        }
    }

    /// Fails with `BenchError::AlreadyLoaded` if the stack is already set up.
    pub fn ensure_unloaded(&self) -> Result<(), failure::Error> {
        if self.is_loaded()? {
            Err(BenchError::AlreadyLoaded {
                device: self.cfg.backing_device(),
            })?;
        }
        Ok(())
    }

    /// Set everything up. If any step fails, whatever this call set up is released again before
    /// the error is returned. Resources that were already there are left alone.
    pub fn acquire(&self) -> Result<ResourceHandle, failure::Error> {
        let handle = ResourceHandle::for_config(self.cfg);

        info!("Acquiring {} stack on {}", self.cfg.backend, handle.device);

        let mut progress = Progress::default();
        if let Err(err) = self.try_acquire(&handle, &mut progress) {
            warn!("Setting up the {} stack failed, rolling back: {}", self.cfg.backend, err);
            if let Err(release_err) = self.roll_back(&handle, &progress) {
                warn!("Rollback failed: {}", release_err);
            }
            return Err(err);
        }

        Ok(handle)
    }

    fn try_acquire(
        &self,
        handle: &ResourceHandle,
        progress: &mut Progress,
    ) -> Result<(), failure::Error> {
        if let Some(stripe) = &handle.stripe {
            self.stripe_init(stripe)?;
            progress.stripe = true;
        }

        for module in handle.modules.iter() {
            if !system::kldload(self.shell, module)? {
                failure::bail!("module {} is already loaded", module);
            }
            progress.modules.push(module.clone());
        }

        if self.cfg.caps().contains(BackendCaps::MODULES) {
            let checkpointtime = self
                .cfg
                .checkpointtime
                .ok_or(BenchError::MissingOption("checkpointtime"))?;
            system::sysctl_set(self.shell, SLOS_SYSCTL, "checkpointtime", checkpointtime)?;
        }

        // A pool exists as soon as formatting starts, even if a later step of it fails.
        progress.formatted = true;
        self.format(handle)?;

        self.mount(handle)?;
        progress.mounted = true;
        self.shell.set_mode(&handle.mountdir, MOUNTDIR_MODE)?;

        Ok(())
    }

    /// Undo the steps of a failed `acquire`, in reverse order.
    fn roll_back(
        &self,
        handle: &ResourceHandle,
        progress: &Progress,
    ) -> Result<(), failure::Error> {
        if handle.dataset.is_some() {
            if progress.formatted {
                self.release_storage(handle)?;
            }
        } else if progress.mounted {
            self.release_storage(handle)?;
        }

        self.release_modules(&progress.modules)?;

        if let (Some(stripe), true) = (&handle.stripe, progress.stripe) {
            self.release_stripe(stripe)?;
        }

        Ok(())
    }

    /// Create the stripe device, destroying any stale one first. If creation fails, destroy and
    /// try once more before giving up.
    fn stripe_init(&self, name: &str) -> Result<(), failure::Error> {
        let destroy = argv!("gstripe", "destroy", name).allow_error();
        let create = argv!("gstripe", "create", "-s", self.cfg.stripe, "-v", name)
            .args(self.cfg.disks.iter().cloned())
            .allow_error();

        self.shell.run(destroy.clone())?;
        if self.shell.run(create.clone())?.success() {
            return Ok(());
        }

        warn!("Creating stripe {} failed, retrying", name);
        self.shell.run(destroy)?;
        let out = self.shell.run(create.clone())?;
        if !out.success() {
            Err(BenchError::CommandFailed {
                command: create.to_string(),
                status: out.status,
            })?;
        }

        Ok(())
    }

    fn format(&self, handle: &ResourceHandle) -> Result<(), failure::Error> {
        let cfg = self.cfg;
        let caps = cfg.caps();

        if caps.contains(BackendCaps::MODULES) {
            let newfs = cfg.newfs.as_deref().ok_or(BenchError::MissingOption("newfs"))?;
            self.shell.run(argv!(newfs, &handle.device))?;
        } else if caps.contains(BackendCaps::POOL) {
            let pool = &handle.device;
            self.shell
                .run(argv!("zpool", "create", pool).args(cfg.disks.iter().cloned()))?;

            if cfg.compress {
                self.shell.run(argv!("zfs", "set", "compression=lz4", pool))?;
            }
            let checksum = if cfg.checksum { "on" } else { "off" };
            self.shell
                .run(argv!("zfs", "set", format!("checksum={}", checksum), pool))?;
            self.shell
                .run(argv!("zfs", "set", format!("recordsize={}", cfg.stripe), pool))?;

            let dataset = handle
                .dataset
                .as_deref()
                .ok_or(BenchError::InvalidBackend {
                    backend: cfg.backend.to_string(),
                    operation: "dataset creation",
                })?;
            self.shell.run(argv!("zfs", "create", dataset))?;
        } else {
            self.shell.run(argv!(
                "newfs",
                "-j",
                "-S",
                4096,
                "-b",
                cfg.stripe,
                &handle.device
            ))?;
        }

        Ok(())
    }

    fn mount(&self, handle: &ResourceHandle) -> Result<(), failure::Error> {
        let caps = self.cfg.caps();

        if caps.contains(BackendCaps::POOL) {
            let dataset = handle.dataset.as_deref().unwrap_or_default();
            self.shell.run(argv!(
                "zfs",
                "set",
                format!("mountpoint={}", handle.mountdir),
                dataset
            ))?;
        } else if caps.contains(BackendCaps::MODULES) {
            self.shell.run(argv!(
                "mount",
                "-t",
                "slsfs",
                &handle.device,
                &handle.mountdir
            ))?;
        } else {
            self.shell
                .run(argv!("mount", &handle.device, &handle.mountdir))?;
        }

        Ok(())
    }

    /// Tear everything down in reverse order. Every step may fail (the resource may never have
    /// been set up); only a tool that cannot be started at all is an error.
    pub fn release(&self, handle: &ResourceHandle) -> Result<(), failure::Error> {
        info!("Releasing {} stack on {}", self.cfg.backend, handle.device);

        self.release_storage(handle)?;
        self.release_modules(&handle.modules)?;
        if let Some(stripe) = &handle.stripe {
            self.release_stripe(stripe)?;
        }

        Ok(())
    }

    /// Unmount the filesystem, or destroy the dataset and its pool.
    fn release_storage(&self, handle: &ResourceHandle) -> Result<(), failure::Error> {
        if let Some(dataset) = &handle.dataset {
            self.shell
                .run(argv!("zfs", "destroy", "-r", dataset).allow_error())?;
            self.shell
                .run(argv!("zpool", "destroy", &handle.device).allow_error())?;
        } else {
            self.shell
                .run(argv!("umount", &handle.mountdir).allow_error())?;
        }
        Ok(())
    }

    fn release_modules(&self, modules: &[String]) -> Result<(), failure::Error> {
        for module in modules.iter().rev() {
            system::kldunload(self.shell, &system::module_file_name(module))?;
        }
        Ok(())
    }

    fn release_stripe(&self, stripe: &str) -> Result<(), failure::Error> {
        self.shell
            .run(argv!("gstripe", "destroy", stripe).allow_error())?;
        Ok(())
    }
}

/// The steps of an `acquire` that completed.
#[derive(Debug, Default)]
struct Progress {
    stripe: bool,
    /// Modules this call loaded, in load order.
    modules: Vec<String>,
    formatted: bool,
    mounted: bool,
}
