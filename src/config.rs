//! The resolved configuration of one invocation.
//!
//! Options come from the command line and, for anything not given there, from a JSON config file
//! whose keys are the long option names (e.g. `{"disks": ["da1", "da2"], "type": "slos"}`).

use std::str::FromStr;

use bitflags::bitflags;

use clap::ArgMatches;

use failure::ResultExt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BenchError;

/// Config files tried (in order) when `-c` is not given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["benchmarks/sls.json", "sls.json"];

/// Stripe device name used when none is configured.
pub const DEFAULT_STRIPENAME: &str = "st0";

/// The storage technology under test.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The checkpoint-aware object store, formatted with its own `newfs`.
    Slos,
    /// ZFS. Pools and datasets instead of stripes and mounts.
    Zfs,
    /// FFS with journaling.
    Ffs,
    /// Checkpoints go to memory; storage is still the SLOS.
    Memory,
}

bitflags! {
    /// What a backend needs and supports.
    pub struct BackendCaps: u32 {
        /// Several disks are concatenated with a stripe device.
        const STRIPING = 1;
        /// The storage and checkpoint kernel modules must be loaded.
        const MODULES = 1 << 1;
        /// Processes can be checkpointed onto the backend.
        const CHECKPOINT = 1 << 2;
        /// The number of completed checkpoints can be read off the device.
        const SNAPSHOT_COUNTER = 1 << 3;
        /// Storage is a pool with datasets.
        const POOL = 1 << 4;
    }
}

impl Backend {
    pub const ALL: &'static [&'static str] = &["slos", "zfs", "ffs", "memory"];

    pub fn caps(self) -> BackendCaps {
        match self {
            Backend::Slos => {
                BackendCaps::STRIPING
                    | BackendCaps::MODULES
                    | BackendCaps::CHECKPOINT
                    | BackendCaps::SNAPSHOT_COUNTER
            }
            Backend::Memory => {
                BackendCaps::STRIPING | BackendCaps::MODULES | BackendCaps::CHECKPOINT
            }
            Backend::Ffs => BackendCaps::STRIPING,
            Backend::Zfs => BackendCaps::POOL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Slos => "slos",
            Backend::Zfs => "zfs",
            Backend::Ffs => "ffs",
            Backend::Memory => "memory",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Backend {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slos" => Ok(Backend::Slos),
            "zfs" => Ok(Backend::Zfs),
            "ffs" => Ok(Backend::Ffs),
            "memory" => Ok(Backend::Memory),
            other => Err(BenchError::InvalidConfig(format!(
                "unknown backend `{}` (expected one of {})",
                other,
                Backend::ALL.join(", ")
            ))),
        }
    }
}

/// Settings for checkpointing processes with `slsctl`.
#[derive(Clone, Debug, Serialize)]
pub struct CheckpointConfig {
    /// Path to the `slsctl` tool.
    pub slsctl: Option<String>,
    /// The partition OID.
    pub oid: Option<String>,
    /// Checkpoint period in ms. 0 means processes are not checkpointed at all.
    pub period: u64,
    /// Delta checkpointing.
    pub delta: bool,
    /// Checkpoint all descendants of the attached processes.
    pub recursive: bool,
}

/// Paths to the tools used around a workload run.
#[derive(Clone, Debug, Serialize)]
pub struct ToolPaths {
    pub filebench: String,
    /// Prints the number of completed checkpoints of a SLOS device.
    pub fsdb: String,
    /// Run on the captured output of a workload.
    pub postprocess: String,
}

/// Where the load generators of the application benchmarks run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RemoteConfig {
    pub benchaddr: Option<String>,
    pub benchport: Option<u16>,
    pub sshaddr: Option<String>,
    pub sshport: Option<u16>,
    pub sshkey: Option<String>,
    pub user: Option<String>,
}

impl RemoteConfig {
    /// The server address and port the load generator connects to.
    pub fn bench_endpoint(&self) -> Result<(&str, u16), BenchError> {
        let addr = self
            .benchaddr
            .as_deref()
            .ok_or(BenchError::MissingOption("benchaddr"))?;
        let port = self.benchport.ok_or(BenchError::MissingOption("benchport"))?;
        Ok((addr, port))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BenchmarkConfig {
    pub backend: Backend,
    pub disks: Vec<String>,
    /// Stripe size in bytes (also the block size of FFS and the record size of ZFS).
    pub stripe: u64,
    pub stripename: String,
    pub mountdir: String,

    pub slsmodule: Option<String>,
    pub slosmodule: Option<String>,
    pub newfs: Option<String>,
    /// Milliseconds between SLOS checkpoints.
    pub checkpointtime: Option<u64>,
    pub checksum: bool,
    pub compress: bool,

    pub withgstat: bool,
    pub nounload: bool,
    pub runs: usize,

    pub checkpoint: CheckpointConfig,
    pub tools: ToolPaths,
    pub remote: RemoteConfig,
}

impl BenchmarkConfig {
    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, failure::Error> {
        let backend = settings
            .string("type")
            .ok_or(BenchError::MissingOption("type"))?
            .parse::<Backend>()?;

        let cfg = BenchmarkConfig {
            backend,
            disks: settings.list("disks"),
            stripe: settings
                .parse::<u64>("stripe")?
                .ok_or(BenchError::MissingOption("stripe"))?,
            stripename: settings
                .string("stripename")
                .unwrap_or_else(|| DEFAULT_STRIPENAME.into()),
            mountdir: settings
                .string("mountdir")
                .ok_or(BenchError::MissingOption("mountdir"))?,

            slsmodule: settings.string("slsmodule"),
            slosmodule: settings.string("slosmodule"),
            newfs: settings.string("newfs"),
            checkpointtime: settings.parse::<u64>("checkpointtime")?,
            checksum: settings.flag("checksum")?,
            compress: settings.flag("compress")?,

            withgstat: settings.flag("withgstat")?,
            nounload: settings.flag("nounload")?,
            runs: settings.parse::<usize>("runs")?.unwrap_or(1),

            checkpoint: CheckpointConfig {
                slsctl: settings.string("slsctl"),
                oid: settings.string("oid"),
                period: settings.parse::<u64>("slsperiod")?.unwrap_or(0),
                delta: settings.bool_value("delta", false)?,
                recursive: settings.bool_value("recursive", true)?,
            },
            tools: ToolPaths {
                filebench: settings
                    .string("filebench")
                    .unwrap_or_else(|| "filebench".into()),
                fsdb: settings
                    .string("fsdb")
                    .unwrap_or_else(|| "../tools/fsdb/fsdb".into()),
                postprocess: settings
                    .string("postprocess")
                    .unwrap_or_else(|| "fb-post.sh".into()),
            },
            remote: RemoteConfig {
                benchaddr: settings.string("benchaddr"),
                benchport: settings.parse::<u16>("benchport")?,
                sshaddr: settings.string("sshaddr"),
                sshport: settings.parse::<u16>("sshport")?,
                sshkey: settings.string("sshkey"),
                user: settings.string("user"),
            },
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Check the invariants every routine relies on.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.disks.is_empty() {
            return Err(BenchError::MissingOption("disks"));
        }
        if self.disks.iter().any(|d| d.trim().is_empty()) {
            return Err(BenchError::InvalidConfig("empty disk name".into()));
        }
        if !self.mountdir.starts_with('/') {
            return Err(BenchError::InvalidConfig(format!(
                "mount directory `{}` is not absolute",
                self.mountdir
            )));
        }
        if self.stripe == 0 {
            return Err(BenchError::InvalidConfig("stripe size must be positive".into()));
        }
        if self.stripename.is_empty() {
            return Err(BenchError::InvalidConfig("empty stripe name".into()));
        }
        if self.runs == 0 {
            return Err(BenchError::InvalidConfig("--runs must be at least 1".into()));
        }

        if self.caps().contains(BackendCaps::MODULES) {
            if self.slosmodule.is_none() {
                return Err(BenchError::MissingOption("slosmodule"));
            }
            if self.slsmodule.is_none() {
                return Err(BenchError::MissingOption("slsmodule"));
            }
            if self.newfs.is_none() {
                return Err(BenchError::MissingOption("newfs"));
            }
            if self.checkpointtime.is_none() {
                return Err(BenchError::MissingOption("checkpointtime"));
            }
        }

        Ok(())
    }

    pub fn caps(&self) -> BackendCaps {
        self.backend.caps()
    }

    /// True if the disks are concatenated into a stripe device before formatting.
    pub fn is_striped(&self) -> bool {
        self.caps().contains(BackendCaps::STRIPING) && self.disks.len() > 1
    }

    /// The device that gets formatted: the stripe, the single disk, or (for ZFS) the pool.
    pub fn backing_device(&self) -> String {
        if self.caps().contains(BackendCaps::POOL) {
            self.stripename.clone()
        } else if self.is_striped() {
            format!("/dev/stripe/{}", self.stripename)
        } else {
            disk_path(&self.disks[0])
        }
    }

    /// The GEOM name `gstat` filters on: the stripe, or the lone disk without its `/dev/` prefix.
    pub fn gstat_device(&self) -> String {
        if self.is_striped() || self.disks.is_empty() {
            self.stripename.clone()
        } else {
            let disk = disk_path(&self.disks[0]);
            disk.trim_start_matches("/dev/").to_owned()
        }
    }

    /// The ZFS dataset backing the mount directory.
    pub fn dataset(&self) -> String {
        format!("{}{}", self.stripename, self.mountdir)
    }

    /// A copy with a different SLOS checkpoint interval.
    pub fn with_checkpoint_time(&self, ms: u64) -> Self {
        let mut cfg = self.clone();
        cfg.checkpointtime = Some(ms);
        cfg
    }

    /// A copy with a different process checkpointing period.
    pub fn with_checkpoint_period(&self, ms: u64) -> Self {
        let mut cfg = self.clone();
        cfg.checkpoint.period = ms;
        cfg
    }

    /// A small valid configuration for unit tests.
    #[cfg(test)]
    pub fn example(backend: Backend, disks: &[&str]) -> Self {
        BenchmarkConfig {
            backend,
            disks: disks.iter().map(|d| d.to_string()).collect(),
            stripe: 65536,
            stripename: DEFAULT_STRIPENAME.into(),
            mountdir: "/testmnt".into(),
            slsmodule: Some("/sls/kmod/sls.ko".into()),
            slosmodule: Some("/sls/slos/slos.ko".into()),
            newfs: Some("/sls/tools/newfs_sls/newfs_sls".into()),
            checkpointtime: Some(1000),
            checksum: false,
            compress: false,
            withgstat: false,
            nounload: false,
            runs: 1,
            checkpoint: CheckpointConfig {
                slsctl: Some("/sls/tools/slsctl/slsctl".into()),
                oid: Some("1000".into()),
                period: 0,
                delta: false,
                recursive: true,
            },
            tools: ToolPaths {
                filebench: "filebench".into(),
                fsdb: "fsdb".into(),
                postprocess: "fb-post.sh".into(),
            },
            remote: RemoteConfig::default(),
        }
    }
}

/// `da0` becomes `/dev/da0`; absolute paths are kept.
pub fn disk_path(disk: &str) -> String {
    if disk.starts_with('/') {
        disk.to_owned()
    } else {
        format!("/dev/{}", disk)
    }
}

/// A merged view of the command line and the config file. Arguments are looked up by their long
/// name (`"mountdir"`); the clap argument of the same name in upper case (`MOUNTDIR`) wins over
/// the config file key, which wins over the argument's default value.
pub struct Settings<'a> {
    matches: &'a ArgMatches<'a>,
    file: Map<String, Value>,
    source: Option<String>,
}

impl<'a> Settings<'a> {
    /// Read the config file named by `-c`, or the first default config file that exists.
    pub fn load(matches: &'a ArgMatches<'a>) -> Result<Self, failure::Error> {
        let path = match matches.value_of("CONFIG") {
            Some(path) => Some(path.to_owned()),
            None => DEFAULT_CONFIG_FILES
                .iter()
                .find(|p| std::path::Path::new(p).is_file())
                .map(|p| p.to_string()),
        };

        let file = match &path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|_| format!("reading config file {}", path))?;
                Self::parse_file(&contents).with_context(|_| format!("parsing {}", path))?
            }
            None => Map::new(),
        };

        Ok(Settings {
            matches,
            file,
            source: path,
        })
    }

    fn parse_file(contents: &str) -> Result<Map<String, Value>, failure::Error> {
        match serde_json::from_str::<Value>(contents)? {
            Value::Object(map) => Ok(map),
            _ => {
                Err(BenchError::InvalidConfig("config file must hold a JSON object".into()).into())
            }
        }
    }

    /// For tests: settings with the given config file contents.
    #[cfg(test)]
    pub fn with_file_contents(
        matches: &'a ArgMatches<'a>,
        contents: &str,
    ) -> Result<Self, failure::Error> {
        Ok(Settings {
            matches,
            file: Self::parse_file(contents)?,
            source: None,
        })
    }

    /// The config file that was read, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn arg_name(key: &str) -> String {
        key.to_uppercase()
    }

    fn given_on_cli(&self, key: &str) -> bool {
        self.matches.occurrences_of(Self::arg_name(key)) > 0
    }

    fn file_string(&self, key: &str) -> Option<String> {
        match self.file.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn string(&self, key: &str) -> Option<String> {
        let arg = Self::arg_name(key);
        if self.given_on_cli(key) {
            self.matches.value_of(&arg).map(String::from)
        } else {
            self.file_string(key)
                .or_else(|| self.matches.value_of(&arg).map(String::from))
        }
    }

    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, BenchError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(s) => s
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| BenchError::InvalidConfig(format!("--{} {}: {}", key, s, e))),
            None => Ok(None),
        }
    }

    /// A switch: set if given on the command line or `true` in the config file.
    pub fn flag(&self, key: &str) -> Result<bool, BenchError> {
        if self.matches.is_present(Self::arg_name(key)) {
            return Ok(true);
        }
        match self.file.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => parse_bool(key, &other.to_string()),
        }
    }

    /// An option taking a boolean value (`--recursive false`).
    pub fn bool_value(&self, key: &str, default: bool) -> Result<bool, BenchError> {
        match self.file.get(key) {
            Some(Value::Bool(b)) if !self.given_on_cli(key) => Ok(*b),
            _ => match self.string(key) {
                Some(s) => parse_bool(key, &s),
                None => Ok(default),
            },
        }
    }

    /// A list option. Each value may itself be a comma-separated list.
    pub fn list(&self, key: &str) -> Vec<String> {
        let arg = Self::arg_name(key);
        let raw: Vec<String> = if self.given_on_cli(key) {
            self.matches
                .values_of(&arg)
                .map(|values| values.map(String::from).collect())
                .unwrap_or_default()
        } else {
            match self.file.get(key) {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
                Some(Value::String(s)) => vec![s.clone()],
                _ => vec![],
            }
        };

        raw.iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect()
    }
}

fn parse_bool(key: &str, s: &str) -> Result<bool, BenchError> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(BenchError::InvalidConfig(format!(
            "--{}: expected a boolean, got `{}`",
            key, other
        ))),
    }
}
