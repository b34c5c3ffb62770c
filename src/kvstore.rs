//! Checkpoint a key-value store (redis or memcached) while YCSB loads and queries it.

use std::time::Duration;

use clap::clap_app;

use log::{info, warn};

use crate::{
    checkpoint::start_checkpointing,
    cli,
    config::{BackendCaps, BenchmarkConfig, Settings},
    error::BenchError,
    remote::{self, LoadGenerator},
    sequencer::Sequencer,
    shell::{Execute, LocalShell},
    system,
    templates::{self, TemplateVars},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KvStore {
    Redis,
    Memcached,
}

impl KvStore {
    /// The name YCSB knows the store by.
    pub fn name(self) -> &'static str {
        match self {
            KvStore::Redis => "redis",
            KvStore::Memcached => "memcached",
        }
    }

    /// The name of the server process.
    pub fn process_name(self) -> &'static str {
        match self {
            KvStore::Redis => "redis-server",
            KvStore::Memcached => "memcached",
        }
    }
}

impl std::str::FromStr for KvStore {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(KvStore::Redis),
            "memcached" => Ok(KvStore::Memcached),
            other => Err(BenchError::InvalidConfig(format!("invalid kvstore {}", other))),
        }
    }
}

/// The two phases of a YCSB benchmark.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum YcsbPhase {
    Load,
    Run,
}

impl YcsbPhase {
    fn name(self) -> &'static str {
        match self {
            YcsbPhase::Load => "load",
            YcsbPhase::Run => "run",
        }
    }
}

#[derive(Clone, Debug)]
pub struct KvStoreConfig {
    pub store: KvStore,
    pub redis: String,
    pub memcached: String,
    pub memcacheduser: String,
    /// The YCSB installation on the load generator.
    pub ycsb: String,
    pub recordcount: u64,
    pub workload: String,
    pub templates: String,
    /// How long the server gets to start up before the load phase.
    pub warmup: Duration,
    /// How long to wait after killing the server before unloading.
    pub settle: Duration,
}

impl KvStoreConfig {
    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, failure::Error> {
        Ok(KvStoreConfig {
            store: settings
                .string("kvstore")
                .unwrap_or_else(|| "redis".into())
                .parse()?,
            redis: settings
                .string("redis")
                .unwrap_or_else(|| "/usr/local/bin/redis-server".into()),
            memcached: settings
                .string("memcached")
                .unwrap_or_else(|| "/usr/local/bin/memcached".into()),
            memcacheduser: settings
                .string("memcacheduser")
                .unwrap_or_else(|| "root".into()),
            ycsb: settings
                .string("ycsb")
                .unwrap_or_else(|| "/home/etsal/ycsb".into()),
            recordcount: settings.parse::<u64>("recordcount")?.unwrap_or(100_000),
            workload: settings
                .string("workload")
                .unwrap_or_else(|| "workloada".into()),
            templates: settings
                .string("templates")
                .unwrap_or_else(|| "benchmarks".into()),
            warmup: Duration::from_secs(settings.parse::<u64>("warmup")?.unwrap_or(10)),
            settle: Duration::from_secs(settings.parse::<u64>("settle")?.unwrap_or(3)),
        })
    }

    /// The YCSB command line for `phase`, run on the load generator.
    pub fn ycsb_command(&self, phase: YcsbPhase, addr: &str, port: u16) -> String {
        let db = self.store.name();
        format!(
            "{} {} basic -P {} -p {}.host={} -p {}.port={} -p recordcount={}",
            dir!(&self.ycsb, "bin/ycsb.sh"),
            phase.name(),
            dir!(&self.ycsb, "workloads", &self.workload),
            db,
            addr,
            db,
            port,
            self.recordcount
        )
    }
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { kvstore =>
        (about: "Run a key-value store under checkpointing and measure it with YCSB.")
        (@setting DisableVersion)
        (@arg KVSTORE: --kvstore +takes_value
         "The key-value store to benchmark (redis or memcached).")
        (@arg REDIS: --redis +takes_value "Location of the redis server.")
        (@arg MEMCACHED: --memcached +takes_value "Location of the memcached server.")
        (@arg MEMCACHEDUSER: --memcacheduser +takes_value "User memcached runs as.")
        (@arg YCSB: --ycsb +takes_value "Location of YCSB on the load generator.")
        (@arg RECORDCOUNT: --recordcount +takes_value {cli::validator::is::<u64>}
         "Number of records loaded into the store.")
        (@arg WORKLOAD: --workload +takes_value "The YCSB workload profile.")
        (@arg TEMPLATES: --templates +takes_value "Directory of the configuration templates.")
        (@arg WARMUP: --warmup +takes_value {cli::validator::is::<u64>}
         "Seconds to let the server start before loading it.")
        (@arg SETTLE: --settle +takes_value {cli::validator::is::<u64>}
         "Seconds to wait after killing the server.")
    };

    cli::add_common_options(app)
}

/// Start the store from the mount directory and return its main PID.
fn start_store<E: Execute>(
    shell: &E,
    cfg: &BenchmarkConfig,
    kv: &KvStoreConfig,
    addr: &str,
    port: u16,
) -> Result<u32, failure::Error> {
    let name = kv.store.name();

    match kv.store {
        KvStore::Redis => {
            let conf = dir!(&cfg.mountdir, "redis.conf");
            let vars = TemplateVars {
                mountdir: &cfg.mountdir,
                addr,
                port,
            };
            templates::generate_conf(shell, &vars, &dir!(&kv.templates, "redis.conf"), &conf)?;
            templates::make_slsdirs(shell, &cfg.mountdir, name)?;
            shell.run(argv!(&kv.redis, &conf).cwd(&cfg.mountdir))?;
        }
        KvStore::Memcached => {
            templates::make_slsdirs(shell, &cfg.mountdir, name)?;
            shell.run(
                argv!(
                    &kv.memcached,
                    "-u",
                    &kv.memcacheduser,
                    "-l",
                    addr,
                    "-p",
                    port,
                    "-P",
                    dir!(&cfg.mountdir, "memcached.pid"),
                    "-d"
                )
                .cwd(&cfg.mountdir),
            )?;
        }
    }

    system::pid_main(shell, kv.store.process_name())
}

/// Load, start the store, warm it up with the YCSB load phase, checkpoint it, run the YCSB run
/// phase, kill it and unload. Returns the output of the run phase.
pub fn run_kvstore<E: Execute>(
    shell: &E,
    client: &dyn LoadGenerator,
    cfg: &BenchmarkConfig,
    kv: &KvStoreConfig,
) -> Result<String, failure::Error> {
    let seq = Sequencer::new(shell, cfg.clone());
    seq.load()?;

    let result = benchmark_store(shell, client, cfg, kv);
    if let Err(err) = &result {
        warn!("Key-value store benchmark failed: {}", err);
        shell.run(argv!("pkill", "-9", kv.store.process_name()).allow_error())?;
    }

    seq.unload()?;
    result
}

fn benchmark_store<E: Execute>(
    shell: &E,
    client: &dyn LoadGenerator,
    cfg: &BenchmarkConfig,
    kv: &KvStoreConfig,
) -> Result<String, failure::Error> {
    let (addr, port) = cfg.remote.bench_endpoint()?;

    let pid = start_store(shell, cfg, kv, addr, port)?;
    info!("{} running as pid {}", kv.store.process_name(), pid);

    std::thread::sleep(kv.warmup);

    client.run(&kv.ycsb_command(YcsbPhase::Load, addr, port))?;

    if cfg.caps().contains(BackendCaps::CHECKPOINT) {
        start_checkpointing(shell, cfg, &[pid])?;
    }

    let output = client.run(&kv.ycsb_command(YcsbPhase::Run, addr, port))?;
    print!("{}", output);

    shell.run(argv!("kill", "-9", pid))?;

    std::thread::sleep(kv.settle);

    Ok(output)
}

pub fn run(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let kv = KvStoreConfig::from_settings(&settings)?;
    let client = remote::generator(&cfg.remote, shell.is_dry_run())?;

    run_kvstore(shell, client.as_ref(), &cfg, &kv)?;

    Ok(())
}
