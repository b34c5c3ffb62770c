//! Checkpoint a web server (nginx or lighttpd) while `wrk` hammers it from another machine.

use clap::clap_app;

use console::style;

use log::warn;

use crate::{
    checkpoint::start_checkpointing,
    cli::{self, OutputKind},
    config::{BackendCaps, BenchmarkConfig, Settings},
    error::BenchError,
    remote::{self, LoadGenerator},
    sequencer::Sequencer,
    shell::{Execute, LocalShell},
    sweep::SweepPlan,
    system::{self, SLS_SYSCTL},
    templates::{self, TemplateVars},
};

/// The intervals of the `webbench` sweep. For each, the checkpoint period goes from the interval
/// to ten times the interval in steps of the interval.
pub const WEBBENCH_INTERVALS: &[i64] = &[10, 100];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Server {
    Nginx,
    Lighttpd,
}

impl Server {
    pub fn name(self) -> &'static str {
        match self {
            Server::Nginx => "nginx",
            Server::Lighttpd => "lighttpd",
        }
    }

    /// The flag that passes the configuration file.
    fn conf_flag(self) -> &'static str {
        match self {
            Server::Nginx => "-c",
            Server::Lighttpd => "-f",
        }
    }
}

impl std::str::FromStr for Server {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nginx" => Ok(Server::Nginx),
            "lighttpd" => Ok(Server::Lighttpd),
            other => Err(BenchError::InvalidConfig(format!("invalid server {}", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WebServerConfig {
    pub server: Server,
    /// Path to the server binary.
    pub binary: String,
    /// The server's own configuration directory, linked into the mount.
    pub confdir: String,
    /// Where the configuration templates live.
    pub templates: String,
    pub threads: usize,
    pub connections: usize,
    /// Duration of the `wrk` run in seconds.
    pub time: u64,
}

impl WebServerConfig {
    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, failure::Error> {
        let server = settings
            .string("server")
            .unwrap_or_else(|| "nginx".into())
            .parse::<Server>()?;

        let (binary, confdir) = match server {
            Server::Nginx => (
                settings
                    .string("nginx")
                    .unwrap_or_else(|| "/usr/local/sbin/nginx".into()),
                settings
                    .string("nginxconfdir")
                    .unwrap_or_else(|| "/usr/local/etc/nginx".into()),
            ),
            Server::Lighttpd => (
                settings
                    .string("lighttpd")
                    .unwrap_or_else(|| "/usr/local/sbin/lighttpd".into()),
                settings
                    .string("lighttpdconfdir")
                    .unwrap_or_else(|| "/usr/local/etc/lighttpd".into()),
            ),
        };

        Ok(WebServerConfig {
            server,
            binary,
            confdir,
            templates: settings
                .string("templates")
                .unwrap_or_else(|| "benchmarks".into()),
            threads: settings.parse::<usize>("threads")?.unwrap_or(10),
            connections: settings.parse::<usize>("connections")?.unwrap_or(50),
            time: settings.parse::<u64>("time")?.unwrap_or(10),
        })
    }
}

/// The options of both web server commands.
fn add_server_options<'a, 'b>(app: clap::App<'a, 'b>) -> clap::App<'a, 'b> {
    fn value<'a, 'b>(name: &'a str, long: &'b str, help: &'b str) -> clap::Arg<'a, 'b> {
        clap::Arg::with_name(name).long(long).takes_value(true).help(help)
    }

    let app = app
        .arg(
            value("SERVER", "server", "The web server to use.")
                .possible_values(&["nginx", "lighttpd"]),
        )
        .arg(value("NGINX", "nginx", "Location of nginx."))
        .arg(value("LIGHTTPD", "lighttpd", "Location of lighttpd."))
        .arg(value("NGINXCONFDIR", "nginxconfdir", "Location of the nginx config dir."))
        .arg(value(
            "LIGHTTPDCONFDIR",
            "lighttpdconfdir",
            "Location of the lighttpd config dir.",
        ))
        .arg(value("TEMPLATES", "templates", "Directory of the configuration templates."))
        .arg(
            value("THREADS", "threads", "Number of client threads.")
                .validator(cli::validator::is::<usize>),
        )
        .arg(
            value("CONNECTIONS", "connections", "Number of connections used by wrk.")
                .validator(cli::validator::is::<usize>),
        )
        .arg(
            value("TIME", "time", "Duration of the benchmark in seconds.")
                .validator(cli::validator::is::<u64>),
        );

    cli::add_output_option(cli::add_common_options(app), OutputKind::Directory)
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { webserver =>
        (about: "Run a web server under checkpointing and measure it with wrk.")
        (@setting DisableVersion)
    };

    add_server_options(app)
}

pub fn webbench_cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { webbench =>
        (about: "Run the web server benchmark over a sweep of checkpoint periods.")
        (@setting DisableVersion)
    };

    add_server_options(app)
}

/// The measurements of one `wrk` run, as CSV columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrkReport {
    pub header: Vec<&'static str>,
    pub values: Vec<String>,
}

impl WrkReport {
    pub fn csv(&self) -> String {
        format!("{}\n{}\n", self.header.join(","), self.values.join(","))
    }
}

/// The lines of a `wrk` report we keep, and the CSV columns each one contributes.
const WRK_COLUMNS: &[(&str, &[&str])] = &[
    ("Latency", &["lavg", "lstdev", "lmax", "lstdev-pm"]),
    ("Req/Sec", &["ravg", "rstdev", "rmax", "rstdev-pm"]),
    ("requests in", &["requests", "time", "read"]),
    ("Non-2xx", &["non2xx"]),
    ("Requests/sec", &["requestps"]),
    ("Transfer/sec", &["transferps"]),
];

/// The values of one report line that matched `pattern`.
fn wrk_values(pattern: &str, fields: &[&str]) -> Vec<String> {
    match pattern {
        "Latency" | "Req/Sec" => fields.iter().skip(1).map(|f| f.to_string()).collect(),
        // `10000 requests in 10.00s, 8.00MB read`
        "requests in" => {
            let field = |i: usize| fields.get(i).copied().unwrap_or("");
            vec![
                field(0).to_string(),
                field(3).trim_end_matches(',').to_string(),
                field(4).to_string(),
            ]
        }
        _ => fields.last().map(|f| vec![f.to_string()]).unwrap_or_default(),
    }
}

/// Pick the interesting numbers out of a `wrk` report.
pub fn parse_wrk_output(output: &str) -> WrkReport {
    let header = WRK_COLUMNS
        .iter()
        .flat_map(|(_, columns)| columns.iter().copied())
        .collect();

    let mut values = vec![];
    for line in output.lines() {
        for (pattern, _) in WRK_COLUMNS.iter() {
            if line.contains(pattern) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                values.extend(wrk_values(pattern, &fields));
            }
        }
    }

    WrkReport { header, values }
}

/// Load, start the server, checkpoint it, benchmark it with `wrk`, stop it and unload.
pub fn run_webserver<E: Execute>(
    shell: &E,
    client: &dyn LoadGenerator,
    cfg: &BenchmarkConfig,
    web: &WebServerConfig,
    outdir: Option<&str>,
) -> Result<WrkReport, failure::Error> {
    let seq = Sequencer::new(shell, cfg.clone());
    seq.load()?;

    let result = benchmark_server(shell, client, cfg, web, outdir);
    if let Err(err) = &result {
        warn!("Web server benchmark failed: {}", err);
        shell.run(argv!("pkill", "-9", web.server.name()).allow_error())?;
    }

    seq.unload()?;
    result
}

fn benchmark_server<E: Execute>(
    shell: &E,
    client: &dyn LoadGenerator,
    cfg: &BenchmarkConfig,
    web: &WebServerConfig,
    outdir: Option<&str>,
) -> Result<WrkReport, failure::Error> {
    let (addr, port) = cfg.remote.bench_endpoint()?;
    let name = web.server.name();

    // The server's config directory is linked into the mount so that the server can be started
    // from there.
    shell.run(argv!("ln", "-s", &web.confdir, dir!(&cfg.mountdir, name)))?;
    templates::make_slsdirs(shell, &cfg.mountdir, name)?;

    let conf = dir!(&cfg.mountdir, name, format!("{}.conf", name));
    let vars = TemplateVars {
        mountdir: &cfg.mountdir,
        addr,
        port,
    };
    templates::generate_conf(
        shell,
        &vars,
        &dir!(&web.templates, format!("{}.conf", name)),
        &conf,
    )?;

    shell.run(argv!(&web.binary, web.server.conf_flag(), &conf).cwd(&cfg.mountdir))?;
    let pid = system::pid_main(shell, name)?;

    if cfg.caps().contains(BackendCaps::CHECKPOINT) {
        start_checkpointing(shell, cfg, &[pid])?;
    }

    let wrk = format!(
        "wrk -d {} -t {} -c {} http://{}:{}",
        web.time, web.threads, web.connections, addr, port
    );
    let report = parse_wrk_output(&client.run(&wrk)?);
    print!("{}", report.csv());

    if let Some(outdir) = outdir {
        let file = dir!(outdir, format!("{}-{}.csv", name, cfg.checkpoint.period));
        shell.write_file(&file, &report.csv())?;
    }

    shell.run(argv!("pkill", "-9", name))?;

    let period = cfg.checkpoint.period;
    if cfg.caps().contains(BackendCaps::CHECKPOINT) && period > 0 {
        let done = system::sysctl_get(shell, SLS_SYSCTL, "ckpt_done")?;
        println!(
            "{} checkpoints (expected around {})",
            done,
            expected_checkpoints(period, web.time)
        );
    }

    Ok(report)
}

/// How many checkpoints a period of `period` ms fits into `seconds`.
fn expected_checkpoints(period: u64, seconds: u64) -> u64 {
    seconds.saturating_mul(1000) / period
}

/// `run_webserver` for every checkpoint period of the `webbench` sweep.
pub fn run_webbench<E: Execute>(
    shell: &E,
    client: &dyn LoadGenerator,
    cfg: &BenchmarkConfig,
    web: &WebServerConfig,
    outdir: Option<&str>,
) -> Result<Vec<WrkReport>, failure::Error> {
    let mut reports = vec![];
    for &interval in WEBBENCH_INTERVALS {
        for period in SweepPlan::interval(interval, interval * 10 + 1, interval)? {
            println!(
                "{}",
                style(format!(
                    "======= {} with period {} ms =======",
                    web.server.name(),
                    period
                ))
                .bold()
            );
            let cfg = cfg.with_checkpoint_period(period as u64);
            reports.push(run_webserver(shell, client, &cfg, web, outdir)?);
        }
    }
    Ok(reports)
}

fn resolve(
    sub_m: &clap::ArgMatches<'_>,
    shell: &LocalShell,
) -> Result<(BenchmarkConfig, WebServerConfig, Box<dyn LoadGenerator>), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let web = WebServerConfig::from_settings(&settings)?;
    let client = remote::generator(&cfg.remote, shell.is_dry_run())?;
    Ok((cfg, web, client))
}

pub fn run(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let (cfg, web, client) = resolve(sub_m, shell)?;
    run_webserver(shell, client.as_ref(), &cfg, &web, sub_m.value_of("OUTPUT"))?;
    Ok(())
}

pub fn run_bench(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let (cfg, web, client) = resolve(sub_m, shell)?;
    run_webbench(shell, client.as_ref(), &cfg, &web, sub_m.value_of("OUTPUT"))?;
    Ok(())
}
