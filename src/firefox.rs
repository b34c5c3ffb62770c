//! Checkpoint a headless browser running a JavaScript benchmark.
//!
//! The benchmark pages are served by an embedded file server on a random local port. When the
//! driver page is done it navigates to a results page, whose query string the server captures.

use std::ops::Range;
use std::time::Duration;

use clap::clap_app;

use log::{info, warn};

use rand::Rng;

use serde_json::Value;

use crate::{
    checkpoint::start_checkpointing,
    cli,
    config::{BackendCaps, BenchmarkConfig, Settings},
    error::BenchError,
    httpserve::ServerTask,
    sequencer::Sequencer,
    shell::{Execute, LocalShell},
};

/// Sockets linger after a run, so every run picks a fresh port from this range.
pub const PORT_RANGE: Range<u16> = 8000..16000;

/// The browser and the file server talk over the loopback interface.
pub const SERVER_ADDR: &str = "localhost";

#[derive(Clone, Debug)]
pub struct FirefoxConfig {
    pub firefox: String,
    /// Path of the driver page on the file server.
    pub driver: String,
    /// The directory the file server serves.
    pub hosted: String,
    /// How long the browser gets to start before it is checkpointed.
    pub warmup: Duration,
    /// How long to wait for the results. `None` does not wait at all (dry runs).
    pub timeout: Option<Duration>,
}

impl FirefoxConfig {
    pub fn from_settings(settings: &Settings<'_>) -> Result<Self, failure::Error> {
        Ok(FirefoxConfig {
            firefox: settings
                .string("firefox")
                .unwrap_or_else(|| "/usr/local/bin/firefox".into()),
            driver: settings
                .string("firefoxdriver")
                .unwrap_or_else(|| "/kraken-1.1/driver.html".into()),
            hosted: settings
                .string("hosted")
                .unwrap_or_else(|| "/root/sls-bench/firefox/hosted".into()),
            warmup: Duration::from_secs(settings.parse::<u64>("warmup")?.unwrap_or(3)),
            timeout: Some(Duration::from_secs(
                settings.parse::<u64>("timeout")?.unwrap_or(10000),
            )),
        })
    }

    fn url(&self, port: u16) -> String {
        format!(
            "http://{}:{}/{}",
            SERVER_ADDR,
            port,
            self.driver.trim_start_matches('/')
        )
    }
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { firefox =>
        (about: "Run the browser JavaScript benchmark under checkpointing.")
        (@setting DisableVersion)
        (@arg FIREFOX: --firefox +takes_value "Location of the Firefox binary.")
        (@arg FIREFOXDRIVER: --firefoxdriver +takes_value "URL path of the benchmark driver page.")
        (@arg HOSTED: --hosted +takes_value "Directory with the benchmark pages.")
        (@arg WARMUP: --warmup +takes_value {cli::validator::is::<u64>}
         "Seconds to let the browser start before checkpointing it.")
        (@arg TIMEOUT: --timeout +takes_value {cli::validator::is::<u64>}
         "Seconds to wait for the benchmark results.")
    };

    cli::add_common_options(app)
}

/// The total runtime in ms of a results object: the sum of every series except the `v` (version)
/// entry. Values may be numbers or numeric strings.
pub fn sum_runtime(results: &str) -> Result<i64, failure::Error> {
    let results: serde_json::Map<String, Value> = serde_json::from_str(results)
        .map_err(|e| BenchError::InvalidConfig(format!("malformed benchmark results: {}", e)))?;

    let mut runtime = 0;
    for (key, series) in results.iter().filter(|(key, _)| key.as_str() != "v") {
        let values = match series {
            Value::Array(values) => values.as_slice(),
            other => std::slice::from_ref(other),
        };

        for value in values {
            runtime += match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| failure::format_err!("result {} has non-integer value {}", key, value))?;
        }
    }

    Ok(runtime)
}

/// Load, serve the benchmark, run the browser against it under checkpointing, collect the results
/// and unload. Returns the total runtime in ms, if results were awaited.
pub fn run_firefox<E: Execute>(
    shell: &E,
    cfg: &BenchmarkConfig,
    ff: &FirefoxConfig,
) -> Result<Option<i64>, failure::Error> {
    let seq = Sequencer::new(shell, cfg.clone());
    seq.load()?;

    let port = rand::thread_rng().gen_range(PORT_RANGE);
    let result = ServerTask::start(&ff.hosted, SERVER_ADDR, port)
        .and_then(|server| {
            let runtime = benchmark_browser(shell, cfg, ff, &server, port);
            server.shutdown()?;
            runtime
        });

    if let Err(err) = &result {
        warn!("Browser benchmark failed: {}", err);
    }

    seq.unload()?;
    result
}

/// Run the browser against `server`, which listens on `port`.
fn benchmark_browser<E: Execute>(
    shell: &E,
    cfg: &BenchmarkConfig,
    ff: &FirefoxConfig,
    server: &ServerTask,
    port: u16,
) -> Result<Option<i64>, failure::Error> {
    let browser = shell.spawn(argv!(&ff.firefox, "-headless", ff.url(port)).cwd(&cfg.mountdir))?;
    info!("Browser running as pid {}", browser.pid());

    std::thread::sleep(ff.warmup);

    if cfg.caps().contains(BackendCaps::CHECKPOINT) {
        start_checkpointing(shell, cfg, &[browser.pid()])?;
    }

    let runtime = match ff.timeout {
        Some(timeout) => {
            let runtime = sum_runtime(&server.wait_for_results(timeout)?)?;
            println!("Time: {} ms", runtime);
            Some(runtime)
        }
        None => None,
    };

    browser.stop()?;

    Ok(runtime)
}

pub fn run(sub_m: &clap::ArgMatches<'_>, shell: &LocalShell) -> Result<(), failure::Error> {
    let settings = Settings::load(sub_m)?;
    let cfg = BenchmarkConfig::from_settings(&settings)?;
    let mut ff = FirefoxConfig::from_settings(&settings)?;

    // Nothing will ever report results.
    if shell.is_dry_run() {
        ff.timeout = None;
    }

    run_firefox(shell, &cfg, &ff)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::shell::testing::FakeShell;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    #[test]
    fn runtime_skips_the_version() {
        let results = r#"{"v": ["kraken-1.1"], "ai-astar": ["100", "102"], "audio-fft": [40, "41"]}"#;
        assert_eq!(sum_runtime(results).unwrap(), 283);

        assert_eq!(sum_runtime(r#"{"v": "1.1"}"#).unwrap(), 0);
        assert!(sum_runtime(r#"{"ai-astar": ["fast"]}"#).is_err());
        assert!(sum_runtime("[1, 2]").is_err());
    }

    #[test]
    fn driver_url() {
        let ff = FirefoxConfig {
            firefox: "/usr/local/bin/firefox".into(),
            driver: "/kraken-1.1/driver.html".into(),
            hosted: "/hosted".into(),
            warmup: Duration::from_secs(0),
            timeout: None,
        };
        assert_eq!(ff.url(8123), "http://localhost:8123/kraken-1.1/driver.html");
    }

    #[test]
    fn browser_is_checkpointed_and_results_collected() {
        let hosted = tempfile::tempdir().unwrap();
        let server = ServerTask::start(hosted.path(), "127.0.0.1", 0).unwrap();

        // The results arrive before anyone waits for them; they are queued.
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        write!(
            stream,
            "GET /results.html?%7B%22v%22%3A%5B%221%22%5D%2C%22a%22%3A%5B%2210%22%2C%2220%22%5D%7D HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        let shell = FakeShell::new();
        let cfg = BenchmarkConfig::example(Backend::Memory, &["da1"]).with_checkpoint_period(10);
        let ff = FirefoxConfig {
            firefox: "/usr/local/bin/firefox".into(),
            driver: "/kraken-1.1/driver.html".into(),
            hosted: hosted.path().to_str().unwrap().into(),
            warmup: Duration::from_secs(0),
            timeout: Some(Duration::from_secs(10)),
        };

        let port = server.local_addr().port();
        let runtime = benchmark_browser(&shell, &cfg, &ff, &server, port).unwrap();
        assert_eq!(runtime, Some(30));

        assert_eq!(
            shell.commands()[0],
            format!(
                "/usr/local/bin/firefox -headless http://localhost:{}/kraken-1.1/driver.html &",
                port
            )
        );
        assert_eq!(shell.count("/sls/tools/slsctl/slsctl attach -o 1000 -p 1000"), 1);
        server.shutdown().unwrap();
    }

    #[test]
    fn dry_run_skips_waiting_and_unloads() {
        let hosted = tempfile::tempdir().unwrap();
        let shell = FakeShell::new();
        let cfg = BenchmarkConfig::example(Backend::Ffs, &["da1", "da2"]);
        let ff = FirefoxConfig {
            firefox: "/usr/local/bin/firefox".into(),
            driver: "/kraken-1.1/driver.html".into(),
            hosted: hosted.path().to_str().unwrap().into(),
            warmup: Duration::from_secs(0),
            timeout: None,
        };

        assert_eq!(run_firefox(&shell, &cfg, &ff).unwrap(), None);
        assert_eq!(shell.count("/usr/local/bin/firefox -headless"), 1);
        assert_eq!(shell.count("umount /testmnt"), 1);
        assert!(!shell.exists("/dev/stripe/st0"));
    }
}
