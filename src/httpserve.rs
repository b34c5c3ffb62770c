//! A small static file server that runs on its own thread for the duration of a benchmark.
//!
//! The browser benchmark fetches its driver page and test files from here and, once done, navigates
//! to a `results.html` page whose query string holds the measurements. The server hands that query
//! string (percent-decoded) to whoever is waiting in `wait_for_results`.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use failure::ResultExt;

use log::{debug, warn};

use percent_encoding::percent_decode_str;

use tiny_http::{Header, Method, Request, Response, Server};

/// The page the benchmark driver reports its measurements to.
const RESULTS_PAGE: &str = "results.html";

/// An owned server thread. Dropping it stops the server.
pub struct ServerTask {
    addr: SocketAddr,
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
    results: Receiver<String>,
}

impl ServerTask {
    /// Serve the files under `root` on `addr:port`. Port 0 picks any free port.
    pub fn start<P: AsRef<Path>>(root: P, addr: &str, port: u16) -> Result<Self, failure::Error> {
        let root = root.as_ref().to_owned();
        let server = Server::http(format!("{}:{}", addr, port))
            .map_err(|e| failure::format_err!("binding {}:{}: {}", addr, port, e))?;
        let addr = match server.server_addr().to_ip() {
            Some(addr) => addr,
            None => failure::bail!("the file server is not listening on an IP address"),
        };

        let server = Arc::new(server);
        let (tx, results) = channel();

        let thread = {
            let server = Arc::clone(&server);
            std::thread::spawn(move || serve(&server, &root, &tx))
        };

        debug!("Serving files on {}", addr);

        Ok(ServerTask {
            addr,
            server,
            thread: Some(thread),
            results,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until a results request arrives and return its decoded query string.
    pub fn wait_for_results(&self, timeout: Duration) -> Result<String, failure::Error> {
        match self.results.recv_timeout(timeout) {
            Ok(results) => Ok(results),
            Err(RecvTimeoutError::Timeout) => {
                failure::bail!("no results after {} s", timeout.as_secs())
            }
            Err(RecvTimeoutError::Disconnected) => {
                failure::bail!("the file server stopped before results arrived")
            }
        }
    }

    /// Stop the server and wait for its thread.
    pub fn shutdown(mut self) -> Result<(), failure::Error> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), failure::Error> {
        // Wakes the thread blocked in `incoming_requests`, which then ends.
        self.server.unblock();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(()) => Ok(()),
                Err(_) => failure::bail!("the file server thread panicked"),
            },
            None => Ok(()),
        }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_join() {
            warn!("File server: {}", err);
        }
    }
}

fn serve(server: &Server, root: &Path, results: &Sender<String>) {
    for request in server.incoming_requests() {
        let url = request.url().to_owned();
        if let Err(err) = handle(request, root, results) {
            warn!("File server: request for {} failed: {}", url, err);
        }
    }
}

/// Map a URL path onto a file under `root`. Paths escaping `root` map to nothing.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let relative = Path::new(decoded.trim_start_matches('/'));

    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut full = root.join(relative);
    if full.is_dir() {
        full.push("index.html");
    }
    Some(full)
}

/// Returns true if `path` names the results page, in any directory.
fn is_results_page(path: &str) -> bool {
    path.rsplit('/').next() == Some(RESULTS_PAGE)
}

fn handle(request: Request, root: &Path, results: &Sender<String>) -> Result<(), failure::Error> {
    if *request.method() != Method::Get {
        request.respond(Response::from_string("GET only\n").with_status_code(405))?;
        return Ok(());
    }

    let url = request.url().to_owned();
    let (path, query) = match url.find('?') {
        Some(i) => (&url[..i], Some(&url[i + 1..])),
        None => (url.as_str(), None),
    };

    if is_results_page(path) {
        if let Some(query) = query {
            let decoded = percent_decode_str(query).decode_utf8_lossy().into_owned();
            // Nobody may be listening anymore, which is fine.
            let _ = results.send(decoded);
        }
    }

    match resolve(root, path) {
        Some(file) if file.is_file() => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            let content_type = Header::from_bytes(&b"Content-Type"[..], mime.to_string())
                .map_err(|_| failure::format_err!("bad content type {}", mime))?;
            let body = File::open(&file)
                .with_context(|_| format!("opening {}", file.display()))?;
            request.respond(Response::from_file(body).with_header(content_type))?;
        }
        _ => request.respond(Response::from_string("not found\n").with_status_code(404))?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn get(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            target
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn serves_files_and_captures_results() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("kraken")).unwrap();
        std::fs::write(root.path().join("kraken/driver.html"), "<html>driver</html>").unwrap();

        let server = ServerTask::start(root.path(), "127.0.0.1", 0).unwrap();
        let addr = server.local_addr();

        let response = get(addr, "/kraken/driver.html");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/html"));
        assert!(response.ends_with("<html>driver</html>"));

        assert!(get(addr, "/missing.html").starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/../etc/passwd").starts_with("HTTP/1.1 404"));

        get(addr, "/kraken/results.html?%7B%22v%22%3A%5B%221.1%22%5D%7D");
        let results = server.wait_for_results(Duration::from_secs(10)).unwrap();
        assert_eq!(results, r#"{"v":["1.1"]}"#);

        server.shutdown().unwrap();
    }

    #[test]
    fn only_the_results_page_reports() {
        let root = tempfile::tempdir().unwrap();
        let server = ServerTask::start(root.path(), "127.0.0.1", 0).unwrap();
        let addr = server.local_addr();

        get(addr, "/kraken/results-data.js?%7B%7D");
        get(addr, "/results/index.html?%7B%7D");
        assert!(server
            .wait_for_results(Duration::from_millis(200))
            .is_err());

        get(addr, "/results.html?%7B%7D");
        assert_eq!(
            server.wait_for_results(Duration::from_secs(10)).unwrap(),
            "{}"
        );
    }

    #[test]
    fn waiting_times_out() {
        let root = tempfile::tempdir().unwrap();
        let server = ServerTask::start(root.path(), "127.0.0.1", 0).unwrap();
        assert!(server
            .wait_for_results(Duration::from_millis(50))
            .is_err());
    }

    #[test]
    fn results_page_names() {
        assert!(is_results_page("/results.html"));
        assert!(is_results_page("/kraken-1.1/results.html"));
        assert!(!is_results_page("/kraken/results-data.js"));
        assert!(!is_results_page("/results/driver.html"));
    }
}
