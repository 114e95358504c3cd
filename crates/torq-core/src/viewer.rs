//! Trace viewer hand-off.
//!
//! [`PerfettoUiViewer`] serves one artifact over loopback HTTP and points a
//! browser tab at the Perfetto UI with the artifact URL. It returns once the
//! artifact has been fetched; until then it blocks.

use crate::config::UiConfig;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use torq_common::{Error, Result};
use tracing::{debug, info, warn};

/// Receives finished artifacts for display.
pub trait TraceViewer {
    fn open(&self, artifact: &Path) -> Result<()>;
}

/// Opens artifacts in the Perfetto web UI.
#[derive(Debug, Clone)]
pub struct PerfettoUiViewer {
    port: u16,
    origin: String,
    launch_browser: bool,
}

impl PerfettoUiViewer {
    pub fn new(config: &UiConfig) -> Self {
        Self {
            port: config.port,
            origin: config.origin.clone(),
            launch_browser: true,
        }
    }

    /// Serve only; print the URL instead of launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.launch_browser = false;
        self
    }

    pub fn viewer_url(&self, file_name: &str) -> String {
        format!(
            "{}/#!/?url=http://127.0.0.1:{}/{}&referrer=open_trace_in_ui",
            self.origin, self.port, file_name
        )
    }
}

impl TraceViewer for PerfettoUiViewer {
    fn open(&self, artifact: &Path) -> Result<()> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Viewer(format!("{} has no file name", artifact.display())))?;
        let body = std::fs::read(artifact)?;

        let server = tiny_http::Server::http(("127.0.0.1", self.port))
            .map_err(|e| Error::Viewer(format!("failed to listen on port {}: {e}", self.port)))?;
        info!(port = self.port, file = %file_name, "serving trace for viewer");

        let url = self.viewer_url(&file_name);
        if self.launch_browser {
            launch_browser(&url);
        } else {
            info!(%url, "open this URL to view the trace");
        }

        serve_once(&server, &file_name, &body, &self.origin)
    }
}

fn launch_browser(url: &str) {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let spawned = Command::new(program)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        warn!(program, error = %e, %url, "could not launch a browser; open the URL manually");
    }
}

fn header(name: &str, value: &str) -> Result<tiny_http::Header> {
    tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|()| Error::Viewer(format!("invalid header {name}: {value}")))
}

/// Answer requests until `GET /<file_name>` has been served once.
///
/// Everything else gets a 404.
fn serve_once(server: &tiny_http::Server, file_name: &str, body: &[u8], origin: &str) -> Result<()> {
    let expected = format!("/{file_name}");
    loop {
        let request = server.recv()?;
        let is_artifact = *request.method() == tiny_http::Method::Get && request.url() == expected;
        debug!(method = %request.method(), url = %request.url(), is_artifact, "viewer request");

        if !is_artifact {
            let _ = request
                .respond(tiny_http::Response::from_string("not found").with_status_code(404));
            continue;
        }

        let response = tiny_http::Response::from_data(body.to_vec())
            .with_header(header("Access-Control-Allow-Origin", origin)?)
            .with_header(header("Cache-Control", "no-cache")?);
        match request.respond(response) {
            Ok(()) => {
                info!(file = %file_name, "trace fetched by viewer");
                return Ok(());
            }
            Err(e) => warn!(error = %e, "failed to send trace; waiting for another fetch"),
        }
    }
}

/// Viewer that records what it was asked to open.
#[derive(Debug, Default)]
pub struct RecordingViewer {
    opened: RefCell<Vec<PathBuf>>,
}

impl RecordingViewer {
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.borrow().clone()
    }
}

impl TraceViewer for RecordingViewer {
    fn open(&self, artifact: &Path) -> Result<()> {
        self.opened.borrow_mut().push(artifact.to_path_buf());
        Ok(())
    }
}
