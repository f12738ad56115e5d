//! Visual verification through a headless browser.
//!
//! The verifier is an out-of-process collaborator: it renders a URL and
//! captures a screenshot after a fixed wait. Page problems (navigation or
//! script errors) are collected as diagnostics and logged, never raised, so
//! a capture attempt always reports whatever state the page reached.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Mobile Safari user agent used by the default capture profile.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 13_2_3 like Mac OS X) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.3 Mobile/15E148 Safari/604.1";

/// Browser binaries probed on `PATH`, in order.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("failed to launch browser {binary}: {source}")]
    Launch {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("render failed: {message}")]
    Render { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 375,
            height: 812,
        }
    }
}

/// What to capture and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub url: String,
    pub viewport: Viewport,
    pub user_agent: String,
    /// Time to let the page settle after navigation
    pub wait_ms: u64,
}

impl CaptureRequest {
    /// Request with the mobile profile: 375x812, iPhone Safari, 3s wait.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            viewport: Viewport::default(),
            user_agent: MOBILE_USER_AGENT.to_string(),
            wait_ms: 3000,
        }
    }

    #[must_use]
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }
}

/// A captured screenshot plus any page problems seen while rendering.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub png: Vec<u8>,
    pub diagnostics: Vec<String>,
}

pub trait Verifier {
    fn capture(&self, request: &CaptureRequest) -> Result<Capture, VerifierError>;
}

/// Chromium in headless screenshot mode.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    binary: PathBuf,
}

impl HeadlessBrowser {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Find a Chromium-family browser on `PATH`.
    pub fn detect() -> Option<Self> {
        let path = env::var_os("PATH")?;
        env::split_paths(&path).find_map(|dir| {
            BROWSER_CANDIDATES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
                .map(Self::new)
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn args(&self, request: &CaptureRequest, output: &Path) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--hide-scrollbars".to_string(),
            format!("--screenshot={}", output.display()),
            format!(
                "--window-size={},{}",
                request.viewport.width, request.viewport.height
            ),
            format!("--user-agent={}", request.user_agent),
            format!("--virtual-time-budget={}", request.wait_ms),
            request.url.clone(),
        ]
    }
}

/// Browser stderr lines that report page-level problems.
fn page_diagnostics(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.contains("Uncaught")
                || line.contains("ERR_")
                || line.contains(":ERROR:")
                || line.contains("CONSOLE(")
        })
        .map(str::to_string)
        .collect()
}

impl Verifier for HeadlessBrowser {
    fn capture(&self, request: &CaptureRequest) -> Result<Capture, VerifierError> {
        let temp_dir = tempfile::tempdir()?;
        let output = temp_dir.path().join("capture.png");

        tracing::debug!(url = %request.url, browser = %self.binary.display(), "capturing");
        let result = Command::new(&self.binary)
            .args(self.args(request, &output))
            .output()
            .map_err(|source| VerifierError::Launch {
                binary: self.binary.clone(),
                source,
            })?;

        let mut diagnostics = page_diagnostics(&String::from_utf8_lossy(&result.stderr));
        if !result.status.success() {
            diagnostics.push(format!("browser exited with {}", result.status));
        }
        for line in &diagnostics {
            tracing::warn!(url = %request.url, "{line}");
        }

        match fs::read(&output) {
            Ok(png) => Ok(Capture { png, diagnostics }),
            Err(_) => Err(VerifierError::Render {
                message: if diagnostics.is_empty() {
                    "browser produced no screenshot".to_string()
                } else {
                    diagnostics.join("; ")
                },
            }),
        }
    }
}
