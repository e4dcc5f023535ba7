//! Readiness Prober: make sure an attachable Chrome DevTools endpoint is
//! listening on loopback, launching the browser only when nothing answers.
//!
//! The sequence is probe-first. A live endpoint is reused as-is, so running
//! the prober twice never starts a second browser. After a launch the
//! endpoint is polled until it answers or the deadline passes; each probe's
//! own timeout is clamped to the time left, keeping the total wait within
//! `timeout + poll_interval`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromepilot_core::config::BrowserConfig;
use chromepilot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::launcher::{BrowserLauncher, ChromeChannel, LaunchSpec, SystemLauncher};

pub const LOOPBACK: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub host: String,
    pub port: u16,
    pub user_data_dir: PathBuf,
    pub profile_directory: String,
    pub channel: ChromeChannel,
    /// Upper bound on waiting for the endpoint after a launch.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl ProbeOptions {
    pub fn new(port: u16, user_data_dir: PathBuf) -> Self {
        Self {
            host: LOOPBACK.to_string(),
            port,
            user_data_dir,
            profile_directory: "Default".to_string(),
            channel: ChromeChannel::Stable,
            timeout: Duration::from_millis(15_000),
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn from_config(cfg: &BrowserConfig) -> Result<Self> {
        Ok(Self {
            profile_directory: cfg.profile_directory.clone(),
            channel: cfg.channel.parse()?,
            timeout: Duration::from_millis(cfg.ready_timeout_ms),
            ..Self::new(cfg.devtools_port, cfg.user_data_dir_path())
        })
    }

    pub fn version_url(&self) -> String {
        format!("http://{}:{}/json/version", self.host, self.port)
    }

    fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            port: self.port,
            user_data_dir: self.user_data_dir.clone(),
            profile_directory: self.profile_directory.clone(),
            channel: self.channel,
        }
    }
}

/// The `/json/version` document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "V8-Version", default)]
    pub v8_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyEndpoint {
    pub host: String,
    pub port: u16,
    /// Whether this call started the browser.
    pub launched: bool,
    pub version: VersionInfo,
}

impl ReadyEndpoint {
    /// The URL an MCP server attaches to (`--browserUrl`).
    pub fn browser_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub struct ReadinessProber {
    client: reqwest::Client,
    launcher: Arc<dyn BrowserLauncher>,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProber {
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(SystemLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn BrowserLauncher>) -> Self {
        // Loopback traffic must never be routed through HTTP(S)_PROXY.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, launcher }
    }

    /// True iff `url` answers 2xx within `timeout`.
    pub async fn is_up(&self, url: &str, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "DevTools probe failed");
                false
            }
        }
    }

    /// Poll `url` until it is up or `timeout` elapses.
    pub async fn wait_until_ready(
        &self,
        url: &str,
        timeout: Duration,
        poll_interval: Duration,
        probe_timeout: Duration,
    ) -> Result<()> {
        self.poll_until(url, Instant::now() + timeout, timeout, poll_interval, probe_timeout)
            .await
    }

    /// Poll loop against an absolute deadline. `budget` is only reported.
    async fn poll_until(
        &self,
        url: &str,
        deadline: Instant,
        budget: Duration,
        poll_interval: Duration,
        probe_timeout: Duration,
    ) -> Result<()> {
        info!(
            url,
            remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Waiting for DevTools endpoint"
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.is_up(url, probe_timeout.min(remaining)).await {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }

        Err(Error::Timeout(format!(
            "DevTools endpoint {} not ready after {} ms",
            url,
            budget.as_millis()
        )))
    }

    pub async fn fetch_version(&self, url: &str, timeout: Duration) -> Result<VersionInfo> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::Other(format!("GET {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Other(format!("reading {} failed: {}", url, e)))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Probe, launch if needed, wait, then verify. The whole sequence,
    /// including the first probe and the launch, shares one deadline.
    pub async fn ensure_ready(&self, opts: &ProbeOptions) -> Result<ReadyEndpoint> {
        let deadline = Instant::now() + opts.timeout;

        tokio::fs::create_dir_all(&opts.user_data_dir).await?;
        info!(dir = %opts.user_data_dir.display(), "user-data-dir ready");

        let url = opts.version_url();
        let first_probe = opts.probe_timeout.min(deadline.saturating_duration_since(Instant::now()));
        let launched = if !first_probe.is_zero() && self.is_up(&url, first_probe).await {
            info!(port = opts.port, "DevTools already listening, skipping launch");
            false
        } else {
            info!(port = opts.port, channel = %opts.channel, "DevTools not up, launching Chrome");
            self.launcher.launch(&opts.launch_spec()).await?;
            true
        };

        self.poll_until(&url, deadline, opts.timeout, opts.poll_interval, opts.probe_timeout)
            .await?;

        // Ready at the deadline still gets one interval to answer the fetch.
        let verify = opts
            .probe_timeout
            .min(deadline.saturating_duration_since(Instant::now()).max(opts.poll_interval));
        let version = self.fetch_version(&url, verify).await?;
        info!(browser = %version.browser, protocol = %version.protocol_version, "DevTools endpoint ready");

        Ok(ReadyEndpoint {
            host: opts.host.clone(),
            port: opts.port,
            launched,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn version_doc() -> serde_json::Value {
        json!({
            "Browser": "Chrome/126.0.6478.127",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "V8-Version": "12.6.228.28",
            "webSocketDebuggerUrl": "ws://127.0.0.1/devtools/browser/abc"
        })
    }

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    /// Answers 503 until `ready` is set.
    fn gated_router(ready: Arc<AtomicBool>) -> Router {
        Router::new().route(
            "/json/version",
            get(move || {
                let ready = ready.clone();
                async move {
                    if ready.load(Ordering::SeqCst) {
                        Json(version_doc()).into_response()
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    }
                }
            }),
        )
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Counts launches; optionally flips the gated endpoint live.
    #[derive(Default)]
    struct FakeLauncher {
        calls: AtomicUsize,
        bring_up: Option<Arc<AtomicBool>>,
        fail: bool,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, _spec: &LaunchSpec) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Launch("no chrome here".to_string()));
            }
            if let Some(flag) = &self.bring_up {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn opts(port: u16, dir: &TempDir, timeout_ms: u64) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(timeout_ms),
            ..ProbeOptions::new(port, dir.path().join("chrome-mcp"))
        }
    }

    #[tokio::test]
    async fn test_live_endpoint_is_reused_idempotently() {
        let port = serve(gated_router(Arc::new(AtomicBool::new(true)))).await;
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let prober = ReadinessProber::with_launcher(launcher.clone());
        let o = opts(port, &dir, 2_000);

        let first = prober.ensure_ready(&o).await.unwrap();
        let second = prober.ensure_ready(&o).await.unwrap();

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(first, second);
        assert!(!first.launched);
        assert_eq!(first.version.protocol_version, "1.3");
        assert_eq!(first.browser_url(), format!("http://127.0.0.1:{}", port));
        assert!(o.user_data_dir.is_dir());
    }

    #[tokio::test]
    async fn test_launches_once_then_waits_for_endpoint() {
        let ready = Arc::new(AtomicBool::new(false));
        let port = serve(gated_router(ready.clone())).await;
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher {
            bring_up: Some(ready),
            ..Default::default()
        });
        let prober = ReadinessProber::with_launcher(launcher.clone());

        let ep = prober.ensure_ready(&opts(port, &dir, 3_000)).await.unwrap();
        assert!(ep.launched);
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ep.version.web_socket_debugger_url, "ws://127.0.0.1/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_wait_is_bounded_when_nothing_listens() {
        let port = closed_port().await;
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let prober = ReadinessProber::with_launcher(launcher.clone());
        let o = opts(port, &dir, 700);

        let started = std::time::Instant::now();
        let err = prober.ensure_ready(&o).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        let bound = o.timeout + o.poll_interval + Duration::from_millis(250);
        assert!(elapsed < bound, "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_hanging_endpoint_probe_is_clamped() {
        let router = Router::new().route(
            "/json/version",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let port = serve(router).await;
        let prober = ReadinessProber::with_launcher(Arc::new(FakeLauncher::default()));
        let url = format!("http://127.0.0.1:{}/json/version", port);
        let timeout = Duration::from_millis(400);

        let started = std::time::Instant::now();
        let err = prober
            .wait_until_ready(&url, timeout, DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(ref m) if m.contains(&url)));
        assert!(started.elapsed() < timeout + DEFAULT_POLL_INTERVAL + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_total_wait_bounded_with_hanging_endpoint() {
        let router = Router::new().route(
            "/json/version",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let port = serve(router).await;
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let prober = ReadinessProber::with_launcher(launcher.clone());
        let o = opts(port, &dir, 1_000);

        let started = std::time::Instant::now();
        let err = prober.ensure_ready(&o).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
        // The first probe hangs too, so it must draw from the same deadline.
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        assert!(elapsed < o.timeout + o.poll_interval + Duration::from_millis(250), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_launch_failure_is_immediate() {
        let port = closed_port().await;
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..Default::default()
        });
        let prober = ReadinessProber::with_launcher(launcher.clone());

        let started = std::time::Instant::now();
        let err = prober.ensure_ready(&opts(port, &dir, 10_000)).await.unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_verification_non_ok_status() {
        let router = Router::new().route(
            "/json/version",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let port = serve(router).await;
        let prober = ReadinessProber::with_launcher(Arc::new(FakeLauncher::default()));
        let url = format!("http://127.0.0.1:{}/json/version", port);

        let err = prober.fetch_version(&url, DEFAULT_PROBE_TIMEOUT).await.unwrap_err();
        match err {
            Error::UnexpectedStatus { status, url: u } => {
                assert_eq!(status, 500);
                assert_eq!(u, url);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_options_from_config() {
        let cfg = BrowserConfig {
            devtools_port: 9444,
            profile_directory: "Profile 3".to_string(),
            channel: "beta".to_string(),
            ready_timeout_ms: 1234,
            ..Default::default()
        };
        let o = ProbeOptions::from_config(&cfg).unwrap();
        assert_eq!(o.version_url(), "http://127.0.0.1:9444/json/version");
        assert_eq!(o.channel, ChromeChannel::Beta);
        assert_eq!(o.timeout, Duration::from_millis(1234));
        assert_eq!(o.poll_interval, Duration::from_millis(300));
        assert_eq!(o.probe_timeout, Duration::from_millis(1500));
    }
}
