//! Starting a debuggable Chrome on a fixed port with an isolated profile.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use chromepilot_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Chrome release channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromeChannel {
    #[default]
    Stable,
    Beta,
    Dev,
    Canary,
}

impl ChromeChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Dev => "dev",
            Self::Canary => "canary",
        }
    }

    /// Application bundle name used with `open -na` on macOS.
    pub fn mac_app_name(&self) -> &'static str {
        match self {
            Self::Stable => "Google Chrome",
            Self::Beta => "Google Chrome Beta",
            Self::Dev => "Google Chrome Dev",
            Self::Canary => "Google Chrome Canary",
        }
    }

    /// The channel's everyday user-data directory on this machine.
    pub fn user_data_dir(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        self.user_data_dir_on(Os::current(), &home, |k| std::env::var(k).ok())
    }

    pub fn user_data_dir_on<F>(&self, os: Os, home: &Path, env: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| env(k).filter(|v| !v.is_empty()).map(PathBuf::from);
        match os {
            Os::MacOs => {
                let base = home.join("Library").join("Application Support").join("Google");
                Some(base.join(match self {
                    Self::Stable => "Chrome",
                    Self::Beta => "Chrome Beta",
                    Self::Dev => "Chrome Dev",
                    Self::Canary => "Chrome Canary",
                }))
            }
            Os::Windows => {
                let base = var("LOCALAPPDATA")?.join("Google").join("Chrome");
                Some(base.join(match self {
                    Self::Stable => "User Data",
                    Self::Beta => "User Data Beta",
                    Self::Dev => "User Data Dev",
                    Self::Canary => "User Data SxS",
                }))
            }
            Os::Linux => {
                let config = var("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config"));
                Some(config.join(match self {
                    Self::Stable => "google-chrome",
                    Self::Beta => "google-chrome-beta",
                    Self::Dev | Self::Canary => "google-chrome-unstable",
                }))
            }
        }
    }
}

impl FromStr for ChromeChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "dev" | "unstable" => Ok(Self::Dev),
            "canary" | "sxs" => Ok(Self::Canary),
            other => Err(Error::Config(format!(
                "unknown Chrome channel '{}' (expected stable, beta, dev or canary)",
                other
            ))),
        }
    }
}

impl fmt::Display for ChromeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    MacOs,
    Windows,
    Linux,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub port: u16,
    pub user_data_dir: PathBuf,
    pub profile_directory: String,
    pub channel: ChromeChannel,
}

/// Chrome flags for an attachable, loopback-only instance.
pub fn build_launch_args(spec: &LaunchSpec) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", spec.port),
        "--remote-debugging-address=127.0.0.1".to_string(),
        format!("--user-data-dir={}", spec.user_data_dir.display()),
        format!("--profile-directory={}", spec.profile_directory),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ]
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start the browser process. Returning does not mean the endpoint is up.
    async fn launch(&self, spec: &LaunchSpec) -> Result<()>;
}

/// Launches the locally installed Chrome.
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

#[async_trait]
impl BrowserLauncher for SystemLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<()> {
        let flags = build_launch_args(spec);

        if Os::current() == Os::MacOs {
            // A new instance (-n) so the flags are not swallowed by a running Chrome.
            let app = spec.channel.mac_app_name();
            info!(app, args = ?flags, "Launching Chrome via open -na");
            let status = Command::new("open")
                .args(["-na", app, "--args"])
                .args(&flags)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| Error::Launch(format!("failed to run open -na \"{}\": {}", app, e)))?;
            if !status.success() {
                return Err(Error::Launch(format!("open -na \"{}\" exited with {}", app, status)));
            }
            return Ok(());
        }

        let binary = find_browser_binary(spec.channel).ok_or_else(|| {
            Error::Launch(format!("no Chrome ({} channel) found on this system", spec.channel))
        })?;
        info!(binary = %binary, args = ?flags, "Launching Chrome");

        // Detached: the browser outlives this process.
        let child = Command::new(&binary)
            .args(&flags)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to launch {}: {}", binary, e)))?;
        debug!(pid = ?child.id(), "Chrome spawned");
        Ok(())
    }
}

fn candidates(channel: ChromeChannel, os: Os) -> Vec<String> {
    match os {
        Os::MacOs => {
            let app = channel.mac_app_name();
            let mut v = vec![format!("/Applications/{app}.app/Contents/MacOS/{app}")];
            if channel == ChromeChannel::Stable {
                v.push("/Applications/Chromium.app/Contents/MacOS/Chromium".to_string());
            }
            v
        }
        Os::Linux => match channel {
            ChromeChannel::Stable => [
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
                "/usr/bin/google-chrome",
                "/usr/bin/chromium",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ChromeChannel::Beta => vec!["google-chrome-beta".to_string()],
            ChromeChannel::Dev | ChromeChannel::Canary => vec!["google-chrome-unstable".to_string()],
        },
        Os::Windows => {
            let dir = match channel {
                ChromeChannel::Stable => "Chrome",
                ChromeChannel::Beta => "Chrome Beta",
                ChromeChannel::Dev => "Chrome Dev",
                ChromeChannel::Canary => "Chrome SxS",
            };
            let mut v = vec![
                format!(r"C:\Program Files\Google\{}\Application\chrome.exe", dir),
                format!(r"C:\Program Files (x86)\Google\{}\Application\chrome.exe", dir),
            ];
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                v.push(format!(r"{}\Google\{}\Application\chrome.exe", local, dir));
            }
            v
        }
    }
}

/// Find a Chrome binary for the channel, by absolute path or on `PATH`.
pub fn find_browser_binary(channel: ChromeChannel) -> Option<String> {
    for candidate in candidates(channel, Os::current()) {
        if Path::new(&candidate).exists() {
            return Some(candidate);
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(&candidate).is_ok() {
            return Some(candidate);
        }
    }
    None
}
