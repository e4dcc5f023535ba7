//! Getting a debuggable Chrome to attach to: locating and launching the
//! browser, waiting for its DevTools endpoint, and resolving profiles.

pub mod launcher;
pub mod prober;
pub mod profile;

pub use launcher::{build_launch_args, find_browser_binary, BrowserLauncher, ChromeChannel, LaunchSpec, SystemLauncher};
pub use prober::{ProbeOptions, ReadinessProber, ReadyEndpoint, VersionInfo};
pub use profile::{find_profile_dir_by_email, find_profile_in, ProfileLocation};
