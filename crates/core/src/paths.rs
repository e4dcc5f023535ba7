use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "CHROMEPILOT_HOME";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    /// Data directory from `CHROMEPILOT_HOME`, falling back to `./storage`
    /// relative to the working directory.
    pub fn new() -> Self {
        let base = std::env::var(HOME_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("storage"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.base.join("state.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    pub fn session_state_file(&self, session_key: &str) -> PathBuf {
        let safe_key = session_key.replace([':', '/', '\\'], "_");
        self.sessions_dir().join(format!("{}.json", safe_key))
    }

    /// Screenshots taken by the agent land next to the state file.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.base.clone()
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.sessions_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
