use std::sync::OnceLock;

use tracing::warn;

/// Overrides the number of encoding threads.
pub const JOBS_ENV: &str = "VT_RENDER_JOBS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub jobs: usize,
}

impl Default for Settings {
    /// One job per logical processor, at least one.
    fn default() -> Self {
        Settings {
            jobs: num_cpus::get().max(1),
        }
    }
}

impl Settings {
    pub fn new(jobs: usize) -> Self {
        Settings { jobs: jobs.max(1) }
    }

    pub fn from_env() -> Self {
        Settings::from_value(std::env::var(JOBS_ENV).ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Settings::default();
        };
        match raw.trim().parse::<usize>() {
            Ok(jobs) if jobs > 0 => Settings { jobs },
            _ => {
                warn!("ignoring invalid {JOBS_ENV}={raw:?}");
                Settings::default()
            }
        }
    }

    pub fn global() -> &'static Settings {
        static SETTINGS: OnceLock<Settings> = OnceLock::new();
        SETTINGS.get_or_init(Settings::from_env)
    }

    pub fn jobs_for(&self, chunks: usize) -> usize {
        chunks.min(self.jobs).max(1)
    }
}
