use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".butterfly"))
            .unwrap_or_else(|| PathBuf::from(".butterfly"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.base.join("storage")
    }

    /// Namespace holding the supervising-group credential.
    pub fn sync_store_file(&self) -> PathBuf {
        self.storage_dir().join("sync.json")
    }

    /// Namespace holding the policy snapshot and usage counters.
    pub fn local_store_file(&self) -> PathBuf {
        self.storage_dir().join("local.json")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.storage_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
