//! Where the refresh token lives between requests
//!
//! The refresh token is the only credential that outlives a single request.
//! Storage is scoped to one client session and emptied when it ends.

use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// Persistence for the refresh token of one session
pub trait RefreshTokenStorage: Send + Sync {
    fn load(&self) -> io::Result<Option<String>>;

    fn save(&self, refresh_token: &str) -> io::Result<()>;

    fn clear(&self) -> io::Result<()>;
}

/// Keeps the token for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    token: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefreshTokenStorage for MemoryStorage {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, refresh_token: &str) -> io::Result<()> {
        *self.token.lock() = Some(refresh_token.to_string());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        self.token.lock().take();
        Ok(())
    }
}

/// Keeps the token in a single file, removed by `clear`
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl RefreshTokenStorage for FileStorage {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, refresh_token: &str) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(refresh_token.as_bytes())?;
        file.sync_all()
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
