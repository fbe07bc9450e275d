use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::tokio::AsyncFileExt;
use forge_types::CoreError;
use tokio::fs::OpenOptions;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Process-wide filesystem lock over a model's `.lock` sentinel (§4.2 step
/// 1, §9). Held for the whole preparation attempt; released by `Drop`.
pub struct ArtifactLock {
    path: PathBuf,
    file: tokio::fs::File,
}

impl ArtifactLock {
    /// Acquire the lock, creating the sentinel if missing, waiting out a
    /// live holder and removing an orphaned one before retrying.
    pub async fn acquire(sentinel: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = sentinel.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(sentinel)
                .await?;

            match file.try_lock_exclusive() {
                Ok(true) => {
                    write_holder_pid(&file).await?;
                    return Ok(Self {
                        path: sentinel.to_path_buf(),
                        file,
                    });
                }
                Ok(false) => {
                    if is_orphaned(&file).await {
                        tracing::warn!(path = %sentinel.display(), "removing orphaned lock sentinel");
                        drop(file);
                        let _ = tokio::fs::remove_file(sentinel).await;
                        continue;
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(CoreError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(e) = AsyncFileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release artifact lock");
        }
    }
}

async fn write_holder_pid(file: &tokio::fs::File) -> Result<(), CoreError> {
    let mut std_file = file.try_clone().await?.into_std().await;
    std_file.set_len(0)?;
    use std::io::Seek;
    std_file.seek(std::io::SeekFrom::Start(0))?;
    write!(std_file, "{}", std::process::id())?;
    std_file.flush()?;
    Ok(())
}

/// Best-effort liveness check of whatever pid is recorded in a contended
/// lock sentinel. A sentinel with no parseable pid, or one naming a dead
/// process, is orphaned.
async fn is_orphaned(file: &tokio::fs::File) -> bool {
    let mut std_file = match file.try_clone().await {
        Ok(f) => f.into_std().await,
        Err(_) => return false,
    };
    let mut buf = String::new();
    if std_file.read_to_string(&mut buf).is_err() {
        return false;
    }
    match buf.trim().parse::<u32>() {
        Ok(pid) => !process_alive(pid),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Conservative: without a liveness primitive on this platform, assume
    // the holder is alive rather than risk deleting a live lock.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("model.bin.lock");
        let lock = ArtifactLock::acquire(&sentinel).await.unwrap();
        assert_eq!(lock.path(), sentinel);
        drop(lock);
        // reacquire after release must not block
        let _lock2 = ArtifactLock::acquire(&sentinel).await.unwrap();
    }

    #[tokio::test]
    async fn removes_orphaned_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("model.bin.lock");
        // Simulate a sentinel left behind by a pid well past any real
        // process table, so it reads as dead.
        tokio::fs::write(&sentinel, b"2147483647").await.unwrap();
        let lock = ArtifactLock::acquire(&sentinel).await.unwrap();
        assert_eq!(lock.path(), sentinel);
    }
}
