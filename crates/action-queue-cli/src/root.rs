use action_queue_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the queue root directory.
///
/// Priority:
/// 1. `--root` flag / `AQ_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.action-queue/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_queue_root(&cwd).unwrap_or(cwd)
}

fn find_queue_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(paths::QUEUE_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_queue_dir_above_start() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".action-queue")).unwrap();
        let subdir = dir.path().join("src/deep");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_queue_root(&subdir).as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_queue_dir_found() {
        let dir = TempDir::new().unwrap();
        assert!(find_queue_root(dir.path()).is_none());
    }
}
