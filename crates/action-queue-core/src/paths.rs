use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const QUEUE_DIR: &str = ".action-queue";
pub const CONFIG_FILE: &str = ".action-queue/config.yaml";
pub const STATE_DB_FILE: &str = ".action-queue/state.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn queue_dir(root: &Path) -> PathBuf {
    root.join(QUEUE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_db_path(root: &Path) -> PathBuf {
    root.join(STATE_DB_FILE)
}
