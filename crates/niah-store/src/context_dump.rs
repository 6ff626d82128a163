use std::path::{Path, PathBuf};

use niah_core::{NiahResult, TrialKey};

/// Writes assembled contexts to `<dir>/<stem>_context.txt` for later inspection.
pub struct ContextDumper {
    dir: PathBuf,
}

impl ContextDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &TrialKey) -> PathBuf {
        self.dir.join(format!("{}_context.txt", key.file_stem()))
    }

    pub fn write(&self, key: &TrialKey, context: &str) -> NiahResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        std::fs::write(&path, context)?;
        Ok(path)
    }
}
