use std::{
    fs,
    path::{Path, PathBuf},
};

use arena_rl::Result;

/// First `<output_dir>/<name>-NNN` that does not exist yet.
pub fn next_training_dir(output_dir: &Path, name: &str) -> PathBuf {
    (0..)
        .map(|i| output_dir.join(format!("{name}-{i:03}")))
        .find(|path| !path.exists())
        .unwrap_or_else(|| output_dir.join(name))
}

/// Create a fresh run directory under `output_dir`.
pub fn create_training_dir(output_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let dir = next_training_dir(output_dir, name);
    fs::create_dir(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_directories_are_numbered() {
        let output = tempfile::tempdir().unwrap();
        let first = create_training_dir(output.path(), "a2c").unwrap();
        let second = create_training_dir(output.path(), "a2c").unwrap();
        let other = create_training_dir(output.path(), "dqn").unwrap();
        assert_eq!(first, output.path().join("a2c-000"));
        assert_eq!(second, output.path().join("a2c-001"));
        assert_eq!(other, output.path().join("dqn-000"));
        assert!(first.is_dir() && second.is_dir());
    }

    #[test]
    fn test_creates_missing_output_dir() {
        let output = tempfile::tempdir().unwrap();
        let nested = output.path().join("model_outputs");
        let dir = create_training_dir(&nested, "run").unwrap();
        assert_eq!(dir, nested.join("run-000"));
    }
}
