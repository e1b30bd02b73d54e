//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// A recipe that needs no host commands: scratch base, app code, metadata.
pub const SERVICE_RECIPE: &str = r#"{
  "steps": [
    { "kind": "SetBase", "args": ["scratch"] },
    { "kind": "SetWorkDir", "args": ["/app"] },
    { "kind": "CopyFiles", "args": ["main.py", "."] },
    { "kind": "ExposePort", "args": ["8000"] },
    { "kind": "SetEnv", "args": ["MODE=prod"] },
    { "kind": "SetEntrypoint", "args": ["python3", "main.py"] }
  ]
}"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the build context and
/// separate data, store and base image directories.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("context")).unwrap();
    Self { temp }
  }

  /// A context holding `main.py` and the scratch service recipe.
  pub fn service() -> Self {
    let env = Self::new();
    env.write_context("main.py", "print('v1')");
    env.write_context("strata.json", SERVICE_RECIPE);
    env
  }

  pub fn context_path(&self) -> PathBuf {
    let p = self.temp.path().join("context");
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn data_path(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  pub fn bases_path(&self) -> PathBuf {
    self.temp.path().join("bases")
  }

  /// Write a file relative to the build context.
  pub fn write_context(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join("context").join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Unpack a base image with a single file.
  pub fn write_base(&self, name: &str, tag: &str, file: &str, content: &str) {
    let path = self.bases_path().join(name).join(tag).join(file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
  }

  /// The strata binary wired to this environment's directories.
  pub fn strata_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("strata");
    cmd
      .env("STRATA_DATA", self.data_path())
      .env("STRATA_STORE", self.store_path())
      .env("STRATA_BASES", self.bases_path())
      .env_remove("STRATA_COMMAND_TIMEOUT")
      .env_remove("STRATA_CACHE_CAPACITY")
      .env_remove("RUST_LOG");
    cmd
  }

  /// `strata build <context> -t <tag>`.
  pub fn build(&self, tag: &str) -> Command {
    let mut cmd = self.strata_cmd();
    cmd.arg("build").arg(self.context_path()).args(["-t", tag]);
    cmd
  }
}
