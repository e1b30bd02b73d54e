use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_with_no_store_succeeds() {
  let env = TestEnv::new();

  env
    .strata_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::new();

  env
    .strata_cmd()
    .arg("gc")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::new();

  env
    .strata_cmd()
    .arg("gc")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("layers_deleted"))
    .stdout(predicate::str::contains("blobs_deleted"))
    .stdout(predicate::str::contains("deleted_layers"));
}

#[test]
fn gc_removes_layers_of_retagged_image() {
  let env = TestEnv::service();
  env.build("web").assert().success();
  env.write_context("main.py", "print('v2')");
  env.build("web").assert().success();

  let dry = env.strata_cmd().args(["gc", "--dry-run", "-o", "json"]).output().unwrap();
  let dry: serde_json::Value = serde_json::from_slice(&dry.stdout).unwrap();
  assert_eq!(dry["dry_run"], true);
  assert_eq!(dry["stats"]["layers_deleted"], 4);

  let output = env.strata_cmd().args(["gc", "-o", "json"]).output().unwrap();
  let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(result["stats"]["layers_deleted"], 4);
  assert_eq!(result["stats"]["manifests_deleted"], 1);

  env.strata_cmd().args(["run", "web"]).assert().success();
  env
    .build("web")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"cached\": 6"));
}
