use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_tags_image() {
  let env = TestEnv::service();

  env
    .build("web")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built web"))
    .stdout(predicate::str::contains("6 (0 cached)"));

  assert!(env.data_path().join("images").join("index.json").is_file());
  assert!(env.store_path().join("layers").is_dir());
}

#[test]
fn rebuild_is_served_from_store() {
  let env = TestEnv::service();
  env.build("web").assert().success();

  let output = env.build("web").args(["-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["cached"], 6);
  assert!(
    report["layers"]
      .as_array()
      .unwrap()
      .iter()
      .all(|l| l["status"] == "restored")
  );
}

#[test]
fn changed_code_rebuilds_only_later_layers() {
  let env = TestEnv::service();
  env.build("web").assert().success();

  env.write_context("main.py", "print('v2')");
  let output = env.build("web").args(["-o", "json"]).output().unwrap();
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["cached"], 2);
}

#[test]
fn explicit_recipe_file() {
  let env = TestEnv::service();
  env.write_context("recipes/dev.json", super::common::SERVICE_RECIPE);

  env
    .build("web:dev")
    .arg("-f")
    .arg(env.context_path().join("recipes/dev.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Built web:dev"));
}

#[test]
fn base_image_from_bases_dir() {
  let env = TestEnv::new();
  env.write_base("python", "3.11-slim", "usr/local/bin/python3", "#!python");
  env.write_context("main.py", "print()");
  env.write_context(
    "strata.json",
    r#"{"steps": [
      {"kind": "SetBase", "args": ["python:3.11-slim"]},
      {"kind": "CopyFiles", "args": ["main.py", "/app/"]}
    ]}"#,
  );

  env.build("py").assert().success();
}

#[test]
fn multiple_entrypoints_warn() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [
      {"kind": "SetBase", "args": ["scratch"]},
      {"kind": "SetEntrypoint", "args": ["first"]},
      {"kind": "SetEntrypoint", "args": ["second"]}
    ]}"#,
  );

  env
    .build("multi")
    .assert()
    .success()
    .stderr(predicate::str::contains("overrides step(s) 1"));
}

#[test]
fn missing_recipe_is_invalid_arguments() {
  let env = TestEnv::new();
  env.build("web").assert().code(2).stderr(predicate::str::contains("recipe not found"));
}

#[test]
fn recipe_without_base_is_empty_plan() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [{"kind": "SetWorkDir", "args": ["/app"]}]}"#,
  );
  env.build("web").assert().code(4);
}

#[test]
fn escaping_source_is_invalid_context() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [
      {"kind": "SetBase", "args": ["scratch"]},
      {"kind": "CopyFiles", "args": ["../secret", "."]}
    ]}"#,
  );
  env.build("web").assert().code(3);
}

#[test]
fn unknown_base_is_base_not_found() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [{"kind": "SetBase", "args": ["nowhere:1.0"]}]}"#,
  );
  env.build("web").assert().code(5);
}

#[test]
fn missing_source_is_source_not_found() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [
      {"kind": "SetBase", "args": ["scratch"]},
      {"kind": "CopyFiles", "args": ["requirements.txt", "."]}
    ]}"#,
  );
  env.build("web").assert().code(6);
}

#[test]
fn relative_work_dir_is_invalid_path() {
  let env = TestEnv::new();
  env.write_context(
    "strata.json",
    r#"{"steps": [
      {"kind": "SetBase", "args": ["scratch"]},
      {"kind": "SetWorkDir", "args": ["app"]}
    ]}"#,
  );
  env.build("web").assert().code(7);
}

#[test]
fn invalid_timeout_is_rejected() {
  let env = TestEnv::service();
  env
    .build("web")
    .args(["--timeout", "soon"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("--timeout"));
}

#[cfg(unix)]
fn leaking_recipe(env: &TestEnv, leak: &std::path::Path) {
  env.write_context(
    "strata.json",
    &format!(
      r#"{{"steps": [
        {{"kind": "SetBase", "args": ["scratch"]}},
        {{"kind": "SetWorkDir", "args": ["/app"]}},
        {{"kind": "RunCommand", "args": ["sh", "-c", "echo leaked > {}"]}}
      ]}}"#,
      leak.display()
    ),
  );
}

#[test]
#[cfg(target_os = "linux")]
fn host_programs_are_not_visible_to_commands() {
  let env = TestEnv::new();
  let host = tempfile::TempDir::new().unwrap();
  let leak = host.path().join("leak.txt");
  leaking_recipe(&env, &leak);

  env
    .build("web")
    .assert()
    .code(8)
    .stderr(predicate::str::contains("exit code 127"));
  assert!(!leak.exists());
}

#[test]
#[cfg(all(unix, not(target_os = "linux")))]
fn commands_need_a_sandbox() {
  let env = TestEnv::new();
  let host = tempfile::TempDir::new().unwrap();
  let leak = host.path().join("leak.txt");
  leaking_recipe(&env, &leak);

  env.build("web").assert().code(10);
  assert!(!leak.exists());
}

#[test]
fn timeout_flag_is_accepted() {
  let env = TestEnv::service();

  env.build("web").args(["--timeout", "100ms"]).assert().success();
}

#[test]
fn json_error_report() {
  let env = TestEnv::new();
  let output = env.build("web").args(["-o", "json"]).output().unwrap();

  assert_eq!(output.status.code(), Some(2));
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["kind"], "InvalidArguments");
  assert_eq!(report["exit_code"], 2);
}
