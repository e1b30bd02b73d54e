use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn images_empty() {
  let env = TestEnv::new();
  env
    .strata_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("No images"));
}

#[test]
fn images_lists_tags() {
  let env = TestEnv::service();
  env.build("web").assert().success();
  env.build("web:1.0").assert().success();

  env
    .strata_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("web:1.0"))
    .stdout(predicate::str::contains("web:latest"));

  let output = env.strata_cmd().args(["images", "-o", "json"]).output().unwrap();
  let images: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let images = images.as_array().unwrap();
  assert_eq!(images.len(), 2);
  assert_eq!(images[0]["id"], images[1]["id"]);
  assert_eq!(images[0]["layers"], 6);
}

#[test]
fn rmi_untags() {
  let env = TestEnv::service();
  env.build("web").assert().success();

  env.strata_cmd().args(["rmi", "web"]).assert().success();
  env.strata_cmd().args(["run", "web"]).assert().code(12);
  env.strata_cmd().args(["rmi", "web"]).assert().code(12);
}
