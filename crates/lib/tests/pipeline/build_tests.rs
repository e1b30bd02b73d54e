use std::sync::Arc;
use std::time::Duration;

use strata_lib::build::BuildError;
use strata_lib::cache::{CacheStatus, LayerCache};
use strata_lib::context::MemoryContext;
use strata_lib::error::ErrorKind;
use strata_lib::execute::{ExecutorConfig, StepError};
use strata_lib::plan::{PlanError, PlanWarning, plan};
use strata_lib::step::StepDescriptor;

use super::common::{FakeRunner, builder, builder_with, service_context, service_steps};

#[tokio::test]
async fn service_image_has_dependencies_and_code() {
  let context = service_context("app = 'v1'");
  let plan = plan(service_steps(), &context).unwrap();
  let runner = FakeRunner::default();
  let builder = builder(context, Arc::new(LayerCache::unbounded()), runner.clone());

  let outcome = builder.build(&plan).await.unwrap();
  let fs = &outcome.snapshot.filesystem;

  assert_eq!(fs.get("/app/main.py").unwrap().data(), b"app = 'v1'");
  assert!(fs.get("/app/app/routes.py").is_some());
  assert!(fs.get("/app/requirements.txt").is_some());
  assert!(fs.get("/usr/local/lib/site-packages/fastapi").is_some());
  assert!(fs.get("/usr/local/lib/site-packages/uvicorn").is_some());
  assert!(fs.get("/usr/local/bin/python3").is_some());

  assert_eq!(outcome.snapshot.work_dir, "/app");
  assert!(outcome.snapshot.exposed_ports.contains(&8000));
  assert_eq!(outcome.layers.len(), 7);
  assert_eq!(outcome.cache_hits(), 0);
  assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn independent_builds_are_deterministic() {
  let mut digests = Vec::new();
  for _ in 0..2 {
    let context = service_context("app = 'v1'");
    let plan = plan(service_steps(), &context).unwrap();
    let builder = builder(context, Arc::new(LayerCache::unbounded()), FakeRunner::default());
    let outcome = builder.build(&plan).await.unwrap();
    digests.push((outcome.snapshot.digest().unwrap(), outcome.manifest().unwrap().id().unwrap()));
  }
  assert_eq!(digests[0], digests[1]);
}

#[tokio::test]
async fn code_change_reuses_dependency_layers() {
  let cache = Arc::new(LayerCache::unbounded());
  let runner = FakeRunner::default();

  let first_context = service_context("app = 'v1'");
  let first_plan = plan(service_steps(), &first_context).unwrap();
  builder(first_context, cache.clone(), runner.clone())
    .build(&first_plan)
    .await
    .unwrap();

  let second_context = service_context("app = 'v2'");
  let second_plan = plan(service_steps(), &second_context).unwrap();
  let outcome = builder(second_context, cache.clone(), runner.clone())
    .build(&second_plan)
    .await
    .unwrap();

  let statuses: Vec<_> = outcome.layers.iter().map(|l| l.status).collect();
  assert_eq!(
    statuses,
    [
      CacheStatus::Hit,
      CacheStatus::Hit,
      CacheStatus::Hit,
      CacheStatus::Hit,
      CacheStatus::Computed,
      CacheStatus::Computed,
      CacheStatus::Computed,
    ]
  );
  assert_eq!(outcome.cache_hits(), 4);
  assert_eq!(runner.calls(), 1, "pip install must not run again");
  assert_eq!(
    outcome.snapshot.filesystem.get("/app/main.py").unwrap().data(),
    b"app = 'v2'"
  );
}

#[tokio::test]
async fn unchanged_rebuild_is_fully_cached() {
  let cache = Arc::new(LayerCache::unbounded());
  let context = service_context("app = 'v1'");
  let plan = plan(service_steps(), &context).unwrap();
  let builder = builder(context, cache, FakeRunner::default());

  let first = builder.build(&plan).await.unwrap();
  let second = builder.build(&plan).await.unwrap();

  assert_eq!(second.cache_hits(), 7);
  assert_eq!(first.snapshot.digest().unwrap(), second.snapshot.digest().unwrap());
  assert_eq!(first.top_key(), second.top_key());
}

#[tokio::test]
async fn escaping_source_is_rejected_before_any_step_runs() {
  let context = service_context("app");
  let mut steps = service_steps();
  steps.insert(2, StepDescriptor::copy_files(&["../secret"], "."));

  let err = plan(steps, &context).unwrap_err();
  assert!(matches!(err, PlanError::InvalidContext { index: 2, .. }));
  assert_eq!(err.kind(), ErrorKind::InvalidContext);
}

#[tokio::test]
async fn plan_without_base_is_empty() {
  let context = service_context("app");
  let steps: Vec<_> = service_steps().into_iter().skip(1).collect();
  let err = plan(steps, &context).unwrap_err();
  assert!(matches!(err, PlanError::EmptyPlan));
  assert_eq!(err.kind().exit_code(), 4);
}

#[tokio::test]
async fn missing_source_fails_at_its_step() {
  let context = MemoryContext::new().with_file("main.py", "app");
  let plan = plan(service_steps(), &context).unwrap();
  let cache = Arc::new(LayerCache::unbounded());
  let err = builder(context, cache.clone(), FakeRunner::default())
    .build(&plan)
    .await
    .unwrap_err();

  assert_eq!(err.index(), Some(2));
  assert_eq!(err.kind(), ErrorKind::SourceNotFound);
  assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn failed_command_keeps_earlier_layers() {
  let context = service_context("app");
  let mut steps = service_steps();
  steps[3] = StepDescriptor::run_command(&["fail", "3"]);
  let failing = plan(steps, &context).unwrap();

  let cache = Arc::new(LayerCache::unbounded());
  let runner = FakeRunner::default();
  let err = builder(context.clone(), cache.clone(), runner.clone())
    .build(&failing)
    .await
    .unwrap_err();

  match &err {
    BuildError::Step {
      index: 3,
      source: StepError::CommandFailed { exit_code, .. },
      ..
    } => assert_eq!(*exit_code, Some(3)),
    other => panic!("unexpected error {:?}", other),
  }
  assert_eq!(err.kind().exit_code(), 8);

  let fixed = plan(service_steps(), &context).unwrap();
  let outcome = builder(context, cache, runner).build(&fixed).await.unwrap();
  assert_eq!(outcome.cache_hits(), 3);
}

#[tokio::test]
async fn slow_command_times_out() {
  let context = service_context("app");
  let mut steps = service_steps();
  steps[3] = StepDescriptor::run_command(&["sleep", "5000"]);
  let plan = plan(steps, &context).unwrap();

  let config = ExecutorConfig::default().with_command_timeout(Some(Duration::from_millis(20)));
  let builder = builder_with(context, Arc::new(LayerCache::unbounded()), FakeRunner::default(), config);
  let err = builder.build(&plan).await.unwrap_err();

  assert_eq!(err.index(), Some(3));
  assert_eq!(err.kind(), ErrorKind::CommandTimeout);
}

#[tokio::test]
async fn repeated_copy_is_idempotent() {
  let context = service_context("app");
  let steps = vec![
    StepDescriptor::set_base(super::common::BASE),
    StepDescriptor::copy_files(&["main.py"], "/srv/"),
    StepDescriptor::copy_files(&["main.py"], "/srv/"),
  ];
  let plan = plan(steps, &context).unwrap();
  let cache = Arc::new(LayerCache::unbounded());
  let outcome = builder(context, cache.clone(), FakeRunner::default())
    .build(&plan)
    .await
    .unwrap();

  let once = cache.get(&outcome.layers[1].key).unwrap();
  let twice = cache.get(&outcome.layers[2].key).unwrap();
  assert_eq!(once.digest().unwrap(), twice.digest().unwrap());
}

#[tokio::test]
async fn last_entrypoint_wins_with_warning() {
  let context = service_context("app");
  let mut steps = service_steps();
  steps.push(StepDescriptor::set_entrypoint(&["gunicorn", "main:app"]));
  let plan = plan(steps, &context).unwrap();

  assert_eq!(
    plan.warnings(),
    [PlanWarning::EntrypointOverridden {
      overridden: vec![6],
      effective: 7,
    }]
  );

  let outcome = builder(context, Arc::new(LayerCache::unbounded()), FakeRunner::default())
    .build(&plan)
    .await
    .unwrap();
  assert_eq!(
    outcome.snapshot.entrypoint,
    Some(vec!["gunicorn".to_string(), "main:app".to_string()])
  );
  assert_eq!(outcome.warnings.len(), 1);
}
