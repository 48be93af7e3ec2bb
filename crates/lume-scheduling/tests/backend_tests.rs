use std::collections::HashMap;
use std::time::Duration;

use lume_flows::{FlowDescriptor, FlowOfFlows, MappedParameter, Parameter};
use lume_scheduling::{
    Backend, LocalBackend, LocalFlow, LocalRunConfig, RunData, RunOutput, SchedulerClient,
    SchedulingError, ServerBackend, ServerBackendConfig, ServerRunConfig, TaskError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn archive_flow() -> LocalFlow {
    LocalFlow::new("archive")
        .parameter(Parameter::required("name"))
        .task("write_archive", |ctx| {
            let name = ctx
                .parameter("name")?
                .as_str()
                .ok_or_else(|| TaskError::Failed("name must be a string".into()))?;
            let path = ctx.working_dir.join(format!("{}.h5", name));
            std::fs::write(&path, b"archive").map_err(|e| TaskError::Failed(e.to_string()))?;
            Ok(json!(path.display().to_string()))
        })
        .task("tag", |ctx| Ok(json!(ctx.env("RUN_TAG"))))
}

#[tokio::test]
async fn test_local_run_and_return_single_task() {
    let dir = tempfile::tempdir().unwrap();
    let config = LocalRunConfig::new(dir.path())
        .unwrap()
        .with_env(HashMap::from([("RUN_TAG".to_string(), "nightly".to_string())]));
    let backend = LocalBackend::new();

    let data = RunData::from([("name".to_string(), json!("run1"))]);
    let output = backend
        .run_and_return(data, Some(config), Some("write_archive-1"), &archive_flow())
        .await
        .unwrap();

    let written = output.as_task().and_then(|v| v.as_str()).unwrap().to_string();
    assert!(written.ends_with("run1.h5"));
    assert!(dir.path().join("run1.h5").exists());
}

#[tokio::test]
async fn test_local_run_and_return_all_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::with_run_config(
        LocalRunConfig::new(dir.path())
            .unwrap()
            .with_env(HashMap::from([("RUN_TAG".to_string(), "nightly".to_string())])),
    );

    let output = backend
        .run_and_return(
            RunData::from([("name".to_string(), json!("run2"))]),
            None,
            None,
            &archive_flow(),
        )
        .await
        .unwrap();

    assert_eq!(output.get("tag-1"), Some(&json!("nightly")));
    assert!(matches!(output, RunOutput::Flow(ref results) if results.len() == 2));
}

#[tokio::test]
async fn test_local_unknown_task_slug() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::with_run_config(LocalRunConfig::new(dir.path()).unwrap());

    let err = backend
        .run_and_return(
            RunData::from([("name".to_string(), json!("x"))]),
            None,
            Some("plot-1"),
            &archive_flow(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "ERR_SCHEDULING_TASK_NOT_IN_FLOW");
    assert!(!dir.path().join("x.h5").exists());
}

#[tokio::test]
async fn test_local_empty_flow_has_no_result() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::with_run_config(LocalRunConfig::new(dir.path()).unwrap());

    let err = backend
        .run_and_return(RunData::new(), None, None, &LocalFlow::new("empty"))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulingError::EmptyResult));
}

#[tokio::test]
async fn test_local_task_failure() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::with_run_config(LocalRunConfig::new(dir.path()).unwrap());
    let flow = LocalFlow::new("broken").task("explode", |_| Err(TaskError::Failed("boom".into())));

    let err = backend.run(RunData::new(), None, &flow).await.unwrap_err();
    match err {
        SchedulingError::FlowRunFailed { flow_run, reason } => {
            assert_eq!(flow_run, "broken");
            assert!(reason.contains("explode-1"));
            assert!(reason.contains("boom"));
        }
        other => panic!("Expected FlowRunFailed, got {:?}", other),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_local_tasks_leave_the_runtime_free() {
    let dir = tempfile::tempdir().unwrap();
    let config = LocalRunConfig::new(dir.path()).unwrap();
    let (signal, received) = std::sync::mpsc::channel::<()>();
    let received = std::sync::Mutex::new(received);
    let flow = LocalFlow::new("handshake").task("wait_for_signal", move |_| {
        received
            .lock()
            .map_err(|e| TaskError::Failed(e.to_string()))?
            .recv_timeout(Duration::from_secs(2))
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        Ok(json!("signalled"))
    });

    let run = tokio::spawn(async move {
        LocalBackend::new()
            .run_and_return(RunData::new(), Some(config), None, &flow)
            .await
    });

    // the single runtime thread must be able to get here while the task waits
    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.send(()).unwrap();

    let output = run.await.unwrap().unwrap();
    assert_eq!(output.get("wait_for_signal-1"), Some(&json!("signalled")));
}

#[tokio::test]
async fn test_local_missing_working_dir_in_deserialized_config() {
    let backend = LocalBackend::new();
    let config: LocalRunConfig =
        serde_json::from_value(json!({ "working_dir": "/no/such/dir/for/lume" })).unwrap();

    let err = backend
        .run(RunData::from([("name".to_string(), json!("x"))]), Some(config), &archive_flow())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "ERR_SCHEDULING_WORKING_DIR_NOT_FOUND");
}

async fn setup_server_backend(run_timeout: Duration) -> (MockServer, ServerBackend) {
    let mock_server = MockServer::start().await;
    let client = SchedulerClient::with_url_and_timeout(mock_server.uri(), 5).unwrap();
    let backend = ServerBackend::new(
        client,
        ServerBackendConfig {
            poll_interval: Duration::from_millis(10),
            run_timeout,
        },
    );
    (mock_server, backend)
}

async fn mount_create_flow_run(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("create_flow_run(input"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "create_flow_run": { "id": "run-42" } }
        })))
        .expect(1)
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_server_run_and_return_polls_until_success() {
    let (mock_server, backend) = setup_server_backend(Duration::from_secs(5)).await;
    mount_create_flow_run(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": { "id": "run-42", "state": "Running", "task_runs": [] } }
        })))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": {
                "id": "run-42",
                "state": "Success",
                "task_runs": [
                    { "task": { "slug": "read_archive-1" }, "result": "/data/a.h5" },
                    { "task": { "slug": "run_impact-1" }, "result": { "energy": 1.5 } }
                ]
            }}
        })))
        .mount(&mock_server)
        .await;

    let output = backend
        .run_and_return(
            RunData::from([("archive".to_string(), json!("/data/a.h5"))]),
            Some(ServerRunConfig {
                labels: vec!["lcls".to_string()],
                ..Default::default()
            }),
            Some("run_impact-1"),
            "flow-7",
        )
        .await
        .unwrap();

    assert_eq!(output, RunOutput::Task(json!({ "energy": 1.5 })));
}

#[tokio::test]
async fn test_server_failed_run() {
    let (mock_server, backend) = setup_server_backend(Duration::from_secs(5)).await;
    mount_create_flow_run(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": {
                "id": "run-42",
                "state": "Failed",
                "state_message": "Some reference tasks failed.",
                "task_runs": []
            }}
        })))
        .mount(&mock_server)
        .await;

    let err = backend
        .run_and_return(RunData::new(), None, None, "flow-7")
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Flow run run-42 failed: Some reference tasks failed.");
}

#[tokio::test]
async fn test_server_trigger_failed_run_is_not_a_timeout() {
    let (mock_server, backend) = setup_server_backend(Duration::from_millis(300)).await;
    mount_create_flow_run(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": { "id": "run-42", "state": "TriggerFailed", "task_runs": [] } }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = backend
        .run_and_return(RunData::new(), None, None, "flow-7")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "ERR_SCHEDULING_FLOW_RUN_FAILED");
    assert_eq!(err.to_string(), "Flow run run-42 failed: TriggerFailed");
}

#[tokio::test]
async fn test_server_cached_run_returns_results() {
    let (mock_server, backend) = setup_server_backend(Duration::from_millis(300)).await;
    mount_create_flow_run(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": {
                "id": "run-42",
                "state": "Cached",
                "task_runs": [{ "task": { "slug": "run_impact-1" }, "result": 2.5 }]
            }}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let output = backend
        .run_and_return(RunData::new(), None, Some("run_impact-1"), "flow-7")
        .await
        .unwrap();

    assert_eq!(output, RunOutput::Task(json!(2.5)));
}

#[tokio::test]
async fn test_server_run_timeout() {
    let (mock_server, backend) = setup_server_backend(Duration::from_millis(50)).await;
    mount_create_flow_run(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("flow_run_by_pk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flow_run_by_pk": { "id": "run-42", "state": "Running", "task_runs": [] } }
        })))
        .mount(&mock_server)
        .await;

    let err = backend
        .run_and_return(RunData::new(), None, None, "flow-7")
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulingError::RunTimeout(id, _) if id == "run-42"));
}

#[tokio::test]
async fn test_server_run_does_not_wait() {
    let (mock_server, backend) = setup_server_backend(Duration::from_secs(5)).await;
    mount_create_flow_run(&mock_server).await;

    backend.run(RunData::new(), None, "flow-7").await.unwrap();
    // only the create_flow_run request was made
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_compose_and_register_through_scheduler() {
    let mock_server = MockServer::start().await;
    let client = SchedulerClient::with_url_and_timeout(mock_server.uri(), 5).unwrap();

    for (name, parameter, task) in [("load", "path", "read_archive"), ("impact", "archive", "run_impact")] {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains(format!(r#""name":"{}""#, name)))
            .and(body_string_contains("order_by"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "flow": [{
                    "id": format!("{}-id", name),
                    "name": name,
                    "parameters": [{ "name": parameter }],
                    "tasks": [{ "name": task, "slug": format!("{}-1", task) }],
                    "project": { "name": "lcls" }
                }]}
            })))
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("project(where"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "project": [{ "id": "project-1" }] }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("create_flow(input"))
        .and(body_string_contains("impact-run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "create_flow": { "id": "pipeline-id" } }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let descriptors = vec![
        FlowDescriptor::new("load", "lcls"),
        FlowDescriptor::new("impact", "lcls")
            .map_parameter(MappedParameter::new("archive", "load", "read_archive")),
    ];

    let fof = FlowOfFlows::from_descriptors("pipeline", "lcls", descriptors, &client)
        .await
        .unwrap();
    let registered = fof.compose_and_register(&client).await.unwrap();

    assert_eq!(registered.flow_id, "pipeline-id");
    assert!(registered.flow.parameters.contains_key("load-path"));
}
