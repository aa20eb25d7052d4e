//! Parse requests served by the real `knxload worker` child process.

use knxload::error::WorkerError;
use knxload::worker::{ParseFailureCode, ProcessSpawner, WorkerClient, WORKER_COMMAND};

fn client() -> WorkerClient<ProcessSpawner> {
  WorkerClient::new(ProcessSpawner::with_command(
    env!("CARGO_BIN_EXE_knxload"),
    [WORKER_COMMAND],
  ))
}

#[tokio::test]
async fn test_worker_process_parses_export() {
  let export = br#"{
    "projectName": "Office",
    "devices": [
      {"instance_id": "P-1", "individual_address": "1.1.1", "configuration": {"mode": "eco"}}
    ]
  }"#;

  let project = client()
    .parse(export.to_vec(), None, Some("de-DE"))
    .await
    .unwrap();

  assert_eq!(project.project_name, "Office");
  assert_eq!(project.devices.len(), 1);
  assert_eq!(project.devices[0].individual_address, "1.1.1");
  assert_eq!(project.devices[0].configuration["mode"], "eco");
}

#[tokio::test]
async fn test_worker_process_reports_structured_failure() {
  let err = client()
    .parse(b"PK\x03\x04archive".to_vec(), None, None)
    .await
    .unwrap_err();

  match err {
    WorkerError::Failed(failure) => {
      assert_eq!(failure.code, Some(ParseFailureCode::UnsupportedFormat));
    }
    other => panic!("expected a parse failure, got {:?}", other),
  }
}

#[tokio::test]
async fn test_concurrent_worker_processes() {
  let client = client();
  let (first, second) = tokio::join!(
    client.parse(br#"{"project_name": "First"}"#.to_vec(), None, None),
    client.parse(br#"{"project_name": "Second"}"#.to_vec(), None, None),
  );

  assert_eq!(first.unwrap().project_name, "First");
  assert_eq!(second.unwrap().project_name, "Second");
}
