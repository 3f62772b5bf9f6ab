use assert_cmd::Command;
use httpmock::prelude::*;

#[tokio::test]
async fn processes_command_lists_processes() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/metrics/processes")
                .query_param("limit", "15");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"[{"pid":1234,"name":"firefox","cpu_percent":22.5,"memory_mb":812.0,
                         "threads":48,"status":"running"}]"#,
                );
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("vitals-cli"))
        .args(["--url", &server.base_url(), "--no-color", "processes"])
        .assert()
        .success()
        .stdout(predicates::str::contains("firefox"));
}

#[tokio::test]
async fn processes_command_handles_empty_list() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/metrics/processes");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"[]"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("vitals-cli"))
        .args(["--url", &server.base_url(), "--no-color", "processes"])
        .assert()
        .success();
}

#[tokio::test]
async fn processes_command_passes_custom_limit() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/metrics/processes")
                .query_param("limit", "5");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"[]"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("vitals-cli"))
        .args([
            "--url",
            &server.base_url(),
            "--no-color",
            "processes",
            "--limit",
            "5",
        ])
        .assert()
        .success();
    mock.assert_async().await;
}
