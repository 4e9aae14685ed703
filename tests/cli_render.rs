use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const TEST_FILE: &str = "tests/fixtures/kubeconfig.yaml";

#[test]
fn render_yaml() {
    let mut cmd = Command::cargo_bin("kubecloud").unwrap();
    cmd.args([
        "render",
        "--kubeconfig",
        TEST_FILE,
        "--name",
        "microk8s",
        "--parent-cloud",
        "localhost",
        "--parent-region",
        "localhost",
        "--storage-class",
        "microk8s-hostpath",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("type: kubernetes"))
    .stdout(predicate::str::contains("https://192.168.1.10:16443"))
    .stdout(predicate::str::contains("host-cloud-region: localhost/localhost"))
    .stdout(predicate::str::contains("operator-storage: microk8s-hostpath"))
    .stdout(predicate::str::contains("workload-storage: microk8s-hostpath"))
    .stdout(predicate::str::contains("credential-tag: cloudcred-microk8s_admin_microk8s"))
    .stdout(predicate::str::contains("<redacted>"))
    // Secrets must never be printed.
    .stdout(predicate::str::contains("s3cr3t-t0k3n").not());
}

#[test]
fn render_json_without_parent() {
    let output = Command::cargo_bin("kubecloud")
        .unwrap()
        .args([
            "render",
            "--kubeconfig",
            TEST_FILE,
            "--name",
            "microk8s",
            "--output",
            "json",
        ])
        .unwrap()
        .stdout;

    let rendered: serde_json::Value =
        serde_json::from_slice(&output).expect("unable to parse rendered json");
    assert_eq!(rendered["cloud"]["host-cloud-region"], "other");
    assert_eq!(rendered["cloud"].get("config"), None);
    assert_eq!(rendered["credential"]["auth-type"], "oauth2");
}

#[test]
fn render_unknown_context() {
    let mut cmd = Command::cargo_bin("kubecloud").unwrap();
    cmd.args([
        "render",
        "--kubeconfig",
        TEST_FILE,
        "--name",
        "microk8s",
        "--context",
        "nope",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Context \"nope\" not found"));
}
