//! Replay subcommand integration tests.
//!
//! These run the `netoflow replay` binary end-to-end on recorded descriptor
//! files. No root required.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

const EXCHANGE: &str = "\
# timestamp_us proto src_ip src_port dst_ip dst_port bytes
1700000000000000\ttcp\t10.0.0.5\t51000\t93.10.10.1\t443\t120
1700000000000500\ttcp\t93.10.10.1\t443\t10.0.0.5\t51000\t1500
1700000000001000\ttcp\t93.10.10.1\t443\t10.0.0.5\t51000\t900
1700000000002000\tudp\t10.0.0.5\t5353\t10.0.0.9\t53\t80
";

fn netoflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_netoflow"))
}

fn descriptor_file(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "exit code: {}, stderr: {}",
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// TC-2.1: Default output is Prometheus text with reply collapsing applied.
#[test]
fn tc_2_1_replay_prometheus() {
    let input = descriptor_file(EXCHANGE);
    let output = netoflow()
        .args(["replay", "--local-ips", "10.0.0.5/24"])
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# TYPE hosts_src_dst gauge"));
    assert!(stdout.contains(
        "hosts_src_dst{addr=\"93.10.10.1->10.0.0.5\",port=\"reply_tcp/443\",\
         first_seen=\"2023-11-14 22:13:20\",proto=\"tcp\",locality=\"inbound\"} 2400"
    ));
    assert!(stdout.contains("total_incoming 2400\n"));
    assert!(stdout.contains("total_outgoing 120\n"));
    assert!(!stdout.contains("port=\"tcp/51000\""));
}

/// TC-2.2: JSON output parses and carries rows and totals.
#[test]
fn tc_2_2_replay_json() {
    let input = descriptor_file(EXCHANGE);
    let output = netoflow()
        .args(["replay", "--format", "json", "--local-ips", "10.0.0.5"])
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_success(&output);

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not valid JSON");
    let flows = parsed["flows"].as_array().expect("flows array");
    assert_eq!(flows.len(), 3);
    assert!(flows.iter().any(|f| f["locality"] == "internal"));
    assert_eq!(parsed["totals"]["total_inbound"], 2400);
    assert_eq!(parsed["totals"]["total_outbound"], 120);
}

/// TC-2.3: Malformed lines are skipped and counted, not fatal.
#[test]
fn tc_2_3_malformed_lines_counted() {
    let input = descriptor_file(&format!("{EXCHANGE}not a descriptor\n1 tcp 10.0.0.5 1 8.8.8.8 2 0\n"));
    let output = netoflow()
        .arg("replay")
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dropped_descriptors_total 2\n"));
}

/// TC-2.4: `--output` writes the file and leaves no temp file behind.
#[test]
fn tc_2_4_replay_to_file() {
    let input = descriptor_file(EXCHANGE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.tsv");

    let output = netoflow()
        .args(["replay", "--format", "tsv", "--output"])
        .arg(&path)
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_success(&output);
    assert!(output.stdout.is_empty());

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    assert!(lines.next().unwrap().starts_with("src_ip\t"));
    assert!(content.contains("# totals"));
    assert!(!dir.path().join("flows.tsv.tmp").exists());
}

/// TC-2.5: Invalid local network exits with the configuration error code.
#[test]
fn tc_2_5_bad_cidr_exit_code() {
    let input = descriptor_file(EXCHANGE);
    let output = netoflow()
        .args(["replay", "--local-networks", "10.0.0.0/33"])
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid prefix length"));
}

/// TC-2.6: Config file values are honoured.
#[test]
fn tc_2_6_config_file() {
    let input = descriptor_file(EXCHANGE);
    let config = descriptor_file(r#"{"local_networks": ["93.10.10.0/24"]}"#);
    let output = netoflow()
        .args(["replay", "--format", "json", "--config"])
        .arg(config.path())
        .arg(input.path())
        .output()
        .expect("failed to execute");
    assert_success(&output);

    // With only 93.10.10.0/24 local, the server side is local and the client
    // remote. No local host is configured, so responses stay separate flows.
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["totals"]["total_outbound"], 2400);
    assert_eq!(parsed["totals"]["total_inbound"], 120);
    let flows = parsed["flows"].as_array().unwrap();
    assert!(flows.iter().any(|f| f["port_label"] == "tcp/51000"));
}

/// TC-2.7: Missing input file is reported, not a panic.
#[test]
fn tc_2_7_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = netoflow()
        .arg("replay")
        .arg(dir.path().join("absent.tsv"))
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error: "));
}
