use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn td(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("td").expect("binary");
    cmd.env("TD_DIR", dir).env_remove("RUST_LOG").current_dir(dir);
    cmd
}

fn json_output(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("run td");
    assert!(output.status.success(), "td failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("json envelope")
}

#[test]
fn td_help_works() {
    Command::cargo_bin("td")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("offline-first task list"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        vec!["init"],
        vec!["add"],
        vec!["ls"],
        vec!["done"],
        vec!["edit"],
        vec!["rm"],
        vec!["clear"],
        vec!["stats"],
        vec!["ics"],
        vec!["shell"],
        vec!["image", "get"],
        vec!["image", "gc"],
        vec!["cache", "install"],
        vec!["cache", "activate"],
        vec!["cache", "fetch"],
        vec!["cache", "status"],
    ];

    for cmd in subcommands {
        Command::cargo_bin("td")
            .expect("binary")
            .args(&cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn init_writes_default_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    td(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("td init: initialized data directory"));
    assert!(dir.path().join(".td.toml").is_file());
    assert!(dir.path().join("slots").is_dir());

    td(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("nothing to do"));
}

#[test]
fn add_list_done_flow() {
    let dir = tempfile::tempdir().expect("tempdir");

    let added = json_output(td(dir.path()).args(["--json", "add", "Buy", "milk"]));
    assert_eq!(added["schema_version"], "td.v1");
    assert_eq!(added["command"], "add");
    assert_eq!(added["status"], "success");
    assert_eq!(added["data"]["text"], "Buy milk");
    let id = added["data"]["id"].as_str().unwrap().to_string();

    td(dir.path())
        .args(["done", &id[..8]])
        .assert()
        .success()
        .stdout(contains("Task completed"));

    let listed = json_output(td(dir.path()).args(["--json", "ls", "--filter", "active"]));
    assert_eq!(listed["data"]["tasks"].as_array().unwrap().len(), 0);
    assert_eq!(listed["data"]["stats"]["total"], 1);
    assert_eq!(listed["data"]["stats"]["completed"], 1);

    td(dir.path())
        .arg("ls")
        .assert()
        .success()
        .stdout(contains("[x]").and(contains("Buy milk")));
}

#[test]
fn overlong_text_exits_with_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let text = "x".repeat(201);

    td(dir.path())
        .args(["add", &text])
        .assert()
        .code(2)
        .stderr(contains("Invalid task"));

    let stats = json_output(td(dir.path()).args(["--json", "stats"]));
    assert_eq!(stats["data"]["total"], 0);
}

#[test]
fn unknown_task_reports_json_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = td(dir.path())
        .args(["--json", "rm", "deadbeef"])
        .output()
        .expect("run td");
    assert_eq!(output.status.code(), Some(2));

    let envelope: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["command"], "rm");
    assert_eq!(envelope["error"]["kind"], "user_error");
    assert_eq!(envelope["error"]["details"]["id"], "deadbeef");
}

#[test]
fn image_attachment_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("pic.png");
    let bytes = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];
    std::fs::write(&image, bytes).unwrap();

    let added = json_output(
        td(dir.path()).args(["--json", "add", "With picture", "--image", image.to_str().unwrap()]),
    );
    let id = added["data"]["id"].as_str().unwrap().to_string();
    assert!(added["data"]["attachmentRef"].is_string());

    let out = dir.path().join("copy.png");
    let fetched = json_output(td(dir.path()).args([
        "--json",
        "image",
        "get",
        &id,
        "--out",
        out.to_str().unwrap(),
    ]));
    assert_eq!(fetched["command"], "image get");
    assert_eq!(fetched["data"]["mime"], "image/png");
    assert_eq!(std::fs::read(&out).unwrap(), bytes);

    let removed = json_output(td(dir.path()).args(["--json", "rm", &id]));
    assert_eq!(removed["data"]["blobs_deleted"], 1);

    let gc = json_output(td(dir.path()).args(["--json", "image", "gc"]));
    assert_eq!(gc["data"]["swept"].as_array().unwrap().len(), 0);
}

#[test]
fn ics_export_to_stdout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let added = json_output(td(dir.path()).args([
        "--json",
        "add",
        "Dentist",
        "--due",
        "2024-05-01T09:00",
    ]));
    let id = added["data"]["id"].as_str().unwrap().to_string();

    td(dir.path())
        .args(["ics", &id, "--out", "-"])
        .assert()
        .success()
        .stdout(contains("DTSTART:20240501T090000Z").and(contains("SUMMARY:Dentist")));

    td(dir.path())
        .args(["ics", &id])
        .assert()
        .success();
    assert!(dir.path().join("task-Dentist.ics").is_file());
}

#[test]
fn shell_confirms_before_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    td(dir.path()).args(["add", "Walk dog"]).assert().success();

    let listed = json_output(td(dir.path()).args(["--json", "ls"]));
    let id = listed["data"]["tasks"][0]["id"].as_str().unwrap().to_string();

    td(dir.path())
        .arg("shell")
        .write_stdin(format!("rm {id}\nno\nrm {id}\ny\nstats\nquit\n"))
        .assert()
        .success()
        .stdout(contains("delete cancelled").and(contains("0 total")));
}

#[test]
fn cache_status_without_install() {
    let dir = tempfile::tempdir().expect("tempdir");
    td(dir.path())
        .args(["cache", "status"])
        .assert()
        .success()
        .stdout(contains("no namespaces installed"));

    td(dir.path())
        .args(["cache", "activate"])
        .assert()
        .code(4)
        .stderr(contains("td cache install"));
}
