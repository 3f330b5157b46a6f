use assert_cmd::Command;
use predicates::prelude::*;

fn vault() -> anyhow::Result<tempfile::TempDir> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    std::fs::write(root.join("Welcome.md"), "# Welcome\n\nStart at [[Projects]].\n")?;
    std::fs::write(root.join("Projects.md"), "# Projects\n")?;
    std::fs::write(root.join("Loose.md"), "# Loose\n")?;
    Ok(temp)
}

fn oxg() -> anyhow::Result<Command> {
    let mut cmd = Command::cargo_bin("oxg")?;
    cmd.env_remove("OBSIDIAN_VAULT")
        .env_remove("OXIGATE_CONFIG")
        .env("RUST_LOG", "warn");
    Ok(cmd)
}

#[test]
fn help_works_without_a_vault() -> anyhow::Result<()> {
    oxg()?
        .args(["help", "search", "--verbosity", "normal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("search_notes(query; [tags, limit, use_regex])"))
        .stdout(predicate::str::contains("(max 200)"));

    oxg()?
        .args(["help", "spells"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Unknown topic: spells"));
    Ok(())
}

#[test]
fn vault_is_required_for_vault_commands() -> anyhow::Result<()> {
    oxg()?
        .args(["lookup", "find notes about rust"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--vault is required"));
    Ok(())
}

#[test]
fn lookup_prints_routing_result() -> anyhow::Result<()> {
    let temp = vault()?;
    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .args(["lookup", "show backlinks", "--note-hint", "Projects"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""action": "get_backlinks""#))
        .stdout(predicate::str::contains(r#""title": "Projects""#));
    Ok(())
}

#[test]
fn exec_prints_envelope_and_sets_exit_code() -> anyhow::Result<()> {
    let temp = vault()?;
    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .args(["exec", "get_backlinks", "--args", r#"{"title":"Projects"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""success": true"#))
        .stdout(predicate::str::contains("Welcome.md"));

    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .args(["exec", "get_graph", "--args", r#"{"depth":7}"#])
        .assert()
        .failure()
        .stdout(predicate::str::contains("depth 7 exceeds maximum 3"));
    Ok(())
}

#[test]
fn orphans_and_resolve() -> anyhow::Result<()> {
    let temp = vault()?;
    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .arg("orphans")
        .assert()
        .success()
        .stdout("Loose.md\n");

    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .args(["resolve", "projects"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""match_type": "exact""#));
    Ok(())
}

#[test]
fn serve_answers_each_line() -> anyhow::Result<()> {
    let temp = vault()?;
    let input = concat!(
        r#"{"op":"execute","action":"list_tags"}"#,
        "\n",
        r#"{"op":"help","topic":"admin"}"#,
        "\n",
        "garbage\n",
    );
    let output = oxg()?
        .arg("--vault")
        .arg(temp.path())
        .arg("serve")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines: Vec<serde_json::Value> = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["success"], serde_json::json!(true));
    assert_eq!(lines[0]["bundle"], serde_json::json!("knowledge"));
    assert!(lines[1]["text"].as_str().unwrap_or("").contains("health_check"));
    assert_eq!(lines[2]["success"], serde_json::json!(false));
    Ok(())
}

#[test]
fn empty_vault_fails_fast() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    oxg()?
        .arg("--vault")
        .arg(temp.path())
        .arg("orphans")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no markdown notes"));
    Ok(())
}
