use oxigate::{Frontmatter, NoteUpdate, Vault, VaultManager};

fn open(root: &std::path::Path) -> anyhow::Result<VaultManager> {
    Ok(VaultManager::new(Vault::open(root)?)?)
}

fn seed() -> anyhow::Result<tempfile::TempDir> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("Welcome.md"), "# Welcome\n")?;
    Ok(temp)
}

#[test]
fn create_then_read_round_trips() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;

    let mut fm = Frontmatter::new();
    fm.insert("status", serde_yaml::Value::from("draft"));
    let body = "# Plan\n\nFirst line.\n\n- [[Welcome]]\n";
    let created = m.create("Projects/Plan", body, Some(fm.clone()))?;
    assert_eq!(created.path.to_string(), "projects/Plan.md");

    let read = m.read("projects/Plan.md")?;
    assert_eq!(read.body, body);
    assert_eq!(read.frontmatter, fm);
    assert_eq!(read.wiki_links.len(), 1);
    assert!(read.warnings.is_empty());

    Ok(())
}

#[test]
fn create_refuses_existing_note() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;

    let err = m.create("Welcome.md", "again", None).unwrap_err();
    assert!(matches!(err, oxigate::Error::AlreadyExists(_)), "{err}");
    assert_eq!(std::fs::read_to_string(temp.path().join("Welcome.md"))?, "# Welcome\n");

    Ok(())
}

#[test]
fn hash_prefixed_tags_are_corrected_with_warning() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;

    let mut fm = Frontmatter::new();
    fm.set_tags(["#arch".to_string()]);
    let note = m.create("Design.md", "body\n", Some(fm))?;

    assert_eq!(note.frontmatter.tags(), vec!["arch".to_string()]);
    assert_eq!(note.warnings.len(), 1);
    let warning = note.warnings[0].to_string();
    assert!(warning.contains("#arch"), "{warning}");
    assert!(warning.contains("'arch'"), "{warning}");

    let on_disk = std::fs::read_to_string(temp.path().join("Design.md"))?;
    assert!(!on_disk.contains("#arch"), "{on_disk}");

    Ok(())
}

#[test]
fn update_merges_frontmatter_and_appends() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;
    std::fs::write(
        temp.path().join("Log.md"),
        "---\nstatus: open\nowner: me\n---\nday one\n",
    )?;

    let mut patch = Frontmatter::new();
    patch.insert("status", serde_yaml::Value::from("closed"));
    m.update(
        "Log.md",
        NoteUpdate {
            frontmatter: Some(patch),
            ..NoteUpdate::default()
        },
    )?;
    let note = m.append("Log", "day two")?;

    assert_eq!(note.frontmatter.get_str("status"), Some("closed"));
    assert_eq!(note.frontmatter.get_str("owner"), Some("me"));
    assert_eq!(note.body, "day one\n\nday two");

    let mut names: Vec<String> = std::fs::read_dir(temp.path())?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    names.sort();
    assert_eq!(names, vec!["Log.md", "Welcome.md"]);

    Ok(())
}

#[test]
fn move_creates_directories_and_keeps_content() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;
    std::fs::write(temp.path().join("Draft.md"), "draft text\n")?;
    let before = m.read("Draft.md")?;

    let moved = m.move_note("Draft.md", "archive/2025/Final.md")?;
    assert_eq!(moved.path.to_string(), "archive/2025/Final.md");
    assert!(temp.path().join("archive/2025/Final.md").is_file());
    assert_eq!(moved.body, before.body);

    let err = m.read("Draft.md").unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert_eq!(m.read("archive/2025/Final.md")?.body, "draft text\n");

    let again = m.move_note("Draft.md", "archive/2025/Final.md").unwrap_err();
    assert!(again.is_not_found(), "{again}");

    Ok(())
}

#[test]
fn move_into_uppercase_directory_lowercases_it() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;
    std::fs::write(temp.path().join("Idea.md"), "x\n")?;

    let moved = m.move_note("Idea.md", "Archive/Ideas/Idea.md")?;
    assert_eq!(moved.path.to_string(), "archive/ideas/Idea.md");

    Ok(())
}

#[test]
fn delete_removes_note_from_index() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;
    std::fs::write(temp.path().join("Tmp.md"), "x\n")?;
    assert!(m.index()?.len() == 2);

    let deleted = m.delete("Tmp.md")?;
    assert_eq!(deleted.to_string(), "Tmp.md");
    assert!(!temp.path().join("Tmp.md").exists());
    assert_eq!(m.index()?.len(), 1);

    Ok(())
}

#[test]
fn traversal_is_rejected() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;

    let err = m.create("../escape.md", "x", None).unwrap_err();
    assert!(matches!(err, oxigate::Error::InvalidPath(_)), "{err}");

    Ok(())
}

#[test]
fn empty_vault_refuses_to_open() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("notes.txt"), "not markdown")?;

    let err = Vault::open(temp.path()).unwrap_err();
    assert!(matches!(err, oxigate::Error::EmptyVault(_)), "{err}");

    Ok(())
}

#[test]
fn sections_and_blocks_can_be_rewritten() -> anyhow::Result<()> {
    let temp = seed()?;
    let m = open(temp.path())?;
    std::fs::write(
        temp.path().join("Doc.md"),
        "# Doc\n\n## Intro\nold intro\n\n## Next\nkept\n\nA claim. ^c1\n",
    )?;

    let section = m.read_section("Doc.md", "intro")?;
    assert!(section.content.contains("old intro"));

    m.update_section("Doc.md", "Intro", "new intro\n")?;
    m.update_block("Doc.md", "^c1", "A better claim.")?;

    let body = m.read("Doc.md")?.body;
    assert!(body.contains("## Intro\nnew intro"), "{body}");
    assert!(body.contains("kept"), "{body}");
    assert!(body.contains("A better claim. ^c1"), "{body}");
    assert!(!body.contains("old intro"), "{body}");

    Ok(())
}

#[test]
fn malformed_frontmatter_keeps_body_readable() -> anyhow::Result<()> {
    let temp = seed()?;
    std::fs::write(
        temp.path().join("Broken.md"),
        "---\ntags: [a\n---\n\n# Broken\nstill here\n",
    )?;
    let m = open(temp.path())?;

    let note = m.read("Broken.md")?;
    assert!(note.frontmatter.is_empty());
    assert!(note.body.contains("still here"));
    assert_eq!(note.warnings.len(), 1);
    assert!(note.warnings[0].to_string().starts_with("malformed frontmatter"));

    Ok(())
}
