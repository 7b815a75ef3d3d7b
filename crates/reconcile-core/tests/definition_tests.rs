mod common;

use common::*;
use reconcile_core::tags::TagSet;
use reconcile_core::{DefinitionLoader, LoadError, RunnerTemplate};

fn host_tags() -> TagSet {
    ["host1", "host"].iter().map(|s| s.to_string()).collect()
}

fn load(prefix: &Prefix) -> Result<Vec<reconcile_core::ExecutorDefinition>, LoadError> {
    let template = RunnerTemplate::load_from(&prefix.path().join("config.template"))?;
    let capture = host_tags;
    DefinitionLoader::new(HOST, &capture)
        .with_scheduler(Some("slurm"))
        .load_dir(&prefix.path().join("executors"), &template)
}

#[test]
fn name_defaults_to_file_stem() -> anyhow::Result<()> {
    let prefix = Prefix::new(&template(false));
    prefix
        .declare("shell.toml", &executor(GITLAB, "shell"))
        .declare("other.toml", &format!("name = \"docker-x\"\n{}", executor(OTHER, "docker")));

    let defs = load(&prefix)?;
    let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["docker-x", "shell"]);
    assert_eq!(defs[1].description, "host1-shell");
    assert_eq!(defs[1].properties["builds_dir"].as_str(), Some("/tmp/{hostname}"));
    Ok(())
}

#[test]
fn non_toml_files_are_ignored() -> anyhow::Result<()> {
    let prefix = Prefix::new(&template(false));
    prefix
        .declare("shell.toml", &executor(GITLAB, "shell"))
        .declare("README", "not a declaration")
        .declare("shell.toml.bak", "url = ");
    assert_eq!(load(&prefix)?.len(), 1);
    Ok(())
}

#[test]
fn missing_directory_means_nothing_desired() -> anyhow::Result<()> {
    let prefix = Prefix::new(&template(false));
    std::fs::remove_dir(prefix.path().join("executors"))?;
    assert!(load(&prefix)?.is_empty());
    Ok(())
}

#[test]
fn tags_combine_declared_host_and_kind() -> anyhow::Result<()> {
    let prefix = Prefix::new(&template(false));
    prefix.declare(
        "batch.toml",
        &format!("tags = [\"gpu\"]\n{}", executor(GITLAB, "batch")),
    );
    let defs = load(&prefix)?;
    let expected: TagSet = ["batch", "gpu", "host", "host1", "slurm"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(defs[0].tags, expected);
    Ok(())
}

#[test]
fn duplicate_names_are_rejected() {
    let prefix = Prefix::new(&template(false));
    prefix
        .declare("a.toml", &format!("name = \"same\"\n{}", executor(GITLAB, "shell")))
        .declare("b.toml", &format!("name = \"same\"\n{}", executor(OTHER, "shell")));
    assert!(matches!(load(&prefix), Err(LoadError::Invalid { .. })));
}

#[test]
fn unknown_url_is_rejected() {
    let prefix = Prefix::new(&template(false));
    prefix.declare("a.toml", &executor("https://elsewhere.example.com", "shell"));
    let err = load(&prefix).unwrap_err();
    assert!(err.to_string().contains("elsewhere.example.com"));
}

#[test]
fn managed_keys_are_rejected() {
    for key in ["id = 3", "token = \"t\"", "description = \"d\""] {
        let prefix = Prefix::new(&template(false));
        prefix.declare("a.toml", &format!("{}\n{}", key, executor(GITLAB, "shell")));
        assert!(
            matches!(load(&prefix), Err(LoadError::Invalid { .. })),
            "{} accepted",
            key
        );
    }
}

#[test]
fn names_with_placeholder_characters_are_rejected() {
    let prefix = Prefix::new(&template(false));
    prefix.declare("a.toml", &format!("name = \"a.b\"\n{}", executor(GITLAB, "shell")));
    assert!(matches!(load(&prefix), Err(LoadError::Invalid { .. })));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let prefix = Prefix::new(&template(false));
    prefix.declare("a.toml", "url = [");
    assert!(matches!(load(&prefix), Err(LoadError::Parse { .. })));
}

#[test]
fn tag_schema_violation_names_the_executor() {
    let prefix = Prefix::new(&template(false));
    prefix.declare("shell.toml", &executor(GITLAB, "shell"));
    std::fs::write(
        prefix.path().join("tag-schema.json"),
        r#"{"required": ["gpu"]}"#,
    )
    .unwrap();

    let err = prefix.session(reconcile_core::Mode::Persisted).load().unwrap_err();
    assert!(
        matches!(err, reconcile_core::ReconcileError::Load(LoadError::TagSchema { ref name, .. }) if name == "shell")
    );
}

#[test]
fn host_wide_substitution_keys_are_not_executor_names() {
    for decl in [
        ("hostname.toml", executor(GITLAB, "shell")),
        ("a.toml", format!("name = \"name\"\n{}", executor(GITLAB, "shell"))),
    ] {
        let prefix = Prefix::new(&template(false));
        prefix.declare(decl.0, &decl.1);
        let err = load(&prefix).unwrap_err();
        assert!(
            matches!(err, LoadError::Invalid { ref reason, .. } if reason.contains("reserved")),
            "{} accepted: {}",
            decl.0,
            err
        );
    }
}
