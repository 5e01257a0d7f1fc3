//! End-to-end tests for the dirwatch binary

mod common;

use anyhow::Result;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_limits() -> Result<()> {
    if !std::path::Path::new("/proc/sys/fs/inotify/max_user_watches").exists() {
        return Ok(());
    }
    let dir = TempDir::new()?;
    let result = dirwatch!(dir.path(), "limits").assert_success()?;

    assert!(result.contains_stdout("max_user_watches"));
    assert!(result.contains_stdout("max_queued_events"));
    Ok(())
}

#[test]
fn test_watch_missing_path_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let result = dirwatch!(dir.path(), "watch", "missing").assert_failure()?;

    assert!(result.contains_stderr("missing"));
    Ok(())
}

#[test]
fn test_watch_reports_batches_as_json() -> Result<()> {
    let dir = TempDir::new()?;
    let root = dir.path().join("root");
    fs::create_dir(&root)?;
    fs::write(root.join("existing"), b"1")?;

    let root_arg = root.to_string_lossy().to_string();
    let watch = dirwatch!(
        dir.path(),
        "watch",
        root_arg.as_str(),
        "--json",
        "--interval-ms",
        "30"
    )
    .spawn()?;

    let ready = watch.next_record("ready", TIMEOUT)?;
    assert_eq!(ready["children"], 1);

    fs::File::create(root.join("a"))?;

    let batch = watch.next_record("batch", TIMEOUT)?;
    assert_eq!(batch["self_changed"], false);
    assert_eq!(batch["changes"]["a"], "CREATE");
    Ok(())
}

#[test]
fn test_watch_exits_when_root_is_deleted() -> Result<()> {
    let dir = TempDir::new()?;
    let root = dir.path().join("root");
    fs::create_dir(&root)?;

    let root_arg = root.to_string_lossy().to_string();
    let mut watch =
        dirwatch!(dir.path(), "watch", root_arg.as_str(), "--json", "--immediate").spawn()?;
    watch.next_record("ready", TIMEOUT)?;

    fs::remove_dir(&root)?;

    // the root may report an attribute change first
    let event = loop {
        let event = watch.next_record("event", TIMEOUT)?;
        if event["event"] == "DELETE" {
            break event;
        }
    };
    assert!(event["child"].is_null());

    let closed = watch.next_record("closed", TIMEOUT)?;
    assert_eq!(closed["reason"], "RootGone");
    assert_eq!(watch.wait_exit(TIMEOUT)?, 0);
    Ok(())
}

#[test]
fn test_watch_limit_reports_incomplete() -> Result<()> {
    let dir = TempDir::new()?;
    let root = dir.path().join("root");
    for name in ["a", "b", "c"] {
        fs::create_dir_all(root.join(name))?;
    }

    let root_arg = root.to_string_lossy().to_string();
    let watch = dirwatch!(
        dir.path(),
        "watch",
        root_arg.as_str(),
        "--json",
        "--watch-limit",
        "1"
    )
    .spawn()?;

    let incomplete = watch.next_record("incomplete", TIMEOUT)?;
    assert!(incomplete["reason"].as_str().unwrap_or_default().contains("limit"));
    Ok(())
}
