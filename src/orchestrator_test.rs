use crate::config::{Config, ConfigError};
use crate::observer::LoggingObserver;
use crate::orchestrator::*;
use crate::peer::{MemoryBus, MessageKind, NotificationBridge, PubSub, PushNotice};
use crate::sync::{FlushOutcome, GitError, MockGitOps, SyncEngine, SyncError, SyncSettings};
use crate::watch::{ChangeCoalescer, ChangeEvent, ChangeKind, PlaceholderChange, PriorityTable};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn mock_output(code: i32, stdout: &str, stderr: &str) -> Output {
    Output {
        status: ExitStatus::from_raw(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

fn ok() -> Result<Output, GitError> {
    Ok(mock_output(0, "", ""))
}

/// Mock that initializes `.git` and reports `dirty` once, then a clean tree.
fn mock_repo(dirty: &'static str, remotes: &'static str) -> MockGitOps {
    let mut mock = MockGitOps::new();
    mock.expect_init().returning(|path| {
        fs::create_dir_all(path.join(".git")).unwrap();
        ok()
    });
    let calls = AtomicUsize::new(0);
    mock.expect_status_porcelain().returning(move |_| {
        let out = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            dirty
        } else {
            ""
        };
        Ok(mock_output(0, out, ""))
    });
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().returning(|_, _, _| ok());
    mock.expect_remotes()
        .returning(move |_| Ok(mock_output(0, remotes, "")));
    mock
}

fn fast_config(root: &std::path::Path) -> Config {
    Config {
        quiet_period: Duration::from_millis(200),
        tick: Duration::from_millis(50),
        ..Config::for_root(root)
    }
}

#[test]
fn test_new_opens_repository() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("data");

    let orchestrator = Orchestrator::new(
        Config::for_root(&root),
        mock_repo("", ""),
        MemoryBus::new(),
        Arc::new(LoggingObserver),
    )
    .unwrap();

    assert!(root.join(".git").is_dir());
    assert!(root.join(".git/info/exclude").is_file());
    assert!(orchestrator.engine().is_initialized());
    assert!(!orchestrator.is_running());
}

#[test]
fn test_new_rejects_invalid_config() {
    let temp = TempDir::new().unwrap();
    let config = Config {
        channel: String::new(),
        ..Config::for_root(temp.path())
    };

    let err = Orchestrator::new(
        config,
        MockGitOps::new(),
        MemoryBus::new(),
        Arc::new(LoggingObserver),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        OrchestratorError::Config(ConfigError::EmptyField { field: "channel" })
    ));
}

#[test]
fn test_new_fails_when_repository_cannot_be_created() {
    let temp = TempDir::new().unwrap();
    let mut mock = MockGitOps::new();
    mock.expect_init().returning(|_| Err(GitError::GitNotFound));

    let err = Orchestrator::new(
        Config::for_root(temp.path()),
        mock,
        MemoryBus::new(),
        Arc::new(LoggingObserver),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        OrchestratorError::Sync(SyncError::RepositoryInit { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_pass_maintains_placeholders_and_commits() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    fs::create_dir_all(root.join("docs")).unwrap();

    let engine = Arc::new(SyncEngine::new(
        mock_repo("?? docs/\0", ""),
        &root,
        SyncSettings::default(),
    ));
    let bridge = NotificationBridge::new(Arc::new(MemoryBus::new()), engine.clone(), "git_sync");
    let coalescer = Arc::new(ChangeCoalescer::new(&root, PriorityTable::default()));

    let events = vec![ChangeEvent::new(
        root.join("docs/old.txt"),
        ChangeKind::Deleted,
        false,
    )];
    let pass = run_pass(events, engine, coalescer, &bridge).await;

    assert_eq!(pass.summary, "[- docs/old.txt]");
    assert_eq!(
        pass.placeholders,
        vec![PlaceholderChange::Created(root.join("docs/.empty"))]
    );
    assert!(root.join("docs/.empty").is_file());
    assert_eq!(pass.comment(), Some("[ ?? docs/ ]"));
    assert!(matches!(pass.outcome, Ok(FlushOutcome::Committed { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_pass_announces_push() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();

    let mut mock = mock_repo("?? a.txt\0", "origin\n");
    mock.expect_ls_remote_branch().returning(|_, _, _| ok());
    mock.expect_push().times(1).returning(|_, _, _| ok());
    let engine = Arc::new(SyncEngine::new(mock, &root, SyncSettings::default()));
    let bus = Arc::new(MemoryBus::new());
    let bridge = NotificationBridge::new(bus.clone(), engine.clone(), "git_sync");
    let coalescer = Arc::new(ChangeCoalescer::new(&root, PriorityTable::default()));
    let mut sub = bus.subscribe("git_sync").await.unwrap();

    let events = vec![ChangeEvent::new(root.join("a.txt"), ChangeKind::Created, false)];
    let pass = run_pass(events, engine, coalescer, &bridge).await;
    assert!(matches!(pass.outcome, Ok(FlushOutcome::Pushed { .. })));

    let notice = timeout(Duration::from_secs(5), async {
        loop {
            let message = sub.recv().await.unwrap();
            if message.kind == MessageKind::Message {
                return serde_json::from_str::<PushNotice>(&message.data).unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(notice.origin, bridge.origin());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_pass_clean_tree_does_not_publish() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();

    let mut mock = mock_repo("", "origin\n");
    mock.expect_push().never();
    let engine = Arc::new(SyncEngine::new(mock, &root, SyncSettings::default()));
    let bus = Arc::new(MemoryBus::new());
    let bridge = NotificationBridge::new(bus.clone(), engine.clone(), "git_sync");
    let coalescer = Arc::new(ChangeCoalescer::new(&root, PriorityTable::default()));

    let events = vec![ChangeEvent::new(root.join("a.txt"), ChangeKind::Modified, false)];
    let pass = run_pass(events, engine, coalescer, &bridge).await;

    assert!(matches!(pass.outcome, Ok(FlushOutcome::Clean)));
    assert_eq!(pass.comment(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_flushes_after_quiet_period_and_stops() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("data");

    let mut orchestrator = Orchestrator::new(
        fast_config(&root),
        mock_repo("?? notes.txt\0", ""),
        MemoryBus::new(),
        Arc::new(LoggingObserver),
    )
    .unwrap();
    let mut passes = orchestrator.passes();

    orchestrator.start().await.unwrap();
    assert!(orchestrator.is_running());
    assert!(orchestrator.bridge().is_running());

    fs::write(root.join("notes.txt"), "hello").unwrap();

    let comment = timeout(Duration::from_secs(10), async {
        loop {
            let pass = passes.recv().await.unwrap();
            if let Some(comment) = pass.comment() {
                return comment.to_string();
            }
        }
    })
    .await
    .expect("no flush after quiet period");
    assert_eq!(comment, "[ ?? notes.txt ]");

    orchestrator.stop().await;
    assert!(!orchestrator.is_running());
    assert!(!orchestrator.bridge().is_running());

    // Stopping twice is a no-op
    orchestrator.stop().await;
}
