use crate::config::CommentSource;
use crate::observer::recording::RecordingObserver;
use crate::observer::{Milestone, Stage};
use crate::sync::conflict::{RESOLUTION_MESSAGE, ResolutionAction};
use crate::sync::engine::*;
use crate::sync::git::{GitError, MockGitOps, Side};
use crate::sync::status::parse_signature;
use mockall::predicate::*;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

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

fn failed(command: &str, output: &str) -> GitError {
    GitError::NonZeroExit {
        command: command.to_string(),
        code: 1,
        output: output.to_string(),
    }
}

/// Status that reports each entry of `responses` in turn, then stays clean.
fn expect_status_sequence(mock: &mut MockGitOps, responses: &'static [&'static str]) {
    let calls = AtomicUsize::new(0);
    mock.expect_status_porcelain().returning(move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(mock_output(0, responses.get(n).copied().unwrap_or(""), ""))
    });
}

fn expect_remote(mock: &mut MockGitOps) {
    mock.expect_remotes()
        .returning(|_| Ok(mock_output(0, "origin\n", "")));
}

fn expect_remote_branch(mock: &mut MockGitOps) {
    mock.expect_ls_remote_branch()
        .with(always(), eq("origin"), eq("master"))
        .returning(|_, _, _| {
            Ok(mock_output(
                0,
                "1111111111111111111111111111111111111111\trefs/heads/master\n",
                "",
            ))
        });
}

fn engine(mock: MockGitOps, root: PathBuf) -> SyncEngine<MockGitOps> {
    SyncEngine::new(mock, root, SyncSettings::default())
}

#[test]
fn test_is_initialized_false() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(MockGitOps::new(), temp_dir.path().to_path_buf());

    assert!(!engine.is_initialized());
}

#[test]
fn test_is_initialized_true() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
    let engine = engine(MockGitOps::new(), temp_dir.path().to_path_buf());

    assert!(engine.is_initialized());
}

#[test]
fn test_open_creates_root_and_repository() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");

    let mut mock = MockGitOps::new();
    let git_dir = root.join(".git");
    mock.expect_init()
        .with(eq(root.clone()))
        .times(1)
        .returning(move |_| {
            fs::create_dir_all(&git_dir).unwrap();
            ok()
        });

    let engine = engine(mock, root.clone());
    engine.open().unwrap();

    assert!(root.exists());
    let exclude = fs::read_to_string(root.join(".git/info/exclude")).unwrap();
    assert!(exclude.lines().any(|l| l == "*.swp"));
    assert!(exclude.lines().any(|l| l == ".DS_Store"));
}

#[test]
fn test_open_existing_repository_keeps_excludes_unique() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    fs::create_dir_all(root.join(".git/info")).unwrap();
    fs::write(root.join(".git/info/exclude"), "# local\n*.swp").unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_init().never();

    let engine = engine(mock, root.clone());
    engine.open().unwrap();
    engine.open().unwrap();

    let exclude = fs::read_to_string(root.join(".git/info/exclude")).unwrap();
    assert!(exclude.starts_with("# local\n*.swp\n"));
    assert_eq!(exclude.lines().filter(|l| *l == "*.swp").count(), 1);
    assert_eq!(exclude.lines().filter(|l| *l == ".DS_Store").count(), 1);
}

#[test]
fn test_open_failure_is_fatal() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_init().returning(|_| Err(GitError::GitNotFound));

    let err = engine(mock, temp_dir.path().to_path_buf())
        .open()
        .unwrap_err();
    assert!(matches!(err, SyncError::RepositoryInit { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_commit_clean_tree_is_noop() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_status_porcelain()
        .times(1)
        .returning(|_| Ok(mock_output(0, "", "")));
    mock.expect_add_all().never();
    mock.expect_commit().never();

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(engine.commit("[+ a.txt]").unwrap(), None);
}

#[test]
fn test_commit_twice_without_changes_commits_once() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &["?? a.txt\0"]);
    mock.expect_add_all().times(1).returning(|_| ok());
    mock.expect_commit()
        .withf(|_, message, identity| message == "[ ?? a.txt ]" && identity.name == "gitsync")
        .times(1)
        .returning(|_, _, _| ok());

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(
        engine.commit("").unwrap(),
        Some("[ ?? a.txt ]".to_string())
    );
    assert_eq!(engine.commit("").unwrap(), None);
}

#[test]
fn test_commit_with_event_summary() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_status_porcelain()
        .returning(|_| Ok(mock_output(0, "?? a.txt\0", "")));
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit()
        .with(always(), eq("[+ a.txt]"), always())
        .times(1)
        .returning(|_, _, _| ok());

    let settings = SyncSettings {
        comment_source: CommentSource::Events,
        ..SyncSettings::default()
    };
    let engine = SyncEngine::new(mock, temp_dir.path(), settings);
    engine.commit("[+ a.txt]").unwrap();
}

#[test]
fn test_commit_empty_event_summary_falls_back_to_status() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_status_porcelain()
        .returning(|_| Ok(mock_output(0, " D gone.txt\0", "")));
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit()
        .with(always(), eq("[  D gone.txt ]"), always())
        .times(1)
        .returning(|_, _, _| ok());

    let settings = SyncSettings {
        comment_source: CommentSource::Events,
        ..SyncSettings::default()
    };
    SyncEngine::new(mock, temp_dir.path(), settings)
        .commit("")
        .unwrap();
}

#[test]
fn test_has_remote() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_remotes()
        .returning(|_| Ok(mock_output(0, "upstream\norigin\n", "")));

    assert!(engine(mock, temp_dir.path().to_path_buf()).has_remote().unwrap());
}

#[test]
fn test_has_remote_other_name_only() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_remotes()
        .returning(|_| Ok(mock_output(0, "upstream\n", "")));

    assert!(!engine(mock, temp_dir.path().to_path_buf()).has_remote().unwrap());
}

#[test]
fn test_flush_clean_tree_never_commits() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_status_porcelain()
        .returning(|_| Ok(mock_output(0, "", "")));
    mock.expect_commit().never();
    mock.expect_fetch().never();
    mock.expect_push().never();

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(engine.flush("").unwrap(), FlushOutcome::Clean);
}

#[test]
fn test_flush_without_remote_keeps_commit_local() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &["?? a.txt\0"]);
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().times(1).returning(|_, _, _| ok());
    mock.expect_remotes().returning(|_| ok());
    mock.expect_fetch().never();
    mock.expect_push().never();

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(
        engine.flush("").unwrap(),
        FlushOutcome::Committed {
            comment: "[ ?? a.txt ]".to_string()
        }
    );
}

#[test]
fn test_flush_merges_and_pushes() {
    let temp_dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &[" M a.txt\0"]);
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().times(1).returning(|_, _, _| ok());
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch()
        .with(always(), eq("origin"), eq("master"))
        .times(1)
        .returning(|_, _, _| ok());
    mock.expect_merge()
        .withf(|_, reference, identity| reference == "FETCH_HEAD" && identity.name == "gitsync")
        .times(1)
        .returning(|_, _, _| Ok(mock_output(0, "Already up to date.\n", "")));
    mock.expect_push()
        .with(always(), eq("origin"), eq("master"))
        .times(1)
        .returning(|_, _, _| ok());

    let engine = engine(mock, temp_dir.path().to_path_buf()).with_observer(observer.clone());
    let outcome = engine.flush("").unwrap();

    assert_eq!(
        outcome,
        FlushOutcome::Pushed {
            comment: "[  M a.txt ]".to_string(),
            merge: MergeOutcome::Merged,
        }
    );
    assert_eq!(observer.milestones(), vec![Milestone::BeforePush]);
    assert!(observer.failures().is_empty());
}

#[test]
fn test_flush_to_empty_remote_skips_fetch() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &["?? a.txt\0"]);
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().returning(|_, _, _| ok());
    expect_remote(&mut mock);
    mock.expect_ls_remote_branch().returning(|_, _, _| ok());
    mock.expect_fetch().never();
    mock.expect_merge().never();
    mock.expect_push().times(1).returning(|_, _, _| ok());

    let outcome = engine(mock, temp_dir.path().to_path_buf())
        .flush("")
        .unwrap();
    assert!(matches!(
        outcome,
        FlushOutcome::Pushed {
            merge: MergeOutcome::NoRemoteBranch,
            ..
        }
    ));
}

#[test]
fn test_flush_fetch_failure_aborts_before_push() {
    let temp_dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &["?? a.txt\0"]);
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().returning(|_, _, _| ok());
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch().returning(|_, _, _| {
        Err(GitError::Timeout {
            command: "fetch origin master".to_string(),
            after: std::time::Duration::from_secs(120),
        })
    });
    mock.expect_push().never();

    let engine = engine(mock, temp_dir.path().to_path_buf()).with_observer(observer.clone());
    let err = engine.flush("").unwrap_err();

    assert!(matches!(err, SyncError::NonConflictMergeFailure { .. }));
    assert!(err.is_recoverable());
    let failures = observer.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Stage::Flush);
    assert!(observer.milestones().is_empty());
}

#[test]
fn test_flush_merge_failure_without_conflicts() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &["?? a.txt\0"]);
    mock.expect_add_all().returning(|_| ok());
    mock.expect_commit().times(1).returning(|_, _, _| ok());
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch().returning(|_, _, _| ok());
    mock.expect_merge().returning(|_, _, _| {
        Err(failed(
            "merge --no-edit FETCH_HEAD",
            "fatal: refusing to merge unrelated histories",
        ))
    });
    mock.expect_push().never();

    let err = engine(mock, temp_dir.path().to_path_buf())
        .flush("")
        .unwrap_err();
    match err {
        SyncError::NonConflictMergeFailure { remote, branch, .. } => {
            assert_eq!(remote, "origin");
            assert_eq!(branch, "master");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_flush_conflict_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    let notes = root.join("notes.txt");
    fs::write(&notes, "bob version").unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &[" M notes.txt\0", "UU notes.txt\0"]);
    mock.expect_add_all().times(2).returning(|_| ok());
    let commits = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = commits.clone();
    mock.expect_commit()
        .times(2)
        .returning(move |_, message, identity| {
            recorded
                .lock()
                .unwrap()
                .push((message.to_string(), identity.clone()));
            ok()
        });
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch().returning(|_, _, _| ok());
    let conflicted = notes.clone();
    mock.expect_merge().times(1).returning(move |_, _, _| {
        fs::write(&conflicted, "<<<<<<< HEAD\nbob version\n=======\nalice version\n>>>>>>>\n")
            .unwrap();
        Err(failed(
            "merge --no-edit FETCH_HEAD",
            "CONFLICT (content): Merge conflict in notes.txt",
        ))
    });
    mock.expect_unmerged_stages().returning(|_, _| {
        Ok(mock_output(
            0,
            &[1, 2, 3]
                .iter()
                .map(|s| format!("100644 {} {}\tnotes.txt\0", "0".repeat(40), s))
                .collect::<String>(),
            "",
        ))
    });
    let theirs = notes.clone();
    mock.expect_checkout_side()
        .with(always(), eq(Side::Theirs), eq("notes.txt"))
        .returning(move |_, _, _| {
            fs::write(&theirs, "alice version").unwrap();
            ok()
        });
    let ours = notes.clone();
    mock.expect_checkout_side()
        .with(always(), eq(Side::Ours), eq("notes.txt"))
        .returning(move |_, _, _| {
            fs::write(&ours, "bob version").unwrap();
            ok()
        });
    let restored = notes.clone();
    mock.expect_checkout_ref()
        .with(always(), eq("ORIG_HEAD"), eq("notes.txt"))
        .times(1)
        .returning(move |_, _, _| {
            fs::write(&restored, "bob version").unwrap();
            ok()
        });
    mock.expect_commit_signature()
        .with(always(), eq("FETCH_HEAD"))
        .returning(|_, _| Ok(mock_output(0, "Alice\x001700000000\n", "")));
    mock.expect_commit_signature()
        .with(always(), eq("HEAD"))
        .returning(|_, _| Ok(mock_output(0, "Bob\x001699990000\n", "")));
    mock.expect_push().times(1).returning(|_, _, _| ok());

    let engine = engine(mock, root.clone()).with_observer(observer.clone());
    let outcome = engine.flush("").unwrap();

    let d1 = parse_signature(b"Bob\x001699990000").unwrap().stamp();
    let d2 = parse_signature(b"Alice\x001700000000").unwrap().stamp();
    let alice_copy = format!("notes [Alice, {d2}].txt");
    let bob_copy = format!("notes [Bob, {d1}].txt");
    assert_eq!(
        fs::read_to_string(root.join(&alice_copy)).unwrap(),
        "alice version"
    );
    assert_eq!(
        fs::read_to_string(root.join(&bob_copy)).unwrap(),
        "bob version"
    );
    assert_eq!(fs::read_to_string(&notes).unwrap(), "bob version");

    let commits = commits.lock().unwrap();
    assert_eq!(commits[0].1.name, "gitsync");
    assert_eq!(commits[1].0, RESOLUTION_MESSAGE);
    assert_eq!(commits[1].1.name, "git-synchronizer");
    assert_eq!(commits[1].1.email, "synchronizer@test.com");

    match outcome {
        FlushOutcome::Pushed {
            merge: MergeOutcome::Resolved(records),
            ..
        } => {
            assert_eq!(records.len(), 1);
            assert_eq!(
                records[0].action,
                ResolutionAction::KeptBoth {
                    theirs: Some(PathBuf::from(alice_copy)),
                    ours: Some(PathBuf::from(bob_copy)),
                }
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(observer.milestones(), vec![Milestone::BeforePush]);
}

#[test]
fn test_pull_only_never_commits_local_changes() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_status_porcelain().never();
    mock.expect_add_all().never();
    mock.expect_commit().never();
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch().times(1).returning(|_, _, _| ok());
    mock.expect_merge().times(1).returning(|_, _, _| ok());
    mock.expect_push().never();

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(engine.pull_only().unwrap(), MergeOutcome::Merged);
}

#[test]
fn test_pull_only_without_remote() {
    let temp_dir = TempDir::new().unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_remotes().returning(|_| ok());
    mock.expect_fetch().never();

    let engine = engine(mock, temp_dir.path().to_path_buf());
    assert_eq!(engine.pull_only().unwrap(), MergeOutcome::NoRemote);
}

#[test]
fn test_pull_only_failure_reported_to_observer() {
    let temp_dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let mut mock = MockGitOps::new();
    expect_remote(&mut mock);
    mock.expect_ls_remote_branch().returning(|_, _, _| {
        Err(failed(
            "ls-remote --heads origin master",
            "fatal: could not read from remote repository",
        ))
    });

    let engine = engine(mock, temp_dir.path().to_path_buf()).with_observer(observer.clone());
    assert!(engine.pull_only().is_err());
    assert_eq!(observer.failures()[0].0, Stage::PullOnly);
}

#[test]
fn test_failed_resolution_aborts_merge() {
    let temp_dir = TempDir::new().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let mut mock = MockGitOps::new();
    expect_status_sequence(&mut mock, &[" M notes.txt\0", "UU notes.txt\0"]);
    mock.expect_add_all().times(1).returning(|_| ok());
    mock.expect_commit()
        .withf(|_, _, identity| identity.name == "gitsync")
        .times(1)
        .returning(|_, _, _| ok());
    expect_remote(&mut mock);
    expect_remote_branch(&mut mock);
    mock.expect_fetch().returning(|_, _, _| ok());
    mock.expect_merge().times(1).returning(|_, _, _| {
        Err(failed(
            "merge --no-edit FETCH_HEAD",
            "CONFLICT (content): Merge conflict in notes.txt",
        ))
    });
    mock.expect_unmerged_stages()
        .returning(|_, _| Err(failed("ls-files -u -z -- notes.txt", "fatal: index locked")));
    mock.expect_merge_abort().times(1).returning(|_| ok());
    mock.expect_push().never();

    let engine = engine(mock, temp_dir.path().to_path_buf()).with_observer(observer.clone());
    let err = engine.flush("").unwrap_err();

    assert!(err.is_recoverable());
    assert!(matches!(err, SyncError::Resolution { ref path, .. } if path == "notes.txt"));
    assert_eq!(observer.failures()[0].0, Stage::Flush);
}

#[test]
fn test_unfinished_merge_is_aborted_before_commit() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    fs::create_dir_all(root.join(".git")).unwrap();
    let merge_head = root.join(".git/MERGE_HEAD");
    fs::write(&merge_head, "2222222222222222222222222222222222222222\n").unwrap();

    let mut mock = MockGitOps::new();
    let aborted = merge_head.clone();
    mock.expect_merge_abort().times(1).returning(move |_| {
        fs::remove_file(&aborted).unwrap();
        ok()
    });
    expect_status_sequence(&mut mock, &[]);
    mock.expect_commit().never();

    let engine = engine(mock, root);
    assert!(engine.is_merging());
    assert_eq!(engine.flush("").unwrap(), FlushOutcome::Clean);
    assert!(!engine.is_merging());
}

#[test]
fn test_pull_only_fails_when_unfinished_merge_cannot_be_aborted() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/MERGE_HEAD"), "2222\n").unwrap();

    let mut mock = MockGitOps::new();
    mock.expect_merge_abort()
        .returning(|_| Err(failed("merge --abort", "fatal: could not reset index")));
    mock.expect_fetch().never();
    mock.expect_merge().never();

    let engine = engine(mock, root);
    assert!(matches!(
        engine.pull_only().unwrap_err(),
        SyncError::Git(GitError::NonZeroExit { .. })
    ));
}
