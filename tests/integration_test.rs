use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use git_casefile::{
    bookmark::Peg,
    git::{Git, EMPTY_TREE},
    model::{CasefileModel, Dispatcher, SharingModel},
    pegging::{LinePegger, LineRange, LineResolver, PegOutcome},
    persisted::{encode, read_persisted},
    sharing::{ShareOutcome, SharingSyncCoordinator},
    storage::{hash_of, CasefileStore, GitCasefileStore, SharePath},
    Bookmark, Error,
};

const SHARED_REF: &str = "refs/collaboration/shared-casefiles";

/// Helper to run git commands in a directory
fn git_command(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to run git command");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_identity(repo: &Path, name: &str) {
    git_command(repo, &["config", "user.name", name]);
    git_command(repo, &["config", "user.email", "test@example.com"]);
}

/// A bare `origin` and a work tree with one pushed commit
struct Fixture {
    temp: TempDir,
    work: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin.git");
        let work = temp.path().join("work");
        fs::create_dir(&origin).unwrap();
        fs::create_dir(&work).unwrap();

        git_command(&origin, &["init", "-q", "--bare"]);
        git_command(&work, &["init", "-q"]);
        configure_identity(&work, "Test User");

        fs::write(work.join("notes.txt"), "alpha\nbravo\ncharlie\n").unwrap();
        git_command(&work, &["add", "."]);
        git_command(&work, &["commit", "-q", "-m", "Initial commit"]);
        git_command(&work, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git_command(&work, &["push", "-q", "origin", "HEAD:refs/heads/main"]);
        git_command(&work, &["fetch", "-q", "origin"]);

        Self { temp, work }
    }

    fn origin(&self) -> PathBuf {
        self.temp.path().join("origin.git")
    }

    fn git(&self) -> Git {
        Git::new("git", &self.work)
    }

    fn store(&self) -> GitCasefileStore {
        GitCasefileStore::new(self.git(), SHARED_REF)
    }

    fn head(&self) -> String {
        git_command(&self.work, &["rev-parse", "HEAD"])
    }

    fn remote_tip(&self) -> String {
        git_command(&self.origin(), &["rev-parse", SHARED_REF])
    }
}

fn casefile(text: &str) -> Vec<Bookmark> {
    let mut mark = Bookmark::header(1, text, "");
    mark.file = Some(PathBuf::from("notes.txt"));
    mark.line = Some(2);
    vec![mark]
}

#[test]
fn test_share_then_list() {
    let fixture = Fixture::new();
    let store = fixture.store();
    assert!(store.list_groups().unwrap().is_empty());

    let path = SharePath::new("review", "aaaa").unwrap();
    let commit = store
        .share_at_path("origin", &path, &casefile("bravo"))
        .unwrap();
    assert_eq!(fixture.remote_tip(), commit);
    assert_eq!(store.tip().unwrap(), Some(commit));

    let groups = store.list_groups().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "review");
    assert_eq!(groups[0].instances[0].path, "review/aaaa");

    let other = SharePath::new("review", "bbbb").unwrap();
    store
        .share_at_path("origin", &other, &casefile("charlie"))
        .unwrap();
    let groups = store.list_groups().unwrap();
    assert_eq!(groups.len(), 1);
    let paths: Vec<&str> = groups[0].instances.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["review/aaaa", "review/bbbb"]);
}

#[test]
fn test_duplicate_share_is_rejected() {
    let fixture = Fixture::new();
    let store = fixture.store();
    let first = SharePath::new("review", "aaaa").unwrap();
    let commit = store
        .share_at_path("origin", &first, &casefile("bravo"))
        .unwrap();

    let second = SharePath::new("review", "bbbb").unwrap();
    let err = store
        .share_at_path("origin", &second, &casefile("bravo"))
        .unwrap_err();
    match err {
        Error::AlreadyShared(existing) => assert_eq!(existing, "review/aaaa"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(store.tip().unwrap(), Some(commit.clone()));
    assert_eq!(fixture.remote_tip(), commit);
}

#[test]
fn test_write_is_content_addressed() {
    let fixture = Fixture::new();
    let store = fixture.store();
    let bookmarks = casefile("bravo");
    let first = store.write(&bookmarks).unwrap();
    let second = store.write(&bookmarks).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, hash_of(&bookmarks).unwrap());
    assert_eq!(git_command(&fixture.work, &["cat-file", "-t", &first]), "blob");
}

#[test]
fn test_delete_and_read_before_deletion() {
    let fixture = Fixture::new();
    let store = fixture.store();
    for (instance, text) in [("aaaa", "alpha"), ("bbbb", "bravo")] {
        let path = SharePath::new("review", instance).unwrap();
        store.share_at_path("origin", &path, &casefile(text)).unwrap();
    }
    let path = SharePath::new("design", "cccc").unwrap();
    store
        .share_at_path("origin", &path, &casefile("charlie"))
        .unwrap();

    let deletion = store
        .delete_paths("origin", &["review/aaaa".to_string()])
        .unwrap();
    assert_eq!(fixture.remote_tip(), deletion);
    let groups = store.list_groups().unwrap();
    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["design", "review"]);
    assert_eq!(groups[1].instances.len(), 1);

    let restored = store.read("review/aaaa", Some(&deletion)).unwrap();
    assert_eq!(restored[0].mark_text, "alpha");
    assert!(store.read("review/aaaa", None).is_err());

    let emptied = store
        .delete_paths(
            "origin",
            &["review/bbbb".to_string(), "design/cccc".to_string()],
        )
        .unwrap();
    assert!(store.list_groups().unwrap().is_empty());
    let tree = git_command(&fixture.work, &["rev-parse", &format!("{}^{{tree}}", emptied)]);
    assert_eq!(tree, EMPTY_TREE);

    let deleted = store.list_deleted(None).unwrap();
    let mut paths: Vec<&str> = deleted.iter().map(|r| r.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["design/cccc", "review/aaaa", "review/bbbb"]);

    let filtered = store.list_deleted(Some("desi")).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].path, "design/cccc");
}

#[test]
fn test_delete_without_shared_ref_fails() {
    let fixture = Fixture::new();
    assert!(fixture
        .store()
        .delete_paths("origin", &["review/aaaa".to_string()])
        .is_err());
}

#[test]
fn test_delete_of_unknown_path_publishes_nothing() {
    let fixture = Fixture::new();
    let store = fixture.store();
    let path = SharePath::new("review", "aaaa").unwrap();
    let commit = store
        .share_at_path("origin", &path, &casefile("bravo"))
        .unwrap();

    let err = store
        .delete_paths(
            "origin",
            &["review/zzzz".to_string(), "design/cccc".to_string()],
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnknownCasefile(_)));
    assert_eq!(store.tip().unwrap(), Some(commit.clone()));
    assert_eq!(fixture.remote_tip(), commit);
}

#[test]
fn test_authors_are_distinct_and_sorted() {
    let fixture = Fixture::new();
    let store = fixture.store();
    assert!(store.authors("review").unwrap().authors.is_empty());

    let path = SharePath::new("review", "aaaa").unwrap();
    store.share_at_path("origin", &path, &casefile("alpha")).unwrap();
    configure_identity(&fixture.work, "Another User");
    let path = SharePath::new("review", "bbbb").unwrap();
    store.share_at_path("origin", &path, &casefile("bravo")).unwrap();
    let path = SharePath::new("review", "cccc").unwrap();
    store
        .share_at_path("origin", &path, &casefile("charlie"))
        .unwrap();

    let authors = store.authors("review").unwrap();
    assert_eq!(authors.path, "review");
    assert_eq!(authors.authors, vec!["Another User", "Test User"]);
}

#[test]
fn test_unknown_commits_are_reported() {
    let fixture = Fixture::new();
    let pushed = fixture.head();
    fs::write(fixture.work.join("local.txt"), "local only\n").unwrap();
    git_command(&fixture.work, &["add", "."]);
    git_command(&fixture.work, &["commit", "-q", "-m", "Local commit"]);
    let local = fixture.head();

    let coordinator = SharingSyncCoordinator::new(fixture.git(), fixture.store(), SHARED_REF, 4);
    assert!(coordinator.is_known_to_remote("origin", &pushed).unwrap());
    assert!(!coordinator.is_known_to_remote("origin", &local).unwrap());

    let unknown = coordinator
        .commits_unknown_to_remote("origin", &[pushed.clone(), local.clone()])
        .unwrap();
    assert_eq!(unknown, vec![local.clone()]);

    let mut mark = Bookmark::header(1, "local", "");
    mark.peg = Some(Peg {
        commit: local.clone(),
        line: 1,
    });
    let path = SharePath::new("review", "aaaa").unwrap();
    let outcome = coordinator
        .share("origin", &path, &[mark], &|_: &str, _: &[String]| false)
        .unwrap();
    assert_eq!(outcome, ShareOutcome::Aborted { unknown: vec![local] });
    assert!(coordinator.store().list_groups().unwrap().is_empty());
}

#[test]
fn test_fetch_shared_into_another_clone() {
    let fixture = Fixture::new();
    let path = SharePath::new("review", "aaaa").unwrap();
    fixture
        .store()
        .share_at_path("origin", &path, &casefile("bravo"))
        .unwrap();

    let clone = fixture.temp.path().join("clone");
    git_command(
        fixture.temp.path(),
        &["clone", "-q", fixture.origin().to_str().unwrap(), "clone"],
    );
    let git = Git::new("git", &clone);
    let coordinator = SharingSyncCoordinator::new(
        git.clone(),
        GitCasefileStore::new(git, SHARED_REF),
        SHARED_REF,
        4,
    );
    assert!(coordinator.store().list_groups().unwrap().is_empty());
    assert_eq!(coordinator.list_remotes().unwrap(), vec!["origin"]);

    coordinator.fetch_shared("origin").unwrap();
    let groups = coordinator.store().list_groups().unwrap();
    assert_eq!(groups[0].instances[0].path, "review/aaaa");

    let bookmarks = coordinator.store().read("review/aaaa", None).unwrap();
    assert_eq!(bookmarks, casefile("bravo"));
}

#[test]
fn test_peg_and_resolve_across_edits() {
    let fixture = Fixture::new();
    let git = fixture.git();
    let file = fixture.work.join("notes.txt");
    let head = fixture.head();
    let edited = "new one\nnew two\nalpha\nbravo\ncharlie\n";

    let outcome = LinePegger::new(&git).peg(&file, 4, Some(edited), None);
    assert_eq!(outcome.commit.as_deref(), Some(head.as_str()));
    assert_eq!(outcome.line, 2);

    // Lines not yet committed fall back to the diff against HEAD
    let outcome = LinePegger::new(&git).peg(&file, 1, Some(edited), None);
    assert_eq!(outcome.commit.as_deref(), Some(head.as_str()));

    let peg = Peg {
        commit: head,
        line: 2,
    };
    let range = LineResolver::new(&git, 3)
        .try_resolve(&file, &peg, Some(edited))
        .unwrap();
    assert!(range.is_exact());
    assert_eq!(range.prime, 4);

    let mut mark = Bookmark::header(1, "bravo", "");
    mark.file = Some(file);
    mark.line = Some(2);
    mark.peg = Some(peg);
    let location = LineResolver::new(&git, 3).open_location(&mark, edited);
    assert_eq!(location, Some((4, 0)));
}

#[test]
fn test_persisted_casefile_survives_text_around_it() {
    let bookmarks = casefile("bravo");
    let text = format!("Casefile for review\n\n{}\nsigned, me\n", encode(&bookmarks).unwrap());
    assert_eq!(read_persisted(text.lines()).unwrap(), bookmarks);
}

#[test]
fn test_untracked_file_is_left_unpegged() {
    let fixture = Fixture::new();
    let file = fixture.work.join("new.txt");
    fs::write(&file, "one\ntwo\nthree\n").unwrap();

    let outcome = LinePegger::new(&fixture.git()).peg(&file, 2, None, None);
    assert_eq!(
        outcome,
        PegOutcome {
            line: 2,
            commit: None
        }
    );
    assert!(outcome.peg().is_none());
}

#[test]
fn test_unknown_peg_commit_resolves_to_identity() {
    let fixture = Fixture::new();
    let git = fixture.git();
    let file = fixture.work.join("notes.txt");
    let peg = Peg {
        commit: "f".repeat(40),
        line: 2,
    };
    let resolver = LineResolver::new(&git, 3);
    assert!(resolver.try_resolve(&file, &peg, None).is_err());
    assert_eq!(
        resolver.resolve(&file, 2, Some(&peg), None),
        LineRange {
            start: 2,
            prime: 2,
            end: 3
        }
    );
}

#[test]
fn test_open_location_fallbacks() {
    let fixture = Fixture::new();
    let git = fixture.git();
    let file = fixture.work.join("notes.txt");
    let head = fixture.head();
    let marked = |text: &str, line: usize, peg_line: usize| {
        let mut mark = Bookmark::header(1, text, "");
        mark.file = Some(file.clone());
        mark.line = Some(line);
        mark.peg = Some(Peg {
            commit: head.clone(),
            line: peg_line,
        });
        mark
    };

    // "bravo" became a block of seven lines; the text is at its far end
    let rewritten = "alpha\nx1\nx2\nx3\nx4\nx5\nx6\n  bravo!\ncharlie\n";
    let resolver = LineResolver::new(&git, 0);
    let peg = Peg {
        commit: head.clone(),
        line: 2,
    };
    let range = resolver.resolve(&file, 2, Some(&peg), Some(rewritten));
    assert_eq!((range.start, range.end), (2, 9));
    assert_eq!(
        resolver.open_location(&marked("bravo", 2, 2), rewritten),
        Some((8, 2))
    );

    // Not near the relocated peg, but next to the line the bookmark recorded
    let unchanged = "alpha\nbravo\ncharlie\n";
    let resolver = LineResolver::new(&git, 1);
    assert_eq!(
        resolver.open_location(&marked("charlie", 3, 1), unchanged),
        Some((3, 0))
    );

    // Text gone everywhere: the relocated line at column 0
    let shifted = "new one\nnew two\nalpha\nbravo\ncharlie\n";
    assert_eq!(
        resolver.open_location(&marked("zulu", 2, 2), shifted),
        Some((4, 0))
    );

    let mut header = marked("zulu", 2, 2);
    header.file = None;
    assert_eq!(resolver.open_location(&header, shifted), None);
}

fn dispatcher(fixture: &Fixture) -> Dispatcher<GitCasefileStore> {
    let coordinator = SharingSyncCoordinator::new(fixture.git(), fixture.store(), SHARED_REF, 4);
    let sharing = SharingModel::new(
        coordinator,
        Arc::new(|_: &str, _: &[String]| false),
        Duration::from_millis(50),
    );
    Dispatcher::new(CasefileModel::new(Duration::from_millis(50)), sharing)
}

#[tokio::test]
async fn test_import_group_and_recover_deleted() {
    let fixture = Fixture::new();
    let store = fixture.store();
    for (instance, text) in [("aaaa", "alpha"), ("bbbb", "bravo")] {
        let path = SharePath::new("review", instance).unwrap();
        store.share_at_path("origin", &path, &casefile(text)).unwrap();
    }
    let deletion = store
        .delete_paths("origin", &["review/aaaa".to_string()])
        .unwrap();

    // A deleted casefile comes back whole into an empty casefile
    let recovered = dispatcher(&fixture);
    recovered
        .import_shared(vec!["review/aaaa".to_string()], Some(deletion))
        .await
        .unwrap();
    assert_eq!(recovered.casefile().bookmarks(), casefile("alpha"));
    let path = recovered.sharing().state().share_path.unwrap();
    assert_eq!(path.to_string(), "review/aaaa");

    // Importing the group next to it nests it under a header
    recovered
        .import_shared(vec!["review".to_string()], None)
        .await
        .unwrap();
    let forest = recovered.casefile().bookmarks();
    assert_eq!(forest.len(), 2);
    assert_eq!(forest[1].mark_text, "review");
    assert_eq!(forest[1].notes, "By Test User");
    assert_eq!(forest[1].children[0].mark_text, "bravo");
    let path = recovered.sharing().state().share_path.unwrap();
    assert_eq!(path.group(), "review");
    assert_ne!(path.instance(), "bbbb");
}
