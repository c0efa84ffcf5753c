use std::{
    io::{self, BufRead, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use git_casefile::{
    bookmark::{self, shorten_mark_text, Peg},
    config::CasefileConfig,
    git::Git,
    model::{CasefileAction, CasefileModel, Dispatcher, SharingAction, SharingModel},
    pegging::{read_current, LinePegger, LineResolver},
    persisted::{derelativize_paths, encode, read_persisted, relativize_paths, valid_file},
    sharing::{ConfirmUnknownCommits, ShareOutcome, SharingSyncCoordinator},
    storage::{CasefileStore, GitCasefileStore},
    Bookmark, MarkInfo,
};

#[derive(Parser)]
#[command(name = "git-casefile")]
#[command(about = "bookmarks pegged to git history, shared through a dedicated ref")]
#[command(version)]
struct Cli {
    /// run as if started in this directory
    #[arg(short = 'C', long, default_value = ".")]
    directory: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// peg a line of a file to the commit that last touched it
    Peg {
        file: PathBuf,
        line: usize,

        /// interpolate against this revision instead of HEAD
        #[arg(long)]
        reference: Option<String>,

        /// read the current text from stdin instead of the file
        #[arg(long)]
        stdin: bool,
    },

    /// find where a pegged line is now
    Resolve {
        file: PathBuf,

        /// commit the line was pegged to
        #[arg(long)]
        commit: String,

        /// line in that commit
        #[arg(long)]
        line: usize,

        /// read the current text from stdin instead of the file
        #[arg(long)]
        stdin: bool,
    },

    /// add a pegged bookmark to a casefile
    Add {
        /// casefile to update (created if missing)
        casefile: PathBuf,
        file: PathBuf,
        line: usize,

        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// print the current location of every bookmark in a casefile
    Open {
        casefile: PathBuf,

        /// only this bookmark
        #[arg(long)]
        id: Option<u64>,
    },

    /// check that a casefile's markers are well formed
    Check {
        casefile: PathBuf,
    },

    /// list git remotes
    Remotes,

    /// fetch shared casefiles from a remote
    Fetch {
        remote: String,
    },

    /// list shared casefiles
    List,

    /// list deleted casefiles
    Deleted {
        /// only groups whose name contains this
        filter: Option<String>,
    },

    /// list who changed a shared casefile
    Authors {
        path: String,
    },

    /// print a shared casefile
    Show {
        path: String,

        /// read the casefile as it was before this commit deleted it
        #[arg(long)]
        before: Option<String>,
    },

    /// import shared casefiles into a casefile
    Import {
        /// casefile to update (created if missing)
        casefile: PathBuf,

        /// `<group>` for every instance in it, or `<group>/<instance>`
        #[arg(required = true)]
        paths: Vec<String>,

        /// recover casefiles deleted by this commit
        #[arg(long)]
        before: Option<String>,
    },

    /// share a casefile to a remote
    Share {
        remote: String,

        /// `<group>` or `<group>/<instance>`
        path: String,

        /// casefile to share; read from stdin if omitted, in which case unknown
        /// commits abort the share unless --yes is given
        casefile: Option<PathBuf>,

        /// share even if pegged commits are unknown to the remote
        #[arg(short, long)]
        yes: bool,
    },

    /// delete shared casefiles from a remote
    Delete {
        remote: String,

        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// print the effective configuration
    Config {
        /// write it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Asks on the terminal before sharing pegs the remote cannot resolve
#[derive(Default)]
struct TerminalConfirm {
    /// hidden while the question is on screen
    progress: Option<ProgressBar>,
}

impl TerminalConfirm {
    fn ask(remote: &str, commits: &[String]) -> bool {
        eprintln!(
            "{} pegged commit(s) are not on any branch of '{}':",
            commits.len(),
            remote
        );
        for commit in commits {
            eprintln!("  {}", commit);
        }
        eprint!("Share anyway? [y/N] ");
        let _ = io::stderr().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

impl ConfirmUnknownCommits for TerminalConfirm {
    fn confirm(&self, remote: &str, commits: &[String]) -> bool {
        match &self.progress {
            Some(bar) => bar.suspend(|| Self::ask(remote, commits)),
            None => Self::ask(remote, commits),
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn read_text(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn read_casefile(path: &Path, git: &Git) -> Result<Vec<Bookmark>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = read_text(Some(path))?;
    let bookmarks = read_persisted(text.lines())
        .with_context(|| format!("Failed to decode casefile {}", path.display()))?;
    Ok(derelativize_paths(&bookmarks, &[git.workdir().to_path_buf()]))
}

fn build_dispatcher(
    git: &Git,
    config: &CasefileConfig,
    confirm: Arc<dyn ConfirmUnknownCommits + Send + Sync>,
) -> Dispatcher<GitCasefileStore> {
    let store = GitCasefileStore::new(git.clone(), config.shared_ref.clone());
    let coordinator =
        SharingSyncCoordinator::new(git.clone(), store, config.shared_ref.clone(), config.fan_out);
    Dispatcher::new(
        CasefileModel::new(config.lock_grace()),
        SharingModel::new(coordinator, confirm, config.lock_grace()),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CasefileConfig::load()?;

    if let Commands::Config { write } = cli.command {
        print!("{}", serde_yaml::to_string(&config)?);
        if write {
            let path = CasefileConfig::config_file_path()?;
            config.save(&path)?;
            eprintln!("Wrote {}", path.display());
        }
        return Ok(());
    }

    let git = Git::discover(&config.git_program, &cli.directory)
        .context("Not inside a Git work tree")?;
    let store = GitCasefileStore::new(git.clone(), config.shared_ref.clone());

    match cli.command {
        Commands::Peg {
            file,
            line,
            reference,
            stdin,
        } => {
            let buffer = if stdin { Some(read_text(None)?) } else { None };
            let outcome = LinePegger::new(&git).peg(
                &file,
                line,
                buffer.as_deref(),
                reference.as_deref(),
            );
            match outcome.commit {
                Some(commit) => println!("{} {}", commit, outcome.line),
                None => println!("unpegged {}", outcome.line),
            }
        }

        Commands::Resolve {
            file,
            commit,
            line,
            stdin,
        } => {
            let buffer = if stdin { Some(read_text(None)?) } else { None };
            let peg = Peg { commit, line };
            let range = LineResolver::new(&git, config.search_radius)
                .try_resolve(&file, &peg, buffer.as_deref())?;
            println!("{} {} {}", range.start, range.prime, range.end);
        }

        Commands::Add {
            casefile,
            file,
            line,
            notes,
        } => {
            let current = read_current(&git, &file)?;
            let source_line = current
                .lines()
                .nth(line.saturating_sub(1))
                .with_context(|| format!("{} has no line {}", file.display(), line))?;
            let outcome = LinePegger::new(&git).peg(&file, line, Some(&current), None);
            let absolute = if file.is_absolute() {
                file.clone()
            } else {
                git.workdir().join(git.repo_relative(&file))
            };

            let model = CasefileModel::new(config.lock_grace());
            model.apply(CasefileAction::SetState(read_casefile(&casefile, &git)?));
            model.apply(CasefileAction::AddBookmark(MarkInfo {
                file: Some(absolute),
                line: Some(line),
                mark_text: shorten_mark_text(source_line, config.mark_text_limit),
                notes,
                peg: outcome.peg(),
            }));

            let bookmarks = relativize_paths(&model.bookmarks(), git.workdir());
            std::fs::write(&casefile, encode(&bookmarks)?)
                .with_context(|| format!("Failed to write {}", casefile.display()))?;
        }

        Commands::Open { casefile, id } => {
            let resolver = LineResolver::new(&git, config.search_radius);
            let bookmarks = read_casefile(&casefile, &git)?;
            let mut stack: Vec<&Bookmark> = match id {
                Some(id) => vec![bookmark::find(&bookmarks, id)
                    .with_context(|| format!("No bookmark {} in {}", id, casefile.display()))?],
                None => bookmarks.iter().rev().collect(),
            };
            while let Some(mark) = stack.pop() {
                if id.is_none() {
                    stack.extend(mark.children.iter().rev());
                }
                let Some(file) = mark.file.as_deref() else {
                    continue;
                };
                let buffer = match read_current(&git, file) {
                    Ok(text) => text,
                    Err(e) => {
                        eprintln!("{}: {}", file.display(), e);
                        continue;
                    }
                };
                if let Some((line, column)) = resolver.open_location(mark, &buffer) {
                    println!(
                        "{}:{}:{}: {}",
                        git.repo_relative(file).display(),
                        line,
                        column + 1,
                        mark.mark_text
                    );
                }
            }
        }

        Commands::Check { casefile } => {
            let text = read_text(Some(&casefile))?;
            if !valid_file(text.lines()) {
                anyhow::bail!("{} has misplaced casefile markers", casefile.display());
            }
            let bookmarks = read_persisted(text.lines())?;
            let count = bookmarks.len() + bookmarks.iter().map(count_descendants).sum::<usize>();
            println!("{}: {} bookmark(s)", casefile.display(), count);
        }

        Commands::Remotes => {
            let dispatcher = build_dispatcher(&git, &config, Arc::new(TerminalConfirm::default()));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(dispatcher.sharing().refresh())?;
            let state = dispatcher.sharing().state();
            for remote in &state.remotes {
                let marker = if state.remote.as_ref() == Some(remote) { "*" } else { " " };
                println!("{} {}", marker, remote);
            }
        }

        Commands::Fetch { remote } => {
            let dispatcher = build_dispatcher(&git, &config, Arc::new(TerminalConfirm::default()));
            let runtime = tokio::runtime::Runtime::new()?;
            let bar = spinner(format!("Fetching shared casefiles from {}", remote));
            let result = runtime.block_on(async {
                dispatcher.dispatch(SharingAction::SetRemote(remote)).await?;
                dispatcher.dispatch(SharingAction::FetchRemote).await
            });
            bar.finish_and_clear();
            result?;
            let count: usize = dispatcher
                .sharing()
                .state()
                .known_casefiles
                .iter()
                .map(|group| group.instances.len())
                .sum();
            println!("{} shared casefile(s)", count);
        }

        Commands::List => {
            for group in store.list_groups()? {
                println!("{}", group.name);
                for instance in &group.instances {
                    println!("  {}", instance.path);
                }
            }
        }

        Commands::Deleted { filter } => {
            for record in store.list_deleted(filter.as_deref())? {
                println!(
                    "{} {} {}",
                    &record.commit[..record.commit.len().min(12)],
                    record.committed.format("%Y-%m-%d %H:%M"),
                    record.path
                );
            }
        }

        Commands::Authors { path } => {
            let authors = store.authors(&path)?;
            for author in authors.authors {
                println!("{}", author);
            }
        }

        Commands::Show { path, before } => {
            let bookmarks = store.read(&path, before.as_deref())?;
            print!("{}", encode(&bookmarks)?);
        }

        Commands::Import {
            casefile,
            paths,
            before,
        } => {
            let current = read_casefile(&casefile, &git)?;
            let dispatcher = build_dispatcher(&git, &config, Arc::new(TerminalConfirm::default()));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                dispatcher.dispatch(CasefileAction::SetState(current)).await?;
                dispatcher.import_shared(paths, before).await
            })?;

            let bookmarks = relativize_paths(&dispatcher.casefile().bookmarks(), git.workdir());
            std::fs::write(&casefile, encode(&bookmarks)?)
                .with_context(|| format!("Failed to write {}", casefile.display()))?;
            if let Some(path) = dispatcher.sharing().state().share_path {
                println!("Share path is now {}", path);
            }
        }

        Commands::Share {
            remote,
            path,
            casefile,
            yes,
        } => {
            let text = read_text(casefile.as_deref())?;
            let bookmarks = derelativize_paths(
                &read_persisted(text.lines())?,
                &[git.workdir().to_path_buf()],
            );
            let bar = spinner(format!("Sharing casefile to {}", remote));
            // stdin already holds the casefile, so there is nobody to ask
            let confirm: Arc<dyn ConfirmUnknownCommits + Send + Sync> = if yes {
                Arc::new(|_: &str, _: &[String]| true)
            } else if casefile.is_none() {
                Arc::new(|_: &str, _: &[String]| false)
            } else {
                Arc::new(TerminalConfirm {
                    progress: Some(bar.clone()),
                })
            };

            let dispatcher = build_dispatcher(&git, &config, confirm);
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(async {
                dispatcher
                    .dispatch(CasefileAction::SetState(bookmarks))
                    .await?;
                dispatcher.dispatch(SharingAction::SetRemote(remote.clone())).await?;
                dispatcher.dispatch(SharingAction::SetSharePath(path)).await?;
                dispatcher.share_active_casefile().await
            });
            bar.finish_and_clear();
            result?;

            match dispatcher.sharing().state().last_share {
                Some(ShareOutcome::Shared { path, commit }) => {
                    println!("Shared {} ({})", path, commit);
                }
                Some(ShareOutcome::Aborted { unknown }) => {
                    anyhow::bail!(
                        "Not shared: {} pegged commit(s) unknown to {}",
                        unknown.len(),
                        remote
                    );
                }
                None => {}
            }
        }

        Commands::Delete { remote, paths } => {
            let dispatcher = build_dispatcher(&git, &config, Arc::new(TerminalConfirm::default()));
            let runtime = tokio::runtime::Runtime::new()?;
            let count = paths.len();
            let bar = spinner(format!("Deleting {} casefile(s) on {}", count, remote));
            let result = runtime.block_on(async {
                dispatcher.dispatch(SharingAction::SetRemote(remote)).await?;
                dispatcher
                    .dispatch(SharingAction::DeleteCasefiles(paths))
                    .await
            });
            bar.finish_and_clear();
            result?;
            println!("Deleted {} casefile(s)", count);
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn count_descendants(mark: &Bookmark) -> usize {
    mark.children.len()
        + mark
            .children
            .iter()
            .map(count_descendants)
            .sum::<usize>()
}
