use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use is_terminal::IsTerminal;
use serde::Serialize;

use safereview::files::{DiskFs, FileSystem, decode_text, normalize_path, resolve_targets};
use safereview::render::{render_hunk, render_review};
use safereview::store::clear_review_state;
use safereview::{
    ChangeType, Collaborators, Direction, DiffToolChoice, DirSnapshots, FileReview, ReviewConfig,
    ReviewManager,
};

const SNAPSHOT_DIR: &str = "snapshots";

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stdout().is_terminal(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let root = resolve_root(cli.global.root.as_ref())?;
    let config = load_config(&root, &cli.global)?;

    if let Command::Log(cmd) = &cli.command {
        return handle_log(&root, &config, cmd);
    }

    let mut session = Session::open(&root, &config);
    match cli.command {
        Command::Snapshot(cmd) => handle_snapshot(&session, cmd)?,
        Command::Add(cmd) => handle_add(&mut session, cmd)?,
        Command::Status(cmd) => handle_status(&session, cmd)?,
        Command::Show(cmd) => handle_show(&session, cmd)?,
        Command::Accept(cmd) => handle_resolve(&mut session, cmd, true)?,
        Command::Reject(cmd) => handle_resolve(&mut session, cmd, false)?,
        Command::Review(cmd) => handle_review(&mut session, cmd)?,
        Command::Abandon => handle_abandon(&mut session)?,
        Command::Log(_) => {}
    }

    Ok(())
}

fn resolve_root(root: Option<&PathBuf>) -> Result<PathBuf> {
    let base = match root {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    fs::canonicalize(&base).with_context(|| format!("resolving workspace root {}", base.display()))
}

fn load_config(root: &Path, global: &GlobalArgs) -> Result<ReviewConfig> {
    let mut config = match &global.config {
        Some(path) => ReviewConfig::load(path)?,
        None => ReviewConfig::load_for_workspace(root)?,
    };
    if let Some(dir) = &global.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(tool) = global.diff_tool {
        config.diff_tool = tool;
    }
    if global.no_git_history {
        config.use_git_history = false;
    }
    if global.no_log {
        config.log_changes = false;
    }
    Ok(config)
}

/// One CLI invocation: the manager restored from the state directory plus the
/// on-disk snapshot store the pre-edit hook writes into.
struct Session {
    root: PathBuf,
    state_dir: PathBuf,
    snapshots: DirSnapshots,
    manager: ReviewManager,
}

impl Session {
    fn open(root: &Path, config: &ReviewConfig) -> Self {
        let state_dir = config.state_dir_in(root);
        let snapshots = DirSnapshots::new(state_dir.join(SNAPSHOT_DIR));
        let (mut collaborators, _) = Collaborators::for_workspace(root, config);
        collaborators.snapshots = Box::new(snapshots.clone());
        let mut manager = ReviewManager::new(root, config, collaborators);
        manager.restore();
        Self {
            root: root.to_path_buf(),
            state_dir,
            snapshots,
            manager,
        }
    }

    fn targets(&self, paths: &[PathBuf], globs: &[String]) -> Result<Vec<PathBuf>> {
        resolve_targets(&self.root, paths, globs)
    }

    fn display<'a>(&self, path: &'a Path) -> std::path::Display<'a> {
        path.strip_prefix(&self.root).unwrap_or(path).display()
    }
}

fn handle_snapshot(session: &Session, cmd: SnapshotCommand) -> Result<()> {
    let targets = session.targets(&cmd.paths, &cmd.globs)?;
    for path in targets {
        let shown = session.display(&path);
        if !DiskFs.exists(&path) {
            println!("{shown}: does not exist yet; it will be reviewed as a new file");
            continue;
        }
        let text = match DiskFs.read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("skipping {shown}: {err:#}");
                continue;
            }
        };
        if session.snapshots.record(&path, &text)? {
            println!("{shown}: snapshot saved");
        } else {
            println!("{shown}: snapshot already captured");
        }
    }
    Ok(())
}

fn handle_add(session: &mut Session, cmd: AddCommand) -> Result<()> {
    let targets = session.targets(&cmd.paths, &cmd.globs)?;
    if let Some(original) = &cmd.original {
        if targets.len() != 1 {
            bail!("--original requires exactly one target file");
        }
        let bytes =
            fs::read(original).with_context(|| format!("reading {}", original.display()))?;
        let text = decode_text(&bytes).with_context(|| format!("decoding {}", original.display()))?;
        session.snapshots.replace(&targets[0], &text)?;
    }

    let mut added = 0usize;
    for path in &targets {
        let shown = session.display(path);
        if session.manager.add_file(path)? {
            let review = session
                .manager
                .get_review(path)
                .context("review missing right after it was added")?;
            println!(
                "{shown}: {} hunk(s) to review ({})",
                review.hunks.len(),
                review.change_type
            );
            added += 1;
        } else {
            println!("{shown}: nothing to review");
        }
    }
    session.manager.save_now();
    if added > 0 {
        println!("{added} file(s) under review.");
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusRow<'a> {
    path: &'a Path,
    change_type: ChangeType,
    hunks: usize,
    unresolved: usize,
    accepted: usize,
    rejected: usize,
    current: bool,
}

fn handle_status(session: &Session, cmd: StatusCommand) -> Result<()> {
    let manager = &session.manager;
    let rows: Vec<StatusRow<'_>> = manager
        .reviews()
        .iter()
        .enumerate()
        .map(|(idx, review)| StatusRow {
            path: &review.file_path,
            change_type: review.change_type,
            hunks: review.hunks.len(),
            unresolved: review.unresolved_count(),
            accepted: review.accepted_count(),
            rejected: review.rejected_count(),
            current: idx == manager.current_file_index(),
        })
        .collect();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("no active reviews.");
        return Ok(());
    }
    for row in &rows {
        println!(
            "{} {:<6} {:>3}/{:<3} pending  {}",
            if row.current { "*" } else { " " },
            row.change_type,
            row.unresolved,
            row.hunks,
            session.display(row.path)
        );
    }
    Ok(())
}

fn find_review<'a>(session: &'a Session, path: &Path) -> Result<&'a FileReview> {
    match session.manager.get_review(path) {
        Some(review) => Ok(review),
        None => bail!("no active review for {}", path.display()),
    }
}

fn handle_show(session: &Session, cmd: ShowCommand) -> Result<()> {
    let review = find_review(session, &cmd.path)?;
    let focus = session
        .manager
        .current_review()
        .filter(|current| current.file_path == review.file_path)
        .and_then(|current| current.hunks.get(session.manager.current_hunk_index()))
        .map(|hunk| hunk.id);
    println!(
        "{} ({}, {} pending)",
        session.display(&review.file_path),
        review.change_type,
        review.unresolved_count()
    );
    print!("{}", render_review(review, cmd.color.should_color(), focus));
    Ok(())
}

fn handle_resolve(session: &mut Session, cmd: ResolveCommand, accept: bool) -> Result<()> {
    let path = normalize_path(&session.root, &cmd.path);
    find_review(session, &path)?;
    let verb = if accept { "accepted" } else { "rejected" };
    let changed = match cmd.hunk {
        Some(id) => session.manager.resolve_hunk(&path, id, accept),
        None => session.manager.resolve_all_hunks(&path, accept),
    };
    let outcome = report_resolution(session, &path, changed, verb, cmd.hunk);
    session.manager.save_now();
    outcome
}

fn report_resolution(
    session: &Session,
    path: &Path,
    changed: Result<bool>,
    verb: &str,
    hunk: Option<usize>,
) -> Result<()> {
    let shown = session.display(path);
    if !changed? {
        match hunk {
            Some(id) => println!("{shown}: hunk {id} is unknown or already resolved"),
            None => println!("{shown}: nothing pending"),
        }
        return Ok(());
    }
    match hunk {
        Some(id) => println!("{shown}: hunk {id} {verb}"),
        None => println!("{shown}: all pending hunks {verb}"),
    }
    match session.manager.get_review(path) {
        Some(review) => println!("{shown}: {} pending", review.unresolved_count()),
        None => println!("{shown}: review complete, file written"),
    }
    Ok(())
}

fn handle_abandon(session: &mut Session) -> Result<()> {
    let count = session.manager.reviews().len();
    session.manager.dispose()?;
    clear_review_state(&session.state_dir);
    let snapshot_dir = session.state_dir.join(SNAPSHOT_DIR);
    match fs::remove_dir_all(&snapshot_dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("removing {}", snapshot_dir.display()));
        }
    }
    println!("abandoned {count} review(s); agent changes left on disk.");
    Ok(())
}

fn handle_log(root: &Path, config: &ReviewConfig, cmd: &LogCommand) -> Result<()> {
    let log = safereview::logging::ChangeLog::new(
        config.state_dir_in(root),
        config.max_log_entries,
        config.log_changes,
    );
    let entries = log.read_recent(cmd.tail)?;
    if entries.is_empty() {
        println!("change log is empty.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "[{}] {:<9} {:<8} {:<22} {}",
            entry.timestamp,
            entry.command,
            entry.action,
            entry.line_info,
            entry.path.display()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReviewCommand {
    Accept,
    Reject,
    AcceptFile,
    RejectFile,
    NextHunk,
    PrevHunk,
    NextFile,
    PrevFile,
    Undo,
    Redo,
    Show,
    Help,
    Quit,
}

const REVIEW_HELP: &str = "Commands: y=accept hunk, n=reject hunk, A/R=accept/reject rest of file, [Enter]/j=next hunk, k=previous hunk, J/K=next/previous file, u=undo, r=redo, s=show file, q=quit, ?=help";

fn parse_review_command(input: &str) -> ReviewCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ReviewCommand::NextHunk;
    }
    match trimmed {
        "A" => return ReviewCommand::AcceptFile,
        "R" => return ReviewCommand::RejectFile,
        "J" => return ReviewCommand::NextFile,
        "K" => return ReviewCommand::PrevFile,
        _ => {}
    }
    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "y" | "yes" | "accept" => ReviewCommand::Accept,
        "n" | "no" | "reject" => ReviewCommand::Reject,
        "accept-file" => ReviewCommand::AcceptFile,
        "reject-file" => ReviewCommand::RejectFile,
        "j" | "next" => ReviewCommand::NextHunk,
        "k" | "prev" => ReviewCommand::PrevHunk,
        "next-file" => ReviewCommand::NextFile,
        "prev-file" => ReviewCommand::PrevFile,
        "u" | "undo" => ReviewCommand::Undo,
        "r" | "redo" => ReviewCommand::Redo,
        "s" | "show" => ReviewCommand::Show,
        "q" | "quit" => ReviewCommand::Quit,
        _ => ReviewCommand::Help,
    }
}

fn handle_review(session: &mut Session, cmd: ReviewArgs) -> Result<()> {
    let color = cmd.color.should_color();
    if let Some(path) = &cmd.path {
        let path = normalize_path(&session.root, path);
        find_review(session, &path)?;
        session.manager.open_file_for_review(&path);
    } else if !session.manager.open_current_or_next() {
        println!("nothing to review.");
        return Ok(());
    }
    println!("Entering review mode. {REVIEW_HELP}");

    let mut shown_at: Option<(PathBuf, usize)> = None;
    loop {
        session.manager.poll_save(Instant::now());
        let Some(review) = session.manager.current_review() else {
            println!("all reviews resolved.");
            break;
        };
        let path = review.file_path.clone();
        let hunk_idx = session.manager.current_hunk_index();
        let Some(hunk_id) = review.hunks.get(hunk_idx).map(|h| h.id) else {
            break;
        };
        if shown_at.as_ref() != Some(&(path.clone(), hunk_id)) {
            println!(
                "== {} [file {}/{}, {} pending]",
                session.display(&path),
                session.manager.current_file_index() + 1,
                session.manager.reviews().len(),
                review.unresolved_count()
            );
            print!("{}", render_hunk(review, hunk_id, color));
            shown_at = Some((path.clone(), hunk_id));
        }

        print!("review> ");
        io::stdout().flush()?;
        let mut input = String::new();
        let bytes = io::stdin()
            .read_line(&mut input)
            .context("reading review input")?;
        if bytes == 0 {
            println!("stdin closed; leaving review mode.");
            break;
        }

        let outcome = match parse_review_command(&input) {
            ReviewCommand::Accept => session.manager.resolve_hunk(&path, hunk_id, true),
            ReviewCommand::Reject => session.manager.resolve_hunk(&path, hunk_id, false),
            ReviewCommand::AcceptFile => session.manager.resolve_all_hunks(&path, true),
            ReviewCommand::RejectFile => session.manager.resolve_all_hunks(&path, false),
            ReviewCommand::NextHunk => Ok(step_hunk(session, Direction::Next)),
            ReviewCommand::PrevHunk => Ok(step_hunk(session, Direction::Previous)),
            ReviewCommand::NextFile => Ok(session.manager.navigate_file(Direction::Next)),
            ReviewCommand::PrevFile => Ok(session.manager.navigate_file(Direction::Previous)),
            ReviewCommand::Undo => {
                let undone = session.manager.undo_resolve();
                if !undone {
                    println!("(nothing to undo)");
                }
                shown_at = None;
                Ok(undone)
            }
            ReviewCommand::Redo => {
                let redone = session.manager.redo_resolve();
                if matches!(redone, Ok(false)) {
                    println!("(nothing to redo)");
                }
                shown_at = None;
                redone
            }
            ReviewCommand::Show => {
                if let Some(review) = session.manager.current_review() {
                    print!("{}", render_review(review, color, Some(hunk_id)));
                }
                Ok(true)
            }
            ReviewCommand::Help => {
                println!("{REVIEW_HELP}");
                Ok(true)
            }
            ReviewCommand::Quit => break,
        };
        if let Err(err) = outcome {
            eprintln!("error: {err:#}");
        }
        if session.manager.get_review(&path).is_none() {
            println!("{}: review complete, file written", session.display(&path));
            session.manager.open_current_or_next();
        }
    }

    session.manager.save_now();
    Ok(())
}

fn step_hunk(session: &mut Session, direction: Direction) -> bool {
    let pending = session
        .manager
        .current_review()
        .map_or(0, |review| review.unresolved_count());
    if pending <= 1 {
        // Single pending hunk left in this file; move on to the next file.
        return session.manager.review_next_unresolved();
    }
    session.manager.navigate_hunk(direction)
}

#[derive(Debug, Parser)]
#[command(
    name = "safereview",
    version,
    about = "Review an agent's file edits hunk by hunk"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR", value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,
    /// Config file to use instead of `.safereview/config.yaml`.
    #[arg(long, global = true, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long = "state-dir", global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,
    #[arg(long = "diff-tool", global = true, value_enum)]
    diff_tool: Option<DiffToolChoice>,
    #[arg(long = "no-git-history", global = true, action = ArgAction::SetTrue)]
    no_git_history: bool,
    #[arg(long = "no-log", global = true, action = ArgAction::SetTrue)]
    no_log: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record pre-edit content of files the agent is about to change.
    Snapshot(SnapshotCommand),
    /// Start reviewing files the agent changed.
    Add(AddCommand),
    Status(StatusCommand),
    Show(ShowCommand),
    Accept(ResolveCommand),
    Reject(ResolveCommand),
    /// Step through pending hunks interactively.
    Review(ReviewArgs),
    /// Drop every review, leaving the agent's content on disk.
    Abandon,
    Log(LogCommand),
}

#[derive(Debug, Args)]
struct SnapshotCommand {
    #[arg(value_name = "PATH", value_hint = ValueHint::FilePath)]
    paths: Vec<PathBuf>,
    #[arg(long = "glob", value_name = "GLOB")]
    globs: Vec<String>,
}

#[derive(Debug, Args)]
struct AddCommand {
    #[arg(value_name = "PATH", value_hint = ValueHint::FilePath)]
    paths: Vec<PathBuf>,
    #[arg(long = "glob", value_name = "GLOB")]
    globs: Vec<String>,
    /// File holding the content from before the agent's edit.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    original: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StatusCommand {
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct ShowCommand {
    #[arg(value_name = "PATH")]
    path: PathBuf,
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
}

#[derive(Debug, Args)]
struct ResolveCommand {
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// Resolve only this hunk; without it every pending hunk is resolved.
    #[arg(long, value_name = "ID")]
    hunk: Option<usize>,
}

#[derive(Debug, Args)]
struct ReviewArgs {
    /// Start with this file instead of the current one.
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long = "tail", default_value_t = 20)]
    tail: usize,
}
