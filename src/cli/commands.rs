//! Command implementations for the notesync CLI.
//!
//! Every command opens a `Context` (config, stores, GitHub remote and
//! coordinator). Edits return as soon as the local write lands; the CLI then
//! waits for the background push so the process does not exit under it.

use super::{Cli, Commands, Keep, NoteFields};
use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use notesync::config::{default_config_path, default_credentials_path, Config};
use notesync::formatters::digest::WeeklyDigest;
use notesync::formatters::Formatter;
use notesync::models::{Note, NoteId, SyncStatus};
use notesync::storage::{CommitQueue, NoteStore};
use notesync::sync::ledger::SyncLedger;
use notesync::sync::{
    AutoSync, CredentialStore, FileCredentialStore, GitHubRemote, GitHubTarget,
    KeyringCredentialStore, MemoryCredentialStore, NetworkMonitor, PublishOutcome, RemoteLayout,
    RemoteStore, Resolution, SyncComponents, SyncCoordinator, SyncPhase, SyncReport,
};
use notesync::SyncError;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Overrides the stored credential, e.g. in CI.
const TOKEN_ENV: &str = "NOTESYNC_TOKEN";

/// Wired components for one CLI invocation.
struct Context {
    config: Config,
    config_path: PathBuf,
    credentials: Arc<dyn CredentialStore>,
    remote: Arc<dyn RemoteStore>,
    coordinator: Arc<SyncCoordinator>,
}

impl Context {
    async fn open(config_path: PathBuf) -> Result<Self> {
        let config = Config::load_or_default(&config_path)?;
        Self::with_config(config, config_path).await
    }

    async fn with_config(config: Config, config_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Cannot create data directory: {}", config.data_dir.display())
        })?;

        let credentials = open_credentials().await;
        let target = GitHubTarget {
            api_base: config.remote.api_base.clone(),
            owner: config.remote.owner.clone().unwrap_or_default(),
            repo: config.remote.repo.clone().unwrap_or_default(),
            branch: config.remote.branch.clone(),
        };
        let remote: Arc<dyn RemoteStore> =
            Arc::new(GitHubRemote::new(target, credentials.clone()));

        let reachable = NetworkMonitor::probe(&config.sync.probe_host).await;
        let components = SyncComponents {
            notes: Arc::new(NoteStore::open(config.notes_file()).await),
            queue: Arc::new(CommitQueue::open(config.queue_file()).await),
            remote: remote.clone(),
            credentials: credentials.clone(),
            network: NetworkMonitor::new(reachable),
        };
        let ledger = SyncLedger::open(config.ledger_file()).await;
        let layout = RemoteLayout::new(
            config.remote.notes_dir.clone(),
            config.remote.document_path.clone(),
        );
        let coordinator =
            SyncCoordinator::new(components, ledger, layout, config.is_repo_configured());

        Ok(Self {
            config,
            config_path,
            credentials,
            remote,
            coordinator,
        })
    }

    fn notes(&self) -> &NoteStore {
        self.coordinator.notes()
    }

    /// Resolve a full id or a unique id prefix.
    async fn find_note(&self, id: &str) -> Result<Note> {
        if let Some(note) = self.notes().fetch(&NoteId::from_string(id)).await {
            return Ok(note);
        }
        let mut matches: Vec<Note> = self
            .notes()
            .fetch_all()
            .await
            .into_iter()
            .filter(|n| n.id.as_str().starts_with(id))
            .collect();
        match matches.len() {
            0 => bail!("No note matches '{}'", id),
            1 => Ok(matches.remove(0)),
            n => bail!("'{}' is ambiguous ({} notes match)", id, n),
        }
    }

    /// Let detached pushes finish before the process exits.
    async fn finish_background(&self) {
        let background = self.coordinator.background();
        if background.in_flight() == 0 {
            return;
        }
        let spinner = spinner("Syncing in background...");
        background.wait_idle().await;
        spinner.finish_and_clear();
    }
}

/// Keyring first, JSON file when no secret service is available.
async fn open_credentials() -> Arc<dyn CredentialStore> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Arc::new(MemoryCredentialStore::with_token(token.trim()));
        }
    }

    let keyring = KeyringCredentialStore::new();
    match keyring.load().await {
        Ok(_) => Arc::new(keyring),
        Err(e) => {
            debug!("[Credentials] Keyring unavailable ({}), using file store", e);
            Arc::new(FileCredentialStore::new(default_credentials_path()))
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn status_label(status: SyncStatus) -> ColoredString {
    match status {
        SyncStatus::Synced => status.label().green(),
        SyncStatus::Pending => status.label().yellow(),
        SyncStatus::Conflict => status.label().red().bold(),
        SyncStatus::Error => status.label().red(),
    }
}

fn short_id(id: &NoteId) -> String {
    id.as_str().chars().take(8).collect()
}

fn read_body(body: String) -> Result<String> {
    if body != "-" {
        return Ok(body);
    }
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Cannot read body from stdin")?;
    Ok(input)
}

fn apply_fields(mut note: Note, fields: NoteFields) -> Result<Note> {
    if let Some(body) = fields.body {
        note.body = read_body(body)?;
    }
    if let Some(summary) = fields.summary {
        note.summary = summary;
    }
    if let Some(url) = fields.url {
        note.source_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(category) = fields.category {
        note.category = Some(category).filter(|c| !c.trim().is_empty());
    }
    if !fields.tags.is_empty() {
        note.tags = fields.tags.into_iter().collect();
    }
    Ok(note)
}

fn print_note_line(note: &Note) {
    let category = note
        .category
        .as_deref()
        .map(|c| format!(" [{}]", c).dimmed().to_string())
        .unwrap_or_default();
    println!(
        "  {} {:<9} {}{}",
        short_id(&note.id).cyan(),
        status_label(note.sync_status),
        note.title.white().bold(),
        category
    );
}

fn print_report(report: &SyncReport) {
    println!(
        "  {} pushed, {} deleted, {} pulled, {} removed",
        report.pushed.to_string().green(),
        report.deleted.to_string().green(),
        report.pulled.to_string().green(),
        report.removed.to_string().yellow()
    );
    if report.conflicts > 0 {
        println!(
            "  {} conflict(s), run {} to review",
            report.conflicts.to_string().red().bold(),
            "ns conflicts".cyan()
        );
    }
    if report.errors > 0 {
        println!(
            "  {} error(s), affected notes stay queued",
            report.errors.to_string().red()
        );
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Add { title, fields } => add(config_path, title, fields).await,
        Commands::List { limit } => list(config_path, limit).await,
        Commands::Show { id } => show(config_path, &id).await,
        Commands::Search { query } => search(config_path, &query).await,
        Commands::Edit { id, title, fields } => edit(config_path, &id, title, fields).await,
        Commands::Rm { id } => remove(config_path, &id).await,
        Commands::Sync => sync(config_path).await,
        Commands::Push => push(config_path).await,
        Commands::Pull => pull(config_path).await,
        Commands::Status => status(config_path).await,
        Commands::Conflicts => conflicts(config_path).await,
        Commands::Resolve { id, keep } => resolve(config_path, &id, keep).await,
        Commands::Login { token, repo } => login(config_path, token, repo).await,
        Commands::Logout => logout(config_path).await,
        Commands::InitRemote { repo } => init_remote(config_path, repo).await,
        Commands::Digest { days, output } => digest(config_path, days, output).await,
        Commands::Publish { days, force } => publish(config_path, days, force).await,
        Commands::Watch => watch(config_path).await,
    }
}

// ============ NOTE COMMANDS ============

async fn add(config_path: PathBuf, title: String, fields: NoteFields) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let note = apply_fields(Note::new(title, ""), fields)?;

    let saved = ctx
        .coordinator
        .save_note(note)
        .await
        .context("Cannot save note")?;
    println!("  {} Saved {}", "✓".green(), short_id(&saved.id).cyan());

    ctx.finish_background().await;
    if let Some(note) = ctx.notes().fetch(&saved.id).await {
        println!("  Sync: {}", status_label(note.sync_status));
    }
    Ok(())
}

async fn list(config_path: PathBuf, limit: Option<usize>) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let notes = ctx.notes().fetch_all().await;

    if notes.is_empty() {
        println!("{}", "No notes yet. Capture one with 'ns add <title>'.".yellow());
        return Ok(());
    }

    let shown = limit.unwrap_or(notes.len());
    for note in notes.iter().take(shown) {
        print_note_line(note);
    }
    if shown < notes.len() {
        println!("  {}", format!("... {} more", notes.len() - shown).dimmed());
    }
    Ok(())
}

async fn show(config_path: PathBuf, id: &str) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let note = ctx.find_note(id).await?;

    println!("{}", note.title.bold().cyan());
    println!("  {:<10} {}", "id".dimmed(), note.id);
    println!("  {:<10} {}", "status".dimmed(), status_label(note.sync_status));
    println!(
        "  {:<10} {}",
        "created".dimmed(),
        note.created_at.format("%Y-%m-%d %H:%M")
    );
    println!(
        "  {:<10} {}",
        "modified".dimmed(),
        note.modified_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(category) = &note.category {
        println!("  {:<10} {}", "category".dimmed(), category);
    }
    if !note.tags.is_empty() {
        let tags: Vec<&str> = note.tags.iter().map(String::as_str).collect();
        println!("  {:<10} {}", "tags".dimmed(), tags.join(", "));
    }
    if let Some(url) = &note.source_url {
        println!("  {:<10} {}", "source".dimmed(), url.blue().underline());
    }
    if !note.summary.is_empty() {
        println!("\n{}", note.summary.italic());
    }
    if !note.body.is_empty() {
        println!("\n{}", note.body);
    }
    Ok(())
}

async fn search(config_path: PathBuf, query: &str) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let results = ctx.notes().search(query).await;

    if results.is_empty() {
        println!("{}", format!("No notes match '{}'.", query).yellow());
        return Ok(());
    }
    println!(
        "{} {} note(s):\n",
        "Found".green(),
        results.len().to_string().green().bold()
    );
    for note in &results {
        print_note_line(note);
    }
    Ok(())
}

async fn edit(
    config_path: PathBuf,
    id: &str,
    title: Option<String>,
    fields: NoteFields,
) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let mut note = ctx.find_note(id).await?;
    let before = note.clone();

    if let Some(title) = title {
        note.title = title;
    }
    let note = apply_fields(note, fields)?;
    if note.same_content(&before) {
        println!("{}", "Nothing to change.".yellow());
        return Ok(());
    }

    let saved = ctx
        .coordinator
        .save_note(note)
        .await
        .context("Cannot save note")?;
    println!("  {} Updated {}", "✓".green(), short_id(&saved.id).cyan());
    ctx.finish_background().await;
    Ok(())
}

async fn remove(config_path: PathBuf, id: &str) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let note = ctx.find_note(id).await?;

    ctx.coordinator
        .delete_note(&note.id)
        .await
        .context("Cannot delete note")?;
    println!("  {} Deleted {}", "✓".green(), note.title);
    ctx.finish_background().await;
    Ok(())
}

// ============ SYNC COMMANDS ============

async fn sync(config_path: PathBuf) -> Result<()> {
    println!("{}", "Syncing notes...".cyan().bold());
    let ctx = Context::open(config_path).await?;

    let spinner = spinner("Pushing and pulling...");
    let report = ctx.coordinator.sync().await;
    spinner.finish_and_clear();

    if report.deferred {
        let status = ctx.coordinator.configuration_status().await;
        if !status.repo_configured {
            bail!("No repository configured. Run 'ns init-remote owner/repo' first.");
        }
        if !status.auth_configured {
            bail!("Not signed in. Run 'ns login' first.");
        }
        if !status.network_reachable {
            println!(
                "{}",
                "✗ Offline. Changes stay queued and sync when the network returns.".yellow()
            );
            return Ok(());
        }
    }

    print_report(&report);
    if report.is_clean() {
        println!("\n{}", "✓ Sync complete!".green().bold());
    }
    Ok(())
}

async fn push(config_path: PathBuf) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let spinner = spinner("Pushing...");
    let result = ctx.coordinator.push().await;
    spinner.finish_and_clear();

    let report = result.context("Push failed")?;
    print_report(&report);
    Ok(())
}

async fn pull(config_path: PathBuf) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let spinner = spinner("Pulling...");
    let result = ctx.coordinator.pull().await;
    spinner.finish_and_clear();

    let report = result.context("Pull failed")?;
    print_report(&report);
    Ok(())
}

async fn status(config_path: PathBuf) -> Result<()> {
    println!("{}", "notesync Status".bold().cyan());
    println!();

    let ctx = Context::open(config_path).await?;
    let status = ctx.coordinator.configuration_status().await;

    let check = |ok: bool| if ok { "✓".green() } else { "✗".red() };
    let repo = match (&ctx.config.remote.owner, &ctx.config.remote.repo) {
        (Some(owner), Some(repo)) => format!("{}/{}@{}", owner, repo, ctx.config.remote.branch),
        _ => "not configured".to_string(),
    };
    println!(
        "  {} Repository: {} ({})",
        check(status.repo_configured),
        repo,
        ctx.remote.name()
    );
    println!(
        "  {} Signed in: {}",
        check(status.auth_configured),
        if status.auth_configured { "yes" } else { "no" }
    );
    println!(
        "  {} Network: {}",
        check(status.network_reachable),
        if status.network_reachable {
            "reachable"
        } else {
            "offline"
        }
    );
    match ctx.config.sync.auto_sync_interval() {
        Some(interval) => println!(
            "  {} Auto-sync: every {}s (ns watch)",
            "✓".green(),
            interval.as_secs()
        ),
        None => println!("  {} Auto-sync: off", "•".dimmed()),
    }
    println!();

    let notes = ctx.notes().fetch_all().await;
    let count = |s: SyncStatus| notes.iter().filter(|n| n.sync_status == s).count();
    println!("  Notes:    {}", notes.len().to_string().cyan());
    println!("  Synced:   {}", count(SyncStatus::Synced).to_string().green());
    println!("  Pending:  {}", count(SyncStatus::Pending).to_string().yellow());
    println!("  Conflict: {}", count(SyncStatus::Conflict).to_string().red());
    println!("  Error:    {}", count(SyncStatus::Error).to_string().red());
    println!(
        "  Queued:   {}",
        ctx.coordinator.pending_count().await.to_string().cyan()
    );
    println!();
    println!("  Config: {}", ctx.config_path.display().to_string().dimmed());
    println!(
        "  Data:   {}",
        ctx.config.data_dir.display().to_string().dimmed()
    );
    Ok(())
}

async fn conflicts(config_path: PathBuf) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let conflicts = ctx.coordinator.conflicts().await;

    if conflicts.is_empty() {
        println!("{}", "✓ No conflicts".green());
        return Ok(());
    }

    for (local, remote) in &conflicts {
        print_note_line(local);
        println!(
            "      local  modified {}",
            local.modified_at.format("%Y-%m-%d %H:%M")
        );
        match remote {
            Some(remote) => println!(
                "      remote modified {} \"{}\"",
                remote.modified_at.format("%Y-%m-%d %H:%M"),
                remote.title
            ),
            None => println!("      remote {}", "deleted or not fetched yet".dimmed()),
        }
    }
    println!(
        "\nResolve with {} or just edit the note to keep yours.",
        "ns resolve <id> --keep local|remote".cyan()
    );
    Ok(())
}

async fn resolve(config_path: PathBuf, id: &str, keep: Keep) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let note = ctx.find_note(id).await?;
    let resolution = match keep {
        Keep::Local => Resolution::KeepLocal,
        Keep::Remote => Resolution::KeepRemote,
    };

    ctx.coordinator
        .resolve_conflict(&note.id, resolution)
        .await
        .with_context(|| format!("Cannot resolve {}", short_id(&note.id)))?;
    println!("  {} Resolved {}", "✓".green(), note.title);

    if matches!(resolution, Resolution::KeepLocal) {
        let report = ctx.coordinator.sync().await;
        print_report(&report);
    }
    Ok(())
}

// ============ ACCOUNT COMMANDS ============

fn prompt_token() -> Result<String> {
    print!("GitHub token: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Cannot read token")?;
    let token = input.trim().to_string();
    if token.is_empty() {
        bail!("Token cannot be empty");
    }
    Ok(token)
}

/// Load, apply `repo` if given, and persist the config.
fn update_repository(config_path: &Path, repo: Option<String>) -> Result<Config> {
    let mut config = Config::load_or_default(config_path)?;
    if let Some(repo) = repo {
        config.set_repository(&repo)?;
        config.save(config_path)?;
        println!("  {} Repository: {}", "✓".green(), repo.trim());
    }
    Ok(config)
}

async fn login(config_path: PathBuf, token: Option<String>, repo: Option<String>) -> Result<()> {
    println!("{}", "GitHub Authentication".cyan().bold());
    let config = update_repository(&config_path, repo)?;
    let ctx = Context::with_config(config, config_path).await?;

    let token = match token {
        Some(token) => token,
        None => prompt_token()?,
    };
    ctx.credentials
        .save(token.trim())
        .await
        .context("Cannot store token")?;
    println!("  {} Token saved", "✓".green());

    if !ctx.config.is_repo_configured() {
        println!(
            "\nNext: run {} to choose a repository.",
            "ns init-remote owner/repo".cyan()
        );
    }
    Ok(())
}

async fn logout(config_path: PathBuf) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    ctx.credentials
        .revoke()
        .await
        .context("Cannot remove token")?;
    println!("  {} Signed out", "✓".green());
    Ok(())
}

async fn init_remote(config_path: PathBuf, repo: Option<String>) -> Result<()> {
    let config = update_repository(&config_path, repo)?;
    if !config.is_repo_configured() {
        bail!("No repository configured. Pass it as 'ns init-remote owner/repo'.");
    }
    let ctx = Context::with_config(config, config_path).await?;

    let spinner = spinner("Preparing repository...");
    let result = ctx.remote.initialize_empty_repository().await;
    spinner.finish_and_clear();
    result.context("Cannot initialize repository")?;

    println!("  {} Repository ready", "✓".green());
    Ok(())
}

// ============ DOCUMENT COMMANDS ============

async fn digest(config_path: PathBuf, days: i64, output: Option<PathBuf>) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let formatter = WeeklyDigest::new(days);
    let now = Utc::now();
    let document = formatter.format(&ctx.notes().fetch_all().await, now)?;

    let Some(output) = output else {
        print!("{}", document);
        return Ok(());
    };
    let path = if output.is_dir() {
        output.join(formatter.generate_filename(now))
    } else {
        output
    };
    std::fs::write(&path, &document)
        .with_context(|| format!("Cannot write digest: {}", path.display()))?;
    println!("  {} Digest saved to {}", "✓".green(), path.display());
    Ok(())
}

async fn publish(config_path: PathBuf, days: i64, force: bool) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let document = WeeklyDigest::new(days).format(&ctx.notes().fetch_all().await, Utc::now())?;

    if force {
        // Adopt the current remote token so the write replaces it.
        ctx.coordinator
            .fetch_document()
            .await
            .context("Cannot read published document")?;
    }

    match ctx.coordinator.publish_document(&document).await {
        Ok(PublishOutcome::Published) => {
            println!(
                "  {} Published {}",
                "✓".green(),
                ctx.config.remote.document_path.cyan()
            );
            Ok(())
        }
        Ok(PublishOutcome::Unchanged) => {
            println!("  {}", "Already up to date".dimmed());
            Ok(())
        }
        Err(SyncError::Conflict { path }) => bail!(
            "{} was published from elsewhere since your last publish. Re-run with --force to replace it.",
            path
        ),
        Err(e) => Err(e).context("Publish failed"),
    }
}

// ============ WATCH COMMAND ============

async fn watch(config_path: PathBuf) -> Result<()> {
    let ctx = Context::open(config_path).await?;
    let sync_config = &ctx.config.sync;
    let Some(interval) = sync_config.auto_sync_interval() else {
        bail!(
            "Auto-sync is disabled (sync.auto_sync = false in {}). Run 'ns sync' instead.",
            ctx.config_path.display()
        );
    };
    println!("{}", "Watching for changes (Ctrl-C to stop)".cyan().bold());

    let probe = ctx
        .coordinator
        .network()
        .spawn_probe(sync_config.probe_host.clone(), sync_config.probe_interval());
    let auto = AutoSync::spawn(ctx.coordinator.clone(), interval);

    let mut phase = ctx.coordinator.phase();
    let mut reachable = ctx.coordinator.network().subscribe();
    let mut queued = ctx.coordinator.queue().watch_count();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let label = match *phase.borrow_and_update() {
                    SyncPhase::Idle => "idle".dimmed(),
                    SyncPhase::Pushing => "pushing".cyan(),
                    SyncPhase::Pulling => "pulling".cyan(),
                };
                println!("  {} {}", "→".cyan(), label);
            }
            changed = reachable.changed() => {
                if changed.is_err() {
                    break;
                }
                if *reachable.borrow_and_update() {
                    println!("  {} Online", "✓".green());
                } else {
                    println!("  {} Offline, changes will queue", "✗".yellow());
                }
            }
            changed = queued.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *queued.borrow_and_update();
                println!("  {} {} change(s) queued", "•".dimmed(), count);
            }
        }
    }

    auto.stop();
    probe.abort();
    ctx.finish_background().await;
    println!("\n{}", "✓ Stopped".green());
    Ok(())
}
