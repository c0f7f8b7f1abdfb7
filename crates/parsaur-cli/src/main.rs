//! prs: command line front-end for Parsaur definitions.
//!
//! Every command rebuilds the index of the workspace root from disk and then
//! answers one question about it:
//! - Summaries and diagnostics for the whole workspace
//! - Definition, references and children of a full name
//! - Completions for a typed prefix
//! - Symbol search by pattern or edit distance
//! - Watching for changes and re-checking on every save

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parsaur::completion::{keyword_completions, Candidate};
use parsaur::fuzzy::{find_similar, DEFAULT_MAX_DISTANCE, DEFAULT_MAX_SUGGESTIONS};
use parsaur::resolve::SIGIL;
use parsaur::watch::{SourceWatcher, WatchEvent};
use parsaur::{Definition, Severity, Snapshot, Workspace};
use serde::Serialize;
use tokio::runtime::Runtime;

/// Exit codes for the CLI
///
/// - 0: Success
/// - 1: Not found (valid query, no results), or `check` found errors
/// - 2: Error (invalid input, missing root, import cycle, etc.)
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const NOT_FOUND: u8 = 1;
    pub const HAS_ERRORS: u8 = 1;
    pub const ERROR: u8 = 2;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Text,
}

/// Index and query Parsaur definition files
#[derive(Parser)]
#[command(name = "prs")]
#[command(author, version = env!("PRS_VERSION"), about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use compact output (no pretty-printing, minimal fields)
    #[arg(long, global = true)]
    concise: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace and print a summary
    Index,

    /// Print every diagnostic; exits 1 when there are errors
    Check {
        /// Also print warnings
        #[arg(short, long)]
        warnings: bool,
    },

    /// Find the declaration of a full name (e.g. "Shop.Price")
    Def {
        /// Full name, with or without the leading `?`
        name: String,

        /// Show the source line containing the declaration
        #[arg(long)]
        context: bool,
    },

    /// List every `?` reference to a full name
    Refs {
        /// Full name, with or without the leading `?`
        name: String,
    },

    /// List the children of a definition, or the top-level definitions
    Children {
        /// Full name of the parent (omit for top-level definitions)
        name: Option<String>,
    },

    /// Complete a typed prefix such as "?Shop.Pr" or "CRE"
    Complete {
        /// Text typed so far
        typed: String,

        /// File the cursor is in, for keyword completion
        #[arg(long)]
        file: Option<PathBuf>,

        /// 1-indexed line of the cursor in --file
        #[arg(long, requires = "file")]
        line: Option<usize>,
    },

    /// Search for definitions matching a pattern
    Symbols {
        /// Pattern to match (supports * wildcards)
        pattern: String,

        /// Use fuzzy matching (find full names within edit distance of pattern)
        #[arg(long)]
        fuzzy: bool,
    },

    /// Watch for file changes and re-check the workspace
    Watch,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output {
        format: cli.format,
        quiet: cli.quiet,
        concise: cli.concise,
    };

    match run(cli.command, &cli.root, output) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if output.format == OutputFormat::Json {
                let error_json = serde_json::json!({
                    "error": "CommandFailed",
                    "message": format!("{:#}", e),
                });
                eprintln!("{}", error_json);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
    concise: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            if self.concise {
                serde_json::to_string(value)?
            } else {
                serde_json::to_string_pretty(value)?
            }
        );
        Ok(())
    }
}

/// A disk workspace plus the runtime its rebuilds run on.
struct Session {
    runtime: Runtime,
    workspace: Workspace,
}

impl Session {
    fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve root directory {}", root.display()))?;
        let runtime = Runtime::new().context("Failed to start async runtime")?;
        Ok(Self {
            runtime,
            workspace: Workspace::open(&root),
        })
    }

    fn rebuild(&self) -> Result<Arc<Snapshot>> {
        self.runtime
            .block_on(self.workspace.rebuild())
            .context("Failed to index workspace")
    }
}

fn run(command: Commands, root: &Path, out: Output) -> Result<u8> {
    let session = Session::open(root)?;

    match command {
        Commands::Index => cmd_index(&*session.rebuild()?, out),
        Commands::Check { warnings } => cmd_check(&*session.rebuild()?, warnings, out),
        Commands::Def { name, context } => cmd_def(&*session.rebuild()?, &name, context, out),
        Commands::Refs { name } => cmd_refs(&*session.rebuild()?, &name, out),
        Commands::Children { name } => cmd_children(&*session.rebuild()?, name.as_deref(), out),
        Commands::Complete { typed, file, line } => {
            cmd_complete(&*session.rebuild()?, &typed, file.as_deref(), line, out)
        }
        Commands::Symbols { pattern, fuzzy } => {
            cmd_symbols(&*session.rebuild()?, &pattern, fuzzy, out)
        }
        Commands::Watch => cmd_watch(&session, out),
    }
}

/// Index the workspace and report counts
fn cmd_index(snapshot: &Snapshot, out: Output) -> Result<u8> {
    let summary = snapshot.summary();

    if out.json() {
        let mut output = serde_json::to_value(&summary)?;
        if !out.concise && !snapshot.read_failures().is_empty() {
            output["read_failures"] = serde_json::to_value(snapshot.read_failures())?;
        }
        out.print_json(&output)?;
    } else if !out.quiet {
        println!(
            "Indexed {} definitions in {} files ({} references, {} errors, {} warnings)",
            summary.definitions, summary.files, summary.references, summary.errors, summary.warnings
        );
        for failure in snapshot.read_failures() {
            println!("  Unreadable: {} ({})", failure.file.display(), failure.message);
        }
    }

    Ok(exit_codes::SUCCESS)
}

/// Print diagnostics for every file
fn cmd_check(snapshot: &Snapshot, warnings: bool, out: Output) -> Result<u8> {
    let diagnostics: Vec<_> = snapshot
        .diagnostics()
        .values()
        .flatten()
        .filter(|d| warnings || d.severity == Severity::Error)
        .collect();

    if out.json() {
        out.print_json(&diagnostics)?;
    } else {
        for diagnostic in &diagnostics {
            println!("{}", diagnostic);
        }
        if !out.quiet {
            eprintln!(
                "{} errors, {} warnings",
                snapshot.count(Severity::Error),
                snapshot.count(Severity::Warning)
            );
        }
    }

    if snapshot.count(Severity::Error) > 0 {
        Ok(exit_codes::HAS_ERRORS)
    } else {
        Ok(exit_codes::SUCCESS)
    }
}

fn cmd_def(snapshot: &Snapshot, name: &str, context: bool, out: Output) -> Result<u8> {
    let name = name.trim_start_matches(SIGIL);

    // Exact full name first, then a looser search by name
    let def = snapshot
        .table()
        .lookup(name)
        .or_else(|| snapshot.search_node(name));
    if let Some(def) = def {
        output_definition(def, context, out)?;
        return Ok(exit_codes::SUCCESS);
    }

    let suggestions = snapshot.suggest_fixes(name);
    if out.json() {
        let suggestion_strs: Vec<&str> = suggestions.iter().map(|s| s.value.as_str()).collect();
        out.print_json(&serde_json::json!({
            "error": "Definition not found",
            "name": name,
            "suggestions": suggestion_strs
        }))?;
    } else if !out.quiet {
        eprintln!("Definition not found: {}", name);
        if !suggestions.is_empty() {
            eprintln!("Did you mean:");
            for suggestion in &suggestions {
                eprintln!("  {} (distance: {})", suggestion.value, suggestion.distance);
            }
        }
    }

    Ok(exit_codes::NOT_FOUND)
}

fn output_definition(def: &Definition, context: bool, out: Output) -> Result<()> {
    let loc = &def.location;

    if out.json() {
        let mut output = serde_json::json!({
            "file": loc.file.display().to_string(),
            "line": loc.line,
            "column": loc.column,
        });
        if !out.concise {
            output["name"] = serde_json::json!(def.name);
            output["full_name"] = serde_json::json!(def.full_name);
            output["kind"] = serde_json::json!(def.kind.to_string());
            output["children"] = serde_json::json!(def.children);
            if let Some(target) = &def.target {
                output["target"] = serde_json::json!(target);
            }
        }
        if context {
            if let Some(line_content) = get_line_content(&loc.file, loc.line as usize) {
                output["context"] = serde_json::Value::String(line_content);
            }
        }
        out.print_json(&output)?;
    } else if !out.quiet {
        println!("{}:{}:{}", loc.file.display(), loc.line, loc.column);
        if context {
            if let Some(line_content) = get_line_content(&loc.file, loc.line as usize) {
                println!("    {}", line_content.trim());
            }
        }
    }

    Ok(())
}

fn cmd_refs(snapshot: &Snapshot, name: &str, out: Output) -> Result<u8> {
    let name = name.trim_start_matches(SIGIL);
    if !snapshot.table().contains_full_name(name) {
        if !out.quiet {
            eprintln!("Definition not found: {}", name);
        }
        return Ok(exit_codes::NOT_FOUND);
    }

    let references = snapshot.find_references(name);
    if out.json() {
        let refs: Vec<_> = references
            .iter()
            .map(|loc| {
                serde_json::json!({
                    "file": loc.file.display().to_string(),
                    "line": loc.line,
                    "column": loc.column,
                })
            })
            .collect();
        out.print_json(&refs)?;
    } else if !out.quiet {
        for loc in references {
            println!("{}:{}:{}", loc.file.display(), loc.line, loc.column);
        }
    }

    Ok(exit_codes::SUCCESS)
}

fn cmd_children(snapshot: &Snapshot, name: Option<&str>, out: Output) -> Result<u8> {
    let children: Vec<&Definition> = match name.map(|n| n.trim_start_matches(SIGIL)) {
        None | Some("") => snapshot.table().roots().collect(),
        Some(name) => {
            if !snapshot.table().contains_full_name(name) {
                if !out.quiet {
                    eprintln!("Definition not found: {}", name);
                }
                return Ok(exit_codes::NOT_FOUND);
            }
            snapshot.children(name)
        }
    };

    print_definitions(&children, out)?;
    Ok(exit_codes::SUCCESS)
}

fn cmd_complete(
    snapshot: &Snapshot,
    typed: &str,
    file: Option<&Path>,
    line: Option<usize>,
    out: Output,
) -> Result<u8> {
    let candidates = if typed.starts_with(SIGIL) || typed.contains('.') {
        snapshot.suggest_completions(typed)
    } else {
        // Keyword context comes from everything above the cursor line
        let prefix = match (file, line) {
            (Some(file), Some(line)) => {
                let text = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                text.lines()
                    .take(line.saturating_sub(1))
                    .map(|l| format!("{}\n", l))
                    .collect::<String>()
            }
            _ => String::new(),
        };
        let file = file.unwrap_or_else(|| Path::new("input.mql"));

        let mut candidates = keyword_completions(file, &prefix);
        candidates.extend(snapshot.suggest_completions(""));
        candidates
    };

    // Only the partial segment after the last dot narrows the list
    let partial = typed
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .trim_start_matches(SIGIL)
        .to_uppercase();
    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.label.to_uppercase().starts_with(&partial))
        .collect();

    if candidates.is_empty() {
        if out.json() {
            out.print_json(&candidates)?;
        }
        return Ok(exit_codes::NOT_FOUND);
    }

    if out.json() {
        out.print_json(&candidates)?;
    } else if !out.quiet {
        for candidate in &candidates {
            match &candidate.detail {
                Some(detail) => println!("{:<30} {}", candidate.label, detail),
                None => println!("{}", candidate.label),
            }
        }
    }

    Ok(exit_codes::SUCCESS)
}

fn cmd_symbols(snapshot: &Snapshot, pattern: &str, fuzzy: bool, out: Output) -> Result<u8> {
    let table = snapshot.table();
    let pattern = pattern.trim_start_matches(SIGIL);

    if fuzzy {
        // Fuzzy search mode - find full names within edit distance
        let matches: Vec<(&Definition, usize)> =
            find_similar(pattern, table.full_names(), DEFAULT_MAX_DISTANCE, 100)
                .into_iter()
                .filter_map(|s| table.lookup(&s.value).map(|def| (def, s.distance)))
                .collect();

        if out.json() {
            let symbols: Vec<_> = matches
                .iter()
                .map(|(def, distance)| {
                    let mut value = definition_json(def, out.concise);
                    value["distance"] = serde_json::json!(distance);
                    value
                })
                .collect();
            out.print_json(&symbols)?;
        } else if !out.quiet {
            for (def, distance) in &matches {
                println!("{} (distance: {})", definition_line(def), distance);
            }
        }
        return Ok(if matches.is_empty() {
            exit_codes::NOT_FOUND
        } else {
            exit_codes::SUCCESS
        });
    }

    let matches = table.search(pattern);
    if matches.is_empty() && !out.json() && !out.quiet {
        let names: Vec<&str> = table.full_names();
        let suggestions = find_similar(pattern, names, DEFAULT_MAX_DISTANCE, DEFAULT_MAX_SUGGESTIONS);
        if !suggestions.is_empty() {
            eprintln!("No matches. Did you mean:");
            for suggestion in &suggestions {
                eprintln!("  {}", suggestion.value);
            }
        }
    }

    print_definitions(&matches, out)?;
    Ok(if matches.is_empty() {
        exit_codes::NOT_FOUND
    } else {
        exit_codes::SUCCESS
    })
}

/// Watch for file changes
fn cmd_watch(session: &Session, out: Output) -> Result<u8> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;

    if !out.quiet {
        eprintln!("Building initial index...");
    }
    report_rebuild(session, out);

    let mut watcher = SourceWatcher::new(session.workspace.root(), session.workspace.config())
        .context("Failed to create file watcher")?;
    watcher.start().context("Failed to start watching")?;

    if !out.quiet {
        eprintln!("Watching for changes... (Ctrl+C to stop)");
    }

    while running.load(Ordering::SeqCst) {
        let events = watcher.wait_timeout(Duration::from_millis(250));
        if events.is_empty() {
            continue;
        }
        if !out.quiet {
            for event in &events {
                match event {
                    WatchEvent::Created(path) => eprintln!("Created: {}", path.display()),
                    WatchEvent::Modified(path) => eprintln!("Updated: {}", path.display()),
                    WatchEvent::Deleted(path) => eprintln!("Deleted: {}", path.display()),
                    WatchEvent::Renamed(old, new) => {
                        eprintln!("Renamed: {} -> {}", old.display(), new.display())
                    }
                }
            }
        }
        report_rebuild(session, out);
    }

    watcher.stop().context("Failed to stop watching")?;
    Ok(exit_codes::SUCCESS)
}

/// Rebuild and print the summary. Failed rebuilds keep the last good index.
fn report_rebuild(session: &Session, out: Output) {
    match session.rebuild() {
        Ok(snapshot) => {
            let summary = snapshot.summary();
            if out.json() {
                if let Ok(line) = serde_json::to_string(&summary) {
                    println!("{}", line);
                }
            } else {
                for diagnostic in snapshot.diagnostics().values().flatten() {
                    println!("{}", diagnostic);
                }
                println!(
                    "[{}] {} definitions, {} errors, {} warnings",
                    summary.version, summary.definitions, summary.errors, summary.warnings
                );
            }
        }
        Err(e) => eprintln!("Error: {:#}", e),
    }
}

fn print_definitions(defs: &[&Definition], out: Output) -> Result<()> {
    if out.json() {
        let symbols: Vec<_> = defs.iter().map(|def| definition_json(def, out.concise)).collect();
        out.print_json(&symbols)?;
    } else if !out.quiet {
        for def in defs {
            println!("{}", definition_line(def));
        }
    }
    Ok(())
}

fn definition_json(def: &Definition, concise: bool) -> serde_json::Value {
    if concise {
        serde_json::json!({
            "full_name": def.full_name,
            "file": def.location.file.display().to_string(),
            "line": def.location.line,
        })
    } else {
        serde_json::json!({
            "name": def.name,
            "full_name": def.full_name,
            "kind": def.kind.to_string(),
            "file": def.location.file.display().to_string(),
            "line": def.location.line,
            "column": def.location.column,
        })
    }
}

fn definition_line(def: &Definition) -> String {
    format!(
        "{:<40} {}:{}:{:<8} {}",
        def.full_name,
        def.location.file.display(),
        def.location.line,
        def.location.column,
        def.kind
    )
}

fn get_line_content(file: &Path, line: usize) -> Option<String> {
    let content = std::fs::read_to_string(file).ok()?;
    content.lines().nth(line.checked_sub(1)?).map(|s| s.to_string())
}
