//! parsaur-lsp: language server for the Parsaur definitions language
//!
//! This server provides:
//! - Go-to-definition and find-references for `?` terms
//! - Hover with kind, full name and declaration site
//! - Completion for `?` / `.` member access and context keywords
//! - Quick fixes for invalid terms and misspelled keywords
//! - Workspace symbol search
//! - Workspace-wide diagnostics, refreshed on every save
//!
//! The index is rebuilt from disk on startup and on save. Cursor requests
//! read the open buffer from the in-memory document store.

mod completion;
mod document_store;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use document_store::DocumentStore;
use parsaur::completion::KEYWORDS;
use parsaur::fuzzy::keyword_fixes;
use parsaur::resolve::sequence_at;
use parsaur::{Config, Definition, Severity, Snapshot, Workspace};
use tokio::sync::{Mutex, RwLock};
use tower_lsp::jsonrpc::Result as LspResult;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{error, info, warn};

const SERVER_NAME: &str = "parsaur-lsp";

/// The language server backend
struct Backend {
    client: Client,
    /// Set once the client tells us the workspace root
    workspace: Arc<RwLock<Option<Arc<Workspace>>>>,
    workspace_root: Arc<RwLock<Option<PathBuf>>>,
    documents: DocumentStore,
    /// Files that currently have diagnostics on the client
    published: Arc<Mutex<BTreeSet<PathBuf>>>,
    /// Version of the last snapshot whose diagnostics were sent
    published_version: AtomicU64,
}

impl Backend {
    async fn workspace(&self) -> Option<Arc<Workspace>> {
        self.workspace.read().await.clone()
    }

    async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        Some(self.workspace().await?.snapshot().await)
    }

    /// Rebuild the index and push diagnostics for every file.
    async fn rebuild(&self) -> Result<()> {
        let workspace = self.workspace().await.context("No workspace root set")?;
        let snapshot = workspace.rebuild().await.context("Index rebuild failed")?;
        let summary = snapshot.summary();
        info!(
            "Indexed {} definitions in {} files ({} errors)",
            summary.definitions, summary.files, summary.errors
        );
        self.publish_snapshot_diagnostics(&snapshot).await;
        Ok(())
    }

    async fn rebuild_and_report(&self) {
        if let Err(e) = self.rebuild().await {
            error!("{:#}", e);
            self.client
                .log_message(MessageType::ERROR, format!("{:#}", e))
                .await;
        }
    }

    async fn publish_snapshot_diagnostics(&self, snapshot: &Snapshot) {
        let mut published = self.published.lock().await;
        // Another rebuild may have finished and published while we waited
        if snapshot.version() < self.published_version.load(Ordering::SeqCst) {
            return;
        }
        self.published_version.store(snapshot.version(), Ordering::SeqCst);

        let mut now = BTreeSet::new();
        for (file, diagnostics) in snapshot.diagnostics() {
            let Ok(uri) = Url::from_file_path(file) else {
                continue;
            };
            if diagnostics.is_empty() && !published.contains(file) {
                continue;
            }
            let items = diagnostics.iter().map(to_lsp_diagnostic).collect();
            self.client.publish_diagnostics(uri, items, None).await;
            if !diagnostics.is_empty() {
                now.insert(file.clone());
            }
        }

        // Files that disappeared since the last rebuild
        for file in published.difference(&now) {
            if snapshot.diagnostics().contains_key(file) {
                continue;
            }
            if let Ok(uri) = Url::from_file_path(file) {
                self.client.publish_diagnostics(uri, Vec::new(), None).await;
            }
        }

        *published = now;
    }

    /// Line text at a position, from the open buffer or disk.
    async fn line_at(&self, file: &Path, pos: Position) -> Option<String> {
        let doc = self.documents.get(file).await?;
        doc.line(pos.line).map(str::to_string)
    }

    /// The definition named or declared under the cursor.
    async fn definition_under_cursor(&self, file: &Path, pos: Position) -> Option<(Arc<Snapshot>, String)> {
        let snapshot = self.snapshot().await?;
        let line = self.line_at(file, pos).await?;
        let full_name = definition_at(&snapshot, file, &line, pos)?.full_name.clone();
        Some((snapshot, full_name))
    }
}

/// A reference under the cursor resolves by full name; a declaration name
/// under the cursor resolves to that declaration.
fn definition_at<'a>(snapshot: &'a Snapshot, file: &Path, line: &str, pos: Position) -> Option<&'a Definition> {
    let sequence = sequence_at(line, pos.character as usize)?;
    if let Some(def) = snapshot.table().lookup(sequence.name()) {
        if sequence.referenced || def.location.file == file {
            return Some(def);
        }
    }

    let (line_no, column) = (pos.line + 1, pos.character + 1);
    snapshot
        .table()
        .definitions_in_file(file)
        .into_iter()
        .find(|d| d.location.line == line_no && d.location.column <= column && column <= d.location.end_column)
}

fn to_lsp_range(loc: &parsaur::Location) -> Range {
    Range {
        start: Position {
            line: loc.line.saturating_sub(1),
            character: loc.column.saturating_sub(1),
        },
        end: Position {
            line: loc.end_line.saturating_sub(1),
            character: loc.end_column.saturating_sub(1),
        },
    }
}

fn to_lsp_location(loc: &parsaur::Location) -> Option<Location> {
    let uri = Url::from_file_path(&loc.file).ok()?;
    Some(Location {
        uri,
        range: to_lsp_range(loc),
    })
}

fn to_lsp_diagnostic(diagnostic: &parsaur::Diagnostic) -> Diagnostic {
    Diagnostic {
        range: to_lsp_range(&diagnostic.location),
        severity: Some(match diagnostic.severity {
            Severity::Error => DiagnosticSeverity::ERROR,
            Severity::Warning => DiagnosticSeverity::WARNING,
        }),
        source: Some(SERVER_NAME.to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

fn to_lsp_symbol_kind(kind: parsaur::DefinitionKind) -> SymbolKind {
    use parsaur::DefinitionKind as K;
    match kind {
        K::Tag => SymbolKind::CONSTANT,
        K::Int => SymbolKind::NUMBER,
        K::Base => SymbolKind::CLASS,
        K::Grid => SymbolKind::STRUCT,
        K::List => SymbolKind::ENUM,
        K::Link => SymbolKind::INTERFACE,
        K::Constructor => SymbolKind::CONSTRUCTOR,
        K::Inherit => SymbolKind::OBJECT,
    }
}

fn hover_text(def: &Definition) -> String {
    let file_name = def
        .location
        .file
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unknown");
    let mut text = format!("**{}** `{}`", def.kind.keyword(), def.full_name);
    if let Some(target) = &def.target {
        text.push_str(&format!("\n\n*Inherits* `{}`", target));
    }
    if !def.children.is_empty() {
        text.push_str(&format!("\n\n*Children:* {}", def.children.join(", ")));
    }
    text.push_str(&format!(
        "\n\n---\n\n*Defined in* `{}` *at line {}*",
        file_name, def.location.line
    ));
    text
}

fn replace_action(uri: &Url, title: String, range: Range, new_text: String, diagnostic: Option<Diagnostic>) -> CodeActionOrCommand {
    let mut changes = HashMap::new();
    changes.insert(uri.clone(), vec![TextEdit { range, new_text }]);
    CodeActionOrCommand::CodeAction(CodeAction {
        title,
        kind: Some(CodeActionKind::QUICKFIX),
        diagnostics: diagnostic.map(|d| vec![d]),
        edit: Some(WorkspaceEdit {
            changes: Some(changes),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> LspResult<InitializeResult> {
        #[allow(deprecated)]
        let root = params
            .root_uri
            .and_then(|uri| uri.to_file_path().ok())
            .or_else(|| {
                params
                    .workspace_folders
                    .and_then(|folders| folders.first().and_then(|f| f.uri.to_file_path().ok()))
            });
        *self.workspace_root.write().await = root;

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::INCREMENTAL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                definition_provider: Some(OneOf::Left(true)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                references_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![".".to_string(), "?".to_string()]),
                    resolve_provider: Some(false),
                    ..Default::default()
                }),
                code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: SERVER_NAME.to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("Parsaur language server initialized");

        let Some(root) = self.workspace_root.read().await.clone() else {
            warn!("No workspace root set");
            return;
        };
        let config = Config::load(&root);
        info!(
            "Loaded config: extensions={:?}, max_files={:?}",
            config.extensions, config.max_files
        );
        *self.workspace.write().await = Some(Arc::new(Workspace::new(&root, config, parsaur::DiskSource)));

        self.rebuild_and_report().await;
    }

    async fn shutdown(&self) -> LspResult<()> {
        info!("Parsaur language server shutting down");
        Ok(())
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> LspResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let pos = params.text_document_position_params.position;
        let Ok(file) = uri.to_file_path() else {
            return Ok(None);
        };

        let Some((snapshot, full_name)) = self.definition_under_cursor(&file, pos).await else {
            return Ok(None);
        };
        info!("Looking up definition for: {}", full_name);

        Ok(snapshot
            .resolve_reference(&full_name)
            .and_then(to_lsp_location)
            .map(GotoDefinitionResponse::Scalar))
    }

    async fn hover(&self, params: HoverParams) -> LspResult<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let pos = params.text_document_position_params.position;
        let Ok(file) = uri.to_file_path() else {
            return Ok(None);
        };

        let Some((snapshot, full_name)) = self.definition_under_cursor(&file, pos).await else {
            return Ok(None);
        };
        let Some(def) = snapshot.table().lookup(&full_name) else {
            return Ok(None);
        };

        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: hover_text(def),
            }),
            range: None,
        }))
    }

    async fn references(&self, params: ReferenceParams) -> LspResult<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let pos = params.text_document_position.position;
        let Ok(file) = uri.to_file_path() else {
            return Ok(None);
        };

        let Some((snapshot, full_name)) = self.definition_under_cursor(&file, pos).await else {
            return Ok(None);
        };
        info!("Finding references for: {}", full_name);

        let mut locations: Vec<Location> = snapshot
            .find_references(&full_name)
            .iter()
            .filter_map(to_lsp_location)
            .collect();
        if params.context.include_declaration {
            if let Some(decl) = snapshot.resolve_reference(&full_name).and_then(to_lsp_location) {
                locations.insert(0, decl);
            }
        }

        Ok((!locations.is_empty()).then_some(locations))
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> LspResult<Option<Vec<SymbolInformation>>> {
        let query = params.query.trim();
        if query.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let Some(snapshot) = self.snapshot().await else {
            return Ok(None);
        };

        let table = snapshot.table();
        let mut matches = table.search(query);
        if matches.is_empty() {
            let needle = query.to_lowercase();
            matches = table
                .iter()
                .filter(|d| d.full_name.to_lowercase().contains(&needle))
                .collect();
        }

        #[allow(deprecated)]
        let symbols = matches
            .into_iter()
            .take(50)
            .filter_map(|def| {
                Some(SymbolInformation {
                    name: def.name.clone(),
                    kind: to_lsp_symbol_kind(def.kind),
                    location: to_lsp_location(&def.location)?,
                    container_name: (!def.context.is_empty()).then(|| def.context.clone()),
                    tags: None,
                    deprecated: None,
                })
            })
            .collect();

        Ok(Some(symbols))
    }

    async fn completion(&self, params: CompletionParams) -> LspResult<Option<CompletionResponse>> {
        let uri = &params.text_document_position.text_document.uri;
        let pos = params.text_document_position.position;
        let Ok(file) = uri.to_file_path() else {
            return Ok(None);
        };
        let (Some(snapshot), Some(doc)) = (self.snapshot().await, self.documents.get(&file).await) else {
            return Ok(None);
        };

        let items = completion::completions(&snapshot, &file, doc.prefix(&pos));
        Ok((!items.is_empty()).then_some(CompletionResponse::Array(items)))
    }

    async fn code_action(&self, params: CodeActionParams) -> LspResult<Option<CodeActionResponse>> {
        let uri = &params.text_document.uri;
        let Ok(file) = uri.to_file_path() else {
            return Ok(None);
        };
        let Some(snapshot) = self.snapshot().await else {
            return Ok(None);
        };

        let mut actions = Vec::new();

        for diagnostic in &params.context.diagnostics {
            let Some(term) = diagnostic
                .message
                .strip_prefix("Term: ")
                .and_then(|rest| rest.strip_suffix(" is invalid!"))
            else {
                continue;
            };
            for suggestion in snapshot.suggest_fixes(term) {
                actions.push(replace_action(
                    uri,
                    format!("Replace with {}", suggestion.value),
                    diagnostic.range,
                    suggestion.value,
                    Some(diagnostic.clone()),
                ));
            }
        }

        if let Some(line) = self.line_at(&file, params.range.start).await {
            if let Some(word) = sequence_at(&line, params.range.start.character as usize) {
                let range = Range {
                    start: Position::new(params.range.start.line, word.start as u32),
                    end: Position::new(params.range.start.line, word.end as u32),
                };
                for keyword in keyword_fixes(&word.text, KEYWORDS) {
                    actions.push(replace_action(
                        uri,
                        format!("Change to {}", keyword),
                        range,
                        keyword.to_string(),
                        None,
                    ));
                }
            }
        }

        Ok((!actions.is_empty()).then_some(actions))
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = &params.text_document.uri;
        info!("File opened: {}", uri);
        self.documents
            .open(uri, params.text_document.text, params.text_document.version)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        self.documents
            .change(
                &params.text_document.uri,
                params.content_changes,
                params.text_document.version,
            )
            .await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        info!("Rebuilding after save: {}", params.text_document.uri);
        self.rebuild_and_report().await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = &params.text_document.uri;
        info!("File closed: {}", uri);
        // Diagnostics are workspace-wide and stay published
        self.documents.close(uri).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Parsaur language server");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend {
        client,
        workspace: Arc::new(RwLock::new(None)),
        workspace_root: Arc::new(RwLock::new(None)),
        documents: DocumentStore::new(),
        published: Arc::new(Mutex::new(BTreeSet::new())),
        published_version: AtomicU64::new(0),
    });

    Server::new(stdin, stdout, socket).serve(service).await;
}
