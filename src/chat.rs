//! Interactive chat loop.
//!
//! A [`Session`] owns everything one chat needs: the shared store, the
//! retriever, the conversation history, and the completion client. The
//! loop reads one line at a time and runs each turn to completion before
//! reading the next:
//!
//! | Input | Effect |
//! |-------|--------|
//! | `exit`, `quit`, `bye`, `shutdown`, `power down` | print the farewell and stop |
//! | `add a document` | ask for a path, ingest it, print a summary |
//! | `clear history` | forget the conversation so far |
//! | blank line | ignored |
//! | anything else | answer it from the knowledge base |
//!
//! A failed turn is reported and the loop reads the next line. Only store
//! corruption ends the session.

use anyhow::{bail, Context};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::completion::{CompletionProvider, OllamaChat};
use crate::config::Config;
use crate::conversation::ConversationManager;
use crate::embedding::{EmbeddingProvider, OllamaEmbedder};
use crate::error::Result;
use crate::http;
use crate::ingest::{IngestReport, Ingestor};
use crate::retriever::Retriever;
use crate::store::VectorStore;

pub const EXIT_COMMANDS: &[&str] = &["exit", "quit", "bye", "shutdown", "power down"];

pub const GREETING: &str =
    "Astro Bot booting up! Type 'quit' to exit or 'Add a document' to load a file.";

pub const FAREWELL: &str = "Until next time my curious companion!  Astro Bot to the stars!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    AddDocument,
    ClearHistory,
    Empty,
    Query(&'a str),
}

/// Classify one input line. Commands are matched case-insensitively after
/// trimming; everything else is a query.
pub fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    let lowered = trimmed.to_lowercase();
    if EXIT_COMMANDS.contains(&lowered.as_str()) {
        Command::Exit
    } else if lowered == "add a document" {
        Command::AddDocument
    } else if lowered == "clear history" {
        Command::ClearHistory
    } else {
        Command::Query(trimmed)
    }
}

pub struct Session {
    config: Config,
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    retriever: Retriever,
    conversation: ConversationManager,
}

impl Session {
    pub fn new(
        config: Config,
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let retriever = Retriever::new(store.clone(), embedder.clone());
        let conversation = ConversationManager::new(
            &config.conversation,
            config.retrieval.top_k,
            config.completion.system_prompt.clone(),
        );
        Self {
            config,
            store,
            embedder,
            completer,
            retriever,
            conversation,
        }
    }

    pub fn conversation(&self) -> &ConversationManager {
        &self.conversation
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Answer one question, streaming the answer to `out` as it arrives.
    ///
    /// On failure the pending exchange is dropped, so history only ever
    /// holds completed exchanges.
    pub async fn ask<W: Write + Send>(&mut self, question: &str, out: &mut W) -> Result<String> {
        let prompt = self.conversation.submit(&self.retriever, question).await?;

        let mut write_error: Option<std::io::Error> = None;
        let mut on_token = |token: &str| {
            if write_error.is_none() {
                if let Err(e) = out.write_all(token.as_bytes()).and_then(|_| out.flush()) {
                    write_error = Some(e);
                }
            }
        };

        let answer = match self.completer.complete(&prompt, &mut on_token).await {
            Ok(answer) => answer,
            Err(e) => {
                self.conversation.abort();
                return Err(e);
            }
        };
        if let Some(e) = write_error {
            self.conversation.abort();
            return Err(e.into());
        }

        self.conversation.complete(&answer)?;
        Ok(answer)
    }

    /// Ingest a file or folder into the live store and persist it.
    pub async fn add_document(&self, path: &Path) -> Result<IngestReport> {
        let ingestor = Ingestor {
            documents: &self.config.documents,
            chunking: &self.config.chunking,
            store: &self.store,
            embedder: self.embedder.as_ref(),
        };
        ingestor.ingest_path(path).await
    }

    /// Run the loop until an exit command or end of input.
    pub async fn run<R: BufRead, W: Write + Send>(&mut self, mut input: R, output: &mut W) -> Result<()> {
        writeln!(output, "{}", GREETING)?;
        info!(
            entries = self.store.len(),
            model = self.completer.model_name(),
            "chat session started"
        );

        loop {
            write!(output, "\nQuery: ")?;
            output.flush()?;
            let Some(line) = read_line(&mut input)? else {
                writeln!(output, "\n{}", FAREWELL)?;
                return Ok(());
            };

            match parse_command(&line) {
                Command::Empty => continue,
                Command::Exit => {
                    writeln!(output, "{}", FAREWELL)?;
                    return Ok(());
                }
                Command::ClearHistory => {
                    self.conversation.clear();
                    writeln!(output, "Conversation history cleared.")?;
                }
                Command::AddDocument => {
                    write!(output, "Enter document path: ")?;
                    output.flush()?;
                    let Some(path) = read_line(&mut input)? else {
                        writeln!(output, "\n{}", FAREWELL)?;
                        return Ok(());
                    };
                    let path = path.trim();
                    if path.is_empty() {
                        writeln!(output, "No path given.")?;
                        continue;
                    }
                    self.handle_add_document(Path::new(path), output).await?;
                }
                Command::Query(question) => {
                    write!(output, "\nAstro Bot: ")?;
                    output.flush()?;
                    match self.ask(question, output).await {
                        Ok(_) => writeln!(output)?,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, endpoint = e.is_endpoint(), "turn failed");
                            writeln!(output, "\nAstro Bot could not answer: {}", e)?;
                        }
                    }
                }
            }
        }
    }

    async fn handle_add_document<W: Write>(&self, path: &Path, output: &mut W) -> Result<()> {
        match self.add_document(path).await {
            Ok(report) => {
                writeln!(
                    output,
                    "Successfully added {} document chunks to vector store.",
                    report.chunks
                )?;
                for skipped in &report.skipped {
                    writeln!(output, "Skipped: {}", skipped)?;
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "add document failed");
                writeln!(output, "Error loading document: {}", e)?;
                Ok(())
            }
        }
    }
}

/// Run the `chat` command on stdin/stdout.
///
/// Checks that the model server answers, loads the index (building it from
/// `documents.root` when absent), then hands the terminal to the loop.
pub async fn run_chat(config: Config) -> anyhow::Result<()> {
    let version = http::server_version(&config.completion.url, config.completion.timeout())
        .await
        .with_context(|| format!("Cannot reach the model server at {}", config.completion.url))?;
    info!(version = %version, url = %config.completion.url, "model server is up");
    if config.embedding.url != config.completion.url {
        http::server_version(&config.embedding.url, config.embedding.timeout())
            .await
            .with_context(|| format!("Cannot reach the embedding server at {}", config.embedding.url))?;
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
    let completer: Arc<dyn CompletionProvider> = Arc::new(OllamaChat::new(&config.completion)?);

    let (store, found) = VectorStore::open_or_create(&config.store.path, config.store.metric)
        .with_context(|| format!("Failed to open index at {}", config.store.path.display()))?;
    check_index_model(&store, &config.embedding.model)?;
    let store = Arc::new(store);

    let mut session = Session::new(config, store, embedder, completer);
    if !found {
        let root = session.config.documents.root.clone();
        println!("No index found. Building it from {}...", root.display());
        let report = session
            .add_document(&root)
            .await
            .with_context(|| format!("Failed to ingest {}", root.display()))?;
        report.print_summary();
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    session.run(stdin.lock(), &mut stdout).await?;
    Ok(())
}

/// Vectors from different embedding models are not comparable, so an index
/// is only queried with the model that built it.
pub(crate) fn check_index_model(store: &VectorStore, model: &str) -> anyhow::Result<()> {
    match store.stats().model {
        Some(built_with) if built_with != model => bail!(
            "The index was built with embedding model '{}' but '{}' is configured. \
             Run `astrobot ingest --full` to rebuild it.",
            built_with,
            model
        ),
        _ => Ok(()),
    }
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
