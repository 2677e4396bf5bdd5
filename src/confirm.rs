// Confirmation sources for the executor's interactive gates.

use std::future::Future;
use std::sync::Mutex;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};

use crate::error::{Gate, ReconcileError};

pub trait Confirmer: Send + Sync {
    /// Ask the user to approve `prompt`; `lines` is the list being approved.
    fn confirm(
        &self,
        gate: Gate,
        prompt: &str,
        lines: &[String],
    ) -> impl Future<Output = Result<bool, ReconcileError>> + Send;
}

/// Prompts on stderr and reads a y/N answer per prompt from one buffered input,
/// so piped answers (`printf 'y\ny\n' | ...`) reach every prompt in turn.
pub struct StdinConfirmer<R = BufReader<Stdin>> {
    input: tokio::sync::Mutex<R>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for StdinConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> StdinConfirmer<R> {
    pub fn from_reader(input: R) -> Self {
        Self {
            input: tokio::sync::Mutex::new(input),
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> Confirmer for StdinConfirmer<R> {
    async fn confirm(
        &self,
        _gate: Gate,
        prompt: &str,
        lines: &[String],
    ) -> Result<bool, ReconcileError> {
        let mut out = tokio::io::stderr();
        let mut text = String::new();
        for line in lines {
            text.push_str("  ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(prompt);
        text.push_str(" [y/N] ");
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;

        let mut answer = String::new();
        self.input.lock().await.read_line(&mut answer).await?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/// Denies every prompt; for callers that must pass consent as explicit flags.
pub struct NonInteractive;

impl Confirmer for NonInteractive {
    async fn confirm(
        &self,
        gate: Gate,
        _prompt: &str,
        _lines: &[String],
    ) -> Result<bool, ReconcileError> {
        Err(ReconcileError::GateDenied {
            gate,
            detail: Some("no interactive terminal; pass the consent flag instead".into()),
        })
    }
}

/// Fixed answers per gate; records every prompt it was shown.
pub struct ScriptedConfirmer {
    pub general: bool,
    pub mutation: bool,
    asked: Mutex<Vec<Gate>>,
}

impl ScriptedConfirmer {
    pub fn new(general: bool, mutation: bool) -> Self {
        Self {
            general,
            mutation,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(answer: bool) -> Self {
        Self::new(answer, answer)
    }

    pub fn asked(&self) -> Vec<Gate> {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    async fn confirm(
        &self,
        gate: Gate,
        _prompt: &str,
        _lines: &[String],
    ) -> Result<bool, ReconcileError> {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(gate);
        Ok(match gate {
            Gate::MutationConfirmation => self.mutation,
            _ => self.general,
        })
    }
}
