//! Chat session: owns the conversation history and drives the
//! respond → dispatch loop until the model produces a final answer.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::dispatcher::{dispatch, ToolInvoker};
use super::errors::SessionError;
use super::types::Message;
use crate::inference::{Outcome, QueryHandler};

/// Default limit on consecutive tool rounds within one user turn.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUserInput,
    /// Inside a turn; `round` counts provider calls, starting at 1.
    Dispatching { round: usize },
    Terminated,
}

/// What the user sees for one turn: model text and tool transcript lines
/// in the order they happened, ending with the final answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReply {
    pub parts: Vec<String>,
}

impl TurnReply {
    pub fn render(&self) -> String {
        format!("Assistant: {}", self.parts.join("\n"))
    }
}

/// One conversation against one tool server.
pub struct ChatSession<H, I> {
    handler: H,
    invoker: I,
    history: Vec<Message>,
    state: SessionState,
    max_rounds: usize,
}

impl<H, I> ChatSession<H, I>
where
    H: QueryHandler,
    I: ToolInvoker,
{
    pub fn new(handler: H, invoker: I) -> Self {
        Self {
            handler,
            invoker,
            history: Vec::new(),
            state: SessionState::AwaitingUserInput,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Override the round limit. Zero is treated as one.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Process one user message to completion.
    ///
    /// Any error terminates the session and closes the tool server. Failed
    /// tool calls are not errors here; they come back as flagged results.
    pub async fn handle_turn(&mut self, input: &str) -> Result<TurnReply, SessionError> {
        if self.state == SessionState::Terminated {
            return Err(SessionError::Transport {
                reason: "session has been terminated".into(),
            });
        }

        match self.run_rounds(input).await {
            Ok(reply) => {
                self.state = SessionState::AwaitingUserInput;
                Ok(reply)
            }
            Err(e) => {
                tracing::error!(error = %e, exit_code = e.exit_code(), "session terminated");
                self.terminate().await;
                Err(e)
            }
        }
    }

    async fn run_rounds(&mut self, input: &str) -> Result<TurnReply, SessionError> {
        let tools = self.invoker.tools();
        self.history.push(Message::user(input));
        let mut reply = TurnReply::default();

        for round in 1..=self.max_rounds {
            self.state = SessionState::Dispatching { round };
            tracing::info!(
                round,
                history_len = self.history.len(),
                tool_count = tools.len(),
                model = self.handler.model(),
                "starting round"
            );

            match self.handler.respond(&self.history, &tools).await? {
                Outcome::FinalAnswer(text) => {
                    if !text.is_empty() {
                        reply.parts.push(text.clone());
                    }
                    self.history.push(Message::assistant(text));
                    tracing::info!(round, "final answer");
                    return Ok(reply);
                }
                Outcome::ToolCalls { text, calls } => {
                    if let Some(text) = &text {
                        reply.parts.push(text.clone());
                    }
                    tracing::info!(round, call_count = calls.len(), "model requested tools");
                    self.history.push(Message::assistant_tool_calls(text, calls.clone()));

                    let report = dispatch(&mut self.invoker, &calls).await?;
                    reply.parts.extend(report.transcript);
                    self.history
                        .extend(report.results.into_iter().map(Message::tool_result));
                }
            }
        }

        Err(SessionError::LoopGuard {
            rounds: self.max_rounds,
        })
    }

    /// Close the tool server and stop accepting input. Idempotent.
    pub async fn terminate(&mut self) {
        if self.state != SessionState::Terminated {
            self.invoker.close().await;
            self.state = SessionState::Terminated;
        }
    }

    /// Interactive line loop. Ends on `quit`/`exit`, end of input, or the
    /// first error (which is returned after being printed).
    pub async fn run_chat<R, W>(&mut self, input: R, mut output: W) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        output
            .write_all(b"\nMCP Client's Chat Started!\nType your queries or 'quit' to exit.\n")
            .await?;

        let mut lines = input.lines();
        let result = loop {
            output.write_all(b"\nYou: ").await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break Ok(());
            };
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
                break Ok(());
            }

            match self.handle_turn(query).await {
                Ok(reply) => {
                    output.write_all(format!("\n{}\n", reply.render()).as_bytes()).await?;
                }
                Err(e) => {
                    output.write_all(format!("\nError: {e}\n").as_bytes()).await?;
                    break Err(e);
                }
            }
        };

        self.terminate().await;
        output.write_all(b"\nGoodbye!\n").await?;
        output.flush().await?;
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
