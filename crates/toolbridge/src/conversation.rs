//! One user turn, end to end.
//!
//! A turn sends the system prompt, the retained history and the user's
//! message to the model, then looks for a tool call in the reply:
//!
//! - no call: the reply is the answer;
//! - a malformed or refused call: the error is shown and the model is not
//!   contacted again;
//! - an authorized call: the tool runs once, and the model gets exactly one
//!   follow-up request carrying the tool's raw output.

use std::collections::VecDeque;

use thiserror::Error;

use crate::config::{Config, DEFAULT_HISTORY_LIMIT};
use crate::gate::{Allowlist, DenyReason, GateDecision, authorize};
use crate::model::{ChatMessage, ChatModel, ModelError};
use crate::parser::{ParseError, parse_reply};
use crate::prompt::{ClockZone, system_prompt, tool_result_message};
use crate::session::{SessionError, ToolInvoker, ToolOutput};

/// Why a tool call in a reply did not run, or ran and failed.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The call block was malformed
    #[error("Malformed tool call: {0}")]
    MalformedCall(#[from] ParseError),
    /// The tool is not permitted to run unattended
    #[error("Tool '{0}' is not allowed to run automatically")]
    NotAllowlisted(String),
    /// The provider does not advertise the tool
    #[error("Tool '{0}' not found in available tools")]
    UnknownTool(String),
    /// The provider could not be reached
    #[error("Tool provider unavailable: {0}")]
    ProviderUnavailable(#[source] SessionError),
    /// The provider rejected the call
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed {
        /// Tool name
        tool: String,
        /// Provider's message
        message: String,
    },
}

impl TurnError {
    /// Whether this is a security denial rather than an ordinary failure.
    pub fn is_security_denial(&self) -> bool {
        matches!(self, TurnError::NotAllowlisted(_))
    }

    fn from_session(tool: &str, error: SessionError) -> Self {
        match error {
            SessionError::UnknownTool(name) => TurnError::UnknownTool(name),
            e if e.is_connection_error() => TurnError::ProviderUnavailable(e),
            e => TurnError::ToolFailed {
                tool: tool.to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<DenyReason> for TurnError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::NotAllowlisted(name) => TurnError::NotAllowlisted(name),
            DenyReason::UnknownTool(name) => TurnError::UnknownTool(name),
        }
    }
}

/// What happened during a turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model answered without calling a tool.
    Answered {
        /// The model's reply
        reply: String,
    },
    /// A tool ran and the model was asked to use its output.
    ToolExecuted {
        /// The reply containing the call
        reply: String,
        /// Tool that ran
        tool: String,
        /// Raw tool output
        output: ToolOutput,
        /// The model's follow-up answer
        follow_up: Result<String, ModelError>,
    },
    /// The reply contained a call that was not run, or that failed.
    Refused {
        /// The reply containing the call
        reply: String,
        /// Why
        error: TurnError,
    },
}

impl TurnOutcome {
    /// Text to show the user.
    pub fn render(&self) -> String {
        match self {
            TurnOutcome::Answered { reply } => reply.clone(),
            TurnOutcome::ToolExecuted {
                reply,
                tool,
                output,
                follow_up,
            } => {
                let notice = if output.is_error {
                    format!("[Tool {tool} reported an error]")
                } else {
                    format!("[Tool {tool} executed successfully]")
                };
                match follow_up {
                    Ok(text) => format!("{reply}\n{notice}\n{text}"),
                    Err(e) => format!(
                        "{reply}\n{notice}\n{}\nError: no follow-up from the model: {e}",
                        output.text
                    ),
                }
            }
            TurnOutcome::Refused { reply, error } => format!("{reply}\nError: {error}"),
        }
    }
}

/// Conversation state shared across turns.
#[derive(Debug)]
pub struct Conversation<M> {
    model: M,
    allowlist: Allowlist,
    clock: ClockZone,
    history: Vec<ChatMessage>,
    /// Length of each exchange in `history`, oldest first.
    exchanges: VecDeque<usize>,
    history_limit: usize,
}

impl<M: ChatModel> Conversation<M> {
    /// New conversation with an empty history, local time and the default
    /// history limit.
    pub fn new(model: M, allowlist: Allowlist) -> Self {
        Self {
            model,
            allowlist,
            clock: ClockZone::Local,
            history: Vec::new(),
            exchanges: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// New conversation using the allowlist, clock and history limit in `config`.
    pub fn from_config(model: M, config: &Config) -> Self {
        Self::new(model, config.allowlist.clone())
            .with_clock(config.clock_zone)
            .with_history_limit(config.history_limit)
    }

    /// Render time context in `clock`.
    pub fn with_clock(mut self, clock: ClockZone) -> Self {
        self.clock = clock;
        self
    }

    /// Keep at most `limit` messages of history.
    ///
    /// History is dropped a whole exchange at a time, oldest first, so the
    /// retained messages always start with the user message that opened an
    /// exchange. An exchange longer than `limit` is not kept at all.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self.trim_history();
        self
    }

    /// Retained messages, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget all history.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.exchanges.clear();
    }

    /// Run one turn. Only a failure of the first model request is an error;
    /// everything after it is reported through the outcome.
    pub async fn run_turn<I>(
        &mut self,
        invoker: &mut I,
        user_input: &str,
    ) -> Result<TurnOutcome, ModelError>
    where
        I: ToolInvoker + ?Sized,
    {
        let system = system_prompt(invoker.catalog(), &self.clock.now_context());
        let mut messages = Vec::with_capacity(self.history.len() + 4);
        messages.push(ChatMessage::system(system));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(user_input));

        let reply = self.model.chat(&messages).await?;
        let mut exchange = vec![
            ChatMessage::user(user_input),
            ChatMessage::assistant(reply.clone()),
        ];

        let call = match parse_reply(&reply) {
            Ok(None) => {
                self.remember(exchange);
                return Ok(TurnOutcome::Answered { reply });
            }
            Ok(Some(call)) => call,
            Err(e) => {
                tracing::info!(error = %e, "model produced a malformed tool call");
                self.remember(exchange);
                return Ok(TurnOutcome::Refused {
                    reply,
                    error: e.into(),
                });
            }
        };

        if let GateDecision::Denied(reason) = authorize(&call, &self.allowlist, invoker.catalog()) {
            if reason.is_security_denial() {
                tracing::warn!(
                    target: "audit",
                    tool = %call.name,
                    "tool call denied: not allowlisted"
                );
            } else {
                tracing::info!(tool = %call.name, %reason, "tool call denied");
            }
            self.remember(exchange);
            return Ok(TurnOutcome::Refused {
                reply,
                error: reason.into(),
            });
        }

        tracing::info!(tool = %call.name, "executing tool call");
        let output = match invoker.invoke(&call.name, call.arguments).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool invocation failed");
                self.remember(exchange);
                return Ok(TurnOutcome::Refused {
                    reply,
                    error: TurnError::from_session(&call.name, e),
                });
            }
        };

        let result_message = ChatMessage::user(tool_result_message(&call.name, &output.text));
        messages.push(ChatMessage::assistant(reply.clone()));
        messages.push(result_message.clone());
        exchange.push(result_message);

        let follow_up = self.model.chat(&messages).await;
        match &follow_up {
            Ok(text) => exchange.push(ChatMessage::assistant(text.clone())),
            Err(e) => tracing::warn!(error = %e, "follow-up model request failed"),
        }
        self.remember(exchange);

        Ok(TurnOutcome::ToolExecuted {
            reply,
            tool: call.name,
            output,
            follow_up,
        })
    }

    fn remember(&mut self, exchange: Vec<ChatMessage>) {
        self.exchanges.push_back(exchange.len());
        self.history.extend(exchange);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.history_limit {
            let Some(oldest) = self.exchanges.pop_front() else {
                self.history.clear();
                break;
            };
            self.history.drain(..oldest);
        }
    }
}
