//! Interactive chat loop over a persisted scoping session.

#![allow(clippy::print_stdout)]

use dpscope::prelude::*;
use std::io::{self, Write};

/// Extra commands understood by the chat loop.
const HELP: &str = "\
Commands:
  help     - show this help
  history  - show the conversation so far
  state    - show captured fields and what is missing
  reset    - discard this session and start a new one
  exit     - leave (also: quit, bye)

Anything else is sent to the agent.";

/// REPL driving one session through a [`Conversation`].
#[derive(Debug)]
pub struct ChatLoop<A> {
    conversation: Conversation<A>,
    session: Session,
    prompt: String,
}

impl<A: Agent> ChatLoop<A> {
    /// Create a loop over an already resumed or created session.
    pub fn new(conversation: Conversation<A>, session: Session) -> Self {
        Self {
            conversation,
            session,
            prompt: "You: ".to_string(),
        }
    }

    /// Prompt printed before each input line.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// The session being driven.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Send one message and print the reply.
    ///
    /// # Errors
    ///
    /// Returns the turn's storage or agent error; the session keeps
    /// whatever was persisted before the failure.
    pub async fn send(&mut self, input: &str) -> Result<TurnOutcome> {
        let outcome = self.conversation.run_turn(&mut self.session, input).await?;
        println!("\nAgent: {}\n", outcome.reply);
        if outcome.completed {
            println!("[scope complete]");
            self.print_state();
        }
        Ok(outcome)
    }

    /// Run until the user exits or input ends.
    ///
    /// Failed turns are reported and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns an error only when stdin or stdout fails.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        println!("Data product scoping chat | session {}", self.session.id());
        println!("Type 'help' for commands, 'exit' to quit.");
        println!();

        loop {
            print!("{}", self.prompt);
            stdout.flush()?;

            let mut input = String::new();
            if stdin.read_line(&mut input)? == 0 {
                println!();
                break;
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match input.to_lowercase().as_str() {
                "exit" | "quit" | "bye" => break,
                "help" => {
                    println!("{HELP}\n");
                    continue;
                }
                "history" => {
                    self.print_history();
                    continue;
                }
                "state" => {
                    self.print_state();
                    continue;
                }
                "reset" => {
                    self.reset().await;
                    continue;
                }
                _ => {}
            }

            if let Err(e) = self.send(input).await {
                tracing::warn!(error = %e, "turn failed");
                println!("\n{}\n", DisplayError(&e));
            }
        }

        println!("Session saved. Resume with: dpscope chat --session {}", self.session.id());
        Ok(())
    }

    /// Replace the session with a fresh one.
    ///
    /// Failures are reported and the current session stays in use. Returns
    /// whether the session was replaced.
    pub async fn reset(&mut self) -> bool {
        match self.conversation.reset(&self.session).await {
            Ok(fresh) => {
                self.session = fresh;
                println!("Started new session {}\n", self.session.id());
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session.id(), error = %e, "reset failed");
                println!("\n{}\n", DisplayError(&e));
                false
            }
        }
    }

    /// Print the transcript.
    pub fn print_history(&self) {
        let messages = self.session.messages();
        if messages.is_empty() {
            println!("No conversation history yet.\n");
            return;
        }
        for (i, msg) in messages.iter().enumerate() {
            println!(
                "{:>3}. {:<9} {}",
                i + 1,
                msg.role.as_str().to_uppercase(),
                truncate_str(&msg.content, 100)
            );
        }
        println!();
    }

    /// Print captured fields and missing required fields.
    pub fn print_state(&self) {
        print_session_state(&self.session, self.conversation.store().required_fields());
    }
}

/// Print a session's fields, status and missing required fields.
pub fn print_session_state(session: &Session, required: &[String]) {
    println!("Status: {}", session.status());
    if session.fields().is_empty() {
        println!("No fields captured yet.");
    } else {
        for (name, value) in session.fields() {
            let rendered = value
                .as_str()
                .map_or_else(|| value.to_string(), ToString::to_string);
            println!("  {name:<12} {rendered}");
        }
    }
    let missing = session.missing_fields(required);
    if !missing.is_empty() {
        println!("Missing: {}", missing.join(", "));
    }
    println!();
}
