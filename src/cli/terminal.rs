//! Terminal front end.
//!
//! A dedicated thread reads stdin lines. The loop hands each line either
//! to the oldest open prompt or, when no prompt is waiting, to the command
//! parser. Commands run as their own tasks so they can prompt while the
//! loop keeps answering.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::command::OperatorCommand;
use crate::controller::{Controller, CONSOLE};
use crate::gate::{Password, PromptReceiver, PromptRequest};
use crate::scheduler::cancelled;

/// Read stdin on its own thread; closes the channel at EOF.
///
/// Not a runtime blocking task: a pending read must not hold up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn show(prompt: &PromptRequest) {
    match prompt {
        PromptRequest::Confirm { title, message, .. } => print!("[{}] {} (y/N) ", title, message),
        PromptRequest::Password { title, message, hint, .. } => match hint {
            Some(hint) => print!("[{}] {} (hint: {}, empty to cancel): ", title, message, hint),
            None => print!("[{}] {} (empty to cancel): ", title, message),
        },
    }
    let _ = io::stdout().flush();
}

/// Resolve a prompt from one line of operator input.
pub fn answer(prompt: PromptRequest, line: &str) {
    match prompt {
        PromptRequest::Confirm { respond, .. } => {
            let yes = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
            let _ = respond.send(yes);
        }
        PromptRequest::Password { respond, .. } => {
            let pw = (!line.is_empty()).then(|| Password::new(line));
            let _ = respond.send(pw);
        }
    }
}

fn cancel(prompt: PromptRequest) {
    match prompt {
        PromptRequest::Confirm { respond, .. } => {
            let _ = respond.send(false);
        }
        PromptRequest::Password { respond, .. } => {
            let _ = respond.send(None);
        }
    }
}

fn spawn_command(controller: &Arc<Controller>, line: &str) {
    let cmd = match OperatorCommand::parse(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(target: CONSOLE, "{}", e);
            return;
        }
    };
    let controller = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = cmd.execute(controller).await {
            warn!(target: CONSOLE, "{}", e);
        }
    });
}

/// Drive prompts and commands until shutdown or end of input.
pub async fn run(controller: Arc<Controller>, mut prompts: PromptReceiver) {
    let mut lines = spawn_stdin_reader();
    let mut stop = controller.shutdown_token().subscribe();
    let mut waiting: VecDeque<PromptRequest> = VecDeque::new();
    println!("Type 'help' for commands.");

    loop {
        tokio::select! {
            _ = cancelled(&mut stop) => break,
            Some(prompt) = prompts.recv() => {
                if waiting.is_empty() {
                    show(&prompt);
                }
                waiting.push_back(prompt);
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("stdin closed");
                    controller.shutdown();
                    break;
                };
                match waiting.pop_front() {
                    Some(prompt) => {
                        answer(prompt, line.trim_end_matches(['\r', '\n']));
                        if let Some(next) = waiting.front() {
                            show(next);
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => spawn_command(&controller, &line),
                }
            }
        }
    }

    for prompt in waiting.drain(..) {
        cancel(prompt);
    }
}
