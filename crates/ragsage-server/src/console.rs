//! Interactive line-oriented chat console.

use std::io::Write;

use ragsage_chat::{ChatError, ChatOrchestrator, ChatRequest, ChatResponse};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const BANNER_TITLE: &str = "=== Azure AI Chat Agent with SharePoint RAG ===";
const MAX_SOURCES_SHOWN: usize = 3;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Clear,
    Message(String),
}

impl Command {
    /// `None` for blank input.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Some(Command::Exit);
        }
        if line.eq_ignore_ascii_case("clear") {
            return Some(Command::Clear);
        }
        Some(Command::Message(line.to_string()))
    }
}

pub fn write_banner(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "{}", BANNER_TITLE)?;
    writeln!(out, "Ask questions about your Microsoft 365 content!")?;
    writeln!(out, "Type 'exit' or 'quit' to end the conversation.")?;
    writeln!(out, "Type 'clear' to clear the console.")?;
    writeln!(out)
}

/// Answer followed by up to three sources.
pub fn render_response(response: &ChatResponse) -> String {
    let mut text = format!("Assistant: {}\n", response.response);
    if !response.sources.is_empty() {
        text.push_str("\nSources:\n");
        for source in response.sources.iter().take(MAX_SOURCES_SHOWN) {
            text.push_str(&format!("  • {}\n", source.title));
            if source.has_url() {
                text.push_str(&format!("    {}\n", source.url));
            }
        }
    }
    text.push('\n');
    text
}

/// Read lines from `input` until exit or end of input.
///
/// `interrupt` resolves on Ctrl-C in the binary. At the prompt it ends the
/// session; during a turn it cancels that turn only.
pub async fn run<R, W, F, Fut>(
    orchestrator: &ChatOrchestrator,
    input: R,
    out: &mut W,
    interrupt: F,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!("Chat console started");
    write_banner(out)?;

    let mut lines = input.lines();
    loop {
        write!(out, "You: ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupt() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            writeln!(out, "Goodbye!")?;
            break;
        };

        match Command::parse(&line) {
            None => continue,
            Some(Command::Exit) => {
                writeln!(out, "Goodbye!")?;
                break;
            }
            Some(Command::Clear) => {
                write!(out, "{}", CLEAR_SCREEN)?;
                writeln!(out, "{}", BANNER_TITLE)?;
            }
            Some(Command::Message(message)) => {
                let cancel = CancellationToken::new();
                let request = ChatRequest::new(message);
                let turn = orchestrator.process(&request, &cancel);
                let interrupted = interrupt();
                tokio::pin!(turn, interrupted);

                let result = tokio::select! {
                    result = &mut turn => result,
                    _ = &mut interrupted => {
                        cancel.cancel();
                        turn.await
                    }
                };

                match result {
                    Ok(response) => write!(out, "{}", render_response(&response))?,
                    Err(ChatError::Cancelled) => {
                        warn!("Chat turn cancelled by user");
                        writeln!(out, "(cancelled)")?;
                        writeln!(out)?;
                    }
                    Err(e) => {
                        error!("Error in chat loop: {}", e);
                        writeln!(out, "Sorry, I encountered an error. Please try again.")?;
                        writeln!(out, "{}", e)?;
                        writeln!(out)?;
                    }
                }
            }
        }
    }

    Ok(())
}
