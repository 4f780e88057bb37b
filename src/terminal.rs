//! Interactive terminal loop

use crate::llm::ChatTransport;
use crate::runtime::{ConversationOrchestrator, ToolSession};
use crate::state_machine::LifecycleEvent;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read queries line by line until `quit` or end of input, rendering each
/// query's events to `out` as they arrive.
pub async fn run<C, T, R, W>(
    orchestrator: &mut ConversationOrchestrator<C, T>,
    input: R,
    out: &mut W,
) -> std::io::Result<()>
where
    C: ChatTransport,
    T: ToolSession,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let names: Vec<&str> = orchestrator
        .available_tools()
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    writeln!(out, "Connected. Available tools: {}", names.join(", "))?;
    writeln!(out, "Type a query, or 'quit' to exit.")?;

    let mut lines = input.lines();
    loop {
        write!(out, "\nQuery: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let mut failure = None;
        orchestrator
            .handle_query(query, |event| {
                let rendered = render(out, &event);
                let keep_going = rendered.is_ok();
                if let Err(e) = rendered {
                    failure = Some(e);
                }
                async move { keep_going }
            })
            .await;
        if let Some(e) = failure {
            return Err(e);
        }
    }

    Ok(())
}

fn render<W: Write>(out: &mut W, event: &LifecycleEvent) -> std::io::Result<()> {
    match event {
        LifecycleEvent::TextChunk { text } => write!(out, "{text}")?,
        LifecycleEvent::ToolCallStart { name, arguments } => {
            writeln!(out, "\n[Calling tool {name} with arguments {arguments}]")?;
        }
        LifecycleEvent::ToolCallResult { text } => writeln!(out, "[Tool result: {text}]")?,
        LifecycleEvent::ToolCallError { message } => writeln!(out, "[{message}]")?,
        LifecycleEvent::StreamError { message } => writeln!(out, "\n[Error: {message}]")?,
        LifecycleEvent::TurnEnd => writeln!(out)?,
    }
    out.flush()
}
