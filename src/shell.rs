//! Interactive query loop.
//!
//! Reads one query per line, hands it to a [`QueryHandler`] and prints the
//! answer. The loop ends on a quit word, end of input, or the interrupt
//! future resolving.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Words that end the session, compared case-insensitively.
pub const QUIT_WORDS: &[&str] = &["quit", "exit", "q", "退出"];

const BANNER: &str = "MCP client started. Type your queries or 'quit' to exit.";
const PROMPT: &str = "Query: ";

/// Answers one query.
#[async_trait::async_trait]
pub trait QueryHandler: Send {
    async fn handle(&mut self, query: &str) -> anyhow::Result<String>;
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    Quit,
    Interrupted,
    EndOfInput,
}

/// True when `line` is one of the [`QUIT_WORDS`].
pub fn is_quit(line: &str) -> bool {
    let line = line.trim();
    QUIT_WORDS.iter().any(|w| line.eq_ignore_ascii_case(w))
}

/// Run the loop until quit, end of input, or `interrupt` resolves.
///
/// A failed turn prints `Error: <e>` and the loop continues.
///
/// # Errors
///
/// Returns an error only when reading input or writing output fails.
pub async fn run<R, W, H, I>(
    mut input: R,
    mut output: W,
    handler: &mut H,
    interrupt: I,
) -> anyhow::Result<ShellExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    H: QueryHandler + ?Sized,
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);

    output.write_all(format!("\n{BANNER}\n").as_bytes()).await?;

    let mut buf = Vec::new();
    loop {
        output.write_all(format!("\n{PROMPT}").as_bytes()).await?;
        output.flush().await?;

        buf.clear();
        let read = tokio::select! {
            read = input.read_until(b'\n', &mut buf) => read?,
            () = &mut interrupt => {
                output.write_all(b"\n").await?;
                tracing::info!("Interrupted while waiting for input");
                return Ok(ShellExit::Interrupted);
            }
        };
        if read == 0 {
            return Ok(ShellExit::EndOfInput);
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(bytes = buf.len(), "Input line is not valid UTF-8");
            output
                .write_all(b"\nError: input is not valid UTF-8\n")
                .await?;
            continue;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_quit(query) {
            return Ok(ShellExit::Quit);
        }

        let result = tokio::select! {
            result = handler.handle(query) => result,
            () = &mut interrupt => {
                output.write_all(b"\n").await?;
                tracing::info!("Interrupted during a turn");
                return Ok(ShellExit::Interrupted);
            }
        };

        match result {
            Ok(answer) => output.write_all(format!("\n{answer}\n").as_bytes()).await?,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Turn failed");
                output.write_all(format!("\nError: {e:#}\n").as_bytes()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    #[async_trait::async_trait]
    impl QueryHandler for Recorder {
        async fn handle(&mut self, query: &str) -> anyhow::Result<String> {
            self.seen.push(query.to_string());
            if query == "boom" {
                anyhow::bail!("backend unavailable");
            }
            Ok(format!("answer to {query}"))
        }
    }

    async fn drive(input: &str, handler: &mut Recorder) -> (ShellExit, String) {
        drive_bytes(input.as_bytes(), handler).await
    }

    async fn drive_bytes(input: &[u8], handler: &mut Recorder) -> (ShellExit, String) {
        let mut out = Vec::new();
        let exit = run(input, &mut out, handler, std::future::pending())
            .await
            .unwrap();
        (exit, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_quit_words() {
        for w in ["quit", "EXIT", " q ", "退出", "Quit"] {
            assert!(is_quit(w), "{w}");
        }
        assert!(!is_quit("quitting"));
        assert!(!is_quit(""));
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let mut handler = Recorder::default();
        let (exit, out) = drive("\n   \nquit\n", &mut handler).await;
        assert_eq!(exit, ShellExit::Quit);
        assert!(handler.seen.is_empty());
        assert_eq!(out.matches(PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_errors_do_not_end_the_loop() {
        let mut handler = Recorder::default();
        let (exit, out) = drive("boom\n天气\n", &mut handler).await;
        assert_eq!(exit, ShellExit::EndOfInput);
        assert_eq!(handler.seen, ["boom", "天气"]);
        assert!(out.contains("Error: backend unavailable"));
        assert!(out.contains("answer to 天气"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_reported_and_skipped() {
        let mut handler = Recorder::default();
        let (exit, out) = drive_bytes(b"\xff\xfe bad\n\xe5\xa4\xa9\xe6\xb0\x94\nquit\n", &mut handler).await;
        assert_eq!(exit, ShellExit::Quit);
        assert_eq!(handler.seen, ["天气"]);
        assert!(out.contains("Error: input is not valid UTF-8"));
    }

    struct Hanging {
        started: Option<tokio::sync::oneshot::Sender<()>>,
    }

    #[async_trait::async_trait]
    impl QueryHandler for Hanging {
        async fn handle(&mut self, _query: &str) -> anyhow::Result<String> {
            if let Some(tx) = self.started.take() {
                let _ = tx.send(());
            }
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_interrupt_cancels_running_turn() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut handler = Hanging { started: Some(tx) };
        let interrupt = async {
            // fires only once the turn is underway
            let _ = rx.await;
        };
        let mut out = Vec::new();
        let exit = run(&b"slow query\n"[..], &mut out, &mut handler, interrupt)
            .await
            .unwrap();
        assert_eq!(exit, ShellExit::Interrupted);
        assert!(handler.started.is_none());
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting() {
        let mut handler = Recorder::default();
        let (reader, _writer) = tokio::io::duplex(64);
        let mut out = Vec::new();
        let exit = run(
            tokio::io::BufReader::new(reader),
            &mut out,
            &mut handler,
            std::future::ready(()),
        )
        .await
        .unwrap();
        assert_eq!(exit, ShellExit::Interrupted);
    }
}
