//! Test output channels that captured log lines are echoed to.

use thiserror::Error;
use tokio::sync::mpsc;

/// The output channel no longer accepts lines.
///
/// Happens during teardown, once the test that owned the channel is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("test output is closed")]
pub struct OutputClosed;

/// Sink for human-readable log lines produced during a test.
pub trait TestOutput: Send + Sync {
    /// Write a single line.
    ///
    /// # Errors
    /// Returns [`OutputClosed`] when the channel has been torn down.
    fn write_line(&self, line: &str) -> Result<(), OutputClosed>;
}

/// Writes lines to stdout, where the test runner captures them per test.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl TestOutput for ConsoleOutput {
    fn write_line(&self, line: &str) -> Result<(), OutputClosed> {
        println!("{line}");
        Ok(())
    }
}

/// Forwards lines into a channel.
///
/// Reports [`OutputClosed`] once the receiving half is dropped.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelOutput {
    /// Create an output and the receiver that observes its lines.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TestOutput for ChannelOutput {
    fn write_line(&self, line: &str) -> Result<(), OutputClosed> {
        self.sender.send(line.to_string()).map_err(|_| OutputClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_output_reports_closed_after_receiver_drop() {
        let (output, mut rx) = ChannelOutput::new();
        assert_eq!(output.write_line("first"), Ok(()));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("first"));

        drop(rx);
        assert_eq!(output.write_line("second"), Err(OutputClosed));
    }
}
