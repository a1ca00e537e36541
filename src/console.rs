use std::time::Duration;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleEvent {
    Init,
    Error,
    Closed,
    Line(String),
}

// What a line typed at the console asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Switch(String),
    Reset,
    Retry(String),
    Fault(String),
    Save,
    Load,
    Debug,
    Quit,
    Say(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Say(line.to_string()));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };
        let command = match (name.to_lowercase().as_str(), argument) {
            ("help", _) => Command::Help,
            ("list", _) => Command::List,
            ("switch", id) if !id.is_empty() => Command::Switch(id.to_string()),
            ("reset", _) => Command::Reset,
            ("retry", id) if !id.is_empty() => Command::Retry(id.to_string()),
            ("fault", id) if !id.is_empty() => Command::Fault(id.to_string()),
            ("save", _) => Command::Save,
            ("load", _) => Command::Load,
            ("debug", _) => Command::Debug,
            ("quit" | "exit", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Some(command)
    }
}

pub const HELP: &str = "\
/list             show every character and its state
/switch <id>      talk to a character
/reset            start the current conversation over
/retry <id>       try to bring a failed character up again
/fault <id>       mark a character as faulty
/save, /load      save or restore the current conversation
/debug            print the roster status
/quit             leave
anything else is said to the current character";

pub struct Console {
    pub task: JoinHandle<()>,
    pub cancellation_token: CancellationToken,
    pub event_rx: UnboundedReceiver<ConsoleEvent>,
    pub event_tx: UnboundedSender<ConsoleEvent>,
}

impl Console {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            task: tokio::spawn(async {}),
            cancellation_token: CancellationToken::new(),
            event_rx,
            event_tx,
        }
    }

    pub fn start(&mut self) {
        self.start_with(BufReader::new(tokio::io::stdin()));
    }

    // Reads lines from `input` until it closes or the console is cancelled.
    pub fn start_with<R>(&mut self, input: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.cancel();
        self.cancellation_token = CancellationToken::new();
        let cancellation_token = self.cancellation_token.clone();
        let event_tx = self.event_tx.clone();
        self.task = tokio::spawn(async move {
            let mut lines = input.lines();
            // A closed receiver means the console is going away; stop quietly.
            if event_tx.send(ConsoleEvent::Init).is_err() {
                return;
            }
            loop {
                let event = tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => ConsoleEvent::Line(line),
                        Ok(None) => ConsoleEvent::Closed,
                        Err(e) => {
                            log::error!("Failed to read from stdin: {}", e);
                            ConsoleEvent::Error
                        }
                    },
                };
                let closed = event == ConsoleEvent::Closed;
                if event_tx.send(event).is_err() || closed {
                    break;
                }
            }
        });
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub async fn stop(&mut self) {
        self.cancel();
        if tokio::time::timeout(Duration::from_millis(100), &mut self.task)
            .await
            .is_err()
        {
            log::warn!("Console task did not stop in time, aborting it");
            self.task.abort();
        }
    }

    pub async fn next(&mut self) -> Option<ConsoleEvent> {
        self.event_rx.recv().await
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
