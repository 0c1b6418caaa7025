use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Events driving the watch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// User pressed Enter: treat as the screen regaining focus
  Focus,
  /// Periodic tick for query polling
  Tick,
  /// Input closed or interrupted
  Quit,
}

/// Produces events from stdin lines, Ctrl-C and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        let event = match lines.next_line().await {
          Ok(Some(_)) => Event::Focus,
          Ok(None) | Err(_) => Event::Quit,
        };
        let quit = event == Event::Quit;
        if input_tx.send(event).is_err() || quit {
          break;
        }
      }
    });

    let signal_tx = tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = signal_tx.send(Event::Quit);
      }
    });

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick_rate);
      loop {
        ticker.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
