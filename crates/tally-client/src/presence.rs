//! Throttled presence broadcast.
//!
//! Cursor moves and "editing" flags arrive far faster than peers need them.
//! [`PresenceThrottle`] forwards the first value at once, then at most one
//! value per delay window, always the newest.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

enum Command<T> {
    Update(T),
    Shutdown(oneshot::Sender<()>),
}

pub struct PresenceThrottle<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> PresenceThrottle<T> {
    /// Spawn the throttle task. Must be called inside a tokio runtime.
    pub fn spawn(delay: Duration, output: mpsc::Sender<T>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(delay, rx, output));
        Self { commands, task }
    }

    /// Offer a new value. Returns false once the throttle has stopped.
    pub fn update(&self, value: T) -> bool {
        self.commands.send(Command::Update(value)).is_ok()
    }

    /// Emit any pending value, then stop. Returns once the task has exited.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
        let _ = self.task.await;
    }
}

async fn run<T>(
    delay: Duration,
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    output: mpsc::Sender<T>,
) {
    let mut pending: Option<T> = None;
    let mut last_emit: Option<Instant> = None;

    loop {
        let deadline = match (&pending, last_emit) {
            (Some(_), Some(at)) => Some(at + delay),
            _ => None,
        };

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Update(value)) => {
                    let window_open = last_emit.map_or(true, |at| at.elapsed() >= delay);
                    if window_open {
                        pending = None;
                        if output.send(value).await.is_err() {
                            break;
                        }
                        last_emit = Some(Instant::now());
                    } else {
                        pending = Some(value);
                    }
                }
                Some(Command::Shutdown(ack)) => {
                    if let Some(value) = pending.take() {
                        let _ = output.send(value).await;
                    }
                    let _ = ack.send(());
                    break;
                }
                None => {
                    if let Some(value) = pending.take() {
                        let _ = output.send(value).await;
                    }
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(value) = pending.take() {
                    if output.send(value).await.is_err() {
                        break;
                    }
                    last_emit = Some(Instant::now());
                }
            }
        }
    }
    tracing::trace!("presence throttle stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_coalesces_bursts() {
        let (tx, mut rx) = mpsc::channel(16);
        let throttle = PresenceThrottle::spawn(Duration::from_millis(100), tx);

        for i in 1..=10 {
            assert!(throttle.update(i));
        }
        assert_eq!(rx.recv().await, Some(1));
        // The rest collapse into the newest value after the window.
        assert_eq!(rx.recv().await, Some(10));

        tokio::time::sleep(Duration::from_millis(500)).await;
        throttle.update(11);
        assert_eq!(rx.recv().await, Some(11));

        throttle.shutdown().await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let (tx, mut rx) = mpsc::channel(16);
        let throttle = PresenceThrottle::spawn(Duration::from_secs(60), tx);

        throttle.update("first");
        throttle.update("second");
        throttle.update("third");
        throttle.shutdown().await;

        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await {
            seen.push(v);
        }
        assert_eq!(seen, vec!["first", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emission_spacing() {
        let (tx, mut rx) = mpsc::channel(16);
        let delay = Duration::from_millis(100);
        let throttle = PresenceThrottle::spawn(delay, tx);

        let start = Instant::now();
        throttle.update(1u32);
        rx.recv().await;
        throttle.update(2);
        rx.recv().await;
        assert!(start.elapsed() >= delay);

        throttle.shutdown().await;
    }
}
