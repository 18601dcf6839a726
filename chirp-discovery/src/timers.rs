use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::runtime::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    HaWait,
    LiveCheck,
    Catchup,
}

/// Background timers. A timer never touches engine state: when it fires
/// it sends an [`Event`] into the loop that owns the state.
#[derive(Debug)]
pub struct Timers {
    events: mpsc::UnboundedSender<Event>,
    running: HashMap<TimerKind, CancellationToken>,
}

impl Timers {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self { events, running: HashMap::new() }
    }

    /// Fires `event` once after `delay`, replacing a running timer of the same kind.
    pub fn start_once(&mut self, kind: TimerKind, delay: Duration, event: Event) {
        let token = self.replace(kind);
        let tx = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => trace!(?kind, "timer cancelled"),
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(event);
                }
            }
        });
    }

    /// Fires `event()` every `period`, first after one full period.
    pub fn start_interval<F>(&mut self, kind: TimerKind, period: Duration, event: F)
    where
        F: Fn() -> Event + Send + 'static,
    {
        let token = self.replace(kind);
        let tx = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(event()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.running.get(&kind).is_some_and(|token| !token.is_cancelled())
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(token) = self.running.remove(&kind) {
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, token) in self.running.drain() {
            token.cancel();
        }
    }

    fn replace(&mut self, kind: TimerKind) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.running.insert(kind, token.clone()) {
            previous.cancel();
        }
        token
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_once(TimerKind::HaWait, Duration::from_secs(2), Event::HaWaitExpired);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(rx.recv().await, Some(Event::HaWaitExpired)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_once(TimerKind::Catchup, Duration::from_secs(1), Event::CatchupExpired(1));
        assert!(timers.is_running(TimerKind::Catchup));
        timers.cancel(TimerKind::Catchup);
        assert!(!timers.is_running(TimerKind::Catchup));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_running_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_once(TimerKind::Catchup, Duration::from_secs(1), Event::CatchupExpired(1));
        timers.start_once(TimerKind::Catchup, Duration::from_secs(3), Event::CatchupExpired(2));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(matches!(rx.try_recv(), Ok(Event::CatchupExpired(2))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_repeats_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_interval(TimerKind::LiveCheck, Duration::from_secs(60), || Event::LiveCheckDue);

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(matches!(rx.recv().await, Some(Event::LiveCheckDue)));
        }
        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}
