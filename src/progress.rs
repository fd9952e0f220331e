use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::{sync::oneshot, task::JoinHandle};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

fn bytes_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.dim} [{elapsed_precise}] [{bar:30.yellow/dim}] {bytes:>9}/{total_bytes:9} {bytes_per_sec:>11} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
}

/// Sums the per-file counters of all downloads into a single bar.
#[derive(Clone)]
pub struct ProgressAggregator {
    bar: ProgressBar,
    counters: Arc<[Arc<AtomicU64>]>,
}

impl ProgressAggregator {
    pub fn new(total: u64, counters: Vec<Arc<AtomicU64>>) -> Self {
        Self::with_bar(ProgressBar::new(total).with_style(bytes_style()), counters)
    }

    pub fn hidden(total: u64, counters: Vec<Arc<AtomicU64>>) -> Self {
        Self::with_bar(
            ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden()),
            counters,
        )
    }

    fn with_bar(bar: ProgressBar, counters: Vec<Arc<AtomicU64>>) -> Self {
        Self {
            bar,
            counters: counters.into(),
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Recomputes the transferred total and redraws.
    pub fn tick(&self) -> u64 {
        let transferred = self
            .counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum();
        self.bar.set_position(transferred);
        transferred
    }

    /// Keeps ticking in the background until the returned handle is finished.
    pub fn spawn_ticker(&self) -> Ticker {
        let (stop, mut stopped) = oneshot::channel();
        let aggregator = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        aggregator.tick();
                    }
                    _ = &mut stopped => break,
                }
            }
        });

        Ticker {
            aggregator: self.clone(),
            stop,
            handle,
        }
    }
}

pub struct Ticker {
    aggregator: ProgressAggregator,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Stops the background ticks and leaves the bar at its final value.
    pub async fn finish(self) -> u64 {
        // the ticker may already be gone, nothing to stop then
        let _ = self.stop.send(());
        let _ = self.handle.await;

        let transferred = self.aggregator.tick();
        self.aggregator.bar.finish();
        transferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_sums_every_counter() {
        let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicU64::new(0))).collect();
        let aggregator = ProgressAggregator::hidden(300, counters.clone());
        assert_eq!(aggregator.tick(), 0);

        counters[0].fetch_add(100, Ordering::Relaxed);
        counters[2].fetch_add(50, Ordering::Relaxed);
        assert_eq!(aggregator.tick(), 150);
        assert_eq!(aggregator.bar.position(), 150);
    }

    #[tokio::test]
    async fn finish_reports_final_total() {
        let counter = Arc::new(AtomicU64::new(0));
        let aggregator = ProgressAggregator::hidden(10, vec![counter.clone()]);
        let ticker = aggregator.spawn_ticker();

        counter.fetch_add(10, Ordering::Relaxed);
        assert_eq!(ticker.finish().await, 10);
        assert!(aggregator.bar.is_finished());
    }
}
