use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;

/// Handle returned by `start_polling`, used to stop that subscription.
pub type PollingToken = Uuid;

/// Describes what a subscription polls.
pub trait PollingInput: Clone + Send + Sync + 'static {
    /// Inputs that produce the same key share a single timer.
    fn polling_key(&self) -> String;
}

/// Something that can be refreshed on a schedule.
#[async_trait]
pub trait PollingTarget: Send + Sync + 'static {
    type Input: PollingInput;

    async fn execute_poll(&self, input: &Self::Input) -> anyhow::Result<()>;
}

struct PollingGroup<I> {
    input: I,
    tokens: HashSet<PollingToken>,
    task: JoinHandle<()>,
}

/// Fixed-interval poll scheduler keyed by polling input.
///
/// The first subscription for a key polls immediately and then once per
/// interval after each poll finishes. Further subscriptions with the same key
/// join the running timer. Stopping a token only removes that token; the timer
/// stops when the last token for its key is gone. Stopping never cancels work
/// the target has already handed off (see `InFlight`).
pub struct PollingScheduler<T: PollingTarget> {
    component: &'static str,
    target: Arc<T>,
    interval: Mutex<Duration>,
    groups: Mutex<HashMap<String, PollingGroup<T::Input>>>,
}

impl<T: PollingTarget> PollingScheduler<T> {
    pub fn new(component: &'static str, target: Arc<T>, interval: Duration) -> Self {
        Self {
            component,
            target,
            interval: Mutex::new(interval),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Takes effect for timers started after the change.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock().unwrap_or_else(|p| p.into_inner()) = interval;
    }

    pub fn start_polling(&self, input: T::Input) -> PollingToken {
        let token = Uuid::new_v4();
        let key = input.polling_key();
        let mut groups = self.groups();

        match groups.get_mut(&key) {
            Some(group) => {
                debug!(component = self.component, key = %key, %token, "joining running poll");
                group.tokens.insert(token);
            }
            None => {
                debug!(component = self.component, key = %key, %token, "starting poll");
                let task = self.spawn_poll_loop(key.clone(), input.clone());
                groups.insert(
                    key,
                    PollingGroup {
                        input,
                        tokens: HashSet::from([token]),
                        task,
                    },
                );
            }
        }
        metrics::set_active_polling_groups(self.component, groups.len());
        token
    }

    /// Returns `false` if the token is unknown or already stopped.
    pub fn stop_polling_by_polling_token(&self, token: PollingToken) -> bool {
        let mut groups = self.groups();
        let Some(key) = groups
            .iter()
            .find(|(_, group)| group.tokens.contains(&token))
            .map(|(key, _)| key.clone())
        else {
            return false;
        };

        let emptied = match groups.get_mut(&key) {
            Some(group) => {
                group.tokens.remove(&token);
                group.tokens.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some(group) = groups.remove(&key) {
                debug!(component = self.component, key = %key, "last subscription stopped, cancelling timer");
                group.task.abort();
            }
        }
        metrics::set_active_polling_groups(self.component, groups.len());
        true
    }

    pub fn stop_all_polling(&self) {
        let mut groups = self.groups();
        for (_, group) in groups.drain() {
            group.task.abort();
        }
        metrics::set_active_polling_groups(self.component, 0);
    }

    pub fn is_polling(&self) -> bool {
        !self.groups().is_empty()
    }

    /// Inputs with at least one live subscription.
    pub fn active_inputs(&self) -> Vec<T::Input> {
        self.groups().values().map(|group| group.input.clone()).collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.groups().values().map(|group| group.tokens.len()).sum()
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<String, PollingGroup<T::Input>>> {
        self.groups.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn spawn_poll_loop(&self, key: String, input: T::Input) -> JoinHandle<()> {
        let target = Arc::clone(&self.target);
        let period = self.interval();
        let component = self.component;

        tokio::spawn(async move {
            loop {
                metrics::increment_poll_tick(component);
                if let Err(e) = target.execute_poll(&input).await {
                    warn!(component, key = %key, error = %e, "poll failed");
                }
                tokio::time::sleep(period).await;
            }
        })
    }
}

impl<T: PollingTarget> Drop for PollingScheduler<T> {
    fn drop(&mut self) {
        self.stop_all_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(180);

    #[derive(Clone, Debug)]
    struct ChainsInput(Vec<&'static str>);

    impl PollingInput for ChainsInput {
        fn polling_key(&self) -> String {
            let mut chains = self.0.clone();
            chains.sort();
            chains.join(",")
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        polls: Mutex<Vec<String>>,
    }

    impl RecordingTarget {
        fn count(&self, key: &str) -> usize {
            self.polls.lock().unwrap().iter().filter(|k| *k == key).count()
        }
    }

    #[async_trait]
    impl PollingTarget for RecordingTarget {
        type Input = ChainsInput;

        async fn execute_poll(&self, input: &ChainsInput) -> anyhow::Result<()> {
            self.polls.lock().unwrap().push(input.polling_key());
            Ok(())
        }
    }

    fn scheduler() -> (Arc<RecordingTarget>, PollingScheduler<RecordingTarget>) {
        let target = Arc::new(RecordingTarget::default());
        let scheduler = PollingScheduler::new("test", target.clone(), INTERVAL);
        (target, scheduler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_every_interval() {
        let (target, scheduler) = scheduler();
        scheduler.start_polling(ChainsInput(vec!["0x1"]));

        settle().await;
        assert_eq!(target.count("0x1"), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(target.count("0x1"), 2);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(target.count("0x1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_shares_one_timer() {
        let (target, scheduler) = scheduler();
        let first = scheduler.start_polling(ChainsInput(vec!["0x1", "0x89"]));
        let second = scheduler.start_polling(ChainsInput(vec!["0x89", "0x1"]));
        assert_ne!(first, second);
        assert_eq!(scheduler.subscription_count(), 2);
        assert_eq!(scheduler.active_inputs().len(), 1);

        settle().await;
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(target.count("0x1,0x89"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_one_token_keeps_the_others_polling() {
        let (target, scheduler) = scheduler();
        let first = scheduler.start_polling(ChainsInput(vec!["0x1"]));
        let _second = scheduler.start_polling(ChainsInput(vec!["0x1"]));
        settle().await;

        assert!(scheduler.stop_polling_by_polling_token(first));
        assert!(!scheduler.stop_polling_by_polling_token(first));
        assert!(scheduler.is_polling());

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(target.count("0x1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_the_last_token_stops_the_timer() {
        let (target, scheduler) = scheduler();
        let token = scheduler.start_polling(ChainsInput(vec!["0x1"]));
        settle().await;

        assert!(scheduler.stop_polling_by_polling_token(token));
        assert!(!scheduler.is_polling());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(target.count("0x1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_stops_every_key() {
        let (target, scheduler) = scheduler();
        scheduler.start_polling(ChainsInput(vec!["0x1"]));
        scheduler.start_polling(ChainsInput(vec!["0x38"]));
        settle().await;

        scheduler.stop_all_polling();
        assert_eq!(scheduler.subscription_count(), 0);

        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(target.count("0x1"), 1);
        assert_eq!(target.count("0x38"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_key_polls_immediately() {
        let (target, scheduler) = scheduler();
        let token = scheduler.start_polling(ChainsInput(vec!["0x1"]));
        settle().await;
        scheduler.stop_polling_by_polling_token(token);

        scheduler.start_polling(ChainsInput(vec!["0x1"]));
        settle().await;
        assert_eq!(target.count("0x1"), 2);
    }
}
