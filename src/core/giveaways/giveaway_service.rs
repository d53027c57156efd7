// Giveaway lifecycle - periodic deadline sweep, winner draw, manual end and
// reroll.
//
// The participant set is always fetched live from the gateway at evaluation
// time (current reactors, bots excluded), never from a persisted snapshot.

use super::giveaway_models::{EndOutcome, Giveaway, GiveawayError, NewGiveaway};
use crate::core::security::{SecurityEvent, SecurityEventKind, SecurityEventStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How often the background sweep runs.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Reaction participants enter with.
pub const ENTRY_EMOJI: &str = "🎉";

// ============================================================================
// PORTS
// ============================================================================

#[async_trait]
pub trait GiveawayStore: Send + Sync + 'static {
    async fn create(&self, giveaway: NewGiveaway) -> Result<Giveaway, GiveawayError>;

    async fn get(&self, id: i64) -> Result<Option<Giveaway>, GiveawayError>;

    async fn get_by_message(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError>;

    async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError>;

    /// Compare-and-set `active` to false. Returns `false` when the giveaway
    /// was already ended, which makes concurrent double-ends observable.
    async fn mark_ended(&self, id: i64) -> Result<bool, GiveawayError>;
}

/// Messaging-side operations the scheduler needs.
#[async_trait]
pub trait GiveawayGateway: Send + Sync + 'static {
    /// Whether the announcement message still exists.
    async fn message_exists(&self, channel_id: u64, message_id: u64)
        -> Result<bool, GiveawayError>;

    /// Current non-bot reactors of the entry emoji.
    async fn entrants(&self, channel_id: u64, message_id: u64) -> Result<Vec<u64>, GiveawayError>;

    /// Update the announcement message with the outcome and congratulate the
    /// winners if there are any.
    async fn publish_outcome(
        &self,
        giveaway: &Giveaway,
        winners: &[u64],
    ) -> Result<(), GiveawayError>;
}

// ============================================================================
// WINNER DRAW
// ============================================================================

/// Uniform sample without replacement, capped by how many entrants there are.
pub fn draw_winners(entrants: &[u64], count: usize) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    entrants
        .choose_multiple(&mut rng, count.min(entrants.len()))
        .copied()
        .collect()
}

// ============================================================================
// SERVICE
// ============================================================================

/// Drives giveaways to completion.
///
/// Per-id end operations are idempotent: a second concurrent caller for the
/// same id observes it in flight (or already inactive) and no-ops. Different
/// ids never block each other.
pub struct GiveawayService<S: GiveawayStore, G: GiveawayGateway, E: SecurityEventStore> {
    store: S,
    gateway: G,
    events: E,
    /// Giveaway ids currently mid-end.
    in_flight: DashSet<i64>,
}

impl<S: GiveawayStore, G: GiveawayGateway, E: SecurityEventStore> GiveawayService<S, G, E> {
    pub fn new(store: S, gateway: G, events: E) -> Self {
        Self {
            store,
            gateway,
            events,
            in_flight: DashSet::new(),
        }
    }

    pub async fn create(&self, giveaway: NewGiveaway) -> Result<Giveaway, GiveawayError> {
        self.store.create(giveaway).await
    }

    pub async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError> {
        self.store.list_active().await
    }

    pub async fn find_by_message(
        &self,
        message_id: u64,
    ) -> Result<Option<Giveaway>, GiveawayError> {
        self.store.get_by_message(message_id).await
    }

    /// One sweep: end every active giveaway whose deadline has elapsed.
    /// Failures on one giveaway are logged and do not stop the rest; returns
    /// how many were ended.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<u32, GiveawayError> {
        let active = self.store.list_active().await?;
        let mut ended = 0;

        for giveaway in active.into_iter().filter(|g| g.end_time <= now) {
            match self.end_giveaway(giveaway.id).await {
                Ok(EndOutcome::Ended { winners }) => {
                    ended += 1;
                    tracing::info!(
                        giveaway_id = giveaway.id,
                        winners = winners.len(),
                        "Giveaway ended"
                    );
                }
                Ok(EndOutcome::AlreadyEnded) => {}
                Ok(EndOutcome::MessageMissing) => {
                    tracing::warn!(
                        giveaway_id = giveaway.id,
                        "Giveaway message missing, retrying next tick"
                    );
                }
                Err(e) => {
                    tracing::error!(giveaway_id = giveaway.id, "Failed to end giveaway: {}", e);
                }
            }
        }

        Ok(ended)
    }

    /// End a giveaway: resolve the message, fetch live entrants, draw winners,
    /// publish, audit, and finally flip `active`. Safe to call from the sweep
    /// and a manual command at once.
    pub async fn end_giveaway(&self, id: i64) -> Result<EndOutcome, GiveawayError> {
        if !self.in_flight.insert(id) {
            return Ok(EndOutcome::AlreadyEnded);
        }
        let result = self.end_inner(id).await;
        self.in_flight.remove(&id);
        result
    }

    async fn end_inner(&self, id: i64) -> Result<EndOutcome, GiveawayError> {
        let Some(giveaway) = self.store.get(id).await? else {
            return Ok(EndOutcome::AlreadyEnded);
        };
        if !giveaway.active {
            return Ok(EndOutcome::AlreadyEnded);
        }

        if !self
            .gateway
            .message_exists(giveaway.channel_id, giveaway.message_id)
            .await?
        {
            return Ok(EndOutcome::MessageMissing);
        }

        let entrants = self
            .gateway
            .entrants(giveaway.channel_id, giveaway.message_id)
            .await?;
        let winners = draw_winners(&entrants, giveaway.winner_count as usize);

        self.gateway.publish_outcome(&giveaway, &winners).await?;

        // The audit record is best-effort; losing it must not leave the
        // giveaway active and re-announcing forever.
        if let Err(e) = self
            .events
            .append(SecurityEvent::new(
                giveaway.guild_id,
                SecurityEventKind::GiveawayEnded,
                None,
                format!(
                    "Giveaway for {} has ended. Winners: {}",
                    giveaway.prize,
                    winners.len()
                ),
            ))
            .await
        {
            tracing::warn!(giveaway_id = id, "Failed to record giveaway end: {}", e);
        }

        if !self.store.mark_ended(id).await? {
            // Lost the race to another instance of the end sequence.
            return Ok(EndOutcome::AlreadyEnded);
        }

        Ok(EndOutcome::Ended { winners })
    }

    /// Draw one fresh winner from the current reactors of an ended giveaway's
    /// message. Returns `None` when there are no eligible entrants.
    pub async fn reroll(&self, giveaway: &Giveaway) -> Result<Option<u64>, GiveawayError> {
        let entrants = self
            .gateway
            .entrants(giveaway.channel_id, giveaway.message_id)
            .await?;
        let winner = draw_winners(&entrants, 1).first().copied();

        if let Some(winner) = winner {
            if let Err(e) = self
                .events
                .append(SecurityEvent::new(
                    giveaway.guild_id,
                    SecurityEventKind::GiveawayRerolled,
                    Some(winner),
                    format!(
                        "Giveaway {} was rerolled. New winner: <@{}>",
                        giveaway.message_id, winner
                    ),
                ))
                .await
            {
                tracing::warn!(
                    giveaway_id = giveaway.id,
                    "Failed to record giveaway reroll: {}",
                    e
                );
            }
        }

        Ok(winner)
    }

    /// Supervised background sweep. Each tick's failure is logged and never
    /// unschedules the next tick; the loop stops when `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(0) => {}
                        Ok(ended) => tracing::info!(ended, "Giveaway sweep completed"),
                        Err(e) => tracing::warn!("Giveaway sweep failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Giveaway scheduler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::SecurityError;
    use dashmap::DashMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        giveaways: DashMap<i64, Giveaway>,
        next_id: AtomicI64,
    }

    impl MockStore {
        fn insert(&self, end_in_secs: i64, winner_count: u32) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.giveaways.insert(
                id,
                Giveaway {
                    id,
                    guild_id: 1,
                    channel_id: 10,
                    message_id: 100 + id as u64,
                    prize: "Nitro".to_string(),
                    end_time: Utc::now() + chrono::Duration::seconds(end_in_secs),
                    winner_count,
                    active: true,
                },
            );
            id
        }
    }

    #[async_trait]
    impl GiveawayStore for MockStore {
        async fn create(&self, giveaway: NewGiveaway) -> Result<Giveaway, GiveawayError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let created = Giveaway {
                id,
                guild_id: giveaway.guild_id,
                channel_id: giveaway.channel_id,
                message_id: giveaway.message_id,
                prize: giveaway.prize,
                end_time: giveaway.end_time,
                winner_count: giveaway.winner_count,
                active: true,
            };
            self.giveaways.insert(id, created.clone());
            Ok(created)
        }

        async fn get(&self, id: i64) -> Result<Option<Giveaway>, GiveawayError> {
            Ok(self.giveaways.get(&id).map(|g| g.clone()))
        }

        async fn get_by_message(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError> {
            Ok(self
                .giveaways
                .iter()
                .find(|g| g.message_id == message_id)
                .map(|g| g.clone()))
        }

        async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError> {
            Ok(self
                .giveaways
                .iter()
                .filter(|g| g.active)
                .map(|g| g.clone())
                .collect())
        }

        async fn mark_ended(&self, id: i64) -> Result<bool, GiveawayError> {
            match self.giveaways.get_mut(&id) {
                Some(mut g) if g.active => {
                    g.active = false;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    struct MockGateway {
        entrants: Vec<u64>,
        message_missing: bool,
        publishes: AtomicUsize,
        published_winners: Mutex<Vec<Vec<u64>>>,
    }

    impl MockGateway {
        fn with_entrants(entrants: Vec<u64>) -> Self {
            Self {
                entrants,
                message_missing: false,
                publishes: AtomicUsize::new(0),
                published_winners: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GiveawayGateway for MockGateway {
        async fn message_exists(
            &self,
            _channel_id: u64,
            _message_id: u64,
        ) -> Result<bool, GiveawayError> {
            Ok(!self.message_missing)
        }

        async fn entrants(
            &self,
            _channel_id: u64,
            _message_id: u64,
        ) -> Result<Vec<u64>, GiveawayError> {
            Ok(self.entrants.clone())
        }

        async fn publish_outcome(
            &self,
            _giveaway: &Giveaway,
            winners: &[u64],
        ) -> Result<(), GiveawayError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            self.published_winners.lock().unwrap().push(winners.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockEventStore {
        events: Mutex<Vec<SecurityEvent>>,
    }

    #[async_trait]
    impl SecurityEventStore for MockEventStore {
        async fn append(&self, event: SecurityEvent) -> Result<(), SecurityError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn service(
        store: MockStore,
        gateway: MockGateway,
    ) -> GiveawayService<MockStore, MockGateway, MockEventStore> {
        GiveawayService::new(store, gateway, MockEventStore::default())
    }

    #[test]
    fn draw_is_distinct_and_from_the_pool() {
        let entrants: Vec<u64> = (1..=10).collect();
        let winners = draw_winners(&entrants, 3);

        assert_eq!(winners.len(), 3);
        let distinct: HashSet<_> = winners.iter().collect();
        assert_eq!(distinct.len(), 3);
        assert!(winners.iter().all(|w| entrants.contains(w)));
    }

    #[test]
    fn draw_is_capped_by_entrant_count() {
        let entrants = vec![7, 8];
        let winners = draw_winners(&entrants, 5);

        assert_eq!(winners.len(), 2);
        let distinct: HashSet<_> = winners.iter().collect();
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn draw_with_no_entrants_is_empty() {
        assert!(draw_winners(&[], 3).is_empty());
    }

    #[tokio::test]
    async fn tick_ends_only_due_giveaways() {
        let store = MockStore::default();
        let due = store.insert(-5, 1);
        let pending = store.insert(600, 1);
        let svc = service(store, MockGateway::with_entrants(vec![1, 2, 3]));

        let ended = svc.tick(Utc::now()).await.unwrap();

        assert_eq!(ended, 1);
        assert!(!svc.store.get(due).await.unwrap().unwrap().active);
        assert!(svc.store.get(pending).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn ending_with_no_entrants_still_ends() {
        let store = MockStore::default();
        let id = store.insert(-5, 3);
        let svc = service(store, MockGateway::with_entrants(vec![]));

        let outcome = svc.end_giveaway(id).await.unwrap();

        assert_eq!(outcome, EndOutcome::Ended { winners: vec![] });
        assert!(!svc.store.get(id).await.unwrap().unwrap().active);
        // Outcome is still published so the embed reflects "no participants"
        assert_eq!(svc.gateway.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_message_defers_and_stays_active() {
        let store = MockStore::default();
        let id = store.insert(-5, 1);
        let mut gateway = MockGateway::with_entrants(vec![1]);
        gateway.message_missing = true;
        let svc = service(store, gateway);

        let outcome = svc.end_giveaway(id).await.unwrap();

        assert_eq!(outcome, EndOutcome::MessageMissing);
        assert!(svc.store.get(id).await.unwrap().unwrap().active);
        assert_eq!(svc.gateway.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn double_end_is_idempotent() {
        let store = MockStore::default();
        let id = store.insert(-5, 1);
        let svc = Arc::new(service(store, MockGateway::with_entrants(vec![1, 2])));

        let first = svc.end_giveaway(id).await.unwrap();
        let second = svc.end_giveaway(id).await.unwrap();

        assert!(matches!(first, EndOutcome::Ended { .. }));
        assert_eq!(second, EndOutcome::AlreadyEnded);
        assert_eq!(svc.gateway.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_end_publishes_once() {
        let store = MockStore::default();
        let id = store.insert(-5, 1);
        let svc = Arc::new(service(store, MockGateway::with_entrants(vec![1, 2])));

        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.end_giveaway(id).await.unwrap() })
        };
        let b = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.end_giveaway(id).await.unwrap() })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let ended = [&a, &b]
            .iter()
            .filter(|o| matches!(o, EndOutcome::Ended { .. }))
            .count();
        assert_eq!(ended, 1);
        assert_eq!(svc.gateway.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reroll_draws_a_single_entrant() {
        let store = MockStore::default();
        let id = store.insert(-5, 1);
        let svc = service(store, MockGateway::with_entrants(vec![4, 5, 6]));

        let giveaway = svc.store.get(id).await.unwrap().unwrap();
        let winner = svc.reroll(&giveaway).await.unwrap().unwrap();

        assert!([4, 5, 6].contains(&winner));
    }

    #[tokio::test]
    async fn reroll_with_no_entrants_returns_none() {
        let store = MockStore::default();
        let id = store.insert(-5, 1);
        let svc = service(store, MockGateway::with_entrants(vec![]));

        let giveaway = svc.store.get(id).await.unwrap().unwrap();
        assert!(svc.reroll(&giveaway).await.unwrap().is_none());
    }
}
