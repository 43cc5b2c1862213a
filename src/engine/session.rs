use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ChatStream, Clock, RequestFilter, RideBackend, RideStream};
use crate::engine::availability::AvailabilityPolicy;
use crate::engine::lifecycle::{
    Effect, Notice, RideLifecycleController, Transition, TransitionRequest, WithdrawReason,
};
use crate::engine::navigation::{next_target, NavigationTarget};
use crate::error::{AppError, BackendError, RideError};
use crate::models::chat::ChatMessage;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::payout::{PayoutDetails, PayoutForm};
use crate::models::ride::{Ride, TransitionKind};
use crate::observability::metrics::Metrics;

/// Inbound events, applied strictly in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RideChanged(Ride),
    NewRequest(Ride),
    OfferExpired(Uuid),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub offer_timeout: Duration,
    pub policy: AvailabilityPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(30),
            policy: AvailabilityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub driver_id: Uuid,
    pub availability: DriverAvailability,
    pub ride: Option<Ride>,
    pub pending: Option<TransitionKind>,
    pub offer: Option<Ride>,
    pub awaiting_rating: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeSettlement {
    pub profile: DriverProfile,
    pub availability: DriverAvailability,
}

/// One authenticated driver: the controller plus everything needed to carry
/// out its decisions.
pub struct DriverSession {
    controller: Mutex<RideLifecycleController>,
    backend: Arc<dyn RideBackend>,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::Sender<SessionEvent>,
    notices_tx: broadcast::Sender<Notice>,
    settings: SessionSettings,
    metrics: Metrics,
}

impl DriverSession {
    pub fn new(
        driver_id: Uuid,
        backend: Arc<dyn RideBackend>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
        metrics: Metrics,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_buffer_size);
        let (notices_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                controller: Mutex::new(RideLifecycleController::new(
                    driver_id,
                    DriverAvailability::Offline,
                )),
                backend,
                clock,
                events_tx,
                notices_tx,
                settings,
                metrics,
            },
            events_rx,
        )
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let controller = self.controller.lock().await;

        SessionSnapshot {
            driver_id: controller.driver_id(),
            availability: controller.availability(),
            ride: controller.slot().visible().cloned(),
            pending: controller.slot().pending_intent().map(|intent| intent.kind()),
            offer: controller.offered_ride().cloned(),
            awaiting_rating: controller.awaiting_rating(),
        }
    }

    pub async fn driver_id(&self) -> Uuid {
        self.controller.lock().await.driver_id()
    }

    pub async fn profile(&self) -> Result<DriverProfile, RideError> {
        let driver_id = self.driver_id().await;
        Ok(self.backend.fetch_driver_profile(driver_id).await?)
    }

    // ----- driver actions -----------------------------------------------

    pub async fn accept(&self, ride_id: Uuid) -> Result<Ride, RideError> {
        // Subscribed before the write so nothing committed after it is missed.
        let changes = self.backend.subscribe_to_ride_changes(ride_id).await?;
        let chat = self
            .backend
            .subscribe_to_chat(ride_id)
            .await
            .inspect_err(|err| warn!(ride_id = %ride_id, error = %err, "ride chat unavailable"))
            .ok();

        let result = self
            .run_transition(TransitionKind::Accept, |c| c.begin_accept(ride_id))
            .await;

        match &result {
            Ok(ride) => self.forward_ride_feeds(ride.id, changes, chat),
            Err(RideError::NoLongerAvailable(_)) => self.notify(Notice::OfferWithdrawn {
                ride_id,
                reason: WithdrawReason::Taken,
            }),
            Err(_) => {}
        }

        result
    }

    pub async fn decline(&self, ride_id: Uuid) -> Result<(), RideError> {
        let effects = self.controller.lock().await.decline(ride_id)?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn start(&self) -> Result<Ride, RideError> {
        self.run_transition(TransitionKind::Start, |c| c.begin(Transition::Start))
            .await
    }

    pub async fn arrive_at_stop(&self) -> Result<Ride, RideError> {
        self.run_transition(TransitionKind::ArriveAtStop, |c| {
            c.begin(Transition::ArriveAtStop)
        })
        .await
    }

    pub async fn complete(&self) -> Result<Ride, RideError> {
        let ride = self
            .run_transition(TransitionKind::Complete, |c| c.begin(Transition::Complete))
            .await?;

        self.refresh_earnings().await;
        Ok(ride)
    }

    pub async fn cancel(&self) -> Result<Ride, RideError> {
        self.run_transition(TransitionKind::Cancel, |c| c.begin(Transition::Cancel))
            .await
    }

    /// Navigation uses the last confirmed ride, never a tentative one.
    pub async fn next_target(&self) -> Result<NavigationTarget, RideError> {
        let controller = self.controller.lock().await;
        let ride = controller
            .slot()
            .confirmed()
            .ok_or(RideError::NoActiveRide)?;
        next_target(ride)
    }

    pub async fn submit_rating(&self, stars: u8) -> Result<Uuid, RideError> {
        let ride_id = self.controller.lock().await.rating_target(stars)?;

        if let Err(err) = self.backend.submit_rating(ride_id, stars).await {
            warn!(ride_id = %ride_id, error = %err, "failed to store rating");
        }

        self.finish_rating().await?;
        self.refresh_earnings().await;
        Ok(ride_id)
    }

    pub async fn skip_rating(&self) -> Result<(), RideError> {
        self.finish_rating().await
    }

    async fn finish_rating(&self) -> Result<(), RideError> {
        let effects = self.controller.lock().await.finish_rating()?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn go_online(&self) -> Result<DriverAvailability, RideError> {
        let profile = self.profile().await?;

        let previous = self
            .controller
            .lock()
            .await
            .go_online(&profile, &self.settings.policy)?;

        self.persist_availability_change(previous, DriverAvailability::Online)
            .await
    }

    pub async fn go_offline(&self) -> Result<DriverAvailability, RideError> {
        let previous = self.controller.lock().await.go_offline()?;

        self.persist_availability_change(previous, DriverAvailability::Offline)
            .await
    }

    /// Writes an availability the controller already switched to, rolling the
    /// controller back when the write fails.
    async fn persist_availability_change(
        &self,
        previous: DriverAvailability,
        next: DriverAvailability,
    ) -> Result<DriverAvailability, RideError> {
        if previous == next {
            return Ok(next);
        }

        let driver_id = self.driver_id().await;
        if let Err(err) = self.backend.update_availability(driver_id, next).await {
            warn!(error = %err, availability = ?next, "failed to update availability; reverting");
            self.controller.lock().await.restore_availability(previous);
            return Err(err.into());
        }

        info!(availability = ?next, "availability changed");
        self.notify(Notice::AvailabilityChanged { availability: next });
        Ok(next)
    }

    // ----- chat ---------------------------------------------------------

    /// Sends a message to the rider of the current ride.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, RideError> {
        let (ride_id, driver_id, rider_id) = {
            let controller = self.controller.lock().await;
            let ride = controller
                .slot()
                .confirmed()
                .ok_or(RideError::NoActiveRide)?;
            (ride.id, controller.driver_id(), ride.rider_id)
        };

        let message = ChatMessage::compose(ride_id, driver_id, rider_id, content)?;
        Ok(self.backend.send_message(&message).await?)
    }

    pub async fn chat_history(&self) -> Result<Vec<ChatMessage>, RideError> {
        let ride_id = self
            .controller
            .lock()
            .await
            .slot()
            .ride_id()
            .ok_or(RideError::NoActiveRide)?;

        Ok(self.backend.ride_messages(ride_id).await?)
    }

    // ----- payouts ------------------------------------------------------

    /// Validates and stores the driver's payout method. Card numbers are
    /// reduced to their last four digits before they leave this call.
    pub async fn save_payout_details(&self, form: PayoutForm) -> Result<PayoutDetails, AppError> {
        let details = PayoutDetails::from_form(self.driver_id().await, form)?;
        self.backend.save_payout_details(&details).await?;

        info!(driver_id = %details.driver_id, "payout details saved");
        Ok(details)
    }

    pub async fn payout_details(&self) -> Result<Option<PayoutDetails>, RideError> {
        let driver_id = self.driver_id().await;
        Ok(self.backend.fetch_payout_details(driver_id).await?)
    }

    /// Pays off outstanding platform fees, then tries to bring an offline
    /// driver back online.
    pub async fn settle_fees(&self) -> Result<FeeSettlement, RideError> {
        let driver_id = self.driver_id().await;
        let profile = self.backend.settle_fees(driver_id).await?;
        self.notify_earnings(&profile);

        let availability = match self.controller.lock().await.availability() {
            DriverAvailability::Offline => None,
            current => Some(current),
        };
        let availability = match availability {
            Some(current) => current,
            None => self.go_online().await.unwrap_or_else(|err| {
                warn!(error = %err, "fees settled but driver stays offline");
                DriverAvailability::Offline
            }),
        };

        Ok(FeeSettlement {
            profile,
            availability,
        })
    }

    // ----- plumbing -----------------------------------------------------

    async fn run_transition<F>(&self, kind: TransitionKind, begin: F) -> Result<Ride, RideError>
    where
        F: FnOnce(&mut RideLifecycleController) -> Result<TransitionRequest, RideError>,
    {
        let request = {
            let mut controller = self.controller.lock().await;
            begin(&mut controller)
        };
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                self.metrics.record_transition(kind.as_str(), "rejected");
                debug!(transition = %kind, error = %err, "transition refused locally");
                return Err(err);
            }
        };

        // The lock is released while the write is in flight so change-feed
        // events can still land.
        let started = Instant::now();
        let outcome = self.backend.submit_transition(&request).await;
        self.metrics
            .transition_latency_seconds
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let conflicted = matches!(outcome, Err(BackendError::Conflict { .. }));
        let resolved = self.controller.lock().await.resolve(&request, outcome);

        match resolved {
            Ok(resolution) => {
                self.metrics.record_transition(kind.as_str(), "confirmed");
                self.execute(resolution.effects).await;
                Ok(resolution.ride)
            }
            Err(err) => {
                let outcome = if err.is_conflict() { "conflict" } else { "failed" };
                self.metrics.record_transition(kind.as_str(), outcome);
                warn!(ride_id = %request.ride_id, transition = %kind, error = %err, "transition not applied");
                self.notify(Notice::TransitionFailed {
                    ride_id: Some(request.ride_id),
                    transition: kind,
                    error: err.to_string(),
                });

                // The store moved on without us; a lost accept has nothing
                // local left to reconcile.
                if conflicted && kind != TransitionKind::Accept {
                    self.refresh_ride(request.ride_id).await;
                }
                self.sync_active_rides().await;
                Err(err)
            }
        }
    }

    /// Reconciles the controller with the stored state of `ride_id`.
    pub async fn refresh_ride(&self, ride_id: Uuid) {
        match self.backend.fetch_ride(ride_id).await {
            Ok(ride) => {
                debug!(ride_id = %ride_id, status = ?ride.status, "reloaded ride from store");
                let effects = self.controller.lock().await.apply_remote(ride);
                self.execute(effects).await;
            }
            Err(err) => warn!(ride_id = %ride_id, error = %err, "failed to reload ride"),
        }
    }

    async fn refresh_earnings(&self) {
        match self.profile().await {
            Ok(profile) => self.notify_earnings(&profile),
            Err(err) => warn!(error = %err, "failed to refresh earnings"),
        }
    }

    fn notify_earnings(&self, profile: &DriverProfile) {
        self.notify(Notice::EarningsUpdated {
            balance: profile.balance,
            fees_owed: profile.fees_owed,
            average_rating: profile.average_rating,
        });
    }

    async fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PersistAvailability(availability) => {
                    let driver_id = self.driver_id().await;
                    match self.backend.update_availability(driver_id, availability).await {
                        Ok(()) => self.notify(Notice::AvailabilityChanged { availability }),
                        Err(err) => {
                            warn!(error = %err, availability = ?availability, "failed to persist availability");
                            self.notify(Notice::AvailabilitySyncFailed {
                                availability,
                                error: err.to_string(),
                            });
                        }
                    }
                }
                Effect::Notify(notice) => self.notify(notice),
            }
        }
        self.sync_active_rides().await;
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices_tx.send(notice);
    }

    async fn sync_active_rides(&self) {
        let active = self.controller.lock().await.slot().ride_id().is_some();
        self.metrics.active_rides.set(i64::from(active));
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::RideChanged(ride) => {
                let effects = self.controller.lock().await.apply_remote(ride);
                self.execute(effects).await;
            }
            SessionEvent::NewRequest(ride) => {
                let ride_id = ride.id;
                let effects = self
                    .controller
                    .lock()
                    .await
                    .offer(ride, self.clock.now_utc());

                if !effects.is_empty() {
                    self.schedule_offer_expiry(ride_id);
                }
                self.execute(effects).await;
            }
            SessionEvent::OfferExpired(ride_id) => {
                let effects = self.controller.lock().await.expire_offer(
                    ride_id,
                    self.clock.now_utc(),
                    self.settings.offer_timeout,
                );
                self.execute(effects).await;
            }
        }
    }

    fn schedule_offer_expiry(&self, ride_id: Uuid) {
        let events_tx = self.events_tx.clone();
        let timeout = self.settings.offer_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events_tx.send(SessionEvent::OfferExpired(ride_id)).await;
        });
    }

    /// Feeds ride changes into the event channel and chat messages into the
    /// notices until the ride reaches a terminal state.
    fn forward_ride_feeds(&self, ride_id: Uuid, mut changes: RideStream, chat: Option<ChatStream>) {
        let events_tx = self.events_tx.clone();
        let notices_tx = self.notices_tx.clone();
        let mut chat: ChatStream = match chat {
            Some(chat) => chat,
            None => Box::pin(tokio_stream::pending()),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.next() => {
                        let Some(ride) = change else { break };
                        let terminal = ride.is_terminal();
                        if events_tx.send(SessionEvent::RideChanged(ride)).await.is_err() || terminal {
                            break;
                        }
                    }
                    Some(message) = chat.next() => {
                        let _ = notices_tx.send(Notice::ChatPosted { message });
                    }
                }
            }
            debug!(ride_id = %ride_id, "ride feeds closed");
        });
    }

    /// Subscribes to new ride requests and feeds them into the session. The
    /// subscription is live once this returns.
    pub async fn watch_requests(
        &self,
        filter: RequestFilter,
    ) -> Result<JoinHandle<()>, RideError> {
        let mut requests = self.backend.subscribe_to_new_ride_requests(&filter).await?;
        let events_tx = self.events_tx.clone();

        Ok(tokio::spawn(async move {
            while let Some(ride) = requests.next().await {
                if events_tx.send(SessionEvent::NewRequest(ride)).await.is_err() {
                    break;
                }
            }
            warn!("ride request feed closed");
        }))
    }
}

pub async fn run_event_loop(session: Arc<DriverSession>, mut events_rx: mpsc::Receiver<SessionEvent>) {
    info!("session event loop started");

    while let Some(event) = events_rx.recv().await {
        session.handle_event(event).await;
    }

    warn!("session event loop stopped: event channel closed");
}
