use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ChatStream, RequestFilter, RideBackend, RideStream, TariffSource};
use crate::engine::lifecycle::TransitionRequest;
use crate::error::BackendError;
use crate::models::chat::ChatMessage;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::payout::PayoutDetails;
use crate::models::ride::{Ride, RideStatus};
use crate::models::scheduled::{ScheduledRide, ScheduledRideStatus};
use crate::models::tariff::Tariff;

/// Process-local stand-in for the hosted data store. Writes are conditional
/// the same way the hosted store's row filters are, and every committed ride
/// change is published on the change feed.
pub struct InMemoryBackend {
    rides: Arc<DashMap<Uuid, Ride>>,
    drivers: DashMap<Uuid, DriverProfile>,
    availability: DashMap<Uuid, DriverAvailability>,
    scheduled: DashMap<Uuid, ScheduledRide>,
    messages: DashMap<Uuid, Vec<ChatMessage>>,
    payouts: DashMap<Uuid, PayoutDetails>,
    tariffs: RwLock<Vec<Tariff>>,
    changes_tx: broadcast::Sender<Ride>,
    requests_tx: broadcast::Sender<Ride>,
    chat_tx: broadcast::Sender<ChatMessage>,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(event_buffer_size: usize) -> Self {
        let (changes_tx, _unused_changes) = broadcast::channel(event_buffer_size);
        let (requests_tx, _unused_requests) = broadcast::channel(event_buffer_size);
        let (chat_tx, _unused_chat) = broadcast::channel(event_buffer_size);

        Self {
            rides: Arc::new(DashMap::new()),
            drivers: DashMap::new(),
            availability: DashMap::new(),
            scheduled: DashMap::new(),
            messages: DashMap::new(),
            payouts: DashMap::new(),
            tariffs: RwLock::new(Vec::new()),
            changes_tx,
            requests_tx,
            chat_tx,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn insert_driver(&self, profile: DriverProfile) {
        self.availability
            .entry(profile.id)
            .or_insert(DriverAvailability::Offline);
        self.drivers.insert(profile.id, profile);
    }

    pub async fn set_tariffs(&self, tariffs: Vec<Tariff>) {
        *self.tariffs.write().await = tariffs;
    }

    /// Stores a rider's request and announces it to watching drivers.
    pub fn create_request(&self, ride: Ride) {
        info!(ride_id = %ride.id, vehicle_type = %ride.vehicle_type, "ride requested");
        self.rides.insert(ride.id, ride.clone());
        let _ = self.requests_tx.send(ride);
    }

    pub fn insert_scheduled(&self, ride: ScheduledRide) {
        self.scheduled.insert(ride.id, ride);
    }

    /// The rider side of a cancellation.
    pub fn cancel_by_rider(&self, ride_id: Uuid) -> Result<Ride, BackendError> {
        self.mutate_ride(ride_id, |ride| {
            if ride.is_terminal() {
                return Err(BackendError::Rejected(format!(
                    "ride {ride_id} is already {:?}",
                    ride.status
                )));
            }
            ride.status = RideStatus::Cancelled;
            Ok(())
        })
    }

    /// Another driver winning the accept race.
    pub fn assign_to_other_driver(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, BackendError> {
        self.mutate_ride(ride_id, |ride| {
            if ride.status != RideStatus::Requested {
                return Err(BackendError::Conflict {
                    ride_id,
                    expected: RideStatus::Requested,
                    actual: ride.status,
                });
            }
            ride.status = RideStatus::AcceptedPickup;
            ride.driver_id = Some(driver_id);
            Ok(())
        })
    }

    pub fn ride(&self, ride_id: Uuid) -> Option<Ride> {
        self.rides.get(&ride_id).map(|entry| entry.value().clone())
    }

    pub fn availability_of(&self, driver_id: Uuid) -> Option<DriverAvailability> {
        self.availability.get(&driver_id).map(|entry| *entry.value())
    }

    pub fn driver(&self, driver_id: Uuid) -> Option<DriverProfile> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    /// Completed rides pay out to the driver's balance.
    fn credit_driver(&self, ride: &Ride) {
        let (Some(driver_id), Some(price)) = (ride.driver_id, ride.final_price) else {
            return;
        };

        match self.drivers.get_mut(&driver_id) {
            Some(mut driver) => driver.balance += price,
            None => warn!(driver_id = %driver_id, "completed ride for unknown driver"),
        }
    }

    fn refresh_average_rating(&self, driver_id: Uuid) {
        let stars: Vec<f64> = self
            .rides
            .iter()
            .filter(|entry| entry.driver_id == Some(driver_id))
            .filter_map(|entry| entry.rating.map(f64::from))
            .collect();

        if let Some(mut driver) = self.drivers.get_mut(&driver_id) {
            driver.average_rating =
                (!stars.is_empty()).then(|| stars.iter().sum::<f64>() / stars.len() as f64);
        }
    }

    /// Makes every call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("store unreachable".to_string()));
        }
        Ok(())
    }

    /// Runs `change` under the row's lock, then publishes the result.
    fn mutate_ride<F>(&self, ride_id: Uuid, change: F) -> Result<Ride, BackendError>
    where
        F: FnOnce(&mut Ride) -> Result<(), BackendError>,
    {
        let updated = {
            let mut entry = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| BackendError::NotFound(format!("ride {ride_id}")))?;
            change(entry.value_mut())?;
            entry.updated_at = Utc::now();
            entry.value().clone()
        };

        let _ = self.changes_tx.send(updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl RideBackend for InMemoryBackend {
    async fn submit_transition(&self, request: &TransitionRequest) -> Result<Ride, BackendError> {
        self.ensure_reachable()?;

        let ride = self.mutate_ride(request.ride_id, |ride| {
            if ride.status != request.expected_status {
                return Err(BackendError::Conflict {
                    ride_id: ride.id,
                    expected: request.expected_status,
                    actual: ride.status,
                });
            }

            request.changes.apply_to(ride);
            if ride.status == RideStatus::Completed {
                ride.final_price = Some(ride.estimated_price);
            }
            Ok(())
        })?;

        if ride.status == RideStatus::Completed {
            self.credit_driver(&ride);
        }

        debug!(ride_id = %ride.id, status = ?ride.status, "transition committed");
        Ok(ride)
    }

    async fn fetch_ride(&self, ride_id: Uuid) -> Result<Ride, BackendError> {
        self.ensure_reachable()?;

        self.ride(ride_id)
            .ok_or_else(|| BackendError::NotFound(format!("ride {ride_id}")))
    }

    async fn subscribe_to_ride_changes(&self, ride_id: Uuid) -> Result<RideStream, BackendError> {
        self.ensure_reachable()?;

        let rides = Arc::clone(&self.rides);
        let changes = BroadcastStream::new(self.changes_tx.subscribe()).filter_map(move |item| {
            match item {
                Ok(ride) if ride.id == ride_id => Some(ride),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(ride_id = %ride_id, skipped, "ride feed lagged; resending stored state");
                    rides.get(&ride_id).map(|entry| entry.value().clone())
                }
            }
        });

        Ok(Box::pin(changes))
    }

    async fn subscribe_to_new_ride_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<RideStream, BackendError> {
        self.ensure_reachable()?;

        let filter = filter.clone();
        let requests = BroadcastStream::new(self.requests_tx.subscribe()).filter_map(move |item| {
            match item {
                Ok(ride) if ride.status == RideStatus::Requested && filter.matches(&ride) => {
                    Some(ride)
                }
                _ => None,
            }
        });

        Ok(Box::pin(requests))
    }

    async fn update_availability(
        &self,
        driver_id: Uuid,
        availability: DriverAvailability,
    ) -> Result<(), BackendError> {
        self.ensure_reachable()?;

        if !self.drivers.contains_key(&driver_id) {
            return Err(BackendError::NotFound(format!("driver {driver_id}")));
        }
        self.availability.insert(driver_id, availability);
        Ok(())
    }

    async fn fetch_driver_profile(&self, driver_id: Uuid) -> Result<DriverProfile, BackendError> {
        self.ensure_reachable()?;

        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackendError::NotFound(format!("driver {driver_id}")))
    }

    async fn submit_rating(&self, ride_id: Uuid, stars: u8) -> Result<(), BackendError> {
        self.ensure_reachable()?;

        self.mutate_ride(ride_id, |ride| {
            if ride.status != RideStatus::Completed {
                return Err(BackendError::Rejected(format!(
                    "ride {ride_id} is {:?}, only completed rides can be rated",
                    ride.status
                )));
            }
            ride.rating = Some(stars);
            Ok(())
        })?;

        if let Some(driver_id) = self.ride(ride_id).and_then(|ride| ride.driver_id) {
            self.refresh_average_rating(driver_id);
        }
        Ok(())
    }

    async fn ride_history(&self, driver_id: Uuid) -> Result<Vec<Ride>, BackendError> {
        self.ensure_reachable()?;

        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| entry.driver_id == Some(driver_id) && entry.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        rides.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(rides)
    }

    async fn open_scheduled_rides(&self) -> Result<Vec<ScheduledRide>, BackendError> {
        self.ensure_reachable()?;

        let mut open: Vec<ScheduledRide> = self
            .scheduled
            .iter()
            .filter(|entry| entry.driver_id.is_none())
            .map(|entry| entry.value().clone())
            .collect();
        open.sort_by_key(|ride| ride.scheduled_for);

        Ok(open)
    }

    async fn claim_scheduled_ride(
        &self,
        scheduled_id: Uuid,
        driver_id: Uuid,
    ) -> Result<ScheduledRide, BackendError> {
        self.ensure_reachable()?;

        let mut entry = self
            .scheduled
            .get_mut(&scheduled_id)
            .ok_or_else(|| BackendError::NotFound(format!("scheduled ride {scheduled_id}")))?;

        if entry.driver_id.is_some() {
            return Err(BackendError::AlreadyClaimed(format!(
                "scheduled ride {scheduled_id}"
            )));
        }

        entry.driver_id = Some(driver_id);
        entry.status = ScheduledRideStatus::Accepted;
        info!(scheduled_id = %scheduled_id, driver_id = %driver_id, "scheduled ride claimed");

        Ok(entry.value().clone())
    }

    async fn send_message(&self, message: &ChatMessage) -> Result<ChatMessage, BackendError> {
        self.ensure_reachable()?;

        if !self.rides.contains_key(&message.ride_id) {
            return Err(BackendError::NotFound(format!("ride {}", message.ride_id)));
        }

        self.messages
            .entry(message.ride_id)
            .or_default()
            .push(message.clone());
        let _ = self.chat_tx.send(message.clone());

        Ok(message.clone())
    }

    async fn ride_messages(&self, ride_id: Uuid) -> Result<Vec<ChatMessage>, BackendError> {
        self.ensure_reachable()?;

        let mut messages = self
            .messages
            .get(&ride_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        messages.sort_by_key(|message| message.created_at);

        Ok(messages)
    }

    async fn subscribe_to_chat(&self, ride_id: Uuid) -> Result<ChatStream, BackendError> {
        self.ensure_reachable()?;

        let messages = BroadcastStream::new(self.chat_tx.subscribe()).filter_map(move |item| {
            match item {
                Ok(message) if message.ride_id == ride_id => Some(message),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(ride_id = %ride_id, skipped, "chat feed lagged; messages skipped");
                    None
                }
            }
        });

        Ok(Box::pin(messages))
    }

    async fn save_payout_details(&self, details: &PayoutDetails) -> Result<(), BackendError> {
        self.ensure_reachable()?;

        if !self.drivers.contains_key(&details.driver_id) {
            return Err(BackendError::NotFound(format!("driver {}", details.driver_id)));
        }
        self.payouts.insert(details.driver_id, details.clone());
        Ok(())
    }

    async fn fetch_payout_details(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<PayoutDetails>, BackendError> {
        self.ensure_reachable()?;
        Ok(self.payouts.get(&driver_id).map(|entry| entry.value().clone()))
    }

    async fn settle_fees(&self, driver_id: Uuid) -> Result<DriverProfile, BackendError> {
        self.ensure_reachable()?;

        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| BackendError::NotFound(format!("driver {driver_id}")))?;

        info!(driver_id = %driver_id, settled = driver.fees_owed, "platform fees settled");
        driver.fees_owed = 0.0;
        Ok(driver.value().clone())
    }
}

#[async_trait]
impl TariffSource for InMemoryBackend {
    async fn load_tariffs(&self) -> Result<Vec<Tariff>, BackendError> {
        self.ensure_reachable()?;
        Ok(self.tariffs.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    use super::InMemoryBackend;
    use crate::backend::{RequestFilter, RideBackend};
    use crate::engine::lifecycle::Transition;
    use crate::error::BackendError;
    use crate::models::chat::ChatMessage;
    use crate::models::driver::DriverProfile;
    use crate::models::location::{GeoPoint, Place, StoredLocation};
    use crate::models::ride::{Ride, RideStatus};
    use crate::models::scheduled::{ScheduledRide, ScheduledRideStatus};

    fn place(lat: f64, lng: f64) -> Place {
        Place {
            point: GeoPoint { lat, lng },
            address: String::new(),
        }
    }

    fn request(vehicle_type: &str) -> Ride {
        Ride::new_request(
            Uuid::new_v4(),
            &place(0.0, 0.0),
            &place(1.0, 1.0),
            &[],
            18.5,
            vehicle_type,
        )
    }

    fn accept_request(ride: &Ride, driver_id: Uuid) -> crate::engine::lifecycle::TransitionRequest {
        let transition = Transition::Accept { driver_id };
        let (_, changes) = transition.plan(ride).unwrap();
        crate::engine::lifecycle::TransitionRequest {
            ticket: 1,
            ride_id: ride.id,
            transition,
            expected_status: ride.status,
            changes,
        }
    }

    #[tokio::test]
    async fn second_accept_of_same_ride_conflicts() {
        let backend = InMemoryBackend::new(16);
        let ride = request("standard");
        backend.create_request(ride.clone());

        let first = accept_request(&ride, Uuid::new_v4());
        let second = accept_request(&ride, Uuid::new_v4());

        assert!(backend.submit_transition(&first).await.is_ok());
        assert_eq!(
            backend.submit_transition(&second).await,
            Err(BackendError::Conflict {
                ride_id: ride.id,
                expected: RideStatus::Requested,
                actual: RideStatus::AcceptedPickup,
            })
        );
    }

    #[tokio::test]
    async fn completion_settles_final_price() {
        let backend = InMemoryBackend::new(16);
        let driver_id = Uuid::new_v4();
        let ride = request("standard");
        backend.create_request(ride.clone());

        let accepted = backend
            .submit_transition(&accept_request(&ride, driver_id))
            .await
            .unwrap();
        let mut current = accepted;
        for transition in [Transition::Start, Transition::Complete] {
            let (_, changes) = transition.plan(&current).unwrap();
            current = backend
                .submit_transition(&crate::engine::lifecycle::TransitionRequest {
                    ticket: 2,
                    ride_id: current.id,
                    transition,
                    expected_status: current.status,
                    changes,
                })
                .await
                .unwrap();
        }

        assert_eq!(current.status, RideStatus::Completed);
        assert_eq!(current.final_price, Some(18.5));
        assert!(current.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn change_feed_only_carries_the_watched_ride() {
        let backend = InMemoryBackend::new(16);
        let watched = request("standard");
        let other = request("standard");
        backend.create_request(watched.clone());
        backend.create_request(other.clone());

        let mut changes = backend.subscribe_to_ride_changes(watched.id).await.unwrap();

        backend.cancel_by_rider(other.id).unwrap();
        backend.cancel_by_rider(watched.id).unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change.id, watched.id);
        assert_eq!(change.status, RideStatus::Cancelled);
    }

    #[tokio::test]
    async fn request_feed_honours_vehicle_filter() {
        let backend = InMemoryBackend::new(16);
        let filter = RequestFilter {
            vehicle_type: Some("comfort".to_string()),
        };
        let mut requests = backend.subscribe_to_new_ride_requests(&filter).await.unwrap();

        backend.create_request(request("standard"));
        let comfort = request("comfort");
        backend.create_request(comfort.clone());

        assert_eq!(requests.next().await.map(|ride| ride.id), Some(comfort.id));
    }

    #[tokio::test]
    async fn scheduled_ride_can_only_be_claimed_once() {
        let backend = InMemoryBackend::new(16);
        let scheduled = ScheduledRide {
            id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            origin: StoredLocation::from_place(&place(0.0, 0.0)),
            destination: StoredLocation::from_place(&place(1.0, 1.0)),
            vehicle_type: "standard".to_string(),
            scheduled_for: Utc::now(),
            status: ScheduledRideStatus::Scheduled,
            driver_id: None,
        };
        backend.insert_scheduled(scheduled.clone());

        let claimed = backend
            .claim_scheduled_ride(scheduled.id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(claimed.status, ScheduledRideStatus::Accepted);

        let second = backend.claim_scheduled_ride(scheduled.id, Uuid::new_v4()).await;
        assert!(matches!(second, Err(BackendError::AlreadyClaimed(_))));
        assert!(backend.open_scheduled_rides().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let backend = InMemoryBackend::new(16);
        backend.set_unavailable(true);

        assert!(matches!(
            backend.ride_history(Uuid::new_v4()).await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn lagging_ride_feed_resends_stored_state() {
        let backend = InMemoryBackend::new(2);
        let watched = request("standard");
        backend.create_request(watched.clone());

        let mut changes = backend.subscribe_to_ride_changes(watched.id).await.unwrap();

        for _ in 0..4 {
            backend.create_request(request("standard"));
            let other = request("standard");
            backend.create_request(other.clone());
            backend.cancel_by_rider(other.id).unwrap();
        }
        backend.cancel_by_rider(watched.id).unwrap();
        for _ in 0..3 {
            let other = request("standard");
            backend.create_request(other.clone());
            backend.cancel_by_rider(other.id).unwrap();
        }

        let change = changes.next().await.unwrap();
        assert_eq!(change.id, watched.id);
        assert_eq!(change.status, RideStatus::Cancelled);
        assert_eq!(backend.fetch_ride(watched.id).await.unwrap(), change);
    }

    #[tokio::test]
    async fn completion_credits_balance_and_rating_updates_average() {
        let backend = InMemoryBackend::new(16);
        let driver = DriverProfile {
            id: Uuid::new_v4(),
            full_name: "Rita".to_string(),
            vehicle_model: Some("Uno".to_string()),
            license_plate: Some("ABC1D23".to_string()),
            balance: 10.0,
            fees_owed: 4.0,
            average_rating: None,
        };
        backend.insert_driver(driver.clone());
        let ride = request("standard");
        backend.create_request(ride.clone());

        let mut current = backend
            .submit_transition(&accept_request(&ride, driver.id))
            .await
            .unwrap();
        for transition in [Transition::Start, Transition::Complete] {
            let (_, changes) = transition.plan(&current).unwrap();
            current = backend
                .submit_transition(&crate::engine::lifecycle::TransitionRequest {
                    ticket: 2,
                    ride_id: current.id,
                    transition,
                    expected_status: current.status,
                    changes,
                })
                .await
                .unwrap();
        }
        backend.submit_rating(ride.id, 4).await.unwrap();

        let updated = backend.driver(driver.id).unwrap();
        assert_eq!(updated.balance, 28.5);
        assert_eq!(updated.average_rating, Some(4.0));

        let settled = backend.settle_fees(driver.id).await.unwrap();
        assert_eq!(settled.fees_owed, 0.0);
        assert_eq!(settled.balance, 28.5);
    }

    #[tokio::test]
    async fn chat_is_scoped_to_its_ride() {
        let backend = InMemoryBackend::new(16);
        let ride = request("standard");
        let other = request("standard");
        backend.create_request(ride.clone());
        backend.create_request(other.clone());
        let driver_id = Uuid::new_v4();

        let mut feed = backend.subscribe_to_chat(ride.id).await.unwrap();

        let noise = ChatMessage::compose(other.id, driver_id, other.rider_id, "wrong ride").unwrap();
        backend.send_message(&noise).await.unwrap();
        let hello = ChatMessage::compose(ride.id, ride.rider_id, driver_id, "at the gate").unwrap();
        backend.send_message(&hello).await.unwrap();

        assert_eq!(feed.next().await, Some(hello.clone()));
        assert_eq!(backend.ride_messages(ride.id).await.unwrap(), vec![hello]);

        let orphan = ChatMessage::compose(Uuid::new_v4(), driver_id, driver_id, "hi").unwrap();
        assert!(matches!(
            backend.send_message(&orphan).await,
            Err(BackendError::NotFound(_))
        ));
    }
}
