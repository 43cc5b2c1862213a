//! Local view of the driver's current ride.
//!
//! The controller never talks to the backend itself. A transition is split in
//! two: [`RideLifecycleController::begin`] checks preconditions, parks the
//! ride in [`RideSlot::Pending`] and hands back the conditional write to
//! submit; [`RideLifecycleController::resolve`] takes the backend's answer and
//! either adopts the confirmed ride or restores the last confirmed one.
//! Change-feed snapshots go through [`RideLifecycleController::apply_remote`]
//! and may land between the two halves; a remote cancellation there
//! invalidates the pending write.

use std::mem;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::availability::AvailabilityPolicy;
use crate::error::{BackendError, RideError};
use crate::models::chat::ChatMessage;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::ride::{Ride, RideChanges, RideStatus, TransitionKind};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Accept { driver_id: Uuid },
    Start,
    ArriveAtStop,
    Complete,
    Cancel,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Accept { .. } => TransitionKind::Accept,
            Transition::Start => TransitionKind::Start,
            Transition::ArriveAtStop => TransitionKind::ArriveAtStop,
            Transition::Complete => TransitionKind::Complete,
            Transition::Cancel => TransitionKind::Cancel,
        }
    }

    /// Checks preconditions against `ride` and returns the tentative ride
    /// together with the fields the backend has to write.
    pub fn plan(&self, ride: &Ride) -> Result<(Ride, RideChanges), RideError> {
        let illegal = || RideError::IllegalTransition {
            transition: self.kind(),
            status: ride.status,
        };

        let changes = match (self, ride.status) {
            (Transition::Accept { driver_id }, RideStatus::Requested) => RideChanges {
                status: Some(RideStatus::AcceptedPickup),
                driver_id: Some(*driver_id),
                ..RideChanges::default()
            },
            (Transition::Start, RideStatus::AcceptedPickup) => RideChanges {
                status: Some(RideStatus::InProgress),
                current_stop_index: Some(1),
                ..RideChanges::default()
            },
            (Transition::ArriveAtStop, RideStatus::InProgress) => {
                if ride.all_stops_visited() {
                    return Err(RideError::NoStopsRemaining {
                        current: ride.current_stop_index,
                        total: ride.stop_count(),
                    });
                }
                RideChanges {
                    current_stop_index: Some(ride.current_stop_index + 1),
                    ..RideChanges::default()
                }
            }
            (Transition::Complete, RideStatus::InProgress) => {
                if !ride.all_stops_visited() {
                    return Err(RideError::StopsRemaining {
                        current: ride.current_stop_index,
                        total: ride.stop_count(),
                    });
                }
                RideChanges {
                    status: Some(RideStatus::Completed),
                    ..RideChanges::default()
                }
            }
            (Transition::Cancel, RideStatus::AcceptedPickup | RideStatus::InProgress) => {
                RideChanges {
                    status: Some(RideStatus::Cancelled),
                    ..RideChanges::default()
                }
            }
            _ => return Err(illegal()),
        };

        let mut tentative = ride.clone();
        changes.apply_to(&mut tentative);
        Ok((tentative, changes))
    }
}

/// The conditional write a pending transition is waiting on.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransitionRequest {
    pub ticket: u64,
    pub ride_id: Uuid,
    pub transition: Transition,
    pub expected_status: RideStatus,
    pub changes: RideChanges,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RideSlot {
    Empty,
    Confirmed(Ride),
    Pending {
        /// Last confirmed state; `None` while an accept is in flight.
        base: Option<Ride>,
        tentative: Ride,
        intent: Transition,
        ticket: u64,
    },
}

impl RideSlot {
    pub fn ride_id(&self) -> Option<Uuid> {
        match self {
            RideSlot::Empty => None,
            RideSlot::Confirmed(ride) => Some(ride.id),
            RideSlot::Pending { tentative, .. } => Some(tentative.id),
        }
    }

    /// What the driver should see: the tentative copy while pending.
    pub fn visible(&self) -> Option<&Ride> {
        match self {
            RideSlot::Empty => None,
            RideSlot::Confirmed(ride) => Some(ride),
            RideSlot::Pending { tentative, .. } => Some(tentative),
        }
    }

    pub fn confirmed(&self) -> Option<&Ride> {
        match self {
            RideSlot::Empty => None,
            RideSlot::Confirmed(ride) => Some(ride),
            RideSlot::Pending { base, .. } => base.as_ref(),
        }
    }

    pub fn pending_intent(&self) -> Option<Transition> {
        match self {
            RideSlot::Pending { intent, .. } => Some(*intent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawReason {
    Declined,
    Expired,
    Taken,
}

/// Messages for the driver's screen.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    RideOffered {
        ride: Ride,
    },
    OfferWithdrawn {
        ride_id: Uuid,
        reason: WithdrawReason,
    },
    RideUpdated {
        ride: Ride,
    },
    RideCompleted {
        ride: Ride,
    },
    RideCancelled {
        ride_id: Uuid,
        by_rider: bool,
    },
    TransitionFailed {
        ride_id: Option<Uuid>,
        transition: TransitionKind,
        error: String,
    },
    AvailabilityChanged {
        availability: DriverAvailability,
    },
    /// The local availability could not be written; the stored value is stale.
    AvailabilitySyncFailed {
        availability: DriverAvailability,
        error: String,
    },
    EarningsUpdated {
        balance: f64,
        fees_owed: f64,
        average_rating: Option<f64>,
    },
    ChatPosted {
        message: ChatMessage,
    },
}

/// Side effects the owner of the controller must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PersistAvailability(DriverAvailability),
    Notify(Notice),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub ride: Ride,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq)]
struct Offer {
    ride: Ride,
    received_at: DateTime<Utc>,
}

pub struct RideLifecycleController {
    driver_id: Uuid,
    availability: DriverAvailability,
    slot: RideSlot,
    offer: Option<Offer>,
    awaiting_rating: Option<Uuid>,
    next_ticket: u64,
}

impl RideLifecycleController {
    pub fn new(driver_id: Uuid, availability: DriverAvailability) -> Self {
        Self {
            driver_id,
            availability,
            slot: RideSlot::Empty,
            offer: None,
            awaiting_rating: None,
            next_ticket: 1,
        }
    }

    pub fn driver_id(&self) -> Uuid {
        self.driver_id
    }

    pub fn availability(&self) -> DriverAvailability {
        self.availability
    }

    pub fn slot(&self) -> &RideSlot {
        &self.slot
    }

    pub fn offered_ride(&self) -> Option<&Ride> {
        self.offer.as_ref().map(|offer| &offer.ride)
    }

    pub fn awaiting_rating(&self) -> Option<Uuid> {
        self.awaiting_rating
    }

    // ----- offers -------------------------------------------------------

    /// Shows a new request to the driver if they can take it; otherwise the
    /// request is dropped without a trace.
    pub fn offer(&mut self, ride: Ride, received_at: DateTime<Utc>) -> Vec<Effect> {
        let can_take = self.availability == DriverAvailability::Online
            && self.slot == RideSlot::Empty
            && self.awaiting_rating.is_none()
            && ride.status == RideStatus::Requested;

        if !can_take {
            debug!(ride_id = %ride.id, "ignoring ride request");
            return Vec::new();
        }

        info!(ride_id = %ride.id, "ride offered");
        self.offer = Some(Offer {
            ride: ride.clone(),
            received_at,
        });

        vec![Effect::Notify(Notice::RideOffered { ride })]
    }

    /// Nothing is persisted for a declined request.
    pub fn decline(&mut self, ride_id: Uuid) -> Result<Vec<Effect>, RideError> {
        if !self.is_offered(ride_id) {
            return Err(RideError::NoSuchOffer(ride_id));
        }

        self.offer = None;
        Ok(vec![Effect::Notify(Notice::OfferWithdrawn {
            ride_id,
            reason: WithdrawReason::Declined,
        })])
    }

    pub fn expire_offer(
        &mut self,
        ride_id: Uuid,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<Effect> {
        let expired = self.offer.as_ref().is_some_and(|offer| {
            offer.ride.id == ride_id
                && (now - offer.received_at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed >= timeout)
        });

        if !expired {
            return Vec::new();
        }

        debug!(ride_id = %ride_id, "ride offer expired");
        self.offer = None;
        vec![Effect::Notify(Notice::OfferWithdrawn {
            ride_id,
            reason: WithdrawReason::Expired,
        })]
    }

    // ----- transitions --------------------------------------------------

    pub fn begin_accept(&mut self, ride_id: Uuid) -> Result<TransitionRequest, RideError> {
        if !self.is_offered(ride_id) {
            return Err(RideError::NoSuchOffer(ride_id));
        }

        self.begin(Transition::Accept {
            driver_id: self.driver_id,
        })
    }

    pub fn begin(&mut self, transition: Transition) -> Result<TransitionRequest, RideError> {
        if let RideSlot::Pending { tentative, .. } = &self.slot {
            return Err(RideError::TransitionPending(tentative.id));
        }

        let base = match (&transition, &self.slot) {
            (Transition::Accept { .. }, RideSlot::Confirmed(current)) => {
                return Err(RideError::RideAlreadyActive(current.id));
            }
            (Transition::Accept { .. }, _) => {
                let offer = self.offer.as_ref().ok_or(RideError::NoOffer)?;
                offer.ride.clone()
            }
            (_, RideSlot::Confirmed(current)) => current.clone(),
            (_, _) => return Err(RideError::NoActiveRide),
        };

        let (tentative, changes) = transition.plan(&base)?;

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let request = TransitionRequest {
            ticket,
            ride_id: base.id,
            transition,
            expected_status: base.status,
            changes,
        };

        if let Transition::Accept { .. } = transition {
            self.offer = None;
            self.slot = RideSlot::Pending {
                base: None,
                tentative,
                intent: transition,
                ticket,
            };
        } else {
            self.slot = RideSlot::Pending {
                base: Some(base),
                tentative,
                intent: transition,
                ticket,
            };
        }

        debug!(ride_id = %request.ride_id, transition = %transition.kind(), ticket, "transition pending");
        Ok(request)
    }

    /// Settles a pending transition with the backend's answer. A rejected
    /// write leaves the slot exactly as it was before [`Self::begin`].
    pub fn resolve(
        &mut self,
        request: &TransitionRequest,
        outcome: Result<Ride, BackendError>,
    ) -> Result<Resolution, RideError> {
        let matches_pending = matches!(
            &self.slot,
            RideSlot::Pending { ticket, .. } if *ticket == request.ticket
        );
        if !matches_pending {
            debug!(ride_id = %request.ride_id, ticket = request.ticket, "discarding stale confirmation");
            return Err(RideError::Superseded(request.ride_id));
        }

        let RideSlot::Pending {
            base,
            tentative,
            intent,
            ..
        } = mem::replace(&mut self.slot, RideSlot::Empty)
        else {
            return Err(RideError::Superseded(request.ride_id));
        };

        let confirmed = match outcome.map_err(RideError::from).and_then(|ride| {
            validate_confirmation(&tentative, &ride)?;
            Ok(ride)
        }) {
            Ok(ride) => ride,
            Err(err) => {
                self.slot = base.map_or(RideSlot::Empty, RideSlot::Confirmed);
                return Err(translate_rejection(intent, request.ride_id, err));
            }
        };

        info!(ride_id = %confirmed.id, transition = %intent.kind(), status = ?confirmed.status, "transition confirmed");

        let mut effects = Vec::new();
        match intent {
            Transition::Accept { .. } => {
                self.slot = RideSlot::Confirmed(confirmed.clone());
                effects.extend(self.set_availability(DriverAvailability::Busy));
                effects.push(Effect::Notify(Notice::RideUpdated {
                    ride: confirmed.clone(),
                }));
            }
            Transition::Start | Transition::ArriveAtStop => {
                self.slot = RideSlot::Confirmed(confirmed.clone());
                effects.push(Effect::Notify(Notice::RideUpdated {
                    ride: confirmed.clone(),
                }));
            }
            Transition::Complete => {
                self.awaiting_rating = Some(confirmed.id);
                effects.push(Effect::Notify(Notice::RideCompleted {
                    ride: confirmed.clone(),
                }));
            }
            Transition::Cancel => {
                effects.push(Effect::Notify(Notice::RideCancelled {
                    ride_id: confirmed.id,
                    by_rider: false,
                }));
                effects.extend(self.set_availability(DriverAvailability::Online));
            }
        }

        Ok(Resolution {
            ride: confirmed,
            effects,
        })
    }

    /// Applies a change-feed snapshot. Snapshots for any ride other than the
    /// current one are ignored.
    pub fn apply_remote(&mut self, snapshot: Ride) -> Vec<Effect> {
        if self.slot.ride_id() != Some(snapshot.id) {
            debug!(ride_id = %snapshot.id, "ignoring change for untracked ride");
            return Vec::new();
        }

        match snapshot.status {
            RideStatus::Cancelled => {
                let by_rider = self.slot.pending_intent() != Some(Transition::Cancel);
                if by_rider {
                    warn!(ride_id = %snapshot.id, "ride cancelled remotely");
                }

                self.slot = RideSlot::Empty;
                let mut effects = vec![Effect::Notify(Notice::RideCancelled {
                    ride_id: snapshot.id,
                    by_rider,
                })];
                effects.extend(self.set_availability(DriverAvailability::Online));
                effects
            }
            RideStatus::Completed => {
                if let Err(reason) = snapshot.check_invariants() {
                    warn!(ride_id = %snapshot.id, %reason, "ignoring invalid completion snapshot");
                    return Vec::new();
                }

                info!(ride_id = %snapshot.id, "ride completed remotely");
                self.slot = RideSlot::Empty;
                self.awaiting_rating = Some(snapshot.id);
                vec![Effect::Notify(Notice::RideCompleted { ride: snapshot })]
            }
            _ => self.adopt_snapshot(snapshot),
        }
    }

    fn adopt_snapshot(&mut self, snapshot: Ride) -> Vec<Effect> {
        if snapshot.driver_id != Some(self.driver_id) {
            debug!(ride_id = %snapshot.id, "ignoring snapshot not assigned to this driver");
            return Vec::new();
        }

        match &mut self.slot {
            RideSlot::Confirmed(current) => {
                if snapshot.is_behind(current) {
                    debug!(ride_id = %snapshot.id, "ignoring stale snapshot");
                    return Vec::new();
                }
                *current = snapshot.clone();
                vec![Effect::Notify(Notice::RideUpdated { ride: snapshot })]
            }
            RideSlot::Pending {
                base: Some(base), ..
            } => {
                if !snapshot.is_behind(base) {
                    *base = snapshot;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    // ----- availability -------------------------------------------------

    /// Moves to ONLINE if the driver may drive. Returns the previous value so
    /// a failed persist can be rolled back with [`Self::restore_availability`].
    pub fn go_online(
        &mut self,
        profile: &DriverProfile,
        policy: &AvailabilityPolicy,
    ) -> Result<DriverAvailability, RideError> {
        match self.availability {
            DriverAvailability::Online => Ok(DriverAvailability::Online),
            DriverAvailability::Busy => Err(self.active_ride_error()),
            DriverAvailability::Offline => {
                policy.check_online(profile)?;
                self.availability = DriverAvailability::Online;
                Ok(DriverAvailability::Offline)
            }
        }
    }

    pub fn go_offline(&mut self) -> Result<DriverAvailability, RideError> {
        if self.slot != RideSlot::Empty || self.awaiting_rating.is_some() {
            return Err(self.active_ride_error());
        }

        let previous = self.availability;
        self.availability = DriverAvailability::Offline;
        self.offer = None;
        Ok(previous)
    }

    pub fn restore_availability(&mut self, previous: DriverAvailability) {
        self.availability = previous;
    }

    // ----- rating -------------------------------------------------------

    pub fn rating_target(&self, stars: u8) -> Result<Uuid, RideError> {
        if !(1..=5).contains(&stars) {
            return Err(RideError::InvalidRating(stars));
        }
        self.awaiting_rating.ok_or(RideError::NoRatingPending)
    }

    /// Closes the post-ride rating step and frees the driver.
    pub fn finish_rating(&mut self) -> Result<Vec<Effect>, RideError> {
        self.awaiting_rating
            .take()
            .ok_or(RideError::NoRatingPending)?;

        Ok(self
            .set_availability(DriverAvailability::Online)
            .into_iter()
            .collect())
    }

    fn is_offered(&self, ride_id: Uuid) -> bool {
        self.offer
            .as_ref()
            .is_some_and(|offer| offer.ride.id == ride_id)
    }

    fn set_availability(&mut self, availability: DriverAvailability) -> Option<Effect> {
        if self.availability == availability {
            return None;
        }
        self.availability = availability;
        Some(Effect::PersistAvailability(availability))
    }

    fn active_ride_error(&self) -> RideError {
        match self.slot.ride_id().or(self.awaiting_rating) {
            Some(ride_id) => RideError::RideAlreadyActive(ride_id),
            None => RideError::AvailabilityBlocked("driver is busy".to_string()),
        }
    }
}

fn validate_confirmation(tentative: &Ride, confirmed: &Ride) -> Result<(), RideError> {
    if confirmed.id != tentative.id {
        return Err(RideError::InvalidSnapshot(format!(
            "expected ride {}, got {}",
            tentative.id, confirmed.id
        )));
    }
    if confirmed.status != tentative.status
        || confirmed.current_stop_index != tentative.current_stop_index
    {
        return Err(RideError::InvalidSnapshot(format!(
            "ride {} confirmed as {:?} at stop {}, expected {:?} at stop {}",
            confirmed.id,
            confirmed.status,
            confirmed.current_stop_index,
            tentative.status,
            tentative.current_stop_index
        )));
    }
    confirmed
        .check_invariants()
        .map_err(RideError::InvalidSnapshot)
}

fn translate_rejection(intent: Transition, ride_id: Uuid, err: RideError) -> RideError {
    match (intent, err) {
        (Transition::Accept { .. }, RideError::Backend(BackendError::Conflict { .. })) => {
            RideError::NoLongerAvailable(ride_id)
        }
        (_, RideError::Backend(conflict @ BackendError::Conflict { .. })) => {
            RideError::Conflict(conflict.to_string())
        }
        (_, other) => other,
    }
}
