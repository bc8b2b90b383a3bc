// Session persistence bridge
// One-shot resume of an in-progress checkout after a reload or a payment redirect.

use crate::checkout::{CheckoutStep, StepController};
use crate::models::{BookingFormData, Hotel, Offering, PaymentMethod, RoomSelection};
use crate::storage::{StorageError, StorageKey, TypedStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    pub form: BookingFormData,
    pub offering: Offering,
    pub saved_at: DateTime<Utc>,
}

impl CheckoutSnapshot {
    pub fn new(form: BookingFormData, offering: Offering) -> Self {
        Self {
            form,
            offering,
            saved_at: Utc::now(),
        }
    }
}

// Mirrors the checkout into session storage and restores it once.
// Not a durable store: no versioning beyond the storage envelope and no
// conflict resolution.
pub struct SessionBridge {
    session: TypedStore,
    ttl: Option<Duration>,
}

impl SessionBridge {
    pub fn new(session: TypedStore, ttl: Option<Duration>) -> Self {
        Self { session, ttl }
    }

    pub fn has_snapshot(&self) -> bool {
        self.session.contains(&StorageKey::FullBookingData)
            || self.session.contains(&StorageKey::BookingData)
    }

    pub fn save(&self, snapshot: &CheckoutSnapshot) -> Result<(), StorageError> {
        self.session
            .put_with_ttl(&StorageKey::FullBookingData, snapshot, self.ttl)?;
        self.session
            .put_with_ttl(&StorageKey::BookingData, &snapshot.form, self.ttl)?;

        if let Offering::Hotel(hotel) = &snapshot.offering {
            self.session
                .put_with_ttl(&StorageKey::Hotel, hotel, self.ttl)?;
        }
        if !snapshot.form.rooms.is_empty() {
            self.session
                .put_with_ttl(&StorageKey::Rooms, &snapshot.form.rooms, self.ttl)?;
        }
        if let Some(method) = snapshot.form.payment_method {
            self.session
                .put_with_ttl(&StorageKey::PaymentType, &method, self.ttl)?;
        }

        info!(
            offering = snapshot.offering.id(),
            product = ?snapshot.form.product,
            "checkout snapshot saved"
        );
        Ok(())
    }

    // Restores a saved snapshot, moves `controller` to the review step and
    // deletes the stored entries. A second call finds nothing.
    pub fn restore(&self, controller: &mut StepController) -> Option<CheckoutSnapshot> {
        if !self.session.has_transient() {
            return None;
        }

        let snapshot = self.read_snapshot();
        let cleared = self.session.clear_transient();

        match snapshot {
            Some(snapshot) => {
                controller.jump_to(CheckoutStep::Review);
                info!(
                    offering = snapshot.offering.id(),
                    cleared, "checkout resumed from session"
                );
                Some(snapshot)
            }
            None => {
                warn!(cleared, "discarded unusable checkout snapshot");
                None
            }
        }
    }

    fn read_snapshot(&self) -> Option<CheckoutSnapshot> {
        match self.session.get::<CheckoutSnapshot>(&StorageKey::FullBookingData) {
            Ok(Some(snapshot)) => return Some(snapshot),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "full booking snapshot unreadable, trying split entries");
            }
        }
        self.read_split_entries()
    }

    // Older shells only stored the form and the hotel side by side
    fn read_split_entries(&self) -> Option<CheckoutSnapshot> {
        let form = self
            .session
            .get::<BookingFormData>(&StorageKey::BookingData)
            .map_err(|e| warn!(error = %e, "booking form entry unreadable"))
            .ok()??;
        let hotel = self
            .session
            .get::<Hotel>(&StorageKey::Hotel)
            .map_err(|e| warn!(error = %e, "hotel entry unreadable"))
            .ok()??;

        let mut form = form;
        if form.rooms.is_empty() {
            if let Ok(Some(rooms)) = self.session.get::<Vec<RoomSelection>>(&StorageKey::Rooms) {
                form.rooms = rooms;
            }
        }
        if form.payment_method.is_none() {
            if let Ok(Some(method)) = self.session.get::<PaymentMethod>(&StorageKey::PaymentType) {
                form.payment_method = Some(method);
            }
        }

        Some(CheckoutSnapshot::new(form, Offering::Hotel(hotel)))
    }
}
