// Idempotent submission guard
// Best-effort duplicate-POST prevention keyed by booking reference. Enforcement
// that must hold across devices belongs to the backend via the idempotency header.

use crate::api::{ApiError, BookingBackend};
use crate::models::{BookingPayload, BookingRecord, Confirmation, Offering, ProductKind};
use crate::storage::{ClientStorage, StorageError, StorageKey};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

const RANDOM_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingReference(String);

impl BookingReference {
    // Explicit reference first, then the payment intent id, then a random placeholder.
    pub fn derive(
        explicit: Option<&str>,
        payment_intent: Option<&str>,
        kind: ProductKind,
    ) -> Self {
        let pick = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match pick(explicit).or_else(|| pick(payment_intent)) {
            Some(reference) => Self(reference),
            None => {
                let generated = Self::generate(kind);
                info!(reference = %generated, "no reference available, generated placeholder");
                generated
            }
        }
    }

    // e.g. HTL-ABC123DEF
    pub fn generate(kind: ProductKind) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();
        Self(format!("{}-{}", kind.reference_prefix(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn marker_key(&self) -> StorageKey {
        StorageKey::BookingPosted(self.0.clone())
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Value stored under booking_posted_<ref>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedMarker {
    pub booking_id: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Posted {
        record: BookingRecord,
        confirmation: Confirmation,
    },
    // Marker already present; nothing was sent
    Skipped { confirmation: Confirmation },
}

impl SubmissionOutcome {
    pub fn confirmation(&self) -> &Confirmation {
        match self {
            SubmissionOutcome::Posted { confirmation, .. } => confirmation,
            SubmissionOutcome::Skipped { confirmation } => confirmation,
        }
    }

    pub fn was_posted(&self) -> bool {
        matches!(self, SubmissionOutcome::Posted { .. })
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Booking {reference} could not be submitted: {source}")]
    PostFailed {
        reference: String,
        #[source]
        source: ApiError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// Checks the local posted marker before POSTing and sets it afterwards.
// At most one successful POST per reference per local storage; no retry
// queue, a failed POST leaves no marker so the user can resubmit.
pub struct SubmissionGuard {
    storage: ClientStorage,
}

impl SubmissionGuard {
    pub fn new(storage: ClientStorage) -> Self {
        Self { storage }
    }

    pub fn is_posted(&self, reference: &BookingReference) -> bool {
        self.storage.local.contains(&reference.marker_key())
    }

    pub fn marker(&self, reference: &BookingReference) -> Option<PostedMarker> {
        self.storage
            .local
            .get::<PostedMarker>(&reference.marker_key())
            .ok()
            .flatten()
    }

    pub async fn submit(
        &self,
        reference: &BookingReference,
        payload: &BookingPayload,
        offering: &Offering,
        backend: &dyn BookingBackend,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        if self.is_posted(reference) {
            // Markers written by older shells may not decode; the booking id is then unknown
            let booking_id = self.marker(reference).map(|m| m.booking_id);
            info!(%reference, "booking already posted, skipping submission");
            return Ok(SubmissionOutcome::Skipped {
                confirmation: Confirmation::new(payload, offering, booking_id, true),
            });
        }

        let record = match backend.create_booking(payload, reference.as_str()).await {
            Ok(record) => record,
            Err(source) => {
                error!(%reference, error = %source, "booking submission failed");
                return Err(SubmissionError::PostFailed {
                    reference: reference.to_string(),
                    source,
                });
            }
        };

        self.storage.local.put(
            &reference.marker_key(),
            &PostedMarker {
                booking_id: record.id.clone(),
                posted_at: Utc::now(),
            },
        )?;

        let cleared = self.storage.session.clear_transient();
        if record.reference != reference.as_str() {
            warn!(
                %reference,
                server_reference = %record.reference,
                "backend returned a different booking reference"
            );
        }
        info!(%reference, booking_id = %record.id, cleared, "booking posted");

        let confirmation = Confirmation::new(payload, offering, Some(record.id.clone()), false);
        Ok(SubmissionOutcome::Posted {
            record,
            confirmation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_backend::MockBackend;
    use crate::models::fixtures::{complete_hotel_form, hotel};
    use test_case::test_case;

    fn payload_for(reference: &str) -> (BookingPayload, Offering) {
        let offering = Offering::Hotel(hotel());
        (
            BookingPayload::from_form(&complete_hotel_form(), &offering, reference),
            offering,
        )
    }

    #[test_case(Some("HTL-ABC123DEF"), Some("pi_123"), "HTL-ABC123DEF"; "explicit wins")]
    #[test_case(Some("  "), Some("pi_123"), "pi_123"; "blank explicit falls to intent")]
    #[test_case(None, Some(" pi_456 "), "pi_456"; "intent trimmed")]
    fn test_reference_precedence(explicit: Option<&str>, intent: Option<&str>, expected: &str) {
        let reference = BookingReference::derive(explicit, intent, ProductKind::Hotel);
        assert_eq!(reference.as_str(), expected);
    }

    #[test_case(ProductKind::Hotel, "HTL-")]
    #[test_case(ProductKind::Flight, "FLT-")]
    #[test_case(ProductKind::Umrah, "UMR-")]
    fn test_generated_reference_shape(kind: ProductKind, prefix: &str) {
        let reference = BookingReference::derive(None, None, kind);
        let value = reference.as_str();
        assert!(value.starts_with(prefix));

        let suffix = &value[prefix.len()..];
        assert_eq!(suffix.len(), RANDOM_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_generated_references_differ() {
        let a = BookingReference::generate(ProductKind::Car);
        let b = BookingReference::generate(ProductKind::Car);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_first_submit_posts_and_sets_marker() {
        let storage = ClientStorage::in_memory();
        storage.session.put(&StorageKey::BookingData, &complete_hotel_form()).unwrap();
        storage.session.put(&StorageKey::Hotel, &hotel()).unwrap();
        let guard = SubmissionGuard::new(storage.clone());
        let backend = MockBackend::new();

        let reference = BookingReference::derive(Some("HTL-ABC123DEF"), None, ProductKind::Hotel);
        let (payload, offering) = payload_for(reference.as_str());

        let outcome = guard
            .submit(&reference, &payload, &offering, &backend)
            .await
            .unwrap();

        assert!(outcome.was_posted());
        assert_eq!(backend.post_count(), 1);
        assert_eq!(backend.idempotency_keys(), vec!["HTL-ABC123DEF".to_string()]);
        assert!(storage
            .local
            .contains(&StorageKey::BookingPosted("HTL-ABC123DEF".to_string())));
        assert!(!storage.session.has_transient());
        assert_eq!(guard.marker(&reference).unwrap().booking_id, "bk-1");
    }

    #[tokio::test]
    async fn test_second_submit_is_skipped_with_cached_confirmation() {
        let storage = ClientStorage::in_memory();
        let guard = SubmissionGuard::new(storage);
        let backend = MockBackend::new();
        let reference = BookingReference::derive(Some("HTL-ABC123DEF"), None, ProductKind::Hotel);
        let (payload, offering) = payload_for(reference.as_str());

        let first = guard.submit(&reference, &payload, &offering, &backend).await.unwrap();
        let second = guard.submit(&reference, &payload, &offering, &backend).await.unwrap();

        assert_eq!(backend.post_count(), 1);
        assert!(!second.was_posted());
        let cached = second.confirmation();
        assert!(cached.from_cache);
        assert_eq!(cached.booking_id.as_deref(), Some("bk-1"));
        assert_eq!(cached.reference, first.confirmation().reference);
        assert_eq!(cached.total_usd, first.confirmation().total_usd);
        assert_eq!(cached.lead_traveler.as_deref(), Some("Aisha Khan"));
    }

    #[tokio::test]
    async fn test_legacy_marker_still_blocks_post() {
        let storage = ClientStorage::in_memory();
        storage
            .local
            .area()
            .set_raw("booking_posted_HTL-OLD000001", "true".to_string());
        let guard = SubmissionGuard::new(storage);
        let backend = MockBackend::new();
        let reference = BookingReference::derive(Some("HTL-OLD000001"), None, ProductKind::Hotel);
        let (payload, offering) = payload_for(reference.as_str());

        let outcome = guard.submit(&reference, &payload, &offering, &backend).await.unwrap();
        assert!(!outcome.was_posted());
        assert_eq!(outcome.confirmation().booking_id, None);
        assert_eq!(backend.post_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_post_leaves_no_marker() {
        let storage = ClientStorage::in_memory();
        storage.session.put(&StorageKey::BookingData, &complete_hotel_form()).unwrap();
        let guard = SubmissionGuard::new(storage.clone());
        let backend = MockBackend::new();
        backend.fail_next_requests(1);

        let reference = BookingReference::derive(Some("HTL-RETRY0001"), None, ProductKind::Hotel);
        let (payload, offering) = payload_for(reference.as_str());

        let err = guard
            .submit(&reference, &payload, &offering, &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::PostFailed { .. }));
        assert!(!guard.is_posted(&reference));
        assert!(storage.session.has_transient());

        // User re-triggers the flow manually
        let outcome = guard.submit(&reference, &payload, &offering, &backend).await.unwrap();
        assert!(outcome.was_posted());
        assert_eq!(backend.post_count(), 1);
    }
}
