// Booking flow orchestrator
// Wires the step controller, session bridge, submission guard and currency
// display for one checkout page.

use crate::api::{ApiError, BookingBackend};
use crate::checkout::{Navigation, NavigationError, StepController, ValidationIssue};
use crate::config::CheckoutConfig;
use crate::currency::{display_currency, CurrencyConverter};
use crate::guard::{BookingReference, SubmissionError, SubmissionGuard, SubmissionOutcome};
use crate::models::{BookingFormData, BookingPayload, Offering, ProductKind};
use crate::resume::{CheckoutSnapshot, SessionBridge};
use crate::storage::{ClientStorage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("Could not load offering: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No offering loaded")]
    NotMounted,

    #[error("Checkout is not ready to submit")]
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    // Restored from a session snapshot, positioned on the review step
    Resumed,
    Fresh,
}

struct Mounted {
    form: BookingFormData,
    offering: Offering,
}

pub struct BookingFlow {
    storage: ClientStorage,
    backend: Arc<dyn BookingBackend>,
    converter: Arc<CurrencyConverter>,
    bridge: SessionBridge,
    guard: SubmissionGuard,
    controller: StepController,
    mounted: Option<Mounted>,
    default_currency: String,
}

impl BookingFlow {
    pub fn new(
        config: &CheckoutConfig,
        storage: ClientStorage,
        backend: Arc<dyn BookingBackend>,
        converter: Arc<CurrencyConverter>,
    ) -> Self {
        Self {
            bridge: SessionBridge::new(storage.session.clone(), config.snapshot_ttl()),
            guard: SubmissionGuard::new(storage.clone()),
            storage,
            backend,
            converter,
            controller: StepController::new(),
            mounted: None,
            default_currency: config.default_currency.clone(),
        }
    }

    // User's country currency when known, else the configured default
    pub fn currency(&self) -> String {
        match self.storage.local.user_country() {
            Some(_) => display_currency(&self.storage.local).to_string(),
            None => self.default_currency.clone(),
        }
    }

    // A matching session snapshot wins over a fresh fetch; the rate table
    // is warmed alongside the fetch
    pub async fn mount(
        &mut self,
        kind: ProductKind,
        offering_id: &str,
    ) -> Result<MountOutcome, FlowError> {
        let mut controller = StepController::new();
        let currency = self.currency();

        if let Some(snapshot) = self.bridge.restore(&mut controller) {
            if snapshot.offering.kind() == kind && snapshot.offering.id() == offering_id {
                self.converter.select(&currency).await;
                self.controller = controller;
                self.mounted = Some(Mounted {
                    form: snapshot.form,
                    offering: snapshot.offering,
                });
                return Ok(MountOutcome::Resumed);
            }
            warn!(
                requested = offering_id,
                stored = snapshot.offering.id(),
                "session snapshot belongs to another offering, starting fresh"
            );
            controller = StepController::new();
        }

        let (offering, _) = futures::join!(
            self.backend.fetch_offering(kind, offering_id),
            self.converter.select(&currency)
        );
        let offering = offering?;

        info!(offering = offering.id(), ?kind, "checkout mounted");
        self.controller = controller;
        self.mounted = Some(Mounted {
            form: BookingFormData::new(kind, offering.id()),
            offering,
        });
        Ok(MountOutcome::Fresh)
    }

    fn mounted(&self) -> Result<&Mounted, FlowError> {
        self.mounted.as_ref().ok_or(FlowError::NotMounted)
    }

    pub fn form(&self) -> Result<&BookingFormData, FlowError> {
        self.mounted().map(|m| &m.form)
    }

    pub fn form_mut(&mut self) -> Result<&mut BookingFormData, FlowError> {
        self.mounted
            .as_mut()
            .map(|m| &mut m.form)
            .ok_or(FlowError::NotMounted)
    }

    pub fn offering(&self) -> Result<&Offering, FlowError> {
        self.mounted().map(|m| &m.offering)
    }

    pub fn controller(&self) -> &StepController {
        &self.controller
    }

    pub fn issues(&self) -> Vec<ValidationIssue> {
        match &self.mounted {
            Some(m) => self.controller.issues(&m.form),
            None => Vec::new(),
        }
    }

    pub fn can_continue(&self) -> bool {
        self.mounted
            .as_ref()
            .map(|m| self.controller.can_continue(&m.form))
            .unwrap_or(false)
    }

    pub fn next(&mut self) -> Result<Navigation, FlowError> {
        let mounted = self.mounted.as_ref().ok_or(FlowError::NotMounted)?;
        Ok(self.controller.next(&mounted.form)?)
    }

    pub fn back(&mut self) -> Navigation {
        self.controller.back()
    }

    pub fn quote_usd(&self) -> Result<f64, FlowError> {
        let mounted = self.mounted()?;
        Ok(mounted.offering.quote(&mounted.form))
    }

    pub async fn display_total(&self) -> Result<String, FlowError> {
        let total = self.quote_usd()?;
        Ok(self.converter.format(total, &self.currency()).await)
    }

    // Before leaving the page (payment redirect, reload)
    pub fn persist(&self) -> Result<(), FlowError> {
        let mounted = self.mounted()?;
        self.bridge.save(&CheckoutSnapshot::new(
            mounted.form.clone(),
            mounted.offering.clone(),
        ))?;
        Ok(())
    }

    pub async fn submit(&mut self) -> Result<SubmissionOutcome, FlowError> {
        if !self.controller.is_ready() {
            return Err(FlowError::NotReady);
        }
        let mounted = self.mounted.as_mut().ok_or(FlowError::NotMounted)?;

        let reference = BookingReference::derive(
            mounted.form.reference.as_deref(),
            mounted.form.payment_intent_id.as_deref(),
            mounted.form.product,
        );
        mounted.form.reference = Some(reference.to_string());

        let payload = BookingPayload::from_form(&mounted.form, &mounted.offering, reference.as_str());
        let outcome = self
            .guard
            .submit(&reference, &payload, &mounted.offering, self.backend.as_ref())
            .await?;

        // The booking is done either way; the form must not be persisted or resumed again
        self.mounted = None;
        self.controller = StepController::new();
        info!(%reference, posted = outcome.was_posted(), "checkout closed after submission");
        Ok(outcome)
    }
}
