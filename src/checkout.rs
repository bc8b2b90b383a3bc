// Checkout step controller
// Sequences the fixed checkout steps and gates forward navigation on per-step validation.

use crate::models::{BookingFormData, ProductKind, Traveler};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    TravelerDetails = 1,
    Review = 2,
    Payment = 3,
}

impl CheckoutStep {
    pub const ALL: [CheckoutStep; 3] = [
        CheckoutStep::TravelerDetails,
        CheckoutStep::Review,
        CheckoutStep::Payment,
    ];

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn next(&self) -> Option<CheckoutStep> {
        match self {
            CheckoutStep::TravelerDetails => Some(CheckoutStep::Review),
            CheckoutStep::Review => Some(CheckoutStep::Payment),
            CheckoutStep::Payment => None,
        }
    }

    pub fn previous(&self) -> Option<CheckoutStep> {
        match self {
            CheckoutStep::TravelerDetails => None,
            CheckoutStep::Review => Some(CheckoutStep::TravelerDetails),
            CheckoutStep::Payment => Some(CheckoutStep::Review),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Travelers,
    FirstName,
    LastName,
    DateOfBirth,
    Gender,
    Email,
    Phone,
    Dates,
    Rooms,
    Terms,
    PaymentMethod,
}

impl Field {
    fn label(&self) -> &'static str {
        match self {
            Field::Travelers => "at least one traveler",
            Field::FirstName => "first name",
            Field::LastName => "last name",
            Field::DateOfBirth => "date of birth",
            Field::Gender => "gender",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Dates => "travel dates",
            Field::Rooms => "a room selection",
            Field::Terms => "accepting the terms",
            Field::PaymentMethod => "a payment method",
        }
    }
}

// A missing or invalid field that keeps "Next" disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub step: CheckoutStep,
    pub traveler_index: Option<usize>,
    pub field: Field,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.traveler_index {
            Some(index) => write!(f, "Traveler {}: {} is required", index + 1, self.field.label()),
            None => write!(f, "{} is required", self.field.label()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    #[error("Step {} is incomplete ({} issue(s))", .step.number(), .issues.len())]
    StepInvalid {
        step: CheckoutStep,
        issues: Vec<ValidationIssue>,
    },

    #[error("Checkout flow is closed")]
    FlowClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Moved(CheckoutStep),
    // Last step validated; the booking can be submitted
    ReadyToSubmit,
    // "Back" on the first step leaves checkout entirely
    Exited,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn traveler_issues(index: usize, traveler: &Traveler, issues: &mut Vec<ValidationIssue>) {
    let mut missing = |field| {
        issues.push(ValidationIssue {
            step: CheckoutStep::TravelerDetails,
            traveler_index: Some(index),
            field,
        })
    };

    if is_blank(&traveler.first_name) {
        missing(Field::FirstName);
    }
    if is_blank(&traveler.last_name) {
        missing(Field::LastName);
    }
    if traveler.date_of_birth.is_none() {
        missing(Field::DateOfBirth);
    }
    if traveler.gender.is_none() {
        missing(Field::Gender);
    }
    if !traveler.traveler_type.is_contact_exempt() {
        if is_blank(&traveler.email) {
            missing(Field::Email);
        }
        if is_blank(&traveler.phone) {
            missing(Field::Phone);
        }
    }
}

// Every reason `step` cannot be left forward. Empty means "Next" is enabled.
pub fn validate(step: CheckoutStep, form: &BookingFormData) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let form_issue = |field| ValidationIssue {
        step,
        traveler_index: None,
        field,
    };

    match step {
        CheckoutStep::TravelerDetails => {
            if form.travelers.is_empty() {
                issues.push(form_issue(Field::Travelers));
            }
            for (index, traveler) in form.travelers.iter().enumerate() {
                traveler_issues(index, traveler, &mut issues);
            }
        }
        CheckoutStep::Review => {
            if form.product.requires_dates() && form.dates.is_none() {
                issues.push(form_issue(Field::Dates));
            }
            if form.product == ProductKind::Hotel
                && form.rooms.iter().all(|room| room.quantity == 0)
            {
                issues.push(form_issue(Field::Rooms));
            }
            if !form.terms_accepted {
                issues.push(form_issue(Field::Terms));
            }
        }
        CheckoutStep::Payment => {
            if form.payment_method.is_none() {
                issues.push(form_issue(Field::PaymentMethod));
            }
        }
    }

    issues
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepController {
    step: CheckoutStep,
    exited: bool,
    ready: bool,
}

impl Default for StepController {
    fn default() -> Self {
        Self::new()
    }
}

impl StepController {
    pub fn new() -> Self {
        Self {
            step: CheckoutStep::TravelerDetails,
            exited: false,
            ready: false,
        }
    }

    pub fn step(&self) -> CheckoutStep {
        self.step
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    // True once the last step has validated and no back navigation happened since
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn issues(&self, form: &BookingFormData) -> Vec<ValidationIssue> {
        validate(self.step, form)
    }

    pub fn can_continue(&self, form: &BookingFormData) -> bool {
        !self.exited && self.issues(form).is_empty()
    }

    pub fn next(&mut self, form: &BookingFormData) -> Result<Navigation, NavigationError> {
        if self.exited {
            return Err(NavigationError::FlowClosed);
        }

        let issues = self.issues(form);
        if !issues.is_empty() {
            debug!(step = self.step.number(), issues = issues.len(), "next blocked by validation");
            return Err(NavigationError::StepInvalid {
                step: self.step,
                issues,
            });
        }

        match self.step.next() {
            Some(step) => {
                debug!(from = self.step.number(), to = step.number(), "checkout step advanced");
                self.step = step;
                Ok(Navigation::Moved(step))
            }
            None => {
                self.ready = true;
                Ok(Navigation::ReadyToSubmit)
            }
        }
    }

    pub fn back(&mut self) -> Navigation {
        self.ready = false;
        match self.step.previous() {
            Some(step) => {
                debug!(from = self.step.number(), to = step.number(), "checkout step retreated");
                self.step = step;
                Navigation::Moved(step)
            }
            None => {
                info!("checkout exited from first step");
                self.exited = true;
                Navigation::Exited
            }
        }
    }

    // Only the session bridge jumps directly; regular navigation goes through next/back
    pub(crate) fn jump_to(&mut self, step: CheckoutStep) {
        self.step = step;
        self.exited = false;
        self.ready = false;
    }
}
