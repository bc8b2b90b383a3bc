// Client-side core of the travel booking checkout

// Data and storage
pub mod models;
pub mod storage;
pub mod sync;

// Checkout components
pub mod checkout;
pub mod currency;
pub mod guard;
pub mod resume;

// Backend access and wiring
pub mod api;
pub mod config;
pub mod flow;
pub mod notice;
pub mod telemetry;

// Re-export key types for convenience
pub use api::{ApiError, BookingBackend, ClientError, ClientStats, HttpBackend, HttpRateSource};
pub use checkout::{
    validate, CheckoutStep, Navigation, NavigationError, StepController, ValidationIssue,
};
pub use config::CheckoutConfig;
pub use currency::{
    currency_for_country, format_price, CurrencyConverter, ExchangeRateTable, RateSource,
};
pub use flow::{BookingFlow, FlowError, MountOutcome};
pub use guard::{BookingReference, SubmissionError, SubmissionGuard, SubmissionOutcome};
pub use models::{BookingFormData, BookingPayload, Confirmation, Offering, ProductKind, Traveler};
pub use notice::{Notice, NoticeLevel};
pub use resume::{CheckoutSnapshot, SessionBridge};
pub use storage::{ClientStorage, MemoryStorage, StorageArea, StorageError, StorageKey, TypedStore};
pub use sync::{ReplicatedStorage, TabSync};
