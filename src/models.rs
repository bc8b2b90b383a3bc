// Booking form state and the read-only projections fetched from the backend

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Product lines sold through the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    #[default]
    Hotel,
    Car,
    Umrah,
    Flight,
    Property,
}

impl ProductKind {
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            ProductKind::Hotel => "HTL",
            ProductKind::Car => "CAR",
            ProductKind::Umrah => "UMR",
            ProductKind::Flight => "FLT",
            ProductKind::Property => "PRP",
        }
    }

    // REST collection path for this product line
    pub fn resource_path(&self) -> &'static str {
        match self {
            ProductKind::Hotel => "hotels",
            ProductKind::Car => "car-rentals",
            ProductKind::Umrah => "umrah-packages",
            ProductKind::Flight => "flights",
            ProductKind::Property => "properties",
        }
    }

    pub fn requires_dates(&self) -> bool {
        matches!(
            self,
            ProductKind::Hotel | ProductKind::Car | ProductKind::Property
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelerType {
    #[default]
    Adult,
    Child,
    Toddler,
    Infant,
}

impl TravelerType {
    pub fn is_contact_exempt(&self) -> bool {
        matches!(self, TravelerType::Toddler | TravelerType::Infant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Passport,
    NationalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelDocument {
    pub kind: DocumentKind,
    pub number: String,
    pub issuing_country: String,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traveler {
    pub traveler_type: TravelerType,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: String,
    pub phone: String,
    pub nationality: Option<String>,
    pub document: Option<TravelDocument>,
}

impl Traveler {
    pub fn new(traveler_type: TravelerType) -> Self {
        Self {
            traveler_type,
            ..Self::default()
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayDates {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayDates {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    // Inverted ranges count as zero nights
    pub fn nights(&self) -> u32 {
        (self.check_out - self.check_in).num_days().max(0) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSelection {
    pub room_id: String,
    pub name: String,
    pub quantity: u32,
    pub price_per_night_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSelection {
    pub segment_id: String,
    pub seat_number: String,
    pub traveler_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    PayAtProperty,
    Wallet,
}

// In-progress checkout state. Lives on the client only: created when the
// traveler step is entered, edited field by field, and dropped once the
// booking is submitted or the session expires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingFormData {
    pub product: ProductKind,
    pub offering_id: String,
    pub travelers: Vec<Traveler>,
    pub dates: Option<StayDates>,
    pub rooms: Vec<RoomSelection>,
    pub seats: Vec<SeatSelection>,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub payment_intent_id: Option<String>,
    pub terms_accepted: bool,
}

impl BookingFormData {
    pub fn new(product: ProductKind, offering_id: impl Into<String>) -> Self {
        Self {
            product,
            offering_id: offering_id.into(),
            travelers: vec![Traveler::new(TravelerType::Adult)],
            ..Self::default()
        }
    }

    pub fn lead_traveler(&self) -> Option<&Traveler> {
        self.travelers.first()
    }

    pub fn count_of(&self, traveler_type: TravelerType) -> usize {
        self.travelers
            .iter()
            .filter(|t| t.traveler_type == traveler_type)
            .count()
    }

    pub fn nights(&self) -> u32 {
        self.dates.map(|d| d.nights()).unwrap_or(0)
    }
}

// Read-only projections. The client keeps local copies for display and
// price calculation but never mutates them.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelRoom {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    pub price_per_night_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: String,
    pub name: String,
    pub city: String,
    pub star_rating: u8,
    #[serde(default)]
    pub rooms: Vec<HotelRoom>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSegment {
    pub id: String,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub flight_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub fare_usd: f64,
    #[serde(default)]
    pub segments: Vec<FlightSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmrahPackage {
    pub id: String,
    pub title: String,
    pub agent: String,
    pub duration_days: u32,
    pub price_per_person_usd: f64,
    pub departure_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarRental {
    pub id: String,
    pub model: String,
    pub vendor: String,
    pub seats: u32,
    pub daily_rate_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub title: String,
    pub city: String,
    pub max_guests: u32,
    pub nightly_rate_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Offering {
    Hotel(Hotel),
    Car(CarRental),
    Umrah(UmrahPackage),
    Flight(Ticket),
    Property(Property),
}

// Infants fly on a lap fare
const INFANT_FARE_RATIO: f64 = 0.1;

impl Offering {
    pub fn kind(&self) -> ProductKind {
        match self {
            Offering::Hotel(_) => ProductKind::Hotel,
            Offering::Car(_) => ProductKind::Car,
            Offering::Umrah(_) => ProductKind::Umrah,
            Offering::Flight(_) => ProductKind::Flight,
            Offering::Property(_) => ProductKind::Property,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Offering::Hotel(h) => &h.id,
            Offering::Car(c) => &c.id,
            Offering::Umrah(u) => &u.id,
            Offering::Flight(t) => &t.id,
            Offering::Property(p) => &p.id,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Offering::Hotel(h) => h.name.clone(),
            Offering::Car(c) => format!("{} ({})", c.model, c.vendor),
            Offering::Umrah(u) => u.title.clone(),
            Offering::Flight(t) => format!("{} {} → {}", t.airline, t.origin, t.destination),
            Offering::Property(p) => p.title.clone(),
        }
    }

    // Local USD estimate used for display; the backend prices the booking.
    pub fn quote(&self, form: &BookingFormData) -> f64 {
        let nights = form.nights() as f64;
        let rooms_per_night: f64 = form
            .rooms
            .iter()
            .map(|r| r.price_per_night_usd * r.quantity as f64)
            .sum();

        match self {
            Offering::Hotel(_) => nights * rooms_per_night,
            Offering::Property(p) if form.rooms.is_empty() => nights * p.nightly_rate_usd,
            Offering::Property(_) => nights * rooms_per_night,
            Offering::Car(c) => c.daily_rate_usd * nights.max(1.0),
            Offering::Flight(t) => {
                let infants = form.count_of(TravelerType::Infant) as f64;
                let paying = form.travelers.len() as f64 - infants;
                t.fare_usd * paying + t.fare_usd * INFANT_FARE_RATIO * infants
            }
            Offering::Umrah(u) => {
                let paying = form.travelers.len() - form.count_of(TravelerType::Infant);
                u.price_per_person_usd * paying as f64
            }
        }
    }
}

// POST body for a booking; amounts are always canonical USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingPayload {
    pub reference: String,
    pub product: ProductKind,
    pub offering_id: String,
    pub travelers: Vec<Traveler>,
    pub dates: Option<StayDates>,
    pub rooms: Vec<RoomSelection>,
    pub seats: Vec<SeatSelection>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_intent_id: Option<String>,
    pub total_usd: f64,
}

impl BookingPayload {
    pub fn from_form(form: &BookingFormData, offering: &Offering, reference: &str) -> Self {
        Self {
            reference: reference.to_string(),
            product: form.product,
            offering_id: form.offering_id.clone(),
            travelers: form.travelers.clone(),
            dates: form.dates,
            rooms: form.rooms.clone(),
            seats: form.seats.clone(),
            payment_method: form.payment_method,
            payment_intent_id: form.payment_intent_id.clone(),
            total_usd: offering.quote(form),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

// Server-created booking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: String,
    pub reference: String,
    pub status: BookingStatus,
    pub total_usd: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub amount_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub booking_id: String,
    pub number: String,
    pub issued_at: DateTime<Utc>,
    pub lines: Vec<InvoiceLine>,
    pub total_usd: f64,
}

// What the confirmation screen renders after submission. `from_cache` is
// set when the booking had already been posted and nothing was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub reference: String,
    pub booking_id: Option<String>,
    pub product: ProductKind,
    pub title: String,
    pub lead_traveler: Option<String>,
    pub total_usd: f64,
    pub from_cache: bool,
}

impl Confirmation {
    pub fn new(
        payload: &BookingPayload,
        offering: &Offering,
        booking_id: Option<String>,
        from_cache: bool,
    ) -> Self {
        Self {
            reference: payload.reference.clone(),
            booking_id,
            product: payload.product,
            title: offering.title(),
            lead_traveler: payload
                .travelers
                .first()
                .map(|t| t.full_name())
                .filter(|name| !name.is_empty()),
            total_usd: payload.total_usd,
            from_cache,
        }
    }
}
