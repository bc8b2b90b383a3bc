use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};
use std::thread;
use travel_checkout::models::{Gender, RoomSelection, StayDates, Traveler, TravelerType};
use travel_checkout::{
    format_price, validate, BookingFormData, CheckoutStep, ExchangeRateTable, ProductKind,
    StorageKey, TabSync, TypedStore,
};

fn traveler(i: usize) -> Traveler {
    let mut traveler = Traveler::new(if i % 4 == 3 {
        TravelerType::Infant
    } else {
        TravelerType::Adult
    });
    traveler.first_name = format!("Guest{}", i);
    traveler.last_name = "Bench".to_string();
    traveler.date_of_birth = NaiveDate::from_ymd_opt(1990, 1, 1);
    traveler.gender = Some(Gender::Female);
    traveler.email = format!("guest{}@example.com", i);
    traveler.phone = "+10000000000".to_string();
    traveler
}

fn form(travelers: usize) -> BookingFormData {
    let mut form = BookingFormData::new(ProductKind::Hotel, "hotel-1");
    form.travelers = (0..travelers).map(traveler).collect();
    form.dates = NaiveDate::from_ymd_opt(2026, 6, 1)
        .zip(NaiveDate::from_ymd_opt(2026, 6, 5))
        .map(|(check_in, check_out)| StayDates::new(check_in, check_out));
    form.rooms = vec![RoomSelection {
        room_id: "dbl".to_string(),
        name: "Double Room".to_string(),
        quantity: 2,
        price_per_night_usd: 150.0,
    }];
    form.terms_accepted = true;
    form
}

// Envelope encode/decode under concurrent tabs writing the same session keys
pub fn storage_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_storage");

    for travelers in [1usize, 9, 40].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(travelers),
            travelers,
            |b, &travelers| {
                let draft = form(travelers);
                b.iter(|| {
                    let hub = TabSync::default();
                    let mut handles = vec![];
                    for _ in 0..4 {
                        let store = TypedStore::new(hub.open_tab());
                        let draft = draft.clone();
                        handles.push(thread::spawn(move || {
                            let mut rng = thread_rng();
                            for _ in 0..100 {
                                if rng.gen_bool(0.3) {
                                    let _ = store.put(&StorageKey::BookingData, &draft);
                                } else {
                                    let _ = store.get::<BookingFormData>(&StorageKey::BookingData);
                                }
                            }
                        }));
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.bench_function("in_memory_round_trip", |b| {
        let store = TypedStore::in_memory();
        let draft = form(4);
        b.iter(|| {
            store.put(&StorageKey::FullBookingData, &draft).unwrap();
            black_box(store.get::<BookingFormData>(&StorageKey::FullBookingData).unwrap())
        });
    });

    group.finish();
}

pub fn pricing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_display");
    let table = ExchangeRateTable::from_rates([("PKR", 280.0), ("EUR", 0.92), ("JPY", 151.3)]);

    for currency in ["USD", "PKR", "JPY", "XXX"].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(currency),
            currency,
            |b, &currency| b.iter(|| format_price(black_box(1_234_567.891), currency, &table)),
        );
    }
    group.finish();
}

pub fn validation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_validation");

    for travelers in [1usize, 9, 40].iter() {
        let draft = form(*travelers);
        group.bench_with_input(BenchmarkId::from_parameter(travelers), &draft, |b, draft| {
            b.iter(|| {
                for step in CheckoutStep::ALL {
                    black_box(validate(step, draft));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    storage_benchmark,
    pricing_benchmark,
    validation_benchmark
);
criterion_main!(benches);
