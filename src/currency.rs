// Currency display layer
// Converts canonical USD amounts into the visitor's currency for display only.
// Nothing here feeds amounts sent to the backend.

use crate::api::ApiError;
use crate::storage::TypedStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const BASE_CURRENCY: &str = "USD";

// ISO 3166 alpha-2 -> ISO 4217 for the markets the marketplace serves
const COUNTRY_CURRENCIES: &[(&str, &str)] = &[
    ("US", "USD"),
    ("PK", "PKR"),
    ("SA", "SAR"),
    ("AE", "AED"),
    ("QA", "QAR"),
    ("KW", "KWD"),
    ("BH", "BHD"),
    ("OM", "OMR"),
    ("JO", "JOD"),
    ("EG", "EGP"),
    ("TR", "TRY"),
    ("GB", "GBP"),
    ("DE", "EUR"),
    ("FR", "EUR"),
    ("IT", "EUR"),
    ("ES", "EUR"),
    ("NL", "EUR"),
    ("BE", "EUR"),
    ("AT", "EUR"),
    ("IE", "EUR"),
    ("PT", "EUR"),
    ("FI", "EUR"),
    ("GR", "EUR"),
    ("IN", "INR"),
    ("BD", "BDT"),
    ("MY", "MYR"),
    ("ID", "IDR"),
    ("CN", "CNY"),
    ("JP", "JPY"),
    ("KR", "KRW"),
    ("CA", "CAD"),
    ("AU", "AUD"),
    ("CH", "CHF"),
    ("ZA", "ZAR"),
    ("NG", "NGN"),
];

pub fn currency_for_country(country_code: &str) -> &'static str {
    let code = country_code.trim().to_uppercase();
    COUNTRY_CURRENCIES
        .iter()
        .find(|(country, _)| *country == code)
        .map(|(_, currency)| *currency)
        .unwrap_or(BASE_CURRENCY)
}

// Display currency for the stored visitor country, USD when unknown.
pub fn display_currency(local: &TypedStore) -> &'static str {
    local
        .user_country()
        .map(|country| currency_for_country(&country))
        .unwrap_or(BASE_CURRENCY)
}

// Multipliers against USD. Fetched at runtime, never persisted server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateTable {
    rates: HashMap<String, f64>,
}

impl Default for ExchangeRateTable {
    fn default() -> Self {
        Self::identity()
    }
}

impl ExchangeRateTable {
    // {USD: 1}
    pub fn identity() -> Self {
        Self {
            rates: HashMap::from([(BASE_CURRENCY.to_string(), 1.0)]),
        }
    }

    pub fn from_rates<I, K>(rates: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut table: HashMap<String, f64> = rates
            .into_iter()
            .map(|(code, rate)| (code.as_ref().trim().to_uppercase(), rate))
            .collect();
        table.insert(BASE_CURRENCY.to_string(), 1.0);
        Self { rates: table }
    }

    // Usable rate for `currency`; zero, negative and non-finite rates count as missing.
    pub fn rate(&self, currency: &str) -> Option<f64> {
        self.rates
            .get(&currency.trim().to_uppercase())
            .copied()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub amount: f64,
    pub currency: String,
}

// Converts a USD amount, falling back to USD itself when the rate is unusable.
pub fn convert(amount_usd: f64, currency: &str, table: &ExchangeRateTable) -> Converted {
    let code = currency.trim().to_uppercase();
    match table.rate(&code) {
        Some(rate) => Converted {
            amount: amount_usd * rate,
            currency: code,
        },
        None => {
            if code != BASE_CURRENCY {
                debug!(currency = %code, "no usable rate, displaying USD");
            }
            Converted {
                amount: amount_usd,
                currency: BASE_CURRENCY.to_string(),
            }
        }
    }
}

fn minor_units(currency: &str) -> usize {
    match currency {
        "JPY" | "KRW" => 0,
        "KWD" | "BHD" | "OMR" | "JOD" => 3,
        _ => 2,
    }
}

fn symbol(currency: &str) -> Option<&'static str> {
    match currency {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "JPY" => Some("¥"),
        "INR" => Some("₹"),
        "KRW" => Some("₩"),
        "CNY" => Some("CN¥"),
        "CAD" => Some("CA$"),
        "AUD" => Some("A$"),
        _ => None,
    }
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn format_amount(amount: f64, currency: &str) -> String {
    let code = currency.trim().to_uppercase();
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let decimals = minor_units(&code);

    let fixed = format!("{:.*}", decimals, amount.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut number = group_thousands(whole);
    if let Some(fraction) = fraction {
        number.push('.');
        number.push_str(fraction);
    }

    // "-0.00" would read oddly once rounding has swallowed the value
    let negative = amount < 0.0 && number.chars().any(|c| c.is_ascii_digit() && c != '0');
    let sign = if negative { "-" } else { "" };

    match symbol(&code) {
        Some(symbol) => format!("{}{}{}", sign, symbol, number),
        None => format!("{}{}\u{a0}{}", sign, code, number),
    }
}

pub fn format_price(amount_usd: f64, currency: &str, table: &ExchangeRateTable) -> String {
    let converted = convert(amount_usd, currency, table);
    format_amount(converted.amount, &converted.currency)
}

#[async_trait]
pub trait RateSource: Send + Sync + 'static {
    async fn fetch_rates(&self) -> Result<ExchangeRateTable, ApiError>;
}

struct Selection {
    currency: String,
    table: ExchangeRateTable,
}

// Fetches one rate table per currency selection and keeps it until the
// selection changes. Any fetch failure degrades to the identity table.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    selection: RwLock<Option<Selection>>,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self {
            source,
            selection: RwLock::new(None),
        }
    }

    pub fn selected_currency(&self) -> Option<String> {
        self.selection.read().as_ref().map(|s| s.currency.clone())
    }

    pub async fn select(&self, currency: &str) -> ExchangeRateTable {
        let code = currency.trim().to_uppercase();

        let cached = {
            let selection = self.selection.read();
            selection
                .as_ref()
                .filter(|s| s.currency == code)
                .map(|s| s.table.clone())
        };
        if let Some(table) = cached {
            return table;
        }

        let table = if code == BASE_CURRENCY {
            ExchangeRateTable::identity()
        } else {
            match self.source.fetch_rates().await {
                Ok(table) => {
                    debug!(currency = %code, rates = table.len(), "exchange rates fetched");
                    table
                }
                Err(e) => {
                    warn!(currency = %code, error = %e, "exchange rate fetch failed, using USD");
                    ExchangeRateTable::identity()
                }
            }
        };

        *self.selection.write() = Some(Selection {
            currency: code,
            table: table.clone(),
        });
        table
    }

    pub async fn format(&self, amount_usd: f64, currency: &str) -> String {
        let table = self.select(currency).await;
        format_price(amount_usd, currency, &table)
    }
}
