// Canonical offer model shared by every supplier integration.
// Raw supplier payloads are normalized into these shapes exactly once,
// at the aggregation boundary; everything downstream consumes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Raw upstream payload, retained on each offer for the booking step.
// Never serialized to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum SupplierPayload {
    Json(serde_json::Value),
    Xml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PassengerCounts {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

// Per-passenger-type price bucket (base/tax/service charge/commission/payable/count)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceComponent {
    pub base: f64,
    pub tax: f64,
    pub service_charge: f64,
    pub commission: f64,
    pub payable: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub total: f64,
    pub base_fare: f64,
    // Always total - base_fare clamped at zero, see normalize::derive_taxes
    pub taxes: f64,
    pub currency: String,
    pub currency_symbol: String,
    pub decimal_places: u8,
    pub breakdown: HashMap<String, PriceComponent>,
    // Price is locked for the offer's validity window
    pub guaranteed: bool,
}

impl Price {
    // Rounding happens here and only here. Internal amounts stay unrounded
    // so repeated derivations never compound rounding error.
    pub fn rounded(&self) -> Price {
        let factor = 10f64.powi(self.decimal_places as i32);
        let round = |v: f64| (v * factor).round() / factor;

        let breakdown = self
            .breakdown
            .iter()
            .map(|(k, c)| {
                (
                    k.clone(),
                    PriceComponent {
                        base: round(c.base),
                        tax: round(c.tax),
                        service_charge: round(c.service_charge),
                        commission: round(c.commission),
                        payable: round(c.payable),
                        count: c.count,
                    },
                )
            })
            .collect();

        Price {
            total: round(self.total),
            base_fare: round(self.base_fare),
            taxes: round(self.taxes),
            currency: self.currency.clone(),
            currency_symbol: self.currency_symbol.clone(),
            decimal_places: self.decimal_places,
            breakdown,
            guaranteed: self.guaranteed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Airline {
    pub id: Option<String>,
    pub code: String,
    pub name: String,
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub translations: HashMap<String, String>,
}

// Airport/city reference. `at` carries the timestamp of the specific
// event (departure or arrival) this location stands for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub code: String,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub translations: HashMap<String, String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

// One physical flight number within a leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub departure: Location,
    pub arrival: Location,
    pub airline: Airline,
    pub operating_airline: Option<Airline>,
    pub flight_number: String,
    pub cabin: String,
    pub duration_minutes: u32,
    // Seats available on this segment, 0 if the supplier did not report
    pub capacity: u32,
    pub luggage: Option<String>,
    pub booking_class: Option<String>,
    pub fare_basis: Option<String>,
}

// One directional journey (outbound or return).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub departure: Location,
    pub arrival: Location,
    pub duration_minutes: u32,
    pub stops: u32,
    pub cabin: String,
    pub segments: Vec<Segment>,
}

// One priced, bookable itinerary from one supplier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: String,
    pub supplier_code: String,
    pub reference_id: String,
    pub price: Price,
    pub legs: Vec<Leg>,
    pub validating_airline: Airline,
    pub seats_available: u32,
    pub refundable: bool,
    pub valid_until: Option<DateTime<Utc>>,
    pub passenger_counts: PassengerCounts,
    #[serde(skip)]
    raw_payload: SupplierPayload,
}

impl Offer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        supplier_code: String,
        reference_id: String,
        price: Price,
        legs: Vec<Leg>,
        validating_airline: Airline,
        refundable: bool,
        valid_until: Option<DateTime<Utc>>,
        passenger_counts: PassengerCounts,
        raw_payload: SupplierPayload,
    ) -> Self {
        let seats_available = crate::normalize::seats_available(&legs);
        Self {
            id,
            supplier_code,
            reference_id,
            price,
            legs,
            validating_airline,
            seats_available,
            refundable,
            valid_until,
            passenger_counts,
            raw_payload,
        }
    }

    // Exposed only for the booking collaborator that must replay the
    // original payload against the originating supplier.
    pub fn raw_payload(&self) -> &SupplierPayload {
        &self.raw_payload
    }

    pub fn total_stops(&self) -> u32 {
        self.legs.iter().map(|l| l.stops).sum()
    }

    // First departure timestamp across legs, used as a ranking tie-break.
    pub fn departure_time(&self) -> Option<DateTime<Utc>> {
        self.legs
            .first()
            .and_then(|l| l.segments.first())
            .and_then(|s| s.departure.at)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|t| t < now).unwrap_or(false)
    }

    // Client-facing serialization: amounts rounded to the currency's
    // decimal places, raw payload excluded.
    pub fn to_client_json(&self) -> serde_json::Value {
        let mut presented = self.clone();
        presented.price = self.price.rounded();
        serde_json::to_value(&presented).unwrap_or(serde_json::Value::Null)
    }
}
