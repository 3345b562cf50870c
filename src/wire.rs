// Supplier wire decoding. Upstream sources never agreed on a schema:
// JSON gateways disagree on field spellings, XML gateways speak an
// AvailRS-style document, and both leave fields out. Everything funnels
// through the normalizers in normalize.rs so one canonical Offer comes
// out regardless of the source dialect.

use crate::driver::SearchCriteria;
use crate::identity::offer_id;
use crate::model::{
    Airline, Leg, Location, Offer, PassengerCounts, Price, PriceComponent, Segment,
    SupplierPayload,
};
use crate::normalize::{
    canonical_cabin, clean_luggage, currency_decimal_places, currency_symbol, derive_taxes,
    infer_refundable, parse_duration_minutes, parse_duration_str,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value in field {field}: {detail}")]
    InvalidField { field: &'static str, detail: String },

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Unexpected payload shape: {0}")]
    PayloadShape(String),
}

// Ordered field-name aliases observed across supplier integrations.
// First match wins.
const OFFER_LIST_ALIASES: &[&str] = &["offers", "results", "items", "data"];
const REFERENCE_ALIASES: &[&str] = &["reference_id", "referenceId", "ref", "offer_ref", "token"];
const TOTAL_ALIASES: &[&str] = &["payable", "consumer_price", "total_price", "total", "price"];
const BASE_FARE_ALIASES: &[&str] = &["base_fare", "baseFare", "base", "net_price", "net"];
const CURRENCY_ALIASES: &[&str] = &["currency", "currency_code"];
const VALID_UNTIL_ALIASES: &[&str] = &["valid_until", "expires_at", "offer_expiry"];
const REFUNDABLE_ALIASES: &[&str] = &["refundable", "is_refundable", "refund"];
const VALIDATING_ALIASES: &[&str] = &["validating_airline", "validating_carrier", "plating_carrier"];
const LEGS_ALIASES: &[&str] = &["legs", "journeys", "itineraries"];
const SEGMENTS_ALIASES: &[&str] = &["segments", "flights"];
const DEPARTURE_ALIASES: &[&str] = &["departure", "from", "origin"];
const ARRIVAL_ALIASES: &[&str] = &["arrival", "to", "destination"];
const DURATION_ALIASES: &[&str] = &["duration", "duration_minutes", "travel_time"];
const CABIN_ALIASES: &[&str] = &["cabin", "cabin_class", "class"];
const STOPS_ALIASES: &[&str] = &["stops", "connections"];
const CAPACITY_ALIASES: &[&str] = &["capacity", "seats", "seats_available"];
const LUGGAGE_ALIASES: &[&str] = &["luggage", "baggage", "baggage_allowance"];
const AIRLINE_ALIASES: &[&str] = &["airline", "carrier", "marketing_carrier"];
const OPERATING_ALIASES: &[&str] = &["operating_airline", "operating_carrier"];
const FLIGHT_NO_ALIASES: &[&str] = &["flight_number", "flight_no", "number"];
const BOOKING_CLASS_ALIASES: &[&str] = &["booking_class", "rbd", "class_of_service"];
const FARE_BASIS_ALIASES: &[&str] = &["fare_basis", "fare_basis_code"];
const BREAKDOWN_ALIASES: &[&str] = &["breakdown", "price_breakdown", "pax_prices"];
const GUARANTEED_ALIASES: &[&str] = &["guaranteed", "price_guaranteed"];

// Decode one supplier payload into canonical offers. A record that fails
// normalization is dropped and counted; it never aborts the batch.
pub fn normalize_payload(
    supplier_code: &str,
    payload: &SupplierPayload,
    request: &SearchCriteria,
) -> (Vec<Offer>, usize) {
    match payload {
        SupplierPayload::Json(value) => normalize_json(supplier_code, value, request),
        SupplierPayload::Xml(text) => normalize_xml(supplier_code, text, request),
    }
}

fn normalize_json(
    supplier_code: &str,
    value: &Value,
    request: &SearchCriteria,
) -> (Vec<Offer>, usize) {
    let records = match pick(value, OFFER_LIST_ALIASES).and_then(Value::as_array) {
        Some(records) => records,
        None => {
            debug!(supplier = supplier_code, "payload carries no offer list");
            return (Vec::new(), 0);
        }
    };

    let mut offers = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for record in records {
        match normalize_json_record(supplier_code, record, request) {
            Ok(offer) => offers.push(offer),
            Err(err) => {
                dropped += 1;
                debug!(supplier = supplier_code, error = %err, "dropped malformed record");
            }
        }
    }
    (offers, dropped)
}

fn normalize_json_record(
    supplier_code: &str,
    record: &Value,
    request: &SearchCriteria,
) -> Result<Offer, NormalizeError> {
    let reference = pick(record, REFERENCE_ALIASES)
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("reference"))?
        .to_string();

    let total = pick(record, TOTAL_ALIASES)
        .and_then(as_amount)
        .ok_or(NormalizeError::MissingField("payable total"))?;
    let base_fare = pick(record, BASE_FARE_ALIASES).and_then(as_amount).unwrap_or(total);

    let currency = pick(record, CURRENCY_ALIASES)
        .and_then(Value::as_str)
        .unwrap_or(&request.currency)
        .to_uppercase();

    let price = Price {
        total,
        base_fare,
        taxes: derive_taxes(total, base_fare),
        currency_symbol: currency_symbol(&currency),
        decimal_places: currency_decimal_places(&currency),
        breakdown: pick(record, BREAKDOWN_ALIASES)
            .map(decode_breakdown)
            .unwrap_or_default(),
        guaranteed: pick(record, GUARANTEED_ALIASES)
            .map(|v| as_token(v).map(|t| infer_refundable(Some(&t))).unwrap_or(false))
            .unwrap_or(false),
        currency,
    };

    let legs_value = pick(record, LEGS_ALIASES)
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingField("legs"))?;
    if legs_value.is_empty() {
        return Err(NormalizeError::MissingField("legs"));
    }
    let legs = legs_value
        .iter()
        .map(|leg| decode_json_leg(leg, request))
        .collect::<Result<Vec<Leg>, NormalizeError>>()?;

    let validating_airline = pick(record, VALIDATING_ALIASES)
        .map(decode_airline)
        .unwrap_or_else(|| legs[0].segments[0].airline.clone());

    let refundable_token = pick(record, REFUNDABLE_ALIASES).and_then(as_token);
    let valid_until = pick(record, VALID_UNTIL_ALIASES)
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Ok(Offer::new(
        offer_id(supplier_code, &reference),
        supplier_code.to_string(),
        reference,
        price,
        legs,
        validating_airline,
        infer_refundable(refundable_token.as_deref()),
        valid_until,
        passenger_counts(request),
        SupplierPayload::Json(record.clone()),
    ))
}

fn decode_json_leg(leg: &Value, request: &SearchCriteria) -> Result<Leg, NormalizeError> {
    let segments_value = pick(leg, SEGMENTS_ALIASES)
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingField("segments"))?;
    if segments_value.is_empty() {
        return Err(NormalizeError::MissingField("segments"));
    }

    let cabin = leg_cabin(leg, request);
    let segments = segments_value
        .iter()
        .map(|segment| decode_json_segment(segment, &cabin))
        .collect::<Result<Vec<Segment>, NormalizeError>>()?;

    let stops = pick(leg, STOPS_ALIASES)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(segments.len() as u32 - 1);

    let duration_minutes = pick(leg, DURATION_ALIASES)
        .and_then(parse_duration_minutes)
        .unwrap_or_else(|| segments.iter().map(|s| s.duration_minutes).sum());

    Ok(Leg {
        departure: pick(leg, DEPARTURE_ALIASES)
            .map(decode_location)
            .unwrap_or_else(|| segments[0].departure.clone()),
        arrival: pick(leg, ARRIVAL_ALIASES)
            .map(decode_location)
            .unwrap_or_else(|| segments[segments.len() - 1].arrival.clone()),
        duration_minutes,
        stops,
        cabin,
        segments,
    })
}

fn leg_cabin(leg: &Value, request: &SearchCriteria) -> String {
    pick(leg, CABIN_ALIASES)
        .and_then(Value::as_str)
        .map(canonical_cabin)
        .unwrap_or_else(|| canonical_cabin(&request.cabin))
}

fn decode_json_segment(segment: &Value, leg_cabin: &str) -> Result<Segment, NormalizeError> {
    let airline = pick(segment, AIRLINE_ALIASES)
        .map(decode_airline)
        .ok_or(NormalizeError::MissingField("airline"))?;

    let flight_number = pick(segment, FLIGHT_NO_ALIASES)
        .and_then(as_token)
        .ok_or(NormalizeError::MissingField("flight_number"))?;

    Ok(Segment {
        departure: pick(segment, DEPARTURE_ALIASES)
            .map(decode_location)
            .ok_or(NormalizeError::MissingField("departure"))?,
        arrival: pick(segment, ARRIVAL_ALIASES)
            .map(decode_location)
            .ok_or(NormalizeError::MissingField("arrival"))?,
        airline,
        operating_airline: pick(segment, OPERATING_ALIASES).map(decode_airline),
        flight_number,
        cabin: pick(segment, CABIN_ALIASES)
            .and_then(Value::as_str)
            .map(canonical_cabin)
            .unwrap_or_else(|| leg_cabin.to_string()),
        duration_minutes: pick(segment, DURATION_ALIASES)
            .and_then(parse_duration_minutes)
            .unwrap_or(0),
        capacity: pick(segment, CAPACITY_ALIASES)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(0),
        luggage: pick(segment, LUGGAGE_ALIASES)
            .and_then(Value::as_str)
            .and_then(clean_luggage),
        booking_class: pick(segment, BOOKING_CLASS_ALIASES).and_then(as_token),
        fare_basis: pick(segment, FARE_BASIS_ALIASES).and_then(as_token),
    })
}

// Airline arrives either as a bare carrier code or an object.
fn decode_airline(value: &Value) -> Airline {
    match value {
        Value::String(code) => Airline {
            code: code.to_uppercase(),
            name: code.to_uppercase(),
            ..Default::default()
        },
        Value::Object(map) => Airline {
            id: map.get("id").and_then(as_token),
            code: map
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_uppercase(),
            name: map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            logo: map.get("logo").and_then(Value::as_str).map(str::to_string),
            translations: decode_translations(map.get("translations")),
        },
        _ => Airline::default(),
    }
}

// Location arrives either as a bare airport code or an object carrying
// optional name variants, geocode/timezone metadata and an event time.
fn decode_location(value: &Value) -> Location {
    match value {
        Value::String(code) => Location {
            code: code.to_uppercase(),
            ..Default::default()
        },
        Value::Object(map) => Location {
            code: map
                .get("code")
                .or_else(|| map.get("airport"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_uppercase(),
            name: map.get("name").and_then(Value::as_str).map(str::to_string),
            translations: decode_translations(map.get("translations")),
            latitude: map.get("latitude").or_else(|| map.get("lat")).and_then(Value::as_f64),
            longitude: map.get("longitude").or_else(|| map.get("lon")).and_then(Value::as_f64),
            timezone: map.get("timezone").and_then(Value::as_str).map(str::to_string),
            at: map
                .get("at")
                .or_else(|| map.get("time"))
                .or_else(|| map.get("datetime"))
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        },
        _ => Location::default(),
    }
}

fn decode_translations(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_breakdown(value: &Value) -> HashMap<String, PriceComponent> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(pax_type, bucket)| {
                    let component = PriceComponent {
                        base: bucket.get("base").and_then(as_amount).unwrap_or(0.0),
                        tax: bucket.get("tax").and_then(as_amount).unwrap_or(0.0),
                        service_charge: bucket
                            .get("service_charge")
                            .and_then(as_amount)
                            .unwrap_or(0.0),
                        commission: bucket.get("commission").and_then(as_amount).unwrap_or(0.0),
                        payable: bucket.get("payable").and_then(as_amount).unwrap_or(0.0),
                        count: bucket.get("count").and_then(Value::as_u64).unwrap_or(0) as u32,
                    };
                    (pax_type.to_uppercase(), component)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn passenger_counts(request: &SearchCriteria) -> PassengerCounts {
    PassengerCounts {
        adults: request.adults,
        children: request.children,
        infants: request.infants,
    }
}

// First alias that resolves wins.
fn pick<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    let map = value.as_object()?;
    aliases.iter().find_map(|alias| map.get(*alias))
}

// Amounts arrive as JSON numbers or numeric strings.
fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Stringly-typed token out of whatever scalar the supplier sent.
fn as_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Some gateways drop the offset; treat those as UTC.
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// --- XML gateway dialect ---------------------------------------------------
//
// AvailRS-style document used by the XML suppliers. Attribute-heavy,
// wrapper element per collection.

#[derive(Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
#[serde(rename = "FareAvailRS")]
pub struct XmlAvailResponse {
    #[serde(rename = "@searchId")]
    pub search_id: String,
    #[serde(rename = "@currency")]
    pub currency: String,
    pub offers: XmlOffers,
}

#[derive(Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlOffers {
    #[serde(rename = "Offer")]
    pub offers: Vec<XmlOffer>,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlOffer {
    #[serde(rename = "@refId")]
    pub ref_id: String,
    #[serde(rename = "@validatingCarrier")]
    pub validating_carrier: String,
    #[serde(rename = "@refundable")]
    pub refundable: String,
    #[serde(rename = "@validUntil")]
    pub valid_until: String,
    pub price: XmlPrice,
    pub legs: XmlLegs,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlPrice {
    #[serde(rename = "@currency")]
    pub currency: String,
    #[serde(rename = "@total")]
    pub total: String,
    #[serde(rename = "@base")]
    pub base: String,
    #[serde(rename = "@guaranteed")]
    pub guaranteed: String,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlLegs {
    #[serde(rename = "Leg")]
    pub legs: Vec<XmlLeg>,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlLeg {
    #[serde(rename = "@duration")]
    pub duration: String,
    #[serde(rename = "@cabin")]
    pub cabin: String,
    #[serde(rename = "@stops")]
    pub stops: String,
    pub segments: XmlSegments,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlSegments {
    #[serde(rename = "Segment")]
    pub segments: Vec<XmlSegment>,
}

#[derive(Debug, PartialEq, Default, Deserialize, Clone, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlSegment {
    #[serde(rename = "@carrier")]
    pub carrier: String,
    #[serde(rename = "@operatingCarrier")]
    pub operating_carrier: String,
    #[serde(rename = "@flightNumber")]
    pub flight_number: String,
    #[serde(rename = "@departure")]
    pub departure: String,
    #[serde(rename = "@arrival")]
    pub arrival: String,
    #[serde(rename = "@departureTime")]
    pub departure_time: String,
    #[serde(rename = "@arrivalTime")]
    pub arrival_time: String,
    #[serde(rename = "@cabin")]
    pub cabin: String,
    #[serde(rename = "@duration")]
    pub duration: String,
    #[serde(rename = "@seats")]
    pub seats: String,
    #[serde(rename = "@baggage")]
    pub baggage: String,
    #[serde(rename = "@bookingClass")]
    pub booking_class: String,
    #[serde(rename = "@fareBasis")]
    pub fare_basis: String,
}

fn normalize_xml(
    supplier_code: &str,
    text: &str,
    request: &SearchCriteria,
) -> (Vec<Offer>, usize) {
    let response: XmlAvailResponse = match quick_xml::de::from_str(text) {
        Ok(response) => response,
        Err(err) => {
            debug!(supplier = supplier_code, error = %err, "unparseable XML payload");
            // The whole document is one record from the caller's view
            return (Vec::new(), 1);
        }
    };

    let currency = if response.currency.is_empty() {
        request.currency.clone()
    } else {
        response.currency.to_uppercase()
    };

    let mut offers = Vec::with_capacity(response.offers.offers.len());
    let mut dropped = 0;
    for xml_offer in response.offers.offers {
        match convert_xml_offer(supplier_code, xml_offer, &currency, request) {
            Ok(offer) => offers.push(offer),
            Err(err) => {
                dropped += 1;
                debug!(supplier = supplier_code, error = %err, "dropped malformed XML offer");
            }
        }
    }
    (offers, dropped)
}

fn convert_xml_offer(
    supplier_code: &str,
    xml_offer: XmlOffer,
    response_currency: &str,
    request: &SearchCriteria,
) -> Result<Offer, NormalizeError> {
    if xml_offer.ref_id.is_empty() {
        return Err(NormalizeError::MissingField("refId"));
    }
    if xml_offer.legs.legs.is_empty() {
        return Err(NormalizeError::MissingField("Legs"));
    }

    let raw = quick_xml::se::to_string(&xml_offer)
        .map_err(|e| NormalizeError::XmlParse(e.to_string()))?;

    let total: f64 = xml_offer
        .price
        .total
        .trim()
        .parse()
        .map_err(|_| NormalizeError::InvalidField {
            field: "Price@total",
            detail: xml_offer.price.total.clone(),
        })?;
    let base_fare: f64 = xml_offer.price.base.trim().parse().unwrap_or(total);

    let currency = if xml_offer.price.currency.is_empty() {
        response_currency.to_string()
    } else {
        xml_offer.price.currency.to_uppercase()
    };

    let legs = xml_offer
        .legs
        .legs
        .into_iter()
        .map(|leg| convert_xml_leg(leg, request))
        .collect::<Result<Vec<Leg>, NormalizeError>>()?;

    let validating_airline = if xml_offer.validating_carrier.is_empty() {
        legs[0].segments[0].airline.clone()
    } else {
        Airline {
            code: xml_offer.validating_carrier.to_uppercase(),
            name: xml_offer.validating_carrier.to_uppercase(),
            ..Default::default()
        }
    };

    let refundable = if xml_offer.refundable.is_empty() {
        infer_refundable(None)
    } else {
        infer_refundable(Some(&xml_offer.refundable))
    };

    Ok(Offer::new(
        offer_id(supplier_code, &xml_offer.ref_id),
        supplier_code.to_string(),
        xml_offer.ref_id.clone(),
        Price {
            total,
            base_fare,
            taxes: derive_taxes(total, base_fare),
            currency_symbol: currency_symbol(&currency),
            decimal_places: currency_decimal_places(&currency),
            breakdown: HashMap::new(),
            guaranteed: infer_refundable(Some(&xml_offer.price.guaranteed)),
            currency,
        },
        legs,
        validating_airline,
        refundable,
        parse_timestamp(&xml_offer.valid_until),
        passenger_counts(request),
        SupplierPayload::Xml(raw),
    ))
}

fn convert_xml_leg(xml_leg: XmlLeg, request: &SearchCriteria) -> Result<Leg, NormalizeError> {
    if xml_leg.segments.segments.is_empty() {
        return Err(NormalizeError::MissingField("Segments"));
    }

    let cabin = if xml_leg.cabin.is_empty() {
        canonical_cabin(&request.cabin)
    } else {
        canonical_cabin(&xml_leg.cabin)
    };

    let segments: Vec<Segment> = xml_leg
        .segments
        .segments
        .into_iter()
        .map(|s| convert_xml_segment(s, &cabin))
        .collect::<Result<Vec<Segment>, NormalizeError>>()?;

    let stops = xml_leg
        .stops
        .trim()
        .parse()
        .unwrap_or(segments.len() as u32 - 1);

    let duration_minutes = parse_duration_str(&xml_leg.duration)
        .unwrap_or_else(|| segments.iter().map(|s| s.duration_minutes).sum());

    Ok(Leg {
        departure: segments[0].departure.clone(),
        arrival: segments[segments.len() - 1].arrival.clone(),
        duration_minutes,
        stops,
        cabin,
        segments,
    })
}

fn convert_xml_segment(
    xml: XmlSegment,
    leg_cabin: &str,
) -> Result<Segment, NormalizeError> {
    if xml.carrier.is_empty() {
        return Err(NormalizeError::MissingField("Segment@carrier"));
    }
    if xml.departure.is_empty() || xml.arrival.is_empty() {
        return Err(NormalizeError::MissingField("Segment endpoints"));
    }

    let airline = Airline {
        code: xml.carrier.to_uppercase(),
        name: xml.carrier.to_uppercase(),
        ..Default::default()
    };
    let operating_airline = if xml.operating_carrier.is_empty() {
        None
    } else {
        Some(Airline {
            code: xml.operating_carrier.to_uppercase(),
            name: xml.operating_carrier.to_uppercase(),
            ..Default::default()
        })
    };

    Ok(Segment {
        departure: Location {
            code: xml.departure.to_uppercase(),
            at: parse_timestamp(&xml.departure_time),
            ..Default::default()
        },
        arrival: Location {
            code: xml.arrival.to_uppercase(),
            at: parse_timestamp(&xml.arrival_time),
            ..Default::default()
        },
        airline,
        operating_airline,
        flight_number: xml.flight_number,
        cabin: if xml.cabin.is_empty() {
            leg_cabin.to_string()
        } else {
            canonical_cabin(&xml.cabin)
        },
        duration_minutes: parse_duration_str(&xml.duration).unwrap_or(0),
        capacity: xml.seats.trim().parse().unwrap_or(0),
        luggage: clean_luggage(&xml.baggage),
        booking_class: if xml.booking_class.is_empty() {
            None
        } else {
            Some(xml.booking_class)
        },
        fare_basis: if xml.fare_basis.is_empty() {
            None
        } else {
            Some(xml.fare_basis)
        },
    })
}

// A small sample for inline testing
pub const SMALL_SAMPLE_XML: &str = r#"
<FareAvailRS searchId="FS-81223" currency="EUR">
  <Offers>
    <Offer refId="TK-2024-7781" validatingCarrier="TK" refundable="yes" validUntil="2026-09-01T10:00:00Z">
      <Price currency="EUR" total="450.30" base="380.00" guaranteed="true"/>
      <Legs>
        <Leg duration="8:35" cabin="Y" stops="1">
          <Segments>
            <Segment carrier="TK" operatingCarrier="TK" flightNumber="TK1035" departure="BUD" arrival="IST"
                     departureTime="2026-09-10T06:25:00Z" arrivalTime="2026-09-10T10:05:00Z"
                     cabin="Y" duration="2:20" seats="4" baggage="30 KG/ADT" bookingClass="Y" fareBasis="YRTTK"/>
            <Segment carrier="TK" flightNumber="TK708" departure="IST" arrival="DEL"
                     departureTime="2026-09-10T12:10:00Z" arrivalTime="2026-09-10T19:00:00Z"
                     cabin="Y" duration="5:20" seats="9" baggage="30 KG/ADT" bookingClass="Y" fareBasis="YRTTK"/>
          </Segments>
        </Leg>
      </Legs>
    </Offer>
  </Offers>
</FareAvailRS>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TripType;

    fn request() -> SearchCriteria {
        SearchCriteria {
            origin: "BUD".to_string(),
            destination: "DEL".to_string(),
            departure_date: chrono::NaiveDate::from_ymd_opt(2026, 9, 10).unwrap(),
            return_date: None,
            adults: 1,
            children: 0,
            infants: 0,
            cabin: "economy".to_string(),
            trip_type: TripType::OneWay,
            currency: "EUR".to_string(),
            language: "en".to_string(),
        }
    }

    fn sample_json_record() -> Value {
        serde_json::json!({
            "ref": "QR-55001",
            "payable": "612.40",
            "base_fare": 540.10,
            "currency": "eur",
            "refundable": "-",
            "valid_until": "2026-09-02T08:00:00Z",
            "validating_airline": {"code": "qr", "name": "Qatar Airways"},
            "breakdown": {
                "adt": {"base": 540.10, "tax": 72.30, "payable": 612.40, "count": 1}
            },
            "legs": [{
                "duration": "11:40",
                "cabin": "y",
                "segments": [
                    {
                        "carrier": {"code": "QR", "name": "Qatar Airways"},
                        "flight_number": "QR200",
                        "from": {"code": "bud", "time": "2026-09-10T09:30:00Z"},
                        "to": {"code": "doh", "time": "2026-09-10T15:05:00Z"},
                        "duration": "4:35",
                        "seats": 7,
                        "baggage": "30 KG/ADT",
                        "booking_class": "N",
                        "fare_basis": "NLQR8"
                    },
                    {
                        "carrier": "QR",
                        "operating_carrier": "QR",
                        "flight_number": "QR578",
                        "from": "DOH",
                        "to": "DEL",
                        "duration": "3:50",
                        "seats": 2,
                        "baggage": "30 KG/ADT"
                    }
                ]
            }]
        })
    }

    #[test]
    fn json_record_normalizes_to_canonical_offer() {
        let payload = SupplierPayload::Json(serde_json::json!({"offers": [sample_json_record()]}));
        let (offers, dropped) = normalize_payload("qatar_gw", &payload, &request());

        assert_eq!(dropped, 0);
        assert_eq!(offers.len(), 1);
        let offer = &offers[0];

        assert_eq!(offer.supplier_code, "qatar_gw");
        assert_eq!(offer.reference_id, "QR-55001");
        assert!(offer.id.starts_with("qatar_gw_"));
        assert_eq!(offer.price.total, 612.40);
        assert_eq!(offer.price.base_fare, 540.10);
        assert!((offer.price.taxes - 72.30).abs() < 1e-9);
        assert_eq!(offer.price.currency, "EUR");
        assert_eq!(offer.price.currency_symbol, "€");
        assert!(!offer.refundable);
        assert_eq!(offer.validating_airline.code, "QR");
        assert_eq!(offer.price.breakdown["ADT"].count, 1);

        let leg = &offer.legs[0];
        assert_eq!(leg.duration_minutes, 700);
        assert_eq!(leg.stops, 1);
        assert_eq!(leg.cabin, "Economy");
        assert_eq!(leg.departure.code, "BUD");
        assert_eq!(leg.arrival.code, "DEL");
        assert_eq!(leg.segments[0].luggage.as_deref(), Some("30 KG"));
        assert_eq!(leg.segments[0].booking_class.as_deref(), Some("N"));
        // min positive capacity across segments
        assert_eq!(offer.seats_available, 2);
    }

    #[test]
    fn malformed_record_is_dropped_without_aborting_batch() {
        let good = sample_json_record();
        let missing_reference = serde_json::json!({"payable": 100.0, "legs": []});
        let missing_price = serde_json::json!({"ref": "X-1", "legs": []});
        let payload = SupplierPayload::Json(
            serde_json::json!({"offers": [missing_reference, good, missing_price]}),
        );

        let (offers, dropped) = normalize_payload("gw", &payload, &request());
        assert_eq!(offers.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn base_fare_falls_back_to_total() {
        let mut record = sample_json_record();
        record.as_object_mut().unwrap().remove("base_fare");
        let payload = SupplierPayload::Json(serde_json::json!({"results": [record]}));

        let (offers, _) = normalize_payload("gw", &payload, &request());
        assert_eq!(offers[0].price.base_fare, offers[0].price.total);
        assert_eq!(offers[0].price.taxes, 0.0);
    }

    #[test]
    fn payload_without_offer_list_yields_empty() {
        let payload = SupplierPayload::Json(serde_json::json!({"status": "ok"}));
        let (offers, dropped) = normalize_payload("gw", &payload, &request());
        assert!(offers.is_empty());
        assert_eq!(dropped, 0);
    }

    #[test]
    fn same_record_normalized_twice_keeps_the_same_id() {
        let payload = SupplierPayload::Json(serde_json::json!({"offers": [sample_json_record()]}));
        let (first, _) = normalize_payload("gw", &payload, &request());
        let (second, _) = normalize_payload("gw", &payload, &request());
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn xml_document_normalizes_through_the_same_rules() {
        let payload = SupplierPayload::Xml(SMALL_SAMPLE_XML.to_string());
        let (offers, dropped) = normalize_payload("tk_xml", &payload, &request());

        assert_eq!(dropped, 0);
        assert_eq!(offers.len(), 1);
        let offer = &offers[0];

        assert_eq!(offer.reference_id, "TK-2024-7781");
        assert_eq!(offer.price.total, 450.30);
        assert_eq!(offer.price.base_fare, 380.00);
        assert!((offer.price.taxes - 70.30).abs() < 1e-9);
        assert!(offer.price.guaranteed);
        assert!(offer.refundable);
        assert_eq!(offer.validating_airline.code, "TK");
        assert_eq!(offer.legs[0].stops, 1);
        assert_eq!(offer.legs[0].duration_minutes, 515);
        assert_eq!(offer.legs[0].segments.len(), 2);
        assert_eq!(offer.legs[0].segments[0].luggage.as_deref(), Some("30 KG"));
        assert_eq!(offer.seats_available, 4);
        assert!(matches!(offer.raw_payload(), SupplierPayload::Xml(_)));
    }

    #[test]
    fn unparseable_xml_counts_as_one_dropped_record() {
        let payload = SupplierPayload::Xml("<FareAvailRS><broken".to_string());
        let (offers, dropped) = normalize_payload("gw", &payload, &request());
        assert!(offers.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn timestamp_parsing_accepts_offsetless_values() {
        assert!(parse_timestamp("2026-09-10T06:25:00Z").is_some());
        assert!(parse_timestamp("2026-09-10T06:25:00").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }
}
