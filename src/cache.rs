// Short-lived cache of merged search results, keyed by a search
// fingerprint. Sits between the orchestrator and the supplier fan-out so
// repeated identical searches inside the validity window do not burn
// upstream quota.

use crate::driver::SearchCriteria;
use crate::model::Offer;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    expired_count: AtomicUsize,
    eviction_count: AtomicUsize,
    store_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub eviction_count: usize,
    pub store_count: usize,
}

struct CacheEntry {
    offers: Vec<Offer>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

pub struct OfferCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    stats: CacheStats,
}

impl OfferCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    // Everything that changes what a search returns is part of the key.
    pub fn fingerprint(criteria: &SearchCriteria) -> String {
        format!(
            "{}:{}:{}:{}:{}-{}-{}:{}:{:?}:{}",
            criteria.origin.to_uppercase(),
            criteria.destination.to_uppercase(),
            criteria.departure_date,
            criteria
                .return_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            criteria.adults,
            criteria.children,
            criteria.infants,
            criteria.cabin.to_lowercase(),
            criteria.trip_type,
            criteria.currency.to_uppercase(),
        )
    }

    pub fn get(&self, criteria: &SearchCriteria) -> Option<Vec<Offer>> {
        let key = Self::fingerprint(criteria);
        match self.entries.get(&key) {
            Some(entry) if !entry.is_expired() => {
                self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                Some(entry.offers.clone())
            }
            Some(entry) => {
                drop(entry);
                self.entries.remove(&key);
                self.stats.expired_count.fetch_add(1, Ordering::SeqCst);
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                None
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    // An entry never outlives the earliest valid_until of its offers.
    pub fn store(&self, criteria: &SearchCriteria, offers: &[Offer]) -> bool {
        let now = Utc::now();
        let mut ttl = self.config.default_ttl;
        for offer in offers {
            if let Some(valid_until) = offer.valid_until {
                let remaining = (valid_until - now).num_seconds();
                if remaining <= 0 {
                    return false;
                }
                ttl = ttl.min(Duration::from_secs(remaining as u64));
            }
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            Self::fingerprint(criteria),
            CacheEntry {
                offers: offers.to_vec(),
                stored_at: Instant::now(),
                ttl,
            },
        );
        self.stats.store_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    // Drop every cached result containing a supplier's offers. Called
    // when a source flips unhealthy so stale fares stop surfacing.
    pub fn invalidate_supplier(&self, supplier_code: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .offers
                    .iter()
                    .any(|offer| offer.supplier_code == supplier_code)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let count = keys.len();
        for key in keys {
            self.entries.remove(&key);
            self.stats.eviction_count.fetch_add(1, Ordering::SeqCst);
        }
        count
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.eviction_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.entries.len(),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            expired_count: self.stats.expired_count.load(Ordering::SeqCst),
            eviction_count: self.stats.eviction_count.load(Ordering::SeqCst),
            store_count: self.stats.store_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TripType;
    use crate::identity::offer_id;
    use crate::model::{
        Airline, Leg, Location, PassengerCounts, Price, Segment, SupplierPayload,
    };
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn criteria(origin: &str) -> SearchCriteria {
        SearchCriteria {
            origin: origin.to_string(),
            destination: "LHR".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2026, 9, 10).unwrap(),
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

    fn offer(supplier: &str, reference: &str) -> Offer {
        let airline = Airline {
            code: "BA".to_string(),
            name: "British Airways".to_string(),
            ..Default::default()
        };
        let segment = Segment {
            departure: Location {
                code: "BUD".to_string(),
                ..Default::default()
            },
            arrival: Location {
                code: "LHR".to_string(),
                ..Default::default()
            },
            airline: airline.clone(),
            operating_airline: None,
            flight_number: "BA869".to_string(),
            cabin: "Economy".to_string(),
            duration_minutes: 160,
            capacity: 5,
            luggage: None,
            booking_class: None,
            fare_basis: None,
        };
        Offer::new(
            offer_id(supplier, reference),
            supplier.to_string(),
            reference.to_string(),
            Price {
                total: 120.0,
                base_fare: 100.0,
                taxes: 20.0,
                currency: "EUR".to_string(),
                currency_symbol: "€".to_string(),
                decimal_places: 2,
                breakdown: HashMap::new(),
                guaranteed: false,
            },
            vec![Leg {
                departure: segment.departure.clone(),
                arrival: segment.arrival.clone(),
                duration_minutes: 160,
                stops: 0,
                cabin: "Economy".to_string(),
                segments: vec![segment],
            }],
            airline,
            false,
            None,
            PassengerCounts {
                adults: 1,
                children: 0,
                infants: 0,
            },
            SupplierPayload::Json(serde_json::json!({})),
        )
    }

    #[test]
    fn store_then_get_round_trips_within_ttl() {
        let cache = OfferCache::new(CacheConfig::default());
        let criteria = criteria("BUD");
        assert!(cache.get(&criteria).is_none());

        assert!(cache.store(&criteria, &[offer("gw", "R-1")]));
        let cached = cache.get(&criteria).unwrap();
        assert_eq!(cached.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn different_routes_do_not_share_entries() {
        let cache = OfferCache::new(CacheConfig::default());
        cache.store(&criteria("BUD"), &[offer("gw", "R-1")]);
        assert!(cache.get(&criteria("VIE")).is_none());
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = OfferCache::new(CacheConfig {
            max_entries: 16,
            default_ttl: Duration::from_millis(0),
        });
        let criteria = criteria("BUD");
        cache.store(&criteria, &[offer("gw", "R-1")]);
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(&criteria).is_none());
        assert_eq!(cache.stats().expired_count, 1);
        assert_eq!(cache.stats().items_count, 0);
    }

    #[test]
    fn offers_already_past_validity_are_not_stored() {
        let cache = OfferCache::new(CacheConfig::default());
        let criteria = criteria("BUD");
        let mut stale = offer("gw", "R-1");
        stale.valid_until = Some(Utc::now() - chrono::Duration::minutes(5));

        assert!(!cache.store(&criteria, &[stale]));
        assert!(cache.get(&criteria).is_none());
    }

    #[test]
    fn supplier_invalidation_removes_containing_entries() {
        let cache = OfferCache::new(CacheConfig::default());
        cache.store(&criteria("BUD"), &[offer("alpha", "R-1")]);
        cache.store(&criteria("VIE"), &[offer("bravo", "R-2")]);

        assert_eq!(cache.invalidate_supplier("alpha"), 1);
        assert!(cache.get(&criteria("BUD")).is_none());
        assert!(cache.get(&criteria("VIE")).is_some());
    }

    #[test]
    fn capacity_overflow_evicts_an_entry() {
        let cache = OfferCache::new(CacheConfig {
            max_entries: 2,
            default_ttl: Duration::from_secs(60),
        });
        cache.store(&criteria("BUD"), &[offer("gw", "R-1")]);
        cache.store(&criteria("VIE"), &[offer("gw", "R-2")]);
        cache.store(&criteria("PRG"), &[offer("gw", "R-3")]);

        assert_eq!(cache.stats().items_count, 2);
        assert_eq!(cache.stats().eviction_count, 1);
    }
}
