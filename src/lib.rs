// Main library file for the flight offer aggregation core

// Export modules for each part of the aggregation pipeline
pub mod cache;
pub mod driver;
pub mod identity;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod wire;

// Re-export key types for convenience
pub use cache::{CacheConfig, OfferCache};
pub use driver::{
    ConnectionProbe, DriverError, DriverFactory, HttpApiDriver, LocalInventoryDriver,
    SearchCriteria, SourceDriver, SourceError, StandardDriverFactory, TripType,
};
pub use identity::offer_id;
pub use model::{
    Airline, Leg, Location, Offer, PassengerCounts, Price, PriceComponent, Segment,
    SupplierPayload,
};
pub use orchestrator::{
    AggregationOptions, AggregationResult, OfferAggregator, OfferFilter, RetryPolicy,
    SourceReport, SourceStatus,
};
pub use registry::{InMemoryVault, SecretStore, SupplierConfig, SupplierRegistry};
pub use wire::{normalize_payload, NormalizeError, XmlAvailResponse};
