//! Venue normalization (§4.6): an injected mapper from provider-specific
//! venue strings to ISO 10383 MIC codes. Unknown values pass through as
//! `None` rather than guessing.

use crate::core_types::Mic;
use std::collections::HashMap;

pub trait VenueMapper: Send + Sync {
    fn to_mic(&self, raw_venue: &str) -> Option<Mic>;
}

/// A static lookup table, the common case for a single deployment's known
/// venue set.
#[derive(Default)]
pub struct PassthroughVenueMapper {
    table: HashMap<String, Mic>,
}

impl PassthroughVenueMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, raw_venue: impl Into<String>, mic: Mic) -> Self {
        self.table.insert(raw_venue.into(), mic);
        self
    }
}

impl VenueMapper for PassthroughVenueMapper {
    fn to_mic(&self, raw_venue: &str) -> Option<Mic> {
        self.table.get(raw_venue).cloned()
    }
}
