//! Path derivation for the storage sink (§4.1).
//!
//! A pure function of the event plus its effective symbol: no I/O, no
//! mutable state, so it can be unit tested without a filesystem.

use crate::config::{DatePartition, NamingPolicy};
use crate::event::MarketEvent;
use chrono::Datelike;
use std::path::PathBuf;

pub fn partition_path(
    data_root: &std::path::Path,
    policy: NamingPolicy,
    date_partition: DatePartition,
    event: &MarketEvent,
) -> PathBuf {
    let symbol = event.effective_symbol().as_str();
    let type_name = event.event_type();
    let source = event.source.as_str();

    let mut path = data_root.to_path_buf();
    match policy {
        NamingPolicy::Flat => {}
        NamingPolicy::BySymbol | NamingPolicy::Canonical => path.push(symbol),
        NamingPolicy::ByDate => path.push(event.timestamp.format("%Y-%m-%d").to_string()),
        NamingPolicy::ByType => path.push(type_name),
        NamingPolicy::BySource => path.push(source),
        NamingPolicy::ByAssetClass => path.push("unclassified"),
        NamingPolicy::Hierarchical => {
            path.push(source);
            path.push(symbol);
        }
    }
    if matches!(policy, NamingPolicy::Canonical) {
        path.push(type_name);
    }

    let file_stem = match date_partition {
        DatePartition::None => "events".to_string(),
        DatePartition::Daily => event.timestamp.format("%Y-%m-%d").to_string(),
        DatePartition::Hourly => event.timestamp.format("%Y-%m-%d-%H").to_string(),
        DatePartition::Monthly => format!(
            "{:04}-{:02}",
            event.timestamp.year(),
            event.timestamp.month()
        ),
    };
    path.push(format!("{file_stem}.jsonl"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Aggressor, EventPayload, TradePayload};
    use rust_decimal::Decimal;

    fn sample_event() -> MarketEvent {
        MarketEvent::new(
            "2024-01-02T14:30:00Z".parse().unwrap(),
            "SPY".into(),
            "alpaca".into(),
            1,
            EventPayload::Trade(TradePayload {
                price: Decimal::new(50012, 2),
                size: Decimal::new(100, 0),
                aggressor: Aggressor::Buy,
                trade_id: None,
                venue_mic: None,
                conditions: None,
            }),
        )
    }

    #[test]
    fn canonical_policy_matches_default_profile_layout() {
        let path = partition_path(
            std::path::Path::new("/data"),
            NamingPolicy::Canonical,
            DatePartition::Daily,
            &sample_event(),
        );
        assert_eq!(path, PathBuf::from("/data/SPY/trade/2024-01-02.jsonl"));
    }

    #[test]
    fn flat_policy_ignores_symbol_and_type() {
        let path = partition_path(
            std::path::Path::new("/data"),
            NamingPolicy::Flat,
            DatePartition::None,
            &sample_event(),
        );
        assert_eq!(path, PathBuf::from("/data/events.jsonl"));
    }
}
