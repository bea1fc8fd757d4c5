//! Writes each event to multiple backends; a secondary backend's failure is
//! logged, not propagated (§4.1: "a failure on one is reported but MUST NOT
//! halt the primary backend").

use super::Sink;
use crate::error::Result;
use crate::event::MarketEvent;

pub struct CompositeSink {
    primary: Box<dyn Sink>,
    secondary: Vec<Box<dyn Sink>>,
}

impl CompositeSink {
    pub fn new(primary: Box<dyn Sink>, secondary: Vec<Box<dyn Sink>>) -> Self {
        Self { primary, secondary }
    }
}

impl Sink for CompositeSink {
    fn append(&mut self, event: &MarketEvent) -> Result<()> {
        self.primary.append(event)?;
        for backend in &mut self.secondary {
            if let Err(err) = backend.append(event) {
                tracing::warn!(
                    target: "ingest",
                    error = %err,
                    symbol = %event.effective_symbol(),
                    "secondary sink append failed"
                );
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.primary.flush()?;
        for backend in &mut self.secondary {
            if let Err(err) = backend.flush() {
                tracing::warn!(target: "ingest", error = %err, "secondary sink flush failed");
            }
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.primary.dispose()?;
        for backend in &mut self.secondary {
            if let Err(err) = backend.dispose() {
                tracing::warn!(target: "ingest", error = %err, "secondary sink dispose failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, IntegrityKind, IntegrityPayload};

    struct FailingSink;
    impl Sink for FailingSink {
        fn append(&mut self, _event: &MarketEvent) -> Result<()> {
            Err(crate::error::CoreError::Durability("boom".into()))
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct CountingSink {
        count: usize,
    }
    impl Sink for CountingSink {
        fn append(&mut self, _event: &MarketEvent) -> Result<()> {
            self.count += 1;
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_event() -> MarketEvent {
        MarketEvent::new(
            "2024-01-02T14:30:00Z".parse().unwrap(),
            "SPY".into(),
            "alpaca".into(),
            1,
            EventPayload::Integrity(IntegrityPayload {
                kind: IntegrityKind::Reset,
                detail: "test".into(),
            }),
        )
    }

    #[test]
    fn secondary_failure_does_not_fail_append() {
        let mut sink = CompositeSink::new(Box::new(CountingSink { count: 0 }), vec![Box::new(FailingSink)]);
        assert!(sink.append(&sample_event()).is_ok());
    }

    #[test]
    fn primary_failure_propagates() {
        let mut sink = CompositeSink::new(Box::new(FailingSink), vec![]);
        assert!(sink.append(&sample_event()).is_err());
    }
}
