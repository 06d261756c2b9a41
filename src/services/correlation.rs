use uuid::Uuid;

use crate::models::job::JobId;

/// Mints correlation ids for new jobs.
pub trait CorrelationIdGenerator: Send + Sync + 'static {
    fn new_id(&self) -> JobId;
}

/// Random 128-bit UUID v4 ids. No coordination with any backend is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl CorrelationIdGenerator for UuidGenerator {
    fn new_id(&self) -> JobId {
        JobId::new(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_uuids() {
        let generator = UuidGenerator;
        let ids: HashSet<JobId> = (0..1000).map(|_| generator.new_id()).collect();
        assert_eq!(ids.len(), 1000);

        let sample = generator.new_id();
        assert!(Uuid::parse_str(sample.as_str()).is_ok());
    }
}
