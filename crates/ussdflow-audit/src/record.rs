//! Audit log row for one completed USSD interaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of one menu interaction.
///
/// Created by the session engine, queued into the pipeline, never
/// mutated. `(session_id, msisdn, menu_name, created_at)` forms the
/// natural key that makes spill-file replay idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub msisdn: String,
    pub menu_name: String,
    /// Raw accumulated dialed string.
    pub params: String,
    /// The user's input on this round trip.
    pub user_input: String,
    pub succeeded: bool,
    pub status_message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let record = AuditRecord {
            session_id: "s1".to_string(),
            msisdn: "254700111222".to_string(),
            menu_name: "balance".to_string(),
            params: "1*2".to_string(),
            user_input: "2".to_string(),
            succeeded: true,
            status_message: String::new(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
