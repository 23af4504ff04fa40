use arena_common::{PlatformId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Captured state: category name → category record.
///
/// Used both by snapshots and by the per-category progress archive, so every
/// transition path reads and writes the same format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapturedState(BTreeMap<String, Value>);

impl CapturedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, value: Value) {
        self.0.insert(category.into(), value);
    }

    pub fn get(&self, category: &str) -> Option<&Value> {
        self.0.get(category)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.0.contains_key(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 over the canonical JSON encoding. Map keys are sorted, so equal
    /// states hash equally.
    pub fn checksum(&self) -> String {
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

impl FromIterator<(String, Value)> for CapturedState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A durable record of a player's captured state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub platform_id: PlatformId,
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    /// Taken on arena entry (as opposed to a manual rollback point).
    pub is_arena: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: CapturedState,
    /// Checksum of `state` at capture time.
    pub checksum: String,
}

impl PlayerSnapshot {
    pub fn new(
        platform_id: PlatformId,
        id: SnapshotId,
        created_at: DateTime<Utc>,
        is_arena: bool,
        description: Option<String>,
        state: CapturedState,
    ) -> Self {
        let checksum = state.checksum();
        Self {
            platform_id,
            id,
            created_at,
            is_arena,
            description,
            state,
            checksum,
        }
    }

    /// Recompute the checksum and compare.
    pub fn verify(&self) -> bool {
        self.state.checksum() == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PlayerSnapshot {
        let state: CapturedState = [
            ("experience".to_string(), json!(1200.0)),
            ("name".to_string(), json!("Maja")),
        ]
        .into_iter()
        .collect();
        PlayerSnapshot::new(
            PlatformId(42),
            SnapshotId::from("20261018120000000-42"),
            Utc::now(),
            true,
            Some("arena entry".into()),
            state,
        )
    }

    #[test]
    fn snapshot_capture_and_verify() {
        let snap = sample();
        assert!(snap.verify());
        assert_eq!(snap.state.len(), 2);
    }

    #[test]
    fn snapshot_corruption_detected() {
        let mut snap = sample();
        snap.state.insert("experience", json!(999_999.0));
        assert!(!snap.verify());
    }

    #[test]
    fn checksum_is_order_independent() {
        let mut a = CapturedState::new();
        a.insert("b", json!(2));
        a.insert("a", json!(1));
        let mut b = CapturedState::new();
        b.insert("a", json!(1));
        b.insert("b", json!(2));
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn document_survives_json() {
        let snap = sample();
        let text = serde_json::to_string_pretty(&snap).unwrap();
        let back: PlayerSnapshot = serde_json::from_str(&text).unwrap();
        assert!(back.verify());
        assert_eq!(back.id, snap.id);
        assert_eq!(back.description.as_deref(), Some("arena entry"));
    }
}
