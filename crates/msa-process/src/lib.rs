use std::fmt;

use specta::Type;

/// Identifier of a managed server instance.
///
/// Doubles as the directory name under the server root, so it must stay
/// filesystem safe. Fresh ids are UUIDv4 strings.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize, Type,
)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl InstanceState {
    /// Derives the lifecycle state from the handle flags. Never stored.
    pub fn derive(attached: bool, starting: bool, stopping: bool) -> Self {
        match (attached, starting, stopping) {
            (false, _, _) => InstanceState::Stopped,
            (true, _, true) => InstanceState::Stopping,
            (true, true, false) => InstanceState::Starting,
            (true, false, false) => InstanceState::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the server listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct InstanceStatus {
    pub server_id: InstanceId,
    pub status: InstanceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl InstanceStatus {
    pub fn bare(server_id: InstanceId, status: InstanceState) -> Self {
        Self {
            server_id,
            status,
            address: None,
            online_mode: None,
            world_name: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_non_empty() {
        let id = InstanceId::new();
        assert!(!id.0.is_empty());
        assert_ne!(id, InstanceId::new());
    }

    #[test]
    fn state_is_derived_from_flags() {
        assert_eq!(InstanceState::derive(false, true, true), InstanceState::Stopped);
        assert_eq!(InstanceState::derive(true, true, false), InstanceState::Starting);
        assert_eq!(InstanceState::derive(true, false, false), InstanceState::Running);
        // A stop issued mid-boot wins over the pending start.
        assert_eq!(InstanceState::derive(true, true, true), InstanceState::Stopping);
    }

    #[test]
    fn status_serializes_lowercase_and_skips_empty_fields() {
        let st = InstanceStatus::bare(InstanceId("abc".to_string()), InstanceState::Stopped);
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["server_id"], "abc");
        assert_eq!(v["status"], "stopped");
        assert!(v.get("address").is_none());
        assert!(v.get("last_error").is_none());
    }
}
