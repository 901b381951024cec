//! Status conditions shared by package-operator resources.
//!
//! Conditions hold at most one entry per condition type; setting a condition
//! replaces the previous one of the same type in place. On the wire they are
//! a plain list, as Kubernetes tooling expects.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Condition type tracking whether the package is installed.
pub const CONDITION_READY: &str = "Ready";

/// Condition type tracking the outcome of the last reconciliation.
pub const CONDITION_SYNCED: &str = "Synced";

/// Reason for `Ready=False` while the installation is in progress.
pub const REASON_CREATING: &str = "Creating";

/// Reason for `Ready=True` once the package is installed.
pub const REASON_AVAILABLE: &str = "Available";

/// Reason for `Synced=True`.
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// Reason for `Synced=False`.
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

/// Condition describes the state of a resource at a certain point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    #[serde(default)]
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
        }
    }

    /// `Ready=False` with reason `Creating`: the installation is in progress.
    pub fn creating() -> Self {
        Self::new(CONDITION_READY, false, REASON_CREATING, "")
    }

    /// `Ready=True` with reason `Available`: the package is installed.
    pub fn available() -> Self {
        Self::new(CONDITION_READY, true, REASON_AVAILABLE, "")
    }

    /// `Synced=True`: the last reconciliation succeeded.
    pub fn reconcile_success() -> Self {
        Self::new(CONDITION_SYNCED, true, REASON_RECONCILE_SUCCESS, "")
    }

    /// `Synced=False`: the last reconciliation failed with the given message.
    pub fn reconcile_error(message: impl AsRef<str>) -> Self {
        Self::new(
            CONDITION_SYNCED,
            false,
            REASON_RECONCILE_ERROR,
            message.as_ref(),
        )
    }

    /// True if both conditions describe the same state, ignoring the timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Ordered set of conditions with at most one entry per type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Create an empty condition set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a condition, replacing any condition of the same type.
    ///
    /// A replacement keeps the position of the first occurrence. When the new
    /// condition describes the same state as the existing one, the existing
    /// entry (and its transition time) is kept. Returns true if anything changed.
    pub fn set(&mut self, condition: Condition) -> bool {
        match self.0.iter_mut().find(|c| c.r#type == condition.r#type) {
            Some(existing) if existing.same_state(&condition) => false,
            Some(existing) => {
                *existing = condition;
                true
            }
            None => {
                self.0.push(condition);
                true
            }
        }
    }

    /// Set several conditions in order. Returns true if any of them changed.
    pub fn set_all(&mut self, conditions: impl IntoIterator<Item = Condition>) -> bool {
        conditions
            .into_iter()
            .fold(false, |changed, c| self.set(c) || changed)
    }

    /// Get the condition of the given type.
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.r#type == condition_type)
    }

    /// Check if the condition of the given type has status "True".
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.get(condition_type).is_some_and(|c| c.status == "True")
    }

    /// Get the reason of the condition of the given type.
    pub fn reason(&self, condition_type: &str) -> Option<&str> {
        self.get(condition_type).map(|c| c.reason.as_str())
    }

    /// Iterate over conditions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Condition> for Conditions {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut conditions = Conditions::new();
        for condition in iter {
            // Duplicates in a stored list: the later entry wins outright.
            match conditions.0.iter_mut().find(|c| c.r#type == condition.r#type) {
                Some(existing) => *existing = condition,
                None => conditions.0.push(condition),
            }
        }
        conditions
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.0)
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Option::<Vec<Condition>>::deserialize(deserializer)?;
        Ok(list.unwrap_or_default().into_iter().collect())
    }
}
