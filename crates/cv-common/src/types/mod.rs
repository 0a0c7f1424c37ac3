//! Common types used across ContentVault

use crate::error::CvError;
use serde::{Deserialize, Serialize};

// ============================================================================
// Content Types
// ============================================================================

/// Category of a captured platform object.
///
/// The integer codes are persisted in the store and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Dashboard,
    SavedQuery,
    Model,
    Explore,
    Folder,
    Collection,
    User,
    Group,
    Role,
    PermissionSet,
    ModelSet,
    ScheduledPlan,
}

/// A payload field holding the source identifier of another content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignReference {
    pub field: &'static str,
    pub target: ContentType,
}

const fn reference(field: &'static str, target: ContentType) -> ForeignReference {
    ForeignReference { field, target }
}

const DASHBOARD_REFS: &[ForeignReference] = &[
    reference("folder_id", ContentType::Folder),
    reference("model_id", ContentType::Model),
    reference("look_id", ContentType::SavedQuery),
    reference("user_id", ContentType::User),
];

const SAVED_QUERY_REFS: &[ForeignReference] = &[
    reference("folder_id", ContentType::Folder),
    reference("model_id", ContentType::Model),
    reference("user_id", ContentType::User),
];

const EXPLORE_REFS: &[ForeignReference] = &[reference("model_id", ContentType::Model)];

const FOLDER_REFS: &[ForeignReference] = &[
    reference("parent_id", ContentType::Folder),
    reference("creator_id", ContentType::User),
];

const COLLECTION_REFS: &[ForeignReference] = &[reference("folder_id", ContentType::Folder)];

const ROLE_REFS: &[ForeignReference] = &[
    reference("permission_set_id", ContentType::PermissionSet),
    reference("model_set_id", ContentType::ModelSet),
];

const SCHEDULED_PLAN_REFS: &[ForeignReference] = &[
    reference("dashboard_id", ContentType::Dashboard),
    reference("look_id", ContentType::SavedQuery),
    reference("user_id", ContentType::User),
];

impl ContentType {
    /// Every content type, in integer-code order
    pub const ALL: [ContentType; 12] = [
        ContentType::Dashboard,
        ContentType::SavedQuery,
        ContentType::Model,
        ContentType::Explore,
        ContentType::Folder,
        ContentType::Collection,
        ContentType::User,
        ContentType::Group,
        ContentType::Role,
        ContentType::PermissionSet,
        ContentType::ModelSet,
        ContentType::ScheduledPlan,
    ];

    /// Stable integer code used as the partition key in storage
    pub fn code(self) -> i64 {
        match self {
            ContentType::Dashboard => 1,
            ContentType::SavedQuery => 2,
            ContentType::Model => 3,
            ContentType::Explore => 4,
            ContentType::Folder => 5,
            ContentType::Collection => 6,
            ContentType::User => 7,
            ContentType::Group => 8,
            ContentType::Role => 9,
            ContentType::PermissionSet => 10,
            ContentType::ModelSet => 11,
            ContentType::ScheduledPlan => 12,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CvError> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| CvError::UnknownContentType(code.to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Dashboard => "dashboard",
            ContentType::SavedQuery => "saved_query",
            ContentType::Model => "model",
            ContentType::Explore => "explore",
            ContentType::Folder => "folder",
            ContentType::Collection => "collection",
            ContentType::User => "user",
            ContentType::Group => "group",
            ContentType::Role => "role",
            ContentType::PermissionSet => "permission_set",
            ContentType::ModelSet => "model_set",
            ContentType::ScheduledPlan => "scheduled_plan",
        }
    }

    /// Position in the restoration order. Referenced types replay before
    /// the types that reference them.
    pub fn restoration_rank(self) -> u8 {
        match self {
            ContentType::User => 0,
            ContentType::Group => 1,
            ContentType::PermissionSet => 2,
            ContentType::ModelSet => 3,
            ContentType::Role => 4,
            ContentType::Folder => 5,
            ContentType::Collection => 6,
            ContentType::Model => 7,
            ContentType::Explore => 8,
            ContentType::SavedQuery => 9,
            ContentType::Dashboard => 10,
            ContentType::ScheduledPlan => 11,
        }
    }

    /// All content types sorted into restoration order
    pub fn restoration_order() -> Vec<ContentType> {
        let mut order = Self::ALL.to_vec();
        order.sort_by_key(|t| t.restoration_rank());
        order
    }

    /// Payload fields that carry identifiers of other content items
    pub fn references(self) -> &'static [ForeignReference] {
        match self {
            ContentType::Dashboard => DASHBOARD_REFS,
            ContentType::SavedQuery => SAVED_QUERY_REFS,
            ContentType::Explore => EXPLORE_REFS,
            ContentType::Folder => FOLDER_REFS,
            ContentType::Collection => COLLECTION_REFS,
            ContentType::Role => ROLE_REFS,
            ContentType::ScheduledPlan => SCHEDULED_PLAN_REFS,
            ContentType::Model
            | ContentType::User
            | ContentType::Group
            | ContentType::PermissionSet
            | ContentType::ModelSet => &[],
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = CvError;

    /// Accepts the snake_case name, a kebab-case variant, or the integer code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        if let Ok(code) = normalized.parse::<i64>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CvError::UnknownContentType(s.to_string()))
    }
}

impl TryFrom<i64> for ContentType {
    type Error = CvError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Lifecycle of an extraction session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled => true,
            SessionStatus::Pending | SessionStatus::Running => false,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Running) => true,
            (SessionStatus::Pending, SessionStatus::Failed | SessionStatus::Cancelled) => true,
            (SessionStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(CvError::UnknownSessionStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = CvError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
