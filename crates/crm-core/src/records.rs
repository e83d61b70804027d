//! # Records
//!
//! Row types for the six CRM tables and the enumerations their columns use.
//! Optional columns use `#[serde(default)]` so rows from older schemas, or
//! rows selected with a narrower column list, still deserialize.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ParseError;
use crate::role::{Role, UserType};

// ── Tables ──────────────────────────────────────────────────────────────────

/// Backend tables owned by the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Companies,
    Contacts,
    Deals,
    Tasks,
    Activities,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Profiles,
        Table::Companies,
        Table::Contacts,
        Table::Deals,
        Table::Tasks,
        Table::Activities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Companies => "companies",
            Self::Contacts => "contacts",
            Self::Deals => "deals",
            Self::Tasks => "tasks",
            Self::Activities => "activities",
        }
    }

    /// Text columns matched by free-text search on list views.
    pub fn search_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Profiles => &["email", "full_name"],
            Self::Companies => &["name", "industry", "website"],
            Self::Contacts => &["first_name", "last_name", "email", "phone", "position"],
            Self::Deals => &["title", "description"],
            Self::Tasks => &["title", "description"],
            Self::Activities => &["title", "description"],
        }
    }

    /// Columns a list view may be ordered by.
    pub fn sort_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Profiles => &["created_at", "updated_at", "email", "full_name", "role"],
            Self::Companies => &["created_at", "updated_at", "name", "industry", "size"],
            Self::Contacts => &[
                "created_at",
                "updated_at",
                "first_name",
                "last_name",
                "email",
                "status",
            ],
            Self::Deals => &[
                "created_at",
                "updated_at",
                "title",
                "value",
                "stage",
                "probability",
                "expected_close_date",
            ],
            Self::Tasks => &[
                "created_at",
                "updated_at",
                "title",
                "due_date",
                "priority",
                "status",
            ],
            Self::Activities => &["created_at", "activity_type", "title"],
        }
    }

    /// Whether rows carry an `updated_at` column.
    pub fn has_updated_at(&self) -> bool {
        !matches!(self, Self::Activities)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::new("table", s))
    }
}

/// A typed row of a [`Table`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> Uuid;
}

// ── Column enumerations ─────────────────────────────────────────────────────

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseError::new($kind, other)),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of a contact. Defaults to `active`.
    ContactStatus, "contact status" {
        Active => "active",
        Inactive => "inactive",
        Lead => "lead",
    }
}

string_enum! {
    /// Pipeline stage of a deal, in board order. Defaults to `lead`.
    DealStage, "deal stage" {
        Lead => "lead",
        Qualified => "qualified",
        Proposal => "proposal",
        Negotiation => "negotiation",
        ClosedWon => "closed_won",
        ClosedLost => "closed_lost",
    }
}

string_enum! {
    TaskPriority, "task priority" {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    TaskStatus, "task status" {
        Todo => "todo",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    TaskType, "task type" {
        Call => "call",
        Email => "email",
        Meeting => "meeting",
        FollowUp => "follow_up",
        Other => "other",
    }
}

string_enum! {
    /// Target of a polymorphic `related_to_type`/`related_to_id` pair.
    RelatedToType, "related type" {
        Contact => "contact",
        Company => "company",
        Deal => "deal",
        Task => "task",
    }
}

string_enum! {
    ActivityType, "activity type" {
        Note => "note",
        Call => "call",
        Email => "email",
        Meeting => "meeting",
        StatusChange => "status_change",
    }
}

string_enum! {
    /// Head-count band of a company.
    CompanySize, "company size" {
        Micro => "1-10",
        Small => "11-50",
        Medium => "51-200",
        Large => "201-500",
        XLarge => "501-1000",
        Enterprise => "1000+",
    }
}

string_enum! {
    Currency, "currency" {
        Usd => "USD",
        Eur => "EUR",
        Gbp => "GBP",
    }
}

impl Default for ContactStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl Default for DealStage {
    fn default() -> Self {
        Self::Lead
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::Usd
    }
}

impl DealStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Qualified => "Qualified",
            Self::Proposal => "Proposal",
            Self::Negotiation => "Negotiation",
            Self::ClosedWon => "Closed Won",
            Self::ClosedLost => "Closed Lost",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost)
    }
}

impl ContactStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
            Self::Lead => "Lead",
        }
    }
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Open tasks still need work.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

// ── Row types ───────────────────────────────────────────────────────────────

/// Application-level account record, one per auth user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Effective account type. Profiles without a `user_type` are customers.
    pub fn kind(&self) -> UserType {
        self.user_type.unwrap_or(UserType::Customer)
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub size: Option<CompanySize>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Contact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default)]
    pub company_id: Option<Uuid>,
    /// Portal account linked to this contact, if any.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Deal {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub stage: DealStage,
    #[serde(default)]
    pub probability: Option<i32>,
    #[serde(default, with = "date_column")]
    #[schema(value_type = Option<String>, format = Date)]
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "date_column")]
    #[schema(value_type = Option<String>, format = Date)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub related_to_type: Option<RelatedToType>,
    #[serde(default)]
    pub related_to_id: Option<Uuid>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only log entry. Activities are never edited, so there is no
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Activity {
    pub id: Uuid,
    pub activity_type: ActivityType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub related_to_type: Option<RelatedToType>,
    #[serde(default)]
    pub related_to_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

macro_rules! impl_record {
    ($($ty:ty => $table:expr),+ $(,)?) => {
        $(
            impl Record for $ty {
                const TABLE: Table = $table;

                fn id(&self) -> Uuid {
                    self.id
                }
            }
        )+
    };
}

impl_record! {
    Profile => Table::Profiles,
    Company => Table::Companies,
    Contact => Table::Contacts,
    Deal => Table::Deals,
    Task => Table::Tasks,
    Activity => Table::Activities,
}

// ── Embedded references ─────────────────────────────────────────────────────

/// Company summary embedded in contact and deal listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CompanyRef {
    pub id: Uuid,
    pub name: String,
}

impl From<&Company> for CompanyRef {
    fn from(c: &Company) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
        }
    }
}

/// Contact summary embedded in deal and task listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContactRef {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

impl From<&Contact> for ContactRef {
    fn from(c: &Contact) -> Self {
        Self {
            id: c.id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DealRef {
    pub id: Uuid,
    pub title: String,
    pub stage: DealStage,
}

impl From<&Deal> for DealRef {
    fn from(d: &Deal) -> Self {
        Self {
            id: d.id,
            title: d.title.clone(),
            stage: d.stage,
        }
    }
}

/// Date columns accept either `YYYY-MM-DD` or a full timestamp, keeping
/// only the calendar date.
pub(crate) mod date_column {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => {
                let day = s.get(..10).unwrap_or(s);
                NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deal_defaults_apply_to_sparse_rows() {
        let deal: Deal = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "title": "Renewal",
            "created_at": "2024-03-01T10:00:00+00:00",
            "updated_at": "2024-03-01T10:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(deal.stage, DealStage::Lead);
        assert_eq!(deal.currency, Currency::Usd);
        assert_eq!(deal.value, 0.0);
        assert!(deal.expected_close_date.is_none());
    }

    #[test]
    fn date_column_accepts_timestamps() {
        let task: Task = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440001",
            "title": "Call back",
            "due_date": "2024-06-15T00:00:00+00:00",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            task.due_date,
            Some(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
        );
        let out = serde_json::to_value(&task).unwrap();
        assert_eq!(out["due_date"], "2024-06-15");
    }

    #[test]
    fn profile_without_user_type_is_customer() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440002",
            "email": "a@example.com",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(profile.kind(), UserType::Customer);
        assert_eq!(profile.display_name(), "a@example.com");
    }

    #[test]
    fn company_size_uses_band_strings() {
        assert_eq!(
            serde_json::to_string(&CompanySize::Enterprise).unwrap(),
            "\"1000+\""
        );
        assert_eq!("51-200".parse::<CompanySize>().unwrap(), CompanySize::Medium);
    }

    #[test]
    fn deal_stage_order_and_labels() {
        assert_eq!(DealStage::ALL.len(), 6);
        assert_eq!(DealStage::ALL[0], DealStage::Lead);
        assert_eq!(DealStage::ClosedWon.label(), "Closed Won");
        assert!(DealStage::ClosedLost.is_closed());
    }

    #[test]
    fn table_names() {
        assert_eq!("activities".parse::<Table>().unwrap(), Table::Activities);
        assert!(!Table::Activities.has_updated_at());
        assert!("users".parse::<Table>().is_err());
    }
}
