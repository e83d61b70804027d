//! # crm-core: Domain Model for the CRM
//!
//! Types and rules behind the API service's routes and views. This crate
//! does no I/O.
//!
//! - [`records`]: rows of the six tables and their column enumerations.
//! - [`role`]: staff roles, permissions, and the static role matrix.
//! - [`area`]: the backoffice/portal gate decision.
//! - [`validation`]: create/edit forms and merge-patch updates.
//! - [`pipeline`]: the deal pipeline board and headline totals.
//! - [`avatar`]: avatar upload checks and data-URL encoding.

pub mod area;
pub mod avatar;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod role;
pub mod validation;

pub use area::{evaluate_gate, route_permission, Area, GateDecision, ProfileLookup};
pub use error::{ParseError, ValidationError};
pub use pipeline::{DealTotals, PipelineBoard};
pub use records::{
    Activity, ActivityType, Company, CompanyRef, CompanySize, Contact, ContactRef, ContactStatus,
    Currency, Deal, DealRef, DealStage, Profile, Record, RelatedToType, Table, Task, TaskPriority,
    TaskStatus, TaskType,
};
pub use role::{has_permission, role_permissions, Action, EntityKind, Permission, Role, UserType};
pub use validation::{
    merge_patch, parse_form, CompanyForm, ContactForm, DealForm, EntityForm, FormError, TaskForm,
    Validate,
};
