//! # Roles and Permissions
//!
//! Static role-to-permission table for staff accounts. Customers carry no
//! role and are kept out of the backoffice by the area gate, not by this
//! table.
//!
//! | Role        | Permissions |
//! |-------------|-------------|
//! | `admin`     | everything |
//! | `manager`   | everything except `settings.edit` and `users.manage` |
//! | `sales_rep` | contacts view/create/edit, companies view/create, deals view/create/edit, tasks view/create/edit, `reports.view` |
//! | `viewer`    | every `*.view` on entities, `reports.view` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ParseError;

// ── Role ────────────────────────────────────────────────────────────────────

/// Staff role stored on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    SalesRep,
    Viewer,
}

impl Role {
    /// All roles, most privileged first.
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::SalesRep, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::SalesRep => "sales_rep",
            Self::Viewer => "viewer",
        }
    }

    /// Display label used in settings screens.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Manager => "Manager",
            Self::SalesRep => "Sales Representative",
            Self::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Full access to all features and settings",
            Self::Manager => "Manage team, view reports, and edit all records",
            Self::SalesRep => "Create and manage own contacts, deals, and tasks",
            Self::Viewer => "Read-only access to contacts, deals, and reports",
        }
    }

    /// Permissions granted to this role, in declaration order.
    pub fn permissions(&self) -> Vec<Permission> {
        Permission::ALL
            .iter()
            .copied()
            .filter(|p| has_permission(*self, *p))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseError::new("role", s))
    }
}

// ── UserType ────────────────────────────────────────────────────────────────

/// Which area an account belongs to. Assigned once at sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Staff,
    Customer,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Customer => "customer",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Staff)
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" => Ok(Self::Staff),
            "customer" => Ok(Self::Customer),
            other => Err(ParseError::new("user type", other)),
        }
    }
}

// ── Permission ──────────────────────────────────────────────────────────────

/// A single capability checked by routes and the area gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Permission {
    #[serde(rename = "contacts.view")]
    ContactsView,
    #[serde(rename = "contacts.create")]
    ContactsCreate,
    #[serde(rename = "contacts.edit")]
    ContactsEdit,
    #[serde(rename = "contacts.delete")]
    ContactsDelete,
    #[serde(rename = "companies.view")]
    CompaniesView,
    #[serde(rename = "companies.create")]
    CompaniesCreate,
    #[serde(rename = "companies.edit")]
    CompaniesEdit,
    #[serde(rename = "companies.delete")]
    CompaniesDelete,
    #[serde(rename = "deals.view")]
    DealsView,
    #[serde(rename = "deals.create")]
    DealsCreate,
    #[serde(rename = "deals.edit")]
    DealsEdit,
    #[serde(rename = "deals.delete")]
    DealsDelete,
    #[serde(rename = "tasks.view")]
    TasksView,
    #[serde(rename = "tasks.create")]
    TasksCreate,
    #[serde(rename = "tasks.edit")]
    TasksEdit,
    #[serde(rename = "tasks.delete")]
    TasksDelete,
    #[serde(rename = "reports.view")]
    ReportsView,
    #[serde(rename = "settings.view")]
    SettingsView,
    #[serde(rename = "settings.edit")]
    SettingsEdit,
    #[serde(rename = "users.manage")]
    UsersManage,
}

impl Permission {
    pub const ALL: [Permission; 20] = [
        Permission::ContactsView,
        Permission::ContactsCreate,
        Permission::ContactsEdit,
        Permission::ContactsDelete,
        Permission::CompaniesView,
        Permission::CompaniesCreate,
        Permission::CompaniesEdit,
        Permission::CompaniesDelete,
        Permission::DealsView,
        Permission::DealsCreate,
        Permission::DealsEdit,
        Permission::DealsDelete,
        Permission::TasksView,
        Permission::TasksCreate,
        Permission::TasksEdit,
        Permission::TasksDelete,
        Permission::ReportsView,
        Permission::SettingsView,
        Permission::SettingsEdit,
        Permission::UsersManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactsView => "contacts.view",
            Self::ContactsCreate => "contacts.create",
            Self::ContactsEdit => "contacts.edit",
            Self::ContactsDelete => "contacts.delete",
            Self::CompaniesView => "companies.view",
            Self::CompaniesCreate => "companies.create",
            Self::CompaniesEdit => "companies.edit",
            Self::CompaniesDelete => "companies.delete",
            Self::DealsView => "deals.view",
            Self::DealsCreate => "deals.create",
            Self::DealsEdit => "deals.edit",
            Self::DealsDelete => "deals.delete",
            Self::TasksView => "tasks.view",
            Self::TasksCreate => "tasks.create",
            Self::TasksEdit => "tasks.edit",
            Self::TasksDelete => "tasks.delete",
            Self::ReportsView => "reports.view",
            Self::SettingsView => "settings.view",
            Self::SettingsEdit => "settings.edit",
            Self::UsersManage => "users.manage",
        }
    }

    /// The CRUD permission for an entity kind.
    pub fn for_entity(kind: EntityKind, action: Action) -> Permission {
        use Action::*;
        use EntityKind::*;
        match (kind, action) {
            (Contact, View) => Self::ContactsView,
            (Contact, Create) => Self::ContactsCreate,
            (Contact, Edit) => Self::ContactsEdit,
            (Contact, Delete) => Self::ContactsDelete,
            (Company, View) => Self::CompaniesView,
            (Company, Create) => Self::CompaniesCreate,
            (Company, Edit) => Self::CompaniesEdit,
            (Company, Delete) => Self::CompaniesDelete,
            (Deal, View) => Self::DealsView,
            (Deal, Create) => Self::DealsCreate,
            (Deal, Edit) => Self::DealsEdit,
            (Deal, Delete) => Self::DealsDelete,
            (Task, View) => Self::TasksView,
            (Task, Create) => Self::TasksCreate,
            (Task, Edit) => Self::TasksEdit,
            (Task, Delete) => Self::TasksDelete,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseError::new("permission", s))
    }
}

/// Entities with a full create/view/edit/delete permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Contact,
    Company,
    Deal,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
}

/// Whether `role` grants `permission`.
pub fn has_permission(role: Role, permission: Permission) -> bool {
    use Permission::*;
    match role {
        Role::Admin => true,
        Role::Manager => !matches!(permission, SettingsEdit | UsersManage),
        Role::SalesRep => matches!(
            permission,
            ContactsView
                | ContactsCreate
                | ContactsEdit
                | CompaniesView
                | CompaniesCreate
                | DealsView
                | DealsCreate
                | DealsEdit
                | TasksView
                | TasksCreate
                | TasksEdit
                | ReportsView
        ),
        Role::Viewer => matches!(
            permission,
            ContactsView | CompaniesView | DealsView | TasksView | ReportsView
        ),
    }
}

/// Permission strings granted to `role`.
pub fn role_permissions(role: Role) -> Vec<&'static str> {
    role.permissions().iter().map(Permission::as_str).collect()
}
