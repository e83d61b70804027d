//! # Area Gate
//!
//! Decides, for a request path and the caller's profile lookup, whether the
//! request may proceed into the backoffice or the portal. The decision is
//! pure; fetching the session and the profile is the caller's job.
//!
//! ## Rules
//!
//! 1. Paths outside `/backoffice` and `/portal` are not gated.
//! 2. No session: send to `/auth/login?redirectTo=<path>`.
//! 3. Profile lookup errors (missing column, policy recursion, anything
//!    else) let the request through. The degraded reason is reported so the
//!    caller can log it.
//! 4. No profile, or no `user_type`: the caller is a customer.
//! 5. Customers are always sent from `/backoffice` to `/portal`.
//! 6. Staff are sent from `/portal` to `/backoffice` only when user-type
//!    separation is enabled.
//! 7. Staff inside the backoffice need the permission mapped to the route,
//!    longest prefix first. Staff without a role hold no permissions.

use serde::Serialize;

use crate::role::{has_permission, Permission, Role, UserType};

/// Gated area of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Backoffice,
    Portal,
}

impl Area {
    /// The gated area `path` falls in, if any.
    pub fn of_path(path: &str) -> Option<Area> {
        if has_segment_prefix(path, "/backoffice") {
            Some(Area::Backoffice)
        } else if has_segment_prefix(path, "/portal") {
            Some(Area::Portal)
        } else {
            None
        }
    }

    pub fn home(&self) -> &'static str {
        match self {
            Self::Backoffice => "/backoffice",
            Self::Portal => "/portal",
        }
    }

    /// Area an account of this type belongs in.
    pub fn for_user_type(user_type: UserType) -> Area {
        match user_type {
            UserType::Staff => Area::Backoffice,
            UserType::Customer => Area::Portal,
        }
    }
}

impl UserType {
    /// Whether this account type may enter `area` at all. Staff may browse
    /// the portal unless separation is enforced by the gate.
    pub fn can_access(&self, area: Area) -> bool {
        match (self, area) {
            (UserType::Staff, _) => true,
            (UserType::Customer, Area::Portal) => true,
            (UserType::Customer, Area::Backoffice) => false,
        }
    }
}

/// Backoffice route prefixes and the permission each requires. Longer
/// prefixes must come first.
const ROUTE_PERMISSIONS: &[(&str, Permission)] = &[
    ("/backoffice/settings/users", Permission::UsersManage),
    ("/backoffice/settings", Permission::SettingsView),
    ("/backoffice/contacts", Permission::ContactsView),
    ("/backoffice/companies", Permission::CompaniesView),
    ("/backoffice/deals", Permission::DealsView),
    ("/backoffice/tasks", Permission::TasksView),
    ("/backoffice/calendar", Permission::TasksView),
    ("/backoffice/reports", Permission::ReportsView),
];

/// Permission required to open a backoffice route, if the route is
/// restricted.
pub fn route_permission(path: &str) -> Option<Permission> {
    ROUTE_PERMISSIONS
        .iter()
        .find(|(prefix, _)| has_segment_prefix(path, prefix))
        .map(|(_, permission)| *permission)
}

/// `path` equals `prefix` or continues it with a new segment.
fn has_segment_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Outcome of reading `user_type` and `role` for the session's user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    Found {
        user_type: Option<UserType>,
        role: Option<Role>,
    },
    /// No profile row for the user.
    Missing,
    /// The `user_type` column does not exist yet.
    MigrationPending,
    /// Row-level security policy recursed while evaluating the query.
    PolicyRecursion,
    Failed(String),
}

/// What the gate does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Let the request through without a trustworthy profile.
    AllowDegraded { reason: String },
    /// No session; log in and come back to `return_to`.
    Login { return_to: String },
    Redirect { location: &'static str },
    Forbidden { permission: Permission },
}

/// Evaluate the gate for `path`. `lookup` is `None` when there is no
/// authenticated user.
pub fn evaluate_gate(
    path: &str,
    lookup: Option<&ProfileLookup>,
    separation_enabled: bool,
) -> GateDecision {
    let Some(area) = Area::of_path(path) else {
        return GateDecision::Allow;
    };
    let Some(lookup) = lookup else {
        return GateDecision::Login {
            return_to: path.to_string(),
        };
    };

    let (user_type, role) = match lookup {
        ProfileLookup::Found { user_type, role } => {
            (user_type.unwrap_or(UserType::Customer), *role)
        }
        ProfileLookup::Missing => (UserType::Customer, None),
        ProfileLookup::MigrationPending => {
            return GateDecision::AllowDegraded {
                reason: "user_type column missing, migration not yet applied".into(),
            }
        }
        ProfileLookup::PolicyRecursion => {
            return GateDecision::AllowDegraded {
                reason: "row-level security policy recursion".into(),
            }
        }
        ProfileLookup::Failed(msg) => {
            return GateDecision::AllowDegraded {
                reason: format!("profile lookup failed: {msg}"),
            }
        }
    };

    match (area, user_type) {
        (Area::Backoffice, UserType::Customer) => GateDecision::Redirect {
            location: Area::Portal.home(),
        },
        (Area::Portal, UserType::Staff) if separation_enabled => GateDecision::Redirect {
            location: Area::Backoffice.home(),
        },
        (Area::Portal, _) => GateDecision::Allow,
        (Area::Backoffice, UserType::Staff) => match route_permission(path) {
            Some(permission) if !role.is_some_and(|r| has_permission(r, permission)) => {
                GateDecision::Forbidden { permission }
            }
            _ => GateDecision::Allow,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(role: Role) -> ProfileLookup {
        ProfileLookup::Found {
            user_type: Some(UserType::Staff),
            role: Some(role),
        }
    }

    fn customer() -> ProfileLookup {
        ProfileLookup::Found {
            user_type: Some(UserType::Customer),
            role: None,
        }
    }

    // ── Area detection ───────────────────────────────────────────────

    #[test]
    fn area_of_path_respects_segments() {
        assert_eq!(Area::of_path("/backoffice"), Some(Area::Backoffice));
        assert_eq!(Area::of_path("/backoffice/deals/1"), Some(Area::Backoffice));
        assert_eq!(Area::of_path("/portal/profile"), Some(Area::Portal));
        assert_eq!(Area::of_path("/portals"), None);
        assert_eq!(Area::of_path("/api/contacts"), None);
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(
            route_permission("/backoffice/settings/users"),
            Some(Permission::UsersManage)
        );
        assert_eq!(
            route_permission("/backoffice/settings"),
            Some(Permission::SettingsView)
        );
        assert_eq!(
            route_permission("/backoffice/calendar"),
            Some(Permission::TasksView)
        );
        assert_eq!(route_permission("/backoffice"), None);
        assert_eq!(route_permission("/backoffice/activities"), None);
    }

    // ── Decisions ────────────────────────────────────────────────────

    #[test]
    fn ungated_paths_pass() {
        assert_eq!(evaluate_gate("/health/liveness", None, true), GateDecision::Allow);
    }

    #[test]
    fn unauthenticated_goes_to_login_with_return_path() {
        assert_eq!(
            evaluate_gate("/backoffice/deals", None, false),
            GateDecision::Login {
                return_to: "/backoffice/deals".into()
            }
        );
    }

    #[test]
    fn customer_redirected_from_backoffice_regardless_of_flag() {
        for flag in [true, false] {
            assert_eq!(
                evaluate_gate("/backoffice/contacts", Some(&customer()), flag),
                GateDecision::Redirect {
                    location: "/portal"
                }
            );
        }
    }

    #[test]
    fn missing_profile_counts_as_customer() {
        assert_eq!(
            evaluate_gate("/backoffice", Some(&ProfileLookup::Missing), false),
            GateDecision::Redirect {
                location: "/portal"
            }
        );
        let null_type = ProfileLookup::Found {
            user_type: None,
            role: Some(Role::Admin),
        };
        assert_eq!(
            evaluate_gate("/portal", Some(&null_type), true),
            GateDecision::Allow
        );
    }

    #[test]
    fn staff_on_portal_only_redirected_with_separation() {
        let admin = staff(Role::Admin);
        assert_eq!(evaluate_gate("/portal", Some(&admin), false), GateDecision::Allow);
        assert_eq!(
            evaluate_gate("/portal", Some(&admin), true),
            GateDecision::Redirect {
                location: "/backoffice"
            }
        );
    }

    #[test]
    fn lookup_errors_fail_open() {
        for lookup in [
            ProfileLookup::MigrationPending,
            ProfileLookup::PolicyRecursion,
            ProfileLookup::Failed("timeout".into()),
        ] {
            assert!(matches!(
                evaluate_gate("/backoffice/settings/users", Some(&lookup), true),
                GateDecision::AllowDegraded { .. }
            ));
        }
    }

    #[test]
    fn viewer_forbidden_from_user_management() {
        assert_eq!(
            evaluate_gate("/backoffice/settings/users", Some(&staff(Role::Viewer)), false),
            GateDecision::Forbidden {
                permission: Permission::UsersManage
            }
        );
        assert_eq!(
            evaluate_gate("/backoffice/deals", Some(&staff(Role::Viewer)), false),
            GateDecision::Allow
        );
    }

    #[test]
    fn staff_without_role_only_reaches_unrestricted_routes() {
        let roleless = ProfileLookup::Found {
            user_type: Some(UserType::Staff),
            role: None,
        };
        assert_eq!(evaluate_gate("/backoffice", Some(&roleless), false), GateDecision::Allow);
        assert_eq!(
            evaluate_gate("/backoffice/contacts", Some(&roleless), false),
            GateDecision::Forbidden {
                permission: Permission::ContactsView
            }
        );
    }

    #[test]
    fn user_type_area_access() {
        assert!(UserType::Staff.can_access(Area::Portal));
        assert!(!UserType::Customer.can_access(Area::Backoffice));
        assert_eq!(Area::for_user_type(UserType::Customer), Area::Portal);
    }
}
