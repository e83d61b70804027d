//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI document,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI document for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CRM API",
        version = "0.1.0",
        description = "Contacts, companies, deals, tasks, and activities for the staff backoffice and the customer portal, with role-based access control.",
        license(name = "MIT")
    ),
    paths(
        // Health
        crate::middleware::metrics::metrics_handler,
        // Session
        crate::routes::session::login,
        crate::routes::session::sign_up,
        crate::routes::session::logout,
        // Contacts
        crate::routes::contacts::list_contacts,
        crate::routes::contacts::create_contact,
        crate::routes::contacts::get_contact,
        crate::routes::contacts::update_contact,
        crate::routes::contacts::delete_contact,
        // Companies
        crate::routes::companies::list_companies,
        crate::routes::companies::create_company,
        crate::routes::companies::get_company,
        crate::routes::companies::update_company,
        crate::routes::companies::delete_company,
        // Deals
        crate::routes::deals::list_deals,
        crate::routes::deals::create_deal,
        crate::routes::deals::get_deal,
        crate::routes::deals::update_deal,
        crate::routes::deals::delete_deal,
        // Tasks
        crate::routes::tasks::list_tasks,
        crate::routes::tasks::create_task,
        crate::routes::tasks::get_task,
        crate::routes::tasks::update_task,
        crate::routes::tasks::delete_task,
        // Activities
        crate::routes::activities::list_activities,
        crate::routes::activities::create_activity,
        // Profile
        crate::routes::avatar::upload_avatar,
        // Users
        crate::routes::users::create_staff_user,
        crate::routes::users::update_user,
        crate::routes::users::update_role,
        crate::routes::users::delete_user,
        // Backoffice
        crate::routes::backoffice::dashboard,
        crate::routes::backoffice::pipeline,
        crate::routes::backoffice::activity_feed,
        crate::routes::backoffice::calendar,
        crate::routes::backoffice::reports,
        crate::routes::backoffice::search,
        crate::routes::backoffice::settings,
        crate::routes::backoffice::staff_directory,
        // Portal
        crate::routes::portal::overview,
        crate::routes::portal::deals,
        crate::routes::portal::profile,
        crate::routes::portal::send_message,
    ),
    components(schemas(
        // Records
        crm_core::Profile,
        crm_core::Company,
        crm_core::Contact,
        crm_core::Deal,
        crm_core::Task,
        crm_core::Activity,
        crm_core::CompanyRef,
        crm_core::ContactRef,
        crm_core::DealRef,
        // Column enumerations
        crm_core::Role,
        crm_core::UserType,
        crm_core::ContactStatus,
        crm_core::DealStage,
        crm_core::TaskPriority,
        crm_core::TaskStatus,
        crm_core::TaskType,
        crm_core::RelatedToType,
        crm_core::ActivityType,
        crm_core::CompanySize,
        crm_core::Currency,
        // Forms
        crm_core::CompanyForm,
        crm_core::ContactForm,
        crm_core::DealForm,
        crm_core::TaskForm,
        // Pipeline
        crm_core::PipelineBoard,
        crm_core::pipeline::StageColumn,
        crm_core::DealTotals,
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Shared DTOs
        crate::middleware::metrics::MetricsSnapshot,
        crate::routes::crud::DeleteResponse,
        crate::routes::crud::CreatorRef,
        // Session DTOs
        crate::routes::session::LoginRequest,
        crate::routes::session::SignUpForm,
        crate::routes::session::SessionInfo,
        crate::routes::session::LogoutResponse,
        // Entity views
        crate::routes::contacts::ContactView,
        crate::routes::companies::CompanyDetail,
        crate::routes::deals::DealView,
        crate::routes::tasks::TaskView,
        crate::routes::activities::ActivityView,
        crate::routes::activities::NewActivity,
        crate::routes::avatar::AvatarResponse,
        // User DTOs
        crate::routes::users::CreateStaffRequest,
        crate::routes::users::CreateStaffResponse,
        crate::routes::users::UpdateUserRequest,
        crate::routes::users::UpdateRoleRequest,
        // Backoffice views
        crate::routes::backoffice::Dashboard,
        crate::routes::backoffice::EntityCounts,
        crate::routes::backoffice::CalendarMonth,
        crate::routes::backoffice::CalendarDay,
        crate::routes::backoffice::Reports,
        crate::routes::backoffice::StageSummary,
        crate::routes::backoffice::Bucket,
        crate::routes::backoffice::SearchResults,
        crate::routes::backoffice::TaskHit,
        crate::routes::backoffice::Settings,
        crate::routes::backoffice::StaffDirectory,
        crate::routes::backoffice::StaffMember,
        crate::routes::backoffice::RoleOption,
        // Portal views
        crate::routes::portal::PortalOverview,
        crate::routes::portal::PortalProfile,
        crate::routes::portal::PortalMessage,
    )),
    tags(
        (name = "health", description = "Probes and request counters"),
        (name = "session", description = "Login, sign-up, logout"),
        (name = "contacts", description = "Contact records"),
        (name = "companies", description = "Company records"),
        (name = "deals", description = "Deals and pipeline stages"),
        (name = "tasks", description = "Tasks and due dates"),
        (name = "activities", description = "Activity log"),
        (name = "profile", description = "The caller's own profile"),
        (name = "users", description = "Staff account management"),
        (name = "backoffice", description = "Staff area views"),
        (name = "portal", description = "Customer area views"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
///
/// Serves the OpenAPI JSON document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
