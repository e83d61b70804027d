//! # Form Validation
//!
//! Create/edit forms for companies, contacts, deals, and tasks. Each form
//! serializes to exactly the columns it writes, so a validated form can be
//! sent to the backend as-is. Fields missing from the request body take
//! their defaults, except a form's [`EntityForm::REQUIRED_KEYS`], which
//! must be present and non-null. Enumeration values outside the allowed
//! set fail deserialization before validation runs.
//!
//! Updates go through [`merge_patch`]: the stored row is projected back
//! into its form, the request's fields are laid over it, and the merged
//! form is validated as a whole.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::records::{
    Company, CompanySize, Contact, ContactStatus, Currency, Deal, DealStage, Record,
    RelatedToType, Task, TaskPriority, TaskStatus, TaskType,
};

/// Business-rule validation beyond what deserialization checks.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// A writable projection of a [`Record`].
pub trait EntityForm: Validate + Serialize + DeserializeOwned + Send + Sync {
    type Record: Record;

    /// `(field, label)` pairs the body must carry; they have no default.
    const REQUIRED_KEYS: &'static [(&'static str, &'static str)] = &[];

    /// Trim text and turn empty optional strings into `None`.
    fn normalize(&mut self);

    /// The form that would reproduce `record`'s current values.
    fn from_record(record: &Self::Record) -> Self;
}

/// Deserialize, normalize, and validate a create request.
pub fn parse_form<F: EntityForm>(body: serde_json::Value) -> Result<F, FormError> {
    if let Some(obj) = body.as_object() {
        if let Some(&(field, label)) = F::REQUIRED_KEYS
            .iter()
            .find(|(field, _)| obj.get(*field).map_or(true, serde_json::Value::is_null))
        {
            return Err(FormError::Invalid(ValidationError::Required { field, label }));
        }
    }
    let mut form: F = serde_json::from_value(body).map_err(FormError::Malformed)?;
    form.normalize();
    form.validate().map_err(FormError::Invalid)?;
    Ok(form)
}

/// Lay a partial JSON object over the form of `current` and validate the
/// result. Keys the form does not know are ignored; an explicit `null`
/// clears an optional field.
pub fn merge_patch<F: EntityForm>(
    current: &F::Record,
    patch: &serde_json::Value,
) -> Result<F, FormError> {
    let mut base = serde_json::to_value(F::from_record(current)).map_err(FormError::Malformed)?;
    let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) else {
        return Err(FormError::NotAnObject);
    };
    for (key, value) in patch_obj {
        if base_obj.contains_key(key) {
            base_obj.insert(key.clone(), value.clone());
        }
    }
    parse_form(base)
}

/// Failure turning a request body into a valid form.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// The body does not match the form's shape (wrong types, unknown
    /// enumeration values).
    #[error("{0}")]
    Malformed(serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Invalid(ValidationError),
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn required(value: &str, field: &'static str, label: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Required { field, label })
    } else {
        Ok(())
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn blank_to_none(value: &mut Option<String>) {
    if let Some(v) = value.as_mut() {
        trim_in_place(v);
    }
    if value.as_deref().is_some_and(str::is_empty) {
        *value = None;
    }
}

/// Structural email check: one `@`, a non-empty local part, a dotted
/// domain with no empty labels, no whitespace.
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Absolute http(s) URL with a host.
pub fn is_valid_web_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

// ── Company ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CompanyForm {
    pub name: String,
    /// Empty or an absolute http(s) URL.
    pub website: Option<String>,
    pub industry: Option<String>,
    pub size: Option<CompanySize>,
    pub description: Option<String>,
}

impl Validate for CompanyForm {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.name, "name", "Company name")?;
        if let Some(site) = &self.website {
            if !is_valid_web_url(site) {
                return Err(ValidationError::InvalidUrl {
                    field: "website",
                    value: site.clone(),
                });
            }
        }
        Ok(())
    }
}

impl EntityForm for CompanyForm {
    type Record = Company;

    fn normalize(&mut self) {
        trim_in_place(&mut self.name);
        blank_to_none(&mut self.website);
        blank_to_none(&mut self.industry);
        blank_to_none(&mut self.description);
    }

    fn from_record(c: &Company) -> Self {
        Self {
            name: c.name.clone(),
            website: c.website.clone(),
            industry: c.industry.clone(),
            size: c.size,
            description: c.description.clone(),
        }
    }
}

// ── Contact ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ContactForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub company_id: Option<Uuid>,
    pub status: ContactStatus,
}

impl Validate for ContactForm {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.first_name, "first_name", "First name")?;
        required(&self.last_name, "last_name", "Last name")?;
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail {
                field: "email",
                value: self.email.clone(),
            });
        }
        Ok(())
    }
}

impl EntityForm for ContactForm {
    type Record = Contact;

    fn normalize(&mut self) {
        trim_in_place(&mut self.first_name);
        trim_in_place(&mut self.last_name);
        trim_in_place(&mut self.email);
        blank_to_none(&mut self.phone);
        blank_to_none(&mut self.position);
    }

    fn from_record(c: &Contact) -> Self {
        Self {
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
            position: c.position.clone(),
            company_id: c.company_id,
            status: c.status,
        }
    }
}

// ── Deal ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DealForm {
    pub title: String,
    pub value: f64,
    /// One of `USD`, `EUR`, `GBP`.
    pub currency: String,
    pub stage: DealStage,
    /// Win likelihood in percent, 0 to 100.
    pub probability: Option<i32>,
    #[serde(with = "crate::records::date_column")]
    #[schema(value_type = Option<String>, format = Date)]
    pub expected_close_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

impl Default for DealForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            value: 0.0,
            currency: Currency::default().as_str().to_string(),
            stage: DealStage::default(),
            probability: None,
            expected_close_date: None,
            description: None,
            company_id: None,
            contact_id: None,
            owner_id: None,
        }
    }
}

impl Validate for DealForm {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.title, "title", "Deal title")?;
        if !self.value.is_finite() {
            return Err(ValidationError::NotFinite { field: "value" });
        }
        if self.value < 0.0 {
            return Err(ValidationError::Negative { field: "value" });
        }
        if self.currency.parse::<Currency>().is_err() {
            return Err(ValidationError::UnsupportedCurrency(self.currency.clone()));
        }
        if let Some(p) = self.probability {
            if !(0..=100).contains(&p) {
                return Err(ValidationError::OutOfRange {
                    field: "probability",
                    min: 0,
                    max: 100,
                });
            }
        }
        Ok(())
    }
}

impl EntityForm for DealForm {
    type Record = Deal;

    const REQUIRED_KEYS: &'static [(&'static str, &'static str)] = &[("value", "Deal value")];

    fn normalize(&mut self) {
        trim_in_place(&mut self.title);
        trim_in_place(&mut self.currency);
        if self.currency.is_empty() {
            self.currency = Currency::default().as_str().to_string();
        }
        blank_to_none(&mut self.description);
    }

    fn from_record(d: &Deal) -> Self {
        Self {
            title: d.title.clone(),
            value: d.value,
            currency: d.currency.as_str().to_string(),
            stage: d.stage,
            probability: d.probability,
            expected_close_date: d.expected_close_date,
            description: d.description.clone(),
            company_id: d.company_id,
            contact_id: d.contact_id,
            owner_id: d.owner_id,
        }
    }
}

// ── Task ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TaskForm {
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "crate::records::date_column")]
    #[schema(value_type = Option<String>, format = Date)]
    pub due_date: Option<NaiveDate>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub task_type: Option<TaskType>,
    /// `contact`, `company`, or `deal`.
    pub related_to_type: Option<RelatedToType>,
    pub related_to_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
}

impl Validate for TaskForm {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.title, "title", "Task title")?;
        if self.related_to_type == Some(RelatedToType::Task) {
            return Err(ValidationError::NotAllowed {
                field: "related_to_type",
                value: RelatedToType::Task.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl EntityForm for TaskForm {
    type Record = Task;

    fn normalize(&mut self) {
        trim_in_place(&mut self.title);
        blank_to_none(&mut self.description);
    }

    fn from_record(t: &Task) -> Self {
        Self {
            title: t.title.clone(),
            description: t.description.clone(),
            due_date: t.due_date,
            priority: t.priority,
            status: t.status,
            task_type: t.task_type,
            related_to_type: t.related_to_type,
            related_to_id: t.related_to_id,
            assigned_to: t.assigned_to,
        }
    }
}
