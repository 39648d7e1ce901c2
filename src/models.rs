use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// --- Jobs ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "full_description")]
    pub description: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default)]
    pub posted_at: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub source: Option<String>, // company display name as the backend reports it

    // Client identity on the ATS side, used for navigation
    #[serde(default, alias = "clientName")]
    pub client_name: Option<String>,
    #[serde(default, alias = "urlSafeClientName")]
    pub url_safe_client_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, alias = "clientProject")]
    pub client_project: Option<String>,

    // At most one of these is populated
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub adp_requisition_id: Option<String>,
    #[serde(
        default,
        alias = "bamboohr_requisition_id",
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub bamboo_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub breezy_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub dover_requisition_id: Option<String>,
    #[serde(
        default,
        alias = "greenhouseio_requisition_id",
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub greenhouse_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub jobvite_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub lever_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub smartrecruiters_requisition_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub workday_requisition_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(rename = "isRemote", skip_serializing_if = "Option::is_none")]
    pub is_remote: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub data: Vec<Job>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "requisitionId", deserialize_with = "string_or_number")]
    pub requisition_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub ats_id: String,
    pub ats_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub ats_id: String,
    pub ats_type: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummariesResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<JobSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

// --- Users and sessions ---

pub const PREMIUM_ROLE: &str = "premium";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "isVerified", alias = "emailVerified", alias = "is_verified")]
    pub email_verified: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

impl User {
    pub fn is_premium(&self) -> bool {
        self.roles.iter().any(|r| r == PREMIUM_ROLE)
    }
}

/// Body of a successful magic-link verification, OAuth callback or token refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// `GET /api/auth/profile` answers either `{ "user": {...} }` or the bare user.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProfileResponse {
    Wrapped { user: User },
    Bare(User),
}

impl ProfileResponse {
    pub fn into_user(self) -> User {
        match self {
            ProfileResponse::Wrapped { user } | ProfileResponse::Bare(user) => user,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationUrlResponse {
    #[serde(alias = "authUrl", alias = "authorizationUrl", alias = "url")]
    pub auth_url: String,
}

// --- Subscriptions ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionState {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Other(String),
}

impl From<String> for SubscriptionState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            _ => Self::Other(raw),
        }
    }
}

impl From<SubscriptionState> for String {
    fn from(state: SubscriptionState) -> Self {
        state.as_str().to_string()
    }
}

impl SubscriptionState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionState,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub has_subscription: bool,
    #[serde(default)]
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalResponse {
    pub portal_url: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

// --- Job-application profiles ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub profile_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary_expectation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<ProfileSkill>,
    #[serde(default)]
    pub experience: Vec<ProfileExperience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSkill {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub skill_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileExperience {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub job_title: String,
    pub company_name: String,
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_current_job: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewJobProfile {
    pub profile_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_job_title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    pub job_profile_id: String,
    pub requisition_id: Option<String>,
    pub ats_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_answers: Option<Value>,
}

// --- Reference data ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountryOption {
    pub code: &'static str,
    pub label: &'static str,
}

// ISO 3166-1 alpha-2 country codes
pub const COUNTRIES: &[CountryOption] = &[
    CountryOption { code: "US", label: "United States of America" },
    CountryOption { code: "CA", label: "Canada" },
    CountryOption { code: "GB", label: "United Kingdom" },
    CountryOption { code: "AU", label: "Australia" },
    CountryOption { code: "DE", label: "Germany" },
    CountryOption { code: "FR", label: "France" },
    CountryOption { code: "ES", label: "Spain" },
    CountryOption { code: "IT", label: "Italy" },
    CountryOption { code: "JP", label: "Japan" },
    CountryOption { code: "IN", label: "India" },
    CountryOption { code: "BR", label: "Brazil" },
    CountryOption { code: "MX", label: "Mexico" },
    CountryOption { code: "NL", label: "Netherlands" },
    CountryOption { code: "SE", label: "Sweden" },
    CountryOption { code: "CH", label: "Switzerland" },
    CountryOption { code: "SG", label: "Singapore" },
    CountryOption { code: "AE", label: "United Arab Emirates" },
    CountryOption { code: "ZA", label: "South Africa" },
    CountryOption { code: "NZ", label: "New Zealand" },
    CountryOption { code: "IE", label: "Ireland" },
];

pub fn find_country(code: &str) -> Option<&'static CountryOption> {
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

// --- serde helpers ---

/// The backend mixes numeric and string identifiers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}
