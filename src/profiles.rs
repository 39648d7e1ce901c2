use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::ats::JobSource;
use crate::client::ApiClient;
use crate::error::{ClientError, ErrorSlot};
use crate::models::{ApplicationRequest, JobProfile, NewJobProfile};

#[derive(Debug, Clone, Default)]
struct ProfilesState {
    profiles: Vec<JobProfile>,
    selected_id: Option<String>,
}

/// Job-application profiles of the signed-in user.
pub struct ProfilesStore {
    api: ApiClient,
    error: ErrorSlot,
    state: Mutex<ProfilesState>,
}

impl ProfilesStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            error: ErrorSlot::default(),
            state: Mutex::new(ProfilesState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProfilesState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    pub fn clear_error(&self) {
        self.error.clear();
    }

    pub fn profiles(&self) -> Vec<JobProfile> {
        self.lock().profiles.clone()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.lock().selected_id.clone()
    }

    pub fn selected_profile(&self) -> Option<JobProfile> {
        let state = self.lock();
        let id = state.selected_id.as_deref()?;
        state.profiles.iter().find(|p| p.id == id).cloned()
    }

    pub fn select_profile(&self, id: &str) {
        self.lock().selected_id = Some(id.to_string());
    }

    /// Free users get one profile; premium users any number.
    pub fn can_create_profile(&self, is_premium: bool) -> bool {
        is_premium || self.lock().profiles.is_empty()
    }

    pub fn reset(&self) {
        *self.lock() = ProfilesState::default();
        self.clear_error();
    }

    fn fail(&self, e: ClientError, fallback: &str) {
        error!(error = %e, "{}", fallback);
        self.error.set(e.user_message(fallback));
    }

    // --- CRUD ---

    /// Loads every profile and selects the first one if nothing is selected.
    pub async fn fetch_profiles(&self) -> bool {
        self.error.clear();
        let profiles: Vec<JobProfile> = match self.api.get("/api/job-profiles").await {
            Ok(profiles) => profiles,
            Err(e) => {
                self.fail(e, "Failed to load profiles. Please try again.");
                return false;
            }
        };

        let auto_select = {
            let mut state = self.lock();
            state.profiles = profiles;
            match (&state.selected_id, state.profiles.first()) {
                (None, Some(first)) => {
                    let id = first.id.clone();
                    state.selected_id = Some(id.clone());
                    Some(id)
                }
                _ => None,
            }
        };

        if let Some(id) = auto_select {
            self.fetch_profile(&id).await;
        }
        true
    }

    /// Fetches one profile and replaces (or appends) its cached copy.
    pub async fn fetch_profile(&self, id: &str) -> Option<JobProfile> {
        let result: Result<JobProfile, _> = self.api.get(&format!("/api/job-profiles/{}", id)).await;
        match result {
            Ok(profile) => {
                upsert(&mut self.lock().profiles, profile.clone());
                Some(profile)
            }
            Err(e) => {
                self.fail(e, "Failed to load profile. Please try again.");
                None
            }
        }
    }

    pub async fn create_profile(&self, new_profile: &NewJobProfile) -> Option<JobProfile> {
        self.error.clear();
        let result: Result<JobProfile, _> = self.api.post("/api/job-profiles", new_profile).await;
        match result {
            Ok(profile) => {
                info!(id = %profile.id, name = %profile.profile_name, "Profile created");
                let mut state = self.lock();
                state.selected_id = Some(profile.id.clone());
                state.profiles.push(profile.clone());
                Some(profile)
            }
            Err(e) => {
                self.fail(e, "Failed to create profile. Please try again.");
                None
            }
        }
    }

    /// Sends the cached profile with `updates` laid over it.
    pub async fn update_profile(&self, id: &str, updates: &Map<String, Value>) -> bool {
        self.error.clear();
        let Some(current) = self.lock().profiles.iter().find(|p| p.id == id).cloned() else {
            self.error.set("Profile not found");
            return false;
        };

        let merged = match merge_updates(&current, updates) {
            Ok(merged) => merged,
            Err(e) => {
                self.fail(e.into(), "Failed to save profile. Please try again.");
                return false;
            }
        };

        let result: Result<JobProfile, _> = self.api.put(&format!("/api/job-profiles/{}", id), &merged).await;
        match result {
            Ok(updated) => {
                upsert(&mut self.lock().profiles, updated);
                true
            }
            Err(e) => {
                self.fail(e, "Failed to save profile. Please try again.");
                false
            }
        }
    }

    /// Deleting the selected profile moves the selection to the first
    /// remaining one, or clears it.
    pub async fn delete_profile(&self, id: &str) -> bool {
        self.error.clear();
        if let Err(e) = self.api.delete::<Value>(&format!("/api/job-profiles/{}", id), None).await {
            self.fail(e, "Failed to delete profile. Please try again.");
            return false;
        }

        let mut state = self.lock();
        state.profiles.retain(|p| p.id != id);
        if state.selected_id.as_deref() == Some(id) {
            state.selected_id = state.profiles.first().map(|p| p.id.clone());
        }
        true
    }

    // --- Applications ---

    fn application(&self, source: Option<&JobSource>, answers: Option<Value>) -> Option<ApplicationRequest> {
        let Some(job_profile_id) = self.selected_id() else {
            self.error.set("No profile selected");
            return None;
        };
        Some(ApplicationRequest {
            job_profile_id,
            requisition_id: source.map(|s| s.requisition_id.clone()),
            ats_source: source.map(|s| s.source.key().to_string()),
            validation_answers: answers,
        })
    }

    /// Checks the selected profile against a job's application form. The
    /// backend answers with whatever questions still need answers.
    pub async fn validate(&self, source: Option<&JobSource>) -> Option<Value> {
        self.error.clear();
        let request = self.application(source, None)?;
        match self.api.post("/api/job-applications/validate", &request).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.fail(e, "Failed to validate profile");
                None
            }
        }
    }

    pub async fn submit(&self, source: Option<&JobSource>, answers: Value) -> Option<Value> {
        self.error.clear();
        let request = self.application(source, Some(answers))?;
        match self.api.post::<Value, _>("/api/job-applications/submit", &request).await {
            Ok(value) => {
                info!(profile = %request.job_profile_id, "Application submitted");
                Some(value)
            }
            Err(e) => {
                self.fail(e, "Failed to submit application");
                None
            }
        }
    }
}

fn upsert(profiles: &mut Vec<JobProfile>, profile: JobProfile) {
    match profiles.iter_mut().find(|p| p.id == profile.id) {
        Some(existing) => *existing = profile,
        None => profiles.push(profile),
    }
}

fn merge_updates(current: &JobProfile, updates: &Map<String, Value>) -> Result<Value, serde_json::Error> {
    let mut merged = serde_json::to_value(current)?;
    if let Value::Object(fields) = &mut merged {
        for (key, value) in updates {
            fields.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}
