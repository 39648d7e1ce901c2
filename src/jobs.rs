use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::ats::resolve_source;
use crate::client::ApiClient;
use crate::error::{ClientError, ErrorSlot};
use crate::models::{
    Bookmark, DataEnvelope, Job, JobSummary, SearchParams, SearchResponse, SummariesResponse, SummaryRequest,
};

pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// One distinct location on the current results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFacet {
    pub location: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct SearchState {
    pub params: SearchParams,
    pub jobs: Vec<Job>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub total_pages: u64,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            params: SearchParams::default(),
            jobs: Vec::new(),
            total: 0,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            total_pages: 1,
        }
    }
}

impl SearchState {
    pub fn current_page(&self) -> u64 {
        if self.limit == 0 { 1 } else { self.offset / self.limit + 1 }
    }
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    if limit == 0 { 1 } else { total / limit + 1 }
}

/// Job search, detail, saved jobs, bookmarks and summaries.
pub struct JobsStore {
    api: ApiClient,
    error: ErrorSlot,
    state: Mutex<SearchState>,
}

impl JobsStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            error: ErrorSlot::default(),
            state: Mutex::new(SearchState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    pub fn state(&self) -> SearchState {
        self.lock().clone()
    }

    // --- Search ---

    /// Runs the search. Without a query nothing happens and the previous
    /// results stay in place.
    pub async fn search(&self, mut params: SearchParams) -> bool {
        if params.q.as_deref().is_none_or(|q| q.trim().is_empty()) {
            return false;
        }
        if params.country.is_none() {
            params.country = Some(DEFAULT_COUNTRY.to_string());
        }
        // offset 0 is the server default
        if params.offset == Some(0) {
            params.offset = None;
        }

        self.error.clear();
        let result: Result<SearchResponse, _> = self.api.get_query("/api/requisitions/search", &params).await;
        match result {
            Ok(page) => {
                info!(total = page.total, returned = page.data.len(), "Search complete");
                let mut state = self.lock();
                state.total_pages = total_pages(page.total, page.limit);
                state.params = params;
                state.jobs = page.data;
                state.total = page.total;
                state.limit = page.limit;
                state.offset = page.offset;
                true
            }
            Err(e) => {
                error!(error = %e, "Search failed");
                self.error.set("Failed to fetch jobs. Please try again.");
                false
            }
        }
    }

    /// Distinct locations on the current page with how often each occurs,
    /// in first-seen order.
    pub fn locations(&self) -> Vec<LocationFacet> {
        let state = self.lock();
        let mut facets: Vec<LocationFacet> = Vec::new();
        for job in &state.jobs {
            let location = job.location.clone().unwrap_or_default();
            match facets.iter_mut().find(|f| f.location == location) {
                Some(facet) => facet.count += 1,
                None => facets.push(LocationFacet { location, count: 1 }),
            }
        }
        facets
    }

    pub async fn fetch_job(&self, id: &str) -> Option<Job> {
        if id.trim().is_empty() {
            return None;
        }
        self.error.clear();
        let result: Result<DataEnvelope<Job>, _> = self.api.get(&format!("/api/requisitions/{}", id)).await;
        match result {
            Ok(envelope) => Some(envelope.data),
            Err(ClientError::NotFound(_)) => {
                self.error.set("Job not found");
                None
            }
            Err(e) => {
                error!(id, error = %e, "Failed to fetch job");
                self.error.set("Failed to fetch job details. Please try again.");
                None
            }
        }
    }

    pub async fn statistics(&self) -> Option<Value> {
        self.error.clear();
        match self.api.get::<Value>("/api/requisitions/statistics").await {
            Ok(stats) => Some(stats.get("data").cloned().unwrap_or(stats)),
            Err(e) => {
                error!(error = %e, "Failed to fetch statistics");
                self.error.set(e.user_message("Failed to fetch statistics. Please try again."));
                None
            }
        }
    }

    // --- Saved jobs (local) ---

    pub fn saved_job_ids(&self) -> Vec<String> {
        self.api.session().saved_job_ids()
    }

    pub fn is_saved(&self, id: &str) -> bool {
        self.saved_job_ids().iter().any(|s| s == id)
    }

    /// Returns whether the job is saved after the toggle.
    pub fn toggle_saved(&self, id: &str) -> bool {
        let mut ids = self.saved_job_ids();
        let saved = match ids.iter().position(|s| s == id) {
            Some(index) => {
                ids.remove(index);
                false
            }
            None => {
                ids.push(id.to_string());
                true
            }
        };
        self.api.session().set_saved_job_ids(&ids);
        saved
    }

    /// Saved jobs present on the current results page.
    pub fn saved_jobs_on_page(&self) -> Vec<Job> {
        let saved = self.saved_job_ids();
        self.lock()
            .jobs
            .iter()
            .filter(|job| saved.contains(&job.id))
            .cloned()
            .collect()
    }

    // --- Bookmarks (remote) ---

    pub async fn bookmarks(&self) -> Option<Vec<Bookmark>> {
        self.error.clear();
        let result: Result<DataEnvelope<Vec<Bookmark>>, _> = self.api.get("/api/bookmarks").await;
        match result {
            Ok(envelope) => Some(envelope.data),
            Err(e) => {
                error!(error = %e, "Failed to load bookmarks");
                self.error.set(e.user_message("Failed to load bookmarks. Please try again."));
                None
            }
        }
    }

    pub async fn add_bookmark(&self, requisition_id: &str) -> bool {
        self.error.clear();
        let result: Result<Value, _> = self
            .api
            .post("/api/bookmarks", &json!({ "requisitionId": requisition_id }))
            .await;
        self.settle(result.map(|_| ()), "Failed to bookmark job. Please try again.")
    }

    pub async fn remove_bookmark(&self, requisition_id: &str) -> bool {
        self.error.clear();
        let result = self
            .api
            .delete("/api/bookmarks", Some(&json!({ "requisitionId": requisition_id })))
            .await;
        self.settle(result, "Failed to remove bookmark. Please try again.")
    }

    pub async fn clear_bookmarks(&self) -> bool {
        self.error.clear();
        let result = self.api.delete::<Value>("/api/bookmarks/clear", None).await;
        self.settle(result, "Failed to clear bookmarks. Please try again.")
    }

    fn settle(&self, result: Result<(), ClientError>, fallback: &str) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "{}", fallback);
                self.error.set(e.user_message(fallback));
                false
            }
        }
    }

    // --- Summaries ---

    /// AI summaries keyed by job id. Jobs without a recognised source are
    /// skipped; with none left no request is made.
    pub async fn summaries(&self, jobs: &[Job]) -> HashMap<String, JobSummary> {
        let mut job_ids: BTreeMap<String, String> = BTreeMap::new();
        let requests: Vec<SummaryRequest> = jobs
            .iter()
            .filter_map(|job| {
                let source = resolve_source(job)?;
                job_ids.insert(source.requisition_id.clone(), job.id.clone());
                Some(SummaryRequest {
                    ats_id: source.requisition_id,
                    ats_type: source.source.key().to_string(),
                })
            })
            .collect();

        if requests.is_empty() {
            debug!("No jobs with a known source, skipping summaries");
            return HashMap::new();
        }

        let result: Result<SummariesResponse, _> =
            self.api.post("/api/summaries/jobs", &json!({ "jobs": requests })).await;
        let response = match result {
            Ok(r) if r.success => r,
            Ok(r) => {
                let message = r.error.unwrap_or_else(|| "Failed to fetch summaries".to_string());
                error!(error = %message, "Summary request rejected");
                self.error.set(message);
                return HashMap::new();
            }
            Err(e) => {
                error!(error = %e, "Error fetching job summaries");
                self.error.set(e.user_message("Failed to fetch summaries"));
                return HashMap::new();
            }
        };

        response
            .data
            .into_iter()
            .filter_map(|summary| {
                let job_id = job_ids.get(&summary.ats_id)?.clone();
                Some((job_id, summary))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::TestServer;
    use crate::session::Session;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Seen {
        searches: Arc<Mutex<Vec<HashMap<String, String>>>>,
        summary_calls: Arc<AtomicUsize>,
        bookmark_bodies: Arc<Mutex<Vec<Value>>>,
    }

    fn job(id: &str, location: &str) -> Value {
        json!({"id": id.parse::<u64>().unwrap(), "title": "Engineer", "location": location})
    }

    async fn search(State(seen): State<Seen>, Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
        seen.searches.lock().unwrap().push(q);
        Json(json!({
            "data": [job("1", "Austin, TX"), job("2", "Remote"), job("3", "Austin, TX")],
            "total": 25,
            "limit": 10,
            "offset": 10
        }))
    }

    async fn requisition(Path(id): Path<String>) -> impl IntoResponse {
        match id.as_str() {
            "1" => (StatusCode::OK, Json(json!({"data": {"id": 1, "title": "Engineer", "full_description": "Build"}}))),
            "404" => (StatusCode::NOT_FOUND, Json(json!({"error": "Requisition missing"}))),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "db down"}))),
        }
    }

    async fn summaries(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
        seen.summary_calls.fetch_add(1, Ordering::SeqCst);
        let data: Vec<Value> = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| json!({"ats_id": j["ats_id"], "ats_type": j["ats_type"], "summary": "Short", "key_points": ["a"]}))
            .collect();
        Json(json!({"success": true, "data": data}))
    }

    async fn add_bookmark(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
        seen.bookmark_bodies.lock().unwrap().push(body);
        (StatusCode::CREATED, Json(json!({"data": {"id": 1, "requisitionId": 5}})))
    }

    async fn remove_bookmark(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
        seen.bookmark_bodies.lock().unwrap().push(body);
        StatusCode::NO_CONTENT
    }

    async fn list_bookmarks() -> impl IntoResponse {
        Json(json!({"data": [{"id": 1, "requisition_id": "5", "created_at": "2026-01-01"}]}))
    }

    async fn clear_bookmarks() -> impl IntoResponse {
        (StatusCode::BAD_REQUEST, Json(json!({"message": "Nothing to clear"})))
    }

    async fn jobs_store(seen: &Seen) -> (TestServer, JobsStore) {
        let app = Router::new()
            .route("/api/requisitions/search", get(search))
            .route("/api/requisitions/:id", get(requisition))
            .route("/api/summaries/jobs", post(summaries))
            .route("/api/bookmarks", get(list_bookmarks).post(add_bookmark).delete(remove_bookmark))
            .route("/api/bookmarks/clear", delete(clear_bookmarks))
            .with_state(seen.clone());
        let srv = TestServer::spawn(app).await;
        let api = ApiClient::new(&srv.base_url, Duration::from_secs(5), Arc::new(Session::in_memory())).unwrap();
        (srv, JobsStore::new(api))
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(20, 10), 3);
        assert_eq!(total_pages(0, 10), 1);
        assert_eq!(total_pages(5, 0), 1);
    }

    #[tokio::test]
    async fn test_search_without_query_is_noop() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        assert!(!store.search(SearchParams::default()).await);
        assert!(!store
            .search(SearchParams {
                q: Some("  ".to_string()),
                ..Default::default()
            })
            .await);
        assert!(seen.searches.lock().unwrap().is_empty());
        assert_eq!(store.error(), None);
    }

    #[tokio::test]
    async fn test_search_stores_page_and_defaults_country() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        let params = SearchParams {
            q: Some("rust".to_string()),
            is_remote: Some(true),
            ..Default::default()
        };
        assert!(store.search(params).await);

        let query = seen.searches.lock().unwrap()[0].clone();
        assert_eq!(query.get("q").map(String::as_str), Some("rust"));
        assert_eq!(query.get("country").map(String::as_str), Some("US"));
        assert_eq!(query.get("isRemote").map(String::as_str), Some("true"));
        assert!(!query.contains_key("offset"));

        let state = store.state();
        assert_eq!(state.jobs.len(), 3);
        assert_eq!(state.total_pages, 3);
        assert_eq!(state.current_page(), 2);

        assert_eq!(
            store.locations(),
            vec![
                LocationFacet { location: "Austin, TX".to_string(), count: 2 },
                LocationFacet { location: "Remote".to_string(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_job_maps_errors_to_messages() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        let job = store.fetch_job("1").await.unwrap();
        assert_eq!(job.description.as_deref(), Some("Build"));

        assert!(store.fetch_job("404").await.is_none());
        assert_eq!(store.error().as_deref(), Some("Job not found"));

        assert!(store.fetch_job("500").await.is_none());
        assert_eq!(store.error().as_deref(), Some("Failed to fetch job details. Please try again."));
    }

    #[tokio::test]
    async fn test_toggle_saved_persists_in_session() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        assert!(store.toggle_saved("7"));
        assert!(store.toggle_saved("9"));
        assert!(store.is_saved("7"));
        assert!(!store.toggle_saved("7"));
        assert_eq!(store.saved_job_ids(), vec!["9".to_string()]);
    }

    #[tokio::test]
    async fn test_bookmarks_round_trip() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        let list = store.bookmarks().await.unwrap();
        assert_eq!(list[0].requisition_id, "5");

        assert!(store.add_bookmark("5").await);
        assert!(store.remove_bookmark("5").await);
        let bodies = seen.bookmark_bodies.lock().unwrap().clone();
        assert_eq!(bodies, vec![json!({"requisitionId": "5"}), json!({"requisitionId": "5"})]);

        assert!(!store.clear_bookmarks().await);
        assert_eq!(store.error().as_deref(), Some("Nothing to clear"));
    }

    #[tokio::test]
    async fn test_summaries_keyed_by_job_id_and_skip_unknown_sources() {
        let seen = Seen::default();
        let (_srv, store) = jobs_store(&seen).await;

        let with_source = Job {
            id: "11".to_string(),
            lever_requisition_id: Some("lv-1".to_string()),
            ..Default::default()
        };
        let without = Job {
            id: "12".to_string(),
            ..Default::default()
        };

        assert!(store.summaries(&[without.clone()]).await.is_empty());
        assert_eq!(seen.summary_calls.load(Ordering::SeqCst), 0);

        let map = store.summaries(&[with_source, without]).await;
        assert_eq!(seen.summary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map["11"].ats_type, "lever");
        assert_eq!(map["11"].key_points, vec!["a".to_string()]);
    }
}
