mod ats;
mod auth;
mod client;
mod config;
mod error;
mod jobs;
mod models;
mod profiles;
mod reconcile;
mod session;
mod storage;
mod subscription;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::AuthStore;
use client::ApiClient;
use config::Config;
use error::ClientError;
use jobs::JobsStore;
use models::{Job, NewJobProfile, SearchParams, COUNTRIES};
use profiles::ProfilesStore;
use reconcile::{ReconcileOptions, Reconciler};
use session::Session;
use storage::SqliteStore;
use subscription::{SubscriptionOracle, SubscriptionService};

#[derive(Parser)]
#[command(name = "turbo")]
#[command(about = "Search jobs across applicant-tracking systems and manage your account")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Email a sign-in link
    Login {
        email: String,
    },

    /// Finish sign-in with the token from the emailed link
    Verify {
        token: String,
    },

    /// Sign in with LinkedIn (run without --code to get the authorization URL)
    Linkedin {
        #[arg(long, requires = "state")]
        code: Option<String>,

        #[arg(long, requires = "code")]
        state: Option<String>,
    },

    /// Sign out and forget the local session
    Logout,

    /// Show the signed-in user
    Whoami {
        /// Re-fetch the profile from the server first
        #[arg(long)]
        refresh: bool,
    },

    /// Search job postings
    Search {
        query: String,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(long)]
        city: Option<String>,

        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        zip: Option<String>,

        /// Remote jobs only
        #[arg(long)]
        remote: bool,

        /// ISO country code
        #[arg(short, long, default_value = "US")]
        country: String,

        /// Restrict to one company
        #[arg(long)]
        source: Option<String>,

        /// 1-based page number
        #[arg(short, long, default_value = "1")]
        page: u64,

        /// Also show location counts for the page
        #[arg(long)]
        locations: bool,
    },

    /// Show job details
    Show {
        id: String,
    },

    /// Print a job's detail page path
    Url {
        id: String,
    },

    /// Parse a job detail path back into its parts
    Route {
        path: String,
    },

    /// Show job board statistics
    Stats,

    /// List supported search countries
    Countries,

    /// Toggle a job in the local saved list
    Save {
        id: String,
    },

    /// List locally saved jobs
    Saved,

    /// Manage server-side bookmarks
    Bookmarks {
        #[command(subcommand)]
        command: BookmarkCommands,
    },

    /// Manage the premium subscription
    Subscription {
        #[command(subcommand)]
        command: SubscriptionCommands,
    },

    /// Manage job-application profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Show AI summaries for a search
    Summaries {
        query: String,

        #[arg(short, long, default_value = "US")]
        country: String,
    },
}

#[derive(Subcommand)]
enum BookmarkCommands {
    /// List bookmarks
    List,

    /// Bookmark a job
    Add {
        id: String,
    },

    /// Remove a bookmark
    Remove {
        id: String,
    },

    /// Remove every bookmark
    Clear,
}

#[derive(Subcommand)]
enum SubscriptionCommands {
    /// Show subscription status
    Status,

    /// Start a checkout session
    Checkout {
        #[arg(long)]
        success_url: Option<String>,

        #[arg(long)]
        cancel_url: Option<String>,

        /// Wait for the payment to show up on the account
        #[arg(long)]
        wait: bool,
    },

    /// Cancel at the end of the current period
    Cancel,

    /// Undo a pending cancellation
    Reactivate,

    /// Open the billing portal
    Portal,

    /// Re-check entitlement against the billing backend
    Sync {
        /// Single check, no polling
        #[arg(long, conflicts_with_all = ["manual", "attempts"])]
        quick: bool,

        /// Three checks with progress messages
        #[arg(long, conflicts_with = "attempts")]
        manual: bool,

        /// Number of polling attempts
        #[arg(long)]
        attempts: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List profiles
    List,

    /// Show a profile (the selected one by default)
    Show {
        id: Option<String>,
    },

    /// Create a profile
    Create {
        name: String,

        #[arg(short, long)]
        title: Option<String>,
    },

    /// Update profile fields
    Update {
        id: String,

        /// field=value, repeatable; values are parsed as JSON when possible
        #[arg(short, long = "set", value_name = "FIELD=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Delete a profile
    Delete {
        id: String,
    },

    /// Check a profile against a job's application form
    Validate {
        /// Job ID
        job: String,

        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Submit an application
    Submit {
        /// Job ID
        job: String,

        #[arg(short, long)]
        profile: Option<String>,

        /// Answers to validation questions, as JSON
        #[arg(short, long, default_value = "{}")]
        answers: String,
    },
}

struct App {
    auth: Arc<AuthStore>,
    jobs: JobsStore,
    profiles: ProfilesStore,
    billing: SubscriptionService,
    reconciler: Reconciler,
}

impl App {
    fn new(api: ApiClient) -> Self {
        let auth = Arc::new(AuthStore::new(api.clone()));
        let billing = SubscriptionService::new(api.clone());
        let reconciler = Reconciler::new(Arc::new(billing.clone()), auth.clone());
        Self {
            auth,
            jobs: JobsStore::new(api.clone()),
            profiles: ProfilesStore::new(api),
            billing,
            reconciler,
        }
    }

    fn require_login(&self) -> Result<()> {
        if !self.auth.is_authenticated() {
            return Err(ClientError::NotAuthenticated).context("Run `turbo login <email>` first");
        }
        Ok(())
    }

    async fn job(&self, id: &str) -> Result<Job> {
        self.jobs
            .fetch_job(id)
            .await
            .ok_or_else(|| store_error(self.jobs.error(), "Failed to fetch job details"))
    }

    /// Loads profiles and selects `id` if given.
    async fn select_profile(&self, id: Option<&str>) -> Result<()> {
        check(self.profiles.fetch_profiles().await, self.profiles.error(), "Failed to load profiles")?;
        if let Some(id) = id {
            if !self.profiles.profiles().iter().any(|p| p.id == id) {
                bail!("Profile not found");
            }
            self.profiles.select_profile(id);
        }
        Ok(())
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), level))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    let store = SqliteStore::open(&config.database_path())?;
    debug!(path = %store.path().display(), api_url = %config.api_url, "Session store opened");
    let session = Arc::new(Session::restore(Box::new(store)));
    let api = ApiClient::new(&config.api_url, config.http_timeout, session).context("Failed to build HTTP client")?;
    let app = App::new(api);

    match cli.command {
        Commands::Login { email } => {
            check(app.auth.send_magic_link(&email).await, app.auth.error(), "Failed to send magic link")?;
            println!("Sign-in link sent to {}. Run `turbo verify <token>` with the token from the email.", email);
        }

        Commands::Verify { token } => {
            check(app.auth.verify_magic_link(&token).await, app.auth.error(), "Verification failed")?;
            print_user(&app.auth);
        }

        Commands::Linkedin { code, state } => match (code, state) {
            (Some(code), Some(state)) => {
                check(app.auth.complete_linkedin(&code, &state).await, app.auth.error(), "LinkedIn sign-in failed")?;
                print_user(&app.auth);
            }
            _ => {
                let (url, state) = app
                    .auth
                    .linkedin_authorization_url()
                    .await
                    .ok_or_else(|| store_error(app.auth.error(), "Failed to connect to LinkedIn"))?;
                println!("Open this URL to sign in:\n  {}", url);
                println!("Then run: turbo linkedin --code <code> --state {}", state);
            }
        },

        Commands::Logout => {
            app.auth.logout().await;
            app.profiles.reset();
            println!("Signed out.");
        }

        Commands::Whoami { refresh } => {
            if refresh {
                app.require_login()?;
                if !app.auth.refresh_profile().await {
                    eprintln!("Could not refresh profile; showing cached data.");
                }
            }
            print_user(&app.auth);
        }

        Commands::Search {
            query,
            location,
            city,
            state,
            zip,
            remote,
            country,
            source,
            page,
            locations,
        } => {
            if models::find_country(&country).is_none() {
                eprintln!("Warning: {} is not in the list of supported countries", country);
            }
            let params = SearchParams {
                q: Some(query),
                location,
                city,
                state,
                zip,
                is_remote: remote.then_some(true),
                country: Some(country.to_uppercase()),
                source,
                offset: Some(page.saturating_sub(1) * jobs::DEFAULT_PAGE_SIZE),
            };
            check(app.jobs.search(params).await, app.jobs.error(), "Search failed")?;

            let results = app.jobs.state();
            if let Some(q) = &results.params.q {
                println!("Results for \"{}\" in {}\n", q, results.params.country.as_deref().unwrap_or(jobs::DEFAULT_COUNTRY));
            }
            if results.jobs.is_empty() {
                println!("No jobs found.");
            } else {
                print_job_table(&app.jobs, &results.jobs);
                let saved = app.jobs.saved_jobs_on_page().len();
                if saved > 0 {
                    println!("\n{} saved on this page (marked *)", saved);
                }
                println!(
                    "\nPage {} of {} ({} jobs)",
                    results.current_page(),
                    results.total_pages,
                    results.total
                );
            }

            if locations {
                println!("\n{:<40} {:>6}", "LOCATION", "JOBS");
                println!("{}", "-".repeat(47));
                for facet in app.jobs.locations() {
                    let name = if facet.location.is_empty() { "-".to_string() } else { facet.location };
                    println!("{:<40} {:>6}", truncate(&name, 38), facet.count);
                }
            }
        }

        Commands::Show { id } => {
            let job = app.job(&id).await?;
            println!("Job #{}", job.id);
            println!("Title: {}", job.title);
            if let Some(company) = job.client_name.as_ref().or(job.source.as_ref()) {
                println!("Company: {}", company);
            }
            if let Some(location) = &job.location {
                println!("Location: {}", location);
            }
            if job.remote == Some(true) {
                println!("Remote: yes");
            }
            if let Some(country) = &job.country {
                let label = models::find_country(country).map(|c| c.label).unwrap_or(country.as_str());
                println!("Country: {}", label);
            }
            if let Some(posted) = &job.posted_at {
                println!("Posted: {}", posted);
            }
            match ats::navigation_for_job(&job) {
                Ok((source, navigation)) => {
                    println!("ATS: {} ({})", source.source, source.requisition_id);
                    match ats::build_detail_url(&navigation) {
                        Ok(url) => println!("Page: {}", url),
                        Err(e) => println!("Page: unavailable ({})", e),
                    }
                    println!("Company page: {}", ats::build_client_url(&navigation));
                }
                Err(e) => println!("ATS: unknown ({})", e),
            }
            if let Some(url) = &job.external_url {
                println!("Apply: {}", url);
            }
            println!("Saved: {}", if app.jobs.is_saved(&job.id) { "yes" } else { "no" });
            if let Some(description) = &job.description {
                println!("\n--- Description ---");
                for line in textwrap::fill(description, 80).lines() {
                    println!("{}", line);
                }
            }
        }

        Commands::Url { id } => {
            let job = app.job(&id).await?;
            let url = ats::job_detail_url(&job).with_context(|| format!("No detail page for job {}", id))?;
            println!("{}", url);
        }

        Commands::Route { path } => {
            let route = ats::parse_detail_url(&path)?;
            println!("ATS: {}", route.source());
            match &route {
                ats::JobRoute::UrlSafeClient { url_safe_client_name, .. } => {
                    println!("Client: {}", url_safe_client_name)
                }
                ats::JobRoute::Client { client_name, .. } => println!("Client: {}", client_name),
                ats::JobRoute::Workday {
                    domain,
                    client_name,
                    client_project,
                    ..
                } => {
                    println!("Domain: {}", domain);
                    println!("Client: {}", client_name);
                    println!("Project: {}", client_project);
                }
            }
            println!("Job: {}", route.url_safe_job_title());
        }

        Commands::Stats => {
            let stats = app
                .jobs
                .statistics()
                .await
                .ok_or_else(|| store_error(app.jobs.error(), "Failed to fetch statistics"))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Countries => {
            for country in COUNTRIES {
                println!("{:<4} {}", country.code, country.label);
            }
        }

        Commands::Save { id } => {
            if app.jobs.toggle_saved(&id) {
                println!("Saved job #{}", id);
            } else {
                println!("Removed job #{} from saved jobs", id);
            }
        }

        Commands::Saved => {
            let ids = app.jobs.saved_job_ids();
            if ids.is_empty() {
                println!("No saved jobs.");
            }
            for id in ids {
                match app.jobs.fetch_job(&id).await {
                    Some(job) => println!("{:<8} {}", job.id, truncate(&job.title, 60)),
                    None => println!("{:<8} (unavailable)", id),
                }
            }
        }

        Commands::Bookmarks { command } => {
            app.require_login()?;
            match command {
                BookmarkCommands::List => {
                    let bookmarks = app
                        .jobs
                        .bookmarks()
                        .await
                        .ok_or_else(|| store_error(app.jobs.error(), "Failed to load bookmarks"))?;
                    if bookmarks.is_empty() {
                        println!("No bookmarks.");
                    } else {
                        println!("{:<8} {:<40} {:<20}", "JOB", "TITLE", "ADDED");
                        println!("{}", "-".repeat(70));
                        for bookmark in bookmarks {
                            let title = bookmark.job.as_ref().map(|j| j.title.as_str()).unwrap_or("-");
                            println!(
                                "{:<8} {:<40} {:<20}",
                                bookmark.requisition_id,
                                truncate(title, 38),
                                truncate(bookmark.created_at.as_deref().unwrap_or("-"), 18)
                            );
                        }
                    }
                }
                BookmarkCommands::Add { id } => {
                    check(app.jobs.add_bookmark(&id).await, app.jobs.error(), "Failed to bookmark job")?;
                    println!("Bookmarked job #{}", id);
                }
                BookmarkCommands::Remove { id } => {
                    check(app.jobs.remove_bookmark(&id).await, app.jobs.error(), "Failed to remove bookmark")?;
                    println!("Removed bookmark for job #{}", id);
                }
                BookmarkCommands::Clear => {
                    check(app.jobs.clear_bookmarks().await, app.jobs.error(), "Failed to clear bookmarks")?;
                    println!("Cleared all bookmarks.");
                }
            }
        }

        Commands::Subscription { command } => {
            app.require_login()?;
            run_subscription(&app, command).await?;
        }

        Commands::Profiles { command } => {
            app.require_login()?;
            run_profiles(&app, command).await?;
        }

        Commands::Summaries { query, country } => {
            let params = SearchParams {
                q: Some(query),
                country: Some(country.to_uppercase()),
                ..Default::default()
            };
            check(app.jobs.search(params).await, app.jobs.error(), "Search failed")?;
            let results = app.jobs.state().jobs;
            let summaries = app.jobs.summaries(&results).await;
            if summaries.is_empty() {
                if let Some(error) = app.jobs.error() {
                    bail!(error);
                }
                println!("No summaries available.");
            }
            for job in &results {
                let Some(summary) = summaries.get(&job.id) else {
                    continue;
                };
                println!("#{} {}", job.id, job.title);
                if let Some(text) = &summary.summary {
                    for line in textwrap::fill(text, 76).lines() {
                        println!("    {}", line);
                    }
                }
                for point in &summary.key_points {
                    println!("    - {}", point);
                }
                println!();
            }
        }
    }

    Ok(())
}

async fn run_subscription(app: &App, command: SubscriptionCommands) -> Result<()> {
    match command {
        SubscriptionCommands::Status => {
            let status = app.billing.fetch_status().await?;
            let now = Utc::now();
            match &status.subscription {
                Some(sub) => {
                    println!("Status: {}", subscription::format_status(&sub.status));
                    println!("Premium access: {}", if subscription::is_active(&status, now) { "yes" } else { "no" });
                    println!("Current period ends: {}", subscription::format_date(&sub.current_period_end));
                    println!("Days remaining: {}", subscription::days_remaining(Some(sub), now));
                    if sub.cancel_at_period_end {
                        println!("Cancels at period end");
                    }
                    if let Some(canceled) = &sub.canceled_at {
                        println!("Canceled on: {}", subscription::format_date(canceled));
                    }
                }
                None => println!("{}", status.message.as_deref().unwrap_or("No active subscription.")),
            }
            if app.auth.is_premium() != subscription::is_active(&status, now) {
                println!("\nYour account roles are out of date. Run `turbo subscription sync`.");
            }
        }

        SubscriptionCommands::Checkout {
            success_url,
            cancel_url,
            wait,
        } => {
            let checkout = app.billing.create_checkout_session(success_url, cancel_url).await?;
            if let Some(message) = &checkout.message {
                println!("{}", message);
            }
            println!("Complete payment at:\n  {}", checkout.checkout_url);
            println!("Session: {}", checkout.session_id);
            if wait {
                println!("Waiting for the payment to be confirmed...");
                let progress = |attempt: u32, max: u32| eprintln!("  check {}/{}", attempt, max);
                let outcome = app.reconciler.run(ReconcileOptions::full(), Some(&progress)).await;
                if outcome.premium_confirmed() {
                    println!("Premium is active. Thanks!");
                } else {
                    bail!("Payment not confirmed yet. Run `turbo subscription sync` later.");
                }
            }
        }

        SubscriptionCommands::Cancel => {
            let response = app.billing.cancel().await?;
            println!(
                "{}",
                response
                    .message
                    .as_deref()
                    .unwrap_or("Subscription will cancel at the end of the current period.")
            );
            if !app.reconciler.quick_refresh().await {
                warn!("Entitlement refresh after cancel did not complete");
            }
        }

        SubscriptionCommands::Reactivate => {
            let response = app.billing.reactivate().await?;
            println!("{}", response.message.as_deref().unwrap_or("Subscription reactivated."));
            if !app.reconciler.quick_refresh().await {
                warn!("Entitlement refresh after reactivation did not complete");
            }
        }

        SubscriptionCommands::Portal => {
            let portal = app.billing.customer_portal().await?;
            if let Some(message) = &portal.message {
                println!("{}", message);
            }
            println!("Manage billing at:\n  {}", portal.portal_url);
        }

        SubscriptionCommands::Sync { quick, manual, attempts } => {
            let success = if quick {
                app.reconciler.quick_refresh().await
            } else if manual {
                let say = |message: &str| println!("{}", message);
                app.reconciler.manual_refresh(Some(&say)).await
            } else {
                let options = ReconcileOptions {
                    max_attempts: attempts.unwrap_or(reconcile::FULL_POLL_ATTEMPTS),
                    ..ReconcileOptions::full()
                };
                app.reconciler.refresh_after_payment(options).await
            };
            if !success {
                bail!("Unable to confirm subscription status");
            }
            println!("Premium: {}", if app.auth.is_premium() { "yes" } else { "no" });
        }
    }
    Ok(())
}

async fn run_profiles(app: &App, command: ProfileCommands) -> Result<()> {
    let profiles = &app.profiles;
    match command {
        ProfileCommands::List => {
            app.select_profile(None).await?;
            let selected = profiles.selected_id();
            let all = profiles.profiles();
            if all.is_empty() {
                println!("No profiles. Create one with `turbo profiles create <name>`.");
            } else {
                println!("{:<2} {:<8} {:<30} {:<30}", "", "ID", "NAME", "DESIRED TITLE");
                println!("{}", "-".repeat(72));
                for profile in all {
                    let marker = if selected.as_deref() == Some(profile.id.as_str()) { "*" } else { "" };
                    println!(
                        "{:<2} {:<8} {:<30} {:<30}",
                        marker,
                        profile.id,
                        truncate(&profile.profile_name, 28),
                        truncate(profile.desired_job_title.as_deref().unwrap_or("-"), 28)
                    );
                }
            }
        }

        ProfileCommands::Show { id } => {
            app.select_profile(id.as_deref()).await?;
            let profile = profiles.selected_profile().ok_or_else(|| anyhow!("No profiles yet"))?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        ProfileCommands::Create { name, title } => {
            app.select_profile(None).await?;
            if !profiles.can_create_profile(app.auth.is_premium()) {
                bail!("Free accounts are limited to one profile. Upgrade with `turbo subscription checkout`.");
            }
            let profile = profiles
                .create_profile(&NewJobProfile {
                    profile_name: name,
                    desired_job_title: title,
                })
                .await
                .ok_or_else(|| store_error(profiles.error(), "Failed to create profile"))?;
            println!("Created profile #{} ({})", profile.id, profile.profile_name);
        }

        ProfileCommands::Update { id, fields } => {
            app.select_profile(None).await?;
            let updates = parse_fields(&fields)?;
            check(profiles.update_profile(&id, &updates).await, profiles.error(), "Failed to save profile")?;
            println!("Updated profile #{}", id);
        }

        ProfileCommands::Delete { id } => {
            app.select_profile(None).await?;
            check(profiles.delete_profile(&id).await, profiles.error(), "Failed to delete profile")?;
            println!("Deleted profile #{}", id);
        }

        ProfileCommands::Validate { job, profile } => {
            app.select_profile(profile.as_deref()).await?;
            let job = app.job(&job).await?;
            let source = ats::resolve_source(&job);
            let result = profiles
                .validate(source.as_ref())
                .await
                .ok_or_else(|| store_error(profiles.error(), "Failed to validate profile"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        ProfileCommands::Submit { job, profile, answers } => {
            let answers: Value = serde_json::from_str(&answers).context("--answers must be valid JSON")?;
            app.select_profile(profile.as_deref()).await?;
            let job = app.job(&job).await?;
            let source = ats::resolve_source(&job);
            let result = profiles
                .submit(source.as_ref(), answers)
                .await
                .ok_or_else(|| store_error(profiles.error(), "Failed to submit application"))?;
            println!("Application submitted.");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn print_user(auth: &AuthStore) {
    let state = auth.session().snapshot();
    match (&state.user, state.is_authenticated()) {
        (Some(user), true) => {
            println!("Signed in as {}", user.email);
            if let Some(name) = &user.name {
                println!("Name: {}", name);
            }
            println!("Verified: {}", if user.email_verified { "yes" } else { "no" });
            println!("Plan: {}", if state.is_premium() { "Premium" } else { "Free" });
        }
        (None, true) => println!("Signed in (profile not loaded)"),
        _ => println!("Not signed in."),
    }
}

fn print_job_table(jobs: &JobsStore, results: &[Job]) {
    println!("{:<8} {:<1} {:<35} {:<22} {:<20}", "ID", "", "TITLE", "COMPANY", "LOCATION");
    println!("{}", "-".repeat(90));
    for job in results {
        let company = job.client_name.as_deref().or(job.source.as_deref()).unwrap_or("-");
        println!(
            "{:<8} {:<1} {:<35} {:<22} {:<20}",
            job.id,
            if jobs.is_saved(&job.id) { "*" } else { "" },
            truncate(&job.title, 33),
            truncate(company, 20),
            truncate(job.location.as_deref().unwrap_or("-"), 20)
        );
    }
}

/// Turns a store's boolean result into an error carrying its message.
fn check(ok: bool, error: Option<String>, fallback: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(store_error(error, fallback))
    }
}

fn store_error(error: Option<String>, fallback: &str) -> anyhow::Error {
    anyhow!(error.unwrap_or_else(|| fallback.to_string()))
}

fn parse_fields(fields: &[String]) -> Result<Map<String, Value>> {
    let mut updates = Map::new();
    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", field))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        updates.insert(key.trim().to_string(), value);
    }
    Ok(updates)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
