//! Job identity across the applicant-tracking systems the board aggregates.
//!
//! A job record carries at most one ATS requisition id. That field decides
//! where the job came from and which of three URL shapes its detail page uses:
//!
//! - adp, dover: `/ats/{key}/{urlSafeClientName}/job/{slug}`
//! - bamboo, breezy, greenhouse, jobvite, lever, smartrecruiters:
//!   `/ats/{key}/{clientName}/job/{slug}`
//! - workday: `/ats/workday/{domain}/{clientName}/{clientProject}/job/{slug}`

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::Job;

/// Placeholder returned by [`build_client_url`] when no client page exists.
pub const CLIENT_URL_PLACEHOLDER: &str = "#";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Unknown ATS type: {0}. Cannot generate URL.")]
    UnknownSource(String),

    #[error("Navigation for {ats} is missing '{field}'")]
    MissingField { ats: AtsSource, field: &'static str },

    #[error("Job {0} has no ATS requisition id")]
    NoSource(String),

    #[error("Not a job detail path: {0}")]
    UnrecognisedRoute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtsSource {
    Adp,
    Bamboo,
    Breezy,
    Dover,
    Greenhouse,
    Jobvite,
    Lever,
    SmartRecruiters,
    Workday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlShape {
    UrlSafeClient,
    Client,
    Workday,
}

impl AtsSource {
    /// Scan order for [`resolve_source`]. If a record (wrongly) carries more
    /// than one requisition id, the first one in this order wins.
    pub const ALL: [AtsSource; 9] = [
        AtsSource::Adp,
        AtsSource::Bamboo,
        AtsSource::Breezy,
        AtsSource::Dover,
        AtsSource::Greenhouse,
        AtsSource::Jobvite,
        AtsSource::Lever,
        AtsSource::SmartRecruiters,
        AtsSource::Workday,
    ];

    pub fn key(self) -> &'static str {
        match self {
            AtsSource::Adp => "adp",
            AtsSource::Bamboo => "bamboo",
            AtsSource::Breezy => "breezy",
            AtsSource::Dover => "dover",
            AtsSource::Greenhouse => "greenhouse",
            AtsSource::Jobvite => "jobvite",
            AtsSource::Lever => "lever",
            AtsSource::SmartRecruiters => "smartrecruiters",
            AtsSource::Workday => "workday",
        }
    }

    fn requisition_id(self, job: &Job) -> Option<&str> {
        let field = match self {
            AtsSource::Adp => &job.adp_requisition_id,
            AtsSource::Bamboo => &job.bamboo_requisition_id,
            AtsSource::Breezy => &job.breezy_requisition_id,
            AtsSource::Dover => &job.dover_requisition_id,
            AtsSource::Greenhouse => &job.greenhouse_requisition_id,
            AtsSource::Jobvite => &job.jobvite_requisition_id,
            AtsSource::Lever => &job.lever_requisition_id,
            AtsSource::SmartRecruiters => &job.smartrecruiters_requisition_id,
            AtsSource::Workday => &job.workday_requisition_id,
        };
        field.as_deref().filter(|id| !id.trim().is_empty())
    }

    fn shape(self) -> UrlShape {
        match self {
            AtsSource::Adp | AtsSource::Dover => UrlShape::UrlSafeClient,
            AtsSource::Workday => UrlShape::Workday,
            _ => UrlShape::Client,
        }
    }
}

impl fmt::Display for AtsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for AtsSource {
    type Err = NavigationError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        AtsSource::ALL
            .into_iter()
            .find(|s| s.key() == key)
            .ok_or_else(|| NavigationError::UnknownSource(key.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSource {
    pub source: AtsSource,
    pub requisition_id: String,
}

/// First populated requisition id in [`AtsSource::ALL`] order.
pub fn resolve_source(job: &Job) -> Option<JobSource> {
    AtsSource::ALL.into_iter().find_map(|source| {
        source.requisition_id(job).map(|id| JobSource {
            source,
            requisition_id: id.to_string(),
        })
    })
}

/// Route data for a job's pages. `ats_type` is kept as the raw key so that
/// values from outside the closed set can still be represented and rejected
/// at URL-building time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobNavigation {
    pub ats_type: String,
    pub url_safe_client_name: Option<String>,
    pub client_name: Option<String>,
    pub domain: Option<String>,
    pub client_project: Option<String>,
    pub url_safe_job_title: Option<String>,
}

impl JobNavigation {
    pub fn from_job(job: &Job, source: &JobSource) -> Self {
        let url_safe_client_name = job
            .url_safe_client_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| job.client_name.as_deref().map(slugify))
            .filter(|s| !s.is_empty());

        Self {
            ats_type: source.source.key().to_string(),
            url_safe_client_name,
            client_name: job.client_name.clone(),
            domain: job.domain.clone(),
            client_project: job.client_project.clone(),
            url_safe_job_title: Some(title_slug(&job.title, &source.requisition_id)),
        }
    }
}

/// Source and navigation for a job, or `NoSource` if it has no ATS id.
pub fn navigation_for_job(job: &Job) -> Result<(JobSource, JobNavigation), NavigationError> {
    let source = resolve_source(job).ok_or_else(|| NavigationError::NoSource(job.id.clone()))?;
    let navigation = JobNavigation::from_job(job, &source);
    Ok((source, navigation))
}

pub fn job_detail_url(job: &Job) -> Result<String, NavigationError> {
    let (_, navigation) = navigation_for_job(job)?;
    build_detail_url(&navigation)
}

pub fn build_detail_url(nav: &JobNavigation) -> Result<String, NavigationError> {
    let source: AtsSource = nav.ats_type.parse()?;
    let base = client_path(source, nav)?;
    let slug = required(source, "urlSafeJobTitle", &nav.url_safe_job_title)?;
    Ok(format!("{base}/job/{slug}"))
}

/// Client landing page for a job's employer. Unlike [`build_detail_url`],
/// an unknown source or incomplete navigation yields
/// [`CLIENT_URL_PLACEHOLDER`] instead of an error.
pub fn build_client_url(nav: &JobNavigation) -> String {
    nav.ats_type
        .parse::<AtsSource>()
        .and_then(|source| client_path(source, nav))
        .unwrap_or_else(|_| CLIENT_URL_PLACEHOLDER.to_string())
}

fn client_path(source: AtsSource, nav: &JobNavigation) -> Result<String, NavigationError> {
    let key = source.key();
    match source.shape() {
        UrlShape::UrlSafeClient => {
            let client = required(source, "urlSafeClientName", &nav.url_safe_client_name)?;
            Ok(format!("/ats/{key}/{client}"))
        }
        UrlShape::Client => {
            let client = required(source, "clientName", &nav.client_name)?;
            Ok(format!("/ats/{key}/{client}"))
        }
        UrlShape::Workday => {
            let domain = required(source, "domain", &nav.domain)?;
            let client = required(source, "clientName", &nav.client_name)?;
            let project = required(source, "clientProject", &nav.client_project)?;
            Ok(format!("/ats/{key}/{domain}/{client}/{project}"))
        }
    }
}

fn required<'a>(
    source: AtsSource,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, NavigationError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(NavigationError::MissingField { ats: source, field })
}

/// Parameters recovered from a job detail path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRoute {
    UrlSafeClient {
        source: AtsSource,
        url_safe_client_name: String,
        url_safe_job_title: String,
    },
    Client {
        source: AtsSource,
        client_name: String,
        url_safe_job_title: String,
    },
    Workday {
        domain: String,
        client_name: String,
        client_project: String,
        url_safe_job_title: String,
    },
}

impl JobRoute {
    pub fn source(&self) -> AtsSource {
        match self {
            JobRoute::UrlSafeClient { source, .. } | JobRoute::Client { source, .. } => *source,
            JobRoute::Workday { .. } => AtsSource::Workday,
        }
    }

    pub fn url_safe_job_title(&self) -> &str {
        match self {
            JobRoute::UrlSafeClient { url_safe_job_title, .. }
            | JobRoute::Client { url_safe_job_title, .. }
            | JobRoute::Workday { url_safe_job_title, .. } => url_safe_job_title,
        }
    }
}

/// Matches a path against the nine detail routes. Every segment must be
/// non-empty, and the segment count must fit the source's shape exactly.
pub fn parse_detail_url(path: &str) -> Result<JobRoute, NavigationError> {
    let unrecognised = || NavigationError::UnrecognisedRoute(path.to_string());

    let segments: Vec<&str> = path.strip_prefix('/').ok_or_else(unrecognised)?.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(unrecognised());
    }

    match segments.as_slice() {
        ["ats", key, rest @ ..] => {
            let source: AtsSource = key.parse().map_err(|_| unrecognised())?;
            match (source.shape(), rest) {
                (UrlShape::UrlSafeClient, [client, "job", slug]) => Ok(JobRoute::UrlSafeClient {
                    source,
                    url_safe_client_name: client.to_string(),
                    url_safe_job_title: slug.to_string(),
                }),
                (UrlShape::Client, [client, "job", slug]) => Ok(JobRoute::Client {
                    source,
                    client_name: client.to_string(),
                    url_safe_job_title: slug.to_string(),
                }),
                (UrlShape::Workday, [domain, client, project, "job", slug]) => Ok(JobRoute::Workday {
                    domain: domain.to_string(),
                    client_name: client.to_string(),
                    client_project: project.to_string(),
                    url_safe_job_title: slug.to_string(),
                }),
                _ => Err(unrecognised()),
            }
        }
        _ => Err(unrecognised()),
    }
}

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static slug pattern is valid"));

/// Lowercase, with every run of non-alphanumerics collapsed to one `-`.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    NON_ALPHANUMERIC.replace_all(&lower, "-").trim_matches('-').to_string()
}

fn title_slug(title: &str, requisition_id: &str) -> String {
    let title = slugify(title);
    let id = slugify(requisition_id);
    match (title.is_empty(), id.is_empty()) {
        (true, _) => id,
        (false, true) => title,
        (false, false) => format!("{title}-{id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(source: AtsSource, id: &str) -> Job {
        let mut job = Job {
            id: "100".to_string(),
            title: "Senior Rust Engineer".to_string(),
            client_name: Some("acme".to_string()),
            url_safe_client_name: Some("acme-corp".to_string()),
            domain: Some("wd5".to_string()),
            client_project: Some("External".to_string()),
            ..Default::default()
        };
        let field = match source {
            AtsSource::Adp => &mut job.adp_requisition_id,
            AtsSource::Bamboo => &mut job.bamboo_requisition_id,
            AtsSource::Breezy => &mut job.breezy_requisition_id,
            AtsSource::Dover => &mut job.dover_requisition_id,
            AtsSource::Greenhouse => &mut job.greenhouse_requisition_id,
            AtsSource::Jobvite => &mut job.jobvite_requisition_id,
            AtsSource::Lever => &mut job.lever_requisition_id,
            AtsSource::SmartRecruiters => &mut job.smartrecruiters_requisition_id,
            AtsSource::Workday => &mut job.workday_requisition_id,
        };
        *field = Some(id.to_string());
        job
    }

    fn full_navigation(ats_type: &str) -> JobNavigation {
        JobNavigation {
            ats_type: ats_type.to_string(),
            url_safe_client_name: Some("acme-corp".to_string()),
            client_name: Some("acme".to_string()),
            domain: Some("wd5".to_string()),
            client_project: Some("External".to_string()),
            url_safe_job_title: Some("senior-rust-engineer-123".to_string()),
        }
    }

    #[test]
    fn test_resolve_source_single_field() {
        for source in AtsSource::ALL {
            let job = job_with(source, "abc123");
            let resolved = resolve_source(&job).unwrap();
            assert_eq!(resolved.source, source);
            assert_eq!(resolved.requisition_id, "abc123");
        }
    }

    #[test]
    fn test_resolve_source_none_populated() {
        let job = Job {
            id: "1".to_string(),
            title: "Orphan".to_string(),
            ..Default::default()
        };
        assert!(resolve_source(&job).is_none());
        assert_eq!(job_detail_url(&job), Err(NavigationError::NoSource("1".to_string())));
    }

    #[test]
    fn test_resolve_source_prefers_scan_order_on_conflict() {
        let mut job = job_with(AtsSource::Workday, "wd-1");
        job.lever_requisition_id = Some("lv-1".to_string());
        job.bamboo_requisition_id = Some("bb-1".to_string());

        let resolved = resolve_source(&job).unwrap();
        assert_eq!(resolved.source, AtsSource::Bamboo);
        assert_eq!(resolved.requisition_id, "bb-1");
    }

    #[test]
    fn test_build_detail_url_shapes() {
        let expected = [
            ("adp", "/ats/adp/acme-corp/job/senior-rust-engineer-123"),
            ("bamboo", "/ats/bamboo/acme/job/senior-rust-engineer-123"),
            ("breezy", "/ats/breezy/acme/job/senior-rust-engineer-123"),
            ("dover", "/ats/dover/acme-corp/job/senior-rust-engineer-123"),
            ("greenhouse", "/ats/greenhouse/acme/job/senior-rust-engineer-123"),
            ("jobvite", "/ats/jobvite/acme/job/senior-rust-engineer-123"),
            ("lever", "/ats/lever/acme/job/senior-rust-engineer-123"),
            ("smartrecruiters", "/ats/smartrecruiters/acme/job/senior-rust-engineer-123"),
            ("workday", "/ats/workday/wd5/acme/External/job/senior-rust-engineer-123"),
        ];
        for (key, path) in expected {
            assert_eq!(build_detail_url(&full_navigation(key)).unwrap(), path, "source {key}");
        }
    }

    #[test]
    fn test_detail_urls_parse_back_to_route_params() {
        for source in AtsSource::ALL {
            let nav = full_navigation(source.key());
            let path = build_detail_url(&nav).unwrap();
            let route = parse_detail_url(&path).unwrap();

            assert_eq!(route.source(), source);
            assert_eq!(route.url_safe_job_title(), "senior-rust-engineer-123");
            match route {
                JobRoute::UrlSafeClient { url_safe_client_name, .. } => {
                    assert_eq!(url_safe_client_name, "acme-corp")
                }
                JobRoute::Client { client_name, .. } => assert_eq!(client_name, "acme"),
                JobRoute::Workday {
                    domain,
                    client_name,
                    client_project,
                    ..
                } => {
                    assert_eq!(domain, "wd5");
                    assert_eq!(client_name, "acme");
                    assert_eq!(client_project, "External");
                }
            }
        }
    }

    #[test]
    fn test_build_detail_url_unknown_source_fails() {
        let nav = full_navigation("taleo");
        assert_eq!(
            build_detail_url(&nav),
            Err(NavigationError::UnknownSource("taleo".to_string()))
        );
    }

    #[test]
    fn test_build_detail_url_missing_field_fails() {
        let mut nav = full_navigation("workday");
        nav.client_project = None;
        assert_eq!(
            build_detail_url(&nav),
            Err(NavigationError::MissingField {
                ats: AtsSource::Workday,
                field: "clientProject"
            })
        );

        let mut nav = full_navigation("adp");
        nav.url_safe_client_name = Some(String::new());
        assert!(matches!(
            build_detail_url(&nav),
            Err(NavigationError::MissingField { field: "urlSafeClientName", .. })
        ));

        let mut nav = full_navigation("lever");
        nav.url_safe_job_title = None;
        assert!(matches!(
            build_detail_url(&nav),
            Err(NavigationError::MissingField { field: "urlSafeJobTitle", .. })
        ));
    }

    #[test]
    fn test_build_client_url_mirrors_detail_without_job_segment() {
        assert_eq!(build_client_url(&full_navigation("dover")), "/ats/dover/acme-corp");
        assert_eq!(build_client_url(&full_navigation("greenhouse")), "/ats/greenhouse/acme");
        assert_eq!(build_client_url(&full_navigation("workday")), "/ats/workday/wd5/acme/External");
    }

    #[test]
    fn test_build_client_url_unknown_source_is_placeholder() {
        assert_eq!(build_client_url(&full_navigation("icims")), CLIENT_URL_PLACEHOLDER);
        assert_eq!(build_client_url(&JobNavigation::default()), CLIENT_URL_PLACEHOLDER);
    }

    #[test]
    fn test_navigation_from_job_builds_slugs() {
        let mut job = job_with(AtsSource::Dover, "R-77");
        job.url_safe_client_name = None;
        job.client_name = Some("Acme Widgets, Inc.".to_string());

        let (source, nav) = navigation_for_job(&job).unwrap();
        assert_eq!(source.source, AtsSource::Dover);
        assert_eq!(nav.ats_type, "dover");
        assert_eq!(nav.url_safe_client_name.as_deref(), Some("acme-widgets-inc"));
        assert_eq!(nav.url_safe_job_title.as_deref(), Some("senior-rust-engineer-r-77"));
        assert_eq!(
            job_detail_url(&job).unwrap(),
            "/ats/dover/acme-widgets-inc/job/senior-rust-engineer-r-77"
        );
    }

    #[test]
    fn test_parse_detail_url_rejects_wrong_shapes() {
        let bad = [
            "ats/lever/acme/job/x",
            "/ats/lever/acme/job/",
            "/ats/lever/acme/x",
            "/ats/workday/acme/job/x",
            "/ats/adp/a/b/c/job/x",
            "/ats/taleo/acme/job/x",
            "/jobs/lever/acme/job/x",
        ];
        for path in bad {
            assert!(parse_detail_url(path).is_err(), "{path} should not match");
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Senior Rust Engineer (Remote)"), "senior-rust-engineer-remote");
        assert_eq!(slugify("--C++ / Qt--"), "c-qt");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_source_key_round_trip() {
        for source in AtsSource::ALL {
            assert_eq!(source.key().parse::<AtsSource>().unwrap(), source);
        }
        assert!("Lever".parse::<AtsSource>().is_err());
    }
}
