//! Scripted in-memory backend for unit tests.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use time::{macros::datetime, OffsetDateTime};

use crate::{
    api::MonitorApi,
    structures::{
        errors::ApiError,
        model::{Category, CheckResult, CollectionKind, NewCategory, NewWebsite, Summary, Website},
    },
};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unreachable,
    Rejected(u16),
}

impl Failure {
    fn into_error(self) -> ApiError {
        match self {
            Failure::Unreachable => ApiError::Unreachable("connection refused".into()),
            Failure::Rejected(status) => ApiError::Rejected {
                status,
                message: "scripted failure".into(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Data {
    categories: Vec<Category>,
    websites: Vec<Website>,
    checks: Vec<CheckResult>,
}

#[derive(Debug, Default)]
struct Script {
    fail_reads: HashSet<CollectionKind>,
    category_delays: VecDeque<Duration>,
    random_delay: Option<Duration>,
    fail_commands: Option<Failure>,
    fail_check: Option<Failure>,
    // probe reports success without persisting a result
    drop_check_results: bool,
}

#[derive(Debug, Default)]
pub struct FakeApi {
    data: Mutex<Data>,
    script: Mutex<Script>,
    reads: AtomicUsize,
    commands: AtomicUsize,
    next_id: AtomicUsize,
}

pub fn website(id: &str, name: &str, category_id: Option<&str>) -> Website {
    Website {
        id: id.into(),
        name: name.into(),
        url: format!("https://{id}.example.com"),
        category_id: category_id.map(str::to_string),
        keywords: vec!["login".into()],
        interval_seconds: 300,
        is_active: true,
    }
}

impl FakeApi {
    /// One category, two websites (one uncategorized) and one check.
    pub fn seeded() -> Self {
        let api = Self::default();
        {
            let mut data = api.data.lock().unwrap();
            data.categories.push(Category {
                id: "catA".into(),
                name: "Production".into(),
                color: Some("#3b82f6".into()),
            });
            data.websites.push(website("w1", "Company site", Some("catA")));
            data.websites.push(website("w2", "Docs", None));
            data.checks.push(CheckResult {
                id: "c1".into(),
                website_id: "w1".into(),
                is_up: true,
                status_code: Some(200),
                response_time_ms: 120.0,
                keyword_matches: vec!["login".into()],
                created_at: datetime!(2024-05-01 10:00:00 UTC),
            });
        }
        api
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn command_calls(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, kind: CollectionKind) {
        self.script.lock().unwrap().fail_reads.insert(kind);
    }

    pub fn fail_commands(&self, failure: Failure) {
        self.script.lock().unwrap().fail_commands = Some(failure);
    }

    pub fn fail_check(&self, failure: Failure) {
        self.script.lock().unwrap().fail_check = Some(failure);
    }

    pub fn drop_check_results(&self) {
        self.script.lock().unwrap().drop_check_results = true;
    }

    pub fn delay_next_categories(&self, delay: Duration) {
        self.script.lock().unwrap().category_delays.push_back(delay);
    }

    pub fn randomize_delays(&self, max: Duration) {
        self.script.lock().unwrap().random_delay = Some(max);
    }

    pub fn add_category(&self, category: Category) {
        self.data.lock().unwrap().categories.push(category);
    }

    pub fn remove_category(&self, id: &str) {
        self.data.lock().unwrap().categories.retain(|c| c.id != id);
    }

    pub fn add_website(&self, website: Website) {
        self.data.lock().unwrap().websites.push(website);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn begin_read(&self, kind: CollectionKind) -> Result<(), ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let (failed, delay) = {
            let mut script = self.script.lock().unwrap();
            let failed = script.fail_reads.remove(&kind);
            let mut delay = script
                .random_delay
                .map(|max| Duration::from_millis(fastrand::u64(0..=max.as_millis() as u64)));
            if kind == CollectionKind::Categories {
                if let Some(scripted) = script.category_delays.pop_front() {
                    delay = Some(scripted);
                }
            }
            (failed, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failed {
            true => Err(Failure::Rejected(500).into_error()),
            false => Ok(()),
        }
    }

    fn begin_command(&self) -> Result<(), ApiError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().fail_commands {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MonitorApi for FakeApi {
    async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.begin_read(CollectionKind::Categories).await?;
        Ok(self.data.lock().unwrap().categories.clone())
    }

    async fn websites(&self) -> Result<Vec<Website>, ApiError> {
        self.begin_read(CollectionKind::Websites).await?;
        Ok(self.data.lock().unwrap().websites.clone())
    }

    async fn summary(&self) -> Result<Summary, ApiError> {
        self.begin_read(CollectionKind::Summary).await?;
        let data = self.data.lock().unwrap();
        let latest: Vec<&CheckResult> = data
            .websites
            .iter()
            .filter_map(|w| data.checks.iter().find(|c| c.website_id == w.id))
            .collect();
        let avg = match latest.len() {
            0 => 0.0,
            n => latest.iter().map(|c| c.response_time_ms).sum::<f64>() / n as f64,
        };
        Ok(Summary {
            total_sites: data.websites.len() as u64,
            total_categories: data.categories.len() as u64,
            up: latest.iter().filter(|c| c.is_up).count() as u64,
            avg_response_time_ms: avg,
        })
    }

    async fn latest_checks(&self) -> Result<Vec<CheckResult>, ApiError> {
        self.begin_read(CollectionKind::Checks).await?;
        Ok(self.data.lock().unwrap().checks.clone())
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category, ApiError> {
        self.begin_command()?;
        let created = Category {
            id: self.next_id("cat"),
            name: category.name.clone(),
            color: Some(category.color.clone()),
        };
        self.data.lock().unwrap().categories.push(created.clone());
        Ok(created)
    }

    async fn create_website(&self, website: &NewWebsite) -> Result<Website, ApiError> {
        self.begin_command()?;
        let created = Website {
            id: self.next_id("web"),
            name: website.name.clone(),
            url: website.url.clone(),
            category_id: website.category_id.clone(),
            keywords: website.keywords.clone(),
            interval_seconds: website.interval_seconds,
            is_active: website.is_active,
        };
        self.data.lock().unwrap().websites.push(created.clone());
        Ok(created)
    }

    async fn trigger_check(&self, website_id: &str) -> Result<(), ApiError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let (failure, drop_result) = {
            let script = self.script.lock().unwrap();
            (script.fail_check, script.drop_check_results)
        };
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let id = self.next_id("chk");
        let mut data = self.data.lock().unwrap();
        let Some(website) = data.websites.iter().find(|w| w.id == website_id).cloned() else {
            return Err(Failure::Rejected(404).into_error());
        };
        if !drop_result {
            data.checks.insert(
                0,
                CheckResult {
                    id,
                    website_id: website.id,
                    is_up: true,
                    status_code: Some(200),
                    response_time_ms: 80.0,
                    keyword_matches: website.keywords,
                    created_at: OffsetDateTime::now_utc(),
                },
            );
        }
        Ok(())
    }
}
