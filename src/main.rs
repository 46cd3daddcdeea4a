use std::{fs::File, io::BufReader, sync::Arc, time::Duration};

use actix_web::{
    get, http::header, middleware::Logger, post, web, App, HttpResponse, HttpServer,
};
use askama::Template;
use clap::{command, Parser};
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use uptimers_console::{
    structures::model::{parse_keywords, NewWebsite, Snapshot},
    views::DashboardView,
    CollectionStatus, CollectionStore, CommandDispatcher, ConsoleError, HttpMonitorApi,
    SyncCoordinator,
};

#[derive(Debug, Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    view: &'a DashboardView,
    default_color: &'a str,
}

#[derive(Debug, Serialize)]
struct SnapshotBody<'a> {
    snapshot: &'a Snapshot,
    collections: Vec<(String, CollectionStatus)>,
}

#[get("/")]
pub async fn index_handler(
    commands: web::Data<CommandDispatcher>,
) -> Result<HttpResponse, ConsoleError> {
    let sync = commands.sync();
    // a failed refresh still renders the last good snapshot
    if let Err(e) = sync.refresh().await {
        warn!("{}", e);
    }
    let snapshot = sync.current_snapshot();
    let view = DashboardView::build(&snapshot, &sync.store().statuses());
    let index = IndexTemplate {
        view: &view,
        default_color: "#3b82f6",
    };
    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .body(index.render()?))
}

#[get("/snapshot.json")]
pub async fn snapshot_handler(commands: web::Data<CommandDispatcher>) -> HttpResponse {
    let sync = commands.sync();
    let snapshot = sync.current_snapshot();
    let collections = sync
        .store()
        .statuses()
        .into_iter()
        .map(|(kind, status)| (kind.to_string(), status))
        .collect();
    HttpResponse::Ok().json(SnapshotBody {
        snapshot: &snapshot,
        collections,
    })
}

#[post("/refresh")]
pub async fn refresh_handler(
    commands: web::Data<CommandDispatcher>,
) -> Result<HttpResponse, ConsoleError> {
    commands.sync().refresh().await?;
    Ok(back_to_index())
}

#[derive(Debug, Deserialize)]
struct CategoryForm {
    name: String,
    color: Option<String>,
}

#[post("/categories")]
pub async fn category_handler(
    commands: web::Data<CommandDispatcher>,
    form: web::Form<CategoryForm>,
) -> Result<HttpResponse, ConsoleError> {
    let (created, _) = commands
        .create_category(&form.name, form.color.as_deref())
        .await?;
    info!("created category {} ({})", created.name, created.id);
    Ok(back_to_index())
}

#[derive(Debug, Deserialize)]
struct WebsiteForm {
    name: String,
    url: String,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    keywords: String,
    interval_seconds: u32,
}

#[post("/websites")]
pub async fn website_handler(
    commands: web::Data<CommandDispatcher>,
    form: web::Form<WebsiteForm>,
) -> Result<HttpResponse, ConsoleError> {
    let form = form.into_inner();
    let draft = NewWebsite::builder(form.name, form.url)
        .category(form.category_id)
        .keywords(parse_keywords(&form.keywords))
        .interval(form.interval_seconds);
    let (created, _) = commands.create_website(draft).await?;
    info!("created website {} ({})", created.name, created.id);
    Ok(back_to_index())
}

#[post("/check/{website_id}")]
pub async fn check_handler(
    commands: web::Data<CommandDispatcher>,
    website_id: web::Path<String>,
) -> Result<HttpResponse, ConsoleError> {
    let outcome = commands.trigger_check(&website_id).await?;
    info!(
        "check {} requested at {} visible at epoch {}",
        outcome.website_id, outcome.requested_at, outcome.snapshot.epoch
    );
    Ok(back_to_index())
}

fn back_to_index() -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, "/"))
        .finish()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    #[serde(default = "default_backend_url")]
    backend_url: String,
    #[serde(default = "default_api_prefix")]
    api_prefix: String,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_request_timeout")]
    request_timeout_seconds: u64,
    #[serde(default = "default_read_retries")]
    read_retries: u32,
    #[serde(default)]
    refresh_interval_seconds: Option<u64>,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    10
}

fn default_read_retries() -> u32 {
    1
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// path to config file
    #[arg(long, env, default_value = "./config.yaml")]
    config_path: String,
}

#[actix_web::main]
async fn main() -> Result<(), ConsoleError> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    info!("Started with args: {:?}", args);

    info!("Reading config from {}", args.config_path);
    let config: Config = serde_yaml::from_reader(BufReader::new(File::open(&args.config_path)?))?;

    let api = Arc::new(HttpMonitorApi::new(
        Client::new(),
        &config.backend_url,
        &config.api_prefix,
        Duration::from_secs(config.request_timeout_seconds),
    )?);
    info!("Using backend {}", api.base_url());
    let store = Arc::new(CollectionStore::new());
    let sync = SyncCoordinator::new(api.clone(), store).with_read_retries(config.read_retries);
    let commands = web::Data::new(CommandDispatcher::new(api, sync.clone()));

    let _periodic = config
        .refresh_interval_seconds
        .filter(|secs| *secs > 0)
        .map(|secs| {
            info!("Refreshing every {}s", secs);
            sync.spawn_periodic(Duration::from_secs(secs))
        });

    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(commands.clone())
            .service(index_handler)
            .service(snapshot_handler)
            .service(refresh_handler)
            .service(category_handler)
            .service(website_handler)
            .service(check_handler)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?)
}
