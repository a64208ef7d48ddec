//! Command handlers of the `aasx-index` binary.
//!
//! Results go to stdout; progress and logs go to stderr.

use anyhow::{bail, Result};

use aasx_index_core::models::{Cursor, DocumentKey};

use crate::adapters::AdapterFactory;
use crate::config::Config;
use crate::pool::{TaskEvent, TaskEventKind};
use crate::progress::{format_number, ProgressMode};
use crate::service::{EndpointSpec, IndexService};

async fn open_service(config: &Config) -> Result<IndexService> {
    IndexService::open(config.clone(), AdapterFactory::new()).await
}

pub async fn run_init(config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let endpoints = service.endpoints().await?;
    println!("Index initialized at {}.", service.backend());
    println!("{} endpoint(s) registered.", endpoints.len());
    Ok(())
}

pub async fn run_endpoints(config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let endpoints = service.endpoints().await?;
    if endpoints.is_empty() {
        println!("No endpoints.");
        return Ok(());
    }
    println!("{:<16} {:<16} URL", "ENDPOINT", "PROTOCOL");
    for endpoint in endpoints {
        println!("{:<16} {:<16} {}", endpoint.name, endpoint.protocol, endpoint.url);
    }
    Ok(())
}

pub async fn run_endpoint_add(config: &Config, name: &str, spec: EndpointSpec) -> Result<()> {
    let service = open_service(config).await?;
    let endpoint = service.add_endpoint(name, spec).await?;
    println!("Endpoint {} added ({}).", endpoint.name, endpoint.protocol);
    Ok(())
}

pub async fn run_endpoint_remove(config: &Config, name: &str) -> Result<()> {
    let service = open_service(config).await?;
    service.remove_endpoint(name).await?;
    println!("Endpoint {} removed.", name);
    Ok(())
}

/// Scans one endpoint or `all`, then prints one summary line per task.
pub async fn run_scan(config: &Config, target: &str, mode: ProgressMode) -> Result<()> {
    let service = open_service(config).await?;
    let tasks = if target == "all" {
        service.scan_all().await?
    } else {
        vec![service.scan_endpoint(target).await?]
    };
    if tasks.is_empty() {
        println!("No endpoints to scan.");
        return Ok(());
    }

    let reporter = mode.reporter();
    let terminal = service
        .run_until_complete(&tasks, |event| reporter.report(event))
        .await?;
    service.shutdown();

    let mut failed = 0;
    for event in &terminal {
        print_summary(event);
        if event.kind != TaskEventKind::End {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} scan task(s) did not complete", failed);
    }
    Ok(())
}

fn print_summary(event: &TaskEvent) {
    match (&event.kind, &event.statistics) {
        (TaskEventKind::End, Some(stats)) => println!(
            "{}: {} added, {} changed, {} updated, {} removed, {} errors",
            event.endpoint,
            format_number(stats.added),
            format_number(stats.changed),
            format_number(stats.updated),
            format_number(stats.removed),
            format_number(stats.errors)
        ),
        (TaskEventKind::Fault, _) => println!("{}: worker fault", event.endpoint),
        _ => println!("{}: cancelled", event.endpoint),
    }
}

pub async fn run_check(config: &Config, name: &str) -> Result<()> {
    let service = open_service(config).await?;
    let task = service.check_endpoint(name).await?;
    let terminal = service.run_until_complete(&[task], |_| {}).await?;
    service.shutdown();
    match terminal.first() {
        Some(event) if event.statistics.is_some_and(|s| s.errors == 0) => {
            println!("{}: reachable", name);
            Ok(())
        }
        _ => bail!("{}: not reachable", name),
    }
}

pub struct ListOptions {
    pub filter: Option<String>,
    pub language: Option<String>,
    pub limit: usize,
    pub after: Option<String>,
    pub before: Option<String>,
}

pub async fn run_list(config: &Config, options: ListOptions) -> Result<()> {
    let token = |t: &str| {
        DocumentKey::from_token(t).ok_or_else(|| anyhow::anyhow!("invalid page token: {}", t))
    };
    let limit = options.limit.max(1);
    let cursor = match (&options.after, &options.before) {
        (Some(after), _) => Cursor::after(token(after)?, limit),
        (None, Some(before)) => Cursor::before(token(before)?, limit),
        (None, None) => Cursor::first(limit),
    };

    let service = open_service(config).await?;
    let page = service
        .get_documents(
            &cursor,
            options.filter.as_deref(),
            options.language.as_deref(),
        )
        .await?;

    if page.items.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:<16} {:<24} ID", "ENDPOINT", "ID SHORT");
    for d in &page.items {
        println!("{:<16} {:<24} {}", d.endpoint, d.id_short, d.id);
    }
    if let Some(previous) = &page.previous {
        println!("previous: {}", previous.to_token());
    }
    if let Some(next) = &page.next {
        println!("next: {}", next.to_token());
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str, endpoint: Option<&str>) -> Result<()> {
    let service = open_service(config).await?;
    let (descriptor, content) = service.get_document(endpoint, id).await?;

    println!("--- Document ---");
    println!("id:           {}", descriptor.id);
    println!("id_short:     {}", descriptor.id_short);
    println!("endpoint:     {}", descriptor.endpoint);
    println!("address:      {}", descriptor.address);
    println!("checksum:     {:08x}", descriptor.checksum);
    println!("validated:    {}", format_ts_iso(descriptor.timestamp));
    println!("readonly:     {}", descriptor.readonly);
    println!("online_ready: {}", descriptor.online_ready);
    if let Some(asset) = &descriptor.asset_id {
        println!("asset_id:     {}", asset);
    }
    if let Some(thumbnail) = &descriptor.thumbnail {
        println!("thumbnail:    {}", thumbnail);
    }
    println!();

    match content {
        Some(content) => {
            println!("--- Content ---");
            println!("{}", serde_json::to_string_pretty(&content)?);
        }
        None => println!("(content unavailable)"),
    }
    Ok(())
}

/// Runs the periodic scheduler until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let interval = config.scan.interval();
    eprintln!(
        "Watching {} endpoint(s) every {}s. Press Ctrl-C to stop.",
        service.endpoints().await?.len(),
        interval.as_secs()
    );
    service
        .run_scheduler(interval, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    service.shutdown();
    Ok(())
}

fn format_ts_iso(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
