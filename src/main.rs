use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast;

use product_gallery::backends::http_fetcher::HttpImageFetcher;
use product_gallery::backends::open_food_facts::OpenFoodFactsLookup;
use product_gallery::backends::upcitemdb::UpcItemDbLookup;
use product_gallery::backends::wikimedia::WikimediaSearch;
use product_gallery::backends::{build_http_agent, ProductLookup};
use product_gallery::batch_scheduler::prescreen_batch;
use product_gallery::cache::{KeyValueStore, MemoryStore, SqliteStore, TtlCache};
use product_gallery::candidate_collector::CandidateCollector;
use product_gallery::config::{default_config_path, load_config, Config};
use product_gallery::errors::PipelineError;
use product_gallery::identifier;
use product_gallery::image_pipeline::SignatureDeduper;
use product_gallery::lookup_service::LookupService;
use product_gallery::protocol::{LookupResult, LookupSource, PipelineEvent};

const USAGE: &str = "usage:\n  product-gallery lookup <code>\n  product-gallery candidates <title> [code]";

fn log_level_from_env() -> log::LevelFilter {
    std::env::var("PRODUCT_GALLERY_LOG")
        .ok()
        .and_then(|value| value.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info)
}

fn describe_error(error: PipelineError) -> String {
    format!("{} ({})", error.user_message(), error)
}

fn open_cache_store(config: &Config) -> Arc<dyn KeyValueStore> {
    let opened = match &config.cache.db_path {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::new(),
    };
    match opened {
        Ok(store) => Arc::new(store),
        Err(error) => {
            warn!("Failed to open lookup cache, using memory: {}", error);
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_lookup_sources(config: &Config, agent: &ureq::Agent) -> Vec<Arc<dyn ProductLookup>> {
    if !config.lookup.enabled {
        return Vec::new();
    }
    config
        .lookup
        .sources
        .iter()
        .map(|source| -> Arc<dyn ProductLookup> {
            match source {
                LookupSource::DbA => Arc::new(OpenFoodFactsLookup::new(agent.clone())),
                LookupSource::DbB => Arc::new(UpcItemDbLookup::new(
                    agent.clone(),
                    config.lookup.upcitemdb_requests_per_minute,
                )),
            }
        })
        .collect()
}

async fn run_lookup(
    config: &Config,
    agent: &ureq::Agent,
    variants: &[String],
    bus: broadcast::Sender<PipelineEvent>,
) -> Option<LookupResult> {
    let cache = TtlCache::new(open_cache_store(config), config.cache.namespace.clone());
    let service = LookupService::new(
        build_lookup_sources(config, agent),
        cache,
        &config.lookup,
        bus,
    );
    service.lookup_variants(variants).await
}

fn print_lookup(result: &Option<LookupResult>) {
    match result {
        Some(result) => {
            println!("source:  {}", result.source.source_name());
            println!(
                "title:   {}",
                result.display_title().unwrap_or_else(|| "-".to_string())
            );
            for image in &result.images {
                println!("image:   {image}");
            }
        }
        None => println!("no product found"),
    }
}

async fn lookup_command(config: &Config, code: &str) -> Result<(), String> {
    let variants = identifier::normalize_variants(code);
    println!("variants: {}", variants.join(", "));
    let checksum_valid = variants
        .first()
        .is_some_and(|digits| identifier::has_valid_check_digit(digits));
    println!(
        "checksum: {}",
        if checksum_valid { "valid" } else { "invalid" }
    );
    let variants = identifier::validate_for_search(code).map_err(describe_error)?;

    let agent = build_http_agent(&config.http);
    let (bus, _) = broadcast::channel(64);
    let result = run_lookup(config, &agent, &variants, bus).await;
    print_lookup(&result);
    Ok(())
}

async fn candidates_command(config: &Config, title: &str, code: Option<&str>) -> Result<(), String> {
    let agent = build_http_agent(&config.http);
    let (bus, _) = broadcast::channel(64);

    let known_images = match code {
        Some(code) => {
            let variants = identifier::validate_for_search(code).map_err(describe_error)?;
            run_lookup(config, &agent, &variants, bus)
                .await
                .map(|result| result.images)
                .unwrap_or_default()
        }
        None => Vec::new(),
    };

    let collector = CandidateCollector::new(
        Arc::new(WikimediaSearch::new(agent.clone())),
        None,
        &config.pipeline,
    );
    let urls = collector.collect(title, &known_images).await;
    info!("Collected {} candidate URLs for '{}'", urls.len(), title);
    if urls.is_empty() {
        println!("no candidates; a manual upload would be required");
        return Ok(());
    }

    let fetcher = HttpImageFetcher::new(agent, config.http.max_image_bytes);
    let mut deduper = SignatureDeduper::new();
    let batch_size = config.pipeline.batch_size.max(1);
    for (batch_index, batch) in urls.chunks(batch_size).enumerate() {
        let results = prescreen_batch(
            &fetcher,
            &mut deduper,
            batch,
            batch_index * batch_size,
            config.pipeline.min_dimension_px,
        )
        .await;
        for (url, result) in results {
            match result {
                Ok(candidate) => println!("{url}\tok {}x{}", candidate.width, candidate.height),
                Err(reason) => println!("{url}\t{reason}"),
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log_level_from_env());
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(&default_config_path());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["lookup", code] => runtime.block_on(lookup_command(&config, code)),
        ["candidates", title] => runtime.block_on(candidates_command(&config, title, None)),
        ["candidates", title, code] => {
            runtime.block_on(candidates_command(&config, title, Some(*code)))
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(error) = result {
        log::error!("{}", error);
        std::process::exit(1);
    }
    Ok(())
}
