use goose::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;

/// Load testing suite for the respimg variant server.
///
/// Traffic mix:
/// - Render planning (header read plus URL generation, no pixels)
/// - Variant requests at planned widths (cache hits after warmup)
/// - Variant requests at random widths (cache misses, resize throughput)
/// - Stale-version requests (301 back to the current version)
/// - Health monitoring
///
/// The server must have `LOADTEST_IMAGE` (default `sample`) in its source
/// directory.
///
/// # Usage
/// ```bash
/// cd loadtest
/// LOADTEST_IMAGE=sample cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// # Performance Targets
/// - Cache hits: <20ms p95 latency
/// - Cache misses: <200ms p95 latency (WebP) / <400ms (AVIF)
/// - Redirects: <10ms p95 latency
/// - Error rate: <1%

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ResponsivePage")
                // A page render followed by the browser fetching its variants
                .register_transaction(transaction!(render_and_fetch).set_weight(10)?)
                .register_transaction(transaction!(stale_version).set_weight(2)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("CachePerformance")
                .register_transaction(transaction!(cached_variant).set_weight(15)?)
                .register_transaction(transaction!(uncached_variant).set_weight(5)?),
        )
        .execute()
        .await?;

    Ok(())
}

fn image_name() -> String {
    std::env::var("LOADTEST_IMAGE").unwrap_or_else(|_| "sample".to_string())
}

/// Planned variant URLs for the test image.
async fn planned_urls(user: &mut GooseUser, widths: &str) -> Result<Vec<String>, Box<TransactionError>> {
    let goose = user
        .get(&format!("/render?file={}&widths={}", image_name(), widths))
        .await?;
    let mut urls = Vec::new();
    if let Ok(response) = goose.response {
        if let Ok(json) = response.json::<serde_json::Value>().await {
            if let Some(list) = json["urls"].as_array() {
                urls.extend(list.iter().filter_map(|u| u.as_str()).map(str::to_string));
            }
        }
    }
    Ok(urls)
}

/// Renders markup for a random layout and fetches one of its variants.
async fn render_and_fetch(user: &mut GooseUser) -> TransactionResult {
    let widths = {
        let mut rng = rand::thread_rng();
        *["full", "half", "third", "quarter", "two-thirds"].choose(&mut rng).unwrap_or(&"full")
    };
    let urls = planned_urls(user, widths).await?;
    let url = urls.choose(&mut rand::thread_rng()).cloned();
    if let Some(url) = url {
        let _goose = user.get(&url).await?;
    }
    Ok(())
}

/// Requests a fixed planned variant; every request after the first is a hit.
async fn cached_variant(user: &mut GooseUser) -> TransactionResult {
    let urls = planned_urls(user, "half").await?;
    if let Some(url) = urls.first() {
        let _goose = user.get(url).await?;
    }
    Ok(())
}

/// Rewrites a planned URL to a random width, forcing a resize.
async fn uncached_variant(user: &mut GooseUser) -> TransactionResult {
    let urls = planned_urls(user, "full").await?;
    let Some(url) = urls.first() else { return Ok(()) };
    let Some((head, tail)) = url.rsplit_once("-v") else { return Ok(()) };
    let Some((base, _)) = head.rsplit_once("-w") else { return Ok(()) };

    let width = rand::thread_rng().gen_range(100..1200);
    let _goose = user.get(&format!("{}-w{}-v{}", base, width, tail)).await?;
    Ok(())
}

/// An outdated version token; the server answers with a redirect.
async fn stale_version(user: &mut GooseUser) -> TransactionResult {
    let _goose = user
        .get(&format!("/img/{}-w400-v1.webp", image_name()))
        .await?;
    Ok(())
}

/// Monitors service availability via health check endpoint.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
