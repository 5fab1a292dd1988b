// Gateway request handling tests
// Exercise ImageGateway::handle end to end with an in-memory transformer

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use imgate::cache::ResultCache;
use imgate::config::ImagesConfig;
use imgate::error::GatewayError;
use imgate::gateway::{GatewayRequest, ImageGateway};
use imgate::pipeline::{TransformOutput, Transformer};
use imgate::policy::SourcePolicy;
use imgate::request::TransformRequest;

const UNSPLASH: &str = "https%3A%2F%2Fimages.unsplash.com%2Fphoto-1.jpg";
const PICSUM: &str = "https%3A%2F%2Fpicsum.photos%2F800";

/// Transformer that echoes the request and counts invocations
struct CountingTransformer {
    calls: AtomicUsize,
    delay: Duration,
    fail_with: Option<GatewayError>,
}

impl CountingTransformer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_with: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn failing(error: GatewayError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for CountingTransformer {
    async fn transform(&self, req: &TransformRequest) -> Result<TransformOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        Ok(TransformOutput {
            data: Bytes::from(format!("{}|{}|q{}", req.source, req.format, req.quality)),
            format: req.format,
            width: req.width.pixels().unwrap_or(800),
            height: 10,
        })
    }
}

fn policy(domains: &[&str]) -> SourcePolicy {
    let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    SourcePolicy::new(&domains, &["https".to_string()], &[]).unwrap()
}

fn gateway_with(transformer: Arc<CountingTransformer>) -> ImageGateway {
    ImageGateway::new(
        policy(&["images.unsplash.com", "*.picsum.photos", "picsum.photos"]),
        &ImagesConfig::default(),
        ResultCache::new(64 * 1024 * 1024, 4, Duration::from_secs(3600)),
        transformer,
    )
}

fn image_path(src: &str, extra: &str) -> String {
    format!("/image?src={}{}", src, extra)
}

fn json_body(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).expect("response body is JSON")
}

#[tokio::test]
async fn test_miss_then_hit_serves_identical_bytes() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());
    let req = GatewayRequest::get(&image_path(UNSPLASH, "&w=640&q=80")).with_accept("image/webp");

    let first = gateway.handle(&req).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(first.header("Content-Type"), Some("image/webp"));
    assert_eq!(first.header("Vary"), Some("Accept"));
    assert_eq!(
        first.header("Cache-Control"),
        Some("public, max-age=3600")
    );
    assert!(first.header("ETag").is_some());
    assert!(first.header("X-Request-Id").is_some());

    let second = gateway.handle(&req).await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(second.body, first.body);
    assert_eq!(second.header("ETag"), first.header("ETag"));
    assert_ne!(second.header("X-Request-Id"), first.header("X-Request-Id"));

    assert_eq!(transformer.calls(), 1);
}

#[tokio::test]
async fn test_equivalent_sources_share_one_entry() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());

    // Same image: tracking params stripped, fragment dropped, query sorted
    let a = "https%3A%2F%2Fimages.unsplash.com%2Fp.jpg%3Fb%3D2%26a%3D1";
    let b = "https%3A%2F%2Fimages.unsplash.com%2Fp.jpg%3Fa%3D1%26utm_source%3Dx%26b%3D2%23top";

    let first = gateway
        .handle(&GatewayRequest::get(&image_path(a, "&w=640")).with_accept("image/webp"))
        .await;
    let second = gateway
        .handle(&GatewayRequest::get(&image_path(b, "&w=640")).with_accept("image/webp"))
        .await;

    assert_eq!(first.status, 200);
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(transformer.calls(), 1);
}

#[tokio::test]
async fn test_widths_on_the_same_step_share_one_entry() {
    let transformer = Arc::new(CountingTransformer::new());
    let images = ImagesConfig {
        allowed_widths: vec![320, 640, 750],
        ..ImagesConfig::default()
    };
    let gateway = ImageGateway::new(
        policy(&["images.unsplash.com"]),
        &images,
        ResultCache::new(1024 * 1024, 1, Duration::from_secs(60)),
        transformer.clone(),
    );

    for w in ["630", "640", "645"] {
        let response = gateway
            .handle(&GatewayRequest::get(&image_path(UNSPLASH, &format!("&w={}", w))))
            .await;
        assert_eq!(response.status, 200);
    }

    assert_eq!(transformer.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_transform_once() {
    let transformer = Arc::new(CountingTransformer::slow(Duration::from_millis(50)));
    let gateway = Arc::new(gateway_with(transformer.clone()));
    let req = GatewayRequest::get(&image_path(PICSUM, "&w=256")).with_accept("image/avif");

    let responses = futures::future::join_all((0..16).map(|_| {
        let gateway = gateway.clone();
        let req = req.clone();
        async move { gateway.handle(&req).await }
    }))
    .await;

    assert_eq!(transformer.calls(), 1);

    let misses = responses
        .iter()
        .filter(|r| r.header("X-Cache") == Some("MISS"))
        .count();
    let coalesced = responses
        .iter()
        .filter(|r| r.header("X-Cache") == Some("COALESCED"))
        .count();
    assert_eq!(misses, 1);
    assert_eq!(coalesced, 15);

    let body = &responses[0].body;
    assert!(responses.iter().all(|r| r.status == 200 && &r.body == body));
}

#[tokio::test]
async fn test_disallowed_host_is_forbidden_without_transform() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());

    let response = gateway
        .handle(&GatewayRequest::get(
            "/image?src=https%3A%2F%2Fevil.example.com%2Fa.png&w=64",
        ))
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(json_body(&response.body)["error"], "source_not_allowed");
    assert!(response.header("X-Request-Id").is_some());
    assert_eq!(transformer.calls(), 0);
}

#[tokio::test]
async fn test_wildcard_matches_single_label_only() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());

    let one_label = gateway
        .handle(&GatewayRequest::get(
            "/image?src=https%3A%2F%2Fcdn.picsum.photos%2Fa.jpg",
        ))
        .await;
    let two_labels = gateway
        .handle(&GatewayRequest::get(
            "/image?src=https%3A%2F%2Fa.b.picsum.photos%2Fa.jpg",
        ))
        .await;

    assert_eq!(one_label.status, 200);
    assert_eq!(two_labels.status, 403);
}

#[tokio::test]
async fn test_private_address_is_forbidden() {
    let transformer = Arc::new(CountingTransformer::new());
    // Allow-listed by name, still blocked by address
    let gateway = ImageGateway::new(
        policy(&["127.0.0.1", "169.254.169.254", "::1"]),
        &ImagesConfig::default(),
        ResultCache::new(1024 * 1024, 1, Duration::from_secs(60)),
        transformer.clone(),
    );

    for src in [
        "https%3A%2F%2F127.0.0.1%2Fa.png",
        "https%3A%2F%2F169.254.169.254%2Flatest",
        "https%3A%2F%2F%5B%3A%3A1%5D%2Fa.png",
    ] {
        let response = gateway.handle(&GatewayRequest::get(&image_path(src, ""))).await;
        assert_eq!(response.status, 403, "{} should be forbidden", src);
    }
    assert_eq!(transformer.calls(), 0);
}

#[tokio::test]
async fn test_invalid_parameters_are_bad_requests() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());

    for path in [
        "/image".to_string(),
        "/image?w=64".to_string(),
        "/image?src=".to_string(),
        "/image?src=%2Frelative%2Fpath.png".to_string(),
        image_path(UNSPLASH, "&w=0"),
        image_path(UNSPLASH, "&w=abc"),
        image_path(UNSPLASH, "&q=high"),
    ] {
        let response = gateway.handle(&GatewayRequest::get(&path)).await;
        assert_eq!(response.status, 400, "{} should be rejected", path);
        assert_eq!(json_body(&response.body)["error"], "invalid_parameter");
    }
    assert_eq!(transformer.calls(), 0);
}

#[tokio::test]
async fn test_out_of_range_quality_is_clamped() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());

    let high = gateway
        .handle(&GatewayRequest::get(&image_path(UNSPLASH, "&q=500")))
        .await;
    let max = gateway
        .handle(&GatewayRequest::get(&image_path(UNSPLASH, "&q=100")))
        .await;

    assert_eq!(high.status, 200);
    assert!(String::from_utf8_lossy(&high.body).ends_with("|q100"));
    assert_eq!(max.header("X-Cache"), Some("HIT"));
}

#[tokio::test]
async fn test_format_negotiation_selects_variant() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());
    let path = image_path(UNSPLASH, "&w=640");

    let cases = [
        (Some("image/avif,image/webp,*/*;q=0.8"), "image/avif"),
        (Some("image/webp"), "image/webp"),
        (Some("image/webp,image/*;q=0"), "image/webp"),
        (Some("text/html"), "image/jpeg"),
        (None, "image/jpeg"),
    ];

    for (accept, expected) in cases {
        let mut req = GatewayRequest::get(&path);
        if let Some(accept) = accept {
            req = req.with_accept(accept);
        }
        let response = gateway.handle(&req).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some(expected), "{:?}", accept);
    }

    // avif, webp and jpeg variants, each transformed once
    assert_eq!(transformer.calls(), 3);
}

#[tokio::test]
async fn test_if_none_match_returns_not_modified() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());
    let req = GatewayRequest::get(&image_path(UNSPLASH, "&w=320"));

    let first = gateway.handle(&req).await;
    let etag = first.header("ETag").unwrap().to_string();

    let revalidated = gateway.handle(&req.clone().with_if_none_match(&etag)).await;
    assert_eq!(revalidated.status, 304);
    assert!(revalidated.body.is_empty());
    assert_eq!(revalidated.header("ETag"), Some(etag.as_str()));

    let stale = gateway
        .handle(&req.with_if_none_match("\"0000\""))
        .await;
    assert_eq!(stale.status, 200);
}

#[tokio::test]
async fn test_transform_failure_is_not_cached() {
    let transformer = Arc::new(CountingTransformer::failing(GatewayError::SourceNotFound {
        url: "https://images.unsplash.com/photo-1.jpg".to_string(),
    }));
    let gateway = gateway_with(transformer.clone());
    let req = GatewayRequest::get(&image_path(UNSPLASH, ""));

    let first = gateway.handle(&req).await;
    let second = gateway.handle(&req).await;

    assert_eq!(first.status, 404);
    assert_eq!(second.status, 404);
    assert_eq!(json_body(&first.body)["error"], "source_not_found");
    assert_eq!(transformer.calls(), 2);
    assert_eq!(gateway.cache().resident_bytes(), 0);
}

#[tokio::test]
async fn test_capacity_error_carries_retry_after() {
    let transformer = Arc::new(CountingTransformer::failing(
        GatewayError::CapacityExceeded { waited_ms: 5000 },
    ));
    let gateway = gateway_with(transformer);

    let response = gateway
        .handle(&GatewayRequest::get(&image_path(UNSPLASH, "")))
        .await;

    assert_eq!(response.status, 503);
    assert_eq!(response.header("Retry-After"), Some("5"));
    assert_eq!(json_body(&response.body)["retryable"], true);
}

#[tokio::test]
async fn test_reload_policy_narrows_allow_list_and_clears_cache() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer.clone());
    let picsum = GatewayRequest::get(&image_path(PICSUM, "&w=128"));

    assert_eq!(gateway.handle(&picsum).await.status, 200);
    assert!(gateway.cache().resident_bytes() > 0);

    gateway.reload_policy(policy(&["images.unsplash.com"]));
    assert_eq!(gateway.cache().resident_bytes(), 0);

    let response = gateway.handle(&picsum).await;
    assert_eq!(response.status, 403);
    assert_eq!(transformer.calls(), 1);

    let unsplash = gateway
        .handle(&GatewayRequest::get(&image_path(UNSPLASH, "")))
        .await;
    assert_eq!(unsplash.status, 200);
}

#[tokio::test]
async fn test_reload_during_transform_does_not_cache_old_result() {
    let transformer = Arc::new(CountingTransformer::slow(Duration::from_millis(200)));
    let gateway = Arc::new(gateway_with(transformer.clone()));
    let picsum = GatewayRequest::get(&image_path(PICSUM, "&w=128"));

    let in_progress = {
        let gateway = gateway.clone();
        let picsum = picsum.clone();
        tokio::spawn(async move { gateway.handle(&picsum).await })
    };
    while gateway.cache().in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    gateway.reload_policy(policy(&["images.unsplash.com"]));

    // Admitted before the reload, so it still completes
    let first = in_progress.await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(gateway.cache().resident_bytes(), 0);

    let second = gateway.handle(&picsum).await;
    assert_eq!(second.status, 403);
    assert_eq!(transformer.calls(), 1);
}

#[tokio::test]
async fn test_next_image_path_alias() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer);

    let response = gateway
        .handle(&GatewayRequest::get(&format!(
            "/_next/image?url={}&w=640&q=75",
            UNSPLASH
        )))
        .await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_head_keeps_headers_without_body() {
    let transformer = Arc::new(CountingTransformer::new());
    let gateway = gateway_with(transformer);

    let mut req = GatewayRequest::get(&image_path(UNSPLASH, "&w=64"));
    req.method = "HEAD".to_string();
    let response = gateway.handle(&req).await;

    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert!(response.header("Content-Length").is_some());
    assert!(response.header("ETag").is_some());
}

#[tokio::test]
async fn test_unsupported_method_and_unknown_path() {
    let gateway = gateway_with(Arc::new(CountingTransformer::new()));

    let mut post = GatewayRequest::get(&image_path(UNSPLASH, ""));
    post.method = "POST".to_string();
    let response = gateway.handle(&post).await;
    assert_eq!(response.status, 405);
    assert_eq!(response.header("Allow"), Some("GET, HEAD"));

    let response = gateway.handle(&GatewayRequest::get("/nope")).await;
    assert_eq!(response.status, 404);
    assert_eq!(json_body(&response.body)["error"], "not_found");
}

#[tokio::test]
async fn test_health_reports_cache_stats() {
    let gateway = gateway_with(Arc::new(CountingTransformer::new()));
    let req = GatewayRequest::get(&image_path(UNSPLASH, ""));
    gateway.handle(&req).await;
    gateway.handle(&req).await;

    let response = gateway.handle(&GatewayRequest::get("/health")).await;
    assert_eq!(response.status, 200);

    let body = json_body(&response.body);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"]["hits"], 1);
    assert_eq!(body["cache"]["computations"], 1);
    assert_eq!(body["cache"]["current_item_count"], 1);
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_prometheus_text() {
    let gateway = gateway_with(Arc::new(CountingTransformer::new()));
    gateway
        .handle(&GatewayRequest::get(&image_path(UNSPLASH, "")))
        .await;

    let response = gateway.handle(&GatewayRequest::get("/metrics")).await;
    assert_eq!(response.status, 200);
    assert!(response
        .header("Content-Type")
        .is_some_and(|ct| ct.starts_with("text/plain")));

    let text = String::from_utf8_lossy(&response.body);
    assert!(text.contains("imgate_requests_total"));
    assert!(text.contains("imgate_cache_entries"));
}
