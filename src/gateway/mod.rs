//! Gateway orchestration
//!
//! `ImageGateway::handle` is the single entry point for every HTTP request:
//!
//! 1. Parse `src`, `w`, `q` and negotiate the output format from `Accept`
//! 2. Canonicalize into a `TransformRequest` and its `CacheKey`
//! 3. Serve from the result cache when possible
//! 4. On a miss, check the source policy (403 before any network work)
//! 5. Compute through the cache so concurrent misses share one transform
//!
//! The source policy is swapped atomically on reload and the cache is
//! cleared at the same time, so a host removed from the allow-list stops
//! being served immediately.

pub mod response;

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheEntry, CacheOutcome, ResultCache};
use crate::config::{Config, ImagesConfig};
use crate::error::GatewayError;
use crate::fetch::HttpFetcher;
use crate::image::{AcceptedFormats, OutputFormat, StandardCodec};
use crate::metrics::{self, GatewayMetrics};
use crate::pipeline::{TransformPipeline, Transformer};
use crate::policy::SourcePolicy;
use crate::request::{Canonicalizer, RawImageRequest};

pub use response::{error_response, image_response, GatewayResponse};

/// The parts of an HTTP request the gateway looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub accept: Option<String>,
    pub if_none_match: Option<String>,
}

impl GatewayRequest {
    /// Convenience constructor for a GET of `path_and_query`
    pub fn get(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            query,
            ..Default::default()
        }
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }

    pub fn with_if_none_match(mut self, etag: &str) -> Self {
        self.if_none_match = Some(etag.to_string());
        self
    }
}

pub struct ImageGateway {
    policy: ArcSwap<SourcePolicy>,
    canonicalizer: Canonicalizer,
    formats: Vec<OutputFormat>,
    fallback_format: OutputFormat,
    cache: ResultCache,
    transformer: Arc<dyn Transformer>,
    started_at: Instant,
}

impl ImageGateway {
    pub fn new(
        policy: SourcePolicy,
        images: &ImagesConfig,
        cache: ResultCache,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            canonicalizer: Canonicalizer::new(images),
            formats: images.formats.clone(),
            fallback_format: images.fallback_format,
            cache,
            transformer,
            started_at: Instant::now(),
        }
    }

    /// Build the production gateway: HTTP fetcher, standard codec, pipeline
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let policy = SourcePolicy::from_config(&config.policy).map_err(|e| e.to_string())?;
        let fetcher = HttpFetcher::new().map_err(|e| e.to_string())?;
        let codec = StandardCodec::new(config.pipeline.avif_speed);
        let pipeline = TransformPipeline::new(
            Arc::new(fetcher),
            Arc::new(codec),
            config.pipeline.clone(),
        );

        Ok(Self::new(
            policy,
            &config.images,
            ResultCache::from_config(&config.cache),
            Arc::new(pipeline),
        ))
    }

    pub fn policy(&self) -> Arc<SourcePolicy> {
        self.policy.load_full()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Replace the source policy and drop every cached result, including
    /// results still being computed under the old policy
    pub fn reload_policy(&self, policy: SourcePolicy) {
        let patterns = policy.patterns().len();
        self.policy.store(Arc::new(policy));
        self.cache.clear();
        info!(patterns = patterns, "Source policy reloaded, result cache cleared");
    }

    pub async fn handle(&self, req: &GatewayRequest) -> GatewayResponse {
        let head = req.method.eq_ignore_ascii_case("HEAD");
        if !head && !req.method.eq_ignore_ascii_case("GET") {
            return GatewayResponse::json(
                405,
                serde_json::json!({
                    "error": "method_not_allowed",
                    "message": format!("Method {} not allowed", req.method),
                    "status": 405,
                }),
            )
            .with_header("Allow", "GET, HEAD");
        }

        let response = match req.path.as_str() {
            "/image" | "/_next/image" => self.handle_image(req).await,
            "/health" => self.handle_health(),
            "/metrics" => {
                self.cache.export_gauges();
                GatewayResponse::prometheus(metrics::render())
            }
            _ => GatewayResponse::json(
                404,
                serde_json::json!({
                    "error": "not_found",
                    "message": format!("No route for {}", req.path),
                    "status": 404,
                }),
            ),
        };

        if head {
            response.without_body()
        } else {
            response
        }
    }

    async fn handle_image(&self, req: &GatewayRequest) -> GatewayResponse {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let response = match self.serve_image(req).await {
            Ok(outcome) => {
                let entry = outcome.entry();
                info!(
                    request_id = %request_id,
                    key = %entry.key,
                    cache = outcome.label(),
                    format = %entry.format,
                    bytes = entry.byte_size(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Image served"
                );
                image_response(
                    entry,
                    outcome.label(),
                    self.cache.ttl(),
                    req.if_none_match.as_deref(),
                )
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    error = %e,
                    code = e.code(),
                    status = e.status(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Image request failed"
                );
                error_response(&e)
            }
        };

        GatewayMetrics::global().record_request(response.status);
        response.with_header("X-Request-Id", request_id)
    }

    async fn serve_image(&self, req: &GatewayRequest) -> Result<CacheOutcome, GatewayError> {
        let raw = RawImageRequest::from_query(req.query.as_deref().unwrap_or_default())?;
        let format = AcceptedFormats::parse(req.accept.as_deref())
            .negotiate(&self.formats, self.fallback_format);
        let (transform, key) = self.canonicalizer.canonicalize(&raw, format)?;

        if let Some(entry) = self.cache.get(&key) {
            return Ok(CacheOutcome::Hit(entry));
        }

        // Read before the policy: `reload_policy` swaps the policy first and
        // then clears, so a result admitted under a replaced policy is never
        // stored.
        let generation = self.cache.generation();
        self.policy
            .load()
            .validate(&transform.source)
            .map_err(GatewayError::SourceNotAllowed)?;

        let transformer = self.transformer.clone();
        self.cache
            .get_or_compute_at(key, generation, move || async move {
                let output = transformer.transform(&transform).await?;
                Ok(CacheEntry::new(key, output))
            })
            .await
    }

    fn handle_health(&self) -> GatewayResponse {
        let stats = self.cache.stats();
        GatewayResponse::json(
            200,
            serde_json::json!({
                "status": "healthy",
                "uptime_seconds": self.started_at.elapsed().as_secs(),
                "version": env!("CARGO_PKG_VERSION"),
                "cache": stats,
                "hit_rate": stats.hit_rate(),
                "in_flight": self.cache.in_flight_count(),
            }),
        )
    }
}
