//! Transform pipeline: fetch → decode → resize → encode
//!
//! Fetching is I/O bound and runs outside the worker budget. Everything after
//! it is CPU bound, runs on the blocking pool, and needs a permit from the
//! worker semaphore. Work that cannot get a permit within `queue_timeout`
//! fails with `CapacityExceeded` instead of piling up.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::GatewayError;
use crate::fetch::SourceFetcher;
use crate::image::{resize, target_dimensions, Codec, OutputFormat};
use crate::metrics::GatewayMetrics;
use crate::request::TransformRequest;

/// Encoded result of one transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub data: Bytes,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Produces encoded bytes for a transform request
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, req: &TransformRequest) -> Result<TransformOutput, GatewayError>;
}

pub struct TransformPipeline {
    fetcher: Arc<dyn SourceFetcher>,
    codec: Arc<dyn Codec>,
    workers: Arc<Semaphore>,
    config: PipelineConfig,
}

impl TransformPipeline {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        codec: Arc<dyn Codec>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            codec,
            workers: Arc::new(Semaphore::new(config.max_concurrent_transforms.max(1))),
            config,
        }
    }

    /// Worker slots not currently in use
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    async fn run(&self, req: &TransformRequest) -> Result<TransformOutput, GatewayError> {
        let metrics = GatewayMetrics::global();

        let started = Instant::now();
        let source = self
            .fetcher
            .fetch(
                &req.source,
                self.config.fetch_timeout(),
                self.config.max_source_bytes,
            )
            .await
            .map_err(|e| e.into_gateway_error(&req.source))?;
        metrics.observe_stage("fetch", started.elapsed());
        metrics.source_bytes.inc_by(source.len() as u64);

        let queued = Instant::now();
        let permit = tokio::time::timeout(
            self.config.queue_timeout(),
            self.workers.clone().acquire_owned(),
        )
        .await
        .map_err(|_| GatewayError::CapacityExceeded {
            waited_ms: queued.elapsed().as_millis() as u64,
        })?
        .map_err(|_| GatewayError::internal("worker pool closed"))?;
        metrics.observe_stage("queue", queued.elapsed());

        let codec = self.codec.clone();
        let width = req.width.pixels();
        let format = req.format;
        let quality = req.quality;
        let max_pixels = self.config.max_source_pixels;

        let processing = Instant::now();
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process(codec.as_ref(), &source, width, format, quality, max_pixels)
        })
        .await
        .map_err(|e| GatewayError::internal(format!("transform task failed: {}", e)))??;
        metrics.observe_stage("process", processing.elapsed());

        Ok(output)
    }
}

#[async_trait]
impl Transformer for TransformPipeline {
    async fn transform(&self, req: &TransformRequest) -> Result<TransformOutput, GatewayError> {
        let metrics = GatewayMetrics::global();
        let result = self.run(req).await;

        match &result {
            Ok(output) => {
                metrics.record_transform(req.format.as_str(), "success");
                debug!(
                    source = %req.source,
                    format = %req.format,
                    width = output.width,
                    height = output.height,
                    bytes = output.data.len(),
                    "Transform complete"
                );
            }
            Err(e) => {
                metrics.record_transform(req.format.as_str(), e.code());
                warn!(source = %req.source, format = %req.format, error = %e, "Transform failed");
            }
        }
        result
    }
}

/// CPU-bound part of the pipeline. Runs on the blocking pool.
pub fn process(
    codec: &dyn Codec,
    source: &[u8],
    width: Option<u32>,
    format: OutputFormat,
    quality: u8,
    max_pixels: u64,
) -> Result<TransformOutput, GatewayError> {
    let (src_width, src_height) = codec.dimensions(source)?;
    if src_width as u64 * src_height as u64 > max_pixels {
        return Err(GatewayError::ImageTooLarge {
            width: src_width,
            height: src_height,
            max_pixels,
        });
    }

    let raster = codec.decode(source)?;
    let (out_width, out_height) = target_dimensions(raster.width, raster.height, width);
    let raster = resize(raster, out_width, out_height)?;
    let encoded = codec.encode(&raster, format, quality)?;

    Ok(TransformOutput {
        data: Bytes::from(encoded),
        format,
        width: out_width,
        height: out_height,
    })
}
