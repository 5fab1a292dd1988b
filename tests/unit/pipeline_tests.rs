// End-to-end transform tests through the gateway with the standard codec
// Sources are served from memory, so no network access is needed

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use imgate::cache::ResultCache;
use imgate::config::{ImagesConfig, PipelineConfig};
use imgate::fetch::{FetchError, SourceFetcher};
use imgate::gateway::{GatewayRequest, ImageGateway};
use imgate::image::StandardCodec;
use imgate::pipeline::TransformPipeline;
use imgate::policy::SourcePolicy;

/// Serves one fixed body for every URL and counts fetches
struct MemoryFetcher {
    body: Result<Bytes, FetchError>,
    fetches: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for MemoryFetcher {
    async fn fetch(&self, _url: &Url, _timeout: Duration, max_bytes: usize) -> Result<Bytes, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self.body.clone()?;
        if body.len() > max_bytes {
            return Err(FetchError::TooLarge {
                size: body.len() as u64,
                max_size: max_bytes as u64,
            });
        }
        Ok(body)
    }
}

fn png_source(width: u32, height: u32, alpha: u8) -> Bytes {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 240, alpha]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

fn gateway(fetcher: Arc<MemoryFetcher>, pipeline: PipelineConfig) -> ImageGateway {
    let policy = SourcePolicy::new(&["picsum.photos".to_string()], &["https".to_string()], &[])
        .unwrap();
    let transformer = TransformPipeline::new(fetcher, Arc::new(StandardCodec::new(10)), pipeline);

    ImageGateway::new(
        policy,
        &ImagesConfig::default(),
        ResultCache::new(16 * 1024 * 1024, 2, Duration::from_secs(300)),
        Arc::new(transformer),
    )
}

fn memory_fetcher(body: Result<Bytes, FetchError>) -> Arc<MemoryFetcher> {
    Arc::new(MemoryFetcher {
        body,
        fetches: AtomicUsize::new(0),
    })
}

fn request(w: &str) -> GatewayRequest {
    GatewayRequest::get(&format!(
        "/image?src=https%3A%2F%2Fpicsum.photos%2Fid%2F1%2F400%2F200&w={}",
        w
    ))
}

#[tokio::test]
async fn test_downscales_to_requested_width() {
    let fetcher = memory_fetcher(Ok(png_source(400, 200, 255)));
    let gateway = gateway(fetcher.clone(), PipelineConfig::default());

    let response = gateway.handle(&request("100")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("image/jpeg"));

    let decoded = image::load_from_memory(&response.body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 50));
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wider_request_keeps_source_size() {
    let fetcher = memory_fetcher(Ok(png_source(120, 80, 255)));
    let gateway = gateway(fetcher, PipelineConfig::default());

    let response = gateway.handle(&request("1920")).await;
    assert_eq!(response.status, 200);

    let decoded = image::load_from_memory(&response.body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (120, 80));
}

#[tokio::test]
async fn test_transparent_source_to_jpeg_is_flattened() {
    let fetcher = memory_fetcher(Ok(png_source(64, 64, 0)));
    let gateway = gateway(fetcher, PipelineConfig::default());

    let response = gateway.handle(&request("32")).await;
    assert_eq!(response.status, 200);

    let decoded = image::load_from_memory(&response.body).unwrap().to_rgb8();
    let pixel = decoded.get_pixel(16, 16);
    assert!(pixel.0.iter().all(|c| *c > 240), "expected white, got {:?}", pixel);
}

#[tokio::test]
async fn test_webp_output_is_riff_container() {
    let fetcher = memory_fetcher(Ok(png_source(200, 100, 255)));
    let gateway = gateway(fetcher, PipelineConfig::default());

    let response = gateway
        .handle(&request("64").with_accept("image/webp"))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("image/webp"));
    assert_eq!(&response.body[..4], b"RIFF");
    assert_eq!(&response.body[8..12], b"WEBP");
}

#[tokio::test]
async fn test_undecodable_source_is_codec_failure() {
    let fetcher = memory_fetcher(Ok(Bytes::from_static(b"<html>not an image</html>")));
    let gateway = gateway(fetcher, PipelineConfig::default());

    let response = gateway.handle(&request("64")).await;
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_oversized_source_is_bad_gateway() {
    let fetcher = memory_fetcher(Ok(png_source(200, 200, 255)));
    let config = PipelineConfig {
        max_source_bytes: 64,
        ..PipelineConfig::default()
    };
    let gateway = gateway(fetcher, config);

    let response = gateway.handle(&request("64")).await;
    assert_eq!(response.status, 502);
}

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let fetcher = memory_fetcher(Err(FetchError::NotFound));
    let gateway = gateway(fetcher, PipelineConfig::default());

    let response = gateway.handle(&request("64")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_pixel_limit_rejects_decompression_bomb() {
    let fetcher = memory_fetcher(Ok(png_source(300, 300, 255)));
    let config = PipelineConfig {
        max_source_pixels: 10_000,
        ..PipelineConfig::default()
    };
    let gateway = gateway(fetcher, config);

    let response = gateway.handle(&request("64")).await;
    assert_eq!(response.status, 500);
}
