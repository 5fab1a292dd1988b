// Shipped configuration file tests

use imgate::config::{Config, LogFormat};
use imgate::gateway::{GatewayRequest, ImageGateway};
use imgate::image::OutputFormat;

const SHIPPED_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config.yaml");

#[test]
fn test_shipped_config_is_valid() {
    let config = Config::from_file(SHIPPED_CONFIG).expect("config.yaml loads");
    config.validate().expect("config.yaml validates");

    assert_eq!(config.server.port, 3000);
    assert_eq!(
        config.policy.domains,
        vec!["images.unsplash.com", "picsum.photos", "via.placeholder.com"]
    );
    assert_eq!(
        config.images.formats,
        vec![OutputFormat::WebP, OutputFormat::Avif]
    );
    assert_eq!(config.images.fallback_format, OutputFormat::Jpeg);
    assert_eq!(config.cache.max_size_bytes(), 512 * 1024 * 1024);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[tokio::test]
async fn test_gateway_builds_from_shipped_config() {
    let config = Config::from_file(SHIPPED_CONFIG).unwrap();
    let gateway = ImageGateway::from_config(&config).expect("gateway builds");

    assert_eq!(gateway.policy().patterns().len(), 3);

    // Refused before any fetch is attempted
    let response = gateway
        .handle(&GatewayRequest::get(
            "/image?src=https%3A%2F%2Fevil.example.com%2Fa.png&w=640",
        ))
        .await;
    assert_eq!(response.status, 403);

    let response = gateway
        .handle(&GatewayRequest::get(
            "/image?src=http%3A%2F%2Fpicsum.photos%2F200&w=640",
        ))
        .await;
    assert_eq!(response.status, 403, "plain http is not an allowed scheme");
}
