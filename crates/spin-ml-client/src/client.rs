//! HTTP client for the inference service.

use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use spin_media::detection::{filter_vehicles, DEFAULT_CONFIDENCE_THRESHOLD};
use spin_media::{encode_image, BackgroundRemover, EncodeOptions, Frame, MediaError, MediaResult, VehicleDetector};
use spin_models::Detection;
use tracing::{debug, info_span, Instrument};

use crate::error::{MlClientError, MlClientResult};
use crate::retry::{with_retry, RetryConfig};
use crate::types::{DetectResponse, HealthResponse};

#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// e.g. `http://ml:8000`
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Boxes below this confidence are dropped client-side
    pub confidence_threshold: f64,
    pub retry: RetryConfig,
}

impl MlClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> MlClientResult<Self> {
        let base_url = std::env::var("ML_SERVICE_URL")
            .map_err(|_| MlClientError::config_error("ML_SERVICE_URL not set"))?;
        if base_url.is_empty() {
            return Err(MlClientError::config_error("ML_SERVICE_URL cannot be empty"));
        }

        let mut config = Self::new(base_url);
        if let Some(secs) = std::env::var("ML_SERVICE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = std::env::var("DETECTION_CONFIDENCE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.confidence_threshold = threshold;
        }
        config.retry = RetryConfig::from_env();
        Ok(config)
    }
}

#[derive(Clone)]
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
}

impl MlClient {
    pub fn new(config: MlClientConfig) -> MlClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .user_agent(concat!("spin-ml-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> MlClientResult<Self> {
        Self::new(MlClientConfig::from_env()?)
    }

    pub fn config(&self) -> &MlClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    pub async fn health(&self) -> MlClientResult<()> {
        let response = Self::check_status(self.http.get(self.url("/health")).send().await?).await?;
        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| MlClientError::invalid_response(e.to_string()))?;
        if health.status != "ok" {
            return Err(MlClientError::invalid_response(format!("status {}", health.status)));
        }
        Ok(())
    }

    /// Vehicle boxes for an encoded image, filtered and largest first.
    pub async fn detect_bytes(&self, bytes: &[u8], mime: &str) -> MlClientResult<Vec<Detection>> {
        let url = &self.url("/detect");
        let threshold = self.config.confidence_threshold;

        let parsed: DetectResponse = with_retry(&self.config.retry, "detect", move || async move {
            let response = self
                .http
                .post(url)
                .query(&[("confidence", threshold)])
                .multipart(image_form(bytes, mime)?)
                .send()
                .await?;
            Self::check_status(response)
                .await?
                .json::<DetectResponse>()
                .await
                .map_err(|e| MlClientError::invalid_response(e.to_string()))
        })
        .await?;

        let detections = parsed
            .detections
            .into_iter()
            .filter_map(|raw| raw.into_detection())
            .collect();
        Ok(filter_vehicles(detections, threshold))
    }

    /// Cut-out of an encoded image with an alpha channel.
    pub async fn remove_background_bytes(&self, bytes: &[u8], mime: &str) -> MlClientResult<RgbaImage> {
        let url = &self.url("/remove-background");

        let body = with_retry(&self.config.retry, "remove_background", move || async move {
            let response = self.http.post(url).multipart(image_form(bytes, mime)?).send().await?;
            Ok(Self::check_status(response).await?.bytes().await?)
        })
        .await?;

        Ok(image::load_from_memory(&body)?.to_rgba8())
    }

    async fn check_status(response: Response) -> MlClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MlClientError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn image_form(bytes: &[u8], mime: &str) -> MlClientResult<Form> {
    let extension = if mime == "image/png" { "png" } else { "jpg" };
    let part = Part::bytes(bytes.to_vec())
        .file_name(format!("frame.{}", extension))
        .mime_str(mime)?;
    Ok(Form::new().part("image", part))
}

fn to_media_error(e: MlClientError) -> MediaError {
    MediaError::detection_failed(e.to_string())
}

#[async_trait]
impl VehicleDetector for MlClient {
    fn name(&self) -> &'static str {
        "ml-service"
    }

    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>> {
        let bytes = encode_image(&frame.image, EncodeOptions::jpeg(90))?;
        let detections = self
            .detect_bytes(&bytes, "image/jpeg")
            .instrument(info_span!("ml_detect", frame = frame.index))
            .await
            .map_err(to_media_error)?;
        debug!(frame = frame.index, count = detections.len(), "Vehicle detection");
        Ok(detections)
    }
}

#[async_trait]
impl BackgroundRemover for MlClient {
    fn name(&self) -> &'static str {
        "ml-service"
    }

    async fn remove(&self, frame: &Frame) -> MediaResult<RgbaImage> {
        let bytes = encode_image(&frame.image, EncodeOptions::png())?;
        self.remove_background_bytes(&bytes, "image/png")
            .instrument(info_span!("ml_remove_background", frame = frame.index))
            .await
            .map_err(to_media_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MlClient {
        let mut config = MlClientConfig::new(server.uri());
        config.retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        MlClient::new(config).unwrap()
    }

    fn frame() -> Frame {
        Frame::new(3, RgbaImage::from_pixel(8, 6, Rgba([40, 80, 120, 255])))
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(MlClientConfig::new("http://ml:8000/").base_url, "http://ml:8000");
    }

    #[tokio::test]
    async fn test_detect_filters_and_sorts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .and(query_param("confidence", "0.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detections": [
                    {"bbox": [0, 0, 2, 2], "confidence": 0.9, "class_id": 2, "class_name": "car"},
                    {"bbox": [0, 0, 5, 5], "confidence": 0.8, "class_id": 7},
                    {"bbox": [0, 0, 6, 6], "confidence": 0.95, "class_id": 0, "class_name": "person"},
                    {"bbox": [0, 0, 8, 6], "confidence": 0.3, "class_id": 2, "class_name": "car"}
                ]
            })))
            .mount(&server)
            .await;

        let detections = client(&server).detect(&frame()).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_name, "truck");
        assert_eq!(detections[1].class_name, "car");

        let main = client(&server).main_detection(&frame()).await.unwrap();
        assert_eq!(main.unwrap().class_name, "truck");
    }

    #[tokio::test]
    async fn test_detect_server_error_after_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).detect(&frame()).await.unwrap_err();
        assert!(matches!(err, MediaError::DetectionFailed(_)));
        assert!(err.to_string().contains("model crashed"));
    }

    #[tokio::test]
    async fn test_remove_background_decodes_png() {
        let cutout = RgbaImage::from_pixel(8, 6, Rgba([40, 80, 120, 0]));
        let png = encode_image(&cutout, EncodeOptions::png()).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/remove-background"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
            .mount(&server)
            .await;

        let image = client(&server).remove(&frame()).await.unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(image.get_pixel(0, 0)[3], 0);
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;
        assert!(client(&server).health().await.is_ok());
    }
}
