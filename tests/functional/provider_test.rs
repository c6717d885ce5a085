//! Functional tests for built-in and custom providers against a mock upstream

use artgen_orchestrator::config::Settings;
use artgen_orchestrator::models::{CustomModelConfig, CustomModelKind, RequestFormat};
use artgen_orchestrator::response::base64;
use artgen_orchestrator::{
    AppError, ErrorCategory, GenerationRequest, GenerationSession, Seed, SessionEvent,
};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn png_bytes() -> Vec<u8> {
    base64::decode(PNG_BASE64).unwrap()
}

fn png_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(png_bytes(), "image/png")
}

fn test_settings(server: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.providers.seeded_base_url = format!("{}/prompt", server.uri());
    settings.providers.guided_base_url = format!("{}/imagine", server.uri());
    settings.providers.huggingface_base_url = format!("{}/models", server.uri());
    settings.retry.backoff_base_ms = 1;
    settings.retry.max_jitter_ms = 0;
    settings.batch.stagger_ms = 0;
    settings
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn custom_api(server: &MockServer, format: RequestFormat) -> CustomModelConfig {
    CustomModelConfig {
        id: "api1".to_string(),
        user_id: "u1".to_string(),
        name: "Studio API".to_string(),
        kind: CustomModelKind::CustomApi {
            api_url: format!("{}/custom/generate", server.uri()),
            api_key: "studio-key".to_string(),
        },
        request_format: format,
    }
}

#[tokio::test]
async fn test_seeded_provider_returns_binary_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/prompt/.+"))
        .and(query_param("model", "flux"))
        .and(query_param("seed", "7"))
        .and(query_param("width", "512"))
        .and(query_param("nologo", "true"))
        .respond_with(png_response())
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let mut request = GenerationRequest::new("a red fox", "flux");
    request.width = 512;
    request.height = 512;
    request.seed = Seed::Fixed(7);

    let report = session.generate(request).await.unwrap();
    assert_eq!(report.images.len(), 1);

    let image = &report.images[0];
    assert_eq!(image.model, "Flux");
    assert_eq!(image.seed, Some(7));
    assert_eq!(image.mime_type, "image/png");

    let blob = session.image_data(&image.id).unwrap();
    assert_eq!(blob.bytes.as_ref(), png_bytes().as_slice());
}

#[tokio::test]
async fn test_guided_provider_sends_guidance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/imagine/.+"))
        .and(query_param("model", "sdxl"))
        .and(query_param("guidance", "7.5"))
        .and(query_param("strength", "0.8"))
        .respond_with(png_response())
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let mut request = GenerationRequest::new("a harbor at night", "sdxl");
    request.negative_prompt = Some("blurry".to_string());

    let batch = session.begin(request).unwrap();
    assert!(batch.prompt().ends_with(", avoiding blurry"));
    let report = batch.run().await.unwrap();
    assert_eq!(report.images.len(), 1);
}

#[tokio::test]
async fn test_loading_model_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/org/sd-model"))
        .and(header("authorization", "Bearer hf-key"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({ "error": "Model is loading", "estimated_time": 19.2 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let model_id = session
        .register_custom_model(CustomModelConfig {
            id: "hf1".to_string(),
            user_id: "u1".to_string(),
            name: "My SD".to_string(),
            kind: CustomModelKind::HuggingFace {
                api_url: "org/sd-model".to_string(),
                api_key: Some("hf-key".to_string()),
            },
            request_format: RequestFormat::Standard,
        })
        .unwrap();
    assert_eq!(model_id, "custom-hf1");

    let mut events = session.subscribe();
    let err = session
        .generate(GenerationRequest::new("a castle", &model_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AllFailed { count: 1 }));

    let failure = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::ImageFailed {
                category, message, ..
            } => Some((category, message)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0, ErrorCategory::ServiceUnavailable);
    assert!(failure.1.contains("20 seconds"), "{}", failure.1);
}

#[tokio::test]
async fn test_negative_prompt_sent_as_separate_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom/generate"))
        .and(header("authorization", "Bearer studio-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "image": PNG_BASE64 })))
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let model_id = session
        .register_custom_model(custom_api(&server, RequestFormat::Standard))
        .unwrap();

    let mut request = GenerationRequest::new("a quiet library", &model_id);
    request.negative_prompt = Some("people".to_string());
    let batch = session.begin(request).unwrap();
    assert!(!batch.prompt().contains("avoiding"));
    let report = batch.run().await.unwrap();
    assert_eq!(report.images[0].negative_prompt.as_deref(), Some("people"));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["prompt"], "a quiet library");
    assert_eq!(body["inputs"], "a quiet library");
    assert_eq!(body["negative_prompt"], "people");
    assert_eq!(body["negativePrompt"], "people");
}

#[tokio::test]
async fn test_url_payload_is_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": format!("{}/files/out.png", server.uri()) }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/out.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let model_id = session
        .register_custom_model(custom_api(&server, RequestFormat::OpenAiCompatible))
        .unwrap();

    let report = session
        .generate(GenerationRequest::new("a glass city", &model_id))
        .await
        .unwrap();
    let blob = session.image_data(&report.images[0].id).unwrap();
    assert_eq!(blob.mime_type, "image/png");
    assert_eq!(blob.bytes.as_ref(), png_bytes().as_slice());
}

#[tokio::test]
async fn test_empty_body_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/prompt/.+"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/prompt/.+"))
        .respond_with(png_response())
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let report = session
        .generate(GenerationRequest::new("a paper boat", "flux"))
        .await
        .unwrap();
    assert_eq!(report.images.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_model_rejected_without_network() {
    let server = MockServer::start().await;
    let session = GenerationSession::new(&test_settings(&server)).unwrap();
    let mut events = session.subscribe();

    let err = session
        .generate(GenerationRequest::new("a red fox", "custom-missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownModel(_)));
    assert!(!session.is_generating());
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(matches!(
        drain(&mut events).as_slice(),
        [SessionEvent::Rejected { .. }]
    ));
}
