//! Functional tests for gallery publishing, saving and custom model loading

use artgen_orchestrator::config::Settings;
use artgen_orchestrator::gallery::GalleryClient;
use artgen_orchestrator::models::{
    CustomModelConfig, CustomModelKind, ModerationStatus, PersistedImage, RequestFormat,
};
use artgen_orchestrator::response::base64;
use artgen_orchestrator::{AppError, GenerationRequest, GenerationSession, SessionEvent, StyleSelection};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn test_settings(server: &MockServer, auto_publish: bool) -> Settings {
    let mut settings = Settings::default();
    settings.providers.seeded_base_url = format!("{}/prompt", server.uri());
    settings.providers.huggingface_base_url = format!("{}/models", server.uri());
    settings.retry.backoff_base_ms = 1;
    settings.retry.max_jitter_ms = 0;
    settings.batch.stagger_ms = 0;
    settings.gallery.enabled = true;
    settings.gallery.auto_publish = auto_publish;
    settings.gallery.base_url = server.uri();
    settings.gallery.api_key = Some("gallery-key".to_string());
    settings.gallery.author_name = "Tester".to_string();
    settings
}

async fn mount_images(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/prompt/.+"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(base64::decode(PNG_BASE64).unwrap(), "image/png"),
        )
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, target: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == target)
        .collect()
}

/// Detached uploads finish on their own schedule
async fn wait_for_requests(server: &MockServer, target: &str, expected: usize) -> Vec<Request> {
    for _ in 0..100 {
        let requests = requests_to(server, target).await;
        if requests.len() >= expected {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    requests_to(server, target).await
}

#[tokio::test]
async fn test_successful_images_are_published() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/images"))
        .and(header("authorization", "Bearer gallery-key"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, true)).unwrap();
    let mut request = GenerationRequest::new("a koi pond", "flux");
    request.style = StyleSelection::named("Ukiyo-e");
    request.count = 2;
    session.generate(request).await.unwrap();

    let uploads = wait_for_requests(&server, "/api/images", 2).await;
    assert_eq!(uploads.len(), 2);

    let body: Value = serde_json::from_slice(&uploads[0].body).unwrap();
    assert_eq!(body["authorName"], "Tester");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["style"], "Ukiyo-e");
    assert_eq!(body["model"], "Flux");
    assert!(body["imageData"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_gallery_failure_does_not_fail_generation() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/images"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, true)).unwrap();
    let report = session
        .generate(GenerationRequest::new("a koi pond", "flux"))
        .await
        .unwrap();
    assert_eq!(report.images.len(), 1);

    // One attempt only, no retry
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(requests_to(&server, "/api/images").await.len(), 1);
}

#[tokio::test]
async fn test_publish_disabled_by_default() {
    let server = MockServer::start().await;
    mount_images(&server).await;

    let session = GenerationSession::new(&test_settings(&server, false)).unwrap();
    session
        .generate(GenerationRequest::new("a koi pond", "flux"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(requests_to(&server, "/api/images").await.is_empty());
}

#[tokio::test]
async fn test_upload_detached_reports_through_handle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/images"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = GalleryClient::new(&test_settings(&server, false).gallery).unwrap();
    let handle = client.upload_detached(PersistedImage {
        prompt: "a koi pond".to_string(),
        model: "Flux".to_string(),
        width: 1024,
        height: 1024,
        image_data: format!("data:image/png;base64,{}", PNG_BASE64),
        style: None,
        author_name: client.author_name().to_string(),
        status: ModerationStatus::Pending,
    });
    handle.await.unwrap();
}

#[tokio::test]
async fn test_save_image_posts_payload() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/saved-images"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, false)).unwrap();
    let report = session
        .generate(GenerationRequest::new("a koi pond", "flux"))
        .await
        .unwrap();
    let id = report.images[0].id.clone();

    session.save_image(&id).await.unwrap();

    let saved = requests_to(&server, "/api/saved-images").await;
    let body: Value = serde_json::from_slice(&saved[0].body).unwrap();
    assert_eq!(body["imageId"], json!(id));
    assert_eq!(body["width"], 1024);
}

#[tokio::test]
async fn test_concurrent_save_is_refused() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/saved-images"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .expect(2)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, false)).unwrap();
    let report = session
        .generate(GenerationRequest::new("a koi pond", "flux"))
        .await
        .unwrap();
    let id = report.images[0].id.clone();

    let (first, second) = tokio::join!(session.save_image(&id), session.save_image(&id));
    assert!(first.is_ok());
    assert!(matches!(second, Err(AppError::AlreadySaving(ref saving)) if *saving == id));

    // The guard is gone once the first save finished
    session.save_image(&id).await.unwrap();
}

#[tokio::test]
async fn test_failed_save_keeps_image() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/saved-images"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, false)).unwrap();
    let report = session
        .generate(GenerationRequest::new("a koi pond", "flux"))
        .await
        .unwrap();
    let id = report.images[0].id.clone();
    let mut events = session.subscribe();

    let err = session.save_image(&id).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    assert!(session.image(&id).is_some());
    match events.try_recv() {
        Ok(SessionEvent::SaveFailed { image_id, message }) => {
            assert_eq!(image_id, id);
            assert_eq!(
                message,
                "Could not save the image. Your generated images are unchanged."
            );
            assert!(!message.contains("generating"));
        }
        other => panic!("expected a save failure notice, got {other:?}"),
    }
}

#[tokio::test]
async fn test_custom_models_loaded_from_gallery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/custom-models"))
        .and(query_param("userId", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "hf1",
                "user_id": "u1",
                "name": "My SD",
                "model_type": "huggingface",
                "api_url": "org/sd-model"
            },
            {
                "id": "broken",
                "user_id": "u1",
                "name": "No key",
                "model_type": "custom_api",
                "api_url": "https://api.test/generate",
                "api_key": "  "
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let session = GenerationSession::new(&test_settings(&server, false)).unwrap();
    // Registered earlier with a key that has since been cleared
    session
        .register_custom_model(CustomModelConfig {
            id: "broken".to_string(),
            user_id: "u1".to_string(),
            name: "No key".to_string(),
            kind: CustomModelKind::CustomApi {
                api_url: "https://api.test/generate".to_string(),
                api_key: "old-key".to_string(),
            },
            request_format: RequestFormat::Standard,
        })
        .unwrap();

    let loaded = session.load_custom_models("u1").await.unwrap();
    assert_eq!(loaded, 1);

    let models = session.registry().list();
    let loaded_model = models.iter().find(|m| m.id == "custom-hf1").unwrap();
    assert_eq!(loaded_model.display_name, "My SD");
    assert_eq!(loaded_model.family, "huggingface");
    assert!(session.registry().resolve("custom-broken").is_err());
}

#[tokio::test]
async fn test_gallery_required_for_saving() {
    let server = MockServer::start().await;
    let mut settings = test_settings(&server, false);
    settings.gallery.enabled = false;
    let session = GenerationSession::new(&settings).unwrap();

    let err = session.save_image("anything").await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    assert!(session.publish_image("anything", None).is_err());
}
