//! Gateway integration tests: start a real gateway against in-process fake
//! upstreams and drive it over HTTP.
//!
//! Run with: `cargo test -p voxrelay-gateway --test integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use voxrelay_core::config::Config;
use voxrelay_gateway::{router, start_gateway, GatewayState};
use voxrelay_media::{AudioClip, MediaError, SpeechToText, TextToSpeech};
use voxrelay_providers::{
    Credentials, GenerateRequest, Generation, LlmProvider, ModelApi, ModelInfo, ProviderError,
};

// ---------------------------------------------------------------------------
// Fake upstreams
// ---------------------------------------------------------------------------

/// Replies with "echo: <last user turn>" and counts calls.
#[derive(Default)]
struct EchoLlm {
    fail: bool,
    calls: AtomicUsize,
    last_turns: std::sync::Mutex<usize>,
}

#[async_trait]
impl LlmProvider for EchoLlm {
    fn id(&self) -> &str {
        "echo"
    }

    fn api(&self) -> ModelApi {
        ModelApi::GoogleGenerativeAi
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _credentials: &Credentials,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock().unwrap() = request.contents.len();
        if self.fail {
            return Err(ProviderError::Api {
                provider: "Gemini",
                status: 429,
                body: "quota exceeded".into(),
            });
        }
        let prompt = request.contents.last().map(|t| t.text.clone()).unwrap_or_default();
        Ok(Generation {
            text: format!("echo: {prompt}"),
            finish_reason: Some("STOP".into()),
            usage: None,
        })
    }

    async fn list_models(&self, _credentials: &Credentials) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(Vec::new())
    }
}

struct FakeStt {
    transcript: Option<String>,
    seen_mime: std::sync::Mutex<Option<String>>,
}

impl FakeStt {
    fn hearing(text: &str) -> Self {
        Self {
            transcript: Some(text.to_string()),
            seen_mime: Default::default(),
        }
    }

    fn broken() -> Self {
        Self {
            transcript: None,
            seen_mime: Default::default(),
        }
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    fn id(&self) -> &str {
        "fake-stt"
    }

    async fn transcribe(&self, clip: &AudioClip) -> Result<String, MediaError> {
        *self.seen_mime.lock().unwrap() = Some(clip.mime_type.clone());
        self.transcript.clone().ok_or(MediaError::Api {
            provider: "FakeStt",
            status: 500,
            body: "boom".into(),
        })
    }
}

struct FakeTts {
    fail: bool,
}

#[async_trait]
impl TextToSpeech for FakeTts {
    fn id(&self) -> &str {
        "fake-tts"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioClip, MediaError> {
        if self.fail {
            return Err(MediaError::Malformed("no audioContent".into()));
        }
        Ok(AudioClip::new(format!("MP3:{text}").into_bytes(), "audio/mpeg"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    llm: Arc<EchoLlm>,
    stt: Option<Arc<FakeStt>>,
    tts: Option<Arc<FakeTts>>,
    credentials: Option<Credentials>,
    config: Value,
    upload_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            llm: Arc::new(EchoLlm::default()),
            stt: Some(Arc::new(FakeStt::hearing("what time is it"))),
            tts: Some(Arc::new(FakeTts { fail: false })),
            credentials: Some(Credentials::api_key("test-key")),
            config: json!({}),
            upload_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn state(&self) -> Arc<GatewayState> {
        let mut config = self.config.clone();
        config["gateway"]["upload_dir"] = json!(self.upload_dir.path().to_string_lossy());
        config["gateway"]["ui"] = json!(false);
        let config: Config = serde_json::from_value(config).unwrap();

        Arc::new(GatewayState::new(
            Arc::new(config),
            self.llm.clone(),
            self.credentials.clone(),
            self.stt.clone().map(|s| s as Arc<dyn SpeechToText>),
            self.tts.clone().map(|t| t as Arc<dyn TextToSpeech>),
        ))
    }

    fn uploads_left(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a real gateway on a free port and return its base URL.
async fn spawn_gateway(state: Arc<GatewayState>, ui: bool) -> String {
    let port = find_free_port();
    tokio::spawn(async move {
        let _ = start_gateway(state, port, ui).await;
    });

    let base = format!("http://127.0.0.1:{port}");
    for _ in 0..50 {
        if reqwest::get(format!("{base}/health")).await.is_ok() {
            return base;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("gateway did not start on port {port}");
}

async fn post_json(state: Arc<GatewayState>, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn audio_form(speak: Option<&str>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(b"OggS fake opus".to_vec())
        .file_name("recording.webm")
        .mime_str("audio/webm;codecs=opus")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("audio", part);
    match speak {
        Some(flag) => form.text("speak", flag.to_string()),
        None => form,
    }
}

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new();
    let base = spawn_gateway(harness.state(), false).await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "gemini-1.5-flash");
    assert_eq!(body["stt"], "fake-stt");
    assert_eq!(body["tts"], "fake-tts");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_reports_disabled_speech() {
    let mut harness = Harness::new();
    harness.stt = None;
    harness.tts = None;
    let response = router(harness.state())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["stt"].is_null());
    assert!(body["tts"].is_null());
}

// ---------------------------------------------------------------------------
// /chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_text_only() {
    let harness = Harness::new();
    let (status, body) = post_json(harness.state(), "/chat", json!({"prompt": "hello"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "echo: hello");
    assert!(body.get("audio").is_none());
}

#[tokio::test]
async fn test_chat_with_speech() {
    let harness = Harness::new();
    let (status, body) = post_json(
        harness.state(),
        "/chat",
        json!({"prompt": "hi", "speak": true}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audio"]["mime_type"], "audio/mpeg");
    let expected = voxrelay_media::AudioClip::new(b"MP3:echo: hi".to_vec(), "audio/mpeg").to_base64();
    assert_eq!(body["audio"]["data"], expected);
}

#[tokio::test]
async fn test_chat_forwards_history() {
    let harness = Harness::new();
    let (status, _) = post_json(
        harness.state(),
        "/chat",
        json!({
            "prompt": "and now?",
            "history": [
                {"role": "user", "text": "hi"},
                {"role": "model", "text": "hello"}
            ]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(*harness.llm.last_turns.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_chat_blank_prompt_rejected() {
    let harness = Harness::new();
    let (status, body) = post_json(harness.state(), "/chat", json!({"prompt": "   "})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Prompt is required");
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_malformed_json_rejected() {
    let harness = Harness::new();
    let response = router(harness.state())
        .oneshot(
            Request::post("/chat")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_chat_generation_failure_hides_upstream_detail() {
    let mut harness = Harness::new();
    harness.llm = Arc::new(EchoLlm {
        fail: true,
        ..Default::default()
    });
    let (status, body) = post_json(harness.state(), "/chat", json!({"prompt": "hello"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to get response from Gemini");
    assert_eq!(body["stage"], "generate");
    assert!(!body.to_string().contains("quota"));
}

#[tokio::test]
async fn test_chat_without_api_key_is_unavailable() {
    let mut harness = Harness::new();
    harness.credentials = None;
    let (status, body) = post_json(harness.state(), "/chat", json!({"prompt": "hello"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["stage"], "generate");
}

#[tokio::test]
async fn test_chat_speak_without_tts_fails_before_generation() {
    let mut harness = Harness::new();
    harness.tts = None;
    let (status, body) = post_json(
        harness.state(),
        "/chat",
        json!({"prompt": "hello", "speak": true}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["stage"], "synthesize");
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_synthesis_failure() {
    let mut harness = Harness::new();
    harness.tts = Some(Arc::new(FakeTts { fail: true }));
    let (status, body) = post_json(
        harness.state(),
        "/chat",
        json!({"prompt": "hello", "speak": true}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to synthesize speech");
    assert_eq!(body["stage"], "synthesize");
}

// ---------------------------------------------------------------------------
// /voice-chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_voice_chat_full_round_trip() {
    let harness = Harness::new();
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["transcript"], "what time is it");
    assert_eq!(body["text"], "echo: what time is it");
    assert_eq!(body["audio"]["mime_type"], "audio/mpeg");

    let stt = harness.stt.as_ref().unwrap();
    assert_eq!(
        stt.seen_mime.lock().unwrap().as_deref(),
        Some("audio/webm;codecs=opus")
    );
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_voice_chat_without_speech() {
    let harness = Harness::new();
    let base = spawn_gateway(harness.state(), false).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(Some("false")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["text"], "echo: what time is it");
    assert!(body.get("audio").is_none());
}

#[tokio::test]
async fn test_voice_chat_missing_audio() {
    let harness = Harness::new();
    let base = spawn_gateway(harness.state(), false).await;

    let form = reqwest::multipart::Form::new().text("speak", "true");
    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stage"], "upload");
}

#[tokio::test]
async fn test_voice_chat_not_multipart() {
    let harness = Harness::new();
    let (status, body) = post_json(harness.state(), "/voice-chat", json!({"audio": "x"})).await;
    assert!(status.is_client_error());
    assert_eq!(body["stage"], "upload");
}

#[tokio::test]
async fn test_voice_chat_silence() {
    let mut harness = Harness::new();
    harness.stt = Some(Arc::new(FakeStt::hearing("  ")));
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No speech detected");
    assert_eq!(body["stage"], "transcribe");
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_voice_chat_transcription_failure_cleans_up() {
    let mut harness = Harness::new();
    harness.stt = Some(Arc::new(FakeStt::broken()));
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Failed to transcribe audio");
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_voice_chat_without_stt() {
    let mut harness = Harness::new();
    harness.stt = None;
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_voice_chat_speak_without_tts_fails_before_transcription() {
    let mut harness = Harness::new();
    harness.tts = None;
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stage"], "synthesize");
    assert!(harness.stt.as_ref().unwrap().seen_mime.lock().unwrap().is_none());
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_voice_chat_generation_failure_cleans_up() {
    let mut harness = Harness::new();
    harness.llm = Arc::new(EchoLlm {
        fail: true,
        ..Default::default()
    });
    let base = spawn_gateway(harness.state(), false).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/voice-chat"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Failed to get response from Gemini");
    assert_eq!(body["stage"], "generate");
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_voice_chat_upload_over_limit() {
    let mut harness = Harness::new();
    harness.config = json!({ "gateway": { "max_upload_bytes": 1024 } });

    let boundary = "voxrelay-boundary";
    let mut body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"audio\"; filename=\"long.webm\"\r\n\
         Content-Type: audio/webm\r\n\r\n"
    )
    .into_bytes();
    body.extend(std::iter::repeat(b'A').take(8 * 1024));
    body.extend(format!("\r\n--{boundary}--\r\n").into_bytes());

    let response = router(harness.state())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/voice-chat")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["stage"], "upload");
    assert!(harness.stt.as_ref().unwrap().seen_mime.lock().unwrap().is_none());
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.uploads_left(), 0);
}

// ---------------------------------------------------------------------------
// /speak and /transcribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_speak() {
    let harness = Harness::new();
    let (status, body) = post_json(harness.state(), "/speak", json!({"text": "read this"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audio"]["mime_type"], "audio/mpeg");
}

#[tokio::test]
async fn test_speak_blank_text() {
    let harness = Harness::new();
    let (status, body) = post_json(harness.state(), "/speak", json!({"text": ""})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Text is required");
}

#[tokio::test]
async fn test_transcribe_returns_empty_transcript() {
    let mut harness = Harness::new();
    harness.stt = Some(Arc::new(FakeStt::hearing("")));
    let base = spawn_gateway(harness.state(), false).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{base}/transcribe"))
        .multipart(audio_form(None))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["transcript"], "");
}

// ---------------------------------------------------------------------------
// Rate limiting and UI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rate_limit_over_http() {
    let mut harness = Harness::new();
    harness.config = json!({"gateway": {"rate_limit": {"max_requests_per_minute": 2}}});
    let base = spawn_gateway(harness.state(), false).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = client
            .post(format!("{base}/chat"))
            .json(&json!({"prompt": "hi"}))
            .send()
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    // Health is never limited.
    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn test_ui_served_when_enabled() {
    let harness = Harness::new();
    let base = spawn_gateway(harness.state(), true).await;

    let response = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let html = response.text().await.unwrap();
    assert!(html.contains("<html"));
}

#[tokio::test]
async fn test_cors_preflight() {
    let harness = Harness::new();
    let response = router(harness.state())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/chat")
                .header("origin", "http://localhost:3000")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().contains_key("access-control-allow-origin"));
}
