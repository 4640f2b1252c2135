//! Client for OpenAI-compatible chat-completion providers.
//!
//! One logical call to [`CompletionClient::generate_document`] may issue
//! several HTTP attempts: retryable failures (network, 5xx, 429/409) are
//! retried with exponential backoff, honoring `retry-after`. Everything else,
//! including output that fails schema validation, is returned immediately.

pub mod dto;
pub mod error;
pub mod retry;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::models::npc::PromptModel;
use crate::services::prompt::{self, DocumentPayload};

pub use dto::{ChatCompletion, ChatMessage, ModelParams, ResponseFormat};
pub use error::{CompletionError, CompletionErrorKind};
pub use transport::{CompletionTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse};

use dto::{ChatRequest, ProviderReply};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection and retry settings for the provider.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub default_params: ModelParams,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Cap on the wait between attempts. A `retry-after` above it is not honored;
    /// the error is returned instead.
    pub max_backoff: Duration,
    /// Attribution headers (`HTTP-Referer`, `X-Title`).
    pub referer: Option<String>,
    pub title: Option<String>,
}

impl CompletionConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_params: ModelParams::default(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_backoff: DEFAULT_MAX_BACKOFF,
            referer: None,
            title: None,
        }
    }
}

/// Per-call overrides for [`CompletionClient::generate_document`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub params: Option<ModelParams>,
    pub cancel: Option<CancellationToken>,
}

pub struct CompletionClient {
    config: CompletionConfig,
    transport: Arc<dyn CompletionTransport>,
}

impl CompletionClient {
    pub fn new(
        config: CompletionConfig,
        transport: Arc<dyn CompletionTransport>,
    ) -> Result<Self, CompletionError> {
        if config.api_key.trim().is_empty() {
            return Err(CompletionError::new(
                CompletionErrorKind::Config,
                "AI provider API key is not configured",
            ));
        }
        if config.endpoint.trim().is_empty() {
            return Err(CompletionError::new(
                CompletionErrorKind::Config,
                "AI provider endpoint is not configured",
            ));
        }
        Ok(Self { config, transport })
    }

    /// Client over the production `reqwest` transport.
    pub fn with_reqwest(config: CompletionConfig) -> Result<Self, CompletionError> {
        Self::new(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Generate the NPC XML document for `model`.
    ///
    /// Requests schema-constrained JSON first; if the provider rejects that
    /// mode, repeats the call with the schema inlined in the prompt and pulls
    /// the first JSON object out of the free-form reply.
    #[instrument(skip(self, model, options), fields(npc = %model.name))]
    pub async fn generate_document(
        &self,
        model: &PromptModel,
        options: &GenerateOptions,
    ) -> Result<String, CompletionError> {
        let messages = prompt::build_messages(model);
        let format = prompt::response_format();
        let model_name = options.model.as_deref();
        let params = options.params.as_ref();
        let cancel = options.cancel.as_ref();

        match self
            .complete_raw(&messages, model_name, params, Some(&format), cancel)
            .await
        {
            Ok(completion) => parse_document(completion_text(&completion)?),
            Err(err) if err.mentions_schema_mode() => {
                warn!(error = %err, "Provider rejected structured output, retrying with inline schema");

                let mut fallback = messages;
                fallback.insert(1, ChatMessage::system(prompt::fallback_instruction()));
                let completion = self
                    .complete_raw(&fallback, model_name, params, None, cancel)
                    .await?;
                let text = completion_text(&completion)?;
                let block = prompt::extract_json_block(text).ok_or_else(|| {
                    CompletionError::validation("completion text contains no JSON object")
                })?;
                parse_document(block)
            }
            Err(err) => Err(err),
        }
    }

    /// Send one chat completion, with transport retries.
    pub async fn complete_raw(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        params: Option<&ModelParams>,
        response_format: Option<&ResponseFormat>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatCompletion, CompletionError> {
        if messages.is_empty() {
            return Err(CompletionError::bad_request("messages must not be empty"));
        }
        if let Some(i) = messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(CompletionError::bad_request(format!(
                "message {i} has empty content"
            )));
        }

        let model = model.unwrap_or(&self.config.model);
        if model.trim().is_empty() {
            return Err(CompletionError::new(
                CompletionErrorKind::Config,
                "no model configured",
            ));
        }

        let params = params
            .cloned()
            .unwrap_or_default()
            .merged_over(&self.config.default_params);
        let request = self.build_request(ChatRequest {
            model,
            messages,
            response_format,
            params,
        })?;

        self.send_with_retry(&request, cancel).await
    }

    fn build_request(&self, body: ChatRequest<'_>) -> Result<TransportRequest, CompletionError> {
        let body = serde_json::to_value(&body)
            .map_err(|e| CompletionError::bad_request(format!("failed to encode request: {e}")))?;

        let mut headers = vec![(
            "authorization".to_string(),
            format!("Bearer {}", self.config.api_key),
        )];
        if let Some(referer) = &self.config.referer {
            headers.push(("http-referer".to_string(), referer.clone()));
        }
        if let Some(title) = &self.config.title {
            headers.push(("x-title".to_string(), title.clone()));
        }

        Ok(TransportRequest {
            url: self.config.endpoint.clone(),
            headers,
            body,
        })
    }

    async fn send_with_retry(
        &self,
        request: &TransportRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatCompletion, CompletionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(request, cancel).await {
                Ok(completion) => {
                    debug!(
                        attempt,
                        completion_id = completion.id.as_deref().unwrap_or(""),
                        "Completion received"
                    );
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let Some(delay) = retry::backoff_delay(
                        self.config.backoff_base,
                        attempt,
                        err.retry_after,
                        self.config.max_backoff,
                    ) else {
                        warn!(
                            retry_after_ms = err.retry_after.map(|d| d.as_millis() as u64),
                            max_backoff_ms = self.config.max_backoff.as_millis() as u64,
                            kind = %err.kind,
                            "Provider asked to wait longer than the backoff cap, giving up"
                        );
                        return Err(err);
                    };
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        kind = %err.kind,
                        error = %err.message,
                        "Retrying completion request"
                    );
                    metrics::counter!("completion_retries_total").increment(1);

                    match cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => return Err(CompletionError::aborted()),
                            _ = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        request: &TransportRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatCompletion, CompletionError> {
        let send = tokio::time::timeout(self.config.timeout, self.transport.send(request.clone()));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CompletionError::aborted()),
                outcome = send => outcome,
            },
            None => send.await,
        };

        match outcome {
            Err(_elapsed) => Err(CompletionError::timed_out(self.config.timeout)),
            Ok(Err(transport_err)) => Err(transport_err.into()),
            Ok(Ok(response)) => decode_response(&response),
        }
    }
}

fn decode_response(response: &TransportResponse) -> Result<ChatCompletion, CompletionError> {
    if !(200..300).contains(&response.status) {
        return Err(error::classify_status(response));
    }

    let body = response.body.trim();
    if body.is_empty() {
        return Err(CompletionError::invalid_response("provider returned an empty body"));
    }

    match serde_json::from_str::<ProviderReply>(body) {
        Ok(ProviderReply::Completion(completion)) => Ok(completion),
        Ok(ProviderReply::Failure(envelope)) => Err(error::classify_embedded(&envelope, response)),
        Err(e) => Err(CompletionError::invalid_response(format!(
            "provider body is not a chat completion: {e}"
        ))),
    }
}

fn completion_text(completion: &ChatCompletion) -> Result<&str, CompletionError> {
    completion
        .content()
        .ok_or_else(|| CompletionError::invalid_response("completion has no message content"))
}

/// Parse and schema-check the model's JSON output.
fn parse_document(text: &str) -> Result<String, CompletionError> {
    let value: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| CompletionError::validation(format!("completion is not valid JSON: {e}")))?;
    let payload: DocumentPayload = serde_json::from_value(value).map_err(|e| {
        CompletionError::validation(format!("completion does not match the document schema: {e}"))
    })?;
    if payload.document.trim().is_empty() {
        return Err(CompletionError::validation("document is empty"));
    }
    Ok(payload.document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    use crate::models::npc::NpcStat;

    /// Replays scripted responses and records every request it sees.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        /// Returned once the script runs out.
        fallback: Option<TransportResponse>,
        hang: bool,
        seen: Mutex<Vec<(Instant, TransportRequest)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn always(response: TransportResponse) -> Self {
            Self {
                fallback: Some(response),
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Default::default()
            }
        }

        fn attempts(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn requests(&self) -> Vec<(Instant, TransportRequest)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push((Instant::now(), request));
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => Ok(self
                    .fallback
                    .clone()
                    .expect("scripted transport ran out of responses")),
            }
        }
    }

    fn completion_body(content: &str) -> String {
        json!({"id": "gen-1", "choices": [{"message": {"role": "assistant", "content": content}}]})
            .to_string()
    }

    fn ok_document(document: &str) -> TransportResponse {
        TransportResponse::new(200, completion_body(&json!({"document": document}).to_string()))
    }

    fn client(transport: Arc<ScriptedTransport>) -> CompletionClient {
        let mut config = CompletionConfig::new("https://ai.test/v1/chat/completions", "sk-test", "test-model");
        config.default_params = ModelParams {
            temperature: Some(0.7),
            max_tokens: Some(4096),
            top_p: None,
        };
        config.referer = Some("https://npc-forge.test".to_string());
        config.title = Some("NPC Forge".to_string());
        CompletionClient::new(config, transport).unwrap()
    }

    fn prompt_model() -> PromptModel {
        PromptModel {
            name: "Mira".to_string(),
            appearance: Some("Braided red hair".to_string()),
            stats: vec![NpcStat {
                name: "strength".to_string(),
                value: 14,
            }],
            dialogue: vec!["Need something forged?".to_string()],
            modules: vec!["shop".to_string()],
            previous_document: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_document_with_schema_mode() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ok_document("<npc>Mira</npc>"))]));
        let doc = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(doc, "<npc>Mira</npc>");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].1.body;
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_auth_attribution_and_merged_params() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ok_document("<npc/>"))]));
        let options = GenerateOptions {
            model: Some("other-model".to_string()),
            params: Some(ModelParams {
                max_tokens: Some(256),
                ..Default::default()
            }),
            cancel: None,
        };
        client(transport.clone())
            .generate_document(&prompt_model(), &options)
            .await
            .unwrap();

        let (_, request) = &transport.requests()[0];
        assert_eq!(request.url, "https://ai.test/v1/chat/completions");
        assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(request.header("http-referer"), Some("https://npc-forge.test"));
        assert_eq!(request.header("x-title"), Some("NPC Forge"));
        assert_eq!(request.body["model"], "other-model");
        assert_eq!(request.body["max_tokens"], 256);
        assert!((request.body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!(request.body.get("top_p").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_exactly_max_retries_plus_one() {
        let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(
            503,
            r#"{"error": {"message": "overloaded"}}"#,
        )));
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), (DEFAULT_MAX_RETRIES + 1) as usize);
        assert_eq!(err.kind, CompletionErrorKind::Upstream);
        assert_eq!(err.message, "overloaded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_exponential() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Connect("refused".into())),
            Ok(ok_document("<npc/>")),
        ]));
        client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();

        let times: Vec<Instant> = transport.requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_millis(500));
        assert!(times[2] - times[1] >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_shorter_backoff() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(TransportResponse::new(429, r#"{"error": {"message": "rate limited"}}"#)
                .with_header("retry-after", "5")),
            Ok(ok_document("<npc/>")),
        ]));
        client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();

        let times: Vec<Instant> = transport.requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(
            401,
            r#"{"error": {"message": "invalid api key"}}"#,
        )));
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(err.kind, CompletionErrorKind::Config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failures_are_not_retried() {
        for content in ["not json at all", r#"{"doc": "<npc/>"}"#, r#"{"document": "  "}"#] {
            let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(
                200,
                completion_body(content),
            )));
            let err = client(transport.clone())
                .generate_document(&prompt_model(), &GenerateOptions::default())
                .await
                .unwrap_err();

            assert_eq!(transport.attempts(), 1, "content {content:?}");
            assert_eq!(err.kind, CompletionErrorKind::Validation, "content {content:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_or_non_json_body_is_invalid_response() {
        for body in ["", "<html>gateway</html>"] {
            let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(200, body)));
            let err = client(transport.clone())
                .generate_document(&prompt_model(), &GenerateOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind, CompletionErrorKind::InvalidResponse);
            assert_eq!(transport.attempts(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_rejection_falls_back_to_inline_schema() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(TransportResponse::new(
                400,
                r#"{"error": {"message": "This model does not support response_format json_schema"}}"#,
            )),
            Ok(TransportResponse::new(
                200,
                completion_body(r#"Here you go: {"document": "<npc>Mira</npc>"} Enjoy!"#),
            )),
        ]));
        let doc = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(doc, "<npc>Mira</npc>");
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].1.body.get("response_format").is_some());
        let fallback = &requests[1].1.body;
        assert!(fallback.get("response_format").is_none());
        let messages = fallback["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages[1]["content"]
            .as_str()
            .unwrap()
            .starts_with("Return ONLY a JSON object"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_bad_request_does_not_fall_back() {
        let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(
            400,
            r#"{"error": {"message": "context length exceeded"}}"#,
        )));
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::BadRequest);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_without_json_block_is_validation_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(TransportResponse::new(400, r#"{"error": {"message": "json_schema unsupported"}}"#)),
            Ok(TransportResponse::new(200, completion_body("<npc>no json</npc>"))),
        ]));
        let err = client(transport)
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_messages_rejected_before_any_request() {
        let transport = Arc::new(ScriptedTransport::always(ok_document("<npc/>")));
        let c = client(transport.clone());

        let err = c.complete_raw(&[], None, None, None, None).await.unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::BadRequest);
        assert!(!err.is_retryable());

        let err = c
            .complete_raw(&[ChatMessage::system("sys"), ChatMessage::user(" ")], None, None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::BadRequest);
        assert!(err.message.contains("message 1"));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_times_out_without_retry() {
        let transport = Arc::new(ScriptedTransport::hanging());
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Timeout);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts_remaining_attempts() {
        let transport = Arc::new(ScriptedTransport::always(TransportResponse::new(
            429,
            r#"{"error": {"message": "rate limited"}}"#,
        ).with_header("retry-after", "30")));
        let token = CancellationToken::new();
        let options = GenerateOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &options)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err.kind, CompletionErrorKind::Timeout);
        assert_eq!(err.message, "request aborted");
        assert_eq!(transport.attempts(), 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_attempt() {
        let transport = Arc::new(ScriptedTransport::hanging());
        let token = CancellationToken::new();
        let options = GenerateOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let c = client(transport.clone());
        let started = Instant::now();
        let err = c.generate_document(&prompt_model(), &options).await.unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err.kind, CompletionErrorKind::Timeout);
        assert_eq!(err.message, "request aborted");
        assert_eq!(transport.attempts(), 1);
        assert!(started.elapsed() < c.config().timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_beyond_max_backoff_is_not_waited_for() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(TransportResponse::new(429, r#"{"error": {"message": "rate limited"}}"#)
                .with_header("retry-after", "99999999")),
            Ok(ok_document("<npc/>")),
        ]));

        let started = Instant::now();
        let err = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, CompletionErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(99_999_999)));
        assert_eq!(transport.attempts(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_is_capped() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Connect("refused".into())),
            Ok(ok_document("<npc/>")),
        ]));
        let mut config = CompletionConfig::new("https://ai.test/v1/chat/completions", "sk-test", "test-model");
        config.backoff_base = Duration::from_secs(20);
        config.max_backoff = Duration::from_secs(30);
        CompletionClient::new(config, transport.clone())
            .unwrap()
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();

        let times: Vec<Instant> = transport.requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_secs(20));
        let second = times[2] - times[1];
        assert!(second >= Duration::from_secs(30) && second < Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedded_error_in_success_status_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(TransportResponse::new(200, r#"{"error": {"message": "upstream busy", "code": 502}}"#)),
            Ok(ok_document("<npc/>")),
        ]));
        let doc = client(transport.clone())
            .generate_document(&prompt_model(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(doc, "<npc/>");
        assert_eq!(transport.attempts(), 2);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = CompletionConfig::new("https://ai.test", " ", "m");
        let err = CompletionClient::new(config, Arc::new(ScriptedTransport::default()))
            .err()
            .unwrap();
        assert_eq!(err.kind, CompletionErrorKind::Config);
    }
}
