use async_trait::async_trait;
use kiosk_core::{
    DeliveryError, DeliveryReceipt, MessagingChannel, ServiceError, SpeechError, SpeechSynthesizer,
    TextGenerator,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "http client builder failed; using defaults");
            reqwest::Client::new()
        })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String, ServiceError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }
}

/// OpenAI-compatible chat-completions client.
pub struct ChatTextGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatTextGenerator {
    pub fn new(url: String, model: String, api_key: Option<String>) -> Self {
        if api_key.is_none() {
            tracing::warn!("GROQ_API_KEY not set; text generation will fail");
        }
        Self {
            client: http_client(),
            url,
            model,
            api_key,
        }
    }
}

#[async_trait]
impl TextGenerator for ChatTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::Request("api key not configured".into()))?;

        tracing::debug!(model = %self.model, chars = prompt.len(), "requesting completion");
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.7,
            max_tokens: 400,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ServiceError::Request(format!("decode response: {e}")))?
            .into_text()
    }
}

/// `whatsapp:`-prefixed address as the Twilio API expects.
fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[derive(Deserialize)]
struct TwilioMessage {
    sid: String,
}

/// Twilio WhatsApp messaging channel.
pub struct TwilioChannel {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioChannel {
    pub fn new(account_sid: String, auth_token: String, from_number: &str) -> Self {
        Self {
            client: http_client(),
            account_sid,
            auth_token,
            from: whatsapp_address(from_number),
        }
    }

    fn messages_url(&self) -> String {
        format!("{TWILIO_API_BASE}/Accounts/{}/Messages.json", self.account_sid)
    }
}

#[async_trait]
impl MessagingChannel for TwilioChannel {
    async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let to = whatsapp_address(recipient);
        let form = [("From", self.from.as_str()), ("To", to.as_str()), ("Body", body)];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let message: TwilioMessage = response
            .json()
            .await
            .map_err(|e| DeliveryError::Request(format!("decode response: {e}")))?;
        Ok(DeliveryReceipt { id: message.sid })
    }
}

/// Stand-in used when messaging credentials are missing.
pub struct DisabledChannel;

#[async_trait]
impl MessagingChannel for DisabledChannel {
    async fn send(&self, _recipient: &str, _body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::NotConfigured)
    }
}

/// Local text-to-speech through an espeak-compatible command.
pub struct EspeakSynthesizer {
    command: String,
    rate_wpm: u32,
}

impl EspeakSynthesizer {
    pub fn new(command: String, rate_wpm: u32) -> Self {
        Self { command, rate_wpm }
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakSynthesizer {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let status = tokio::process::Command::new(&self.command)
            .arg("-s")
            .arg(self.rate_wpm.to_string())
            .arg(text)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Exit(status.to_string()))
        }
    }
}
