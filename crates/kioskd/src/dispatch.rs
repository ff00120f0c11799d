use kiosk_core::prompt::{self, MAX_MESSAGE_CHARS};
use kiosk_core::{Emotion, MessagingChannel, PurchaseItem, SpeechSynthesizer, TextGenerator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Everything the two notification actions need about one visit.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub customer_id: String,
    pub display_name: String,
    pub emotion: Emotion,
    pub phone_number: Option<String>,
    pub purchase_history: Vec<PurchaseItem>,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    text: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    messaging: Arc<dyn MessagingChannel>,
    permits: Arc<Semaphore>,
    message_delay: Duration,
    tracker: TaskTracker,
}

impl NotificationDispatcher {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        messaging: Arc<dyn MessagingChannel>,
        permits: usize,
        message_delay: Duration,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            text,
            speech,
            messaging,
            permits: Arc::new(Semaphore::new(permits.max(1))),
            message_delay,
            tracker,
        }
    }

    /// Schedule both actions and return immediately. Must be called from
    /// within a Tokio runtime.
    pub fn dispatch(&self, request: NotificationRequest) {
        let request = Arc::new(request);
        tracing::info!(
            customer_id = %request.customer_id,
            emotion = %request.emotion,
            has_phone = request.phone_number.is_some(),
            "notification dispatched"
        );

        self.tracker.spawn(greet(
            self.text.clone(),
            self.speech.clone(),
            self.permits.clone(),
            request.clone(),
        ));
        self.tracker.spawn(send_message(
            self.text.clone(),
            self.messaging.clone(),
            self.permits.clone(),
            self.message_delay,
            request,
        ));
    }
}

async fn greet(
    text: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    request: Arc<NotificationRequest>,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };
    let id = &request.customer_id;

    let prompt = prompt::greeting_prompt(&request.display_name, request.emotion);
    let greeting = match text.generate(&prompt).await {
        Ok(t) => prompt::clamp_text(&t, MAX_MESSAGE_CHARS),
        Err(e) => {
            tracing::warn!(customer_id = %id, error = %e, "greeting generation failed");
            return;
        }
    };
    if greeting.is_empty() {
        tracing::warn!(customer_id = %id, "empty greeting; nothing to speak");
        return;
    }

    match speech.speak(&greeting).await {
        Ok(()) => tracing::info!(customer_id = %id, "greeting spoken"),
        Err(e) => tracing::warn!(customer_id = %id, error = %e, "speech synthesis failed"),
    }
}

async fn send_message(
    text: Arc<dyn TextGenerator>,
    messaging: Arc<dyn MessagingChannel>,
    permits: Arc<Semaphore>,
    delay: Duration,
    request: Arc<NotificationRequest>,
) {
    let id = &request.customer_id;
    let Some(phone) = request.phone_number.as_deref() else {
        tracing::debug!(customer_id = %id, "no phone number; skipping message");
        return;
    };

    tokio::time::sleep(delay).await;
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };

    let prompt = prompt::message_prompt(
        &request.display_name,
        request.emotion,
        &request.purchase_history,
    );
    let body = match text.generate(&prompt).await {
        Ok(t) => prompt::clamp_text(&t, MAX_MESSAGE_CHARS),
        Err(e) => {
            tracing::warn!(customer_id = %id, error = %e, "message generation failed");
            return;
        }
    };
    if body.is_empty() {
        tracing::warn!(customer_id = %id, "empty message body; not sending");
        return;
    }

    match messaging.send(phone, &body).await {
        Ok(receipt) => tracing::info!(customer_id = %id, receipt = %receipt.id, "message sent"),
        Err(e) => tracing::warn!(customer_id = %id, error = %e, "message delivery failed"),
    }
}
