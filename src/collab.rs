//! Narrow contracts for the services the engine calls out to.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::TranscriptionError;
use crate::model::UserId;
use crate::recorder::{CaptureToken, TranscriptChunk};

pub type TranscriptSink = mpsc::UnboundedSender<TranscriptChunk>;

pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> UserId;
}

#[derive(Debug, Clone)]
pub struct StaticIdentity(pub UserId);

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> UserId {
        self.0.clone()
    }
}

/// Speech capture. Once begun, text for `token` is pushed into `sink`
/// until `end` is called.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn begin(&self, token: CaptureToken, sink: TranscriptSink) -> Result<(), TranscriptionError>;
    async fn end(&self, token: &CaptureToken);
}

#[derive(Debug, Default)]
pub struct NullTranscriber;

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn begin(&self, _token: CaptureToken, _sink: TranscriptSink) -> Result<(), TranscriptionError> {
        Ok(())
    }

    async fn end(&self, _token: &CaptureToken) {}
}

/// Turns typed text into transcript chunks for whichever capture is live.
#[derive(Debug, Default)]
pub struct KeyboardTranscriber {
    live: Mutex<Option<(CaptureToken, TranscriptSink)>>,
}

impl KeyboardTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams `text` for the live capture. Returns false when nothing is live.
    pub fn dictate(&self, text: &str) -> bool {
        match self.live.lock().as_ref() {
            Some((token, sink)) => sink
                .send(TranscriptChunk {
                    token: *token,
                    text: text.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }
}

#[async_trait]
impl Transcriber for KeyboardTranscriber {
    async fn begin(&self, token: CaptureToken, sink: TranscriptSink) -> Result<(), TranscriptionError> {
        *self.live.lock() = Some((token, sink));
        Ok(())
    }

    async fn end(&self, token: &CaptureToken) {
        let mut live = self.live.lock();
        if live.as_ref().map(|(t, _)| t == token).unwrap_or(false) {
            *live = None;
        }
    }
}

/// Told when a start is refused for lack of preps.
pub trait PurchaseFlow: Send + Sync {
    fn needs_purchase(&self, user: &UserId, remaining: u32);
}

#[derive(Debug, Default)]
pub struct LoggingPurchaseFlow;

impl PurchaseFlow for LoggingPurchaseFlow {
    fn needs_purchase(&self, user: &UserId, remaining: u32) {
        info!(%user, remaining, "start refused, purchase needed");
    }
}

#[derive(Debug, Default)]
pub struct RecordingPurchaseFlow {
    notices: Mutex<Vec<UserId>>,
}

impl RecordingPurchaseFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<UserId> {
        self.notices.lock().clone()
    }
}

impl PurchaseFlow for RecordingPurchaseFlow {
    fn needs_purchase(&self, user: &UserId, remaining: u32) {
        debug!(%user, remaining, "purchase notice recorded");
        self.notices.lock().push(user.clone());
    }
}
