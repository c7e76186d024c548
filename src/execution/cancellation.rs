use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancellation handle for one task, remembering why it was cancelled
///
/// The token may descend from outer tokens (coordinator shutdown, leadership term);
/// each registered source maps an ancestor's cancellation to a reason.
#[derive(Debug, Clone)]
pub struct TaskCancellation {
    token: CancellationToken,
    inner: Arc<Mutex<CancelState>>,
}

#[derive(Debug, Default)]
struct CancelState {
    reason: Option<String>,
    sources: Vec<(CancellationToken, String)>,
}

impl TaskCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            inner: Arc::new(Mutex::new(CancelState::default())),
        }
    }

    /// Cancelled whenever `parent` is
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            inner: Arc::new(Mutex::new(CancelState::default())),
        }
    }

    /// Attribute cancellation of an ancestor token to `reason`
    ///
    /// Sources are checked in registration order, so register the outermost first.
    pub fn with_source(self, ancestor: CancellationToken, reason: impl Into<String>) -> Self {
        self.inner.lock().sources.push((ancestor, reason.into()));
        self
    }

    /// Cancel with a reason; the first reason recorded wins
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.reason.is_none() && !self.token.is_cancelled() {
                inner.reason = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why the task was cancelled, if it was
    pub fn reason(&self) -> Option<String> {
        if !self.token.is_cancelled() {
            return None;
        }

        let inner = self.inner.lock();
        if let Some(reason) = &inner.reason {
            return Some(reason.clone());
        }
        inner
            .sources
            .iter()
            .find(|(source, _)| source.is_cancelled())
            .map(|(_, reason)| reason.clone())
            .or_else(|| Some("cancelled".to_string()))
    }
}

impl Default for TaskCancellation {
    fn default() -> Self {
        Self::new()
    }
}
