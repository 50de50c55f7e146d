//! Deterministic model that replays canned replies.
//!
//! Useful for offline demos and for exercising the controller without a
//! network: each `generate()` call pops the next scripted reply. Once the
//! script runs out the model either repeats a fixed reply or reports an
//! invalid response.

use super::{GenerateOptions, Generation, LanguageModel};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, GatewayError>>>,
    /// Returned once `replies` is exhausted.
    repeat: Option<String>,
    /// Every prompt received, in call order.
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedModel {
    /// Replay `replies` in order.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Answer every call with the same reply.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            repeat: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Queue a gateway failure after the replies scripted so far.
    pub fn then_fail(self, error: GatewayError) -> Self {
        self.lock_replies().push_back(Err(error));
        self
    }

    /// Queue another reply.
    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.lock_replies().push_back(Ok(reply.into()));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate()` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, GatewayError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.lock_replies().pop_front();
        match next {
            Some(reply) => reply.map(Generation::text),
            None => match &self.repeat {
                Some(reply) => Ok(Generation::text(reply.clone())),
                None => Err(GatewayError::InvalidResponse(
                    "scripted model has no replies left".into(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_fails() {
        let model = ScriptedModel::new(["first", "second"]);
        let opts = GenerateOptions::default();

        assert_eq!(model.generate("a", &opts).await.unwrap().content, "first");
        assert_eq!(model.generate("b", &opts).await.unwrap().content, "second");
        assert!(model.generate("c", &opts).await.is_err());
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let model = ScriptedModel::repeating("again");
        let opts = GenerateOptions::default();
        for _ in 0..4 {
            assert_eq!(model.generate("p", &opts).await.unwrap().content, "again");
        }
    }

    #[tokio::test]
    async fn scripted_failure_is_returned() {
        let model = ScriptedModel::new(["ok"]).then_fail(GatewayError::RateLimited("429".into()));
        let opts = GenerateOptions::default();
        assert!(model.generate("p", &opts).await.is_ok());
        assert!(matches!(
            model.generate("p", &opts).await,
            Err(GatewayError::RateLimited(_))
        ));
    }
}
