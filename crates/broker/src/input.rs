//! Free-form human input prompts: confirm, text and choice.
//!
//! Same mechanism as approvals: the prompt is parked in a
//! [`CorrelationBroker`] until [`HumanInput::respond`] is called with its ID.
//! Use [`HumanInput::with_on_submit`] to learn the ID and show the prompt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, CorrelationBroker};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
    Confirm,
    Text,
    Choice { options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    pub question: String,
    #[serde(flatten)]
    pub kind: InputKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputResponse {
    Confirm(bool),
    Text(String),
    Choice(String),
}

pub struct HumanInput {
    broker: CorrelationBroker<InputRequest, InputResponse>,
}

impl HumanInput {
    pub fn new() -> Self {
        Self {
            broker: CorrelationBroker::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.broker = self.broker.with_timeout(timeout);
        self
    }

    pub fn with_on_submit(
        mut self,
        callback: impl Fn(&str, &InputRequest) + Send + Sync + 'static,
    ) -> Self {
        self.broker = self.broker.with_on_submit(callback);
        self
    }

    /// Ask a yes/no question.
    pub async fn confirm(
        &self,
        question: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<bool, BrokerError> {
        let (id, response) = self.ask(question.into(), InputKind::Confirm, cancel).await?;
        match response {
            InputResponse::Confirm(answer) => Ok(answer),
            other => Err(mismatch(&id, "confirm", &other)),
        }
    }

    /// Ask for free text.
    pub async fn text(
        &self,
        question: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String, BrokerError> {
        let (id, response) = self.ask(question.into(), InputKind::Text, cancel).await?;
        match response {
            InputResponse::Text(answer) => Ok(answer),
            other => Err(mismatch(&id, "text", &other)),
        }
    }

    /// Ask the human to pick one of `options`.
    pub async fn choice(
        &self,
        question: impl Into<String>,
        options: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<String, BrokerError> {
        let kind = InputKind::Choice {
            options: options.clone(),
        };
        let (id, response) = self.ask(question.into(), kind, cancel).await?;
        match response {
            InputResponse::Choice(answer) if options.contains(&answer) => Ok(answer),
            InputResponse::Choice(answer) => Err(BrokerError::InvalidResponse {
                id,
                reason: format!("'{answer}' is not one of {options:?}"),
            }),
            other => Err(mismatch(&id, "choice", &other)),
        }
    }

    /// Answer a pending prompt.
    pub fn respond(&self, id: &str, response: InputResponse) -> Result<(), BrokerError> {
        self.broker.respond(id, response)
    }

    pub fn pending(&self) -> Vec<String> {
        self.broker.pending_ids()
    }

    async fn ask(
        &self,
        question: String,
        kind: InputKind,
        cancel: &CancellationToken,
    ) -> Result<(String, InputResponse), BrokerError> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = InputRequest { question, kind };
        let response = self.broker.wait(Some(id.clone()), request, cancel).await?;
        Ok((id, response))
    }
}

impl Default for HumanInput {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch(id: &str, expected: &str, got: &InputResponse) -> BrokerError {
    BrokerError::InvalidResponse {
        id: id.to_string(),
        reason: format!("expected a {expected} answer, got {got:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures submitted prompt IDs so the test can answer them.
    fn recording_input() -> (Arc<HumanInput>, Arc<Mutex<Vec<(String, InputRequest)>>>) {
        let seen: Arc<Mutex<Vec<(String, InputRequest)>>> = Arc::default();
        let input = {
            let seen = seen.clone();
            HumanInput::new().with_on_submit(move |id, req| {
                seen.lock().unwrap().push((id.to_string(), req.clone()));
            })
        };
        (Arc::new(input), seen)
    }

    async fn next_prompt(seen: &Mutex<Vec<(String, InputRequest)>>) -> (String, InputRequest) {
        loop {
            if let Some(prompt) = seen.lock().unwrap().pop() {
                return prompt;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn confirm_prompt() {
        let (input, seen) = recording_input();
        let task = {
            let input = input.clone();
            tokio::spawn(async move { input.confirm("Proceed?", &CancellationToken::new()).await })
        };

        let (id, request) = next_prompt(&seen).await;
        assert_eq!(request.kind, InputKind::Confirm);
        assert_eq!(request.question, "Proceed?");
        input.respond(&id, InputResponse::Confirm(true)).unwrap();

        assert_eq!(task.await.unwrap(), Ok(true));
    }

    #[tokio::test]
    async fn choice_outside_options_is_invalid() {
        let (input, seen) = recording_input();
        let task = {
            let input = input.clone();
            tokio::spawn(async move {
                input
                    .choice(
                        "Region?",
                        vec!["eu".into(), "us".into()],
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let (id, _) = next_prompt(&seen).await;
        input
            .respond(&id, InputResponse::Choice("mars".into()))
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidResponse { .. }));
        assert!(err.to_string().contains("mars"));
    }

    #[tokio::test]
    async fn wrong_answer_kind_is_invalid() {
        let (input, seen) = recording_input();
        let task = {
            let input = input.clone();
            tokio::spawn(async move { input.text("Name?", &CancellationToken::new()).await })
        };

        let (id, _) = next_prompt(&seen).await;
        input.respond(&id, InputResponse::Confirm(false)).unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(BrokerError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn request_serialization() {
        let request = InputRequest {
            question: "Pick".into(),
            kind: InputKind::Choice {
                options: vec!["a".into()],
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "choice");
        assert_eq!(json["options"][0], "a");
    }
}
