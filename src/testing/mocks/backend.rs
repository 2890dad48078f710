//! Effect backend that records operations instead of calling an API

use crate::safe_outputs::{AppliedEffect, BackendError, EffectBackend, Operation};
use std::sync::Mutex;

/// Records every executed operation and answers marker probes from them
#[derive(Debug, Default)]
pub struct RecordingBackend {
    operations: Mutex<Vec<Operation>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `execute` fail with `message`
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    fn bodies(operation: &Operation) -> Vec<&str> {
        match operation {
            Operation::CreateIssue { body, .. }
            | Operation::CreateDiscussion { body, .. }
            | Operation::CreatePullRequest { body, .. }
            | Operation::AddComment { body, .. }
            | Operation::CreateReviewComment { body, .. } => vec![body.as_str()],
            Operation::CloseIssue { comment, .. } => comment.as_deref().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn url(number: u64) -> String {
        format!("https://github.com/acme/app/issues/{number}")
    }
}

impl EffectBackend for RecordingBackend {
    fn find_marker(&self, operation: &Operation, marker: &str) -> Result<Option<AppliedEffect>, BackendError> {
        let operations = self.operations.lock().unwrap();
        Ok(operations
            .iter()
            .enumerate()
            .find(|(_, recorded)| {
                recorded.kind() == operation.kind()
                    && Self::bodies(recorded).iter().any(|body| body.contains(marker))
            })
            .map(|(index, recorded)| {
                let number = 100 + index as u64;
                AppliedEffect::new(recorded.kind(), "earlier attempt")
                    .with_number(number)
                    .with_url(Self::url(number))
            }))
    }

    fn execute(&self, operation: &Operation) -> Result<AppliedEffect, BackendError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(BackendError::Request {
                operation: operation.kind().to_string(),
                message,
            });
        }
        let mut operations = self.operations.lock().unwrap();
        let number = operation.number().unwrap_or(100 + operations.len() as u64);
        operations.push(operation.clone());
        let mut applied = AppliedEffect::new(operation.kind(), operation.kind().to_string())
            .with_number(number)
            .with_url(Self::url(number));
        if let Operation::CreatePullRequest { branch, .. } = operation {
            applied = applied.with_branch(branch.clone());
        }
        Ok(applied)
    }
}
