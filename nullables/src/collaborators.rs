//! Recording collaborators — capture side effects for assertions.

use std::sync::Mutex;

use porch_orchestrator::{
    CodeDelivery, CollaboratorError, Notification, NotificationSink, ReviewQueue,
};
use porch_types::{SubjectId, VerificationMethod};

/// Captures delivered notifications.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Captures challenge-code deliveries.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(target, code)` pairs, in dispatch order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl CodeDelivery for RecordingDelivery {
    fn send(&self, target: &str, code: &str, _ttl_secs: u64) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), code.to_string()));
        Ok(())
    }
}

/// Captures review-queue submissions.
#[derive(Default)]
pub struct RecordingReviewQueue {
    enqueued: Mutex<Vec<(SubjectId, VerificationMethod, Vec<u8>)>>,
}

impl RecordingReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<(SubjectId, VerificationMethod, Vec<u8>)> {
        self.enqueued.lock().unwrap().clone()
    }
}

impl ReviewQueue for RecordingReviewQueue {
    fn enqueue(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        blob_ref: &[u8],
    ) -> Result<(), CollaboratorError> {
        self.enqueued
            .lock()
            .unwrap()
            .push((subject, method, blob_ref.to_vec()));
        Ok(())
    }
}
