use super::collection::{Collection, UpdateOptions, UpdateResult};
use crate::core::{DocError, Fields, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One call received by a RecordingCollection
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionCall {
    UpdateOne {
        filter: Fields,
        update: Fields,
        options: UpdateOptions,
    },
    InsertOne {
        document: Fields,
    },
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<CollectionCall>,
    /// Scripted matched counts for upcoming updates; 1 when exhausted
    matched: VecDeque<u64>,
    /// Error message for the next call, if any
    failure: Option<String>,
}

/// In-memory collection that records every call it receives.
///
/// Updates report one matched and modified document unless a different
/// count was scripted with `script_matched`. `fail_next` makes the next call
/// return a storage error.
#[derive(Debug)]
pub struct RecordingCollection {
    name: String,
    recorder: Mutex<Recorder>,
}

impl RecordingCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorder: Mutex::new(Recorder::default()),
        }
    }

    /// Queues the matched count reported by the next update.
    pub fn script_matched(&self, matched: u64) -> Result<()> {
        self.recorder.lock()?.matched.push_back(matched);
        Ok(())
    }

    pub fn fail_next(&self, message: impl Into<String>) -> Result<()> {
        self.recorder.lock()?.failure = Some(message.into());
        Ok(())
    }

    pub fn calls(&self) -> Result<Vec<CollectionCall>> {
        Ok(self.recorder.lock()?.calls.clone())
    }

    /// (filter, update) pairs of every update received, in order
    pub fn updates(&self) -> Result<Vec<(Fields, Fields)>> {
        let recorder = self.recorder.lock()?;
        Ok(recorder
            .calls
            .iter()
            .filter_map(|call| match call {
                CollectionCall::UpdateOne { filter, update, .. } => {
                    Some((filter.clone(), update.clone()))
                }
                CollectionCall::InsertOne { .. } => None,
            })
            .collect())
    }

    pub fn inserts(&self) -> Result<Vec<Fields>> {
        let recorder = self.recorder.lock()?;
        Ok(recorder
            .calls
            .iter()
            .filter_map(|call| match call {
                CollectionCall::InsertOne { document } => Some(document.clone()),
                CollectionCall::UpdateOne { .. } => None,
            })
            .collect())
    }

    pub fn call_count(&self) -> Result<usize> {
        Ok(self.recorder.lock()?.calls.len())
    }

    pub fn clear(&self) -> Result<()> {
        let mut recorder = self.recorder.lock()?;
        recorder.calls.clear();
        recorder.matched.clear();
        recorder.failure = None;
        Ok(())
    }
}

impl Collection for RecordingCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_one(
        &self,
        filter: &Fields,
        update: &Fields,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        let mut recorder = self.recorder.lock()?;
        if let Some(message) = recorder.failure.take() {
            return Err(DocError::Storage(message));
        }
        recorder.calls.push(CollectionCall::UpdateOne {
            filter: filter.clone(),
            update: update.clone(),
            options: *options,
        });
        let matched = recorder.matched.pop_front().unwrap_or(1);
        Ok(UpdateResult {
            matched_count: matched,
            modified_count: matched.min(1),
        })
    }

    fn insert_one(&self, document: &Fields) -> Result<()> {
        let mut recorder = self.recorder.lock()?;
        if let Some(message) = recorder.failure.take() {
            return Err(DocError::Storage(message));
        }
        recorder.calls.push(CollectionCall::InsertOne {
            document: document.clone(),
        });
        Ok(())
    }
}
