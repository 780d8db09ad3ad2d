//! Scripted embedding providers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use codeindex::embedding::error::Result;
use codeindex::embedding::{Embedder, EmbeddingError};

fn scripted_failure(reason: &str) -> EmbeddingError {
    EmbeddingError::InvalidResponse {
        provider: "scripted",
        reason: reason.to_string(),
    }
}

fn vector_for(text: &str) -> Vec<f32> {
    vec![text.len() as f32, 1.0, 0.0, 0.5]
}

/// Name after `def ` in a function's source.
fn function_name(code: &str) -> &str {
    code.split("def ")
        .nth(1)
        .and_then(|rest| rest.split('(').next())
        .unwrap_or("")
}

/// Succeeds for every call and records which functions it saw.
#[derive(Default)]
pub struct RecordingEmbedder {
    calls: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl Embedder for RecordingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls
            .lock()
            .unwrap()
            .push(function_name(text).to_string());
        Ok(vector_for(text))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

/// Fails every call for the named functions.
pub struct FailingEmbedder {
    names: HashSet<String>,
}

impl FailingEmbedder {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl Embedder for FailingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let name = function_name(text);
        if self.names.contains(name) {
            return Err(scripted_failure(&format!("provider unavailable for {}", name)));
        }
        Ok(vector_for(text))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Fails the first call for each named function, then succeeds.
pub struct FlakyEmbedder {
    names: HashSet<String>,
    failed: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            failed: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = function_name(text);
        if self.names.contains(name) && self.failed.lock().unwrap().insert(name.to_string()) {
            return Err(scripted_failure("transient timeout"));
        }
        Ok(vector_for(text))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Blocks every call until [`GateEmbedder::open`] is called.
#[derive(Default)]
pub struct GateEmbedder {
    open: Mutex<bool>,
    signal: Condvar,
}

impl GateEmbedder {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }
}

impl Embedder for GateEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let open = self.open.lock().unwrap();
        let (open, _) = self
            .signal
            .wait_timeout_while(open, Duration::from_secs(10), |open| !*open)
            .unwrap();
        if !*open {
            return Err(scripted_failure("gate never opened"));
        }
        Ok(vector_for(text))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "gate"
    }
}
