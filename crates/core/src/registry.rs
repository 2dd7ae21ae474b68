// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline lookup by id, used by step-group steps and the `&pipelineId`
//! mapper prefix (§4.1 routing, §4.3).

use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Looks up a [`Pipeline`] definition by id.
pub trait PipelineRegistry: Send + Sync {
    fn get(&self, pipeline_id: &str) -> Option<Arc<Pipeline>>;
}

/// A registry with no pipelines registered. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPipelineRegistry;

impl PipelineRegistry for EmptyPipelineRegistry {
    fn get(&self, _pipeline_id: &str) -> Option<Arc<Pipeline>> {
        None
    }
}

/// An in-memory registry built from a fixed set of pipelines, keyed by
/// `Pipeline::id`. Suitable for tests and for small deployments that load
/// all pipeline definitions up front.
#[derive(Debug, Default)]
pub struct StaticPipelineRegistry {
    pipelines: std::collections::HashMap<String, Arc<Pipeline>>,
}

impl StaticPipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.insert(pipeline.id.clone(), Arc::new(pipeline));
        self
    }

    pub fn insert(&mut self, pipeline: Pipeline) {
        self.pipelines.insert(pipeline.id.clone(), Arc::new(pipeline));
    }
}

impl PipelineRegistry for StaticPipelineRegistry {
    fn get(&self, pipeline_id: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(pipeline_id).cloned()
    }
}
