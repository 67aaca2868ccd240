//! Per-request invocation state.

use crate::components::{Category, ComponentManager, PipelineHandle};
use crate::configuration::Location;
use crate::error::ProcessingError;
use crate::node::NodeParameters;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use trellis_traits::{Environment, Parameters};

/// State carried by one request through a processing tree.
///
/// Holds the scope stack (one parameter map per matcher, action or call
/// level, optionally anchored by name), the component manager of the
/// sitemap level being walked, and at most one processing pipeline, which
/// is acquired the first time a node asks for it.
///
/// A context belongs to a single request and is never shared.
#[derive(Debug, Default)]
pub struct InvokeContext {
    build_pipeline_only: bool,
    pass_through: bool,
    maps: Vec<Arc<Parameters>>,
    anchors: HashMap<String, usize>,
    anchor_names: HashMap<usize, String>,
    pushes: usize,
    pops: usize,
    components: Option<Arc<ComponentManager>>,
    pipeline_hint: Option<String>,
    pipeline_parameters: Option<Arc<NodeParameters>>,
    pipeline: Option<PipelineHandle>,
}

impl InvokeContext {
    /// A context that runs the pipeline it builds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that only assembles a pipeline and hands it back without
    /// running it.
    pub fn for_pipeline_build() -> Self {
        Self {
            build_pipeline_only: true,
            ..Self::default()
        }
    }

    /// In pass-through mode the last pipeline of a sitemap reports
    /// "no match" instead of "not found", so an enclosing sitemap can carry on.
    pub fn with_pass_through(mut self, pass_through: bool) -> Self {
        self.pass_through = pass_through;
        self
    }

    pub fn is_build_pipeline_only(&self) -> bool {
        self.build_pipeline_only
    }

    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    /// Pushes a scope map. An anchor name that is already taken keeps
    /// pointing at the earlier map.
    pub fn push_map(&mut self, anchor: Option<&str>, map: Parameters) {
        let index = self.maps.len();
        self.maps.push(Arc::new(map));
        self.pushes += 1;

        if let Some(name) = anchor {
            if let Some(existing) = self.anchors.get(name) {
                log::error!(
                    "Anchor '{name}' is already used by scope level {existing}; keeping the earlier map"
                );
            } else {
                self.anchors.insert(name.to_string(), index);
                self.anchor_names.insert(index, name.to_string());
            }
        }
    }

    /// Pops the innermost scope map and forgets its anchor.
    pub fn pop_map(&mut self) -> Option<Arc<Parameters>> {
        let map = self.maps.pop()?;
        self.pops += 1;
        let index = self.maps.len();
        if let Some(name) = self.anchor_names.remove(&index) {
            self.anchors.remove(&name);
        }
        Some(map)
    }

    /// Pushes a scope map that is popped again when the returned guard is
    /// dropped, whatever path leaves the scope.
    pub fn scoped_map(&mut self, anchor: Option<&str>, map: Parameters) -> MapScope<'_> {
        self.push_map(anchor, map);
        MapScope { context: self }
    }

    /// The map `levels` steps out from the innermost one.
    pub fn map_at_level(&self, levels: usize) -> Option<&Parameters> {
        let index = self.maps.len().checked_sub(levels + 1)?;
        self.maps.get(index).map(|m| m.as_ref())
    }

    pub fn map_by_anchor(&self, anchor: &str) -> Option<&Parameters> {
        let index = self.anchors.get(anchor)?;
        self.maps.get(*index).map(|m| m.as_ref())
    }

    pub fn maps(&self) -> &[Arc<Parameters>] {
        &self.maps
    }

    pub fn depth(&self) -> usize {
        self.maps.len()
    }

    /// Number of pushes and pops performed so far.
    pub fn scope_balance(&self) -> (usize, usize) {
        (self.pushes, self.pops)
    }

    /// Installs the component manager of the sitemap level being entered
    /// and returns the one it replaces.
    pub fn set_component_manager(
        &mut self,
        components: Option<Arc<ComponentManager>>,
    ) -> Option<Arc<ComponentManager>> {
        std::mem::replace(&mut self.components, components)
    }

    pub fn component_manager(&self) -> Option<&Arc<ComponentManager>> {
        self.components.as_ref()
    }

    /// Records which pipeline type to create, and with which parameters,
    /// once a stage node asks for the pipeline.
    pub fn inform_pipeline(&mut self, hint: &str, parameters: Arc<NodeParameters>) {
        self.pipeline_hint = Some(hint.to_string());
        self.pipeline_parameters = Some(parameters);
    }

    pub fn has_processing_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// The request's processing pipeline, created on first use from the
    /// informed pipeline type and parameters resolved against the current
    /// scope stack. Later calls return the same pipeline.
    pub fn processing_pipeline(
        &mut self,
        env: &dyn Environment,
    ) -> Result<&mut PipelineHandle, ProcessingError> {
        if self.pipeline.is_none() {
            let pipeline = self.acquire_pipeline(env)?;
            self.pipeline = Some(pipeline);
        }
        self.pipeline
            .as_mut()
            .ok_or_else(|| ProcessingError::internal("processing pipeline vanished"))
    }

    fn acquire_pipeline(&self, env: &dyn Environment) -> Result<PipelineHandle, ProcessingError> {
        let components = self
            .components
            .as_ref()
            .ok_or_else(|| ProcessingError::internal("no component manager in scope"))?;
        let hint = match &self.pipeline_hint {
            Some(hint) => hint.clone(),
            None => components
                .resolve_hint(Category::Pipe, None)
                .map_err(|e| ProcessingError::internal(e.to_string()))?,
        };
        let (parameters, location) = match &self.pipeline_parameters {
            Some(p) => (p.resolve(self, env)?, p.location().clone()),
            None => (Parameters::new(), Location::unknown()),
        };

        log::debug!("Creating {hint} pipeline for '{}'", env.addressing().full_uri());
        let mut pipeline = components
            .pipeline(&hint)
            .map_err(|e| ProcessingError::component(&location, e))?;
        pipeline
            .setup(&parameters)
            .map_err(|e| ProcessingError::component(&location, e))?;
        Ok(pipeline)
    }

    /// Hands the pipeline over to the caller; this context no longer
    /// releases it.
    pub fn take_processing_pipeline(&mut self) -> Option<PipelineHandle> {
        self.pipeline.take()
    }

    /// Adopts a pipeline built elsewhere (by a mounted sitemap or an error
    /// handler). A pipeline this context already held is released.
    pub fn set_processing_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipeline = Some(pipeline);
    }

    /// Releases the pipeline, if this context still holds one. Safe to call
    /// more than once.
    pub fn dispose(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            log::debug!("Disposing invoke context holding {} pipeline", pipeline.hint());
        }
        if self.pushes != self.pops {
            log::warn!(
                "Invoke context disposed with unbalanced scopes ({} pushes, {} pops)",
                self.pushes,
                self.pops
            );
        }
    }

    /// Disposes the context and clears it for another request.
    pub fn reset(&mut self) {
        self.dispose();
        let build_pipeline_only = self.build_pipeline_only;
        let pass_through = self.pass_through;
        *self = Self {
            build_pipeline_only,
            pass_through,
            ..Self::default()
        };
    }
}

/// A scope map pushed by [`InvokeContext::scoped_map`]. Derefs to the
/// context so children can be invoked through it.
pub struct MapScope<'a> {
    context: &'a mut InvokeContext,
}

impl Deref for MapScope<'_> {
    type Target = InvokeContext;

    fn deref(&self) -> &InvokeContext {
        self.context
    }
}

impl DerefMut for MapScope<'_> {
    fn deref_mut(&mut self) -> &mut InvokeContext {
        self.context
    }
}

impl Drop for MapScope<'_> {
    fn drop(&mut self) {
        self.context.pop_map();
    }
}
