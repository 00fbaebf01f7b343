//! The public session API.
//!
//! A `Session` owns the component tree and its contexts behind one async
//! lock. Every mutating operation validates, edits the tree, and runs one
//! reconciliation pass while holding the lock, so callers are serialized.

use std::sync::Arc;

use futures::future::try_join_all;
use patchconf::PatchbayConfig;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artifacts::Artifacts;
use crate::component::{
    Component, ComponentId, ComponentKind, DeviceConfig, ReadMode, TrackInput, TrackOutput, Tree,
    WriteMode,
};
use crate::context::{BootStatus, Context, ContextId};
use crate::error::{EngineError, Result};
use crate::order::GraphOrder;
use crate::reconcile::{sync_context, ContextEntry, Engine, PassReport};
use crate::spec::Spec;

const PATH_PATTERN: &str = r"^[a-z_]+\[\d+\](\.[a-z_]+\[\d+\])*$";

pub struct Session {
    engine: Mutex<Engine>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&PatchbayConfig::default())
    }
}

fn expect_track(tree: &Tree, id: ComponentId) -> Result<()> {
    let component = tree.get(id)?;
    match component.kind {
        ComponentKind::Track(_) => Ok(()),
        _ => Err(EngineError::InvalidKind {
            component: id,
            expected: "track",
            actual: component.kind.name(),
        }),
    }
}

fn expect_track_container(tree: &Tree, id: ComponentId) -> Result<()> {
    let component = tree.get(id)?;
    if component.kind.is_track_container() {
        Ok(())
    } else {
        Err(EngineError::InvalidKind {
            component: id,
            expected: "track container",
            actual: component.kind.name(),
        })
    }
}

fn same_mixer(tree: &Tree, a: ComponentId, b: ComponentId) -> Result<()> {
    if tree.mixer_of(a)? == tree.mixer_of(b)? {
        Ok(())
    } else {
        Err(EngineError::CrossMixer(a, b))
    }
}

/// The siblings immediately before and after `id`.
fn neighbors(tree: &Tree, id: ComponentId) -> Vec<ComponentId> {
    let Ok((siblings, index)) = tree.siblings(id) else {
        return Vec::new();
    };
    let previous = index.checked_sub(1).and_then(|index| siblings.get(index));
    previous
        .into_iter()
        .chain(siblings.get(index + 1))
        .copied()
        .collect()
}

fn with_neighbors(tree: &Tree, ids: &[ComponentId]) -> Vec<ComponentId> {
    let mut roots = ids.to_vec();
    for id in ids {
        for neighbor in neighbors(tree, *id) {
            if !roots.contains(&neighbor) {
                roots.push(neighbor);
            }
        }
    }
    roots
}

/// The child list of `parent` that holds components of `category`.
fn child_list<'a>(component: &'a Component, category: &str) -> Option<&'a Vec<ComponentId>> {
    match (&component.kind, category) {
        (ComponentKind::Track(track), "sends") => Some(&track.sends),
        (ComponentKind::Rack(rack), "chains") => Some(&rack.chains),
        (kind, "tracks") => kind.tracks(),
        (kind, "devices") => kind.devices(),
        _ => None,
    }
}

impl Session {
    pub fn new(config: &PatchbayConfig) -> Self {
        Self {
            engine: Mutex::new(Engine::new(
                config.engine.default_channel_count,
                config.engine.sync_timeout(),
            )),
        }
    }

    // --- contexts and lifecycle ---

    pub async fn status(&self) -> BootStatus {
        self.engine.lock().await.status
    }

    pub async fn contexts(&self) -> Vec<ContextId> {
        let engine = self.engine.lock().await;
        engine.contexts.iter().map(|entry| entry.context.id()).collect()
    }

    /// Register a context, booting it if the session is already online.
    pub async fn add_context(&self, context: Arc<dyn Context>) -> Result<ContextId> {
        let mut engine = self.engine.lock().await;
        let id = context.id();
        if engine.context_entry(id).is_ok() {
            return Err(EngineError::DuplicateContext(id));
        }
        if engine.status == BootStatus::Online && context.boot_status() != BootStatus::Online {
            context.boot().await?;
        }
        engine.contexts.push(ContextEntry {
            context,
            artifacts: Artifacts::new(),
        });
        info!(context = %id, "registered context");
        Ok(id)
    }

    /// Boot every context and realize every mixer.
    pub async fn boot(&self) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        if engine.status == BootStatus::Online {
            return Ok(PassReport::default());
        }
        info!(contexts = engine.contexts.len(), "booting session");
        engine.status = BootStatus::Booting;
        let booted = try_join_all(
            engine
                .contexts
                .iter()
                .filter(|entry| entry.context.boot_status() != BootStatus::Online)
                .map(|entry| entry.context.boot()),
        )
        .await;
        if let Err(err) = booted {
            warn!(error = %err, "failed to boot contexts");
            engine.status = BootStatus::Offline;
            return Err(err.into());
        }
        engine.status = BootStatus::Online;
        let mixers = engine.tree.mixers().to_vec();
        engine.reconcile(&mixers, &[]).await
    }

    /// Release everything realized, then quit every context.
    pub async fn quit(&self) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        if engine.status == BootStatus::Offline {
            return Ok(PassReport::default());
        }
        info!("quitting session");
        engine.status = BootStatus::Quitting;
        let mixers = engine.tree.mixers().to_vec();
        let report = engine.reconcile(&mixers, &[]).await?;
        for entry in engine.contexts.iter_mut() {
            entry.artifacts.clear();
        }
        try_join_all(engine.contexts.iter().map(|entry| entry.context.quit())).await?;
        engine.status = BootStatus::Offline;
        Ok(report)
    }

    /// Delete every mixer on `id`, quit it, and forget it.
    pub async fn delete_context(&self, id: ContextId) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        engine.context_entry(id)?;
        let mixers: Vec<ComponentId> = engine
            .tree
            .mixers()
            .iter()
            .copied()
            .filter(|mixer| engine.mixer_contexts.get(mixer) == Some(&id))
            .collect();
        let report = engine.reconcile(&[], &mixers).await?;
        let context = Arc::clone(&engine.context_entry(id)?.context);
        if context.boot_status() == BootStatus::Online {
            context.quit().await?;
        }
        engine.contexts.retain(|entry| entry.context.id() != id);
        info!(context = %id, mixers = mixers.len(), "deleted context");
        Ok(report)
    }

    /// Barrier on every context.
    pub async fn sync(&self) -> Result<()> {
        let engine = self.engine.lock().await;
        if engine.status != BootStatus::Online {
            return Err(EngineError::NotOnline);
        }
        try_join_all(
            engine
                .contexts
                .iter()
                .map(|entry| sync_context(entry.context.as_ref(), engine.sync_timeout)),
        )
        .await?;
        Ok(())
    }

    // --- mixers ---

    /// Add a mixer on `context`, or on the first registered context.
    pub async fn add_mixer(
        &self,
        context: Option<ContextId>,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        let context = match context {
            Some(id) => engine.context_entry(id)?.context.id(),
            None => engine
                .contexts
                .first()
                .map(|entry| entry.context.id())
                .ok_or(EngineError::NoContexts)?,
        };
        let id = engine.tree.add_mixer(name);
        engine.mixer_contexts.insert(id, context);
        debug!(mixer = %id, context = %context, "added mixer");
        engine.reconcile(&[id], &[]).await?;
        Ok(id)
    }

    pub async fn mixers(&self) -> Vec<ComponentId> {
        self.engine.lock().await.tree.mixers().to_vec()
    }

    pub async fn mixer_context(&self, mixer: ComponentId) -> Result<ContextId> {
        let engine = self.engine.lock().await;
        engine
            .mixer_contexts
            .get(&mixer)
            .copied()
            .ok_or(EngineError::ComponentNotFound(mixer))
    }

    /// Move a mixer, and everything in it, to another context.
    pub async fn set_mixer_context(
        &self,
        mixer: ComponentId,
        context: ContextId,
    ) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let component = engine.tree.get(mixer)?;
        if !matches!(component.kind, ComponentKind::Mixer { .. }) {
            return Err(EngineError::InvalidKind {
                component: mixer,
                expected: "mixer",
                actual: component.kind.name(),
            });
        }
        engine.context_entry(context)?;
        if engine.mixer_contexts.get(&mixer) == Some(&context) {
            return Ok(PassReport::default());
        }
        engine.mixer_contexts.insert(mixer, context);
        engine.reconcile(&[mixer], &[]).await
    }

    // --- tracks ---

    pub async fn add_track(
        &self,
        container: ComponentId,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        expect_track_container(&engine.tree, container)?;
        let id = engine.tree.add_child(container, name, ComponentKind::track())?;
        let roots = with_neighbors(&engine.tree, &[id]);
        engine.reconcile(&roots, &[]).await?;
        Ok(id)
    }

    /// Wrap `count` tracks of `container`, starting at `index`, into a new
    /// group track that takes their place.
    pub async fn group_tracks(
        &self,
        container: ComponentId,
        index: usize,
        count: usize,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        expect_track_container(&engine.tree, container)?;
        let tracks = engine
            .tree
            .get(container)?
            .kind
            .tracks()
            .cloned()
            .unwrap_or_default();
        if count == 0 || index + count > tracks.len() {
            return Err(EngineError::InvalidTrackRange {
                index,
                count,
                len: tracks.len(),
            });
        }

        let group = engine.tree.add_child(container, name, ComponentKind::track())?;
        engine.tree.detach(group)?;
        engine.tree.attach(group, container, index)?;
        for track in &tracks[index..index + count] {
            engine.tree.detach(*track)?;
            engine.tree.attach(*track, group, usize::MAX)?;
        }
        debug!(group = %group, tracks = count, "grouped tracks");
        let roots = with_neighbors(&engine.tree, &[group]);
        engine.reconcile(&roots, &[]).await?;
        Ok(group)
    }

    /// Add a send from `track` into the track container `target`.
    pub async fn add_send(
        &self,
        track: ComponentId,
        target: ComponentId,
        postfader: bool,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        if track == target {
            return Err(EngineError::SelfRouting(track));
        }
        expect_track_container(&engine.tree, target)?;
        same_mixer(&engine.tree, track, target)?;
        let id = engine
            .tree
            .add_child(track, name, ComponentKind::Send { postfader, target })?;
        engine.reconcile(&[id], &[]).await?;
        Ok(id)
    }

    pub async fn set_input(&self, track: ComponentId, input: TrackInput) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        if let TrackInput::Track(source) = input {
            if source == track {
                return Err(EngineError::SelfRouting(track));
            }
            expect_track(&engine.tree, source)?;
            same_mixer(&engine.tree, track, source)?;
        }
        if let Some(state) = engine.tree.get_mut(track)?.track_mut() {
            state.input = input;
        }
        engine.reconcile(&[track], &[]).await
    }

    pub async fn set_output(&self, track: ComponentId, output: TrackOutput) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        if let TrackOutput::Container(target) = output {
            if target == track {
                return Err(EngineError::SelfRouting(track));
            }
            expect_track_container(&engine.tree, target)?;
            same_mixer(&engine.tree, track, target)?;
        }
        if let Some(state) = engine.tree.get_mut(track)?.track_mut() {
            state.output = output;
        }
        engine.reconcile(&[track], &[]).await
    }

    /// Mute or unmute a track. Only activation is pushed; no pass runs.
    pub async fn set_muted(&self, track: ComponentId, muted: bool) -> Result<()> {
        let mut engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        if let Some(state) = engine.tree.get_mut(track)?.track_mut() {
            state.muted = muted;
        }
        engine.update_activation().await?;
        Ok(())
    }

    /// Solo or unsolo a track. An exclusive solo unsolos every other track.
    pub async fn set_soloed(&self, track: ComponentId, soloed: bool, exclusive: bool) -> Result<()> {
        let mut engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        if soloed && exclusive {
            let others: Vec<ComponentId> = engine
                .tree
                .iter()
                .filter(|component| component.id != track && component.track().is_some())
                .map(|component| component.id)
                .collect();
            for other in others {
                if let Some(state) = engine.tree.get_mut(other)?.track_mut() {
                    state.soloed = false;
                }
            }
        }
        if let Some(state) = engine.tree.get_mut(track)?.track_mut() {
            state.soloed = soloed;
        }
        engine.update_activation().await?;
        Ok(())
    }

    /// Dissolve a group track or a single-chain rack into its parent.
    pub async fn ungroup(&self, id: ComponentId) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let component = engine.tree.get(id)?;
        let parent = component.parent.ok_or(EngineError::Detached(id))?;
        let promoted = match &component.kind {
            ComponentKind::Track(track) => track.tracks.clone(),
            ComponentKind::Rack(rack) => match rack.chains.as_slice() {
                [chain] => engine
                    .tree
                    .get(*chain)?
                    .kind
                    .devices()
                    .cloned()
                    .unwrap_or_default(),
                _ => {
                    return Err(EngineError::UngroupUnsupported(
                        id,
                        "a rack must have exactly one chain",
                    ))
                }
            },
            _ => {
                return Err(EngineError::UngroupUnsupported(
                    id,
                    "only tracks and racks can be ungrouped",
                ))
            }
        };

        let (_, index) = engine.tree.siblings(id)?;
        for (offset, child) in promoted.iter().enumerate() {
            engine.tree.detach(*child)?;
            engine.tree.attach(*child, parent, index + 1 + offset)?;
        }
        debug!(component = %id, promoted = promoted.len(), "ungrouping");
        let roots = with_neighbors(&engine.tree, &promoted);
        engine.reconcile(&roots, &[id]).await
    }

    // --- devices ---

    pub async fn add_device(
        &self,
        container: ComponentId,
        config: DeviceConfig,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        let id = engine
            .tree
            .add_child(container, name, ComponentKind::Device(config))?;
        let roots = with_neighbors(&engine.tree, &[id]);
        engine.reconcile(&roots, &[]).await?;
        Ok(id)
    }

    pub async fn add_rack(
        &self,
        container: ComponentId,
        read_mode: ReadMode,
        write_mode: WriteMode,
        name: Option<String>,
    ) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        let id = engine
            .tree
            .add_child(container, name, ComponentKind::rack(read_mode, write_mode))?;
        let roots = with_neighbors(&engine.tree, &[id]);
        engine.reconcile(&roots, &[]).await?;
        Ok(id)
    }

    pub async fn add_chain(&self, rack: ComponentId, name: Option<String>) -> Result<ComponentId> {
        let mut engine = self.engine.lock().await;
        let id = engine.tree.add_child(rack, name, ComponentKind::chain())?;
        let roots = with_neighbors(&engine.tree, &[id]);
        engine.reconcile(&roots, &[]).await?;
        Ok(id)
    }

    pub async fn set_read_mode(&self, rack: ComponentId, mode: ReadMode) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let component = engine.tree.get_mut(rack)?;
        let actual = component.kind.name();
        let state = component.rack_mut().ok_or(EngineError::InvalidKind {
            component: rack,
            expected: "rack",
            actual,
        })?;
        state.read_mode = mode;
        engine.reconcile(&[rack], &[]).await
    }

    pub async fn set_write_mode(&self, rack: ComponentId, mode: WriteMode) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let component = engine.tree.get_mut(rack)?;
        let actual = component.kind.name();
        let state = component.rack_mut().ok_or(EngineError::InvalidKind {
            component: rack,
            expected: "rack",
            actual,
        })?;
        state.write_mode = mode;
        engine.reconcile(&[rack], &[]).await
    }

    // --- any component ---

    /// Delete a component and everything below it.
    pub async fn delete(&self, id: ComponentId) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        engine.tree.get(id)?;
        engine.reconcile(&[], &[id]).await
    }

    /// Move a component into `parent` at `index`.
    pub async fn move_component(
        &self,
        id: ComponentId,
        parent: ComponentId,
        index: usize,
    ) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let invalid = EngineError::InvalidMove {
            component: id,
            parent,
            index,
        };
        let component = engine.tree.get(id)?;
        if matches!(component.kind, ComponentKind::Mixer { .. }) {
            return Err(invalid);
        }
        let category = component.kind.category();
        let current_parent = component.parent.ok_or(EngineError::Detached(id))?;
        same_mixer(&engine.tree, id, parent)?;
        if engine.tree.is_ancestor(id, parent) {
            return Err(invalid);
        }
        let len = child_list(engine.tree.get(parent)?, category)
            .map(Vec::len)
            .ok_or(EngineError::InvalidKind {
                component: parent,
                expected: "container",
                actual: engine.tree.get(parent)?.kind.name(),
            })?;
        if index != 0 && index >= len {
            return Err(invalid);
        }
        if current_parent == parent && engine.tree.siblings(id)?.1 == index {
            return Ok(PassReport::default());
        }

        let mut roots = with_neighbors(&engine.tree, &[id]);
        engine.tree.detach(id)?;
        engine.tree.attach(id, parent, index)?;
        for neighbor in neighbors(&engine.tree, id) {
            if !roots.contains(&neighbor) {
                roots.push(neighbor);
            }
        }
        debug!(component = %id, parent = %parent, index, "moved component");
        engine.reconcile(&roots, &[]).await
    }

    pub async fn set_parameter(
        &self,
        id: ComponentId,
        name: &str,
        value: f64,
    ) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let parameter = engine
            .tree
            .get_mut(id)?
            .parameters
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownParameter {
                component: id,
                name: name.to_string(),
            })?;
        let stored = parameter.set(value);
        debug!(component = %id, name, value = stored, "set parameter");
        engine.reconcile(&[id], &[]).await
    }

    /// Set an explicit channel count on a mixer, track or rack. `None`
    /// inherits from the parent.
    pub async fn set_channel_count(
        &self,
        id: ComponentId,
        channel_count: Option<usize>,
    ) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        let component = engine.tree.get_mut(id)?;
        match component.kind {
            ComponentKind::Mixer { .. } | ComponentKind::Track(_) | ComponentKind::Rack(_) => {
                component.channel_count = channel_count;
            }
            _ => {
                return Err(EngineError::InvalidKind {
                    component: id,
                    expected: "mixer, track or rack",
                    actual: component.kind.name(),
                })
            }
        }
        engine.reconcile(&[id], &[]).await
    }

    pub async fn set_name(&self, id: ComponentId, name: Option<String>) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.tree.get_mut(id)?.name = name;
        Ok(())
    }

    /// Re-run a pass over `id`'s subtree. An unchanged tree yields no changes.
    pub async fn reconcile(&self, id: ComponentId) -> Result<PassReport> {
        let mut engine = self.engine.lock().await;
        engine.tree.get(id)?;
        engine.reconcile(&[id], &[]).await
    }

    // --- inspection ---

    /// Resolve a nested path such as `mixers[0].tracks[1].devices[0]`.
    pub async fn lookup(&self, path: &str) -> Result<ComponentId> {
        let pattern = Regex::new(PATH_PATTERN).map_err(|_| EngineError::InvalidPath(path.into()))?;
        let trimmed = path.strip_prefix("session.").unwrap_or(path);
        if !pattern.is_match(trimmed) {
            return Err(EngineError::InvalidPath(path.to_string()));
        }
        let invalid = || EngineError::InvalidPath(path.to_string());

        let engine = self.engine.lock().await;
        let mut current: Option<ComponentId> = None;
        for segment in trimmed.split('.') {
            let (category, rest) = segment.split_once('[').ok_or_else(invalid)?;
            let index: usize = rest
                .trim_end_matches(']')
                .parse()
                .map_err(|_| invalid())?;
            let list = match current {
                None if category == "mixers" => engine.tree.mixers(),
                None => return Err(invalid()),
                Some(id) => child_list(engine.tree.get(id)?, category)
                    .map(Vec::as_slice)
                    .ok_or_else(invalid)?,
            };
            current = Some(*list.get(index).ok_or_else(invalid)?);
        }
        current.ok_or_else(invalid)
    }

    pub async fn component(&self, id: ComponentId) -> Result<Component> {
        Ok(self.engine.lock().await.tree.get(id)?.clone())
    }

    pub async fn children(&self, id: ComponentId) -> Result<Vec<ComponentId>> {
        self.engine.lock().await.tree.children(id)
    }

    pub async fn dump_components(&self) -> Result<String> {
        let engine = self.engine.lock().await;
        let mut dumps = Vec::new();
        for mixer in engine.tree.mixers() {
            dumps.push(engine.tree.dump(*mixer)?);
        }
        Ok(dumps.join("\n"))
    }

    pub async fn specs(&self, id: ComponentId) -> Result<Vec<Spec>> {
        Ok(self.engine.lock().await.tree.get(id)?.specs.clone())
    }

    pub async fn component_artifacts(&self, id: ComponentId) -> Result<Artifacts> {
        Ok(self.engine.lock().await.tree.get(id)?.artifacts.clone())
    }

    pub async fn context_artifacts(&self, context: ContextId) -> Result<Artifacts> {
        let engine = self.engine.lock().await;
        Ok(engine.context_entry(context)?.artifacts.clone())
    }

    pub async fn graph_order(&self, id: ComponentId) -> Result<GraphOrder> {
        self.engine.lock().await.tree.graph_order(id)
    }

    pub async fn numeric_address(&self, id: ComponentId) -> Result<String> {
        self.engine.lock().await.tree.numeric_address(id)
    }

    pub async fn nested_address(&self, id: ComponentId) -> Result<String> {
        self.engine.lock().await.tree.nested_address(id)
    }

    pub async fn is_active(&self, track: ComponentId) -> Result<bool> {
        let engine = self.engine.lock().await;
        expect_track(&engine.tree, track)?;
        Ok(engine.tree.get(track)?.is_active)
    }

    pub async fn parameter(&self, id: ComponentId, name: &str) -> Result<f64> {
        let engine = self.engine.lock().await;
        engine
            .tree
            .get(id)?
            .parameters
            .get(name)
            .map(|parameter| parameter.value)
            .ok_or_else(|| EngineError::UnknownParameter {
                component: id,
                name: name.to_string(),
            })
    }

    pub async fn last_pass(&self) -> Option<PassReport> {
        self.engine.lock().await.last_pass.clone()
    }
}
