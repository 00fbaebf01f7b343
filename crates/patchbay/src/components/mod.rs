//! Spec recipes, one module per component kind.
//!
//! `resolve_specs` is the only entry point. It reads the tree and returns
//! the complete set of specs a component needs in one context; it never
//! touches a context.

mod chain;
mod device;
mod mixer;
mod rack;
mod send;
mod track;

use crate::address::{Address, Entity};
use crate::component::{Component, ComponentId, ComponentKind, Tree};
use crate::context::{BusGroup, ContextId};
use crate::error::{EngineError, Result};
use crate::factory::SpecFactory;
use crate::spec::{Binding, Spec};

/// What a recipe needs to know about the context it resolves against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextTarget {
    pub id: ContextId,
    /// Hardware output buses, where mixers write.
    pub output: BusGroup,
}

/// Resolve every spec `id` needs against `target`.
pub fn resolve_specs(tree: &Tree, id: ComponentId, target: ContextTarget) -> Result<Vec<Spec>> {
    let component = tree.get(id)?;
    let mut factory = SpecFactory::new(id, component.numeric_address(), target.id);
    let recipe = Recipe {
        tree,
        component,
        channel_count: tree.effective_channel_count(id)?,
    };
    match &component.kind {
        ComponentKind::Mixer { .. } => mixer::resolve(&recipe, &mut factory, target.output)?,
        ComponentKind::Track(track) => track::resolve(&recipe, track, &mut factory)?,
        ComponentKind::Send { postfader, target } => {
            send::resolve(&recipe, *postfader, *target, &mut factory)?
        }
        ComponentKind::Rack(rack) => rack::resolve(&recipe, rack, &mut factory)?,
        ComponentKind::Chain { .. } => chain::resolve(&recipe, &mut factory)?,
        ComponentKind::Device(config) => device::resolve(&recipe, config, &mut factory)?,
    }
    Ok(factory.into_specs())
}

/// The component being resolved plus the tree it lives in.
struct Recipe<'a> {
    tree: &'a Tree,
    component: &'a Component,
    channel_count: usize,
}

impl Recipe<'_> {
    fn id(&self) -> ComponentId {
        self.component.id
    }

    fn parent(&self) -> Result<ComponentId> {
        self.component
            .parent
            .ok_or(EngineError::Detached(self.component.id))
    }

    /// Address of an entity owned by another component.
    fn address_of(&self, id: ComponentId, entity: Entity, name: &str) -> Result<Address> {
        Ok(Address::new(&self.tree.numeric_address(id)?, entity, name))
    }

    /// The audio bus devices inside `container` process in place, with its
    /// channel count. Chains work on their rack's bus.
    fn main_bus_of(&self, container: ComponentId) -> Result<(Address, usize)> {
        let owner = match &self.tree.get(container)?.kind {
            ComponentKind::Chain { .. } => self
                .tree
                .get(container)?
                .parent
                .ok_or(EngineError::Detached(container))?,
            _ => container,
        };
        Ok((
            self.address_of(owner, Entity::AudioBuses, "main")?,
            self.tree.effective_channel_count(owner)?,
        ))
    }

    /// Address of the previous sibling, if any.
    fn previous_sibling(&self) -> Result<Option<String>> {
        self.tree
            .previous_sibling(self.id())?
            .map(|previous| self.tree.numeric_address(previous))
            .transpose()
    }

    fn resolve_parameters(&self, factory: &mut SpecFactory) {
        for parameter in self.component.parameters.values() {
            parameter.resolve_specs(factory);
        }
    }

    fn binding(&self, factory: &SpecFactory, name: &str) -> Result<Binding> {
        self.component
            .parameters
            .get(name)
            .map(|parameter| parameter.binding(factory))
            .ok_or_else(|| EngineError::UnknownParameter {
                component: self.id(),
                name: name.to_string(),
            })
    }

    fn is_active(&self) -> f64 {
        f64::from(u8::from(self.component.is_active))
    }
}
