use crate::address::Entity;
use crate::component::ComponentId;
use crate::error::Result;
use crate::factory::SpecFactory;
use crate::order::feedsback;
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

/// One patch cable from the parent track's main bus into the target, placed
/// on either side of the parent's channel strip.
pub(super) fn resolve(
    recipe: &Recipe<'_>,
    postfader: bool,
    target: ComponentId,
    factory: &mut SpecFactory,
) -> Result<()> {
    let tree = recipe.tree;
    let parent = recipe.parent()?;
    recipe.resolve_parameters(factory);

    let synthdef = factory.add_synthdef(SynthDef::patch_cable(
        tree.effective_channel_count(parent)?,
        tree.effective_channel_count(target)?,
    ));
    let strip = recipe.address_of(parent, Entity::Nodes, "channel-strip")?;
    let placement = if postfader {
        Placement::after(strip)
    } else {
        Placement::before(strip)
    };
    let feeds_back = feedsback(
        &tree.feedback_graph_order(recipe.id())?,
        &tree.graph_order(target)?,
    );
    let out = if feeds_back { "feedback" } else { "main" };

    let gain = recipe.binding(factory, "gain")?;
    factory.add_synth(
        "synth",
        SynthSpec::new(synthdef, placement)
            .with_kwarg(
                "active",
                Binding::Address(recipe.address_of(parent, Entity::ControlBuses, "active")?),
            )
            .with_kwarg("gain", gain)
            .with_kwarg(
                "in_",
                Binding::Address(recipe.address_of(parent, Entity::AudioBuses, "main")?),
            )
            .with_kwarg(
                "out",
                Binding::Address(recipe.address_of(target, Entity::AudioBuses, out)?),
            )
            .with_destroy_strategy(DestroyStrategy::set(&[
                ("done_action", 2.0),
                ("gate", 0.0),
            ])),
    );
    Ok(())
}
