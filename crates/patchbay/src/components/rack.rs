use crate::component::{Rack, WriteMode};
use crate::error::Result;
use crate::factory::SpecFactory;
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

/// A rack without chains is only its groups. Its container group has nothing
/// inside to release it, so it is freed outright.
pub(super) fn resolve(
    recipe: &Recipe<'_>,
    rack: &Rack,
    factory: &mut SpecFactory,
) -> Result<()> {
    let channel_count = recipe.channel_count;
    let container = recipe.parent()?;
    let has_chains = !rack.chains.is_empty();

    let previous = recipe.previous_sibling()?;
    let strategy = if has_chains {
        DestroyStrategy::release()
    } else {
        DestroyStrategy::Free
    };
    let group = factory.add_container_group(
        &recipe.tree.numeric_address(container)?,
        "devices",
        previous.as_deref(),
        Some(strategy),
    );
    let chains = factory.add_group("chains", Placement::head_of(group.clone()), None);
    if !has_chains {
        return Ok(());
    }

    recipe.resolve_parameters(factory);
    let (parent_main, parent_channels) = recipe.main_bus_of(container)?;
    factory.add_audio_bus("main", channel_count);
    let mix = factory.add_audio_bus("mix", channel_count);

    let cable = factory.add_synthdef(SynthDef::patch_cable_with_mode(
        channel_count,
        parent_channels,
        rack.write_mode,
    ));
    let mut output = SynthSpec::new(cable, Placement::after(chains))
        .with_kwarg("in_", Binding::Address(mix))
        .with_kwarg("out", Binding::Address(parent_main.clone()))
        .with_destroy_strategy(DestroyStrategy::set(&[("done_action", 14.0)]));
    if rack.write_mode == WriteMode::Mix {
        output = output.with_kwarg("mix", recipe.binding(factory, "mix")?);
    }
    factory.add_synth("output", output);

    let (siblings, index) = recipe.tree.siblings(recipe.id())?;
    if index + 1 < siblings.len() {
        let meters = factory.add_synthdef(SynthDef::meters(parent_channels));
        let levels = factory.add_control_bus("levels", parent_channels, 0.0);
        factory.add_synth(
            "levels",
            SynthSpec::new(meters, Placement::tail_of(group))
                .with_kwarg("in_", Binding::Address(parent_main))
                .with_kwarg("out", Binding::Address(levels)),
        );
    }
    Ok(())
}
