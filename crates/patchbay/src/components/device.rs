use crate::component::DeviceConfig;
use crate::error::Result;
use crate::factory::SpecFactory;
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

pub(super) fn resolve(
    recipe: &Recipe<'_>,
    config: &DeviceConfig,
    factory: &mut SpecFactory,
) -> Result<()> {
    let container = recipe.parent()?;
    let (out, _) = recipe.main_bus_of(container)?;
    recipe.resolve_parameters(factory);

    let synthdef = factory.add_synthdef(SynthDef::device(&config.name, recipe.channel_count));
    for buffer in &config.buffers {
        factory.add_buffer(&buffer.name, buffer.channel_count, buffer.frame_count);
    }

    let previous = recipe.previous_sibling()?;
    let group = factory.add_container_group(
        &recipe.tree.numeric_address(container)?,
        "devices",
        previous.as_deref(),
        Some(DestroyStrategy::release()),
    );

    let mut synth = SynthSpec::new(synthdef, Placement::tail_of(group))
        .with_kwarg("out", Binding::Address(out))
        .with_destroy_strategy(DestroyStrategy::set(&[("done_action", 14.0)]));
    for parameter in recipe.component.parameters.values() {
        synth = synth.with_kwarg(&parameter.name, parameter.binding(factory));
    }
    factory.add_synth("synth", synth);
    Ok(())
}
