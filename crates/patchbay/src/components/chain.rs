use crate::address::Entity;
use crate::component::{ComponentKind, ReadMode, WriteMode};
use crate::error::{EngineError, Result};
use crate::factory::SpecFactory;
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

/// Chains run one after another inside the rack's `chains` group, each
/// processing the rack's main bus in place and summing the result into the
/// rack's mix bus.
pub(super) fn resolve(recipe: &Recipe<'_>, factory: &mut SpecFactory) -> Result<()> {
    let tree = recipe.tree;
    let channel_count = recipe.channel_count;
    let rack_id = recipe.parent()?;
    let rack_component = tree.get(rack_id)?;
    let ComponentKind::Rack(rack) = &rack_component.kind else {
        return Err(EngineError::InvalidKind {
            component: rack_id,
            expected: "rack",
            actual: rack_component.kind.name(),
        });
    };
    let rack_main = recipe.address_of(rack_id, Entity::AudioBuses, "main")?;
    let rack_mix = recipe.address_of(rack_id, Entity::AudioBuses, "mix")?;
    recipe.resolve_parameters(factory);

    let channel_strip = factory.add_synthdef(SynthDef::channel_strip(channel_count));
    let meters = factory.add_synthdef(SynthDef::meters(channel_count));

    let active = factory.add_control_bus("active", 1, recipe.is_active());
    let input_levels = match rack.read_mode {
        ReadMode::Replace => Some(factory.add_control_bus("input-levels", channel_count, 0.0)),
        ReadMode::Ignore => None,
    };
    let output_levels = factory.add_control_bus("output-levels", channel_count, 0.0);

    let previous = recipe.previous_sibling()?;
    let group = factory.add_container_group(
        &tree.numeric_address(rack_id)?,
        "chains",
        previous.as_deref(),
        Some(DestroyStrategy::release()),
    );
    let devices = factory.add_group("devices", Placement::tail_of(group), None);

    let input = match rack.read_mode {
        ReadMode::Ignore => {
            let zero = factory.add_synthdef(SynthDef::zero(channel_count));
            factory.add_synth(
                "input",
                SynthSpec::new(zero, Placement::before(devices.clone()))
                    .with_kwarg("out", Binding::Address(rack_main.clone())),
            )
        }
        ReadMode::Replace => {
            let container = rack_component.parent.ok_or(EngineError::Detached(rack_id))?;
            let (source, source_channels) = recipe.main_bus_of(container)?;
            let cable = factory.add_synthdef(SynthDef::patch_cable_with_mode(
                source_channels,
                channel_count,
                WriteMode::Replace,
            ));
            factory.add_synth(
                "input",
                SynthSpec::new(cable, Placement::before(devices.clone()))
                    .with_kwarg("in_", Binding::Address(source))
                    .with_kwarg("out", Binding::Address(rack_main.clone())),
            )
        }
    };
    if let Some(input_levels) = input_levels {
        factory.add_synth(
            "input-levels",
            SynthSpec::new(meters.clone(), Placement::after(input))
                .with_kwarg("active", Binding::Address(active.clone()))
                .with_kwarg("in_", Binding::Address(rack_main.clone()))
                .with_kwarg("out", Binding::Address(input_levels)),
        );
    }

    let gain = recipe.binding(factory, "gain")?;
    let strip = factory.add_synth(
        "channel-strip",
        SynthSpec::new(channel_strip, Placement::after(devices))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("gain", gain)
            .with_kwarg("out", Binding::Address(rack_main.clone()))
            .with_destroy_strategy(DestroyStrategy::set(&[("done_action", 14.0)])),
    );
    factory.add_synth(
        "output-levels",
        SynthSpec::new(meters, Placement::after(strip.clone()))
            .with_kwarg("active", Binding::Address(active))
            .with_kwarg("in_", Binding::Address(rack_main.clone()))
            .with_kwarg("out", Binding::Address(output_levels)),
    );
    let cable = factory.add_synthdef(SynthDef::patch_cable(channel_count, channel_count));
    factory.add_synth(
        "output",
        SynthSpec::new(cable, Placement::after(strip))
            .with_kwarg("in_", Binding::Address(rack_main))
            .with_kwarg("out", Binding::Address(rack_mix)),
    );
    Ok(())
}
