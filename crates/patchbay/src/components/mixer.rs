use crate::context::{AddAction, BusGroup};
use crate::error::Result;
use crate::factory::SpecFactory;
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

/// The mixer's strip writes into the context's hardware outputs, narrowed to
/// however many channels the context has.
pub(super) fn resolve(
    recipe: &Recipe<'_>,
    factory: &mut SpecFactory,
    output: BusGroup,
) -> Result<()> {
    let channel_count = recipe.channel_count;
    recipe.resolve_parameters(factory);

    let channel_strip = factory.add_synthdef(SynthDef::channel_strip(channel_count));
    let meters = factory.add_synthdef(SynthDef::meters(channel_count));
    let cable = factory.add_synthdef(SynthDef::patch_cable(
        channel_count,
        channel_count.min(output.count),
    ));

    let main = factory.add_audio_bus("main", channel_count);
    let input_levels = factory.add_control_bus("input-levels", channel_count, 0.0);
    let output_levels = factory.add_control_bus("output-levels", channel_count, 0.0);

    let group = factory.add_group(
        "group",
        Placement::new(AddAction::AddToHead, None),
        Some(DestroyStrategy::release()),
    );
    let tracks = factory.add_group("tracks", Placement::head_of(group.clone()), None);
    factory.add_group("devices", Placement::tail_of(group.clone()), None);

    let gain = recipe.binding(factory, "gain")?;
    let strip = factory.add_synth(
        "channel-strip",
        SynthSpec::new(channel_strip, Placement::tail_of(group.clone()))
            .with_kwarg("gain", gain)
            .with_kwarg("out", Binding::Address(main.clone()))
            .with_destroy_strategy(DestroyStrategy::set(&[("done_action", 14.0)])),
    );
    factory.add_synth(
        "input-levels",
        SynthSpec::new(meters.clone(), Placement::after(tracks))
            .with_kwarg("in_", Binding::Address(main.clone()))
            .with_kwarg("out", Binding::Address(input_levels)),
    );
    factory.add_synth(
        "output-levels",
        SynthSpec::new(meters, Placement::after(strip))
            .with_kwarg("in_", Binding::Address(main.clone()))
            .with_kwarg("out", Binding::Address(output_levels)),
    );
    factory.add_synth(
        "output",
        SynthSpec::new(cable, Placement::tail_of(group))
            .with_kwarg("in_", Binding::Address(main))
            .with_kwarg("out", Binding::Bus(output)),
    );
    Ok(())
}
