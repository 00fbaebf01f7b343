use crate::address::{Address, Entity};
use crate::component::{Endpoint, Track};
use crate::error::Result;
use crate::factory::SpecFactory;
use crate::order::{feedsback, needs_feedback};
use crate::spec::{Binding, DestroyStrategy, Placement, SynthSpec};
use crate::synthdef::SynthDef;

use super::Recipe;

pub(super) fn resolve(
    recipe: &Recipe<'_>,
    track: &Track,
    factory: &mut SpecFactory,
) -> Result<()> {
    let channel_count = recipe.channel_count;
    let parent = recipe.tree.numeric_address(recipe.parent()?)?;
    recipe.resolve_parameters(factory);

    let channel_strip = factory.add_synthdef(SynthDef::channel_strip(channel_count));
    let meters = factory.add_synthdef(SynthDef::meters(channel_count));

    let main = factory.add_audio_bus("main", channel_count);
    let active = factory.add_control_bus("active", 1, recipe.is_active());
    let input_levels = factory.add_control_bus("input-levels", channel_count, 0.0);
    let output_levels = factory.add_control_bus("output-levels", channel_count, 0.0);

    let previous = recipe.previous_sibling()?;
    let group = factory.add_container_group(
        &parent,
        "tracks",
        previous.as_deref(),
        Some(DestroyStrategy::release()),
    );
    let tracks = factory.add_group("tracks", Placement::head_of(group.clone()), None);
    factory.add_group("devices", Placement::tail_of(group.clone()), None);

    let gain = recipe.binding(factory, "gain")?;
    let strip = factory.add_synth(
        "channel-strip",
        SynthSpec::new(channel_strip, Placement::tail_of(group.clone()))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("gain", gain)
            .with_kwarg("out", Binding::Address(main.clone()))
            .with_destroy_strategy(DestroyStrategy::set(&[("done_action", 14.0)])),
    );
    factory.add_synth(
        "input-levels",
        SynthSpec::new(meters.clone(), Placement::after(tracks))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("in_", Binding::Address(main.clone()))
            .with_kwarg("out", Binding::Address(input_levels)),
    );
    factory.add_synth(
        "output-levels",
        SynthSpec::new(meters, Placement::after(strip))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("in_", Binding::Address(main.clone()))
            .with_kwarg("out", Binding::Address(output_levels)),
    );

    if let Some(input) = track.cached_input {
        resolve_input(recipe, input, factory, &group, &main, &active)?;
    }
    if let Some(output) = track.cached_output {
        resolve_output(recipe, output, factory, &group, &main, &active)?;
    }

    if needs_feedback(recipe.tree, recipe.id())? {
        let cable = factory.add_synthdef(SynthDef::feedback_patch_cable(
            channel_count,
            channel_count,
        ));
        let feedback = factory.add_audio_bus("feedback", channel_count);
        factory.add_synth(
            "feedback",
            SynthSpec::new(cable, Placement::head_of(group))
                .with_kwarg("active", Binding::Address(active))
                .with_kwarg("in_", Binding::Address(feedback))
                .with_kwarg("out", Binding::Address(main))
                .with_destroy_strategy(DestroyStrategy::release()),
        );
    }
    Ok(())
}

/// Patch cable from the input source into `main`. A source later in graph
/// order is read through the feedback variant.
fn resolve_input(
    recipe: &Recipe<'_>,
    input: Endpoint,
    factory: &mut SpecFactory,
    group: &Address,
    main: &Address,
    active: &Address,
) -> Result<()> {
    let channel_count = recipe.channel_count;
    let (source, source_channels, feeds_back) = match input {
        Endpoint::Bus(bus) => (Binding::Bus(bus), bus.count, false),
        Endpoint::Component(source) => (
            Binding::Address(recipe.address_of(source, Entity::AudioBuses, "main")?),
            recipe.tree.effective_channel_count(source)?,
            feedsback(
                &recipe.tree.feedback_graph_order(source)?,
                &recipe.tree.graph_order(recipe.id())?,
            ),
        ),
    };
    let synthdef = if feeds_back {
        SynthDef::feedback_patch_cable(source_channels, channel_count)
    } else {
        SynthDef::patch_cable(source_channels, channel_count)
    };
    let synthdef = factory.add_synthdef(synthdef);
    factory.add_synth(
        "input",
        SynthSpec::new(synthdef, Placement::head_of(group.clone()))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("in_", source)
            .with_kwarg("out", Binding::Address(main.clone())),
    );
    Ok(())
}

/// Patch cable from `main` into the output target. A backwards edge writes
/// into the target's feedback bus instead of its main bus.
fn resolve_output(
    recipe: &Recipe<'_>,
    output: Endpoint,
    factory: &mut SpecFactory,
    group: &Address,
    main: &Address,
    active: &Address,
) -> Result<()> {
    let (target, target_channels) = match output {
        Endpoint::Bus(bus) => (Binding::Bus(bus), bus.count),
        Endpoint::Component(target) => {
            let feeds_back = feedsback(
                &recipe.tree.feedback_graph_order(recipe.id())?,
                &recipe.tree.graph_order(target)?,
            );
            let bus = if feeds_back { "feedback" } else { "main" };
            (
                Binding::Address(recipe.address_of(target, Entity::AudioBuses, bus)?),
                recipe.tree.effective_channel_count(target)?,
            )
        }
    };
    let synthdef = factory.add_synthdef(SynthDef::patch_cable(
        recipe.channel_count,
        target_channels,
    ));
    factory.add_synth(
        "output",
        SynthSpec::new(synthdef, Placement::tail_of(group.clone()))
            .with_kwarg("active", Binding::Address(active.clone()))
            .with_kwarg("in_", Binding::Address(main.clone()))
            .with_kwarg("out", target),
    );
    Ok(())
}
