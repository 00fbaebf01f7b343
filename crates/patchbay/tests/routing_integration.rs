//! Routing, activation and restructuring passes through the `Session` API
//!
//! Covers:
//! - feedback buses appearing and disappearing with backwards sends
//! - sends deleted along with their target
//! - solo and mute pushing `active` bus values
//! - moving, grouping and ungrouping realized tracks

use std::sync::Arc;

use patchbay::{
    Address, ComponentId, ContextId, Entity, MemoryContext, NodeId, Request, Session, SpecKind,
    TrackInput, TrackOutput,
};
use patchbay::spec::Binding;
use pretty_assertions::assert_eq;

async fn online() -> (Session, Arc<MemoryContext>, ComponentId) {
    let session = Session::default();
    let context = Arc::new(MemoryContext::new(ContextId(0)));
    session.add_context(context.clone()).await.unwrap();
    let mixer = session.add_mixer(None, None).await.unwrap();
    session.boot().await.unwrap();
    context.clear_log();
    (session, context, mixer)
}

async fn owner(session: &Session, id: ComponentId) -> String {
    session.numeric_address(id).await.unwrap()
}

async fn node_id(session: &Session, id: ComponentId, name: &str) -> NodeId {
    let owner = owner(session, id).await;
    session.component_artifacts(id).await.unwrap().nodes[&Address::new(&owner, Entity::Nodes, name)]
}

async fn active_value(session: &Session, context: &MemoryContext, track: ComponentId) -> f64 {
    let owner = owner(session, track).await;
    let bus = session.component_artifacts(track).await.unwrap().control_buses
        [&Address::new(&owner, Entity::ControlBuses, "active")];
    context.control_bus_value(bus).unwrap()
}

async fn kwarg(session: &Session, id: ComponentId, synth: &str, key: &str) -> Option<Binding> {
    let owner = owner(session, id).await;
    let address = Address::new(&owner, Entity::Nodes, synth);
    session
        .specs(id)
        .await
        .unwrap()
        .into_iter()
        .find(|spec| spec.address == address)
        .and_then(|spec| match spec.kind {
            SpecKind::Synth(synth) => synth.kwargs.get(key).cloned(),
            _ => None,
        })
}

// =============================================================================
// Sends and feedback
// =============================================================================

#[tokio::test]
async fn test_backwards_send_writes_into_a_feedback_bus() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let feedback = Address::new("tracks[2]", Entity::AudioBuses, "feedback");

    let forward = session.add_send(a, b, true, None).await.unwrap();
    assert_eq!(
        kwarg(&session, forward, "synth", "out").await,
        Some(Binding::Address(Address::new("tracks[3]", Entity::AudioBuses, "main")))
    );
    assert!(!session
        .component_artifacts(a)
        .await
        .unwrap()
        .audio_buses
        .contains_key(&feedback));

    let backward = session.add_send(b, a, true, None).await.unwrap();
    assert_eq!(
        kwarg(&session, backward, "synth", "out").await,
        Some(Binding::Address(feedback.clone()))
    );
    assert!(session
        .component_artifacts(a)
        .await
        .unwrap()
        .audio_buses
        .contains_key(&feedback));
    let reader = node_id(&session, a, "feedback").await;
    assert_eq!(
        context.synth_name(reader).as_deref(),
        Some("patchbay:fb-patch-cable:2x2")
    );

    session.delete(backward).await.unwrap();
    let artifacts = session.component_artifacts(a).await.unwrap();
    assert!(!artifacts.audio_buses.contains_key(&feedback));
    assert!(!context.contains_node(reader));
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_moving_a_send_target_ahead_of_its_source_switches_to_feedback() {
    let (session, _context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let send = session.add_send(a, b, true, None).await.unwrap();
    let feedback = Address::new("tracks[3]", Entity::AudioBuses, "feedback");
    let main = Address::new("tracks[3]", Entity::AudioBuses, "main");
    assert_eq!(
        kwarg(&session, send, "synth", "out").await,
        Some(Binding::Address(main.clone()))
    );

    session.move_component(b, mixer, 0).await.unwrap();
    assert_eq!(session.children(mixer).await.unwrap(), vec![b, a]);
    assert!(session
        .component_artifacts(b)
        .await
        .unwrap()
        .audio_buses
        .contains_key(&feedback));
    assert_eq!(
        kwarg(&session, send, "synth", "out").await,
        Some(Binding::Address(feedback.clone()))
    );
    assert!(session.reconcile(mixer).await.unwrap().is_empty());

    session.move_component(b, mixer, 1).await.unwrap();
    assert_eq!(session.children(mixer).await.unwrap(), vec![a, b]);
    assert!(!session
        .component_artifacts(b)
        .await
        .unwrap()
        .audio_buses
        .contains_key(&feedback));
    assert_eq!(
        kwarg(&session, send, "synth", "out").await,
        Some(Binding::Address(main))
    );
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_send_is_deleted_with_its_target() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let send = session.add_send(a, b, true, None).await.unwrap();
    let synth = node_id(&session, send, "synth").await;
    assert!(context.contains_node(synth));

    let mut report = session.delete(b).await.unwrap();
    report.deleted.sort();
    assert_eq!(report.deleted, vec![b, send]);
    assert!(session.component(send).await.is_err());
    assert!(session.children(a).await.unwrap().is_empty());
    assert!(!context.contains_node(synth));
    assert!(session.component(a).await.unwrap().connections.is_empty());
}

#[tokio::test]
async fn test_track_input_from_a_later_track_reads_the_previous_block() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();

    session.set_input(a, TrackInput::Track(b)).await.unwrap();
    let input = node_id(&session, a, "input").await;
    assert_eq!(
        context.synth_name(input).as_deref(),
        Some("patchbay:fb-patch-cable:2x2")
    );

    session.set_input(b, TrackInput::Track(a)).await.unwrap();
    let input = node_id(&session, b, "input").await;
    assert_eq!(
        context.synth_name(input).as_deref(),
        Some("patchbay:patch-cable:2x2")
    );

    session.delete(b).await.unwrap();
    let track = session.component(a).await.unwrap();
    assert_eq!(track.track().unwrap().input, TrackInput::None);
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_output_to_nothing_removes_the_output_synth() {
    let (session, context, mixer) = online().await;
    let track = session.add_track(mixer, None).await.unwrap();
    let output = node_id(&session, track, "output").await;

    session.set_output(track, TrackOutput::None).await.unwrap();
    assert!(!context.contains_node(output));
    let owner = owner(&session, track).await;
    assert!(!session
        .component_artifacts(track)
        .await
        .unwrap()
        .nodes
        .contains_key(&Address::new(&owner, Entity::Nodes, "output")));

    session.set_output(track, TrackOutput::Default).await.unwrap();
    let output = node_id(&session, track, "output").await;
    assert!(context.contains_node(output));
}

// =============================================================================
// Activation
// =============================================================================

#[tokio::test]
async fn test_solo_and_mute() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let a1 = session.add_track(a, None).await.unwrap();

    session.set_soloed(a1, true, false).await.unwrap();
    assert!(session.is_active(a).await.unwrap());
    assert!(session.is_active(a1).await.unwrap());
    assert!(!session.is_active(b).await.unwrap());
    assert_eq!(active_value(&session, &context, b).await, 0.0);

    context.clear_log();
    session.set_soloed(b, true, true).await.unwrap();
    assert!(session.is_active(b).await.unwrap());
    assert!(!session.is_active(a1).await.unwrap());
    assert!(!session.component(a1).await.unwrap().track().unwrap().soloed);
    assert_eq!(context.bundles().len(), 1);
    assert!(context
        .requests()
        .iter()
        .all(|request| matches!(request, Request::SetBus { .. })));

    session.set_muted(b, true).await.unwrap();
    assert!(!session.is_active(b).await.unwrap());
    assert_eq!(active_value(&session, &context, b).await, 0.0);

    session.set_soloed(b, false, false).await.unwrap();
    session.set_muted(b, false).await.unwrap();
    for track in [a, b, a1] {
        assert!(session.is_active(track).await.unwrap());
        assert_eq!(active_value(&session, &context, track).await, 1.0);
    }
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_tracks_respect_an_existing_solo() {
    let (session, context, mixer) = online().await;
    let soloed = session.add_track(mixer, None).await.unwrap();
    session.set_soloed(soloed, true, false).await.unwrap();

    let track = session.add_track(mixer, None).await.unwrap();
    assert!(!session.is_active(track).await.unwrap());
    assert_eq!(active_value(&session, &context, track).await, 0.0);
    let report = session.last_pass().await.unwrap();
    assert_eq!(report.activation, vec![(track, false)]);
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

// =============================================================================
// Restructuring
// =============================================================================

#[tokio::test]
async fn test_move_keeps_nodes_and_reorders_them() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let c = session.add_track(mixer, None).await.unwrap();
    let groups = [
        node_id(&session, a, "group").await,
        node_id(&session, b, "group").await,
        node_id(&session, c, "group").await,
    ];
    context.clear_log();

    session.move_component(c, mixer, 0).await.unwrap();
    assert_eq!(session.children(mixer).await.unwrap(), vec![c, a, b]);
    assert!(!context.requests().iter().any(|request| matches!(
        request,
        Request::NewGroup { .. } | Request::FreeNode { .. }
    )));
    let tracks = node_id(&session, mixer, "tracks").await;
    assert_eq!(
        context.group_children(tracks),
        vec![groups[2], groups[0], groups[1]]
    );
    assert_eq!(node_id(&session, c, "group").await, groups[2]);
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_grouping_moves_realized_tracks_into_the_group() {
    let (session, context, mixer) = online().await;
    let a = session.add_track(mixer, None).await.unwrap();
    let b = session.add_track(mixer, None).await.unwrap();
    let b_group = node_id(&session, b, "group").await;

    let group = session.group_tracks(mixer, 0, 2, None).await.unwrap();
    let inner = node_id(&session, group, "tracks").await;
    assert_eq!(context.node_parent(b_group), Some(inner));
    assert_eq!(
        context.group_children(inner),
        vec![node_id(&session, a, "group").await, b_group]
    );
    assert_eq!(
        session.nested_address(b).await.unwrap(),
        "session.mixers[0].tracks[0].tracks[1]"
    );
    assert!(session.reconcile(mixer).await.unwrap().is_empty());

    session.ungroup(group).await.unwrap();
    let tracks = node_id(&session, mixer, "tracks").await;
    assert_eq!(context.node_parent(b_group), Some(tracks));
    assert_eq!(session.children(mixer).await.unwrap(), vec![a, b]);
    assert!(session.reconcile(mixer).await.unwrap().is_empty());
}
