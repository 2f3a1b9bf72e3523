//! Integration tests for the synchronization engine.
//!
//! Each test builds an in-memory authoring scene (`common::TestScene`),
//! runs sync passes against a [`RecordingRenderer`], mutates the scene
//! the way the authoring application would, and asserts on the exact
//! renderer calls and cache state.

mod common;

use common::{point_light, small_volume, tri_geometry, TestScene};
use emberbridge_core::geometry::Geometry;
use emberbridge_core::key::{EntityKey, SubmeshKey};
use emberbridge_core::math::{mat4_from_translation, Vec3};
use emberbridge_core::settings::SettingsTree;
use emberbridge_sync::renderer::{RecordingRenderer, RendererOp};
use emberbridge_sync::{Representation, SubmeshRef, SyncConfig, SyncEngine};
use rstest::rstest;

fn engine() -> SyncEngine<RecordingRenderer> {
    let _ = env_logger::builder().is_test(true).try_init();
    SyncEngine::new(RecordingRenderer::new(), SyncConfig::default())
}

fn enabled_environment() -> SettingsTree {
    let mut tree = SettingsTree::new();
    tree.set(&["enable"], true);
    tree.set(&["type"], "color");
    tree.set(&["color"], [0.1f32, 0.1, 0.1]);
    tree.set(&["intensity"], 1.0f32);
    tree.set(&["rotation"], [0.0f32; 3]);
    tree.set(&["background", "override"], false);
    tree
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[test]
fn resync_without_changes_issues_zero_calls() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0, 1]));
    let b = scene.add_shared_object("b", mesh);
    let red = scene.add_material("red", [1.0, 0.0, 0.0, 1.0]);
    for object in [a, b] {
        scene.assign_material(object, 0, Some(red));
    }
    scene.add_light("lamp", point_light("lamp"));
    let duplicator = scene.add_duplicator("scatter");
    scene.set_placements(
        duplicator,
        vec![
            (0, a, mat4_from_translation(Vec3::new(3.0, 0.0, 0.0))),
            (1, a, mat4_from_translation(Vec3::new(6.0, 0.0, 0.0))),
        ],
    );
    scene.set_environment(enabled_environment());

    let mut engine = engine();
    engine.export(&scene).unwrap();
    scene.end_frame();

    let ops_after_export = engine.renderer().op_count();
    assert!(ops_after_export > 0);

    engine.sync(&scene).unwrap();
    assert_eq!(
        engine.renderer().op_count(),
        ops_after_export,
        "second sync must not touch the renderer"
    );
}

// ---------------------------------------------------------------------------
// Prototype sharing and promotion
// ---------------------------------------------------------------------------

#[rstest]
#[case::pair(2)]
#[case::trio(3)]
#[case::many(8)]
fn shared_mesh_extracts_and_uploads_once(#[case] count: usize) {
    let mut scene = TestScene::new();
    let (first, mesh) = scene.add_mesh_object("obj0", tri_geometry("m", &[0, 1]));
    let mut others = Vec::new();
    for i in 1..count {
        others.push(scene.add_shared_object(&format!("obj{i}"), mesh));
    }

    let mut engine = engine();
    engine.sync(&scene).unwrap();

    assert_eq!(scene.extraction_count(), 1);
    assert_eq!(engine.prototypes().len(), 1);
    assert_eq!(engine.renderer().submesh_count(), 2);
    assert_eq!(engine.renderer().instance_count(), 2 * (count - 1));
    assert_eq!(
        engine.representation(first),
        Some(Representation::PrototypeOwner)
    );
    for other in others {
        assert_eq!(
            engine.representation(other),
            Some(Representation::InstanceOf { owner: first })
        );
    }
}

#[test]
fn owner_removal_promotes_the_surviving_placement() {
    // The concrete scenario: A and B share mesh M with two used slots.
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0, 1]));
    let b = scene.add_shared_object("b", mesh);

    let mut engine = engine();
    engine.sync(&scene).unwrap();

    assert_eq!(engine.prototypes().len(), 1);
    assert_eq!(engine.representation(a), Some(Representation::PrototypeOwner));
    assert_eq!(
        engine.representation(b),
        Some(Representation::InstanceOf { owner: a })
    );
    let creations = engine
        .renderer()
        .ops()
        .iter()
        .filter(|op| matches!(op, RendererOp::CreateSubmesh { .. }))
        .count();
    assert_eq!(creations, 2, "B must not upload geometry of its own");

    // Delete A: B takes over the prototype, which stays alive.
    scene.end_frame();
    scene.remove_object(a);
    engine.renderer_mut().clear_ops();
    engine.sync(&scene).unwrap();

    assert_eq!(engine.representation(b), Some(Representation::PrototypeOwner));
    assert_eq!(engine.instances().owner_of(mesh), Some(b));
    assert_eq!(engine.prototypes().len(), 1);
    assert_eq!(engine.renderer().submesh_count(), 2);
    assert_eq!(engine.renderer().instance_count(), 0);

    let ops = engine.renderer_mut().take_ops();
    let removed_instances = ops
        .iter()
        .filter(|op| matches!(op, RendererOp::RemoveInstance(_)))
        .count();
    let removed_submeshes = ops
        .iter()
        .filter(|op| matches!(op, RendererOp::RemoveSubmesh(_)))
        .count();
    let created_submeshes = ops
        .iter()
        .filter(|op| matches!(op, RendererOp::CreateSubmesh { .. }))
        .count();
    assert_eq!((removed_instances, removed_submeshes, created_submeshes), (2, 2, 2));
}

// ---------------------------------------------------------------------------
// Material propagation
// ---------------------------------------------------------------------------

#[test]
fn material_change_reaches_exactly_the_affected_submeshes() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0]));
    let b = scene.add_shared_object("b", mesh);
    let (c, _) = scene.add_mesh_object("c", tri_geometry("other", &[0]));
    let red = scene.add_material("red", [1.0, 0.0, 0.0, 1.0]);
    let green = scene.add_material("green", [0.0, 1.0, 0.0, 1.0]);
    scene.assign_material(a, 0, Some(red));
    scene.assign_material(b, 0, Some(red));
    scene.assign_material(c, 0, Some(green));

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();

    let green_binding = engine.renderer().submesh_binding(SubmeshRef::new(c, 0));
    assert!(green_binding.is_some());

    scene.edit_material(red, [0.5, 0.0, 0.0, 1.0]);
    engine.renderer_mut().clear_ops();
    engine.sync(&scene).unwrap();

    let ops = engine.renderer_mut().take_ops();
    assert!(!ops.is_empty());
    // Every op touches the shared prototype's placements or the
    // material itself, never object C.
    for op in &ops {
        let placement = match op {
            RendererOp::BindSubmeshMaterial { submesh, .. }
            | RendererOp::UnbindSubmeshMaterial(submesh) => Some(submesh.placement),
            RendererOp::BindInstanceMaterial { instance, .. }
            | RendererOp::UnbindInstanceMaterial(instance) => Some(instance.placement),
            RendererOp::CreateMaterial { .. } | RendererOp::RemoveMaterial(_) => None,
            other => panic!("unexpected op during material propagation: {other:?}"),
        };
        if let Some(placement) = placement {
            assert!(placement == a || placement == b, "op leaked to {placement}");
        }
    }
    // Owner and instance both carry the new handle.
    let owner_handle = engine.renderer().submesh_binding(SubmeshRef::new(a, 0));
    let instance_handle = engine.renderer().instance_binding(SubmeshRef::new(b, 0));
    assert!(owner_handle.is_some());
    assert_eq!(owner_handle, instance_handle);
    // C still has its original binding.
    assert_eq!(
        engine.renderer().submesh_binding(SubmeshRef::new(c, 0)),
        green_binding
    );
}

#[test]
fn targeted_material_update_rebinds_and_clears() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0]));
    let b = scene.add_shared_object("b", mesh);
    let red = scene.add_material("red", [1.0, 0.0, 0.0, 1.0]);
    scene.assign_material(a, 0, Some(red));
    scene.assign_material(b, 0, Some(red));

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    engine.renderer_mut().clear_ops();

    let submesh = SubmeshKey::new(mesh, 0);
    engine.update_material(&scene, &[submesh], Some(red)).unwrap();
    assert!(engine
        .renderer()
        .submesh_binding(SubmeshRef::new(a, 0))
        .is_some());

    engine.update_material(&scene, &[submesh], None).unwrap();
    assert_eq!(engine.renderer().submesh_binding(SubmeshRef::new(a, 0)), None);
    assert_eq!(engine.renderer().instance_binding(SubmeshRef::new(b, 0)), None);
    assert_eq!(engine.materials().binding(submesh), None);
}

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

#[test]
fn hide_then_show_restores_representation_without_re_extraction() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0]));
    let b = scene.add_shared_object("b", mesh);

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert_eq!(scene.extraction_count(), 1);

    scene.set_hidden_render(b, true);
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert!(engine.renderer().instance_hidden(SubmeshRef::new(b, 0)));
    assert_eq!(
        engine.representation(b),
        Some(Representation::InstanceOf { owner: a })
    );

    scene.set_hidden_render(b, false);
    engine.sync(&scene).unwrap();
    assert!(!engine.renderer().instance_hidden(SubmeshRef::new(b, 0)));
    assert_eq!(
        engine.representation(b),
        Some(Representation::InstanceOf { owner: a }),
        "re-show must restore the previous representation"
    );
    assert_eq!(scene.extraction_count(), 1, "no re-extraction on re-show");
}

#[test]
fn hiding_the_owner_keeps_instances_renderable() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0]));
    let b = scene.add_shared_object("b", mesh);

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();

    scene.set_hidden_render(a, true);
    engine.sync(&scene).unwrap();

    // The owner is hidden, not torn down: the instance still references
    // live geometry.
    assert_eq!(engine.representation(a), Some(Representation::PrototypeOwner));
    assert!(engine.renderer().submesh_hidden(SubmeshRef::new(a, 0)));
    assert!(engine.renderer().has_instance(SubmeshRef::new(b, 0)));
    assert_eq!(engine.instances().owner_of(mesh), Some(a));
}

// ---------------------------------------------------------------------------
// Duplicators
// ---------------------------------------------------------------------------

#[test]
fn duplicator_removal_cascades_and_releases_the_prototype() {
    let mut scene = TestScene::new();
    let (source, _) = scene.add_mesh_object("source", tri_geometry("m", &[0]));
    scene.set_hidden_render(source, true);
    let duplicator = scene.add_duplicator("scatter");
    scene.set_placements(
        duplicator,
        (0..3)
            .map(|i| {
                (
                    i,
                    source,
                    mat4_from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0)),
                )
            })
            .collect(),
    );

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();

    assert_eq!(engine.prototypes().len(), 1);
    assert_eq!(engine.renderer().submesh_count(), 1);
    assert_eq!(engine.renderer().instance_count(), 2);
    assert_eq!(engine.instances().len(), 3);

    scene.remove_object(duplicator);
    engine.sync(&scene).unwrap();

    assert_eq!(engine.instances().len(), 0);
    assert_eq!(engine.prototypes().len(), 0, "prototype must be released");
    assert_eq!(engine.renderer().submesh_count(), 0);
    assert_eq!(engine.renderer().instance_count(), 0);
}

#[test]
fn duplicator_refresh_diffs_placements() {
    let mut scene = TestScene::new();
    let (source, _) = scene.add_mesh_object("source", tri_geometry("m", &[0]));
    scene.set_hidden_render(source, true);
    let duplicator = scene.add_duplicator("scatter");
    let spawn =
        |i: u64| (i, source, mat4_from_translation(Vec3::new(i as f32, 0.0, 0.0)));
    scene.set_placements(duplicator, vec![spawn(0), spawn(1), spawn(2)]);

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();

    // Placement 0 disappears, placement 3 appears.
    scene.set_placements(duplicator, vec![spawn(1), spawn(2), spawn(3)]);
    scene.mark_updated(duplicator);
    engine.sync(&scene).unwrap();

    assert_eq!(engine.instances().len(), 3);
    assert_eq!(
        engine.representation(EntityKey::instance(duplicator, 0)),
        None,
        "stale placement must be removed"
    );
    assert!(engine
        .representation(EntityKey::instance(duplicator, 3))
        .is_some());
    assert_eq!(engine.prototypes().len(), 1);
}

// ---------------------------------------------------------------------------
// Geometry updates
// ---------------------------------------------------------------------------

#[test]
fn mesh_edit_re_extracts_once_and_re_realizes_every_placement() {
    let mut scene = TestScene::new();
    let (a, mesh) = scene.add_mesh_object("a", tri_geometry("m", &[0]));
    let b = scene.add_shared_object("b", mesh);

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert_eq!(engine.renderer().submesh_count(), 1);

    // The edit adds a second material slot to the mesh.
    scene.set_geometry(mesh, tri_geometry("m", &[0, 1]));
    scene.mark_updated_data(a);
    scene.mark_updated_data(b);
    engine.sync(&scene).unwrap();

    assert_eq!(scene.extraction_count(), 2, "shared data re-extracts once");
    assert_eq!(engine.representation(a), Some(Representation::PrototypeOwner));
    assert_eq!(
        engine.representation(b),
        Some(Representation::InstanceOf { owner: a })
    );
    assert_eq!(engine.renderer().submesh_count(), 2);
    assert_eq!(engine.renderer().instance_count(), 2);
}

#[test]
fn transform_only_update_touches_only_transforms() {
    let mut scene = TestScene::new();
    let (a, _) = scene.add_mesh_object("a", tri_geometry("m", &[0]));

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();

    scene.move_object(a, mat4_from_translation(Vec3::new(0.0, 5.0, 0.0)));
    engine.renderer_mut().clear_ops();
    engine.sync(&scene).unwrap();

    let ops = engine.renderer_mut().take_ops();
    assert!(!ops.is_empty());
    assert!(ops
        .iter()
        .all(|op| matches!(op, RendererOp::SetSubmeshTransform(_))));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn faceless_mesh_is_skipped_and_the_pass_continues() {
    let mut scene = TestScene::new();
    scene.add_mesh_object("broken", Geometry::default());
    let (good, _) = scene.add_mesh_object("good", tri_geometry("m", &[0]));

    let mut engine = engine();
    engine.sync(&scene).unwrap();

    assert_eq!(engine.instances().len(), 1);
    assert_eq!(
        engine.representation(good),
        Some(Representation::PrototypeOwner)
    );

    // The broken object stays absent, and re-syncing stays quiet.
    scene.end_frame();
    let ops = engine.renderer().op_count();
    engine.sync(&scene).unwrap();
    assert_eq!(engine.renderer().op_count(), ops);
}

#[test]
fn unsupported_kind_is_skipped() {
    let mut scene = TestScene::new();
    scene.add_unsupported("weird");
    let (good, _) = scene.add_mesh_object("good", tri_geometry("m", &[0]));

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    assert_eq!(engine.instances().len(), 1);
    assert!(engine.representation(good).is_some());
}

// ---------------------------------------------------------------------------
// Lights, volumes, environment
// ---------------------------------------------------------------------------

#[test]
fn lights_follow_visibility() {
    let mut scene = TestScene::new();
    let lamp = scene.add_light("lamp", point_light("lamp"));

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert!(engine.renderer().has_light(lamp));

    scene.set_hidden_render(lamp, true);
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert!(engine.renderer().light_hidden(lamp));

    scene.set_hidden_render(lamp, false);
    engine.sync(&scene).unwrap();
    assert!(engine.renderer().has_light(lamp));
    assert!(!engine.renderer().light_hidden(lamp));
}

#[test]
fn volume_payload_is_attached_and_detached_with_the_owner() {
    let mut scene = TestScene::new();
    let (a, _) = scene.add_mesh_object("smoke", tri_geometry("m", &[0]));
    scene.set_volume(a, small_volume());

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    scene.end_frame();
    assert!(engine.renderer().has_volume(SubmeshRef::new(a, 0)));

    scene.remove_object(a);
    engine.sync(&scene).unwrap();
    let ops = engine.renderer_mut().take_ops();
    assert!(ops
        .iter()
        .any(|op| matches!(op, RendererOp::DetachVolume(_))));
}

#[test]
fn environment_changes_flow_through_the_settings_differ() {
    let mut scene = TestScene::new();
    scene.set_environment(enabled_environment());

    let mut engine = engine();
    engine.sync(&scene).unwrap();
    assert!(engine.renderer().environment().is_some());

    scene.end_frame();
    let ops = engine.renderer().op_count();
    engine.sync(&scene).unwrap();
    assert_eq!(engine.renderer().op_count(), ops);

    let mut settings = enabled_environment();
    settings.set(&["intensity"], 2.5f32);
    scene.set_environment(settings);
    engine.renderer_mut().clear_ops();
    engine.sync(&scene).unwrap();
    assert_eq!(
        engine.renderer_mut().take_ops(),
        vec![RendererOp::SetEnvironmentIntensity(2.5)]
    );
}
