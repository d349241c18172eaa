//! State machine and transition scenarios driven through the public
//! instance API.

mod common;

use animgraph_core::{Seconds, StringId, Transform};
use animgraph_graph::{GraphInstance, TransitionFlags};
use animgraph_task::Task;

use common::*;

fn instance(graph: &MachineGraph) -> GraphInstance {
    GraphInstance::new(&graph.definition, 1).expect("instantiation")
}

fn step(instance: &mut GraphInstance, dt: Seconds) -> animgraph_graph::PoseNodeResult {
    instance.evaluate_graph(dt, Transform::identity(), None, None, false)
}

#[test]
fn simple_unsynchronized_transition() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = instance(&graph);

    // Before the transition only A contributes.
    step(&mut inst, DT);
    let ts = inst.task_system().unwrap();
    assert_eq!(sampled_clips(ts), vec![(StringId::new("A"), 0.05)]);
    assert!(blend_weights(ts).is_empty());

    // Author-driven start.
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, DT);
    let ts = inst.task_system().unwrap();
    assert_eq!(blend_weights(ts), vec![0.0]);
    assert_eq!(sampled_clips(ts).len(), 2);

    // progress(n) = min(n * 0.1 / 0.5, 1)
    for n in 1..=4 {
        step(&mut inst, DT);
        let weights = blend_weights(inst.task_system().unwrap());
        assert_eq!(weights.len(), 1);
        assert!(
            approx(weights[0], n as f32 * 0.2),
            "frame {}: weight {}",
            n,
            weights[0]
        );
    }

    // Fifth post-start frame: the transition is complete, B alone drives
    // the output.
    let result = step(&mut inst, DT);
    let ts = inst.task_system().unwrap();
    assert!(blend_weights(ts).is_empty());
    let clips = sampled_clips(ts);
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].0, StringId::new("B"));
    assert_eq!(result.task, Some(animgraph_task::TaskIndex(0)));
}

#[test]
fn synchronized_transition_keeps_track_position() {
    let markers = [(StringId::new("Left"), 0.0), (StringId::new("Right"), 0.5)];
    let graph = machine_graph(MachineSpec {
        clips: &[
            clip_with_track("A", 2.0, &markers),
            clip_with_track("B", 1.0, &markers),
        ],
        rules: &[(0, 1, {
            let mut t = transition(0.5);
            t.flags = TransitionFlags::SYNCHRONIZED;
            t
        })],
    });
    let mut inst = instance(&graph);

    // Advance A to normalized 0.2 == sync position (0, 0.4).
    step(&mut inst, Seconds(0.4));

    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, Seconds(0.0));
    // The target was brought up over the source's update range; both clips
    // sit on the same track position.
    let clips = sampled_clips(inst.task_system().unwrap());
    assert_eq!(clips.len(), 2);
    assert!(approx(clips[0].1, 0.2));
    assert!(approx(clips[1].1, 0.2));

    // Source advances to (0, 0.6) => normalized 0.3; the target must
    // follow exactly.
    step(&mut inst, Seconds(0.2));
    let clips = sampled_clips(inst.task_system().unwrap());
    assert_eq!(clips.len(), 2);
    assert!(approx(clips[0].1, 0.3), "source at {}", clips[0].1);
    assert!(approx(clips[1].1, 0.3), "target at {}", clips[1].1);
}

#[test]
fn clamped_duration_overshoot() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 0.2, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, {
            let mut t = transition(0.5);
            t.flags = TransitionFlags::CLAMP_DURATION;
            t
        })],
    });
    let mut inst = instance(&graph);

    // A to normalized 0.4, so the source sits at 0.5 when the start
    // frame's update has run.
    step(&mut inst, Seconds(0.08));

    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, Seconds(0.02));

    // Effective duration = (1 - 0.5) * 0.2 = 0.1 s; a 0.05 s frame covers
    // half of it. An unclamped 0.5 s duration would read 0.1 here.
    step(&mut inst, Seconds(0.05));
    let weights = blend_weights(inst.task_system().unwrap());
    assert_eq!(weights.len(), 1);
    assert!(approx(weights[0], 0.5), "got {}", weights[0]);

    // The next frame completes it and the machine collapses onto B.
    step(&mut inst, Seconds(0.05));
    let clips = sampled_clips(inst.task_system().unwrap());
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].0, StringId::new("B"));
}

#[test]
fn forced_interrupt_transfers_cached_pose() {
    let dt = Seconds(0.025);
    let graph = machine_graph(MachineSpec {
        clips: &[
            clip("A", 2.0, 0.0),
            clip("B", 2.0, 0.0),
            clip("C", 2.0, 0.0),
        ],
        rules: &[
            (0, 1, transition(1.0)),
            (1, 2, {
                let mut t = transition(1.0);
                t.flags = TransitionFlags::FORCED_TRANSITION_ALLOWED;
                t
            }),
        ],
    });
    let mut inst = instance(&graph);

    step(&mut inst, dt);

    // A -> B starts; B has a forced rule out of it, so the transition
    // caches its blend.
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, dt);
    assert!(has_cached_pose_write(inst.task_system().unwrap()));
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 1);

    for _ in 0..3 {
        step(&mut inst, dt);
    }

    // Force B -> C mid-flight: ownership of the cached buffer moves to
    // the new transition, A -> B is shut down.
    inst.set_control_parameter(graph.parameters[0], false);
    inst.set_control_parameter(graph.parameters[1], true);
    step(&mut inst, dt);
    // The interrupted buffer is the only one left alive: C gets no cache
    // of its own (no forced rule out of C).
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 1);

    // The pre-interruption blend is read back while the blend-in window
    // (0.1 s) runs, then the buffer is released.
    let mut read_frames = 0;
    for _ in 0..6 {
        step(&mut inst, dt);
        if has_cached_pose_read(inst.task_system().unwrap()) {
            read_frames += 1;
        }
    }
    assert!(read_frames >= 2, "cached pose was read back over the window");
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 0);
}

#[test]
fn chained_transition_keeps_both_blends() {
    let graph = machine_graph(MachineSpec {
        clips: &[
            clip("A", 2.0, 0.0),
            clip("B", 2.0, 0.0),
            clip("C", 2.0, 0.0),
        ],
        rules: &[(0, 1, transition(1.0)), (1, 2, transition(1.0))],
    });
    let mut inst = instance(&graph);

    step(&mut inst, DT);
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, DT);
    step(&mut inst, DT);

    // Start B <- (A -> B) while the first transition is still blending:
    // the old transition stays alive as the new one's source.
    inst.set_control_parameter(graph.parameters[0], false);
    inst.set_control_parameter(graph.parameters[1], true);
    step(&mut inst, DT);
    let ts = inst.task_system().unwrap();
    assert_eq!(sampled_clips(ts).len(), 3, "A, B and C all contribute");
    assert_eq!(blend_weights(ts).len(), 2, "inner and outer blends");

    // Inner transition (duration 1.0) completes after ten frames total;
    // from then on only B -> C blends.
    for _ in 0..8 {
        step(&mut inst, DT);
    }
    let ts = inst.task_system().unwrap();
    assert_eq!(sampled_clips(ts).len(), 2);
    assert_eq!(blend_weights(ts).len(), 1);
}

#[test]
fn reset_releases_cached_buffers() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 0.0), clip("B", 2.0, 0.0)],
        rules: &[
            (0, 1, transition(1.0)),
            (1, 0, {
                let mut t = transition(1.0);
                t.flags = TransitionFlags::FORCED_TRANSITION_ALLOWED;
                t
            }),
        ],
    });
    let mut inst = instance(&graph);

    step(&mut inst, DT);
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, DT);
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 1);

    // Reset mid-transition: every owned buffer must come back.
    inst.evaluate_graph(DT, Transform::identity(), None, None, true);
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 0);
}

#[test]
fn node_times_stay_normalized() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 0.3, 0.0), clip("B", 0.7, 0.0)],
        rules: &[(0, 1, transition(0.25))],
    });
    let mut inst = instance(&graph);

    for frame in 0..40 {
        if frame == 5 {
            inst.set_control_parameter(graph.parameters[0], true);
        }
        step(&mut inst, DT);
        for idx in 0..graph.definition.node_count() {
            if let Some(info) = inst.pose_node_debug_info(animgraph_core::NodeIndex(idx as u16)) {
                assert!(
                    (0.0..=1.0).contains(&info.current_time.value()),
                    "node {} current time {:?}",
                    idx,
                    info.current_time
                );
                assert!((0.0..=1.0).contains(&info.previous_time.value()));
            }
        }
    }
}

#[test]
fn root_motion_blends_between_states() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 1.0, 1.0), clip("B", 1.0, 3.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = instance(&graph);

    let result = step(&mut inst, DT);
    assert!(approx(result.root_motion_delta.translation.x, 0.1));

    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, DT);
    // One post-start frame: blend weight 0.2 between A's 0.1 and B's 0.3
    // per-frame displacement.
    let result = step(&mut inst, DT);
    assert!(
        approx(result.root_motion_delta.translation.x, 0.1 + 0.2 * 0.2),
        "got {}",
        result.root_motion_delta.translation.x
    );
}

#[test]
fn transition_events_cover_source_and_target() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = instance(&graph);

    step(&mut inst, DT);
    inst.set_control_parameter(graph.parameters[0], true);
    let result = step(&mut inst, DT);
    // The returned range must span everything sampled this frame.
    assert_eq!(result.sampled_events.start, 0);
    assert_eq!(
        result.sampled_events.end as usize,
        inst.sampled_events().len()
    );
}

#[test]
fn tasks_reference_earlier_indices() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = instance(&graph);

    step(&mut inst, DT);
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, DT);

    let ts = inst.task_system().unwrap();
    for (idx, task) in ts.tasks().iter().enumerate() {
        if let Task::Blend { first, second, .. } = task {
            assert!(first.index() < idx && second.index() < idx);
        }
    }
}
