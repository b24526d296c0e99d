mod common;

use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use remote_make::context::ExecutionContext;
use remote_make::messaging::{InMemoryMessageBus, MessageBus};
use remote_make::models::{ProcessTemplate, StepTemplate, TaskTemplate, WorkerTemplate};
use remote_make::node::NodeId;
use remote_make::state_machine::{
    LifecycleState, StepEvent, StepState, TaskEvent, TaskState, WorkerEvent, WorkerState,
};

fn worker_event_strategy() -> impl Strategy<Value = WorkerEvent> {
    prop_oneof![
        Just(WorkerEvent::Provision),
        Just(WorkerEvent::Provisioned),
        Just(WorkerEvent::Terminate),
        Just(WorkerEvent::Terminated),
        Just(WorkerEvent::Fail),
    ]
}

fn task_event_strategy() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        Just(TaskEvent::Start),
        Just(TaskEvent::Complete),
        Just(TaskEvent::Fail),
        Just(TaskEvent::CleanupFailed),
    ]
}

fn step_event_strategy() -> impl Strategy<Value = StepEvent> {
    prop_oneof![
        Just(StepEvent::Start),
        Just(StepEvent::Complete),
        Just(StepEvent::Fail),
    ]
}

/// Apply every permitted event, skipping rejected ones, and return the visited states
fn walk<S: LifecycleState>(initial: S, events: &[S::Event]) -> Vec<S> {
    let mut state = initial;
    let mut visited = vec![state];
    for event in events {
        if let Ok(next) = state.determine_target_state(event) {
            state = next;
            visited.push(state);
        }
    }
    visited
}

proptest! {
    /// Property: once a worker is terminated or failed, no event moves it again
    #[test]
    fn worker_terminal_states_are_final(events in prop::collection::vec(worker_event_strategy(), 0..24)) {
        let visited = walk(WorkerState::Scheduled, &events);
        if let Some(position) = visited.iter().position(|state| state.is_terminal()) {
            prop_assert_eq!(position, visited.len() - 1);
        }
    }

    /// Property: a worker only reaches provisioned through provisioning
    #[test]
    fn worker_provisioned_follows_provisioning(events in prop::collection::vec(worker_event_strategy(), 0..24)) {
        let visited = walk(WorkerState::Scheduled, &events);
        for pair in visited.windows(2) {
            if pair[1] == WorkerState::Provisioned {
                prop_assert_eq!(pair[0], WorkerState::Provisioning);
            }
            if pair[1] == WorkerState::Terminated {
                prop_assert_eq!(pair[0], WorkerState::Terminating);
            }
        }
    }

    /// Property: done is only reachable from running, and error only ever moves to error
    #[test]
    fn task_transitions_respect_lifecycle(events in prop::collection::vec(task_event_strategy(), 0..24)) {
        let visited = walk(TaskState::Scheduled, &events);
        for pair in visited.windows(2) {
            if pair[1] == TaskState::Done {
                prop_assert_eq!(pair[0], TaskState::Running);
            }
            if pair[0] == TaskState::Error {
                prop_assert_eq!(pair[1], TaskState::Error);
            }
        }
    }

    /// Property: steps never leave a terminal state
    #[test]
    fn step_terminal_states_are_final(events in prop::collection::vec(step_event_strategy(), 0..16)) {
        let visited = walk(StepState::Scheduled, &events);
        prop_assert!(visited.len() <= 3);
        if let Some(position) = visited.iter().position(|state| state.is_terminal()) {
            prop_assert_eq!(position, visited.len() - 1);
        }
    }

    /// Property: execution order is ascending, ties keep declaration order
    #[test]
    fn ordered_steps_is_a_stable_sort(orders in prop::collection::vec(-5i64..5, 0..20)) {
        let template = orders.iter().enumerate().fold(
            TaskTemplate::new(WorkerTemplate::new("local")),
            |template, (index, order)| {
                template.with_step(StepTemplate::process(*order, ProcessTemplate::new(format!("echo {index}"))))
            },
        );

        let ordered = template.ordered_steps();
        prop_assert_eq!(ordered.len(), orders.len());

        let mut expected: Vec<(i64, usize)> = orders.iter().copied().zip(0..).collect();
        expected.sort_by_key(|(order, _)| *order);
        for (step, (order, index)) in ordered.iter().zip(expected) {
            prop_assert_eq!(step.sequence_order, order);
            prop_assert_eq!(&step.process.as_ref().unwrap().command, &format!("echo {index}"));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: when step k is the first to fail, exactly k steps are recorded
    /// and the worker is still released
    #[test]
    fn first_failing_step_stops_the_task(total in 1usize..6, failing in 0usize..6) {
        let failing = failing % total;
        let commands: Vec<&str> = (0..total)
            .map(|index| if index == failing { "false" } else { "true" })
            .collect();

        let (task, backend) = tokio_test::block_on(async {
            let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
            let node = NodeId::new();
            let backend = Arc::new(RecordingBackend::new(node));
            let orchestrator = orchestrator(bus, node, manager_with(backend.clone()));
            let failure = orchestrator
                .start(&ExecutionContext::background(), &common::commands(RecordingBackend::NAME, &commands))
                .await
                .unwrap_err();
            (failure.entity, backend)
        });

        prop_assert_eq!(task.state, TaskState::Error);
        prop_assert_eq!(task.steps.len(), failing + 1);
        prop_assert!(task.steps[..failing].iter().all(|step| step.state == StepState::Done));
        prop_assert_eq!(task.steps[failing].state, StepState::Error);
        prop_assert_eq!(task.worker.state, WorkerState::Terminated);
        prop_assert_eq!(backend.terminates(), 1);
    }
}
