// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lifecycle Integration Tests
//!
//! The phase machine as a whole simulation sees it: sub-phase ordering,
//! listener priority ordering across components, and registration
//! attempts outside Setup.

mod common;

use common::{daily_config, HookRecorder, LateRegistrar};
use microsim::application::component::Component;
use microsim::application::context::SimulationContext;
use microsim_bootstrap::ExitCode;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_sub_phases_fire_in_order_every_tick() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let context = SimulationContext::new(
        daily_config(2, 0, 0),
        vec![Box::new(HookRecorder::new("probe", Rc::clone(&log)))],
    )
    .unwrap();
    context.run().unwrap();
    let expected = vec![
        "probe:post_setup",
        "probe:time_step_prepare",
        "probe:time_step",
        "probe:time_step_cleanup",
        "probe:collect_metrics",
        "probe:time_step_prepare",
        "probe:time_step",
        "probe:time_step_cleanup",
        "probe:collect_metrics",
        "probe:simulation_end",
    ];
    assert_eq!(*log.borrow(), expected);
}

/// A component registering a framework object from inside `on_time_step`
/// gets a lifecycle error, and the run maps to exit code 1.
#[test]
fn test_registration_during_main_loop_fails() {
    let context = SimulationContext::new(
        daily_config(2, 0, 0),
        vec![Box::new(LateRegistrar::new())],
    )
    .unwrap();
    let err = context.run().unwrap_err();
    assert_eq!(err.category(), "lifecycle");
    assert_eq!(ExitCode::from_category(err.category()), ExitCode::Error);
}

/// With start == end the main loop never runs: population initialization
/// steps straight to simulation end.
#[test]
fn test_zero_length_simulation_skips_main_loop() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let context = SimulationContext::new(
        daily_config(0, 0, 0),
        vec![Box::new(HookRecorder::new("probe", Rc::clone(&log)))],
    )
    .unwrap();
    context.run().unwrap();
    assert_eq!(*log.borrow(), vec!["probe:post_setup", "probe:simulation_end"]);
}

/// Priorities order listeners across components on the same channel.
#[test]
fn test_cross_component_priority_ordering() {
    struct Prioritized {
        name: String,
        tier: u8,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Component for Prioritized {
        fn name(&self) -> &str {
            &self.name
        }

        fn priorities(&self) -> microsim_domain::value_objects::PhasePriorities {
            microsim_domain::value_objects::PhasePriorities {
                time_step: microsim_domain::value_objects::ListenerPriority::new(self.tier).unwrap(),
                ..Default::default()
            }
        }

        fn setup(
            &mut self,
            _builder: &mut microsim::application::builder::Builder,
        ) -> Result<(), microsim_domain::SimulationError> {
            Ok(())
        }

        fn on_time_step(
            &self,
            _event: &microsim_domain::events::SimEvent,
        ) -> Result<(), microsim_domain::SimulationError> {
            self.log.borrow_mut().push(self.name.clone());
            Ok(())
        }
    }

    let log = Rc::new(RefCell::new(Vec::new()));
    // Registered out of priority order on purpose.
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(Prioritized {
            name: "third".to_string(),
            tier: 8,
            log: Rc::clone(&log),
        }),
        Box::new(Prioritized {
            name: "first".to_string(),
            tier: 1,
            log: Rc::clone(&log),
        }),
        Box::new(Prioritized {
            name: "second".to_string(),
            tier: 4,
            log: Rc::clone(&log),
        }),
    ];
    let context = SimulationContext::new(daily_config(1, 0, 0), components).unwrap();
    context.run().unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
}

/// A component's setup may append sub-components; they join the back of
/// the queue and are fully set up in the same pass.
#[test]
fn test_sub_components_register_during_setup() {
    use common::ColumnComponent;
    use microsim::application::builder::Builder;
    use microsim_domain::SimulationError;

    struct Parent;

    impl Component for Parent {
        fn name(&self) -> &str {
            "parent"
        }

        fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
            builder
                .components()
                .add_components(vec![Box::new(ColumnComponent::new("child", "child_value", 9.0, vec![]))]);
            Ok(())
        }
    }

    let context = SimulationContext::new(daily_config(1, 3, 0), vec![Box::new(Parent)]).unwrap();
    let report = context.run().unwrap();
    assert_eq!(
        report.final_state.column("child_value").unwrap().as_floats().unwrap(),
        &[9.0, 9.0, 9.0]
    );
}
