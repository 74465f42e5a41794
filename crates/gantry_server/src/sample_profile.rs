//! Demonstration profile.
//!
//! Seven cases with two fan-in chains and one blocking computation,
//! mirroring a small board bring-up sequence: task1 waits on task2 and
//! task4, task2 waits on task3 and task6, and so on down to the leaf delays.

use gantry_engine::{
    Profile, RunNode, SystemBus, TestCaseArgs, TestCaseBody, TestCaseBuilder, ParamSpec,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fib(n: u64) -> u64 {
    if n <= 1 { n } else { fib(n - 1) + fib(n - 2) }
}

fn delayed_pass(name: &'static str, delay_ms: u64) -> TestCaseBody {
    TestCaseBody::from_async(move |_args| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        tracing::debug!(case = name, "executed");
        Ok(json!(true))
    })
}

/// A small self-contained profile for demos and smoke tests
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleProfile;

impl Profile for SampleProfile {
    fn test_case_list(&self, bus: &SystemBus) -> Vec<Arc<RunNode>> {
        let task1 = TestCaseBuilder::new(
            "task1",
            TestCaseBody::from_async(|args: TestCaseArgs| async move {
                tracing::debug!(
                    task2 = %args.value("task2"),
                    task4 = %args.value("task4"),
                    "executed task1"
                );
                Ok(json!(true))
            }),
        )
        .with_description("final assembly check")
        .with_param(ParamSpec::label("task2"))
        .with_param(ParamSpec::label("task4"))
        .build(bus);

        let task2 = TestCaseBuilder::new("task2", delayed_pass("task2", 10))
            .with_parameter_label("task2")
            .build(bus);

        // blocking computation, runs on a worker thread
        let task3 = TestCaseBuilder::new(
            "task3",
            TestCaseBody::from_blocking(|_args| Ok(json!(fib(20)))),
        )
        .with_description("checksum burn-in")
        .with_parameter_label("task3")
        .build(bus);

        let task4 = TestCaseBuilder::new("task4", delayed_pass("task4", 20))
            .with_parameter_label("task4")
            .build(bus);

        // leaf case that exercises the data model surface
        let task5 = TestCaseBuilder::new(
            "task5",
            TestCaseBody::from_async(|args: TestCaseArgs| async move {
                let model = args.model()?;
                model
                    .update_parameter(
                        gantry_engine::Parameter::new("vcc")
                            .start_measurement(3.3)
                            .stop_measurement(3.29, "main rail", true),
                    )
                    .await?;
                model.update_progress(100).await?;
                Ok(json!(true))
            }),
        )
        .with_description("supply rail measurement")
        .with_parameter_label("task5")
        .with_param(ParamSpec::model("dm"))
        .build(bus);

        let task6 = TestCaseBuilder::new("task6", delayed_pass("task6", 20))
            .with_parameter_label("task6")
            .build(bus);

        let task7 = TestCaseBuilder::new("task7", delayed_pass("task7", 30))
            .with_parameter_label("task7")
            .build(bus);

        let wire = |node: &Arc<RunNode>, dep: &Arc<RunNode>| {
            // the profile's shape is static, cycles are impossible here
            if let Err(err) = node.add_dependency(dep) {
                tracing::error!(error = %err, "sample profile wiring failed");
            }
        };
        wire(&task1, &task2);
        wire(&task2, &task3);
        wire(&task1, &task4);
        wire(&task4, &task5);
        wire(&task3, &task5);
        wire(&task2, &task6);
        wire(&task6, &task7);

        vec![task1, task2, task3, task4, task5, task6, task7]
    }
}
