use async_trait::async_trait;
use std::time::Duration;
use stretch_controller::{
    actuator_driver::{
        ActuatorCall, ActuatorDriver, ActuatorLimits, CallLog, DriverError, FaultPlan,
        SimulatedActuator, TRANSLATE_JOINT,
    },
    demo_script::{demonstration_script, ARM, GRIPPER, LIFT, WRIST_YAW},
    error::StepError,
    interrupt::Interrupt,
    motion_step::JointTarget,
    pose_resolver::{StepSpec, TargetSpec},
    robot_config::RobotConfig,
    sequence_guard::{GuardSettings, RunOutcome, RunReport, SequenceGuard, TeardownAction},
};
use tokio::time::{sleep, timeout, Instant};

const SETTINGS: GuardSettings = GuardSettings {
    settle_timeout: Duration::from_secs(30),
    teardown_timeout: Duration::from_secs(30),
};

fn scenario_script() -> Vec<StepSpec> {
    vec![
        StepSpec::stow("stow"),
        StepSpec::joints(
            "extend",
            vec![
                TargetSpec::literal(ARM, 0.52),
                TargetSpec::literal(LIFT, 1.10),
            ],
        )
        .with_settle_delay(Duration::from_secs(2)),
        StepSpec::joints(
            "wrist yaw",
            vec![TargetSpec::literal(WRIST_YAW, 30_f64.to_radians())],
        ),
        StepSpec::joints("open", vec![TargetSpec::literal(GRIPPER, 100.0)]),
        StepSpec::joints("close", vec![TargetSpec::literal(GRIPPER, -100.0)]),
    ]
}

fn simulator(faults: FaultPlan) -> SimulatedActuator {
    SimulatedActuator::new(&RobotConfig::included()).with_faults(faults)
}

async fn run_guarded<D>(actuator: D, script: &[StepSpec], interrupt: Interrupt) -> RunReport
where
    D: ActuatorDriver + 'static,
{
    SequenceGuard::new(SETTINGS, interrupt)
        .run(
            |resolver| resolver.resolve_script(script),
            || async move { Ok(actuator) },
        )
        .await
        .unwrap()
}

fn count(log: &CallLog, expected: ActuatorCall) -> usize {
    log.count(|call| *call == expected)
}

/// Stage calls recorded after the last call matching `marker`
fn stages_after(log: &CallLog, marker: impl Fn(&ActuatorCall) -> bool) -> usize {
    let calls = log.calls();
    let last = calls
        .iter()
        .rposition(|call| marker(call))
        .expect("marker call was recorded");
    calls[last + 1..]
        .iter()
        .filter(|call| matches!(call, ActuatorCall::Stage(_)))
        .count()
}

fn assert_torn_down_once(log: &CallLog) {
    assert_eq!(count(log, ActuatorCall::Stow), 1);
    assert_eq!(count(log, ActuatorCall::Stop), 1);
    assert_eq!(count(log, ActuatorCall::Release), 1);
    let calls = log.calls();
    assert_eq!(
        &calls[calls.len() - 3..],
        &[ActuatorCall::Stow, ActuatorCall::Stop, ActuatorCall::Release]
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_completes_with_five_flushes() {
    let actuator = simulator(FaultPlan::default());
    let log = actuator.call_log();
    let report = run_guarded(actuator, &scenario_script(), Interrupt::new()).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.teardown_failures.is_empty());
    let flushes = log.flushes();
    assert_eq!(flushes.len(), 5);
    assert_eq!(flushes[0], RobotConfig::included().stow_pose);
    assert_eq!(
        flushes[1],
        vec![JointTarget::new(ARM, 0.52), JointTarget::new(LIFT, 1.10)]
    );
    assert_eq!(
        flushes[2],
        vec![JointTarget::new(WRIST_YAW, 30_f64.to_radians())]
    );
    assert_eq!(flushes[3], vec![JointTarget::new(GRIPPER, 100.0)]);
    assert_eq!(flushes[4], vec![JointTarget::new(GRIPPER, -100.0)]);
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn rejected_third_flush_fails_at_step_two() {
    let actuator = simulator(FaultPlan {
        reject_flush: Some(2),
        ..Default::default()
    });
    let log = actuator.call_log();
    let report = run_guarded(actuator, &scenario_script(), Interrupt::new()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::FailedAt(2, StepError::CommandRejected(_))
    ));
    assert_eq!(log.flushes().len(), 3);
    assert_eq!(
        stages_after(&log, |call| matches!(call, ActuatorCall::Flush(_))),
        0
    );
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn interrupt_while_settling_tears_down() {
    let actuator = simulator(FaultPlan::default());
    let log = actuator.call_log();
    let interrupt = Interrupt::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            // step 1 lifts for about three seconds
            sleep(Duration::from_secs(1)).await;
            interrupt.trigger();
        }
    });
    let report = run_guarded(actuator, &scenario_script(), interrupt).await;

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(log.flushes().len(), 2);
    assert_eq!(
        stages_after(&log, |call| matches!(call, ActuatorCall::WaitSettled)),
        0
    );
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn interrupt_cuts_settle_delay_short() {
    // stow fails instantly so the run ends as soon as teardown starts
    let actuator = simulator(FaultPlan {
        fail_stow: true,
        ..Default::default()
    });
    let log = actuator.call_log();
    let interrupt = Interrupt::new();
    let start = Instant::now();
    // step 1 settles after three seconds and then holds for two more
    let trigger_at = Duration::from_secs(4);
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            sleep(trigger_at).await;
            interrupt.trigger();
        }
    });
    let report = run_guarded(actuator, &scenario_script(), interrupt).await;

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    let elapsed = start.elapsed();
    assert!(elapsed >= trigger_at, "{:?}", elapsed);
    assert!(elapsed - trigger_at < Duration::from_secs(1), "{:?}", elapsed);
    assert_eq!(log.flushes().len(), 2);
    assert_eq!(log.count(|call| *call == ActuatorCall::WaitSettled), 2);
    assert_eq!(
        stages_after(&log, |call| matches!(call, ActuatorCall::WaitSettled)),
        0
    );
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn teardown_runs_once_wherever_the_fault_lands() {
    for index in 0..scenario_script().len() {
        for faults in [
            FaultPlan {
                reject_flush: Some(index),
                ..Default::default()
            },
            FaultPlan {
                stall_flush: Some(index),
                ..Default::default()
            },
        ] {
            let actuator = simulator(faults.clone());
            let log = actuator.call_log();
            let report = run_guarded(actuator, &scenario_script(), Interrupt::new()).await;

            match report.outcome {
                RunOutcome::FailedAt(failed, StepError::CommandRejected(_)) => {
                    assert_eq!(failed, index, "{:?}", faults)
                }
                RunOutcome::FailedAt(failed, StepError::SettleTimeout(_)) => {
                    assert_eq!(failed, index, "{:?}", faults)
                }
                other => panic!("unexpected outcome {:?} for {:?}", other, faults),
            }
            assert_eq!(log.flushes().len(), index + 1, "{:?}", faults);
            assert_eq!(
                stages_after(&log, |call| matches!(call, ActuatorCall::Flush(_))),
                0,
                "{:?}",
                faults
            );
            assert_torn_down_once(&log);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unresolvable_step_never_moves() {
    let mut script = scenario_script();
    script.push(StepSpec::joints(
        "too high",
        vec![TargetSpec::literal(LIFT, 1.5)],
    ));
    let actuator = simulator(FaultPlan::default());
    let log = actuator.call_log();
    let report = run_guarded(actuator, &script, Interrupt::new()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::FailedAt(5, StepError::OutOfRange { .. })
    ));
    assert_eq!(
        log.count(|call| matches!(call, ActuatorCall::Stage(_) | ActuatorCall::Flush(_))),
        0
    );
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn failed_stow_does_not_mask_outcome() {
    let actuator = simulator(FaultPlan {
        fail_stow: true,
        ..Default::default()
    });
    let log = actuator.call_log();
    let report = run_guarded(actuator, &scenario_script(), Interrupt::new()).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.teardown_failures.len(), 1);
    assert_eq!(report.teardown_failures[0].action, TeardownAction::Stow);
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn failed_connection_is_returned() {
    let guard = SequenceGuard::new(SETTINGS, Interrupt::new());
    let script = scenario_script();
    let result = guard
        .run(
            |resolver| resolver.resolve_script(&script),
            || async { Err::<SimulatedActuator, _>(DriverError::Disconnected) },
        )
        .await;
    assert_eq!(result.unwrap_err(), DriverError::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn abandoned_run_is_torn_down_in_background() {
    let actuator = simulator(FaultPlan::default());
    let log = actuator.call_log();
    let guard = SequenceGuard::new(SETTINGS, Interrupt::new());
    let script = scenario_script();
    let run = guard.run(
        |resolver| resolver.resolve_script(&script),
        || async move { Ok(actuator) },
    );
    assert!(timeout(Duration::from_secs(1), run).await.is_err());
    sleep(Duration::from_secs(60)).await;

    assert_eq!(log.flushes().len(), 2);
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn demonstration_completes_on_simulator() {
    let config = RobotConfig::included();
    let actuator = SimulatedActuator::new(&config);
    let log = actuator.call_log();
    let report = SequenceGuard::new(GuardSettings::from_config(&config), Interrupt::new())
        .run(
            |resolver| resolver.resolve_script(&demonstration_script()),
            || async move { Ok(actuator) },
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(log.flushes().len(), demonstration_script().len());
    assert_torn_down_once(&log);
}

/// Delegates to the simulator but panics on one flush or one limit query
struct PanickingActuator {
    inner: SimulatedActuator,
    panic_on_flush: Option<usize>,
    panic_on_limits: Option<&'static str>,
    flushes: usize,
}

impl PanickingActuator {
    fn new(inner: SimulatedActuator) -> PanickingActuator {
        PanickingActuator {
            inner,
            panic_on_flush: None,
            panic_on_limits: None,
            flushes: 0,
        }
    }
}

#[async_trait]
impl ActuatorDriver for PanickingActuator {
    fn get_limits(&self, joint_id: &str) -> Result<ActuatorLimits, DriverError> {
        if self.panic_on_limits == Some(joint_id) {
            panic!("limit table corrupt for {}", joint_id);
        }
        self.inner.get_limits(joint_id)
    }

    fn position(&self, joint_id: &str) -> Result<f64, DriverError> {
        self.inner.position(joint_id)
    }

    fn stow_pose(&self) -> Vec<JointTarget> {
        self.inner.stow_pose()
    }

    async fn stage(&mut self, joint_id: &str, value: f64) -> Result<(), DriverError> {
        self.inner.stage(joint_id, value).await
    }

    async fn flush(&mut self) -> Result<(), DriverError> {
        if self.panic_on_flush == Some(self.flushes) {
            panic!("driver bug on flush {}", self.flushes);
        }
        self.flushes += 1;
        self.inner.flush().await
    }

    async fn wait_settled(&mut self, timeout: Duration) -> Result<bool, DriverError> {
        self.inner.wait_settled(timeout).await
    }

    async fn stow(&mut self) -> Result<(), DriverError> {
        self.inner.stow().await
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.inner.stop().await
    }

    async fn release(&mut self) -> Result<(), DriverError> {
        self.inner.release().await
    }
}

#[tokio::test(start_paused = true)]
async fn driver_panic_is_a_step_failure() {
    let inner = simulator(FaultPlan::default());
    let log = inner.call_log();
    let actuator = PanickingActuator {
        panic_on_flush: Some(3),
        ..PanickingActuator::new(inner)
    };
    let report = run_guarded(actuator, &scenario_script(), Interrupt::new()).await;

    match report.outcome {
        RunOutcome::FailedAt(3, StepError::Panicked(message)) => {
            assert_eq!(message, "driver bug on flush 3")
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_torn_down_once(&log);
}

#[tokio::test(start_paused = true)]
async fn panic_while_resolving_names_the_step() {
    let mut script = scenario_script();
    script.push(StepSpec::joints(
        "drive",
        vec![TargetSpec::literal(TRANSLATE_JOINT, 0.3)],
    ));
    let inner = simulator(FaultPlan::default());
    let log = inner.call_log();
    let actuator = PanickingActuator {
        panic_on_limits: Some(TRANSLATE_JOINT),
        ..PanickingActuator::new(inner)
    };
    let report = run_guarded(actuator, &script, Interrupt::new()).await;

    match report.outcome {
        RunOutcome::FailedAt(5, StepError::Panicked(message)) => {
            assert_eq!(message, "limit table corrupt for translate_mobile_base")
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(log.flushes().is_empty());
    assert_torn_down_once(&log);
}
