use super::*;

#[tokio::test]
async fn test_shutdown_phases() {
    let controller = ShutdownController::new();
    assert_eq!(controller.phase(), ShutdownPhase::Running);

    let signal = controller.signal();
    assert!(!signal.is_stopping());

    controller.shutdown();
    assert_eq!(controller.phase(), ShutdownPhase::Draining);
    assert!(signal.is_stopping());
    assert!(!signal.is_killed());

    controller.force_shutdown();
    assert_eq!(controller.phase(), ShutdownPhase::Terminating);
    assert!(signal.is_killed());
}

#[test]
fn test_force_shutdown_implies_graceful() {
    let controller = ShutdownController::new();
    let signal = controller.signal();
    let token = controller.token();

    controller.force_shutdown();

    assert!(signal.is_stopping());
    assert!(signal.is_killed());
    assert!(token.is_cancelled());
}

#[test]
fn test_phase_never_moves_backwards() {
    let controller = ShutdownController::new();
    let signal = controller.signal();

    controller.force_shutdown();
    controller.shutdown();
    controller.shutdown();

    assert_eq!(controller.phase(), ShutdownPhase::Terminating);
    assert!(signal.is_killed());
}

#[tokio::test]
async fn test_signal_futures_resolve() {
    let signal = StopSignal::new();
    let waiter = {
        let signal = signal.clone();
        tokio::spawn(async move { signal.stopping().await })
    };

    signal.stop();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();

    let mut killed = tokio_test::task::spawn(signal.killed());
    assert!(killed.poll().is_pending());
    signal.kill();
    assert!(killed.poll().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_drain_forces_on_timeout() {
    let controller = ShutdownController::with_timeout(Duration::from_secs(5));
    let stuck = tokio::spawn(std::future::pending::<()>());

    controller.drain("stuck", stuck).await;

    assert_eq!(controller.phase(), ShutdownPhase::Terminating);
}

#[tokio::test]
async fn test_drain_waits_for_finished_component() {
    let controller = ShutdownController::new();
    let signal = controller.signal();
    let component = tokio::spawn(async move { signal.stopping().await });

    controller.shutdown();
    controller.drain("component", component).await;

    assert_eq!(controller.phase(), ShutdownPhase::Draining);
}
