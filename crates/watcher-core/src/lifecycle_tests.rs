use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use crate::lifecycle::{shutdown_pair, OneShotTimer};

#[tokio::test(start_paused = true)]
async fn timer_fires_once_after_its_delay() {
    // Arrange
    let mut timer = OneShotTimer::new();
    let start = Instant::now();

    // Act
    assert!(timer.arm(Duration::from_secs(3)));
    timer.fired().await;

    // Assert
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert!(!timer.is_armed());
}

#[tokio::test(start_paused = true)]
async fn rearming_a_pending_timer_is_refused() {
    // Arrange
    let mut timer = OneShotTimer::new();
    let start = Instant::now();
    timer.arm(Duration::from_secs(3));
    sleep(Duration::from_secs(1)).await;

    // Act
    let rearmed = timer.arm(Duration::from_secs(3));
    timer.fired().await;

    // Assert
    assert!(!rearmed);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn cancelled_timer_never_fires() {
    // Arrange
    let mut timer = OneShotTimer::new();
    timer.arm(Duration::from_secs(5));

    // Act
    timer.cancel();
    timer.cancel();
    let fired = timeout(Duration::from_secs(60), timer.fired()).await;

    // Assert
    assert!(fired.is_err());
}

#[tokio::test]
async fn dropping_the_trigger_signals_shutdown() {
    // Arrange
    let (trigger, mut signal) = shutdown_pair();
    let observer = signal.clone();
    assert!(!observer.is_triggered());

    // Act
    drop(trigger);
    signal.wait().await;

    // Assert
    assert!(observer.is_triggered());
}

#[tokio::test]
async fn trigger_is_idempotent() {
    // Arrange
    let (trigger, mut signal) = shutdown_pair();

    // Act
    trigger.trigger();
    trigger.trigger();
    signal.wait().await;
    signal.wait().await;

    // Assert
    assert!(trigger.is_triggered());
}
