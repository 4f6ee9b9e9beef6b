use std::{future::Future, io};
use stretch_controller::interrupt::Interrupt;

/// Exit code used when the user gives up on teardown
pub const FORCED_EXIT_CODE: u8 = 130;

/// The first signal interrupts the run, the second returns so the caller can
/// exit without waiting for teardown.
pub async fn escalate_signals<F, Fut>(interrupt: Interrupt, mut next_signal: F) -> io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    next_signal().await?;
    tracing::info!("Detected Ctrl+c, stopping and stowing. Press again to exit immediately");
    interrupt.trigger();
    next_signal().await?;
    tracing::error!("Detected second Ctrl+c, exiting without waiting for teardown");
    Ok(())
}
