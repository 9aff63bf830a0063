// Command implementations for the `alfa-lock` binary
// Each command reports on stdout and maps its outcome to a process exit code

use std::time::Duration;

use alfa_common::AlfaError;
use alfa_common::error::{
    BACKEND_UNAVAILABLE, ExitCode, INTERNAL, INTERRUPTED, LOCK_LOST, SUCCESS,
};
use alfa_lock::{DistributedMutex, LeaseHandle, LeaseState, LockError};
use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{HoldArgs, LockArgs, RunArgs};
use crate::startup::{ShutdownSignal, run_with_shutdown};

/// Ping every backend and print one line per node
pub async fn check(mutex: &DistributedMutex) -> ExitCode {
    let report = mutex.check_backends().await;
    for backend in &report.backends {
        match &backend.error {
            None => println!("ok    {}", backend.id),
            Some(error) => println!("FAIL  {}  {}", backend.id, error),
        }
    }
    println!(
        "{}/{} backends reachable, quorum {}",
        report.reachable(),
        report.backends.len(),
        report.quorum
    );

    if report.quorum_reachable() {
        SUCCESS
    } else {
        BACKEND_UNAVAILABLE
    }
}

/// Acquire and keep the lock until a signal, `--hold-ms`, or loss
///
/// A signal while still waiting for the lock gives up with `INTERRUPTED`.
pub async fn hold(
    mutex: &DistributedMutex,
    args: &HoldArgs,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<ExitCode> {
    let mut shutdown_rx = shutdown.subscribe();
    let Some(lease) = acquire_or_interrupt(mutex, &args.lock, &mut shutdown_rx).await? else {
        return Ok(INTERRUPTED);
    };

    let hold_for = async {
        match args.hold_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending::<()>().await,
        }
    };
    let ended = run_with_shutdown(
        async {
            tokio::select! {
                state = lease.cancelled() => Some(state),
                _ = hold_for => None,
            }
        },
        &mut shutdown_rx,
    )
    .await
    .flatten();

    match ended {
        Some(LeaseState::Lost) => {
            println!("lost {}", lease.key());
            Ok(LOCK_LOST)
        }
        Some(state) => {
            println!("{} {}", state, lease.key());
            Ok(SUCCESS)
        }
        None => {
            let key = lease.key().clone();
            let state = mutex.release(lease).await;
            println!("{} {}", state, key);
            Ok(SUCCESS)
        }
    }
}

enum RunOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    LeaseEnded(LeaseState),
    Interrupted,
}

/// Run a child process under the lock
///
/// The child is killed if the lease ends before it exits. The exit code
/// follows the child otherwise.
pub async fn run(
    mutex: &DistributedMutex,
    args: &RunArgs,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<ExitCode> {
    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| AlfaError::IllegalArgument("no command given".to_string()))?;

    let mut shutdown_rx = shutdown.subscribe();
    let Some(lease) = acquire_or_interrupt(mutex, &args.lock, &mut shutdown_rx).await? else {
        return Ok(INTERRUPTED);
    };

    let mut child = match tokio::process::Command::new(program)
        .args(program_args)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            mutex.release(lease).await;
            return Err(e).with_context(|| format!("failed to start '{}'", program));
        }
    };
    info!(key = %lease.key(), program = %program, pid = ?child.id(), "Command started under lock");

    let outcome = tokio::select! {
        status = child.wait() => RunOutcome::Exited(status),
        state = lease.cancelled() => RunOutcome::LeaseEnded(state),
        _ = shutdown_rx.recv() => RunOutcome::Interrupted,
    };

    match outcome {
        RunOutcome::Exited(status) => {
            mutex.release(lease).await;
            let status = status.context("failed to wait for command")?;
            info!(status = %status, "Command finished");
            Ok(ExitCode {
                code: status.code().unwrap_or(INTERNAL.code),
                message: "command finished",
            })
        }
        RunOutcome::LeaseEnded(state) => {
            warn!(key = %lease.key(), state = %state, "Lease ended while command was running, stopping it");
            stop_child(&mut child).await;
            Ok(LOCK_LOST)
        }
        RunOutcome::Interrupted => {
            stop_child(&mut child).await;
            mutex.release(lease).await;
            Ok(INTERRUPTED)
        }
    }
}

async fn stop_child(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill command");
    }
}

/// `None` when shutdown arrives before the lock does; a cancelled
/// acquisition releases whatever it had taken
async fn acquire_or_interrupt(
    mutex: &DistributedMutex,
    args: &LockArgs,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<Option<LeaseHandle>, AlfaError> {
    let lease = run_with_shutdown(acquire(mutex, args), shutdown_rx)
        .await
        .transpose()?;
    if lease.is_none() {
        println!("interrupted while waiting for {}", args.key);
    }
    Ok(lease)
}

async fn acquire(mutex: &DistributedMutex, args: &LockArgs) -> Result<LeaseHandle, AlfaError> {
    let ttl = args.ttl(mutex.config());
    let result = if args.max_wait().is_zero() {
        mutex.try_acquire(args.key.as_str(), ttl).await
    } else {
        mutex.acquire(args.key.as_str(), ttl, args.max_wait()).await
    };

    match result {
        Ok(lease) => {
            println!(
                "acquired {} token={} valid_ms={}",
                lease.key(),
                lease.token(),
                lease.remaining().as_millis()
            );
            Ok(lease)
        }
        Err(e) => Err(lock_error(e)),
    }
}

fn lock_error(err: LockError) -> AlfaError {
    match err {
        LockError::InvalidConfig(message) => AlfaError::ConfigError(message),
        LockError::BackendUnreachable { .. } => AlfaError::NetworkError(err.to_string()),
        other => AlfaError::LockError(other.to_string()),
    }
}
