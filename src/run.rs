use crate::appliance::ApplianceClient;
use crate::collector;
use crate::config::Config;
use crate::forwarder::{self, ForwardError};
use crate::snapshot::DeviceSnapshot;
use reqwest::{Client, Url};
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Everything one run needs, built once in `main`.
pub struct RunContext<C> {
    pub config: Config,
    pub appliance: C,
    pub ingest: Client,
    pub ingest_url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    CollectionFailure,
    ForwardFailure,
}

impl RunOutcome {
    pub const ALL: [RunOutcome; 3] = [
        RunOutcome::Success,
        RunOutcome::CollectionFailure,
        RunOutcome::ForwardFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::CollectionFailure => "collection_failure",
            RunOutcome::ForwardFailure => "forward_failure",
        }
    }

    /// Process exit code. 1 is left for startup failures.
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::CollectionFailure => 2,
            RunOutcome::ForwardFailure => 3,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Present whenever collection succeeded, even if forwarding failed.
    pub snapshot: Option<DeviceSnapshot>,
    pub started_at: SystemTime,
    pub elapsed: Duration,
}

pub async fn run<C: ApplianceClient>(ctx: &RunContext<C>) -> RunReport {
    let started_at = SystemTime::now();
    let start = Instant::now();
    let deadline = start + ctx.config.run_timeout;
    let span = info_span!(
        "run",
        appliance = %ctx.config.appliance.host,
        started_at = %humantime::format_rfc3339_seconds(started_at),
    );

    let (outcome, snapshot) = execute(ctx, deadline).instrument(span.clone()).await;
    let elapsed = start.elapsed();

    span.in_scope(|| {
        let elapsed_ms = elapsed.as_millis() as u64;
        if outcome == RunOutcome::Success {
            info!(outcome = %outcome, elapsed_ms, "run finished");
        } else {
            warn!(outcome = %outcome, elapsed_ms, "run finished");
        }
    });

    RunReport {
        outcome,
        snapshot,
        started_at,
        elapsed,
    }
}

async fn execute<C: ApplianceClient>(
    ctx: &RunContext<C>,
    deadline: Instant,
) -> (RunOutcome, Option<DeviceSnapshot>) {
    let collected = collector::collect(&ctx.appliance, &ctx.config.volume_names, deadline)
        .instrument(info_span!("collect"))
        .await;

    let snapshot = match collected {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(
                stage = err.stage(),
                auth_rejected = err.is_auth(),
                run_timeout = %humantime::format_duration(ctx.config.run_timeout),
                error = %err,
                "collection failed"
            );
            return (RunOutcome::CollectionFailure, None);
        }
    };
    info!(
        model = %snapshot.model,
        volumes = snapshot.volumes.len(),
        disks = snapshot.disks.len(),
        overall_percent_used = snapshot.overall_percent_used,
        "snapshot collected"
    );

    let forwarded = timeout_at(
        deadline,
        forwarder::send(&ctx.ingest, &ctx.ingest_url, &snapshot),
    )
    .instrument(info_span!("forward", url = %ctx.ingest_url))
    .await
    .unwrap_or_else(|_elapsed| {
        Err(ForwardError::DeadlineExceeded(ctx.config.run_timeout))
    });

    match forwarded {
        Ok(()) => {
            info!(url = %ctx.ingest_url, "snapshot forwarded");
            (RunOutcome::Success, Some(snapshot))
        }
        Err(err) => {
            error!(
                url = err.url().unwrap_or(ctx.ingest_url.as_str()),
                status = err.status_code(),
                body = err.body(),
                error = %err,
                "forwarding failed"
            );
            (RunOutcome::ForwardFailure, Some(snapshot))
        }
    }
}
