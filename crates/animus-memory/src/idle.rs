//! Idle-summary worker.
//!
//! Sessions that stop receiving user input get force-compacted after
//! the idle timeout, their summary becomes a [`MemoryEpisode`], and an
//! export job is queued for semantic memory. Failures never propagate —
//! a broken session must not starve the rest of the batch.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::service::MemoryService;

pub async fn run_idle_worker(service: Arc<MemoryService>, mut shutdown: watch::Receiver<bool>) {
    let scan_interval =
        std::time::Duration::from_secs(service.config().idle_scan_interval_secs.max(1));
    let mut interval = tokio::time::interval(scan_interval);
    info!(interval_secs = scan_interval.as_secs(), "idle-summary worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                scan_once(&service).await;
                drain_jobs_once(&service).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("idle-summary worker shutting down");
                    break;
                }
            }
        }
    }
}

/// One scan pass. Public so tests can drive it without the ticker.
pub async fn scan_once(service: &MemoryService) {
    let cfg = service.config();
    let cutoff = (Utc::now() - ChronoDuration::seconds(cfg.idle_timeout_secs)).to_rfc3339();

    let sessions = match service.store().idle_sessions(&cutoff, cfg.idle_batch_size) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "idle scan query failed");
            return;
        }
    };
    if sessions.is_empty() {
        return;
    }
    debug!(count = sessions.len(), "idle sessions to summarize");

    for session in sessions {
        let sid = session.session_id.clone();
        if let Err(e) = process_idle_session(service, &session).await {
            warn!(session_id = %sid, error = %e, "idle summary failed");
            continue;
        }
    }
}

/// Export queued episode summaries to semantic memory. Each job ends
/// done or failed; failures stay in the table for inspection and are
/// not retried here.
pub async fn drain_jobs_once(service: &MemoryService) {
    let Some(client) = service.mem0() else {
        return;
    };
    let jobs = match service.store().pending_memory_jobs(service.config().idle_batch_size) {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "pending job query failed");
            return;
        }
    };

    for job in jobs {
        let tags = crate::mem0::MemoryTags {
            user_id: job.user_id.clone(),
            soul_id: job.soul_id.clone(),
            session_id: job.session_id.clone(),
            terminal_id: job.terminal_id.clone(),
        };
        let messages = vec![("assistant".to_string(), job.summary.clone())];
        let status = match client.add(&messages, &tags).await {
            Ok(()) => animus_store::types::JobStatus::Done,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "semantic memory export failed");
                animus_store::types::JobStatus::Failed
            }
        };
        if let Err(e) = service.store().set_job_status(job.id, status) {
            warn!(job_id = job.id, error = %e, "job status update failed");
        }
    }
}

async fn process_idle_session(
    service: &MemoryService,
    session: &animus_store::Session,
) -> crate::error::Result<()> {
    let summary = service
        .maybe_compress_session(&session.session_id, true)
        .await?;

    if !summary.is_empty() {
        service.store().insert_episode(
            &session.session_id,
            &session.user_id,
            &session.terminal_id,
            &session.soul_id,
            &summary,
        )?;

        if service.mem0().is_some() {
            service.store().enqueue_memory_job(
                &session.session_id,
                &session.user_id,
                &session.terminal_id,
                &session.soul_id,
                &summary,
                "idle_timeout",
            )?;
        }
    }

    service.store().mark_idle_processed(&session.session_id)?;
    info!(session_id = %session.session_id, "idle session summarized");
    Ok(())
}
