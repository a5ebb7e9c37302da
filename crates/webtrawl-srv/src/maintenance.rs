//! Operator-facing upkeep: the stale-pending sweep and the invariant
//! repair operation.

use chrono::Utc;
use std::sync::Arc;
use webtrawl_core::record::{Patch, RecordFilter, RecordPatch};
use webtrawl_core::{Config, Repository, Result, ScrapeStatus};

pub struct Maintenance {
    repo: Arc<dyn Repository>,
    cfg: Config,
}

impl Maintenance {
    pub fn new(repo: Arc<dyn Repository>, cfg: Config) -> Self {
        Self { repo, cfg }
    }

    /// Fail PENDING records nobody will ever pick up again. The timeout
    /// sits well beyond the queue message TTL, so anything this old has
    /// no request left on the bus.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let stale = self.repo.find_stale_pending(self.cfg.stale_timeout()).await?;
        for record in &stale {
            self.repo
                .update(
                    &record.id,
                    RecordPatch {
                        status: Some(ScrapeStatus::Failed),
                        error_message: Patch::Set(
                            "Request timed out - no response from scraper".to_string(),
                        ),
                        content: Patch::Clear,
                        content_type: Patch::Clear,
                        content_hash: Patch::Clear,
                        fetched_at: Patch::Set(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::warn!(id = %record.id, url = %record.url, "swept stale pending record");
        }
        Ok(stale.len())
    }

    /// Repair records violating the terminal-state invariants (SUCCESS
    /// with an error message, FAILED with content), preserving the
    /// authoritative status.
    pub async fn fix_inconsistencies(&self) -> Result<usize> {
        const PAGE: usize = 200;
        let mut fixed = 0;
        let mut offset = 0;
        loop {
            let batch = self
                .repo
                .find_all(RecordFilter::default(), PAGE, offset)
                .await?;
            if batch.is_empty() {
                break;
            }
            for record in &batch {
                let mut patch = RecordPatch::default();
                let mut dirty = false;
                match record.status {
                    ScrapeStatus::Success if record.error_message.is_some() => {
                        patch.error_message = Patch::Clear;
                        dirty = true;
                    }
                    ScrapeStatus::Failed => {
                        if record.content.is_some() {
                            patch.content = Patch::Clear;
                            dirty = true;
                        }
                        if record.content_type.is_some() {
                            patch.content_type = Patch::Clear;
                            dirty = true;
                        }
                        if record.content_hash.is_some() {
                            patch.content_hash = Patch::Clear;
                            dirty = true;
                        }
                    }
                    _ => {}
                }
                if dirty {
                    self.repo.update(&record.id, patch).await?;
                    fixed += 1;
                    tracing::info!(id = %record.id, status = %record.status, "repaired inconsistent record");
                }
            }
            if batch.len() < PAGE {
                break;
            }
            offset += batch.len();
        }
        Ok(fixed)
    }

    /// Run the stale sweep on the configured interval, forever.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.cfg.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is not
            // a sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.sweep_stale().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(count = n, "stale sweep failed records"),
                    Err(e) => tracing::warn!(error = %e, "stale sweep errored"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webtrawl_core::record::NewFetchRecord;
    use webtrawl_local::RecordStore;

    fn maintenance(repo: Arc<RecordStore>) -> Maintenance {
        let mut cfg = Config::default();
        // Negative timeout puts the cutoff in the future, so everything
        // pending is stale.
        cfg.stale_timeout_minutes = -1;
        Maintenance::new(repo, cfg)
    }

    #[tokio::test]
    async fn sweep_fails_stale_pending() {
        let repo = Arc::new(RecordStore::in_memory());
        let rec = repo
            .create(NewFetchRecord {
                url: "https://stuck.test".to_string(),
                status: ScrapeStatus::Pending,
                retry_count: 0,
            })
            .await
            .unwrap();

        let swept = maintenance(repo.clone()).sweep_stale().await.unwrap();
        assert_eq!(swept, 1);
        let rec = repo.find_by_id(&rec.id).await.unwrap().unwrap();
        assert_eq!(rec.status, ScrapeStatus::Failed);
        assert_eq!(
            rec.error_message.as_deref(),
            Some("Request timed out - no response from scraper")
        );
    }

    #[tokio::test]
    async fn repair_clears_invariant_violations() {
        let repo = Arc::new(RecordStore::in_memory());
        let ok = repo
            .create(NewFetchRecord {
                url: "https://ok.test".to_string(),
                status: ScrapeStatus::Pending,
                retry_count: 0,
            })
            .await
            .unwrap();
        // SUCCESS carrying a leftover error message.
        repo.update(
            &ok.id,
            RecordPatch {
                status: Some(ScrapeStatus::Success),
                content: Patch::Set("<html></html>".to_string()),
                content_hash: Patch::Set("aa".to_string()),
                error_message: Patch::Set("leftover".to_string()),
                fetched_at: Patch::Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // FAILED still carrying content.
        let bad = repo
            .create(NewFetchRecord {
                url: "https://bad.test".to_string(),
                status: ScrapeStatus::Pending,
                retry_count: 0,
            })
            .await
            .unwrap();
        repo.update(
            &bad.id,
            RecordPatch {
                status: Some(ScrapeStatus::Failed),
                error_message: Patch::Set("boom".to_string()),
                content: Patch::Set("<html>stale</html>".to_string()),
                content_type: Patch::Set("text/html".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let m = Maintenance::new(repo.clone(), Config::default());
        assert_eq!(m.fix_inconsistencies().await.unwrap(), 2);

        let ok = repo.find_by_id(&ok.id).await.unwrap().unwrap();
        assert_eq!(ok.status, ScrapeStatus::Success);
        assert!(ok.error_message.is_none());
        assert!(ok.content.is_some(), "status and content preserved");

        let bad = repo.find_by_id(&bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, ScrapeStatus::Failed);
        assert!(bad.content.is_none());
        assert!(bad.content_type.is_none());
        assert_eq!(bad.error_message.as_deref(), Some("boom"));

        assert_eq!(m.fix_inconsistencies().await.unwrap(), 0, "idempotent");
    }
}
