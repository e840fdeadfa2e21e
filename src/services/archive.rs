use crate::models::{SessionRecord, StatsSnapshot};
use anyhow::{bail, Result};
use chrono::Utc;
use log::info;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Owns the persisted list of completed sessions plus the one in
/// progress. The list is kept most-recent-first and capped on insert;
/// persistence lives at a constructor-injected path so tests can point
/// it anywhere.
pub struct SessionArchive {
    data_path: PathBuf,
    records: Vec<SessionRecord>,
    in_progress: Option<SessionRecord>,
    max_records: usize,
}

impl SessionArchive {
    pub fn new(data_path: PathBuf, max_records: usize) -> Self {
        Self {
            data_path,
            records: Vec::new(),
            in_progress: None,
            max_records,
        }
    }

    /// Load archived sessions from disk. A missing file is an empty
    /// archive, not an error.
    pub async fn load(&mut self) -> Result<()> {
        if !self.data_path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.data_path).await?;
        self.records = serde_json::from_str(&content)?;
        info!("loaded {} archived sessions", self.records.len());
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.records)?;
        if let Some(parent) = self.data_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.data_path, content).await?;
        Ok(())
    }

    pub fn in_progress(&self) -> Option<&SessionRecord> {
        self.in_progress.as_ref()
    }

    /// Begin a new in-memory session. Exp and level fields stay unset
    /// until data arrives.
    pub fn start_session(&mut self) -> &SessionRecord {
        let start_time = Utc::now();
        self.in_progress.insert(SessionRecord {
            id: Uuid::new_v4().to_string(),
            title: format!("Session {}", start_time.format("%Y-%m-%d %H:%M")),
            start_time,
            end_time: None,
            duration_seconds: 0,
            paused_seconds: 0,
            start_level: None,
            end_level: None,
            start_exp: None,
            end_exp: None,
            exp_gained: None,
            avg_exp_per_second: 0.0,
            consumable_a_used: 0,
            consumable_b_used: 0,
            map_location: None,
        });
        self.in_progress.as_ref().unwrap()
    }

    /// Tag the in-progress session with where the grinding happened
    pub fn set_session_location(&mut self, location: impl Into<String>) {
        if let Some(session) = self.in_progress.as_mut() {
            session.map_location = Some(location.into());
        }
    }

    /// Mutate only the in-progress session's duration counters; archived
    /// records are never touched here.
    pub fn update_session_duration(&mut self, elapsed_seconds: u64, paused_seconds: u64) {
        if let Some(session) = self.in_progress.as_mut() {
            session.duration_seconds = elapsed_seconds;
            session.paused_seconds = paused_seconds;
        }
    }

    /// Stamp the in-progress session with the final numbers from the
    /// reconciled snapshot. `exp_gained` stays unset when no exp reading
    /// ever arrived.
    pub fn record_session_stats(
        &mut self,
        snapshot: &StatsSnapshot,
        start_level: Option<u32>,
        start_exp: Option<u64>,
    ) {
        let Some(session) = self.in_progress.as_mut() else {
            return;
        };
        session.start_level = start_level;
        session.start_exp = start_exp;
        session.end_level = snapshot.level;
        session.end_exp = snapshot.exp;
        session.exp_gained = start_exp.map(|_| snapshot.total_exp);
        session.consumable_a_used = snapshot.consumable_a_used;
        session.consumable_b_used = snapshot.consumable_b_used;
        let active = session.active_seconds();
        session.avg_exp_per_second = if active > 0 && start_exp.is_some() {
            snapshot.total_exp as f64 / active as f64
        } else {
            0.0
        };
    }

    /// Archive the in-progress session: stamp the end time, prepend,
    /// truncate to the retention cap and persist. No-op when nothing is
    /// in progress.
    pub async fn end_session(&mut self) -> Result<Option<SessionRecord>> {
        let Some(mut session) = self.in_progress.take() else {
            return Ok(None);
        };
        session.end_time = Some(Utc::now());
        self.records.insert(0, session.clone());
        self.records.truncate(self.max_records);
        self.save().await?;
        info!("archived session {} ({}s)", session.id, session.duration_seconds);
        Ok(Some(session))
    }

    pub async fn delete_session(&mut self, id: &str) -> Result<()> {
        self.records.retain(|r| r.id != id);
        self.save().await
    }

    pub async fn clear_all(&mut self) -> Result<()> {
        self.records.clear();
        self.save().await
    }

    /// Rename an archived session. Blank titles are rejected and the
    /// prior title stands.
    pub async fn rename_session(&mut self, id: &str, new_title: &str) -> Result<()> {
        let title = new_title.trim();
        if title.is_empty() {
            bail!("session title cannot be empty");
        }
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            bail!("no archived session with id '{}'", id);
        };
        record.title = title.to_string();
        self.save().await
    }

    // Aggregates are derived from the list on every call; there are no
    // separately maintained running totals to drift.

    pub fn total_sessions(&self) -> usize {
        self.records.len()
    }

    pub fn total_tracking_time(&self) -> u64 {
        self.records.iter().map(|r| r.duration_seconds).sum()
    }

    pub fn average_duration(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.total_tracking_time() as f64 / self.records.len() as f64
        }
    }

    pub fn recent_sessions(&self, n: usize) -> Vec<SessionRecord> {
        self.records.iter().take(n).cloned().collect()
    }

    pub fn all_sessions(&self) -> &[SessionRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_in(dir: &TempDir) -> SessionArchive {
        SessionArchive::new(dir.path().join("session_records.json"), 100)
    }

    #[tokio::test]
    async fn test_end_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        assert!(archive.end_session().await.unwrap().is_none());
        assert_eq!(archive.total_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_without_exp_data_still_archives_duration() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        archive.start_session();
        archive.update_session_duration(300, 20);
        archive.record_session_stats(&StatsSnapshot::default(), None, None);

        let record = archive.end_session().await.unwrap().unwrap();
        assert_eq!(record.duration_seconds, 300);
        assert_eq!(record.paused_seconds, 20);
        assert_eq!(record.exp_gained, None);
        assert_eq!(record.avg_exp_per_second, 0.0);
        assert_eq!(archive.total_sessions(), 1);
    }

    #[tokio::test]
    async fn test_session_stats_are_stamped() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        archive.start_session();
        archive.update_session_duration(600, 0);
        archive.set_session_location("western cavern");

        let snapshot = StatsSnapshot {
            level: Some(51),
            exp: Some(10),
            total_exp: 1_200,
            consumable_a_used: 7,
            consumable_b_used: 3,
            ..StatsSnapshot::default()
        };
        archive.record_session_stats(&snapshot, Some(50), Some(700));

        let record = archive.end_session().await.unwrap().unwrap();
        assert_eq!(record.start_level, Some(50));
        assert_eq!(record.end_level, Some(51));
        assert_eq!(record.exp_gained, Some(1_200));
        assert!((record.avg_exp_per_second - 2.0).abs() < 1e-9);
        assert_eq!(record.consumable_a_used, 7);
        assert_eq!(record.map_location.as_deref(), Some("western cavern"));
    }

    #[tokio::test]
    async fn test_retention_cap_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);

        let mut ids = Vec::new();
        for _ in 0..101 {
            let id = archive.start_session().id.clone();
            ids.push(id);
            archive.end_session().await.unwrap();
        }

        assert_eq!(archive.total_sessions(), 100);
        // Newest first; the very first session fell off the end
        let kept: Vec<&str> = archive.all_sessions().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(kept[0], ids[100]);
        assert_eq!(kept[99], ids[1]);
        assert!(!kept.contains(&ids[0].as_str()));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_records.json");

        let id = {
            let mut archive = SessionArchive::new(path.clone(), 100);
            archive.start_session();
            archive.update_session_duration(120, 0);
            archive.end_session().await.unwrap().unwrap().id
        };

        let mut reloaded = SessionArchive::new(path, 100);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.total_sessions(), 1);
        assert_eq!(reloaded.all_sessions()[0].id, id);
        assert_eq!(reloaded.all_sessions()[0].duration_seconds, 120);
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_title() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        archive.start_session();
        let record = archive.end_session().await.unwrap().unwrap();
        let before = record.title.clone();

        assert!(archive.rename_session(&record.id, "   ").await.is_err());
        assert_eq!(archive.all_sessions()[0].title, before);

        archive.rename_session(&record.id, "morning grind").await.unwrap();
        assert_eq!(archive.all_sessions()[0].title, "morning grind");
    }

    #[tokio::test]
    async fn test_rename_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        assert!(archive.rename_session("missing", "title").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        archive.start_session();
        let first = archive.end_session().await.unwrap().unwrap();
        archive.start_session();
        archive.end_session().await.unwrap();

        archive.delete_session(&first.id).await.unwrap();
        assert_eq!(archive.total_sessions(), 1);

        archive.clear_all().await.unwrap();
        assert_eq!(archive.total_sessions(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_follow_the_list() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);

        for secs in [100u64, 200, 300] {
            archive.start_session();
            archive.update_session_duration(secs, 0);
            archive.end_session().await.unwrap();
        }
        assert_eq!(archive.total_sessions(), 3);
        assert_eq!(archive.total_tracking_time(), 600);
        assert!((archive.average_duration() - 200.0).abs() < 1e-9);
        assert_eq!(archive.recent_sessions(2).len(), 2);
        // Most recent first
        assert_eq!(archive.recent_sessions(1)[0].duration_seconds, 300);

        let deleted = archive.all_sessions()[0].id.clone();
        archive.delete_session(&deleted).await.unwrap();
        assert_eq!(archive.total_tracking_time(), 300);
        assert!((archive.average_duration() - 150.0).abs() < 1e-9);
    }
}
