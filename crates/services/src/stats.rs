//! Board statistics for the admin dashboard.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use domains::{CallerContext, ReplyRepository, Result, ThreadRepository};
use serde::Serialize;

use crate::gate::{Action, AntiAbuseGate};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardStats {
    pub threads: u64,
    pub replies: u64,
    pub attachments: u64,
    pub attachment_bytes: u64,
    pub distinct_posters: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub boards: BTreeMap<String, BoardStats>,
    pub total: BoardStats,
}

#[derive(Default)]
struct Tally {
    stats: BoardStats,
    posters: HashSet<String>,
}

impl Tally {
    fn add(&mut self, user_id: &str, attachment_size: Option<u64>) {
        self.posters.insert(user_id.to_string());
        if let Some(size) = attachment_size {
            self.stats.attachments += 1;
            self.stats.attachment_bytes += size;
        }
    }

    fn finish(mut self) -> BoardStats {
        self.stats.distinct_posters = self.posters.len() as u64;
        self.stats
    }
}

pub struct StatsService {
    gate: Arc<AntiAbuseGate>,
    threads: Arc<dyn ThreadRepository>,
    replies: Arc<dyn ReplyRepository>,
}

impl StatsService {
    pub fn new(
        gate: Arc<AntiAbuseGate>,
        threads: Arc<dyn ThreadRepository>,
        replies: Arc<dyn ReplyRepository>,
    ) -> Self {
        Self {
            gate,
            threads,
            replies,
        }
    }

    pub async fn collect(&self, caller: &CallerContext) -> Result<StatsReport> {
        self.gate.check(Action::ViewStats, caller, None).await?;

        let mut boards: BTreeMap<String, Tally> = BTreeMap::new();
        let mut total = Tally::default();

        for thread in self.threads.list_all().await? {
            let size = thread.attachment.as_ref().map(|a| a.size);
            let tally = boards.entry(thread.board.clone()).or_default();
            tally.stats.threads += 1;
            tally.add(&thread.submitter.user_id, size);
            total.stats.threads += 1;
            total.add(&thread.submitter.user_id, size);

            for reply in self.replies.list_by_thread(thread.id).await? {
                let size = reply.attachment.as_ref().map(|a| a.size);
                tally.stats.replies += 1;
                tally.add(&reply.submitter.user_id, size);
                total.stats.replies += 1;
                total.add(&reply.submitter.user_id, size);
            }
        }

        Ok(StatsReport {
            boards: boards
                .into_iter()
                .map(|(board, tally)| (board, tally.finish()))
                .collect(),
            total: total.finish(),
        })
    }
}
