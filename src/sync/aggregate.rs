//! Per-recipient aggregation of fetched messages.
//!
//! The fold is commutative and associative: pages arrive in any order, so the
//! result must not depend on record order or on how records were split.

use crate::models::{DomainSummary, EmailRecord, RecipientStat};
use std::collections::{BTreeMap, BTreeSet};

pub type RecipientStats = BTreeMap<String, RecipientStat>;

/// Groups records by recipient address.
pub fn aggregate(records: &[EmailRecord]) -> RecipientStats {
    let mut stats = RecipientStats::new();
    let mut malformed = BTreeSet::new();

    for record in records {
        for recipient in &record.recipients {
            match stats.get_mut(&recipient.address) {
                Some(stat) => stat.observe(record.sent_at, recipient.name.clone()),
                None => {
                    let stat = RecipientStat::new(
                        recipient.address.clone(),
                        record.sent_at,
                        recipient.name.clone(),
                    );
                    if stat.domain.is_none() {
                        malformed.insert(stat.address.clone());
                    }
                    stats.insert(stat.address.clone(), stat);
                }
            }
        }
    }

    for address in &malformed {
        log::warn!("recipient address without a domain: {:?}", address);
    }

    stats
}

/// Combines two aggregations as if their records had been aggregated together.
pub fn merge_stats(mut left: RecipientStats, right: RecipientStats) -> RecipientStats {
    for (address, stat) in right {
        match left.get_mut(&address) {
            Some(existing) => existing.merge(stat),
            None => {
                left.insert(address, stat);
            }
        }
    }
    left
}

/// Domain-keyed grouping. Recipients without a domain are left out.
pub fn summarize_domains(stats: &RecipientStats) -> BTreeMap<String, DomainSummary> {
    let mut domains: BTreeMap<String, DomainSummary> = BTreeMap::new();

    for stat in stats.values() {
        let Some(domain) = stat.domain.as_ref() else {
            continue;
        };
        domains
            .entry(domain.clone())
            .and_modify(|summary| {
                summary.recipients += 1;
                summary.total_sent += stat.total_sent;
                summary.last_interacted = summary.last_interacted.max(stat.last_interacted);
            })
            .or_insert_with(|| DomainSummary {
                domain: domain.clone(),
                recipients: 1,
                total_sent: stat.total_sent,
                last_interacted: stat.last_interacted,
            });
    }

    domains
}
