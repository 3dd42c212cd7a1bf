// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Idle-timeout notification for tables that support it.

use super::table::MatchTable;
use crate::api::EntryHdl;
use crate::provider::AgeingWriter;
use crate::time::Moment;
use std::sync::Arc;

/// Reports idle entries of registered tables through an [`AgeingWriter`].
///
/// An entry is reported once when it goes idle. It is reported again only
/// after it has been hit (and so left the idle set) and gone idle anew.
/// Each table keeps its own record of what was reported.
pub struct AgeingMonitor {
    tables: Vec<usize>,
    writer: Arc<dyn AgeingWriter>,
}

impl AgeingMonitor {
    pub fn new(writer: Arc<dyn AgeingWriter>) -> Self {
        Self { tables: vec![], writer }
    }

    /// Watch the table at index `table` of the control graph.
    pub fn add_table(&mut self, table: usize) {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
    }

    pub fn tables(&self) -> &[usize] {
        &self.tables
    }

    /// Report newly idle entries. Returns the number reported.
    pub fn sweep(&self, tables: &[MatchTable], now: Moment) -> usize {
        let mut total = 0;
        for &idx in &self.tables {
            let Some(table) = tables.get(idx) else {
                continue;
            };

            let fresh: Vec<EntryHdl> = table.take_newly_idle(now);
            if !fresh.is_empty() {
                self.writer.send(table.id, &table.name, &fresh);
                total += fresh.len();
            }
        }
        total
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MatchKind;
    use crate::api::MatchParam;
    use crate::engine::action::ActionFn;
    use crate::engine::header::HeaderType;
    use crate::engine::match_key::MatchKeyBuilder;
    use crate::engine::match_key::MatchUnitKind;
    use crate::engine::phv::PhvTemplate;
    use crate::engine::table::TableConfig;
    use crate::engine::table::TableKind;
    use crate::sync::KMutex;
    use crate::time::Ttl;

    #[derive(Default)]
    struct Capture {
        sent: KMutex<Vec<(u32, String, Vec<EntryHdl>)>>,
    }

    impl AgeingWriter for Capture {
        fn send(&self, table_id: u32, table_name: &str, entries: &[EntryHdl]) {
            self.sent.lock().push((
                table_id,
                table_name.to_string(),
                entries.to_vec(),
            ));
        }
    }

    fn table() -> MatchTable {
        let ht = Arc::new(HeaderType::new("m_t", 0, &[("k".to_string(), 8)]));
        let mut t = PhvTemplate::new();
        t.push_header("m", ht, true);
        let mut key = MatchKeyBuilder::new();
        key.push_back_field(t.field_id("m", "k").unwrap(), 8, MatchKind::Exact);
        let cfg = TableConfig {
            name: "flows".to_string(),
            id: 3,
            kind: TableKind::Simple,
            max_size: 8,
            with_counters: false,
            support_timeout: true,
            unit: MatchUnitKind::Exact,
        };
        let nop = Arc::new(ActionFn::new("nop", 0, vec![]));
        MatchTable::new(cfg, key, vec![nop])
    }

    #[test]
    fn notifies_once_per_idle_period() {
        let cap = Arc::new(Capture::default());
        let mut mon = AgeingMonitor::new(cap.clone());
        mon.add_table(0);
        mon.add_table(0);
        assert_eq!(mon.tables(), &[0]);

        let tables = vec![table()];
        let h = tables[0]
            .add_entry(&[MatchParam::Exact(vec![1])], 0, "nop", &[])
            .unwrap();
        tables[0].set_entry_ttl(h, Ttl::new_millis(500)).unwrap();

        assert_eq!(mon.sweep(&tables, Moment::now()), 0);
        let later = Moment::now().add_millis(1_000);
        assert_eq!(mon.sweep(&tables, later), 1);
        assert_eq!(mon.sweep(&tables, later), 0);

        let sent = cap.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (3, "flows".to_string(), vec![h]));
        drop(sent);

        // A table reset drops its idle record along with its entries, so
        // a new entry that reuses the handle is reported.
        tables[0].reset_state();
        let h2 = tables[0]
            .add_entry(&[MatchParam::Exact(vec![2])], 0, "nop", &[])
            .unwrap();
        assert_eq!(h2, h);
        tables[0].set_entry_ttl(h2, Ttl::new_millis(500)).unwrap();
        assert_eq!(mon.sweep(&tables, later), 1);
        assert_eq!(cap.sent.lock()[1].2, vec![h2]);
    }
}
