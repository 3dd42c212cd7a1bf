// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Field lists and the learn engine.

use super::phv::FieldId;
use super::phv::Phv;
use crate::provider::LearnWriter;
use crate::sync::KMutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maximum number of samples buffered per learn list before it is
/// flushed to the writer.
pub const LEARN_MAX_SAMPLES: usize = 16;

/// An ordered list of fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldList {
    pub id: u32,
    pub name: Option<String>,
    fields: Vec<FieldId>,
}

impl FieldList {
    pub fn new(id: u32, name: Option<String>) -> Self {
        Self { id, name, fields: vec![] }
    }

    pub fn push_back_field(&mut self, f: FieldId) {
        self.fields.push(f);
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Concatenate the wire bytes of every field.
    pub fn serialize(&self, phv: &Phv) -> Vec<u8> {
        let mut out = vec![];
        for f in &self.fields {
            out.extend_from_slice(phv.field(*f).bytes());
        }
        out
    }
}

#[derive(Debug, Default)]
struct LearnBuf {
    bytes: Vec<u8>,
    nsamples: usize,
}

struct LearnList {
    fields: FieldList,
    max_samples: usize,
    buf: KMutex<LearnBuf>,
}

/// Buffers samples of learn lists and hands full buffers to a
/// [`LearnWriter`].
pub struct LearnEngine {
    lists: BTreeMap<u32, LearnList>,
    writer: Arc<dyn LearnWriter>,
}

impl LearnEngine {
    pub fn new(writer: Arc<dyn LearnWriter>) -> Self {
        Self { lists: BTreeMap::new(), writer }
    }

    pub fn list_create(&mut self, fields: FieldList, max_samples: usize) {
        let list = LearnList {
            fields,
            max_samples: max_samples.max(1),
            buf: KMutex::new(LearnBuf::default()),
        };
        self.lists.insert(list.fields.id, list);
    }

    pub fn list(&self, id: u32) -> Option<&FieldList> {
        self.lists.get(&id).map(|l| &l.fields)
    }

    /// Record a sample of list `id`. Returns `false` for an unknown list.
    pub fn learn(&self, id: u32, phv: &Phv) -> bool {
        let Some(list) = self.lists.get(&id) else {
            return false;
        };

        let sample = list.fields.serialize(phv);
        let mut buf = list.buf.lock();
        buf.bytes.extend_from_slice(&sample);
        buf.nsamples += 1;
        if buf.nsamples >= list.max_samples {
            self.writer.send(id, &buf.bytes, buf.nsamples);
            *buf = LearnBuf::default();
        }
        true
    }

    /// Send whatever list `id` has buffered.
    pub fn flush(&self, id: u32) {
        if let Some(list) = self.lists.get(&id) {
            let mut buf = list.buf.lock();
            if buf.nsamples > 0 {
                self.writer.send(id, &buf.bytes, buf.nsamples);
                *buf = LearnBuf::default();
            }
        }
    }

    pub fn flush_all(&self) {
        for id in self.lists.keys() {
            self.flush(*id);
        }
    }

    /// Number of samples list `id` currently buffers.
    pub fn pending(&self, id: u32) -> usize {
        self.lists.get(&id).map_or(0, |l| l.buf.lock().nsamples)
    }

    /// Drop every buffered sample without sending it.
    pub fn reset_state(&self) {
        for list in self.lists.values() {
            *list.buf.lock() = LearnBuf::default();
        }
    }
}
