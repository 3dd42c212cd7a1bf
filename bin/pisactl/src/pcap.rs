// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Reading and writing legacy (little-endian) packet capture files.

use anyhow::anyhow;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::io::Write;

/// Return every frame in a capture.
pub fn read_frames(mut bytes: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let (rest, _hdr) = pcap::parse_pcap_header(bytes)
        .map_err(|e| anyhow!("bad capture header: {e:?}"))?;
    bytes = rest;

    let mut frames = vec![];
    while !bytes.is_empty() {
        let (rest, block) = pcap::parse_pcap_frame(bytes)
            .map_err(|e| anyhow!("bad frame {}: {e:?}", frames.len()))?;
        frames.push(block.data.to_vec());
        bytes = rest;
    }
    Ok(frames)
}

/// Writes frames to a capture.
pub struct PcapWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W) -> anyhow::Result<Self> {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65535,
            network: Linktype::ETHERNET,
        };
        let bytes = hdr.to_vec().map_err(|e| anyhow!("{e:?}"))?;
        out.write_all(&bytes)?;
        Ok(Self { out })
    }

    pub fn add_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        let len = u32::try_from(frame.len())?;
        let mut block = LegacyPcapBlock {
            ts_sec: 0,
            ts_usec: 0,
            caplen: len,
            origlen: len,
            data: frame,
        };
        let bytes = block.to_vec().map_err(|e| anyhow!("{e:?}"))?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
