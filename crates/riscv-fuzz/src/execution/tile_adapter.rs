//! The Tile Adapter contract: the narrow interface the RTL Runner uses to
//! service memory/interrupt traffic from the RTL model, cooperatively
//! scheduled alongside the clock generator.
//!
//! Building the RTL model itself is out of scope; this module is the
//! adapter's contract plus an in-memory stand-in good enough to drive and
//! test the runner's protocol.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, channel};

/// One clock edge's worth of work the model asked the adapter to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterRequest {
    RisingEdge,
    ProbeTohost { addr: u64 },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterReply {
    Serviced,
    Tohost(u64),
    Stopped { asserted: bool, memory: HashMap<u64, u64> },
}

/// `start`/`probe_tohost`/`stop`/`check_assert`, realized as a pair of
/// channels to a cooperatively-scheduled adapter task: the RTL Runner's
/// body thread sends requests only at rising-edge waits, and the adapter
/// thread never runs a handler between a rising-edge wait and the body's
/// subsequent `eos` check, matching the no-preemption ordering guarantee.
pub struct TileAdapter {
    memory: HashMap<u64, u64>,
    interrupt_map: HashMap<u64, u8>,
    to_body: Sender<AdapterRequest>,
    from_body: Receiver<AdapterReply>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl TileAdapter {
    /// Begins servicing memory read/write and interrupt requests for one
    /// iteration. `memory` maps aligned 8-byte addresses to their initial
    /// value; reads outside the map return zero.
    pub fn start(memory: HashMap<u64, u64>, interrupt_map: HashMap<u64, u8>) -> Self {
        let (to_body, body_rx) = channel::<AdapterRequest>();
        let (body_tx, from_body) = channel::<AdapterReply>();
        let mut worker_memory = memory.clone();
        let worker = std::thread::spawn(move || {
            let asserted = false;
            for request in body_rx {
                let reply = match request {
                    AdapterRequest::RisingEdge => AdapterReply::Serviced,
                    AdapterRequest::ProbeTohost { addr } => {
                        AdapterReply::Tohost(worker_memory.get(&addr).copied().unwrap_or(0))
                    }
                    AdapterRequest::Stop => {
                        let memory = std::mem::take(&mut worker_memory);
                        let _ = body_tx.send(AdapterReply::Stopped { asserted, memory });
                        break;
                    }
                };
                if body_tx.send(reply).is_err() {
                    break;
                }
            }
        });
        Self { memory, interrupt_map, to_body, from_body, worker: Some(worker) }
    }

    pub fn interrupt_at(&self, pc: u64) -> Option<u8> {
        self.interrupt_map.get(&pc).copied()
    }

    pub fn read(&self, addr: u64) -> u64 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    pub fn write(&mut self, addr: u64, value: u64) {
        self.memory.insert(addr, value);
    }

    /// One rising-edge rendezvous with the adapter task.
    pub fn rising_edge(&self) -> anyhow::Result<()> {
        self.to_body.send(AdapterRequest::RisingEdge)?;
        self.from_body.recv()?;
        Ok(())
    }

    pub fn probe_tohost(&self, addr: u64) -> anyhow::Result<u64> {
        self.to_body.send(AdapterRequest::ProbeTohost { addr })?;
        match self.from_body.recv()? {
            AdapterReply::Tohost(value) => Ok(value),
            _ => anyhow::bail!("adapter replied out of protocol to a tohost probe"),
        }
    }

    /// Drains in-flight transactions, happens-before coverage read and
    /// signature extraction. Returns the final memory image alongside the
    /// assertion flag so the caller can extract the signature from it, the
    /// way the original host reads `memory` directly after the run loop
    /// exits.
    pub fn stop(mut self) -> anyhow::Result<(bool, HashMap<u64, u64>)> {
        self.to_body.send(AdapterRequest::Stop)?;
        let (asserted, memory) = match self.from_body.recv()? {
            AdapterReply::Stopped { asserted, memory } => (asserted, memory),
            _ => anyhow::bail!("adapter replied out of protocol to stop"),
        };
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok((asserted, memory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_outside_the_memory_map_return_zero() {
        let adapter = TileAdapter::start(HashMap::new(), HashMap::new());
        assert_eq!(adapter.read(0x8000_0000), 0);
        adapter.stop().unwrap();
    }

    #[test]
    fn rising_edge_rendezvous_completes() {
        let adapter = TileAdapter::start(HashMap::new(), HashMap::new());
        adapter.rising_edge().unwrap();
        adapter.rising_edge().unwrap();
        let (asserted, _memory) = adapter.stop().unwrap();
        assert!(!asserted);
    }

    #[test]
    fn interrupt_map_resolves_by_pc() {
        let mut interrupts = HashMap::new();
        interrupts.insert(0x8000_1000, 0b0011);
        let adapter = TileAdapter::start(HashMap::new(), interrupts);
        assert_eq!(adapter.interrupt_at(0x8000_1000), Some(0b0011));
        assert_eq!(adapter.interrupt_at(0x8000_1004), None);
        adapter.stop().unwrap();
    }

    #[test]
    fn stop_returns_the_initial_memory_image_unchanged() {
        let mut memory = HashMap::new();
        memory.insert(0x8000_2000, 0x1122_3344_5566_7788);
        let adapter = TileAdapter::start(memory, HashMap::new());
        let (_asserted, memory) = adapter.stop().unwrap();
        assert_eq!(memory.get(&0x8000_2000), Some(&0x1122_3344_5566_7788));
    }
}
