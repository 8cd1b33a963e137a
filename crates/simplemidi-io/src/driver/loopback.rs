//! In-process MIDI bus.
//!
//! Virtual sources fan out to every input port connected to them, output ports deliver
//! straight into the destination's read callback. Endpoints owned by "other clients"
//! can be registered with [`LoopbackDriver::add_source`] / [`LoopbackDriver::add_destination`]
//! and driven from the outside, which is what the tests use in place of hardware.
//!
//! Read callbacks run on whichever thread triggers the delivery, with the bus read-locked.
//! Disposal takes the write lock, so it waits for in-flight callbacks and no callback
//! can start for an endpoint or port after its disposal returns.

use super::{DriverResult, EndpointRef, MidiDriver, PortRef, ReadCallback};
use crate::error::DriverError;
use crate::packet::PacketList;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Source,
    Destination,
}

struct BusEndpoint {
    name: String,
    kind: EndpointKind,
    /// Created through this driver (as opposed to registered as an external device).
    local: bool,
    read: Option<ReadCallback>,
}

enum BusPort {
    Input {
        name: String,
        read: ReadCallback,
        sources: Vec<EndpointRef>,
    },
    Output {
        name: String,
    },
}

#[derive(Default)]
struct Bus {
    endpoints: BTreeMap<EndpointRef, BusEndpoint>,
    ports: BTreeMap<PortRef, BusPort>,
}

impl Bus {
    fn endpoint(&self, endpoint: EndpointRef) -> DriverResult<&BusEndpoint> {
        self.endpoints
            .get(&endpoint)
            .ok_or_else(|| DriverError::new(format!("unknown endpoint {}", endpoint.0)))
    }

    fn list(&self, kind: EndpointKind) -> Vec<EndpointRef> {
        self.endpoints
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(r, _)| *r)
            .collect()
    }

    fn fan_out(&self, source: EndpointRef, list: &PacketList) -> usize {
        let mut delivered = 0;
        for port in self.ports.values() {
            if let BusPort::Input { read, sources, .. } = port {
                if sources.contains(&source) {
                    read(list);
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

pub struct LoopbackDriver {
    bus: RwLock<Bus>,
    /// Bytes sent to external destinations, which have no read callback.
    captured: Mutex<HashMap<EndpointRef, Vec<u8>>>,
    next_id: AtomicU64,
    sends: AtomicUsize,
    epoch: Instant,
    fail_input_ports: AtomicBool,
    fail_output_ports: AtomicBool,
    fail_connects: AtomicBool,
    fail_sends: AtomicBool,
    fail_enumeration: AtomicBool,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            bus: RwLock::new(Bus::default()),
            captured: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sends: AtomicUsize::new(0),
            epoch: Instant::now(),
            fail_input_ports: AtomicBool::new(false),
            fail_output_ports: AtomicBool::new(false),
            fail_connects: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_enumeration: AtomicBool::new(false),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert_endpoint(
        &self,
        name: &str,
        kind: EndpointKind,
        local: bool,
        read: Option<ReadCallback>,
    ) -> EndpointRef {
        let endpoint = EndpointRef(self.next_id());
        self.bus.write().endpoints.insert(
            endpoint,
            BusEndpoint {
                name: name.to_string(),
                kind,
                local,
                read,
            },
        );
        trace!("Loopback endpoint {} ({:?}): {}", endpoint.0, kind, name);
        endpoint
    }

    // ==================== External devices ====================

    /// Register a source owned by another client (a keyboard, another app).
    pub fn add_source(&self, name: &str) -> EndpointRef {
        self.insert_endpoint(name, EndpointKind::Source, false, None)
    }

    /// Register a destination owned by another client. Data sent to it is captured
    /// and can be read back with [`take_captured`](Self::take_captured).
    pub fn add_destination(&self, name: &str) -> EndpointRef {
        self.insert_endpoint(name, EndpointKind::Destination, false, None)
    }

    /// Emit `data` from an external source to every input port connected to it.
    /// Returns the number of ports that received it.
    pub fn emit(&self, source: EndpointRef, data: &[u8]) -> DriverResult<usize> {
        let list = PacketList::encode(data, self.now()).map_err(|e| DriverError::new(e.to_string()))?;
        self.emit_list(source, &list)
    }

    pub fn emit_list(&self, source: EndpointRef, list: &PacketList) -> DriverResult<usize> {
        let bus = self.bus.read();
        if bus.endpoint(source)?.kind != EndpointKind::Source {
            return Err(DriverError::new(format!("endpoint {} is not a source", source.0)));
        }
        Ok(bus.fan_out(source, list))
    }

    /// Invoke a destination's read callback as if another client had sent `list` to it.
    pub fn deliver(&self, destination: EndpointRef, list: &PacketList) -> DriverResult<()> {
        let bus = self.bus.read();
        let endpoint = bus.endpoint(destination)?;
        match &endpoint.read {
            Some(read) => read(list),
            None => self.capture(destination, list),
        }
        Ok(())
    }

    /// Drain the bytes sent to an external destination so far.
    pub fn take_captured(&self, destination: EndpointRef) -> Vec<u8> {
        self.captured
            .lock()
            .remove(&destination)
            .unwrap_or_default()
    }

    fn capture(&self, destination: EndpointRef, list: &PacketList) {
        let mut captured = self.captured.lock();
        list.decode_into(captured.entry(destination).or_default());
    }

    // ==================== Inspection ====================

    pub fn open_ports(&self) -> usize {
        self.bus.read().ports.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.bus.read().endpoints.len()
    }

    pub fn has_endpoint(&self, endpoint: EndpointRef) -> bool {
        self.bus.read().endpoints.contains_key(&endpoint)
    }

    /// Packet lists handed to [`received`](MidiDriver::received) or [`send`](MidiDriver::send).
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::Relaxed)
    }

    /// Sources an input port is currently connected to.
    pub fn connections(&self, port: PortRef) -> Vec<EndpointRef> {
        match self.bus.read().ports.get(&port) {
            Some(BusPort::Input { sources, .. }) => sources.clone(),
            _ => Vec::new(),
        }
    }

    pub fn port_name(&self, port: PortRef) -> Option<String> {
        self.bus.read().ports.get(&port).map(|p| match p {
            BusPort::Input { name, .. } | BusPort::Output { name } => name.clone(),
        })
    }

    // ==================== Failure injection ====================

    pub fn fail_input_ports(&self, fail: bool) {
        self.fail_input_ports.store(fail, Ordering::SeqCst);
    }

    pub fn fail_output_ports(&self, fail: bool) {
        self.fail_output_ports.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make `sources()` and `destinations()` fail, as when the MIDI service goes away.
    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    fn check_enumeration(&self) -> DriverResult<()> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(DriverError::new("endpoint enumeration failed"));
        }
        Ok(())
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiDriver for LoopbackDriver {
    fn create_source(&self, name: &str) -> DriverResult<EndpointRef> {
        Ok(self.insert_endpoint(name, EndpointKind::Source, true, None))
    }

    fn create_destination(&self, name: &str, read: ReadCallback) -> DriverResult<EndpointRef> {
        Ok(self.insert_endpoint(name, EndpointKind::Destination, true, Some(read)))
    }

    fn dispose_endpoint(&self, endpoint: EndpointRef) {
        let mut bus = self.bus.write();
        if bus.endpoints.remove(&endpoint).is_none() {
            return;
        }
        for port in bus.ports.values_mut() {
            if let BusPort::Input { sources, .. } = port {
                sources.retain(|s| *s != endpoint);
            }
        }
        drop(bus);
        self.captured.lock().remove(&endpoint);
        trace!("Loopback endpoint {} disposed", endpoint.0);
    }

    fn sources(&self) -> DriverResult<Vec<EndpointRef>> {
        self.check_enumeration()?;
        Ok(self.bus.read().list(EndpointKind::Source))
    }

    fn destinations(&self) -> DriverResult<Vec<EndpointRef>> {
        self.check_enumeration()?;
        Ok(self.bus.read().list(EndpointKind::Destination))
    }

    fn endpoint_name(&self, endpoint: EndpointRef) -> Option<String> {
        self.bus
            .read()
            .endpoints
            .get(&endpoint)
            .map(|e| e.name.clone())
    }

    fn create_input_port(&self, name: &str, read: ReadCallback) -> DriverResult<PortRef> {
        if self.fail_input_ports.load(Ordering::SeqCst) {
            return Err(DriverError::new("input port creation refused"));
        }
        let port = PortRef(self.next_id());
        self.bus.write().ports.insert(
            port,
            BusPort::Input {
                name: name.to_string(),
                read,
                sources: Vec::new(),
            },
        );
        Ok(port)
    }

    fn create_output_port(&self, name: &str) -> DriverResult<PortRef> {
        if self.fail_output_ports.load(Ordering::SeqCst) {
            return Err(DriverError::new("output port creation refused"));
        }
        let port = PortRef(self.next_id());
        self.bus.write().ports.insert(
            port,
            BusPort::Output {
                name: name.to_string(),
            },
        );
        Ok(port)
    }

    fn connect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(DriverError::new("connection refused"));
        }
        let mut bus = self.bus.write();
        if bus.endpoint(source)?.kind != EndpointKind::Source {
            return Err(DriverError::new(format!("endpoint {} is not a source", source.0)));
        }
        match bus.ports.get_mut(&port) {
            Some(BusPort::Input { sources, .. }) => {
                if !sources.contains(&source) {
                    sources.push(source);
                }
                Ok(())
            }
            _ => Err(DriverError::new(format!("port {} is not an input port", port.0))),
        }
    }

    fn disconnect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()> {
        match self.bus.write().ports.get_mut(&port) {
            Some(BusPort::Input { sources, .. }) => {
                sources.retain(|s| *s != source);
                Ok(())
            }
            _ => Err(DriverError::new(format!("port {} is not an input port", port.0))),
        }
    }

    fn dispose_port(&self, port: PortRef) {
        self.bus.write().ports.remove(&port);
    }

    fn received(&self, source: EndpointRef, list: &PacketList) -> DriverResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DriverError::new("delivery refused"));
        }
        let bus = self.bus.read();
        let endpoint = bus.endpoint(source)?;
        if endpoint.kind != EndpointKind::Source || !endpoint.local {
            return Err(DriverError::new(format!(
                "endpoint {} is not a virtual source of this client",
                source.0
            )));
        }
        self.sends.fetch_add(1, Ordering::Relaxed);
        bus.fan_out(source, list);
        Ok(())
    }

    fn send(
        &self,
        port: PortRef,
        destination: EndpointRef,
        list: &PacketList,
    ) -> DriverResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DriverError::new("send refused"));
        }
        let bus = self.bus.read();
        if !matches!(bus.ports.get(&port), Some(BusPort::Output { .. })) {
            return Err(DriverError::new(format!("port {} is not an output port", port.0)));
        }
        let endpoint = bus.endpoint(destination)?;
        if endpoint.kind != EndpointKind::Destination {
            return Err(DriverError::new(format!(
                "endpoint {} is not a destination",
                destination.0
            )));
        }
        self.sends.fetch_add(1, Ordering::Relaxed);
        match &endpoint.read {
            Some(read) => read(list),
            None => self.capture(destination, list),
        }
        Ok(())
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collector() -> (ReadCallback, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let read: ReadCallback = Arc::new(move |list: &PacketList| {
            list.decode_into(&mut sink.lock());
        });
        (read, seen)
    }

    #[test]
    fn test_enumeration_order_is_creation_order() {
        let driver = LoopbackDriver::new();
        let a = driver.add_source("A");
        let b = driver.create_source("B").unwrap();
        let _d = driver.add_destination("D");
        let c = driver.add_source("C");

        assert_eq!(driver.sources().unwrap(), vec![a, b, c]);
        assert_eq!(driver.destinations().unwrap().len(), 1);
        assert_eq!(driver.endpoint_name(b).as_deref(), Some("B"));
    }

    #[test]
    fn test_virtual_source_fans_out_to_connected_ports() {
        let driver = LoopbackDriver::new();
        let source = driver.create_source("Out").unwrap();
        let (read_a, seen_a) = collector();
        let (read_b, seen_b) = collector();
        let port_a = driver.create_input_port("a", read_a).unwrap();
        let _port_b = driver.create_input_port("b", read_b).unwrap();
        driver.connect_source(port_a, source).unwrap();

        let list = PacketList::encode(&[0x90, 60, 100], 0).unwrap();
        driver.received(source, &list).unwrap();

        assert_eq!(*seen_a.lock(), vec![0x90, 60, 100]);
        assert!(seen_b.lock().is_empty(), "unconnected port receives nothing");
        assert_eq!(driver.send_count(), 1);
    }

    #[test]
    fn test_received_rejects_external_source() {
        let driver = LoopbackDriver::new();
        let external = driver.add_source("Keyboard");
        let list = PacketList::encode(&[0xF8], 0).unwrap();
        assert!(driver.received(external, &list).is_err());
        assert_eq!(driver.send_count(), 0);
    }

    #[test]
    fn test_send_reaches_destination_callback() {
        let driver = LoopbackDriver::new();
        let (read, seen) = collector();
        let dest = driver.create_destination("In", read).unwrap();
        let port = driver.create_output_port("out").unwrap();

        let list = PacketList::encode(&[0xB0, 7, 64], 0).unwrap();
        driver.send(port, dest, &list).unwrap();
        assert_eq!(*seen.lock(), vec![0xB0, 7, 64]);
    }

    #[test]
    fn test_send_to_external_destination_is_captured() {
        let driver = LoopbackDriver::new();
        let dest = driver.add_destination("Synth");
        let port = driver.create_output_port("out").unwrap();

        driver
            .send(port, dest, &PacketList::encode(&[0xC0, 1], 0).unwrap())
            .unwrap();
        driver
            .send(port, dest, &PacketList::encode(&[0xC0, 2], 0).unwrap())
            .unwrap();
        assert_eq!(driver.take_captured(dest), vec![0xC0, 1, 0xC0, 2]);
        assert!(driver.take_captured(dest).is_empty());
    }

    #[test]
    fn test_disposed_endpoint_stops_receiving() {
        let driver = LoopbackDriver::new();
        let source = driver.add_source("Keyboard");
        let (read, seen) = collector();
        let port = driver.create_input_port("in", read).unwrap();
        driver.connect_source(port, source).unwrap();

        driver.dispose_port(port);
        assert_eq!(driver.emit(source, &[0x90, 1, 1]).unwrap(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(driver.open_ports(), 0);
    }

    #[test]
    fn test_dispose_source_drops_connections() {
        let driver = LoopbackDriver::new();
        let source = driver.add_source("Keyboard");
        let (read, _seen) = collector();
        let port = driver.create_input_port("in", read).unwrap();
        driver.connect_source(port, source).unwrap();
        assert_eq!(driver.connections(port), vec![source]);

        driver.dispose_endpoint(source);
        assert!(driver.connections(port).is_empty());
        assert!(!driver.has_endpoint(source));
    }

    #[test]
    fn test_failure_injection() {
        let driver = LoopbackDriver::new();
        let source = driver.add_source("Keyboard");
        let (read, _seen) = collector();

        driver.fail_input_ports(true);
        assert!(driver.create_input_port("in", read.clone()).is_err());
        driver.fail_input_ports(false);

        let port = driver.create_input_port("in", read).unwrap();
        driver.fail_connects(true);
        assert!(driver.connect_source(port, source).is_err());

        driver.fail_output_ports(true);
        assert!(driver.create_output_port("out").is_err());

        driver.fail_enumeration(true);
        assert!(driver.sources().is_err());
        assert!(driver.destinations().is_err());
        driver.fail_enumeration(false);
        assert_eq!(driver.sources().unwrap(), vec![source]);
    }

    #[test]
    fn test_connect_rejects_destination() {
        let driver = LoopbackDriver::new();
        let dest = driver.add_destination("Synth");
        let (read, _seen) = collector();
        let port = driver.create_input_port("in", read).unwrap();
        assert!(driver.connect_source(port, dest).is_err());
    }
}
