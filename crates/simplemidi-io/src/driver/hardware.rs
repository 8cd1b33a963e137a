//! System MIDI driver backed by midir.
//!
//! midir connection objects are not shareable across threads on every backend, so all of
//! them live on one dedicated driver thread. Public calls send a command over a channel
//! and block on a one-shot reply, which keeps every `MidiDriver` call synchronous.

use super::{DriverResult, EndpointRef, MidiDriver, PortRef, ReadCallback};
use crate::error::DriverError;
use crate::packet::{PacketList, LIST_HEADER_LEN, PACKET_HEADER_LEN};
use crossbeam_channel::{bounded, Receiver, Sender};
use midir::{
    Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection,
    MidiOutputPort,
};
use std::collections::HashMap;
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

#[cfg(unix)]
use midir::os::unix::{VirtualInput, VirtualOutput};

enum Command {
    CreateSource {
        name: String,
        reply: Sender<DriverResult<EndpointRef>>,
    },
    CreateDestination {
        name: String,
        read: ReadCallback,
        reply: Sender<DriverResult<EndpointRef>>,
    },
    DisposeEndpoint {
        endpoint: EndpointRef,
        reply: Sender<()>,
    },
    Sources {
        reply: Sender<DriverResult<Vec<EndpointRef>>>,
    },
    Destinations {
        reply: Sender<DriverResult<Vec<EndpointRef>>>,
    },
    EndpointName {
        endpoint: EndpointRef,
        reply: Sender<Option<String>>,
    },
    CreateInputPort {
        name: String,
        read: ReadCallback,
        reply: Sender<DriverResult<PortRef>>,
    },
    CreateOutputPort {
        name: String,
        reply: Sender<DriverResult<PortRef>>,
    },
    Connect {
        port: PortRef,
        source: EndpointRef,
        reply: Sender<DriverResult<()>>,
    },
    Disconnect {
        port: PortRef,
        source: EndpointRef,
        reply: Sender<DriverResult<()>>,
    },
    DisposePort {
        port: PortRef,
        reply: Sender<()>,
    },
    Received {
        source: EndpointRef,
        list: PacketList,
        reply: Sender<DriverResult<()>>,
    },
    Send {
        port: PortRef,
        destination: EndpointRef,
        list: PacketList,
        reply: Sender<DriverResult<()>>,
    },
    Shutdown,
}

pub struct MidirDriver {
    command_sender: Sender<Command>,
    epoch: Instant,
}

impl MidirDriver {
    /// Connect to the system MIDI service under `client_name`.
    pub fn new(client_name: &str) -> Result<Self, DriverError> {
        // Probe up front so an unavailable MIDI service fails here, not on first use
        MidiInput::new(client_name)?;

        let (command_sender, command_receiver) = bounded(64);
        let client_name = client_name.to_string();

        thread::Builder::new()
            .name("simplemidi-driver".to_string())
            .spawn(move || DriverThread::new(client_name).run(command_receiver))
            .map_err(|e| DriverError::new(format!("failed to spawn MIDI driver thread: {}", e)))?;

        Ok(Self {
            command_sender,
            epoch: Instant::now(),
        })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = bounded(1);
        self.command_sender.send(make(reply)).ok()?;
        response.recv().ok()
    }

    fn request_result<T>(
        &self,
        make: impl FnOnce(Sender<DriverResult<T>>) -> Command,
    ) -> DriverResult<T> {
        self.request(make)
            .unwrap_or_else(|| Err(DriverError::new("MIDI driver thread not running")))
    }
}

impl Drop for MidirDriver {
    fn drop(&mut self) {
        let _ = self.command_sender.send(Command::Shutdown);
    }
}

impl MidiDriver for MidirDriver {
    fn create_source(&self, name: &str) -> DriverResult<EndpointRef> {
        self.request_result(|reply| Command::CreateSource {
            name: name.to_string(),
            reply,
        })
    }

    fn create_destination(&self, name: &str, read: ReadCallback) -> DriverResult<EndpointRef> {
        self.request_result(|reply| Command::CreateDestination {
            name: name.to_string(),
            read,
            reply,
        })
    }

    fn dispose_endpoint(&self, endpoint: EndpointRef) {
        let _ = self.request(|reply| Command::DisposeEndpoint { endpoint, reply });
    }

    fn sources(&self) -> DriverResult<Vec<EndpointRef>> {
        self.request_result(|reply| Command::Sources { reply })
    }

    fn destinations(&self) -> DriverResult<Vec<EndpointRef>> {
        self.request_result(|reply| Command::Destinations { reply })
    }

    fn endpoint_name(&self, endpoint: EndpointRef) -> Option<String> {
        self.request(|reply| Command::EndpointName { endpoint, reply })
            .flatten()
    }

    fn create_input_port(&self, name: &str, read: ReadCallback) -> DriverResult<PortRef> {
        self.request_result(|reply| Command::CreateInputPort {
            name: name.to_string(),
            read,
            reply,
        })
    }

    fn create_output_port(&self, name: &str) -> DriverResult<PortRef> {
        self.request_result(|reply| Command::CreateOutputPort {
            name: name.to_string(),
            reply,
        })
    }

    fn connect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()> {
        self.request_result(|reply| Command::Connect {
            port,
            source,
            reply,
        })
    }

    fn disconnect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()> {
        self.request_result(|reply| Command::Disconnect {
            port,
            source,
            reply,
        })
    }

    fn dispose_port(&self, port: PortRef) {
        let _ = self.request(|reply| Command::DisposePort { port, reply });
    }

    fn received(&self, source: EndpointRef, list: &PacketList) -> DriverResult<()> {
        self.request_result(|reply| Command::Received {
            source,
            list: list.clone(),
            reply,
        })
    }

    fn send(
        &self,
        port: PortRef,
        destination: EndpointRef,
        list: &PacketList,
    ) -> DriverResult<()> {
        self.request_result(|reply| Command::Send {
            port,
            destination,
            list: list.clone(),
            reply,
        })
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

// ============================================================================
// Driver thread
// ============================================================================

struct InputPortState {
    name: String,
    read: ReadCallback,
    connections: HashMap<EndpointRef, MidiInputConnection<()>>,
}

struct OutputPortState {
    name: String,
    connections: HashMap<EndpointRef, MidiOutputConnection>,
}

struct DriverThread {
    client_name: String,
    next_id: u64,
    virtual_sources: HashMap<EndpointRef, (String, MidiOutputConnection)>,
    virtual_destinations: HashMap<EndpointRef, (String, MidiInputConnection<()>)>,
    system_sources: Vec<(EndpointRef, MidiInputPort, String)>,
    system_destinations: Vec<(EndpointRef, MidiOutputPort, String)>,
    input_ports: HashMap<PortRef, InputPortState>,
    output_ports: HashMap<PortRef, OutputPortState>,
}

impl DriverThread {
    fn new(client_name: String) -> Self {
        Self {
            client_name,
            next_id: 1,
            virtual_sources: HashMap::new(),
            virtual_destinations: HashMap::new(),
            system_sources: Vec::new(),
            system_destinations: Vec::new(),
            input_ports: HashMap::new(),
            output_ports: HashMap::new(),
        }
    }

    fn run(mut self, command_receiver: Receiver<Command>) {
        loop {
            match command_receiver.recv() {
                Ok(Command::CreateSource { name, reply }) => {
                    let _ = reply.send(self.create_source(name));
                }
                Ok(Command::CreateDestination { name, read, reply }) => {
                    let _ = reply.send(self.create_destination(name, read));
                }
                Ok(Command::DisposeEndpoint { endpoint, reply }) => {
                    self.dispose_endpoint(endpoint);
                    let _ = reply.send(());
                }
                Ok(Command::Sources { reply }) => {
                    let _ = reply.send(self.refresh_sources());
                }
                Ok(Command::Destinations { reply }) => {
                    let _ = reply.send(self.refresh_destinations());
                }
                Ok(Command::EndpointName { endpoint, reply }) => {
                    let _ = reply.send(self.endpoint_name(endpoint));
                }
                Ok(Command::CreateInputPort { name, read, reply }) => {
                    let port = self.next_port();
                    self.input_ports.insert(
                        port,
                        InputPortState {
                            name,
                            read,
                            connections: HashMap::new(),
                        },
                    );
                    let _ = reply.send(Ok(port));
                }
                Ok(Command::CreateOutputPort { name, reply }) => {
                    let port = self.next_port();
                    self.output_ports.insert(
                        port,
                        OutputPortState {
                            name,
                            connections: HashMap::new(),
                        },
                    );
                    let _ = reply.send(Ok(port));
                }
                Ok(Command::Connect {
                    port,
                    source,
                    reply,
                }) => {
                    let _ = reply.send(self.connect(port, source));
                }
                Ok(Command::Disconnect {
                    port,
                    source,
                    reply,
                }) => {
                    let result = match self.input_ports.get_mut(&port) {
                        Some(state) => {
                            if let Some(conn) = state.connections.remove(&source) {
                                conn.close();
                            }
                            Ok(())
                        }
                        None => Err(DriverError::new(format!("unknown input port {}", port.0))),
                    };
                    let _ = reply.send(result);
                }
                Ok(Command::DisposePort { port, reply }) => {
                    if let Some(state) = self.input_ports.remove(&port) {
                        for (_, conn) in state.connections {
                            conn.close();
                        }
                    }
                    if let Some(state) = self.output_ports.remove(&port) {
                        for (_, conn) in state.connections {
                            conn.close();
                        }
                    }
                    let _ = reply.send(());
                }
                Ok(Command::Received {
                    source,
                    list,
                    reply,
                }) => {
                    let result = match self.virtual_sources.get_mut(&source) {
                        Some((_, conn)) => send_packets(conn, &list),
                        None => Err(DriverError::new(format!(
                            "endpoint {} is not a virtual source of this client",
                            source.0
                        ))),
                    };
                    let _ = reply.send(result);
                }
                Ok(Command::Send {
                    port,
                    destination,
                    list,
                    reply,
                }) => {
                    let _ = reply.send(self.send(port, destination, &list));
                }
                Ok(Command::Shutdown) | Err(_) => break,
            }
        }
        debug!("MIDI driver thread for '{}' stopped", self.client_name);
    }

    fn next_endpoint(&mut self) -> EndpointRef {
        self.next_id += 1;
        EndpointRef(self.next_id)
    }

    fn next_port(&mut self) -> PortRef {
        self.next_id += 1;
        PortRef(self.next_id)
    }

    #[cfg(unix)]
    fn create_source(&mut self, name: String) -> DriverResult<EndpointRef> {
        let output = MidiOutput::new(&self.client_name)?;
        let conn = output.create_virtual(&name)?;
        let endpoint = self.next_endpoint();
        self.virtual_sources.insert(endpoint, (name, conn));
        Ok(endpoint)
    }

    #[cfg(not(unix))]
    fn create_source(&mut self, _name: String) -> DriverResult<EndpointRef> {
        Err(DriverError::new(
            "virtual sources are not supported on this platform",
        ))
    }

    #[cfg(unix)]
    fn create_destination(&mut self, name: String, read: ReadCallback) -> DriverResult<EndpointRef> {
        let mut input = MidiInput::new(&self.client_name)?;
        input.ignore(Ignore::None);
        let conn = input.create_virtual(
            &name,
            move |timestamp, message, _| read(&incoming_list(timestamp, message)),
            (),
        )?;
        let endpoint = self.next_endpoint();
        self.virtual_destinations.insert(endpoint, (name, conn));
        Ok(endpoint)
    }

    #[cfg(not(unix))]
    fn create_destination(
        &mut self,
        _name: String,
        _read: ReadCallback,
    ) -> DriverResult<EndpointRef> {
        Err(DriverError::new(
            "virtual destinations are not supported on this platform",
        ))
    }

    fn dispose_endpoint(&mut self, endpoint: EndpointRef) {
        if let Some((_, conn)) = self.virtual_sources.remove(&endpoint) {
            conn.close();
        }
        if let Some((_, conn)) = self.virtual_destinations.remove(&endpoint) {
            conn.close();
        }
        self.system_sources.retain(|(r, _, _)| *r != endpoint);
        self.system_destinations.retain(|(r, _, _)| *r != endpoint);
        for state in self.input_ports.values_mut() {
            if let Some(conn) = state.connections.remove(&endpoint) {
                conn.close();
            }
        }
        for state in self.output_ports.values_mut() {
            if let Some(conn) = state.connections.remove(&endpoint) {
                conn.close();
            }
        }
    }

    /// Re-enumerate system sources, keeping refs stable for ports seen before.
    ///
    /// Our own virtual sources show up here as system ports with refs of their own.
    fn refresh_sources(&mut self) -> DriverResult<Vec<EndpointRef>> {
        let input = MidiInput::new(&self.client_name).map_err(|e| {
            warn!("Cannot enumerate MIDI sources: {}", e);
            DriverError::from(e)
        })?;
        let mut refreshed = Vec::new();
        for port in input.ports() {
            let name = input.port_name(&port).unwrap_or_default();
            let existing = self
                .system_sources
                .iter()
                .find(|(_, p, _)| *p == port)
                .map(|(r, _, _)| *r);
            let endpoint = match existing {
                Some(endpoint) => endpoint,
                None => self.next_endpoint(),
            };
            refreshed.push((endpoint, port, name));
        }
        self.system_sources = refreshed;
        Ok(self.system_sources.iter().map(|(r, _, _)| *r).collect())
    }

    fn refresh_destinations(&mut self) -> DriverResult<Vec<EndpointRef>> {
        let output = MidiOutput::new(&self.client_name).map_err(|e| {
            warn!("Cannot enumerate MIDI destinations: {}", e);
            DriverError::from(e)
        })?;
        let mut refreshed = Vec::new();
        for port in output.ports() {
            let name = output.port_name(&port).unwrap_or_default();
            let existing = self
                .system_destinations
                .iter()
                .find(|(_, p, _)| *p == port)
                .map(|(r, _, _)| *r);
            let endpoint = match existing {
                Some(endpoint) => endpoint,
                None => self.next_endpoint(),
            };
            refreshed.push((endpoint, port, name));
        }
        self.system_destinations = refreshed;
        Ok(self
            .system_destinations
            .iter()
            .map(|(r, _, _)| *r)
            .collect())
    }

    fn endpoint_name(&self, endpoint: EndpointRef) -> Option<String> {
        if let Some((name, _)) = self.virtual_sources.get(&endpoint) {
            return Some(name.clone());
        }
        if let Some((name, _)) = self.virtual_destinations.get(&endpoint) {
            return Some(name.clone());
        }
        self.system_sources
            .iter()
            .find(|(r, _, _)| *r == endpoint)
            .map(|(_, _, name)| name.clone())
            .or_else(|| {
                self.system_destinations
                    .iter()
                    .find(|(r, _, _)| *r == endpoint)
                    .map(|(_, _, name)| name.clone())
            })
    }

    fn connect(&mut self, port: PortRef, source: EndpointRef) -> DriverResult<()> {
        let midi_port = self
            .system_sources
            .iter()
            .find(|(r, _, _)| *r == source)
            .map(|(_, p, _)| p.clone())
            .ok_or_else(|| DriverError::new(format!("unknown source {}", source.0)))?;
        let state = self
            .input_ports
            .get_mut(&port)
            .ok_or_else(|| DriverError::new(format!("unknown input port {}", port.0)))?;

        let mut input = MidiInput::new(&self.client_name)?;
        input.ignore(Ignore::None);
        let read = state.read.clone();
        let conn = input.connect(
            &midi_port,
            &state.name,
            move |timestamp, message, _| read(&incoming_list(timestamp, message)),
            (),
        )?;
        if let Some(previous) = state.connections.insert(source, conn) {
            previous.close();
        }
        Ok(())
    }

    fn send(
        &mut self,
        port: PortRef,
        destination: EndpointRef,
        list: &PacketList,
    ) -> DriverResult<()> {
        let state = self
            .output_ports
            .get_mut(&port)
            .ok_or_else(|| DriverError::new(format!("unknown output port {}", port.0)))?;

        if !state.connections.contains_key(&destination) {
            let midi_port = self
                .system_destinations
                .iter()
                .find(|(r, _, _)| *r == destination)
                .map(|(_, p, _)| p.clone())
                .ok_or_else(|| {
                    DriverError::new(format!("unknown destination {}", destination.0))
                })?;
            let output = MidiOutput::new(&self.client_name)?;
            let conn = output.connect(&midi_port, &state.name)?;
            state.connections.insert(destination, conn);
        }

        match state.connections.get_mut(&destination) {
            Some(conn) => send_packets(conn, list),
            None => Err(DriverError::new("output connection missing")),
        }
    }
}

fn send_packets(conn: &mut MidiOutputConnection, list: &PacketList) -> DriverResult<()> {
    for packet in list.packets() {
        if packet.data.is_empty() {
            continue;
        }
        conn.send(packet.data)?;
    }
    Ok(())
}

/// Wrap one midir message as a packet list, splitting messages longer than a packet.
fn incoming_list(timestamp: u64, message: &[u8]) -> PacketList {
    let max = u16::MAX as usize;
    let packets = message.len().div_ceil(max).max(1);
    let mut list = PacketList::new(LIST_HEADER_LEN + packets * PACKET_HEADER_LEN + message.len());
    if message.is_empty() {
        return list;
    }
    for chunk in message.chunks(max) {
        if let Err(e) = list.push(timestamp, chunk) {
            warn!("Dropping incoming MIDI data: {}", e);
        }
    }
    list
}
