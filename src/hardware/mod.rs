pub mod mock;
pub mod ports;
pub mod serial_midi;
pub mod sink;

pub use mock::{MockLog, MockSink, NullSink};
pub use ports::{list_ports, open_sink, select_port};
pub use serial_midi::SerialMidiSink;
pub use sink::{shared, OutputSink, PortInfo, PortType, SharedSink};
