//! lw-discovery: authenticated multicast beacons feeding the peer directory.

pub mod beacon;
pub mod iface;
pub mod transport;

pub use beacon::{open_beacon, seal_beacon};
pub use iface::{pick_interface, IfacePick};
pub use transport::{run_emitter, run_listener, BeaconSource};
