//! netsdr-test-harness: Mock channels and a scripted radio for testing the
//! NetSDR client.
//!
//! - [`MockControlChannel`] / [`MockDataChannel`] stand in for the sockets
//!   when unit-testing the client state machine.
//! - [`MockRadioServer`] is a real TCP listener for exercising the socket
//!   transports end to end.

pub mod mock_control;
pub mod mock_data;
pub mod mock_radio;

pub use mock_control::{MockControlChannel, MockControlHandle};
pub use mock_data::{MockDataChannel, MockDataHandle};
pub use mock_radio::MockRadioServer;
