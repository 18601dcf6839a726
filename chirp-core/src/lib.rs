pub mod bus;
pub mod bus_contract;
pub mod error;
pub mod model;
pub mod registry;
