pub mod common;
pub mod comms;
pub mod config;
pub mod delivery;
pub mod fsm;
pub mod manager;
pub mod pairing;
pub mod peer_msg;
pub mod testing;
pub mod trade;
