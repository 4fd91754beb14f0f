pub mod cli;

// Choreography model and playback
pub mod action;
pub mod engine;
pub mod figures;
pub mod frame;
pub mod kite;
pub mod script;

// Synchronization protocol and server
pub mod protocol;
pub mod server;
