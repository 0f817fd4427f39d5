pub mod bootstrap;
pub mod routes;
pub mod state;
