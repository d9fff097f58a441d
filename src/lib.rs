pub mod board;
pub mod col;
pub mod config;
pub mod demand;
pub mod error;
pub mod flow;
pub mod fundamental_diagram;
pub mod graph;
pub mod indexer;
pub mod likelihood;
pub mod orientation;
pub mod potential;
pub mod scenario;
pub mod serialization;
pub mod shortest_path;
pub mod sweep;

#[cfg(test)]
mod test;
